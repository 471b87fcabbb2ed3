#![forbid(unsafe_code)]

mod constants;
mod controller;
mod glow;
mod preview;
mod settings;
mod state;
mod transport;
mod wire;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{Level as TraceLevel, info, warn};
use tracing_subscriber::FmtSubscriber;

use controller::{LinkState, Session};
use settings::{CommsMode, Settings};
use state::{DeviceState, LightMode, Rgb, SnakeColorMode};
use transport::LinkKind;

#[derive(Parser, Debug)]
#[command(
    name = "zonai-link",
    version,
    about = "Desktop controller for the Zonai lantern over USB serial or HTTP"
)]
struct Cli {
    /// Transport preference: auto, serial or http
    #[arg(long, global = true, value_name = "MODE")]
    comms: Option<String>,

    /// Persist the --comms preference for future runs
    #[arg(long, global = true)]
    save_comms: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the link state and the lantern's current settings
    Status {
        /// Serial port to open first (e.g. /dev/ttyACM0)
        #[arg(short, long, value_name = "PORT")]
        port: Option<String>,
    },
    /// Change lantern settings and push them to the device
    Set(SetArgs),
    /// Hold a serial session open and report whatever the device says
    Watch {
        /// Serial port to open (e.g. /dev/ttyACM0)
        #[arg(short, long, value_name = "PORT")]
        port: Option<String>,
        /// Paint a live strip preview of the glow while watching
        #[arg(long)]
        preview: bool,
        /// Stop after this many seconds; 0 runs until interrupted
        #[arg(long, default_value_t = 0)]
        seconds: u64,
    },
    /// Hand the device credentials for your network
    Wifi {
        /// Network name
        #[arg(long)]
        ssid: String,
        /// Network password; empty for open networks
        #[arg(long, default_value = "")]
        pass: String,
        /// Serial port to open first
        #[arg(short, long, value_name = "PORT")]
        port: Option<String>,
    },
    /// Fetch the device's recent log lines over HTTP
    Logs {
        /// Address to query instead of the remembered one
        #[arg(value_name = "ADDR")]
        addr: Option<String>,
    },
    /// Probe a device address and remember it when it answers
    Ping {
        /// Address to probe instead of the remembered one
        #[arg(value_name = "ADDR")]
        addr: Option<String>,
    },
    /// List serial ports visible on this machine
    Ports,
    /// Animate the glow locally with no device attached
    Demo {
        /// Mode to preview: solid, fade or snake
        #[arg(long)]
        mode: Option<String>,
        /// Frames per second
        #[arg(long, default_value_t = 30)]
        fps: u32,
        /// Stop after this many seconds; 0 runs until interrupted
        #[arg(long, default_value_t = 0)]
        seconds: u64,
    },
}

#[derive(Args, Debug, Default)]
struct SetArgs {
    /// Light mode: solid, fade or snake
    #[arg(long)]
    mode: Option<String>,

    /// Solid color as R,G,B
    #[arg(long, value_name = "R,G,B")]
    solid_color: Option<String>,

    /// Solid brightness, 0-1
    #[arg(long)]
    solid_bright: Option<f32>,

    /// First fade color as R,G,B
    #[arg(long, value_name = "R,G,B")]
    fade_color: Option<String>,

    /// Second fade color as R,G,B
    #[arg(long, value_name = "R,G,B")]
    fade_color_2: Option<String>,

    /// Breathe toward the second fade color instead of dimming the first
    #[arg(long)]
    fade_use_2: Option<bool>,

    /// Fade floor, 0-1
    #[arg(long)]
    fade_min: Option<f32>,

    /// Fade ceiling, 0-1
    #[arg(long)]
    fade_max: Option<f32>,

    /// Fade speed multiplier
    #[arg(long)]
    fade_speed: Option<f32>,

    /// Snake coloring: single, rainbow or gradient
    #[arg(long)]
    snake_color_mode: Option<String>,

    /// First snake color as R,G,B
    #[arg(long, value_name = "R,G,B")]
    snake_color_1: Option<String>,

    /// Second snake color as R,G,B
    #[arg(long, value_name = "R,G,B")]
    snake_color_2: Option<String>,

    /// Snake direction; false runs counter-clockwise
    #[arg(long)]
    snake_cw: Option<bool>,

    /// Snake speed multiplier
    #[arg(long)]
    snake_speed: Option<f32>,

    /// Try the change without writing it to the device's flash
    #[arg(long)]
    live: bool,

    /// Serial port to open first
    #[arg(short, long, value_name = "PORT")]
    port: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse log level from environment variable
    let log_level = match std::env::var("LOG_LEVEL")
        .unwrap_or_else(|_| "info".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    run(cli)?;
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let mut settings = Settings::load();
    if let Some(raw) = &cli.comms {
        let mode = CommsMode::parse(raw)
            .ok_or_else(|| anyhow!("Unknown comms mode '{raw}'; use auto, serial or http"))?;
        if cli.save_comms {
            settings.set_comms_mode(mode)?;
        } else {
            settings.comms_mode = mode;
        }
    } else if cli.save_comms {
        bail!("--save-comms does nothing without --comms");
    }

    let mut session = Session::new(settings)?;
    match cli.command {
        Command::Status { port } => cmd_status(&mut session, port.as_deref()),
        Command::Set(args) => cmd_set(&mut session, &args),
        Command::Watch {
            port,
            preview,
            seconds,
        } => cmd_watch(&mut session, port.as_deref(), preview, seconds),
        Command::Wifi { ssid, pass, port } => {
            cmd_wifi(&mut session, &ssid, &pass, port.as_deref())
        }
        Command::Logs { addr } => cmd_logs(&session, addr.as_deref()),
        Command::Ping { addr } => cmd_ping(&mut session, addr.as_deref()),
        Command::Ports => cmd_ports(),
        Command::Demo { mode, fps, seconds } => {
            cmd_demo(&mut session, mode.as_deref(), fps, seconds)
        }
    }
}

/// Open a serial session when one is asked for or resolves naturally
///
/// An explicit --port always opens that port. Otherwise serial is only
/// opened when the transport resolution lands on it, using the first
/// visible port.
fn connect_if_serial(session: &mut Session, port: Option<&str>) -> Result<()> {
    if let Some(port) = port {
        return session.connect(port);
    }
    if session.resolve_kind() == LinkKind::Serial {
        let ports = transport::available_ports();
        let Some(first) = ports.first() else {
            bail!("No serial ports present; pass --port or configure an address");
        };
        let name = first.port_name.clone();
        info!(port = %name, "Auto-selected serial port");
        session.connect(&name)?;
    }
    Ok(())
}

fn cmd_status(session: &mut Session, port: Option<&str>) -> Result<()> {
    connect_if_serial(session, port)?;
    if session.link_state() == LinkState::Connected(LinkKind::Serial) {
        // the state request went out during connect; wait for the reply
        session.pump_for(Duration::from_millis(constants::serial::REPLY_WINDOW_MS));
    } else if let Err(e) = session.request_state() {
        warn!(error = %e, "No device reachable; showing last known values");
    }
    print_status(session);
    session.disconnect();
    Ok(())
}

fn cmd_set(session: &mut Session, args: &SetArgs) -> Result<()> {
    connect_if_serial(session, args.port.as_deref())?;
    // start from what the device currently runs, not from defaults
    if session.link_state() == LinkState::Connected(LinkKind::Serial) {
        session.pump_for(Duration::from_millis(constants::serial::REPLY_WINDOW_MS));
    } else if let Err(e) = session.request_state() {
        warn!(error = %e, "Could not fetch the current state first; editing defaults");
    }

    if !apply_set(args, session.state_mut())? {
        bail!("Nothing to change; pass at least one setting flag");
    }
    if !session.send_state(!args.live) {
        bail!("No device took the update");
    }
    // catch whatever the device echoes back about the applied state
    session.pump_for(Duration::from_millis(constants::serial::REPLY_WINDOW_MS));
    print_status(session);
    session.disconnect();
    Ok(())
}

fn cmd_watch(
    session: &mut Session,
    port: Option<&str>,
    show_preview: bool,
    seconds: u64,
) -> Result<()> {
    connect_if_serial(session, port)?;
    if session.link_state() != LinkState::Connected(LinkKind::Serial) {
        bail!("Watching needs a serial session; pass --port or plug the device in");
    }
    let interrupted = interrupt_flag()?;
    info!("Watching; Ctrl-C stops");

    let started = Instant::now();
    let deadline = (seconds > 0).then(|| started + Duration::from_secs(seconds));
    let mut out = std::io::stdout();
    while !interrupted.load(Ordering::Relaxed) {
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                break;
            }
        }
        let changed = session.pump();
        if session.link_state() != LinkState::Connected(LinkKind::Serial) {
            warn!("Serial session ended");
            break;
        }
        if show_preview {
            let frame = glow::render(session.state(), started.elapsed().as_secs_f64(), true);
            preview::paint_strip(&mut out, &frame, preview::STRIP_WIDTH)?;
        } else if changed {
            println!("{}", one_line(session.state()));
        }
        std::thread::sleep(Duration::from_millis(33));
    }
    if show_preview {
        preview::finish(&mut out)?;
    }
    session.disconnect();
    Ok(())
}

fn cmd_wifi(session: &mut Session, ssid: &str, pass: &str, port: Option<&str>) -> Result<()> {
    connect_if_serial(session, port)?;
    let outcome = session.wifi_join(ssid, pass)?;
    if !outcome.ok {
        let err = outcome.error.as_deref().unwrap_or("unknown");
        bail!("Device could not join: {err}");
    }
    match &outcome.ip {
        Some(ip) => println!("Joined; device reachable at {ip}"),
        None => println!("Joined"),
    }
    // the join triggers a state refresh; give the reply time to land
    session.pump();
    session.pump_for(Duration::from_millis(constants::serial::REPLY_WINDOW_MS));
    session.disconnect();
    Ok(())
}

fn cmd_logs(session: &Session, addr: Option<&str>) -> Result<()> {
    let lines = session.fetch_logs(addr)?;
    if lines.is_empty() {
        println!("No log lines");
    }
    for line in lines {
        println!("{line}");
    }
    Ok(())
}

fn cmd_ping(session: &mut Session, addr: Option<&str>) -> Result<()> {
    let addr = session.ping(addr)?;
    println!("{addr} is up");
    Ok(())
}

fn cmd_ports() -> Result<()> {
    let ports = transport::available_ports();
    if ports.is_empty() {
        println!("No serial ports found");
        return Ok(());
    }
    for info in ports {
        match info.port_type {
            serialport::SerialPortType::UsbPort(usb) => println!(
                "{}  usb {:04x}:{:04x} {}",
                info.port_name,
                usb.vid,
                usb.pid,
                usb.product.as_deref().unwrap_or("-")
            ),
            other => println!("{}  {:?}", info.port_name, other),
        }
    }
    Ok(())
}

fn cmd_demo(session: &mut Session, mode: Option<&str>, fps: u32, seconds: u64) -> Result<()> {
    session.toggle_offline_demo();
    // the demo shows the factory glow, not whatever a device last sent
    session.state_mut().reset();
    if let Some(raw) = mode {
        session.state_mut().mode = LightMode::parse(raw)
            .ok_or_else(|| anyhow!("Unknown mode '{raw}'; use solid, fade or snake"))?;
    }

    let interrupted = interrupt_flag()?;
    let frame_time = Duration::from_millis(1_000 / u64::from(fps.max(1)));
    let deadline = (seconds > 0).then(|| Instant::now() + Duration::from_secs(seconds));
    let started = Instant::now();
    let mut out = std::io::stdout();
    info!(mode = %session.state().mode.as_str(), fps = fps, "Demoing locally; Ctrl-C stops");

    while !interrupted.load(Ordering::Relaxed) {
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                break;
            }
        }
        let frame = glow::render(session.state(), started.elapsed().as_secs_f64(), true);
        preview::paint_strip(&mut out, &frame, preview::STRIP_WIDTH)?;
        std::thread::sleep(frame_time);
    }
    preview::finish(&mut out)?;
    Ok(())
}

/// Apply the set flags to `state`; returns whether anything changed
fn apply_set(args: &SetArgs, state: &mut DeviceState) -> Result<bool> {
    let mut changed = false;
    if let Some(raw) = &args.mode {
        state.mode = LightMode::parse(raw)
            .ok_or_else(|| anyhow!("Unknown mode '{raw}'; use solid, fade or snake"))?;
        changed = true;
    }
    if let Some(raw) = &args.solid_color {
        state.solid_color = parse_rgb(raw)?;
        changed = true;
    }
    if let Some(v) = args.solid_bright {
        state.solid_bright = clamp_unit("solid-bright", v);
        changed = true;
    }
    if let Some(raw) = &args.fade_color {
        state.fade_color = parse_rgb(raw)?;
        changed = true;
    }
    if let Some(raw) = &args.fade_color_2 {
        state.fade_color_2 = parse_rgb(raw)?;
        changed = true;
    }
    if let Some(v) = args.fade_use_2 {
        state.fade_use_2 = v;
        changed = true;
    }
    if let Some(v) = args.fade_min {
        state.fade_min = clamp_unit("fade-min", v);
        changed = true;
    }
    if let Some(v) = args.fade_max {
        state.fade_max = clamp_unit("fade-max", v);
        changed = true;
    }
    if (args.fade_min.is_some() || args.fade_max.is_some()) && state.fade_min > state.fade_max {
        // a moved end of the window stops at the other end, never past it
        if args.fade_min.is_some() {
            warn!(min = state.fade_min, max = state.fade_max, "fade-min above fade-max, lowering it");
            state.fade_min = state.fade_max;
        } else {
            warn!(min = state.fade_min, max = state.fade_max, "fade-max below fade-min, raising it");
            state.fade_max = state.fade_min;
        }
    }
    if let Some(v) = args.fade_speed {
        state.fade_speed = positive_speed("fade-speed", v);
        changed = true;
    }
    if let Some(raw) = &args.snake_color_mode {
        state.snake_color_mode = SnakeColorMode::parse(raw)
            .ok_or_else(|| anyhow!("Unknown snake coloring '{raw}'; use single, rainbow or gradient"))?;
        changed = true;
    }
    if let Some(raw) = &args.snake_color_1 {
        state.snake_color_1 = parse_rgb(raw)?;
        changed = true;
    }
    if let Some(raw) = &args.snake_color_2 {
        state.snake_color_2 = parse_rgb(raw)?;
        changed = true;
    }
    if let Some(v) = args.snake_cw {
        state.snake_cw = v;
        changed = true;
    }
    if let Some(v) = args.snake_speed {
        state.snake_speed = positive_speed("snake-speed", v);
        changed = true;
    }
    Ok(changed)
}

fn parse_rgb(raw: &str) -> Result<Rgb> {
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    if parts.len() != 3 {
        bail!("Expected R,G,B, got '{raw}'");
    }
    let mut rgb = [0u8; 3];
    for (slot, part) in rgb.iter_mut().zip(&parts) {
        *slot = part
            .parse()
            .with_context(|| format!("Invalid channel '{part}' in '{raw}'"))?;
    }
    Ok(rgb)
}

fn clamp_unit(name: &str, v: f32) -> f32 {
    if (0.0..=1.0).contains(&v) {
        v
    } else {
        let clamped = v.clamp(0.0, 1.0);
        warn!(setting = name, value = v, clamped = clamped, "Value outside 0-1, clamping");
        clamped
    }
}

fn positive_speed(name: &str, v: f32) -> f32 {
    if v > 0.0 {
        v
    } else {
        warn!(setting = name, value = v, "Speed must be positive, using 0.1");
        0.1
    }
}

fn fmt_rgb(rgb: Rgb) -> String {
    format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2])
}

fn one_line(state: &DeviceState) -> String {
    match state.mode {
        LightMode::Solid => format!(
            "solid {} at {:.2}",
            fmt_rgb(state.solid_color),
            state.solid_bright
        ),
        LightMode::Fade => format!(
            "fade {} to {} {:.2}-{:.2} at {:.2}x",
            fmt_rgb(state.fade_color),
            fmt_rgb(state.fade_color_2),
            state.fade_min,
            state.fade_max,
            state.fade_speed
        ),
        LightMode::Snake => format!(
            "snake {} {} at {:.2}x {}",
            state.snake_color_mode.as_str(),
            fmt_rgb(state.snake_color_1),
            state.snake_speed,
            if state.snake_cw { "cw" } else { "ccw" }
        ),
    }
}

fn print_status(session: &Session) {
    let state = session.state();
    println!("link:   {}", session.link_state().label());
    println!("mode:   {}", state.mode.as_str());
    println!(
        "solid:  {} at {:.2}",
        fmt_rgb(state.solid_color),
        state.solid_bright
    );
    println!(
        "fade:   {} to {} ({}), {:.2}-{:.2} at {:.2}x",
        fmt_rgb(state.fade_color),
        fmt_rgb(state.fade_color_2),
        if state.fade_use_2 { "blend" } else { "dim" },
        state.fade_min,
        state.fade_max,
        state.fade_speed
    );
    println!(
        "snake:  {} {} to {}, {} at {:.2}x",
        state.snake_color_mode.as_str(),
        fmt_rgb(state.snake_color_1),
        fmt_rgb(state.snake_color_2),
        if state.snake_cw { "cw" } else { "ccw" },
        state.snake_speed
    );
    if let Some(addr) = &session.settings().device_addr {
        println!("device: {addr}");
    }
    println!("comms:  {}", session.settings().comms_mode.as_str());
}

/// Flag that flips when the user interrupts the process
#[cfg(unix)]
fn interrupt_flag() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&flag))
        .context("Failed to register the interrupt handler")?;
    Ok(flag)
}

#[cfg(not(unix))]
fn interrupt_flag() -> Result<Arc<AtomicBool>> {
    Ok(Arc::new(AtomicBool::new(false)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rgb_accepts_spaced_triples() {
        assert_eq!(parse_rgb("255,230,0").unwrap(), [255, 230, 0]);
        assert_eq!(parse_rgb(" 1, 2 ,3 ").unwrap(), [1, 2, 3]);
    }

    #[test]
    fn test_parse_rgb_rejects_bad_input() {
        assert!(parse_rgb("255,230").is_err());
        assert!(parse_rgb("255,230,0,9").is_err());
        assert!(parse_rgb("255,230,teal").is_err());
        assert!(parse_rgb("300,0,0").is_err());
    }

    #[test]
    fn test_apply_set_reports_no_change_for_empty_args() {
        let mut state = DeviceState::default();
        let args = SetArgs::default();
        assert!(!apply_set(&args, &mut state).unwrap());
        assert_eq!(state, DeviceState::default());
    }

    #[test]
    fn test_apply_set_changes_fields() {
        let mut state = DeviceState::default();
        let args = SetArgs {
            mode: Some("fade".to_string()),
            fade_color: Some("10,20,30".to_string()),
            fade_speed: Some(1.5),
            ..Default::default()
        };
        assert!(apply_set(&args, &mut state).unwrap());
        assert_eq!(state.mode, LightMode::Fade);
        assert_eq!(state.fade_color, [10, 20, 30]);
        assert_eq!(state.fade_speed, 1.5);
    }

    #[test]
    fn test_apply_set_clamps_unit_ranges() {
        let mut state = DeviceState::default();
        let args = SetArgs {
            solid_bright: Some(1.4),
            fade_min: Some(-0.2),
            ..Default::default()
        };
        assert!(apply_set(&args, &mut state).unwrap());
        assert_eq!(state.solid_bright, 1.0);
        assert_eq!(state.fade_min, 0.0);
    }

    #[test]
    fn test_apply_set_keeps_fade_window_ordered() {
        // a min pushed above the current max stops at the max
        let mut state = DeviceState::default();
        let args = SetArgs {
            fade_min: Some(1.0),
            ..Default::default()
        };
        assert!(apply_set(&args, &mut state).unwrap());
        assert_eq!(state.fade_min, 0.9);
        assert_eq!(state.fade_max, 0.9);

        // and a max pushed below the current min stops at the min
        let mut state = DeviceState::default();
        let args = SetArgs {
            fade_max: Some(0.05),
            ..Default::default()
        };
        assert!(apply_set(&args, &mut state).unwrap());
        assert_eq!(state.fade_min, 0.1);
        assert_eq!(state.fade_max, 0.1);

        // when both arrive inverted the window collapses onto the max
        let mut state = DeviceState::default();
        let args = SetArgs {
            fade_min: Some(0.8),
            fade_max: Some(0.2),
            ..Default::default()
        };
        assert!(apply_set(&args, &mut state).unwrap());
        assert_eq!(state.fade_min, 0.2);
        assert_eq!(state.fade_max, 0.2);
    }

    #[test]
    fn test_apply_set_floors_non_positive_speeds() {
        let mut state = DeviceState::default();
        let args = SetArgs {
            fade_speed: Some(-3.0),
            snake_speed: Some(0.0),
            ..Default::default()
        };
        assert!(apply_set(&args, &mut state).unwrap());
        assert_eq!(state.fade_speed, 0.1);
        assert_eq!(state.snake_speed, 0.1);
    }

    #[test]
    fn test_apply_set_rejects_unknown_enums() {
        let mut state = DeviceState::default();
        let args = SetArgs {
            mode: Some("plasma".to_string()),
            ..Default::default()
        };
        assert!(apply_set(&args, &mut state).is_err());

        let args = SetArgs {
            snake_color_mode: Some("tartan".to_string()),
            ..Default::default()
        };
        assert!(apply_set(&args, &mut state).is_err());
    }

    #[test]
    fn test_one_line_tracks_mode() {
        let mut state = DeviceState::default();
        assert!(one_line(&state).starts_with("solid #ffe600"));
        state.mode = LightMode::Snake;
        assert!(one_line(&state).starts_with("snake rainbow"));
    }
}
