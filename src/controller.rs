//! Device session: owns the mirrored state and drives both transports
//!
//! A `Session` holds the last known lantern state, the persisted settings,
//! and at most one open serial link. Inbound frames are applied through a
//! single path so status lines, acks, join outcomes and state fragments
//! behave the same no matter which operation triggered them.

use anyhow::{Context, Result, bail};
use serde_json::Value;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::constants;
use crate::settings::Settings;
use crate::state::{DeviceState, OutgoingState};
use crate::transport::{self, HttpLink, LinkKind, SerialLink};
use crate::wire::{InboundFrame, JoinOutcome};

/// What the session is currently talking to, for display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    OfflineDemo,
    Connected(LinkKind),
}

impl LinkState {
    pub fn label(&self) -> String {
        match self {
            LinkState::Disconnected => "Disconnected".to_string(),
            LinkState::OfflineDemo => "Offline demo".to_string(),
            LinkState::Connected(kind) => format!("Connected ({})", kind.label()),
        }
    }
}

struct SerialSession {
    link: SerialLink,
    rx: Receiver<Value>,
}

pub struct Session {
    state: DeviceState,
    settings: Settings,
    http: HttpLink,
    serial: Option<SerialSession>,
    offline_demo: bool,
    http_synced: bool,
    ack_deadline: Option<Instant>,
    last_outcome: Option<JoinOutcome>,
    resync_after_join: bool,
}

impl Session {
    pub fn new(settings: Settings) -> Result<Self> {
        Ok(Self {
            state: DeviceState::default(),
            settings,
            http: HttpLink::new()?,
            serial: None,
            offline_demo: false,
            http_synced: false,
            ack_deadline: None,
            last_outcome: None,
            resync_after_join: false,
        })
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut DeviceState {
        &mut self.state
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn link_state(&self) -> LinkState {
        if self.offline_demo {
            LinkState::OfflineDemo
        } else if self.serial.is_some() {
            LinkState::Connected(LinkKind::Serial)
        } else if self.http_synced {
            LinkState::Connected(LinkKind::Http)
        } else {
            LinkState::Disconnected
        }
    }

    /// Transport for the next exchange, honoring a forced preference
    pub fn resolve_kind(&self) -> LinkKind {
        let ports_present = !transport::available_ports().is_empty();
        transport::resolve_kind(&self.settings, self.serial.is_some(), ports_present)
    }

    /// Open a serial session and ask the device for its state
    pub fn connect(&mut self, port_name: &str) -> Result<()> {
        if self.serial.is_some() {
            self.disconnect();
        }
        self.offline_demo = false;
        let (tx, rx) = mpsc::channel();
        let link = SerialLink::open(port_name, tx)?;
        self.serial = Some(SerialSession { link, rx });
        // let the firmware finish its reset chatter before the first request
        thread::sleep(Duration::from_millis(constants::serial::SETTLE_MS));
        if let Err(e) = self.request_state_serial() {
            self.drop_serial();
            return Err(e.context("Port opened but the state request failed"));
        }
        Ok(())
    }

    /// Tear down the serial session, if any
    pub fn disconnect(&mut self) {
        self.ack_deadline = None;
        self.http_synced = false;
        if self.serial.is_some() {
            self.drop_serial();
            info!("Disconnected");
        }
    }

    fn drop_serial(&mut self) {
        if let Some(session) = self.serial.take() {
            session.link.shutdown();
        }
    }

    /// Enter or leave the local-only demo
    ///
    /// A live serial session keeps priority; the toggle is ignored until
    /// the port is closed.
    pub fn toggle_offline_demo(&mut self) -> bool {
        if self.serial.is_some() {
            debug!("Ignoring demo toggle while a serial session is open");
            return self.offline_demo;
        }
        self.offline_demo = !self.offline_demo;
        if self.offline_demo {
            self.disconnect();
            info!("Offline demo on");
        } else {
            info!("Offline demo off");
        }
        self.offline_demo
    }

    /// Apply every frame the reader thread has queued so far
    ///
    /// Returns whether the mirrored state changed.
    pub fn pump(&mut self) -> bool {
        let mut changed = false;
        loop {
            let next = match &self.serial {
                Some(session) => session.rx.try_recv(),
                None => break,
            };
            match next {
                Ok(value) => {
                    if self.apply_inbound(value) {
                        changed = true;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    warn!("Serial reader ended unexpectedly; closing session");
                    self.drop_serial();
                    break;
                }
            }
        }
        if self.resync_after_join {
            self.resync_after_join = false;
            if let Err(e) = self.request_state() {
                debug!(error = %e, "Post-join state refresh failed");
            }
        }
        changed
    }

    /// Keep applying frames until `window` passes without needing to spin
    pub fn pump_for(&mut self, window: Duration) -> bool {
        let deadline = Instant::now() + window;
        let mut changed = false;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let next = match &self.serial {
                Some(session) => session.rx.recv_timeout(remaining),
                None => break,
            };
            match next {
                Ok(value) => {
                    if self.apply_inbound(value) {
                        changed = true;
                    }
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("Serial reader ended unexpectedly; closing session");
                    self.drop_serial();
                    break;
                }
            }
        }
        if self.resync_after_join {
            self.resync_after_join = false;
            if let Err(e) = self.request_state() {
                debug!(error = %e, "Post-join state refresh failed");
            }
        }
        changed
    }

    /// Push the full mirrored state to the device
    ///
    /// Suppressed in the offline demo. Returns whether a device took it.
    pub fn send_state(&mut self, save: bool) -> bool {
        if self.offline_demo {
            debug!("Offline demo active; not sending");
            return false;
        }
        match self.resolve_kind() {
            LinkKind::Serial => {
                let Some(session) = &mut self.serial else {
                    warn!("No serial session open");
                    return false;
                };
                let payload = OutgoingState::new(&self.state, save);
                match session.link.send_frame(&payload) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(error = %e, "State push failed over serial");
                        false
                    }
                }
            }
            LinkKind::Http => self.http.send_state(&self.settings, &self.state, save),
        }
    }

    /// Ask the device for its state over whichever transport resolves
    ///
    /// The serial reply lands asynchronously through `pump`; the HTTP reply
    /// is merged before returning.
    pub fn request_state(&mut self) -> Result<()> {
        match self.resolve_kind() {
            LinkKind::Serial => self.request_state_serial(),
            LinkKind::Http => match self.http.request_state(&mut self.settings) {
                Ok(body) => {
                    self.http_synced = true;
                    if let Value::Object(fields) = body {
                        self.state.merge(&fields);
                    }
                    Ok(())
                }
                Err(e) => {
                    self.http_synced = false;
                    Err(e)
                }
            },
        }
    }

    fn request_state_serial(&mut self) -> Result<()> {
        let Some(session) = &mut self.serial else {
            bail!("No serial session open");
        };
        session
            .link
            .send_frame(&serde_json::json!({ "get_state": true }))
    }

    /// Hand the device network credentials and wait for the outcome
    pub fn wifi_join(&mut self, ssid: &str, pass: &str) -> Result<JoinOutcome> {
        let ssid = ssid.trim();
        if ssid.is_empty() {
            bail!("A network name is required");
        }
        if self.offline_demo {
            bail!("Offline demo active; leave it before joining a network");
        }
        match self.resolve_kind() {
            LinkKind::Http => {
                let outcome = self.http.wifi_join(&mut self.settings, ssid, pass)?;
                if let Err(e) = self.request_state() {
                    debug!(error = %e, "Post-join state refresh failed");
                }
                Ok(outcome)
            }
            LinkKind::Serial => self.wifi_join_serial(ssid, pass),
        }
    }

    /// Serial join: send credentials, then wait out the ack protocol
    ///
    /// The device acks quickly, then scans and joins at its own pace; an
    /// ack replaces the short initial deadline with a much longer one.
    fn wifi_join_serial(&mut self, ssid: &str, pass: &str) -> Result<JoinOutcome> {
        self.last_outcome = None;
        {
            let Some(session) = &mut self.serial else {
                bail!("No serial session open");
            };
            session.link.send_frame(&serde_json::json!({
                "wifi": { "ssid": ssid, "pass": pass }
            }))?;
        }
        self.ack_deadline = Some(Instant::now() + constants::ack::INITIAL_WAIT);
        info!(ssid = %ssid, "Join request sent over serial");

        while let Some(deadline) = self.ack_deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.ack_deadline = None;
                bail!("No response from the device over serial");
            }
            let next = match &self.serial {
                Some(session) => session.rx.recv_timeout(remaining),
                None => bail!("Serial session closed while waiting for the join result"),
            };
            match next {
                Ok(value) => {
                    self.apply_inbound(value);
                    if let Some(outcome) = self.last_outcome.take() {
                        return Ok(outcome);
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    self.drop_serial();
                    bail!("Serial session ended while waiting for the join result");
                }
            }
        }
        bail!("Join wait ended without a result")
    }

    /// Probe one explicit address, remember it on success, and resync
    ///
    /// Returns the address that answered.
    pub fn ping(&mut self, addr: Option<&str>) -> Result<String> {
        let addr = match addr {
            Some(a) => a.to_string(),
            None => self
                .settings
                .device_addr
                .clone()
                .context("No device address known; pass one or join a network first")?,
        };
        self.http.health_ping(&addr)?;
        self.settings.remember_device(&addr);
        info!(addr = %addr, "Device is up");
        if let Err(e) = self.request_state() {
            debug!(error = %e, "State refresh after ping failed");
        }
        Ok(addr)
    }

    /// Fetch the device's log ring from one explicit address
    pub fn fetch_logs(&self, addr: Option<&str>) -> Result<Vec<String>> {
        let addr = match addr {
            Some(a) => a.to_string(),
            None => self
                .settings
                .device_addr
                .clone()
                .context("No device address known; pass one or ping first")?,
        };
        self.http.fetch_logs(&addr)
    }

    /// Single path for everything the device says
    ///
    /// Control fields are peeled off first; whatever state fields ride in
    /// the same frame merge afterwards. Returns whether state changed.
    fn apply_inbound(&mut self, value: Value) -> bool {
        let Some(frame) = InboundFrame::from_value(value) else {
            return false;
        };
        if let Some(status) = &frame.status {
            info!(status = %status, "Device status");
        }
        if frame.ack.is_some() {
            // the device took the request and is working on it; give the
            // slow path (scan + join) room to finish
            self.ack_deadline = Some(Instant::now() + constants::ack::EXTENDED_WAIT);
            info!("Acknowledged; waiting for the device to finish");
        }
        if let Some(outcome) = frame.outcome.clone() {
            self.ack_deadline = None;
            if outcome.ok {
                if let Some(ip) = &outcome.ip {
                    self.settings.remember_device(ip);
                    info!(ip = %ip, "Device joined the network");
                    // joining can rewrite persisted device state; resync
                    self.resync_after_join = true;
                }
            } else {
                let err = outcome.error.as_deref().unwrap_or("unknown");
                warn!(error = %err, "Device reported failure");
            }
            self.last_outcome = Some(outcome);
        }
        self.state.merge(&frame.fields)
    }
}
