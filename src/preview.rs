//! Terminal strip preview of the glow
//!
//! Paints one row of colored cells approximating the lantern's surface: the
//! radial wash becomes a dome that is brightest in the middle, and the snake's
//! sweep band is sampled per cell from its gradient stops. Repainting happens
//! in place on the current line.

use crossterm::style::{Color, ResetColor, SetForegroundColor};
use crossterm::{QueueableCommand, cursor, style};
use std::io::{self, Write};

use crate::glow::{GlowFrame, GlowLayer, GradientStop};
use crate::state::Rgb;

/// Cells in the painted strip
pub const STRIP_WIDTH: u16 = 48;

/// Repaint the strip for `frame` on the current line
pub fn paint_strip(out: &mut impl Write, frame: &GlowFrame, width: u16) -> io::Result<()> {
    out.queue(cursor::MoveToColumn(0))?;
    for i in 0..width {
        let f = (f32::from(i) + 0.5) / f32::from(width);
        let [r, g, b] = cell_color(frame, f);
        out.queue(SetForegroundColor(Color::Rgb { r, g, b }))?;
        out.queue(style::Print("█"))?;
    }
    out.queue(ResetColor)?;
    out.flush()
}

/// Leave the strip line behind and restore the terminal state
pub fn finish(out: &mut impl Write) -> io::Result<()> {
    out.queue(ResetColor)?;
    out.queue(style::Print("\n"))?;
    out.flush()
}

/// Color of the cell at surface fraction `f` (0-1), blended onto black
fn cell_color(frame: &GlowFrame, f: f32) -> Rgb {
    match &frame.layer {
        GlowLayer::Radial => {
            // dome falloff stands in for the centered radial glow
            let dome = 1.0 - (2.0 * f - 1.0).powi(2);
            shade(channels(frame.rgb), frame.opacity * dome)
        }
        GlowLayer::Sweep { stops, offset_pct } => {
            let (rgb, alpha) = sample(stops, *offset_pct, f);
            shade(rgb, alpha * frame.opacity)
        }
    }
}

fn channels(rgb: Rgb) -> [f32; 3] {
    [f32::from(rgb[0]), f32::from(rgb[1]), f32::from(rgb[2])]
}

/// Sample the 200%-wide band at surface fraction `f`
///
/// An offset of p percent slides the band left by p/2 of the surface, so the
/// visible window runs from stop position p/2 to p/2 + 50 and wraps at 100.
fn sample(stops: &[GradientStop], offset_pct: f32, f: f32) -> ([f32; 3], f32) {
    let (Some(&first), Some(&last)) = (stops.first(), stops.last()) else {
        return ([0.0; 3], 0.0);
    };
    let pos = ((f + offset_pct / 100.0) / 2.0).rem_euclid(1.0) * 100.0;
    if pos <= first.at {
        return stop_rgba(first);
    }
    for pair in stops.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if pos <= b.at {
            let span = (b.at - a.at).max(f32::EPSILON);
            let t = (pos - a.at) / span;
            let (ar, aa) = stop_rgba(a);
            let (br, ba) = stop_rgba(b);
            // premultiplied blend, so fading into a transparent stop thins
            // the band out without dragging its hue toward black
            let alpha = aa + (ba - aa) * t;
            let premul = [
                ar[0] * aa + (br[0] * ba - ar[0] * aa) * t,
                ar[1] * aa + (br[1] * ba - ar[1] * aa) * t,
                ar[2] * aa + (br[2] * ba - ar[2] * aa) * t,
            ];
            let rgb = if alpha > 0.0 {
                [premul[0] / alpha, premul[1] / alpha, premul[2] / alpha]
            } else {
                [0.0; 3]
            };
            return (rgb, alpha);
        }
    }
    stop_rgba(last)
}

fn stop_rgba(stop: GradientStop) -> ([f32; 3], f32) {
    match stop.color {
        Some(color) => (channels(color), 1.0),
        None => ([0.0; 3], 0.0),
    }
}

fn shade(rgb: [f32; 3], alpha: f32) -> Rgb {
    let a = alpha.clamp(0.0, 1.0);
    [
        (rgb[0] * a).round() as u8,
        (rgb[1] * a).round() as u8,
        (rgb[2] * a).round() as u8,
    ]
}
