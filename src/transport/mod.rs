//! Transport layer: USB serial link and HTTP candidate walk
//!
//! One of the two carries every exchange with the lantern. Which one is
//! decided per operation by `resolve_kind`, honoring a forced preference
//! first and falling back to whatever looks reachable.

pub mod http;
pub mod serial;

pub use http::HttpLink;
pub use serial::{SerialLink, available_ports};

use crate::settings::{CommsMode, Settings};

/// Which transport carries the next exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Serial,
    Http,
}

impl LinkKind {
    pub fn label(&self) -> &'static str {
        match self {
            LinkKind::Serial => "USB",
            LinkKind::Http => "HTTP",
        }
    }
}

/// Pick the transport for the next exchange
///
/// A forced preference always wins. In auto mode an open serial session is
/// used as-is; otherwise a configured network address or origin points at
/// HTTP, a present serial port suggests USB, and HTTP is the final fallback.
pub fn resolve_kind(settings: &Settings, serial_open: bool, ports_present: bool) -> LinkKind {
    match settings.comms_mode {
        CommsMode::Serial => LinkKind::Serial,
        CommsMode::Http => LinkKind::Http,
        CommsMode::Auto => {
            if serial_open {
                LinkKind::Serial
            } else if settings.device_addr.is_some() || settings.origin.is_some() {
                LinkKind::Http
            } else if ports_present {
                LinkKind::Serial
            } else {
                LinkKind::Http
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(mode: CommsMode, device_addr: Option<&str>, origin: Option<&str>) -> Settings {
        Settings {
            device_addr: device_addr.map(str::to_string),
            comms_mode: mode,
            origin: origin.map(str::to_string),
        }
    }

    #[test]
    fn test_forced_serial_wins_over_configured_http() {
        // Even with a remembered device address and no open session, a
        // forced serial preference resolves to serial
        let s = settings(CommsMode::Serial, Some("192.168.4.17"), None);
        assert_eq!(resolve_kind(&s, false, false), LinkKind::Serial);
    }

    #[test]
    fn test_forced_http_wins_over_open_serial_session() {
        let s = settings(CommsMode::Http, None, None);
        assert_eq!(resolve_kind(&s, true, true), LinkKind::Http);
    }

    #[test]
    fn test_auto_prefers_open_serial_session() {
        let s = settings(CommsMode::Auto, Some("192.168.4.17"), None);
        assert_eq!(resolve_kind(&s, true, false), LinkKind::Serial);
    }

    #[test]
    fn test_auto_uses_http_when_network_target_configured() {
        let addr = settings(CommsMode::Auto, Some("192.168.4.17"), None);
        assert_eq!(resolve_kind(&addr, false, true), LinkKind::Http);

        let origin = settings(CommsMode::Auto, None, Some("http://controller.lan:8000"));
        assert_eq!(resolve_kind(&origin, false, true), LinkKind::Http);
    }

    #[test]
    fn test_auto_falls_back_to_present_ports_then_http() {
        let s = settings(CommsMode::Auto, None, None);
        assert_eq!(resolve_kind(&s, false, true), LinkKind::Serial);
        assert_eq!(resolve_kind(&s, false, false), LinkKind::Http);
    }

    #[test]
    fn test_labels() {
        assert_eq!(LinkKind::Serial.label(), "USB");
        assert_eq!(LinkKind::Http.label(), "HTTP");
    }
}
