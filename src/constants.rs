//! Application-wide constants
//!
//! Single source of truth for protocol timing, candidate addresses, and
//! config file locations.

/// Serial link constants
pub mod serial {
    /// Lantern firmware UART rate
    pub const BAUD_RATE: u32 = 115_200;

    /// Read timeout used as the reader thread's poll tick
    pub const READ_POLL_MS: u64 = 100;

    /// Delay between opening the port and the first state request,
    /// gives the firmware time to finish its reset chatter
    pub const SETTLE_MS: u64 = 400;

    /// How long a one-shot command keeps draining frames after asking
    /// the device for its state
    pub const REPLY_WINDOW_MS: u64 = 800;
}

/// HTTP candidate walk constants
pub mod http {
    /// mDNS name the lantern announces on the local network
    pub const WELL_KNOWN_BASE: &str = "http://zonai.local";

    /// Per-attempt timeout for GET /state
    pub const REQUEST_STATE_TIMEOUT_MS: u64 = 1_200;

    /// Attempts per candidate for GET /state (one retry)
    pub const REQUEST_STATE_ATTEMPTS: u32 = 2;

    /// Pause before the retry attempt
    pub const RETRY_BACKOFF_MS: u64 = 220;

    /// Per-candidate timeout for POST /state (no retry)
    pub const SEND_STATE_TIMEOUT_MS: u64 = 1_500;

    /// Per-candidate timeout for POST /wifi (no retry)
    pub const WIFI_TIMEOUT_MS: u64 = 2_500;

    /// Timeout for GET /health and its GET /state fallback
    pub const HEALTH_TIMEOUT_MS: u64 = 1_000;

    /// Timeout for GET /logs
    pub const LOGS_TIMEOUT_MS: u64 = 1_500;
}

/// Acknowledgment wait deadlines for device-side operations
pub mod ack {
    use std::time::Duration;

    /// Wait for any reply to a provisioning request
    pub const INITIAL_WAIT: Duration = Duration::from_secs(20);

    /// Wait after an interim ack, network association is slow
    pub const EXTENDED_WAIT: Duration = Duration::from_secs(120);
}

/// Config file location constants
pub mod config {
    /// Directory under the platform config dir
    pub const APP_DIR: &str = "zonai-link";

    /// Settings file name
    pub const FILENAME: &str = "settings.toml";
}
