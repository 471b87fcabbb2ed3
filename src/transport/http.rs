//! HTTP transport: candidate walk against the lantern's REST surface
//!
//! The device may be reachable at a remembered address, at its mDNS name, or
//! behind the configured origin base. Candidates are tried in that fixed
//! priority order with short bounded timeouts; the first success wins and,
//! when it was an explicit device host, gets remembered for next time.

use anyhow::{Context, Result, anyhow};
use reqwest::blocking::{Client, Response};
use serde_json::Value;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::constants::http;
use crate::settings::Settings;
use crate::state::{DeviceState, OutgoingState};
use crate::wire::JoinOutcome;

pub struct HttpLink {
    client: Client,
}

impl HttpLink {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }

    /// Fetch the device state from the first responding candidate
    ///
    /// Two attempts per candidate with a short backoff between them. The
    /// winning base is remembered when it names an explicit device host.
    pub fn request_state(&self, settings: &mut Settings) -> Result<Value> {
        let bases = candidate_bases(settings);
        let (base, body) = first_success(
            &bases,
            http::REQUEST_STATE_ATTEMPTS,
            Duration::from_millis(http::RETRY_BACKOFF_MS),
            |base| {
                let url = format!("{base}/state");
                let resp = self
                    .client
                    .get(&url)
                    .timeout(Duration::from_millis(http::REQUEST_STATE_TIMEOUT_MS))
                    .send()
                    .context(format!("GET {url}"))?;
                ensure_success(resp)?
                    .json::<Value>()
                    .context("Invalid JSON in state response")
            },
        )
        .context("No HTTP device responded")?;

        if let Some(addr) = remembered_addr(&base, origin_of(settings).as_deref()) {
            settings.remember_device(&addr);
        }
        info!(base = %base, "Synced state over HTTP");
        Ok(body)
    }

    /// Push the full state; first responding candidate wins, no retries
    pub fn send_state(&self, settings: &Settings, state: &DeviceState, save: bool) -> bool {
        let payload = OutgoingState::new(state, save);
        let bases = candidate_bases(settings);
        let result = first_success(&bases, 1, Duration::ZERO, |base| {
            let url = format!("{base}/state");
            let resp = self
                .client
                .post(&url)
                .timeout(Duration::from_millis(http::SEND_STATE_TIMEOUT_MS))
                .json(&payload)
                .send()
                .context(format!("POST {url}"))?;
            ensure_success(resp).map(|_| Value::Null)
        });

        match result {
            Ok((base, _)) => {
                info!(base = %base, save = save, "State pushed over HTTP");
                true
            }
            Err(e) => {
                warn!(error = %e, "State push failed over HTTP");
                false
            }
        }
    }

    /// Ask the device to join a network
    ///
    /// A candidate that answers but refuses the join does not stop the walk;
    /// only an `ok: true` reply wins. The granted address, when reported,
    /// is remembered.
    pub fn wifi_join(&self, settings: &mut Settings, ssid: &str, pass: &str) -> Result<JoinOutcome> {
        let body = serde_json::json!({ "ssid": ssid, "pass": pass });
        let bases = candidate_bases(settings);
        let (base, reply) = first_success(&bases, 1, Duration::ZERO, |base| {
            let url = format!("{base}/wifi");
            let resp = self
                .client
                .post(&url)
                .timeout(Duration::from_millis(http::WIFI_TIMEOUT_MS))
                .json(&body)
                .send()
                .context(format!("POST {url}"))?;
            let reply: Value = ensure_success(resp)?
                .json()
                .context("Invalid JSON in join reply")?;
            if reply.get("ok").and_then(Value::as_bool).unwrap_or(false) {
                Ok(reply)
            } else {
                let err = reply
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                Err(anyhow!("device refused join: {err}"))
            }
        })
        .context("No device accepted the join request")?;

        let ip = reply
            .get("ip")
            .and_then(Value::as_str)
            .map(str::to_string);
        if let Some(ip) = &ip {
            settings.remember_device(ip);
        }
        info!(base = %base, ip = ?ip, "Network join accepted");
        Ok(JoinOutcome {
            ok: true,
            ip,
            error: None,
        })
    }

    /// Liveness probe against one explicit address: /health, then /state
    pub fn health_ping(&self, addr: &str) -> Result<()> {
        let base = format!("http://{addr}");
        let health = format!("{base}/health");
        match self.probe(&health) {
            Ok(()) => return Ok(()),
            Err(e) => debug!(url = %health, error = %e, "Health probe failed, trying state"),
        }
        self.probe(&format!("{base}/state"))
            .context(format!("Device {addr} did not respond"))
    }

    fn probe(&self, url: &str) -> Result<()> {
        let resp = self
            .client
            .get(url)
            .timeout(Duration::from_millis(http::HEALTH_TIMEOUT_MS))
            .send()
            .context(format!("GET {url}"))?;
        ensure_success(resp).map(|_| ())
    }

    /// Fetch the device's in-memory log ring from one explicit address
    pub fn fetch_logs(&self, addr: &str) -> Result<Vec<String>> {
        let url = format!("http://{addr}/logs");
        let resp = self
            .client
            .get(&url)
            .timeout(Duration::from_millis(http::LOGS_TIMEOUT_MS))
            .send()
            .context(format!("GET {url}"))?;
        let body: Value = ensure_success(resp)?
            .json()
            .context("Invalid JSON in logs response")?;
        let logs = body
            .get("logs")
            .and_then(Value::as_array)
            .map(|lines| {
                lines
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(logs)
    }
}

/// Candidate base URLs in priority order
///
/// 1. the remembered device address, 2. the well-known mDNS name, 3. the
/// origin base when it is a plain-HTTP or local origin (a secure origin
/// would refuse the mixed-content call anyway), 4. the origin base again
/// regardless, standing in for a relative request against the hosting page.
pub fn candidate_bases(settings: &Settings) -> Vec<String> {
    let mut bases = Vec::new();
    if let Some(addr) = &settings.device_addr {
        bases.push(format!("http://{addr}"));
    }
    bases.push(http::WELL_KNOWN_BASE.to_string());
    if let Some(origin) = origin_of(settings) {
        if is_plain_or_local(&origin) {
            bases.push(origin.clone());
        }
        bases.push(origin);
    }
    bases
}

fn origin_of(settings: &Settings) -> Option<String> {
    settings
        .origin
        .as_deref()
        .map(|o| o.trim_end_matches('/').to_string())
}

fn is_plain_or_local(origin: &str) -> bool {
    origin.starts_with("http://")
        || origin.contains("localhost")
        || origin.contains("127.0.0.1")
}

/// Host to remember after a successful walk, if any
///
/// Any plain-HTTP winner other than the origin gets pinned, the mDNS name
/// included; only the origin and secure bases stay unremembered.
fn remembered_addr(base: &str, origin: Option<&str>) -> Option<String> {
    if !base.starts_with("http://") {
        return None;
    }
    if Some(base) == origin {
        return None;
    }
    let host = base.trim_start_matches("http://").split('/').next()?;
    (!host.is_empty()).then(|| host.to_string())
}

/// Walk candidates in order, `attempts` tries each, first success wins
fn first_success<F>(
    bases: &[String],
    attempts: u32,
    backoff: Duration,
    mut call: F,
) -> Result<(String, Value)>
where
    F: FnMut(&str) -> Result<Value>,
{
    let mut last_err = None;
    for base in bases {
        for attempt in 0..attempts {
            match call(base) {
                Ok(value) => return Ok((base.clone(), value)),
                Err(e) => {
                    debug!(base = %base, attempt = attempt, error = %e, "Candidate attempt failed");
                    last_err = Some(e);
                    if attempt + 1 < attempts && !backoff.is_zero() {
                        thread::sleep(backoff);
                    }
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow!("no candidate addresses to try")))
}

fn ensure_success(resp: Response) -> Result<Response> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        Err(anyhow!("HTTP {}", resp.status()))
    }
}
