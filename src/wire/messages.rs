//! Inbound message classification
//!
//! Every decoded wire object may independently carry control fields
//! (`status`, `ack`, `ok`/`ip`/`error`) and any subset of the lantern's state
//! keys. One object can mix all of them; each concern is handled on its own.

use serde_json::{Map, Value};

/// Terminal result of a pending device-side operation (network join)
#[derive(Debug, Clone, PartialEq)]
pub struct JoinOutcome {
    pub ok: bool,
    pub ip: Option<String>,
    pub error: Option<String>,
}

/// One decoded wire object, split into control fields and a state fragment
///
/// Control fields are extracted leniently; a malformed one never blocks the
/// rest of the object. Whatever keys remain in `fields` go to the state merge,
/// which applies its own schema filtering.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    /// Informational status line from the device
    pub status: Option<String>,
    /// Interim acknowledgment, payload is free-form
    pub ack: Option<Value>,
    /// Present whenever the object carried an `ok` key
    pub outcome: Option<JoinOutcome>,
    /// Remaining keys, candidate state fragment
    pub fields: Map<String, Value>,
}

impl InboundFrame {
    /// Classify a decoded object; non-objects carry nothing and yield None
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Object(mut map) = value else {
            return None;
        };

        let status = match map.remove("status") {
            Some(Value::String(s)) => Some(s),
            _ => None,
        };
        let ack = map.remove("ack");

        let ok = map.remove("ok");
        let ip = match map.remove("ip") {
            Some(Value::String(s)) => Some(s),
            _ => None,
        };
        let error = match map.remove("error") {
            Some(Value::String(s)) => Some(s),
            _ => None,
        };
        // The `ok` key being present at all makes the object terminal for a
        // pending operation; its truth decides success.
        let outcome = ok.map(|v| JoinOutcome {
            ok: v.as_bool().unwrap_or(false),
            ip,
            error,
        });

        Some(Self {
            status,
            ack,
            outcome,
            fields: map,
        })
    }
}
