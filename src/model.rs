//! Canonical document construction (spec.md §3, §4.2).
//!
//! Pure and stateless: every function here takes the session state it needs
//! as arguments rather than reading it from shared state, so it is trivially
//! unit-testable without a database.

use base64::Engine;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{UploaderError, Result};
use crate::time::timestamp_to_rfc3339_localoffset;

/// The two listener document kinds (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerKind {
    Telemetry,
    Information,
}

impl ListenerKind {
    fn type_str(self) -> &'static str {
        match self {
            ListenerKind::Telemetry => "listener_telemetry",
            ListenerKind::Information => "listener_information",
        }
    }
}

/// Reserved keys a caller must not supply in payload-telemetry metadata;
/// they are written by the uploader itself (spec.md §4.2).
const RESERVED_RECEIVER_KEYS: &[&str] = &[
    "time_created",
    "time_uploaded",
    "latest_listener_telemetry",
    "latest_listener_information",
];

/// Build a canonical `listener_telemetry`/`listener_information` document.
///
/// `data.callsign` is always overwritten with `callsign`, even if the
/// caller's `data` set a different value.
pub fn build_listener_doc(
    kind: ListenerKind,
    id: String,
    callsign: &str,
    mut data: Map<String, Value>,
    time_created: Option<i64>,
    now: i64,
) -> Value {
    data.insert("callsign".to_owned(), Value::String(callsign.to_owned()));

    let time_created_str = timestamp_to_rfc3339_localoffset(time_created.unwrap_or(now));
    let time_uploaded_str = timestamp_to_rfc3339_localoffset(now);

    serde_json::json!({
        "_id": id,
        "type": kind.type_str(),
        "time_created": time_created_str,
        "time_uploaded": time_uploaded_str,
        "data": data,
    })
}

/// The lowercase hex SHA-256 of `raw` — the content-addressed payload
/// telemetry document id (spec.md §3).
pub fn sha256_hex(raw: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw);
    hex_lower(&hasher.finalize())
}

fn hex_lower(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(s, "{b:02x}").expect("writing to a String cannot fail");
    }
    s
}

/// Build the partial "proto" payload-telemetry document submitted to the
/// server-side update handler (spec.md §4.2).
///
/// Returns the content-addressed id alongside the proto document. Rejects
/// `metadata` containing any of the reserved receiver keys.
pub fn build_proto_ptlm(
    raw: &[u8],
    metadata: Map<String, Value>,
    callsign: &str,
    time_created: i64,
    time_uploaded: i64,
    latest_listener_telemetry: Option<&str>,
    latest_listener_information: Option<&str>,
) -> Result<(String, Value)> {
    for key in metadata.keys() {
        if RESERVED_RECEIVER_KEYS.contains(&key.as_str()) {
            return Err(UploaderError::InvalidArgument(format!(
                "metadata must not contain reserved key '{key}'"
            )));
        }
    }

    let id = sha256_hex(raw);
    let raw_b64 = base64::engine::general_purpose::STANDARD.encode(raw);

    let mut receiver = metadata;
    receiver.insert(
        "time_created".to_owned(),
        Value::String(timestamp_to_rfc3339_localoffset(time_created)),
    );
    receiver.insert(
        "time_uploaded".to_owned(),
        Value::String(timestamp_to_rfc3339_localoffset(time_uploaded)),
    );
    if let Some(lt) = latest_listener_telemetry {
        receiver.insert(
            "latest_listener_telemetry".to_owned(),
            Value::String(lt.to_owned()),
        );
    }
    if let Some(li) = latest_listener_information {
        receiver.insert(
            "latest_listener_information".to_owned(),
            Value::String(li.to_owned()),
        );
    }

    let mut receivers = Map::new();
    receivers.insert(callsign.to_owned(), Value::Object(receiver));

    let proto = serde_json::json!({
        "data": { "_raw": raw_b64 },
        "receivers": receivers,
    });

    Ok((id, proto))
}

/// Re-stamp `time_uploaded` inside a single receiver slot ahead of a merge
/// retry. Leaves `time_created`, `_id`, `data._raw`, and every other field
/// of the receiver slot untouched (spec.md §4.5 state machine).
pub fn restamp_time_uploaded(proto: &mut Value, callsign: &str, now: i64) {
    if let Some(receiver) = proto
        .get_mut("receivers")
        .and_then(|r| r.get_mut(callsign))
    {
        receiver["time_uploaded"] = Value::String(timestamp_to_rfc3339_localoffset(now));
    }
}
