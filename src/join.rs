//! Flight/payload-configuration view joins (spec.md §4.6).

use serde_json::Value;

use crate::db::{DbClient, ViewRow};
use crate::error::Result;

/// Join `end_start_including_payloads` rows into flight documents augmented
/// with `_payload_docs`.
///
/// Rows arrive grouped by flight: one row with `key[3] == 0` carrying the
/// flight document, followed by rows with `key[3] == 1` carrying referenced
/// payload-configuration documents. References whose `doc` is `null` are
/// dropped silently. View row order is preserved.
pub fn flights(db: &dyn DbClient, now: i64) -> Result<Vec<Value>> {
    let query = format!("include_docs=true&startkey=[{now}]");
    let rows = db.view("flight", "end_start_including_payloads", &query)?;

    let mut results = Vec::new();
    let mut current: Option<(Value, Vec<Value>)> = None;

    for row in rows {
        let marker = row.key.get(3).and_then(Value::as_i64);
        match marker {
            Some(0) => {
                if let Some((doc, payload_docs)) = current.take() {
                    results.push(attach_payload_docs(doc, payload_docs));
                }
                if let Some(doc) = row.doc {
                    current = Some((doc, Vec::new()));
                }
            }
            Some(1) => {
                if let (Some((_, payload_docs)), Some(doc)) = (&mut current, row.doc) {
                    payload_docs.push(doc);
                }
            }
            _ => {}
        }
    }
    if let Some((doc, payload_docs)) = current.take() {
        results.push(attach_payload_docs(doc, payload_docs));
    }

    Ok(results)
}

fn attach_payload_docs(mut flight_doc: Value, payload_docs: Vec<Value>) -> Value {
    flight_doc["_payload_docs"] = Value::Array(payload_docs);
    flight_doc
}

/// Join `name_time_created` rows into the plain list of payload
/// configuration documents.
pub fn payloads(db: &dyn DbClient) -> Result<Vec<Value>> {
    let rows: Vec<ViewRow> = db.view("payload_configuration", "name_time_created", "include_docs=true")?;
    Ok(rows.into_iter().filter_map(|r| r.doc).collect())
}
