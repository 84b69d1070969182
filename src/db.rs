//! Typed database operations (spec.md §4.3).
//!
//! `DbClient` is the seam between the uploader core and the transport. The
//! production implementation, [`HttpDbClient`], talks to a CouchDB-compatible
//! server over `reqwest::blocking`; tests substitute a scripted fake so the
//! merge loop and join logic can be exercised without a real server.

use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Result, UploaderError};

/// A single row of a CouchDB view response.
#[derive(Debug, Clone, Deserialize)]
pub struct ViewRow {
    pub id: Option<String>,
    #[serde(default)]
    pub key: Value,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub doc: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct ViewResponseWire {
    rows: Vec<ViewRow>,
}

/// Typed operations over the document store (spec.md §4.3).
///
/// Every method maps transport-level outcomes onto the error taxonomy
/// documented on each method, not onto a generic catch-all.
pub trait DbClient: Send + Sync {
    /// `GET /_uuids?count=n`.
    ///
    /// Contract: implementers must return exactly `n` ids or fail with an
    /// error; returning fewer without erroring is a contract violation.
    /// [`HttpDbClient`] enforces this itself (`MalformedResponse` on a short
    /// count); callers such as [`crate::id::IdPool`] additionally guard
    /// against a non-conforming implementer under-delivering silently, so
    /// this contract is documentation, not a safety requirement load-bearing
    /// for callers.
    fn fetch_uuids(&self, n: usize) -> Result<Vec<String>>;

    /// `PUT {id}` with `doc` as the JSON body. `doc` must already carry the
    /// `_id` field matching `id`.
    ///
    /// `Err(Conflict)` on HTTP 409; `Err(NetworkError)` on any other
    /// non-201 response or transport failure.
    fn put_doc(&self, id: &str, doc: &Value) -> Result<()>;

    /// `PUT _design/{design}/_update/{name}/{id}` with `body` as the JSON
    /// request.
    ///
    /// `Err(Conflict)` on HTTP 409 (retryable by the caller);
    /// `Err(UnmergeableError)` on any other non-2xx response — this path
    /// never retries on its own.
    fn update_handler(&self, design: &str, name: &str, id: &str, body: &Value) -> Result<()>;

    /// `GET _design/{design}/_view/{name}?{query}`.
    fn view(&self, design: &str, name: &str, query: &str) -> Result<Vec<ViewRow>>;
}

/// Production `DbClient` backed by a blocking HTTP client.
pub struct HttpDbClient {
    client: reqwest::blocking::Client,
    /// Server root, e.g. `http://localhost:5984`. `_uuids` is a server-level
    /// endpoint, not a database one (spec.md §4.1, §9).
    root: String,
    /// `{root}/{couch_db}/`, used for every other operation.
    base: String,
}

impl HttpDbClient {
    /// Build a client rooted at `{couch_uri}/{couch_db}/`. Duplicate slashes
    /// between the two are collapsed (spec.md §9).
    pub fn new(couch_uri: &str, couch_db: &str, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(request_timeout)
            .build()?;
        let root = couch_uri.trim_end_matches('/').to_owned();
        let base = format!("{root}/{}/", couch_db.trim_matches('/'));
        Ok(HttpDbClient { client, root, base })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path.trim_start_matches('/'))
    }
}

impl DbClient for HttpDbClient {
    fn fetch_uuids(&self, n: usize) -> Result<Vec<String>> {
        let url = format!("{}/_uuids?count={n}", self.root);
        let resp = self.client.get(&url).send()?;
        if !resp.status().is_success() {
            return Err(UploaderError::NetworkError(format!(
                "_uuids returned status {}",
                resp.status()
            )));
        }
        #[derive(Deserialize)]
        struct UuidsResponse {
            uuids: Vec<String>,
        }
        let body: UuidsResponse = resp.json()?;
        if body.uuids.len() != n {
            return Err(UploaderError::MalformedResponse(format!(
                "_uuids returned {} ids, expected {n}",
                body.uuids.len()
            )));
        }
        Ok(body.uuids)
    }

    fn put_doc(&self, id: &str, doc: &Value) -> Result<()> {
        let url = self.url(id);
        let resp = self.client.put(&url).json(doc).send()?;
        match resp.status().as_u16() {
            201 => Ok(()),
            409 => Err(UploaderError::Conflict),
            other => Err(UploaderError::NetworkError(format!(
                "PUT {id} returned status {other}"
            ))),
        }
    }

    fn update_handler(&self, design: &str, name: &str, id: &str, body: &Value) -> Result<()> {
        let path = format!("_design/{design}/_update/{name}/{id}");
        let url = self.url(&path);
        let resp = self.client.put(&url).json(body).send()?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        if status.as_u16() == 409 {
            debug!(%id, "update handler reported conflict");
            return Err(UploaderError::Conflict);
        }
        warn!(%id, %status, "update handler rejected submission");
        Err(UploaderError::UnmergeableError(format!(
            "update handler returned status {status}"
        )))
    }

    fn view(&self, design: &str, name: &str, query: &str) -> Result<Vec<ViewRow>> {
        let path = format!("_design/{design}/_view/{name}?{query}");
        let url = self.url(&path);
        let resp = self.client.get(&url).send()?;
        if !resp.status().is_success() {
            return Err(UploaderError::NetworkError(format!(
                "view {design}/{name} returned status {}",
                resp.status()
            )));
        }
        let body: ViewResponseWire = resp.json()?;
        Ok(body.rows)
    }
}
