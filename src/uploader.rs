//! Uploader core — the synchronous variant (spec.md §4.4–§4.6).

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::config::UploaderConfig;
use crate::db::{DbClient, HttpDbClient};
use crate::error::{Result, UploaderError};
use crate::id::IdPool;
use crate::join;
use crate::model::{self, ListenerKind};
use crate::time::{Clock, SystemClock};

/// Builds the `DbClient` a session should talk to, so `re_init` can swap
/// both session parameters and transport together (mirrors the
/// `Checker`/`RealChecker` adapter seam this codebase uses for its update
/// workflow).
pub trait DbClientFactory: Send + Sync {
    fn build(&self, config: &UploaderConfig) -> Result<Box<dyn DbClient>>;
}

/// The production factory: builds a real HTTP-backed client.
#[derive(Debug, Default)]
pub struct HttpDbClientFactory;

impl DbClientFactory for HttpDbClientFactory {
    fn build(&self, config: &UploaderConfig) -> Result<Box<dyn DbClient>> {
        Ok(Box::new(HttpDbClient::new(
            &config.couch_uri,
            &config.couch_db,
            config.request_timeout,
        )?))
    }
}

struct SessionState {
    callsign: String,
    max_merge_attempts: u32,
    id_pool: IdPool,
    latest_listener_telemetry: Option<String>,
    latest_listener_information: Option<String>,
}

/// Orchestrates identifier allocation, timestamping, the payload-telemetry
/// merge loop, listener-doc tracking, and view joining (spec.md §2.4).
///
/// Every operation fails with [`UploaderError::NotInitialised`] until
/// `re_init` has been called at least once.
pub struct Uploader {
    factory: Box<dyn DbClientFactory>,
    clock: Box<dyn Clock>,
    db: Option<Box<dyn DbClient>>,
    state: Option<SessionState>,
}

impl Uploader {
    /// Construct and immediately initialise with `config`, using the real
    /// HTTP-backed database client and the system clock.
    pub fn new(config: UploaderConfig) -> Result<Self> {
        let mut uploader = Uploader::uninitialised(Box::new(HttpDbClientFactory), Box::new(SystemClock));
        uploader.re_init(config)?;
        Ok(uploader)
    }

    /// Construct without initialising, injecting a custom database-client
    /// factory and clock. Used by tests and by [`crate::queue::ThreadedUploader`].
    pub fn uninitialised(factory: Box<dyn DbClientFactory>, clock: Box<dyn Clock>) -> Self {
        Uploader {
            factory,
            clock,
            db: None,
            state: None,
        }
    }

    /// Atomically swap session parameters (and the database client they
    /// imply) for all subsequent requests (spec.md §4.7).
    pub fn re_init(&mut self, config: UploaderConfig) -> Result<()> {
        let db = self.factory.build(&config)?;
        self.db = Some(db);
        self.state = Some(SessionState {
            callsign: config.callsign,
            max_merge_attempts: config.max_merge_attempts,
            id_pool: IdPool::new(),
            latest_listener_telemetry: None,
            latest_listener_information: None,
        });
        Ok(())
    }

    /// Clear session state; subsequent operations fail with `NotInitialised`
    /// until `re_init` is called again (spec.md §4.7).
    pub fn reset(&mut self) {
        self.db = None;
        self.state = None;
    }

    /// Upload a `listener_telemetry` document (spec.md §4.4).
    pub fn listener_telemetry(
        &mut self,
        data: Map<String, Value>,
        time_created: Option<i64>,
    ) -> Result<String> {
        self.upload_listener_doc(ListenerKind::Telemetry, data, time_created)
    }

    /// Upload a `listener_information` document (spec.md §4.4).
    pub fn listener_information(
        &mut self,
        data: Map<String, Value>,
        time_created: Option<i64>,
    ) -> Result<String> {
        self.upload_listener_doc(ListenerKind::Information, data, time_created)
    }

    fn upload_listener_doc(
        &mut self,
        kind: ListenerKind,
        data: Map<String, Value>,
        time_created: Option<i64>,
    ) -> Result<String> {
        let now = self.clock.now();
        let db = self.db.as_deref().ok_or(UploaderError::NotInitialised)?;
        let state = self.state.as_mut().ok_or(UploaderError::NotInitialised)?;
        let id = state.id_pool.next_id(db)?;
        let doc = model::build_listener_doc(kind, id.clone(), &state.callsign, data, time_created, now);

        match db.put_doc(&id, &doc) {
            Ok(()) => {
                match kind {
                    ListenerKind::Telemetry => state.latest_listener_telemetry = Some(id.clone()),
                    ListenerKind::Information => {
                        state.latest_listener_information = Some(id.clone());
                    }
                }
                info!(%id, ?kind, "listener document uploaded");
                Ok(id)
            }
            Err(UploaderError::Conflict) => {
                // A freshly minted id should never collide; treat it as a
                // hard failure rather than retrying (spec.md §4.4).
                Err(UploaderError::UnmergeableError(
                    "unexpected conflict on freshly minted id".to_owned(),
                ))
            }
            Err(e) => Err(e),
        }
    }

    /// Run the payload-telemetry merge loop (spec.md §4.5).
    pub fn payload_telemetry(
        &mut self,
        raw: &[u8],
        metadata: Map<String, Value>,
        time_created: Option<i64>,
    ) -> Result<String> {
        let now0 = self.clock.now();
        let time_created = time_created.unwrap_or(now0);
        let clock = self.clock.as_ref();
        let db = self.db.as_deref().ok_or(UploaderError::NotInitialised)?;
        let state = self.state.as_mut().ok_or(UploaderError::NotInitialised)?;

        let (id, mut proto) = model::build_proto_ptlm(
            raw,
            metadata,
            &state.callsign,
            time_created,
            now0,
            state.latest_listener_telemetry.as_deref(),
            state.latest_listener_information.as_deref(),
        )?;

        let max_attempts = state.max_merge_attempts;
        let callsign = state.callsign.clone();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match db.update_handler("payload_telemetry", "add_listener", &id, &proto) {
                Ok(()) => {
                    info!(%id, attempts, "payload telemetry merged");
                    return Ok(id);
                }
                Err(UploaderError::Conflict) => {
                    if attempts >= max_attempts {
                        warn!(%id, attempts, "payload telemetry merge exhausted retry budget");
                        return Err(UploaderError::UnmergeableError(format!(
                            "exceeded {max_attempts} merge attempts"
                        )));
                    }
                    let now = clock.now();
                    model::restamp_time_uploaded(&mut proto, &callsign, now);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Join flights with their referenced payload-configuration documents
    /// (spec.md §4.6).
    pub fn flights(&mut self) -> Result<Vec<Value>> {
        let now = self.clock.now();
        let db = self.db.as_deref().ok_or(UploaderError::NotInitialised)?;
        join::flights(db, now)
    }

    /// Return every payload-configuration document (spec.md §4.6).
    pub fn payloads(&mut self) -> Result<Vec<Value>> {
        let db = self.db.as_deref().ok_or(UploaderError::NotInitialised)?;
        join::payloads(db)
    }
}
