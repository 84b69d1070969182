//! Identifier pool (spec.md §3, §4.1).

use std::collections::VecDeque;

use tracing::debug;

use crate::db::DbClient;
use crate::error::{Result, UploaderError};

const REFILL_BATCH: usize = 100;

/// Locally cached batch of server-minted document identifiers.
///
/// Never returns the same id twice within its lifetime and preserves the
/// order the server supplied them in (spec.md §3).
#[derive(Debug, Default)]
pub struct IdPool {
    pending: VecDeque<String>,
}

impl IdPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the next id, refilling from the database in batches of 100
    /// when the pool is empty.
    ///
    /// `DbClient::fetch_uuids` is contracted to return exactly the requested
    /// count or fail, but that contract isn't enforced by the trait itself —
    /// an implementer (including test fakes) could return fewer ids without
    /// erroring. This is handled as a typed error rather than relied upon,
    /// so no conforming-or-not implementation can panic here.
    pub fn next_id(&mut self, db: &dyn DbClient) -> Result<String> {
        if self.pending.is_empty() {
            debug!(count = REFILL_BATCH, "refilling id pool");
            let fresh = db.fetch_uuids(REFILL_BATCH)?;
            self.pending.extend(fresh);
        }
        self.pending.pop_front().ok_or_else(|| {
            UploaderError::MalformedResponse("id pool empty after refill".to_owned())
        })
    }
}
