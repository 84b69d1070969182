//! Uploader configuration (spec.md §6).

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, UploaderError};

const DEFAULT_COUCH_URI: &str = "http://localhost:5984";
const DEFAULT_COUCH_DB: &str = "habitat";
const DEFAULT_MAX_MERGE_ATTEMPTS: u32 = 20;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Configuration recognised at construction / `re_init` (spec.md §6).
#[derive(Debug, Clone)]
pub struct UploaderConfig {
    pub callsign: String,
    pub couch_uri: String,
    pub couch_db: String,
    pub max_merge_attempts: u32,
    /// Per-request HTTP timeout. Ambient: spec.md §5 requires a finite
    /// per-request timeout but leaves it unconfigured; SPEC_FULL.md §4.3
    /// surfaces it here.
    pub request_timeout: Duration,
}

impl UploaderConfig {
    /// Construct with every default except `callsign`, which is required.
    pub fn new(callsign: impl Into<String>) -> Result<Self> {
        let callsign = callsign.into();
        if callsign.is_empty() {
            return Err(UploaderError::InvalidArgument(
                "callsign must not be empty".to_owned(),
            ));
        }
        Ok(UploaderConfig {
            callsign,
            couch_uri: DEFAULT_COUCH_URI.to_owned(),
            couch_db: DEFAULT_COUCH_DB.to_owned(),
            max_merge_attempts: DEFAULT_MAX_MERGE_ATTEMPTS,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        })
    }

    pub fn with_couch_uri(mut self, couch_uri: impl Into<String>) -> Self {
        self.couch_uri = couch_uri.into();
        self
    }

    pub fn with_couch_db(mut self, couch_db: impl Into<String>) -> Self {
        self.couch_db = couch_db.into();
        self
    }

    pub fn with_max_merge_attempts(mut self, max_merge_attempts: u32) -> Self {
        self.max_merge_attempts = max_merge_attempts;
        self
    }

    /// Load from a TOML file, in the same required-field/defaulting style
    /// as `forwarder/src/config.rs` in the ground-station codebase this
    /// crate is extracted from.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            UploaderError::InvalidArgument(format!(
                "reading config file '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(toml_str)
            .map_err(|e| UploaderError::InvalidArgument(format!("parsing config: {e}")))?;
        let callsign = raw
            .callsign
            .ok_or_else(|| UploaderError::InvalidArgument("missing required field: callsign".to_owned()))?;

        let mut config = UploaderConfig::new(callsign)?;
        if let Some(uri) = raw.couch_uri {
            config.couch_uri = uri;
        }
        if let Some(db) = raw.couch_db {
            config.couch_db = db;
        }
        if let Some(attempts) = raw.max_merge_attempts {
            config.max_merge_attempts = attempts;
        }
        if let Some(secs) = raw.request_timeout_secs {
            config.request_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    callsign: Option<String>,
    couch_uri: Option<String>,
    couch_db: Option<String>,
    max_merge_attempts: Option<u32>,
    request_timeout_secs: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = UploaderConfig::new("PROXYCALL").unwrap();
        assert_eq!(config.couch_uri, "http://localhost:5984");
        assert_eq!(config.couch_db, "habitat");
        assert_eq!(config.max_merge_attempts, 20);
    }

    #[test]
    fn rejects_empty_callsign() {
        assert!(UploaderConfig::new("").is_err());
    }

    #[test]
    fn toml_requires_callsign() {
        let err = UploaderConfig::from_toml_str("couch_db = \"habitat\"\n").unwrap_err();
        assert!(matches!(err, UploaderError::InvalidArgument(_)));
    }

    #[test]
    fn from_toml_file_reads_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uploader.toml");
        std::fs::write(&path, "callsign = \"PROXYCALL\"\nrequest_timeout_secs = 5\n").unwrap();

        let config = UploaderConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.callsign, "PROXYCALL");
        assert_eq!(config.request_timeout, std::time::Duration::from_secs(5));
    }

    #[test]
    fn toml_applies_overrides_and_defaults() {
        let config = UploaderConfig::from_toml_str(
            r#"
            callsign = "PROXYCALL"
            couch_db = "other"
            max_merge_attempts = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.callsign, "PROXYCALL");
        assert_eq!(config.couch_db, "other");
        assert_eq!(config.max_merge_attempts, 5);
        assert_eq!(config.couch_uri, "http://localhost:5984");
    }
}
