//! The loadable configuration surface (spec §6, §10.3).
//!
//! `Config` is deliberately `serde`-deserializable on its own, independent of validation: a host
//! process embeds it in its own configuration document (alongside settings this subsystem knows
//! nothing about), and only constructs a [`Config`] value -- via [`Config::new`] or
//! [`Config::try_from`] -- once it is ready to validate `dbid` against [`crate::header::DBID_LEN`].

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::header::DBID_LEN;

/// Runtime configuration recognized by this subsystem (spec §6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// When `true`, [`crate::durable_log::DurableLog::sync`] flushes buffers but does not fsync.
    /// Intended for tests and relaxed-durability deployments, not production use.
    #[serde(default)]
    pub no_fsync: bool,
    /// The database identity string written into the log header. Must not exceed
    /// [`DBID_LEN`] bytes.
    pub dbid: String,
}

impl Config {
    /// Validates `dbid` and constructs a [`Config`]. Deserialization alone does not validate --
    /// callers that build a `Config` by hand (as opposed to loading one from a host document)
    /// should go through this constructor, or [`std::convert::TryFrom`], rather than the bare
    /// struct literal.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DbidTooLong`] if `dbid` exceeds [`DBID_LEN`] bytes.
    pub fn new(dbid: impl Into<String>, no_fsync: bool) -> Result<Self, EngineError> {
        let dbid = dbid.into();
        if dbid.len() > DBID_LEN {
            return Err(EngineError::DbidTooLong { len: dbid.len(), max: DBID_LEN });
        }
        Ok(Self { dbid, no_fsync })
    }

    /// Re-validates an already-constructed (e.g. deserialized) `Config`. Useful after loading one
    /// from a host document, where [`Config::new`]'s constructor was bypassed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DbidTooLong`] if `self.dbid` exceeds [`DBID_LEN`] bytes.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.dbid.len() > DBID_LEN {
            return Err(EngineError::DbidTooLong { len: self.dbid.len(), max: DBID_LEN });
        }
        Ok(())
    }
}

impl TryFrom<RawConfig> for Config {
    type Error = EngineError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        Config::new(raw.dbid, raw.no_fsync)
    }
}

/// The wire shape of [`Config`] as deserialized from a host document, before validation. Exists
/// so a malformed `dbid` surfaces as an [`EngineError`] at the point a host actually tries to use
/// the value, rather than failing deserialization itself with a `serde`-flavored error that hides
/// which invariant was violated.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    pub no_fsync: bool,
    pub dbid: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_a_dbid_within_the_limit() {
        let config = Config::new("db0", true).unwrap();
        assert_eq!(config.dbid, "db0");
        assert!(config.no_fsync);
    }

    #[test]
    fn rejects_an_oversized_dbid() {
        let oversized = "x".repeat(DBID_LEN + 1);
        let err = Config::new(oversized, false).unwrap_err();
        assert!(matches!(err, EngineError::DbidTooLong { .. }));
    }

    #[test]
    fn deserializes_from_a_host_document() {
        let raw: RawConfig = serde_json::from_str(r#"{"dbid":"db0","no_fsync":true}"#).unwrap();
        let config = Config::try_from(raw).unwrap();
        assert_eq!(config.dbid, "db0");
        assert!(config.no_fsync);
    }

    #[test]
    fn no_fsync_defaults_to_false_when_absent() {
        let raw: RawConfig = serde_json::from_str(r#"{"dbid":"db0"}"#).unwrap();
        assert!(!raw.no_fsync);
    }
}
