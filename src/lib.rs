//! A durable, append-only, offset-indexed replicated log, plus a bounded in-memory ring cache
//! that serves recent lookups without touching disk.
//!
//! This crate is the persistence layer a consensus engine builds on top of: it knows nothing
//! about leader election, commitment, or state machine application. It owns exactly the log file
//! format ([`framing`], [`header`]), the durable log itself ([`durable_log`]), the in-memory
//! front ([`cache`]), and the operation table ([`engine`]) an external consensus engine drives
//! through a single opaque handle.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

#[macro_use]
extern crate tracing;

pub mod cache;
pub mod config;
pub mod durable_log;
pub mod engine;
pub mod entry;
pub mod error;
pub mod framing;
pub mod header;

#[cfg(test)]
mod test_support;

pub use cache::{EntryCache, INIT_SIZE};
pub use config::Config;
pub use durable_log::DurableLog;
pub use engine::LogHandle;
pub use entry::{EntryLifecycle, LogEntry, LogIndex, NoopLifecycle};
pub use error::{CacheError, DurableLogError, EngineError, FramingError};
pub use header::{LogHeader, DBID_LEN};
