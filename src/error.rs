//! Per-layer error types.
//!
//! Each layer of the subsystem (framing, the durable log, the entry cache, the engine adapter)
//! defines its own error enum rather than sharing one catch-all type, so that callers matching on
//! a specific layer's errors don't have to reason about variants that layer can never produce.

use std::io;

use snafu::Snafu;

/// Errors that can occur while encoding or decoding a framed record.
#[derive(Debug, Snafu)]
pub enum FramingError {
    /// The line preceding a record did not start with the expected type byte (`*` or `$`).
    #[snafu(display("expected type byte '{}', found '{}'", expected, found))]
    UnexpectedType { expected: char, found: char },

    /// A length or count field could not be parsed as an unsigned decimal.
    #[snafu(display("malformed length field: {}", reason))]
    MalformedLength { reason: String },

    /// The stream ended before a complete record could be read.
    #[snafu(display("truncated record: expected {} more bytes", remaining))]
    Truncated { remaining: usize },

    /// The trailing CRLF after a payload or header line was missing or incorrect.
    #[snafu(display("missing or malformed CRLF terminator"))]
    MissingTerminator,

    /// An underlying I/O error occurred while reading or writing a record.
    #[snafu(display("framing I/O error: {}", source))]
    Io { source: io::Error },
}

impl From<io::Error> for FramingError {
    fn from(source: io::Error) -> Self {
        FramingError::Io { source }
    }
}

/// Errors surfaced by [`crate::durable_log::DurableLog`] operations.
#[derive(Debug, Snafu)]
pub enum DurableLogError {
    /// A general I/O error occurred opening, reading, writing, seeking, or syncing a log file.
    #[snafu(display("durable log I/O error: {}", source))]
    Io { source: io::Error },

    /// A record read back from the log file did not decode as a well-formed frame.
    #[snafu(display("framing error while reading log: {}", source))]
    Framing { source: FramingError },

    /// The header's `dbid` field was not valid UTF-8.
    #[snafu(display("dbid was not valid UTF-8: {}", source))]
    InvalidDbid { source: std::string::FromUtf8Error },

    /// The header record was structurally invalid (wrong magic, wrong element count, bad field).
    #[snafu(display("malformed log header: {}", reason))]
    MalformedHeader { reason: String },

    /// An `ENTRY` record did not have exactly five elements, or its type tag was not `ENTRY`.
    #[snafu(display("malformed entry record at index {}: {}", idx, reason))]
    MalformedEntry { idx: u64, reason: String },

    /// A numeric field inside an otherwise well-shaped `ENTRY` record did not decode as a
    /// well-formed frame element.
    #[snafu(display("malformed field in entry at index {}: {}", idx, source))]
    MalformedEntryField { idx: u64, source: FramingError },

    /// `get` or `delete_suffix` was called with an index outside the live range of the log.
    #[snafu(display("index {} is out of range (first={}, current={})", idx, first, current))]
    OutOfRange { idx: u64, first: u64, current: u64 },
}

impl From<io::Error> for DurableLogError {
    fn from(source: io::Error) -> Self {
        DurableLogError::Io { source }
    }
}

/// Errors surfaced by [`crate::cache::EntryCache`] operations.
#[derive(Debug, Snafu)]
pub enum CacheError {
    /// `append` was called with an index that does not immediately follow the cache's current
    /// logical tail; this is a caller bug, not a recoverable condition.
    #[snafu(display(
        "non-contiguous cache append: start_idx={} + len={} != idx={}",
        start_idx,
        len,
        idx
    ))]
    NonContiguousAppend { start_idx: u64, len: usize, idx: u64 },

    /// `delete_head`/`delete_tail` was called with an index outside the cache's live range.
    #[snafu(display("index {} is out of the cache's live range", idx))]
    OutOfRange { idx: u64 },
}

/// Errors surfaced by the engine adapter (§4.4).
#[derive(Debug, Snafu)]
pub enum EngineError {
    /// The durable log rejected an operation.
    #[snafu(display("durable log error: {}", source))]
    DurableLog { source: DurableLogError },

    /// The entry cache rejected an operation.
    #[snafu(display("cache error: {}", source))]
    Cache { source: CacheError },

    /// The supplied `dbid` exceeded the maximum allowed length.
    #[snafu(display("dbid of {} bytes exceeds the maximum of {} bytes", len, max))]
    DbidTooLong { len: usize, max: usize },
}

impl From<DurableLogError> for EngineError {
    fn from(source: DurableLogError) -> Self {
        EngineError::DurableLog { source }
    }
}

impl From<CacheError> for EngineError {
    fn from(source: CacheError) -> Self {
        EngineError::Cache { source }
    }
}
