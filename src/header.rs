//! The persistent log prelude.
//!
//! The header is the first record in the log file. Its element order is fixed:
//! `"RAFTLOG"`, version, dbid, snapshot_last_term, snapshot_last_idx, term, vote. Every numeric
//! field (aside from `dbid` itself) is written at a fixed, zero-padded width so the header's byte
//! length never changes -- that invariant is what lets [`crate::durable_log::DurableLog::set_vote`]
//! and [`crate::durable_log::DurableLog::set_term`] rewrite it in place without touching anything
//! that follows it in the file.

use snafu::ResultExt;

use crate::error::{DurableLogError, FramingSnafu, InvalidDbidSnafu};
use crate::framing::{self, ReadOutcome};

/// Magic tag identifying a raftlog file.
pub const MAGIC: &[u8] = b"RAFTLOG";

/// The only format version this crate writes or reads. The spec treats format
/// backward-compatibility as a non-goal, so there is intentionally no migration path here.
pub const VERSION: u32 = 1;

/// Maximum length, in bytes, of a [`LogHeader::dbid`] value.
pub const DBID_LEN: usize = 64;

const VERSION_WIDTH: usize = 4;
const TERM_IDX_WIDTH: usize = 20;
const VOTE_WIDTH: usize = 11;

/// The persistent log prelude (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogHeader {
    pub dbid: String,
    pub snapshot_last_term: u64,
    pub snapshot_last_idx: u64,
    pub term: u64,
    pub vote: i64,
}

impl LogHeader {
    /// Builds the bootstrap header written by `DurableLog::create`: `term=1`, `vote=-1`.
    pub fn bootstrap(dbid: &str, snapshot_last_term: u64, snapshot_last_idx: u64) -> Self {
        Self {
            dbid: dbid.to_string(),
            snapshot_last_term,
            snapshot_last_idx,
            term: 1,
            vote: -1,
        }
    }

    pub fn encode(&self) -> Vec<Vec<u8>> {
        vec![
            MAGIC.to_vec(),
            framing::encode_fixed_width(VERSION as i64, VERSION_WIDTH),
            self.dbid.clone().into_bytes(),
            framing::encode_fixed_width(self.snapshot_last_term as i64, TERM_IDX_WIDTH),
            framing::encode_fixed_width(self.snapshot_last_idx as i64, TERM_IDX_WIDTH),
            framing::encode_fixed_width(self.term as i64, TERM_IDX_WIDTH),
            framing::encode_fixed_width(self.vote, VOTE_WIDTH),
        ]
    }

    pub fn decode(elements: &[Vec<u8>]) -> Result<Self, DurableLogError> {
        if elements.len() != 7 {
            return Err(DurableLogError::MalformedHeader {
                reason: format!("expected 7 header elements, found {}", elements.len()),
            });
        }
        if elements[0] != MAGIC {
            return Err(DurableLogError::MalformedHeader {
                reason: "bad magic tag".to_string(),
            });
        }
        let version = framing::decode_u64(&elements[1]).context(FramingSnafu)?;
        if version != VERSION as u64 {
            return Err(DurableLogError::MalformedHeader {
                reason: format!("unsupported format version {}", version),
            });
        }
        let dbid = String::from_utf8(elements[2].clone()).context(InvalidDbidSnafu)?;
        let snapshot_last_term = framing::decode_u64(&elements[3]).context(FramingSnafu)?;
        let snapshot_last_idx = framing::decode_u64(&elements[4]).context(FramingSnafu)?;
        let term = framing::decode_u64(&elements[5]).context(FramingSnafu)?;
        let vote = framing::decode_i64(&elements[6]).context(FramingSnafu)?;

        Ok(Self {
            dbid,
            snapshot_last_term,
            snapshot_last_idx,
            term,
            vote,
        })
    }
}

/// Reads a [`LogHeader`] from the very start of a record stream.
pub fn read_header<R: std::io::BufRead>(reader: R) -> Result<LogHeader, DurableLogError> {
    match framing::read_record(reader).context(FramingSnafu)? {
        ReadOutcome::Record(elements) => LogHeader::decode(&elements),
        ReadOutcome::Empty => Err(DurableLogError::MalformedHeader {
            reason: "header record was empty".to_string(),
        }),
        ReadOutcome::Eof => Err(DurableLogError::MalformedHeader {
            reason: "file ended before a header could be read".to_string(),
        }),
    }
}

/// Writes a [`LogHeader`] and returns the number of bytes written -- callers rely on this being
/// stable across rewrites of the same header so they can assert the log's byte size is unchanged
/// by `set_vote`/`set_term` (spec §8, scenario S6).
pub fn write_header<W: std::io::Write>(writer: W, header: &LogHeader) -> Result<u64, DurableLogError> {
    let elements = header.encode();
    let refs: Vec<&[u8]> = elements.iter().map(|e| e.as_slice()).collect();
    framing::write_record(writer, &refs).context(FramingSnafu)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn header_round_trips() {
        let header = LogHeader::bootstrap("db0", 5, 100);
        let mut buf = Vec::new();
        let written = write_header(&mut buf, &header).unwrap();
        assert_eq!(written as usize, buf.len());

        let decoded = read_header(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn rewritten_header_has_identical_byte_length() {
        let mut header = LogHeader::bootstrap("db0", 5, 100);
        let mut first = Vec::new();
        write_header(&mut first, &header).unwrap();

        header.vote = 7;
        let mut second = Vec::new();
        write_header(&mut second, &header).unwrap();

        assert_eq!(first.len(), second.len());
    }

    #[test]
    fn rejects_bad_magic() {
        let elements = vec![
            b"NOTLOG".to_vec(),
            framing::encode_fixed_width(1, VERSION_WIDTH),
            b"db0".to_vec(),
            framing::encode_fixed_width(0, TERM_IDX_WIDTH),
            framing::encode_fixed_width(0, TERM_IDX_WIDTH),
            framing::encode_fixed_width(1, TERM_IDX_WIDTH),
            framing::encode_fixed_width(-1, VOTE_WIDTH),
        ];
        let err = LogHeader::decode(&elements).unwrap_err();
        assert!(matches!(err, DurableLogError::MalformedHeader { .. }));
    }
}
