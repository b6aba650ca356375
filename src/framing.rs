//! Length-prefixed, line-framed record encoding.
//!
//! Every record on disk -- the header and each entry -- is framed the same way:
//!
//! ```text
//! *<N>\r\n
//! $<L1>\r\n<bytes1>\r\n
//! ...
//! $<LN>\r\n<bytesN>\r\n
//! ```
//!
//! `N` is the element count of the record and each element is a length-prefixed byte string.
//! Numeric fields inside elements are serialized as decimal ASCII; header fields use fixed
//! zero-padded widths so the header can be rewritten in place without changing its byte length
//! (see [`crate::header`]).

use std::io::{self, BufRead, Read, Write};

use crate::error::FramingError;

const CRLF: &[u8] = b"\r\n";

/// Writes a complete array-framed record: the array header followed by each element as a bulk
/// string. Does not flush -- callers control their own flush/fsync policy (see
/// [`crate::durable_log::DurableLog::sync`]).
pub fn write_record<W: Write>(mut writer: W, elements: &[&[u8]]) -> Result<u64, FramingError> {
    let mut written: u64 = 0;
    written += write_array_header(&mut writer, elements.len())?;
    for element in elements {
        written += write_bulk_string(&mut writer, element)?;
    }
    Ok(written)
}

fn write_array_header<W: Write>(mut writer: W, count: usize) -> Result<u64, FramingError> {
    let line = format!("*{}\r\n", count);
    writer.write_all(line.as_bytes())?;
    Ok(line.len() as u64)
}

fn write_bulk_string<W: Write>(mut writer: W, bytes: &[u8]) -> Result<u64, FramingError> {
    let header = format!("${}\r\n", bytes.len());
    writer.write_all(header.as_bytes())?;
    writer.write_all(bytes)?;
    writer.write_all(CRLF)?;
    Ok(header.len() as u64 + bytes.len() as u64 + CRLF.len() as u64)
}

/// Result of attempting to read one framed record.
pub enum ReadOutcome {
    /// A record with at least one element was read successfully.
    Record(Vec<Vec<u8>>),
    /// A well-formed zero-element array was read (`*0\r\n`); callers treat this as a clean EOF
    /// marker rather than a framing error.
    Empty,
    /// The stream had no more bytes at the point a record was expected; a clean EOF.
    Eof,
}

/// Reads one array-framed record from `reader`.
///
/// Returns [`ReadOutcome::Eof`] if the stream ends before any bytes of a new record are read, so
/// callers can distinguish "nothing more to read" from a mid-record truncation, which is a
/// [`FramingError::Truncated`].
pub fn read_record<R: BufRead>(mut reader: R) -> Result<ReadOutcome, FramingError> {
    let line = match read_line(&mut reader)? {
        Some(line) => line,
        None => return Ok(ReadOutcome::Eof),
    };
    let count = parse_typed_length(&line, '*')?;
    if count == 0 {
        return Ok(ReadOutcome::Empty);
    }

    let mut elements = Vec::with_capacity(count);
    for _ in 0..count {
        elements.push(read_bulk_string(&mut reader)?);
    }
    Ok(ReadOutcome::Record(elements))
}

fn read_bulk_string<R: BufRead>(mut reader: R) -> Result<Vec<u8>, FramingError> {
    let line = read_line(&mut reader)?.ok_or(FramingError::Truncated { remaining: 0 })?;
    let len = parse_typed_length(&line, '$')?;

    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .map_err(|e| truncated_or_io(e, len))?;

    let mut terminator = [0u8; 2];
    reader
        .read_exact(&mut terminator)
        .map_err(|e| truncated_or_io(e, 2))?;
    if terminator != *CRLF {
        return Err(FramingError::MissingTerminator);
    }

    Ok(payload)
}

fn truncated_or_io(err: io::Error, remaining: usize) -> FramingError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        FramingError::Truncated { remaining }
    } else {
        FramingError::Io { source: err }
    }
}

/// Reads one line terminated by `\r\n`, stripping the terminator. Returns `None` if the stream
/// had zero bytes available (clean EOF before the line even starts).
fn read_line<R: BufRead>(reader: &mut R) -> Result<Option<String>, FramingError> {
    let mut buf = Vec::new();
    let n = reader.read_until(b'\n', &mut buf)?;
    if n == 0 {
        return Ok(None);
    }
    if !buf.ends_with(b"\n") {
        return Err(FramingError::Truncated { remaining: 1 });
    }
    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    } else {
        return Err(FramingError::MissingTerminator);
    }
    String::from_utf8(buf)
        .map_err(|e| FramingError::MalformedLength { reason: e.to_string() })
        .map(Some)
}

fn parse_typed_length(line: &str, expected: char) -> Result<usize, FramingError> {
    let mut chars = line.chars();
    let found = chars.next().ok_or(FramingError::MissingTerminator)?;
    if found != expected {
        return Err(FramingError::UnexpectedType { expected, found });
    }
    chars
        .as_str()
        .parse::<usize>()
        .map_err(|e| FramingError::MalformedLength { reason: e.to_string() })
}

/// A [`BufRead`] wrapper that tracks the number of bytes logically consumed from the stream.
///
/// `load_entries` needs to know, for each record it scans, the exact byte offset at which that
/// record began -- that offset is what gets written back into the offset index. A plain
/// `BufReader` advances the underlying file's physical cursor by however much it read ahead into
/// its internal buffer, which is not the same as how many bytes the caller has logically consumed.
/// Wrapping the reader lets the scan track logical position without caring how much read-ahead
/// happened underneath.
pub struct CountingReader<R> {
    inner: R,
    pub count: u64,
}

impl<R> CountingReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, count: 0 }
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

impl<R: BufRead> BufRead for CountingReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.inner.consume(amt);
        self.count += amt as u64;
    }
}

/// Serializes a non-negative integer as an unpadded decimal string, for non-header record fields.
pub fn encode_int(value: u64) -> Vec<u8> {
    value.to_string().into_bytes()
}

/// Parses a decimal byte string into a `u64`, requiring the entire slice to be consumed with no
/// trailing garbage.
pub fn decode_u64(bytes: &[u8]) -> Result<u64, FramingError> {
    let s = std::str::from_utf8(bytes)
        .map_err(|e| FramingError::MalformedLength { reason: e.to_string() })?;
    s.parse::<u64>()
        .map_err(|e| FramingError::MalformedLength { reason: e.to_string() })
}

/// Parses a decimal byte string into a `i64`, requiring the entire slice to be consumed with no
/// trailing garbage. Used for `kind`/`id` style fields that are conceptually non-negative but
/// stored signed-width in the source format, and for `vote`, which is genuinely signed.
pub fn decode_i64(bytes: &[u8]) -> Result<i64, FramingError> {
    let s = std::str::from_utf8(bytes)
        .map_err(|e| FramingError::MalformedLength { reason: e.to_string() })?;
    s.parse::<i64>()
        .map_err(|e| FramingError::MalformedLength { reason: e.to_string() })
}

/// Formats `value` as a fixed-width, zero-padded (for non-negative) decimal string of exactly
/// `width` bytes. Used only for header fields, whose on-disk byte width must never change so the
/// header can be rewritten in place (see [`crate::header`]).
pub fn encode_fixed_width(value: i64, width: usize) -> Vec<u8> {
    let s = format!("{:01$}", value, width);
    assert_eq!(s.len(), width, "fixed-width field overflowed its configured width");
    s.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_record() {
        let mut buf = Vec::new();
        write_record(&mut buf, &[b"ENTRY", b"5", b"1", b"0", b"a"]).unwrap();

        let mut cursor = io::Cursor::new(buf);
        match read_record(&mut cursor).unwrap() {
            ReadOutcome::Record(elements) => {
                assert_eq!(elements, vec![
                    b"ENTRY".to_vec(),
                    b"5".to_vec(),
                    b"1".to_vec(),
                    b"0".to_vec(),
                    b"a".to_vec(),
                ]);
            }
            _ => panic!("expected a record"),
        }
    }

    #[test]
    fn empty_array_is_reported_distinctly() {
        let mut cursor = io::Cursor::new(b"*0\r\n".to_vec());
        match read_record(&mut cursor).unwrap() {
            ReadOutcome::Empty => {}
            _ => panic!("expected an empty record"),
        }
    }

    #[test]
    fn eof_before_any_bytes_is_reported_distinctly() {
        let mut cursor = io::Cursor::new(Vec::new());
        match read_record(&mut cursor).unwrap() {
            ReadOutcome::Eof => {}
            _ => panic!("expected eof"),
        }
    }

    #[test]
    fn truncated_payload_is_a_framing_error() {
        let mut cursor = io::Cursor::new(b"*1\r\n$5\r\nab".to_vec());
        let err = read_record(&mut cursor).unwrap_err();
        assert!(matches!(err, FramingError::Truncated { .. }));
    }

    #[test]
    fn wrong_type_byte_is_a_framing_error() {
        let mut cursor = io::Cursor::new(b"$1\r\n".to_vec());
        let err = read_record(&mut cursor).unwrap_err();
        assert!(matches!(err, FramingError::UnexpectedType { .. }));
    }

    #[test]
    fn fixed_width_round_trips() {
        let encoded = encode_fixed_width(42, 20);
        assert_eq!(encoded.len(), 20);
        assert_eq!(decode_u64(&encoded).unwrap(), 42);

        let encoded = encode_fixed_width(-1, 11);
        assert_eq!(encoded.len(), 11);
        assert_eq!(decode_i64(&encoded).unwrap(), -1);
    }
}
