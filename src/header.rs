//! RFC5322 header line reader: unfolding, field split, continuation (C3)
//!
//! Grounded on `examples/original_source/headers.c`'s line-reading loop:
//! lines beginning with space/tab are concatenated to the previous line
//! with the intervening CRLF collapsed to a single space. Stops at the
//! empty line ending the header block, or at EOF.

use std::io::BufRead;

use crate::errors::{CoreError, CoreResult};

/// One logical (unfolded) header line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderLine {
    /// A `name: value` field. `name` preserves the source's original case;
    /// `value` has leading/trailing whitespace trimmed, continuation
    /// whitespace already collapsed to single spaces.
    Field { name: String, value: String },
    /// A non-empty line without a colon — forwarded unmodified so the
    /// envelope parser can apply the "From " mbox-separator heuristic.
    Unterminated(String),
}

/// Read one logical header field, performing RFC5322 unfolding.
///
/// Returns `Ok(None)` at the header/body boundary: an empty line, or EOF
/// with nothing read. The input buffer is grown as needed by the
/// underlying `BufRead`.
pub fn read_header_line<R: BufRead>(reader: &mut R) -> CoreResult<Option<HeaderLine>> {
    let mut raw = String::new();
    if read_raw_line(reader, &mut raw)? == 0 {
        return Ok(None);
    }
    if raw.is_empty() {
        return Ok(None);
    }

    // Unfold: consume continuation lines (starting with space/tab).
    loop {
        let is_continuation = matches!(peek_byte(reader)?, Some(b' ') | Some(b'\t'));
        if !is_continuation {
            break;
        }
        let mut cont = String::new();
        if read_raw_line(reader, &mut cont)? == 0 {
            break;
        }
        raw.push(' ');
        raw.push_str(cont.trim_start_matches([' ', '\t']));
    }

    match raw.split_once(':') {
        Some((name, value)) => Ok(Some(HeaderLine::Field {
            name: name.to_owned(),
            value: value.trim().to_owned(),
        })),
        None => Ok(Some(HeaderLine::Unterminated(raw))),
    }
}

/// Read a single physical line, stripping the trailing CRLF/LF. Returns the
/// number of bytes consumed (0 at EOF).
fn read_raw_line<R: BufRead>(reader: &mut R, out: &mut String) -> CoreResult<usize> {
    let mut buf = Vec::new();
    let n = reader
        .read_until(b'\n', &mut buf)
        .map_err(|e| CoreError::Parse(format!("header read failed: {e}")))?;
    if n == 0 {
        return Ok(0);
    }
    while matches!(buf.last(), Some(b'\n') | Some(b'\r')) {
        buf.pop();
    }
    out.push_str(&String::from_utf8_lossy(&buf));
    Ok(n)
}

/// Peek at the next byte without consuming it, for continuation detection
fn peek_byte<R: BufRead>(reader: &mut R) -> CoreResult<Option<u8>> {
    let buf = reader
        .fill_buf()
        .map_err(|e| CoreError::Parse(format!("header peek failed: {e}")))?;
    Ok(buf.first().copied())
}

/// Read all header lines up to the header/body boundary
pub fn read_all_headers<R: BufRead>(reader: &mut R) -> CoreResult<Vec<HeaderLine>> {
    let mut lines = Vec::new();
    while let Some(line) = read_header_line(reader)? {
        lines.push(line);
    }
    Ok(lines)
}

/// Read all header lines, also returning the number of bytes consumed
/// (the header block plus the terminating blank line). Callers that hand
/// the same stream on to [`crate::mime::parse_mime_from_lines`] pass this
/// back so the MIME parser's first `offset` lines up with where the body
/// actually starts, rather than restarting from zero.
pub fn read_all_headers_with_len<R: BufRead>(reader: &mut R) -> CoreResult<(Vec<HeaderLine>, u64)> {
    let mut counted = CountingReader::new(reader);
    let lines = read_all_headers(&mut counted)?;
    Ok((lines, counted.position))
}

/// Wraps a reader to track total bytes consumed through it, via either
/// `Read::read` or `BufRead::consume`.
struct CountingReader<R> {
    inner: R,
    position: u64,
}

impl<R> CountingReader<R> {
    fn new(inner: R) -> Self {
        Self { inner, position: 0 }
    }
}

impl<R: std::io::Read> std::io::Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl<R: BufRead> BufRead for CountingReader<R> {
    fn fill_buf(&mut self) -> std::io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.inner.consume(amt);
        self.position += amt as u64;
    }
}

/// Heuristic mbox "From " separator detection, used by the envelope parser
/// when a header-less line is encountered at the top of a message.
pub fn is_mbox_from_line(line: &str) -> bool {
    line.starts_with("From ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn unfolds_continuation_lines() {
        let raw = b"Subject: line one\r\n line two\r\n\tline three\r\n\r\nbody".to_vec();
        let mut cursor = Cursor::new(raw);
        let line = read_header_line(&mut cursor).unwrap().unwrap();
        match line {
            HeaderLine::Field { name, value } => {
                assert_eq!(name, "Subject");
                assert_eq!(value, "line one line two line three");
            }
            other => panic!("expected field, got {other:?}"),
        }
    }

    #[test]
    fn stops_at_empty_line() {
        let raw = b"Subject: hi\r\n\r\nbody".to_vec();
        let mut cursor = Cursor::new(raw);
        let _ = read_header_line(&mut cursor).unwrap();
        let next = read_header_line(&mut cursor).unwrap();
        assert!(next.is_none());
    }

    #[test]
    fn preserves_field_name_case_trims_value_whitespace() {
        let raw = b"X-Custom-Header:   value with spaces   \r\n\r\n".to_vec();
        let mut cursor = Cursor::new(raw);
        let line = read_header_line(&mut cursor).unwrap().unwrap();
        match line {
            HeaderLine::Field { name, value } => {
                assert_eq!(name, "X-Custom-Header");
                assert_eq!(value, "value with spaces");
            }
            other => panic!("expected field, got {other:?}"),
        }
    }

    #[test]
    fn returns_unterminated_line_without_colon() {
        let raw = b"From user@example.com Mon Jan  1 00:00:00 2026\r\n\r\n".to_vec();
        let mut cursor = Cursor::new(raw);
        let line = read_header_line(&mut cursor).unwrap().unwrap();
        match line {
            HeaderLine::Unterminated(text) => assert!(is_mbox_from_line(&text)),
            other => panic!("expected unterminated line, got {other:?}"),
        }
    }

    #[test]
    fn read_all_headers_with_len_reports_bytes_up_to_body_start() {
        let raw = b"Subject: hi\r\nX-Id: 1\r\n\r\nbody text".to_vec();
        let mut cursor = Cursor::new(raw.clone());
        let (lines, len) = read_all_headers_with_len(&mut cursor).unwrap();
        assert_eq!(lines.len(), 2);
        let mut rest = Vec::new();
        std::io::Read::read_to_end(&mut cursor, &mut rest).unwrap();
        assert_eq!(rest, b"body text");
        assert_eq!(len as usize, raw.len() - rest.len());
    }

    /// Property 1: unfolding then re-emitting with standard folding yields a
    /// header whose re-parse is byte-identical to the first parse.
    #[test]
    fn unfold_reparse_round_trip() {
        let raw = b"Subject: a long subject\r\n that wraps across\r\n multiple lines\r\n\r\n".to_vec();
        let mut cursor = Cursor::new(raw);
        let first = read_header_line(&mut cursor).unwrap().unwrap();

        let HeaderLine::Field { name, value } = &first else {
            panic!("expected field");
        };
        let refolded = format!("{name}: {value}\r\n\r\n");
        let mut cursor2 = Cursor::new(refolded.into_bytes());
        let second = read_header_line(&mut cursor2).unwrap().unwrap();
        assert_eq!(first, second);
    }
}
