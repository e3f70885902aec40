//! Append-only mbox writer.
//!
//! Messages are framed the classic way: a `From ` separator line carrying
//! the sender and the message date, the body with `From `-ambiguous lines
//! escaped, then one blank line.

use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, Local};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use super::sink_io_error;
use crate::record::Record;
use crate::Result;

/// INTERNALDATE wire format, e.g. `01-Jan-2020 10:20:30 +0000`.
const INTERNALDATE_FORMAT: &str = "%d-%b-%Y %H:%M:%S %z";

/// mbox separator date format, e.g. `Wed Jan  1 10:20:30 2020`.
const FROM_LINE_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// Appends messages to a single mbox file.
pub struct MboxSink {
    path: PathBuf,
}

impl MboxSink {
    /// Creates a sink appending to `path`; the file is created on first use.
    #[must_use]
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    /// Appends one message.
    pub async fn deliver(&mut self, record: &Record) -> Result<()> {
        let entry = render_entry(record);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| sink_io_error("cannot open mbox", &e))?;

        file.write_all(&entry)
            .await
            .map_err(|e| sink_io_error("cannot append to mbox", &e))?;
        file.flush()
            .await
            .map_err(|e| sink_io_error("cannot flush mbox", &e))?;

        Ok(())
    }
}

/// Renders one complete mbox entry with CRLF line endings.
fn render_entry(record: &Record) -> Vec<u8> {
    let date = parse_internal_date(&record.internal_date);
    let sender = sender_from_body(&record.body).unwrap_or_else(login_name);

    let mut out = Vec::with_capacity(record.body.len() + 128);
    out.extend_from_slice(
        format!("From {sender}  {}\r\n", date.format(FROM_LINE_FORMAT)).as_bytes(),
    );

    // A body ending in a newline would otherwise yield a trailing empty
    // line and double the blank separator.
    let mut lines: Vec<&[u8]> = record.body.split(|&b| b == b'\n').collect();
    if lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }

    for line in lines {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if from_needs_escape(line) {
            out.push(b'>');
        }
        out.extend_from_slice(line);
        out.extend_from_slice(b"\r\n");
    }

    out.extend_from_slice(b"\r\n");
    out
}

/// Parses INTERNALDATE; falls back to the current local time with a warning.
fn parse_internal_date(s: &str) -> DateTime<FixedOffset> {
    DateTime::parse_from_str(s, INTERNALDATE_FORMAT).unwrap_or_else(|e| {
        warn!(internaldate = s, error = %e, "unparseable INTERNALDATE, using current time");
        Local::now().fixed_offset()
    })
}

/// Extracts the sender from the `Return-Path:` header.
///
/// The surrounding `<>` and any interior whitespace are removed. `None`
/// when the header is absent or empty.
fn sender_from_body(body: &[u8]) -> Option<String> {
    for line in body.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            break; // end of headers
        }

        let text = String::from_utf8_lossy(line);
        let Some((name, value)) = text.split_once(':') else {
            continue;
        };
        if !name.eq_ignore_ascii_case("return-path") {
            continue;
        }

        let sender: String = value
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '<' && *c != '>')
            .collect();
        if sender.is_empty() {
            return None;
        }
        return Some(sender);
    }
    None
}

/// Login name of the invoking user, the traditional mbox fallback sender.
fn login_name() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "nobody".to_string())
}

/// True for body lines that would be mistaken for a separator: `^>*From `.
fn from_needs_escape(line: &[u8]) -> bool {
    let mut rest = line;
    while let Some(stripped) = rest.strip_prefix(b">") {
        rest = stripped;
    }
    rest.starts_with(b"From ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::record::MessageStatus;

    fn record(body: &[u8]) -> Record {
        Record {
            seq: 1,
            uid: 10,
            internal_date: "01-Jan-2020 10:20:30 +0000".to_string(),
            body: body.to_vec(),
            status: MessageStatus::Unknown,
        }
    }

    #[test]
    fn test_from_needs_escape() {
        assert!(from_needs_escape(b"From here on"));
        assert!(from_needs_escape(b">From quoted"));
        assert!(from_needs_escape(b">>>From deeply quoted"));
        assert!(!from_needs_escape(b"Fromage"));
        assert!(!from_needs_escape(b" From indented"));
        assert!(!from_needs_escape(b"> From with space"));
    }

    #[test]
    fn test_sender_from_return_path() {
        let body = b"Return-Path: <alice@example.com>\r\nSubject: hi\r\n\r\nbody";
        assert_eq!(sender_from_body(body).as_deref(), Some("alice@example.com"));
    }

    #[test]
    fn test_sender_interior_whitespace_removed() {
        let body = b"Return-Path: < alice @example.com >\r\n\r\n";
        assert_eq!(sender_from_body(body).as_deref(), Some("alice@example.com"));
    }

    #[test]
    fn test_sender_absent_or_empty() {
        assert_eq!(sender_from_body(b"Subject: hi\r\n\r\nReturn-Path: <x>\r\n"), None);
        assert_eq!(sender_from_body(b"Return-Path: <>\r\n\r\n"), None);
    }

    #[test]
    fn test_parse_internal_date() {
        let d = parse_internal_date("01-Jan-2020 10:20:30 +0000");
        assert_eq!(d.format("%Y-%m-%d %H:%M:%S").to_string(), "2020-01-01 10:20:30");
        assert_eq!(d.format(FROM_LINE_FORMAT).to_string(), "Wed Jan  1 10:20:30 2020");
    }

    #[test]
    fn test_render_entry_shape() {
        let rec = record(b"Return-Path: <bob@example.org>\r\nSubject: x\r\n\r\nFrom the start\r\nplain\r\n");
        let entry = render_entry(&rec);
        let text = String::from_utf8(entry).unwrap();

        assert!(text.starts_with("From bob@example.org  Wed Jan  1 10:20:30 2020\r\n"));
        assert!(text.contains("\r\n>From the start\r\n"));
        // Exactly one blank line follows the last body line.
        assert!(text.ends_with("plain\r\n\r\n"));
    }

    #[test]
    fn test_render_entry_without_trailing_newline() {
        let rec = record(b"Subject: x\r\n\r\nno final newline");
        let text = String::from_utf8(render_entry(&rec)).unwrap();
        assert!(text.ends_with("no final newline\r\n\r\n"));
    }

    #[tokio::test]
    async fn test_deliver_appends_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mbox");
        let mut sink = MboxSink::new(&path);

        sink.deliver(&record(b"Subject: one\r\n\r\nfirst\r\n")).await.unwrap();
        sink.deliver(&record(b"Subject: two\r\n\r\nsecond\r\n")).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let first = contents.find("first").unwrap();
        let second = contents.find("second").unwrap();
        assert!(first < second);
        assert_eq!(contents.matches("From ").count(), 2);
        // One blank line separates consecutive entries.
        assert!(contents.contains("first\r\n\r\nFrom "));
    }
}
