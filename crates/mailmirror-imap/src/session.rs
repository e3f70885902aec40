//! IMAP session: tagged command channel and authentication.
//!
//! A session owns the framed stream and the tag counter. The engine is
//! strictly serial: one command is in flight at a time, and replies are
//! pulled one logical response at a time and classified here.

#![allow(clippy::missing_errors_doc)]

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use mailmirror_oauth::sasl::{decode_challenge, xoauth2_response};

use crate::capability::Capabilities;
use crate::framed::FramedStream;
use crate::stream::{ImapStream, connect_plain, connect_tls};
use crate::tag::TagSequence;
use crate::{Error, Result};

/// Inactivity deadline for reads outside IDLE.
const READ_TIMEOUT: Duration = Duration::from_secs(300);

/// One classified server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Untagged data line; payload is the raw bytes after `* `,
    /// literals included.
    Untagged(Vec<u8>),
    /// Continuation request; payload is the text after `+ `.
    Continuation(Vec<u8>),
    /// Tagged OK completion with its response text.
    Done(String),
}

/// A live IMAP connection with its tag counter and latched capabilities.
#[derive(Debug)]
pub struct Session<S> {
    stream: FramedStream<S>,
    tags: TagSequence,
    caps: Capabilities,
}

impl Session<ImapStream> {
    /// Connects to `host:port`, with TLS when `ssl` is set, and consumes the
    /// server greeting.
    pub async fn connect(host: &str, port: u16, ssl: bool) -> Result<Self> {
        let stream = if ssl {
            connect_tls(host, port).await?
        } else {
            connect_plain(host, port).await?
        };
        debug!(host, port, ssl, "connected");
        Self::from_stream(stream).await
    }
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a session from a connected stream, reading the greeting.
    ///
    /// A `[CAPABILITY …]` code in the greeting is latched, saving the extra
    /// round trip later.
    pub async fn from_stream(stream: S) -> Result<Self> {
        let mut session = Self {
            stream: FramedStream::new(stream),
            tags: TagSequence::new(),
            caps: Capabilities::new(),
        };

        let greeting = session.read_logical().await?;
        let Some(payload) = greeting.strip_prefix(b"* ") else {
            return Err(Error::Protocol("malformed server greeting".to_string()));
        };

        if let Some(text) = strip_keyword(payload, "BYE") {
            return Err(Error::Bye(text));
        }
        if strip_keyword(payload, "OK").is_none() && strip_keyword(payload, "PREAUTH").is_none() {
            return Err(Error::Protocol("unexpected server greeting".to_string()));
        }

        session.latch_bracket_capabilities(payload);
        Ok(session)
    }

    /// Capabilities observed so far.
    #[must_use]
    pub const fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    /// Sends `<tag> <command>\r\n` and returns the tag.
    pub async fn issue(&mut self, command: &str) -> Result<String> {
        let tag = self.tags.next();
        trace!(%tag, command, "issue");
        let line = format!("{tag} {command}\r\n");
        self.stream.write_command(line.as_bytes()).await?;
        Ok(tag)
    }

    /// Reads and classifies the next reply for the command `tag`.
    ///
    /// Tagged NO/BAD completions and untagged BYE are surfaced as errors;
    /// the tag counter only ever has one command outstanding, so a
    /// completion for any other tag is a protocol error.
    pub async fn next_reply(&mut self, tag: &str) -> Result<Reply> {
        match timeout(READ_TIMEOUT, self.read_reply(tag)).await {
            Ok(reply) => reply,
            Err(_) => Err(Error::Timeout(READ_TIMEOUT)),
        }
    }

    /// Like [`Self::next_reply`] but returns `None` once `wait` elapses.
    pub async fn next_reply_within(&mut self, tag: &str, wait: Duration) -> Result<Option<Reply>> {
        match timeout(wait, self.read_reply(tag)).await {
            Ok(reply) => reply.map(Some),
            Err(_) => Ok(None),
        }
    }

    async fn read_reply(&mut self, tag: &str) -> Result<Reply> {
        let response = self.read_logical().await?;

        if let Some(payload) = response.strip_prefix(b"* ") {
            if let Some(text) = strip_keyword(payload, "BYE") {
                return Err(Error::Bye(text));
            }
            self.latch_untagged_capabilities(payload);
            let mut payload = payload.to_vec();
            strip_crlf(&mut payload);
            return Ok(Reply::Untagged(payload));
        }

        if let Some(payload) = response.strip_prefix(b"+") {
            let mut payload = payload.strip_prefix(b" ").unwrap_or(payload).to_vec();
            strip_crlf(&mut payload);
            return Ok(Reply::Continuation(payload));
        }

        let prefix = format!("{tag} ");
        let Some(rest) = response.strip_prefix(prefix.as_bytes()) else {
            return Err(Error::Protocol(format!(
                "completion for unknown tag: {}",
                String::from_utf8_lossy(&response).trim_end()
            )));
        };

        if let Some(text) = strip_keyword(rest, "OK") {
            self.latch_bracket_capabilities(rest);
            return Ok(Reply::Done(text));
        }
        if let Some(text) = strip_keyword(rest, "NO") {
            return Err(Error::No(text));
        }
        if let Some(text) = strip_keyword(rest, "BAD") {
            return Err(Error::Bad(text));
        }

        Err(Error::Protocol(format!(
            "malformed tagged completion: {}",
            String::from_utf8_lossy(&response).trim_end()
        )))
    }

    /// Issues a command and collects all untagged payloads until its OK.
    pub async fn run(&mut self, command: &str) -> Result<Vec<Vec<u8>>> {
        let tag = self.issue(command).await?;
        let mut collected = Vec::new();

        loop {
            match self.next_reply(&tag).await? {
                Reply::Untagged(payload) => collected.push(payload),
                Reply::Continuation(_) => {
                    return Err(Error::Protocol(
                        "unexpected continuation request".to_string(),
                    ));
                }
                Reply::Done(_) => return Ok(collected),
            }
        }
    }

    /// Writes raw bytes on the wire (continuation replies, `DONE`).
    pub async fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_command(data).await
    }

    /// Asks the server for its capabilities and latches them.
    pub async fn request_capabilities(&mut self) -> Result<()> {
        self.run("CAPABILITY").await?;
        if self.caps.is_empty() {
            return Err(Error::Protocol("server advertised no capabilities".to_string()));
        }
        Ok(())
    }

    /// Authenticates with `LOGIN`; credentials are passed through raw.
    pub async fn login(&mut self, user: &str, pass: &str) -> Result<()> {
        debug!(user, "authenticating with LOGIN");
        self.run(&format!("LOGIN {user} {pass}"))
            .await
            .map_err(|e| match e {
                Error::No(text) | Error::Bad(text) => Error::Auth(text),
                other => other,
            })?;
        Ok(())
    }

    /// Authenticates with `AUTHENTICATE XOAUTH2` using an initial response.
    ///
    /// The caller must have verified `SASL-IR` and `AUTH=XOAUTH2` support. An
    /// error challenge (JSON with a 4xx/5xx `status`) is answered with an
    /// empty line and reported as an authentication failure.
    pub async fn authenticate_xoauth2(&mut self, user: &str, token: &str) -> Result<()> {
        debug!(user, "authenticating with XOAUTH2");
        let initial = xoauth2_response(user, token);
        let tag = self.issue(&format!("AUTHENTICATE XOAUTH2 {initial}")).await?;

        let mut challenge_error: Option<String> = None;
        loop {
            match self.next_reply(&tag).await {
                Ok(Reply::Continuation(payload)) => {
                    let text = String::from_utf8_lossy(&payload).into_owned();
                    if let Some(status) = decode_challenge(&text) {
                        warn!(%status, "server rejected XOAUTH2 token");
                        challenge_error = Some(format!("XOAUTH2 rejected with status {status}"));
                    }
                    // Terminate the SASL exchange so the server completes
                    // the command.
                    self.write_raw(b"\r\n").await?;
                }
                Ok(Reply::Untagged(_)) => {}
                Ok(Reply::Done(_)) => {
                    return challenge_error.map_or(Ok(()), |msg| Err(Error::Auth(msg)));
                }
                Err(Error::No(text) | Error::Bad(text)) => {
                    return Err(Error::Auth(challenge_error.unwrap_or(text)));
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Issues a tagged LOGOUT, tolerating the untagged BYE it provokes.
    pub async fn logout(&mut self) -> Result<()> {
        let tag = self.issue("LOGOUT").await?;
        loop {
            match self.next_reply(&tag).await {
                Ok(Reply::Done(_)) | Err(Error::Bye(_)) => break,
                Ok(_) => {}
                Err(_) => break,
            }
        }
        let _ = self.stream.shutdown().await;
        Ok(())
    }

    /// Emergency logout on shutdown signals: tag "0", no reply expected.
    pub async fn unsolicited_logout(&mut self) {
        let _ = self.stream.write_command(b"0 LOGOUT\r\n").await;
        let _ = self.stream.shutdown().await;
    }

    async fn read_logical(&mut self) -> Result<Vec<u8>> {
        self.stream.read_response().await
    }

    /// Latches `CAPABILITY a b c` untagged data.
    fn latch_untagged_capabilities(&mut self, payload: &[u8]) {
        if let Some(rest) = strip_keyword_raw(payload, "CAPABILITY") {
            let text = String::from_utf8_lossy(rest);
            self.caps.update(text.split_ascii_whitespace().map(String::from));
        } else if strip_keyword(payload, "OK").is_some()
            || strip_keyword(payload, "PREAUTH").is_some()
        {
            self.latch_bracket_capabilities(payload);
        }
    }

    /// Latches a `[CAPABILITY a b c]` response code inside OK text.
    fn latch_bracket_capabilities(&mut self, line: &[u8]) {
        let text = String::from_utf8_lossy(line);
        let Some(start) = text.find("[CAPABILITY ") else {
            return;
        };
        let rest = &text[start + "[CAPABILITY ".len()..];
        let Some(end) = rest.find(']') else { return };
        self.caps
            .update(rest[..end].split_ascii_whitespace().map(String::from));
    }
}

/// Removes the trailing line terminator of one logical response.
fn strip_crlf(buf: &mut Vec<u8>) {
    while matches!(buf.last(), Some(b'\r' | b'\n')) {
        buf.pop();
    }
}

/// Strips a leading case-insensitive keyword plus delimiter, returning the
/// remaining text with line endings trimmed.
fn strip_keyword(payload: &[u8], keyword: &str) -> Option<String> {
    strip_keyword_raw(payload, keyword).map(|rest| {
        String::from_utf8_lossy(rest).trim_end_matches(['\r', '\n']).to_string()
    })
}

fn strip_keyword_raw<'a>(payload: &'a [u8], keyword: &str) -> Option<&'a [u8]> {
    if payload.len() < keyword.len()
        || !payload[..keyword.len()].eq_ignore_ascii_case(keyword.as_bytes())
    {
        return None;
    }
    match payload.get(keyword.len()) {
        None | Some(b' ' | b'\r' | b'\n') => {
            let rest = &payload[keyword.len()..];
            Some(rest.strip_prefix(b" ").unwrap_or(rest))
        }
        Some(_) => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_greeting_latches_capabilities() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 SASL-IR AUTH=XOAUTH2] ready\r\n")
            .build();

        let session = Session::from_stream(mock).await.unwrap();
        assert!(session.capabilities().has_xoauth2());
    }

    #[tokio::test]
    async fn test_bye_greeting_is_fatal() {
        let mock = Builder::new().read(b"* BYE overloaded\r\n").build();
        let err = Session::from_stream(mock).await.unwrap_err();
        assert!(matches!(err, Error::Bye(text) if text == "overloaded"));
    }

    #[tokio::test]
    async fn test_run_collects_untagged_until_ok() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"1 CAPABILITY\r\n")
            .read(b"* CAPABILITY IMAP4rev1 IDLE\r\n")
            .read(b"1 OK done\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let data = session.run("CAPABILITY").await.unwrap();
        assert_eq!(data, vec![b"CAPABILITY IMAP4rev1 IDLE".to_vec()]);
        assert!(session.capabilities().has("IDLE"));
    }

    #[tokio::test]
    async fn test_tags_increment_per_command() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"1 NOOP\r\n")
            .read(b"1 OK\r\n")
            .write(b"2 NOOP\r\n")
            .read(b"2 OK\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        session.run("NOOP").await.unwrap();
        session.run("NOOP").await.unwrap();
    }

    #[tokio::test]
    async fn test_login_failure_is_auth_error() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"1 LOGIN bob secret\r\n")
            .read(b"1 NO [AUTHENTICATIONFAILED] bad credentials\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let err = session.login("bob", "secret").await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[tokio::test]
    async fn test_untagged_bye_fails_command() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"1 NOOP\r\n")
            .read(b"* BYE shutting down\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let err = session.run("NOOP").await.unwrap_err();
        assert!(matches!(err, Error::Bye(_)));
    }

    #[tokio::test]
    async fn test_foreign_tag_is_protocol_error() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"1 NOOP\r\n")
            .read(b"9 OK who\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let err = session.run("NOOP").await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_xoauth2_error_challenge() {
        // base64({"status":"401","schemes":"bearer"})
        let challenge =
            "eyJzdGF0dXMiOiI0MDEiLCJzY2hlbWVzIjoiYmVhcmVyIiwic2NvcGUiOiJ4In0=";
        let initial = xoauth2_response("bob", "tok");

        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(format!("1 AUTHENTICATE XOAUTH2 {initial}\r\n").as_bytes())
            .read(format!("+ {challenge}\r\n").as_bytes())
            .write(b"\r\n")
            .read(b"1 NO AUTHENTICATE failed\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let err = session.authenticate_xoauth2("bob", "tok").await.unwrap_err();
        assert!(matches!(err, Error::Auth(msg) if msg.contains("401")));
    }

    #[tokio::test]
    async fn test_xoauth2_success() {
        let initial = xoauth2_response("bob", "tok");
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(format!("1 AUTHENTICATE XOAUTH2 {initial}\r\n").as_bytes())
            .read(b"* CAPABILITY IMAP4rev1 X-GM-EXT-1\r\n")
            .read(b"1 OK authenticated\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        session.authenticate_xoauth2("bob", "tok").await.unwrap();
        assert!(session.capabilities().has_gmail());
    }

    #[test]
    fn test_strip_keyword() {
        assert_eq!(strip_keyword(b"OK all good\r\n", "OK").as_deref(), Some("all good"));
        assert_eq!(strip_keyword(b"ok lower\r\n", "OK").as_deref(), Some("lower"));
        assert_eq!(strip_keyword(b"OKAY nope\r\n", "OK"), None);
        assert_eq!(strip_keyword(b"BYE\r\n", "BYE").as_deref(), Some(""));
    }
}
