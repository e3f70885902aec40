//! The incremental sync engine.
//!
//! One session at a time walks DISCOVER → STREAM → IDLE; any transport
//! failure drops the session, waits, reconnects and resumes at DISCOVER from
//! the persisted checkpoint. The checkpoint is advanced only after the sink
//! has fully taken a message, so a crash re-delivers at most the message in
//! flight and never skips one.
//!
//! ```text
//!   DISCOVER ──highest>checkpoint──► STREAM ──done──► IDLE
//!      ▲                                                │
//!      │                                    EXISTS / refresh
//!      └──────────── reconnect ◄── any transport error ─┘
//! ```

use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use mailmirror_imap::{
    Error as ImapError, IdleWait, Reply, Session, Value, fetch_field, parser,
};
use mailmirror_oauth::{RefreshRequest, refresh_access_token};

use crate::checkpoint::Checkpoint;
use crate::record::{MessageStatus, Record};
use crate::sink::Sink;
use crate::{Error, Result};

/// Pause before reconnecting after a transport failure.
const RECONNECT_DELAY: Duration = Duration::from_secs(10);

/// IDLE refresh ceiling; must stay under RFC 2177's 29-minute limit.
const IDLE_CEILING: Duration = Duration::from_secs(600);

/// How the engine authenticates.
#[derive(Debug, Clone)]
pub enum AuthMethod {
    /// `LOGIN` with a password.
    Password(String),
    /// `AUTHENTICATE XOAUTH2` with a pre-obtained bearer token.
    XOAuth2Token(String),
    /// `AUTHENTICATE XOAUTH2`, refreshing the bearer per session.
    XOAuth2Refresh(RefreshRequest),
}

/// Which folder to mirror.
#[derive(Debug, Clone)]
pub enum FolderSpec {
    /// Explicit folder name, passed to EXAMINE as-is.
    Name(String),
    /// Pick the first LIST entry carrying this flag (e.g. `\All`).
    Flag(String),
}

/// Connection and account settings for one mirror run.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Remote host.
    pub server: String,
    /// Remote port.
    pub port: u16,
    /// Whether to wrap the connection in TLS.
    pub ssl: bool,
    /// Account name for LOGIN/XOAUTH2.
    pub user: String,
    /// Credential source.
    pub auth: AuthMethod,
    /// Folder selection.
    pub folder: FolderSpec,
}

/// What DISCOVER learned about the fetch window.
#[derive(Debug, Clone, Copy, Default)]
struct Window {
    /// Sequence number of the already-archived checkpoint message, else 0.
    lastid: u32,
    /// Highest sequence number observed.
    highestid: u32,
    /// Highest UID observed, `None` when the folder reported nothing.
    highestuid: Option<u32>,
}

impl Window {
    /// True when messages beyond `checkpoint` exist.
    fn has_new(self, checkpoint: u32) -> bool {
        self.highestuid.is_some_and(|uid| uid > checkpoint)
    }
}

/// The mirror engine: owns the checkpoint, the sink and the session loop.
pub struct Engine {
    config: MirrorConfig,
    checkpoint: Checkpoint,
    last_uid: u32,
    sink: Sink,
    shutdown: CancellationToken,
}

impl Engine {
    /// Creates an engine rooted in `state_dir`.
    #[must_use]
    pub fn new(
        config: MirrorConfig,
        state_dir: &Path,
        sink: Sink,
        shutdown: CancellationToken,
    ) -> Self {
        let checkpoint = Checkpoint::new(state_dir);
        let last_uid = checkpoint.load();
        Self {
            config,
            checkpoint,
            last_uid,
            sink,
            shutdown,
        }
    }

    /// Runs until shutdown is requested or a fatal error occurs.
    pub async fn run(&mut self) -> Result<()> {
        info!(last_uid = self.last_uid, "mirror starting");

        loop {
            if self.shutdown.is_cancelled() {
                return Ok(());
            }

            match self.run_session().await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_recoverable() => {
                    warn!(error = %e, delay = ?RECONNECT_DELAY, "session lost, reconnecting");
                    tokio::select! {
                        () = self.shutdown.cancelled() => return Ok(()),
                        () = sleep(RECONNECT_DELAY) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One full session: connect, authenticate, select, then sync until the
    /// session dies or shutdown is requested.
    async fn run_session(&mut self) -> Result<()> {
        let mut session =
            Session::connect(&self.config.server, self.config.port, self.config.ssl).await?;

        self.authenticate(&mut session).await?;

        let folder = match &self.config.folder {
            FolderSpec::Name(name) => name.clone(),
            FolderSpec::Flag(flag) => session.resolve_folder(flag).await?,
        };
        session.examine(&folder).await?;

        self.sync_loop(&mut session).await
    }

    /// DISCOVER → STREAM → IDLE until disconnect or shutdown.
    async fn sync_loop<S>(&mut self, session: &mut Session<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let has_gmail = session.capabilities().has_gmail();

        loop {
            if self.shutdown.is_cancelled() {
                session.logout().await?;
                return Ok(());
            }

            let window = self.discover(session).await?;
            if window.has_new(self.last_uid) {
                self.stream_new(session, has_gmail, window).await?;
            }

            if !self.idle_until_new_mail(session).await? {
                // Shutdown was requested while idling.
                session.unsolicited_logout().await;
                return Ok(());
            }
        }
    }

    /// Phase 1: find the window of new messages.
    async fn discover<S>(&mut self, session: &mut Session<S>) -> Result<Window>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let command = if self.last_uid > 0 {
            format!("UID FETCH {},* (UID)", self.last_uid)
        } else {
            "UID FETCH * (UID)".to_string()
        };

        let mut window = Window::default();

        for payload in session.run(&command).await? {
            let Some((seq, fields)) = parse_fetch_payload(&payload)? else {
                continue;
            };
            let Some(uid) = fetch_field(&fields, "UID").and_then(Value::as_number) else {
                continue;
            };

            if self.last_uid > 0 && uid == self.last_uid {
                window.lastid = seq;
            }
            window.highestid = window.highestid.max(seq);
            window.highestuid = Some(window.highestuid.map_or(uid, |h| h.max(uid)));
        }

        info!(
            checkpoint = self.last_uid,
            highest_uid = window.highestuid,
            "discover complete"
        );
        Ok(window)
    }

    /// Phase 2: stream everything past the checkpoint into the sink.
    async fn stream_new<S>(
        &mut self,
        session: &mut Session<S>,
        has_gmail: bool,
        window: Window,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let attrs = if has_gmail {
            "(RFC822 INTERNALDATE X-GM-LABELS)"
        } else {
            "(RFC822 INTERNALDATE)"
        };
        let command = format!("UID FETCH {}:* {attrs}", self.last_uid + 1);
        let tag = session.issue(&command).await?;

        loop {
            match session.next_reply(&tag).await? {
                Reply::Untagged(payload) => {
                    let Some(record) = self.extract_record(&payload)? else {
                        continue;
                    };

                    self.sink.deliver(&record).await?;
                    self.checkpoint
                        .store(record.uid)
                        .map_err(Error::Checkpoint)?;
                    self.last_uid = record.uid;

                    info!(
                        "Fetching messages {}/{} (new {}/{})",
                        record.seq,
                        window.highestid,
                        record.seq.saturating_sub(window.lastid),
                        window.highestid.saturating_sub(window.lastid)
                    );
                }
                Reply::Continuation(_) => {
                    return Err(ImapError::Protocol(
                        "unexpected continuation during fetch".to_string(),
                    )
                    .into());
                }
                Reply::Done(_) => return Ok(()),
            }
        }
    }

    /// Parses one untagged FETCH payload into a record.
    ///
    /// Non-FETCH payloads yield `None` silently; FETCH rows missing UID,
    /// body or date, or not newer than the checkpoint, are warned and
    /// skipped.
    fn extract_record(&self, payload: &[u8]) -> Result<Option<Record>> {
        let Some((seq, fields)) = parse_fetch_payload(payload)? else {
            return Ok(None);
        };

        let uid = fetch_field(&fields, "UID").and_then(Value::as_number);
        let body = fetch_field(&fields, "RFC822").and_then(|v| v.as_bytes().map(<[u8]>::to_vec));
        let date = fetch_field(&fields, "INTERNALDATE")
            .and_then(|v| v.as_text().map(ToString::to_string));

        let (Some(uid), Some(body), Some(date)) = (uid, body, date) else {
            warn!(seq, "skipping FETCH row with missing UID, body or date");
            return Ok(None);
        };
        if uid <= self.last_uid {
            warn!(seq, uid, checkpoint = self.last_uid, "skipping stale FETCH row");
            return Ok(None);
        }

        let labels: Option<Vec<String>> = fetch_field(&fields, "X-GM-LABELS")
            .and_then(Value::as_list)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_text().map(ToString::to_string))
                    .collect()
            });
        let status = MessageStatus::from_labels(labels.as_deref());

        Ok(Some(Record {
            seq,
            uid,
            internal_date: date,
            body,
            status,
        }))
    }

    /// Phase 3: IDLE rounds until the server pushes new mail.
    ///
    /// Returns `Ok(true)` on new mail, `Ok(false)` when shutdown interrupted
    /// the wait. Disconnects during IDLE are recoverable.
    async fn idle_until_new_mail<S>(&mut self, session: &mut Session<S>) -> Result<bool>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let round = {
                let handle = session.idle().await.map_err(idle_error)?;
                tokio::select! {
                    outcome = handle.wait(IDLE_CEILING) => Some(outcome.map_err(idle_error)?),
                    () = self.shutdown.cancelled() => None,
                }
            };

            match round {
                None => return Ok(false),
                Some(IdleWait::NewMail) => return Ok(true),
                Some(IdleWait::Refreshed) => {}
            }
        }
    }

    /// Authenticates per the configured method.
    async fn authenticate<S>(&self, session: &mut Session<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match &self.config.auth {
            AuthMethod::Password(pass) => {
                session.login(&self.config.user, pass).await?;
            }
            AuthMethod::XOAuth2Token(token) => {
                self.require_xoauth2(session).await?;
                session
                    .authenticate_xoauth2(&self.config.user, token)
                    .await?;
            }
            AuthMethod::XOAuth2Refresh(request) => {
                self.require_xoauth2(session).await?;
                let token = refresh_access_token(request).await?;
                session
                    .authenticate_xoauth2(&self.config.user, &token)
                    .await?;
            }
        }

        info!(user = %self.config.user, "authenticated");
        Ok(())
    }

    async fn require_xoauth2<S>(&self, session: &mut Session<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        session.request_capabilities().await?;
        if !session.capabilities().has_xoauth2() {
            return Err(ImapError::AuthNotSupported(
                "server lacks SASL-IR and AUTH=XOAUTH2".to_string(),
            )
            .into());
        }
        Ok(())
    }
}

/// Maps IDLE-phase failures: server-side terminations become recoverable.
fn idle_error(e: ImapError) -> Error {
    match e {
        ImapError::Bye(_) | ImapError::No(_) | ImapError::Bad(_) => Error::IdleDisconnect(e),
        other => other.into(),
    }
}

/// Splits an untagged payload shaped `<seq> FETCH (fields…)`.
///
/// Returns `None` for any other untagged data (EXISTS, FLAGS, RECENT…).
fn parse_fetch_payload(payload: &[u8]) -> Result<Option<(u32, Vec<Value>)>> {
    let items = parser::parse(payload)?;

    let seq = items.first().and_then(Value::as_number);
    let verb = items.get(1).and_then(Value::as_text);
    let fields = items.get(2).and_then(Value::as_list);

    match (seq, verb, fields) {
        (Some(seq), Some(verb), Some(fields)) if verb.eq_ignore_ascii_case("FETCH") => {
            Ok(Some((seq, fields.to_vec())))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_window_has_new() {
        let mut w = Window::default();
        assert!(!w.has_new(0));
        w.highestuid = Some(12);
        assert!(w.has_new(11));
        assert!(!w.has_new(12));
        assert!(!w.has_new(20));
    }

    #[test]
    fn test_parse_fetch_payload() {
        let (seq, fields) = parse_fetch_payload(b"3 FETCH (UID 12)").unwrap().unwrap();
        assert_eq!(seq, 3);
        assert_eq!(fetch_field(&fields, "UID").unwrap().as_number(), Some(12));
    }

    #[test]
    fn test_parse_fetch_payload_ignores_exists() {
        assert!(parse_fetch_payload(b"4 EXISTS").unwrap().is_none());
        assert!(parse_fetch_payload(b"FLAGS (\\Seen)").unwrap().is_none());
    }

    #[test]
    fn test_idle_error_classification() {
        assert!(idle_error(ImapError::Bye("x".into())).is_recoverable());
        assert!(idle_error(ImapError::No("x".into())).is_recoverable());
        assert!(!idle_error(ImapError::Auth("x".into())).is_recoverable());
    }

    fn engine(dir: &std::path::Path) -> Engine {
        let config = MirrorConfig {
            server: "imap.example.com".to_string(),
            port: 993,
            ssl: true,
            user: "bob".to_string(),
            auth: AuthMethod::Password("secret".to_string()),
            folder: FolderSpec::Name("INBOX".to_string()),
        };
        Engine::new(
            config,
            dir,
            Sink::mbox(&dir.join("mbox")),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_fresh_mailbox_streams_all_in_order() {
        use tokio_test::io::Builder;

        let dir = tempfile::tempdir().unwrap();
        let mut eng = engine(dir.path());
        assert_eq!(eng.last_uid, 0);

        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"1 UID FETCH * (UID)\r\n")
            .read(b"* 1 FETCH (UID 10)\r\n")
            .read(b"* 2 FETCH (UID 11)\r\n")
            .read(b"* 3 FETCH (UID 12)\r\n")
            .read(b"1 OK done\r\n")
            .write(b"2 UID FETCH 1:* (RFC822 INTERNALDATE)\r\n")
            .read(b"* 1 FETCH (UID 10 INTERNALDATE \"01-Jan-2020 10:20:30 +0000\" RFC822 {17}\r\nSubject: a\r\n\r\n1\r\n)\r\n")
            .read(b"* 2 FETCH (UID 11 INTERNALDATE \"02-Jan-2020 10:20:30 +0000\" RFC822 {17}\r\nSubject: b\r\n\r\n2\r\n)\r\n")
            .read(b"* 3 FETCH (UID 12 INTERNALDATE \"03-Jan-2020 10:20:30 +0000\" RFC822 {17}\r\nSubject: c\r\n\r\n3\r\n)\r\n")
            .read(b"2 OK done\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();

        let window = eng.discover(&mut session).await.unwrap();
        assert_eq!(window.highestuid, Some(12));
        assert_eq!(window.highestid, 3);
        assert_eq!(window.lastid, 0);
        assert!(window.has_new(eng.last_uid));

        eng.stream_new(&mut session, false, window).await.unwrap();

        assert_eq!(eng.last_uid, 12);
        assert_eq!(eng.checkpoint.load(), 12);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("lastuid")).unwrap(),
            "12\n"
        );

        let mbox = std::fs::read_to_string(dir.path().join("mbox")).unwrap();
        assert_eq!(mbox.matches("\r\nSubject: ").count(), 3);
        let a = mbox.find("Subject: a").unwrap();
        let b = mbox.find("Subject: b").unwrap();
        let c = mbox.find("Subject: c").unwrap();
        assert!(a < b && b < c);
    }

    #[tokio::test]
    async fn test_resume_fetches_only_past_checkpoint() {
        use tokio_test::io::Builder;

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lastuid"), "11\n").unwrap();
        let mut eng = engine(dir.path());
        assert_eq!(eng.last_uid, 11);

        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"1 UID FETCH 11,* (UID)\r\n")
            .read(b"* 2 FETCH (UID 11)\r\n")
            .read(b"* 3 FETCH (UID 12)\r\n")
            .read(b"1 OK done\r\n")
            .write(b"2 UID FETCH 12:* (RFC822 INTERNALDATE)\r\n")
            .read(b"* 3 FETCH (UID 12 INTERNALDATE \"03-Jan-2020 10:20:30 +0000\" RFC822 {17}\r\nSubject: c\r\n\r\n3\r\n)\r\n")
            .read(b"2 OK done\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();

        let window = eng.discover(&mut session).await.unwrap();
        assert_eq!(window.lastid, 2);
        assert_eq!(window.highestid, 3);
        assert!(window.has_new(eng.last_uid));

        eng.stream_new(&mut session, false, window).await.unwrap();
        assert_eq!(eng.checkpoint.load(), 12);

        let mbox = std::fs::read_to_string(dir.path().join("mbox")).unwrap();
        assert!(mbox.contains("Subject: c"));
        assert!(!mbox.contains("Subject: a"));
    }

    #[tokio::test]
    async fn test_discover_with_no_new_messages_skips_stream() {
        use tokio_test::io::Builder;

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lastuid"), "12").unwrap();
        let mut eng = engine(dir.path());

        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"1 UID FETCH 12,* (UID)\r\n")
            .read(b"* 3 FETCH (UID 12)\r\n")
            .read(b"1 OK done\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let window = eng.discover(&mut session).await.unwrap();
        assert!(!window.has_new(eng.last_uid));
    }

    #[tokio::test]
    async fn test_stream_skips_invalid_rows() {
        use tokio_test::io::Builder;

        let dir = tempfile::tempdir().unwrap();
        let mut eng = engine(dir.path());

        // First row lacks a body; second is complete.
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"1 UID FETCH 1:* (RFC822 INTERNALDATE)\r\n")
            .read(b"* 1 FETCH (UID 10 INTERNALDATE \"01-Jan-2020 10:20:30 +0000\")\r\n")
            .read(b"* 2 FETCH (UID 11 INTERNALDATE \"02-Jan-2020 10:20:30 +0000\" RFC822 {6}\r\nhello\n)\r\n")
            .read(b"1 OK done\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let window = Window {
            lastid: 0,
            highestid: 2,
            highestuid: Some(11),
        };
        eng.stream_new(&mut session, false, window).await.unwrap();

        assert_eq!(eng.checkpoint.load(), 11);
        let mbox = std::fs::read_to_string(dir.path().join("mbox")).unwrap();
        assert_eq!(mbox.matches("From ").count(), 1);
    }

    #[tokio::test]
    async fn test_gmail_labels_drive_status() {
        let dir = tempfile::tempdir().unwrap();
        let eng = engine(dir.path());

        let payload =
            b"1 FETCH (UID 5 X-GM-LABELS (\\Inbox \\Sent) INTERNALDATE \"01-Jan-2020 10:20:30 +0000\" RFC822 {2}\r\nhi)";
        let record = eng.extract_record(payload).unwrap().unwrap();
        assert_eq!(record.status, MessageStatus::SentReceived);

        // Absent labels never fabricate a status.
        let payload =
            b"1 FETCH (UID 5 INTERNALDATE \"01-Jan-2020 10:20:30 +0000\" RFC822 {2}\r\nhi)";
        let record = eng.extract_record(payload).unwrap().unwrap();
        assert_eq!(record.status, MessageStatus::Unknown);
    }
}
