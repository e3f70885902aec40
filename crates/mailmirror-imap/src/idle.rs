//! IMAP IDLE support (RFC 2177).
//!
//! IDLE lets the server push `EXISTS` notifications instead of being polled.
//! One IDLE round is: issue `IDLE`, receive the continuation, wait for a
//! push or the refresh ceiling, send `DONE` exactly once, drain to the
//! tagged OK.

#![allow(clippy::missing_errors_doc)]

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::session::{Reply, Session};
use crate::{Error, Result};

/// How an IDLE round ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleWait {
    /// The server announced new messages; go fetch them.
    NewMail,
    /// The refresh ceiling elapsed with no news; re-enter IDLE.
    Refreshed,
}

/// An IDLE round in progress.
pub struct IdleHandle<'a, S> {
    session: &'a mut Session<S>,
    tag: String,
    done_sent: bool,
    pending_exists: bool,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Enters IDLE mode and waits for the server's continuation.
    pub async fn idle(&mut self) -> Result<IdleHandle<'_, S>> {
        let tag = self.issue("IDLE").await?;
        let mut pending_exists = false;

        loop {
            match self.next_reply(&tag).await? {
                Reply::Continuation(_) => {
                    trace!(tag, "idling");
                    return Ok(IdleHandle {
                        session: self,
                        tag,
                        done_sent: false,
                        pending_exists,
                    });
                }
                Reply::Untagged(payload) => {
                    // A push can land before the continuation is out.
                    pending_exists |= is_exists(&payload);
                }
                Reply::Done(_) => {
                    return Err(Error::Protocol("IDLE completed without continuation".to_string()));
                }
            }
        }
    }
}

impl<S> IdleHandle<'_, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Waits out one IDLE round.
    ///
    /// Returns [`IdleWait::NewMail`] when the server pushed `EXISTS`, or
    /// [`IdleWait::Refreshed`] when the ceiling elapsed quietly. Either way
    /// the round is fully terminated (DONE sent, tagged OK consumed) when
    /// this returns.
    pub async fn wait(mut self, ceiling: Duration) -> Result<IdleWait> {
        if self.pending_exists {
            self.send_done().await?;
            self.drain().await?;
            return Ok(IdleWait::NewMail);
        }

        let deadline = Instant::now() + ceiling;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!("idle ceiling reached, refreshing");
                self.send_done().await?;
                let saw_exists = self.drain().await?;
                return Ok(if saw_exists { IdleWait::NewMail } else { IdleWait::Refreshed });
            }

            match self.session.next_reply_within(&self.tag, remaining).await? {
                None => {
                    debug!("idle ceiling reached, refreshing");
                    self.send_done().await?;
                    let saw_exists = self.drain().await?;
                    return Ok(if saw_exists { IdleWait::NewMail } else { IdleWait::Refreshed });
                }
                Some(Reply::Untagged(payload)) => {
                    if is_exists(&payload) {
                        debug!("server push: new messages exist");
                        self.send_done().await?;
                        self.drain().await?;
                        return Ok(IdleWait::NewMail);
                    }
                    // EXPUNGE, FETCH flag changes etc. are irrelevant here.
                }
                Some(Reply::Continuation(_)) => {
                    return Err(Error::Protocol(
                        "unexpected continuation during IDLE".to_string(),
                    ));
                }
                Some(Reply::Done(_)) => {
                    // Server ended the round on its own; treat as a wake-up.
                    return Ok(IdleWait::NewMail);
                }
            }
        }
    }

    /// Sends `DONE` at most once per round.
    async fn send_done(&mut self) -> Result<()> {
        if !self.done_sent {
            self.done_sent = true;
            self.session.write_raw(b"DONE\r\n").await?;
        }
        Ok(())
    }

    /// Consumes replies until the tagged OK; reports whether an `EXISTS`
    /// slipped in while draining.
    async fn drain(&mut self) -> Result<bool> {
        let mut saw_exists = false;
        loop {
            match self.session.next_reply(&self.tag).await? {
                Reply::Untagged(payload) => saw_exists |= is_exists(&payload),
                Reply::Continuation(_) => {}
                Reply::Done(_) => return Ok(saw_exists),
            }
        }
    }
}

/// Recognizes an untagged `<n> EXISTS` payload.
fn is_exists(payload: &[u8]) -> bool {
    let text = String::from_utf8_lossy(payload);
    let mut words = text.split_ascii_whitespace();
    matches!(
        (words.next(), words.next()),
        (Some(n), Some(word)) if n.bytes().all(|b| b.is_ascii_digit())
            && word.eq_ignore_ascii_case("EXISTS")
    )
}
