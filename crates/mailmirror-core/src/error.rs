//! Error types for the sync engine.

use thiserror::Error;

/// Errors from the mirroring engine and its collaborators.
#[derive(Debug, Error)]
pub enum Error {
    /// IMAP protocol or transport failure.
    #[error(transparent)]
    Imap(#[from] mailmirror_imap::Error),

    /// `OAuth2` token acquisition failure.
    #[error("OAuth2: {0}")]
    OAuth(#[from] mailmirror_oauth::Error),

    /// Server dropped the connection during an IDLE round.
    #[error("connection lost during IDLE: {0}")]
    IdleDisconnect(mailmirror_imap::Error),

    /// Checkpoint file could not be written durably.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[source] std::io::Error),

    /// Message could not be handed to the sink.
    #[error("sink error: {0}")]
    Sink(String),
}

impl Error {
    /// True when dropping the session and reconnecting can help.
    ///
    /// Auth, folder and parse failures are permanent; so are checkpoint and
    /// sink failures, which are local conditions a reconnect cannot clear.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::Imap(e) => e.is_recoverable(),
            Self::IdleDisconnect(_) => true,
            Self::OAuth(_) | Self::Checkpoint(_) | Self::Sink(_) => false,
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
