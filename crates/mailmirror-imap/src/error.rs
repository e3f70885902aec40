//! Error types for the IMAP engine.

use thiserror::Error;

/// Errors that can occur during IMAP operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or encryption error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid DNS name for TLS.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// Response parsing error.
    #[error("Parse error at position {position}: {message}")]
    Parse {
        /// Byte position where the error occurred.
        position: usize,
        /// Description of what went wrong.
        message: String,
    },

    /// Authentication failed.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The server does not advertise the required authentication mechanism.
    #[error("Authentication not supported by server: {0}")]
    AuthNotSupported(String),

    /// No folder matched the configured folder flag.
    #[error("No folder with flag {0}")]
    FolderNotFound(String),

    /// Command completed with NO.
    #[error("Server returned NO: {0}")]
    No(String),

    /// Command completed with BAD.
    #[error("Server returned BAD: {0}")]
    Bad(String),

    /// Server sent an untagged BYE.
    #[error("Server sent BYE: {0}")]
    Bye(String),

    /// No server activity within the read deadline.
    #[error("Read timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Protocol violation or unexpected data.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl Error {
    /// True for failures that a reconnect can plausibly clear.
    ///
    /// Authentication, folder resolution and parse failures are permanent;
    /// everything transport-shaped is worth retrying. `Bye` is transport-level
    /// only when the server drops us mid-IDLE, which the caller knows and we
    /// do not, so it is reported as not recoverable here.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Tls(_) | Self::InvalidDnsName(_) | Self::Timeout(_)
        )
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
