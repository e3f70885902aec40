//! Delivery sinks for fetched messages.
//!
//! A sink is chosen once per run: either an append-only mbox file or a
//! subprocess receiving each message on stdin.

mod command;
mod mbox;

pub use command::CommandSink;
pub use mbox::MboxSink;

use std::path::Path;

use crate::record::Record;
use crate::{Error, Result};

/// Where fetched messages go.
pub enum Sink {
    /// Append to a local mbox file.
    Mbox(MboxSink),
    /// Pipe each message to a spawned subprocess.
    Command(CommandSink),
}

impl Sink {
    /// Creates an mbox sink writing to `path`.
    #[must_use]
    pub fn mbox(path: &Path) -> Self {
        Self::Mbox(MboxSink::new(path))
    }

    /// Creates a subprocess sink for the configured command line.
    ///
    /// # Errors
    ///
    /// Fails when the command string is empty.
    pub fn command(command_line: &str) -> Result<Self> {
        Ok(Self::Command(CommandSink::new(command_line)?))
    }

    /// Delivers one message.
    ///
    /// Delivery failures are returned to the caller; the engine treats them
    /// as fatal for the row so the checkpoint is not advanced past an
    /// undelivered message.
    pub async fn deliver(&mut self, record: &Record) -> Result<()> {
        match self {
            Self::Mbox(sink) => sink.deliver(record).await,
            Self::Command(sink) => sink.deliver(record).await,
        }
    }
}

impl std::fmt::Debug for Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mbox(_) => f.write_str("Sink::Mbox"),
            Self::Command(_) => f.write_str("Sink::Command"),
        }
    }
}

/// Maps an I/O failure into a sink error with context.
pub(crate) fn sink_io_error(what: &str, e: &std::io::Error) -> Error {
    Error::Sink(format!("{what}: {e}"))
}
