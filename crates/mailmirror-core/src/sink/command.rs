//! Subprocess sink.
//!
//! Each message spawns the configured command with `<date> <uid> <status>`
//! as separate argv entries (no shell involved) and the raw RFC822 body on
//! its standard input.

use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::record::Record;
use crate::{Error, Result};

/// Pipes messages to a user-supplied command.
pub struct CommandSink {
    program: String,
    base_args: Vec<String>,
}

impl CommandSink {
    /// Splits the configured command line into program and leading args.
    ///
    /// # Errors
    ///
    /// Fails when the command string is empty.
    pub fn new(command_line: &str) -> Result<Self> {
        let mut words = command_line.split_whitespace().map(ToString::to_string);
        let Some(program) = words.next() else {
            return Err(Error::Sink("empty command".to_string()));
        };
        Ok(Self {
            program,
            base_args: words.collect(),
        })
    }

    /// Runs the command once for `record`.
    pub async fn deliver(&mut self, record: &Record) -> Result<()> {
        debug!(
            program = %self.program,
            uid = record.uid,
            status = %record.status,
            "spawning delivery command"
        );

        let mut child = Command::new(&self.program)
            .args(&self.base_args)
            .arg(&record.internal_date)
            .arg(record.uid.to_string())
            .arg(record.status.to_string())
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Sink(format!("cannot spawn {}: {e}", self.program)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&record.body)
                .await
                .map_err(|e| Error::Sink(format!("cannot write to {}: {e}", self.program)))?;
            stdin
                .shutdown()
                .await
                .map_err(|e| Error::Sink(format!("cannot close stdin of {}: {e}", self.program)))?;
            drop(stdin);
        }

        let status = child
            .wait()
            .await
            .map_err(|e| Error::Sink(format!("cannot wait for {}: {e}", self.program)))?;

        if !status.success() {
            return Err(Error::Sink(format!(
                "{} exited with {status}",
                self.program
            )));
        }

        Ok(())
    }
}
