//! # mailmirror-core
//!
//! The incremental mirroring engine: UID-window discovery, streaming fetch
//! with durable per-message checkpointing, IDLE push waits with reconnect
//! recovery, and the delivery sinks (append-only mbox or a subprocess).
//!
//! The engine never mutates remote state: folders are opened with EXAMINE
//! and the checkpoint only ever moves forward.

mod checkpoint;
mod engine;
mod error;
mod record;
mod sink;

pub use checkpoint::Checkpoint;
pub use engine::{AuthMethod, Engine, FolderSpec, MirrorConfig};
pub use error::{Error, Result};
pub use record::{MessageStatus, Record};
pub use sink::{CommandSink, MboxSink, Sink};
