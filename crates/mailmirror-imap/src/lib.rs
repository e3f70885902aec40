//! # mailmirror-imap
//!
//! A deliberately small IMAP4rev1 (RFC 3501) client engine: just enough
//! protocol for one-way mailbox mirroring.
//!
//! ## Features
//!
//! - **Serial tagged command channel**: one command in flight, decimal tags,
//!   pull-based reply classification
//! - **Generic response trees**: atoms, quoted strings, literal blocks and
//!   nested lists, parsed without a per-command grammar
//! - **Literal-safe framing**: `{N}` blocks are consumed byte-exact, CRLF
//!   and 8-bit content included
//! - **LOGIN and XOAUTH2**: password or bearer-token authentication with
//!   SASL initial responses
//! - **IDLE support**: RFC 2177 push waits with a refresh ceiling
//! - **TLS via rustls**: no OpenSSL dependency
//!
//! Commands beyond the mirroring subset (CAPABILITY, LOGIN/AUTHENTICATE,
//! LIST, EXAMINE, UID FETCH, IDLE, LOGOUT) are intentionally absent.

pub mod capability;
mod error;
pub mod folder;
pub mod framed;
pub mod idle;
pub mod parser;
pub mod session;
pub mod stream;
pub mod tag;

pub use capability::Capabilities;
pub use error::{Error, Result};
pub use framed::FramedStream;
pub use idle::{IdleHandle, IdleWait};
pub use parser::{Value, fetch_field};
pub use session::{Reply, Session};
pub use stream::{ImapStream, connect_plain, connect_tls};
pub use tag::TagSequence;

/// IMAP protocol version this engine targets.
pub const IMAP_VERSION: &str = "IMAP4rev1";
