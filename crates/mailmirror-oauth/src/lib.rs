//! # mailmirror-oauth
//!
//! `OAuth2` support for IMAP bearer-token authentication: the XOAUTH2 SASL
//! payload format and a refresh-token client for obtaining access tokens
//! from a provider's token endpoint.
//!
//! Only the refresh-token grant is implemented; interactive authorization
//! flows are expected to have happened elsewhere, this crate just keeps a
//! long-running mirror supplied with fresh bearer tokens.

mod error;
pub mod sasl;
mod token;

pub use error::{Error, Result};
pub use sasl::{Challenge, decode_challenge, xoauth2_response};
pub use token::{ErrorResponse, RefreshRequest, TokenResponse, refresh_access_token};
