//! XOAUTH2 SASL payloads (Google/Microsoft bearer-token mechanism).

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;

/// Generates the XOAUTH2 initial response.
///
/// Format: `user=<user>\x01auth=Bearer <token>\x01\x01`, base64-encoded.
///
/// # Example
///
/// ```
/// use mailmirror_oauth::sasl::xoauth2_response;
///
/// let response = xoauth2_response("user@example.com", "ya29.a0...");
/// // Used with IMAP `AUTHENTICATE XOAUTH2 <response>` (SASL-IR).
/// ```
#[must_use]
pub fn xoauth2_response(user: &str, token: &str) -> String {
    let auth_string = format!("user={user}\x01auth=Bearer {token}\x01\x01");
    STANDARD.encode(auth_string.as_bytes())
}

/// Error challenge sent by servers on a rejected bearer token.
///
/// Challenges are base64-encoded JSON: `{"status":"401","schemes":"bearer",…}`.
#[derive(Debug, Clone, Deserialize)]
pub struct Challenge {
    /// HTTP-style status code as a string.
    pub status: String,
    /// Authentication schemes supported.
    #[serde(default)]
    pub schemes: String,
    /// Scope required.
    #[serde(default)]
    pub scope: Option<String>,
}

/// Decodes a `+` continuation payload and extracts a failure status.
///
/// Returns the `status` when the payload is base64-encoded JSON whose
/// status begins with `4` or `5`; anything else (including payloads that
/// are not base64 or not JSON) returns `None`.
#[must_use]
pub fn decode_challenge(payload: &str) -> Option<String> {
    let decoded = STANDARD.decode(payload.trim()).ok()?;
    let challenge: Challenge = serde_json::from_slice(&decoded).ok()?;
    if challenge.status.starts_with('4') || challenge.status.starts_with('5') {
        Some(challenge.status)
    } else {
        None
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_xoauth2_format() {
        let response = xoauth2_response("test@test.com", "abc");
        let decoded = STANDARD.decode(&response).unwrap();
        let decoded_str = String::from_utf8(decoded).unwrap();

        assert_eq!(decoded_str, "user=test@test.com\x01auth=Bearer abc\x01\x01");
    }

    #[test]
    fn test_response_is_base64_only() {
        let response = xoauth2_response("user@example.com", "token");
        assert!(!response.contains("user@example.com"));
        assert!(!response.contains("token"));
        assert!(STANDARD.decode(&response).is_ok());
    }

    #[test]
    fn test_decode_challenge_unauthorized() {
        let json = r#"{"status":"401","schemes":"bearer","scope":"https://mail.google.com/"}"#;
        let payload = STANDARD.encode(json);
        assert_eq!(decode_challenge(&payload).as_deref(), Some("401"));
    }

    #[test]
    fn test_decode_challenge_server_error() {
        let payload = STANDARD.encode(r#"{"status":"500"}"#);
        assert_eq!(decode_challenge(&payload).as_deref(), Some("500"));
    }

    #[test]
    fn test_decode_challenge_success_status_ignored() {
        let payload = STANDARD.encode(r#"{"status":"200"}"#);
        assert_eq!(decode_challenge(&payload), None);
    }

    #[test]
    fn test_decode_challenge_garbage_ignored() {
        assert_eq!(decode_challenge("not base64 at all!"), None);
        assert_eq!(decode_challenge(&STANDARD.encode("not json")), None);
    }
}
