//! Refresh-token grant against an `OAuth2` token endpoint.

use std::collections::HashMap;

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Successful token response from the endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// The bearer access token.
    pub access_token: String,
    /// Token type (usually "Bearer").
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<u32>,
}

/// Error response from the endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    /// Error code.
    pub error: String,
    /// Human-readable description.
    #[serde(default)]
    pub error_description: String,
}

impl ErrorResponse {
    /// Converts to an Error.
    #[must_use]
    pub fn into_error(self) -> Error {
        Error::oauth_error(self.error, self.error_description)
    }
}

/// Client credentials for the refresh-token grant.
#[derive(Debug, Clone)]
pub struct RefreshRequest {
    /// Token endpoint URL.
    pub url: String,
    /// Client ID issued by the provider.
    pub client_id: String,
    /// Client secret issued by the provider.
    pub client_secret: String,
    /// Long-lived refresh token.
    pub refresh_token: String,
}

/// Exchanges a refresh token for a fresh access token.
///
/// POSTs the form fields `client_id`, `client_secret`, `refresh_token` and
/// `grant_type=refresh_token` and expects JSON carrying `access_token`.
///
/// # Errors
///
/// Returns an error on transport failure, on an endpoint error body
/// (`error`/`error_description`), or when the response has no usable
/// `access_token`.
pub async fn refresh_access_token(request: &RefreshRequest) -> Result<String> {
    let mut params = HashMap::new();
    params.insert("client_id", request.client_id.as_str());
    params.insert("client_secret", request.client_secret.as_str());
    params.insert("refresh_token", request.refresh_token.as_str());
    params.insert("grant_type", "refresh_token");

    debug!(url = %request.url, "requesting access token");

    let response = Client::new()
        .post(&request.url)
        .form(&params)
        .send()
        .await?;

    if !response.status().is_success() {
        let error: ErrorResponse = response.json().await?;
        return Err(error.into_error());
    }

    let body = response.text().await?;
    parse_token_response(&body)
}

/// Parses the endpoint body, accepting error bodies served with HTTP 200.
fn parse_token_response(body: &str) -> Result<String> {
    if let Ok(error) = serde_json::from_str::<ErrorResponse>(body) {
        return Err(error.into_error());
    }

    let token: TokenResponse = serde_json::from_str(body)?;
    if token.access_token.is_empty() {
        return Err(Error::InvalidResponse("empty access_token".to_string()));
    }
    Ok(token.access_token)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_token_response() {
        let body = r#"{"access_token":"ya29.abc","token_type":"Bearer","expires_in":3599}"#;
        assert_eq!(parse_token_response(body).unwrap(), "ya29.abc");
    }

    #[test]
    fn test_parse_minimal_response() {
        let body = r#"{"access_token":"t"}"#;
        assert_eq!(parse_token_response(body).unwrap(), "t");
    }

    #[test]
    fn test_parse_error_response() {
        let body = r#"{"error":"invalid_grant","error_description":"Token has been expired"}"#;
        let err = parse_token_response(body).unwrap_err();
        assert!(matches!(err, Error::OAuth { error, .. } if error == "invalid_grant"));
    }

    #[test]
    fn test_parse_empty_token_rejected() {
        let body = r#"{"access_token":""}"#;
        assert!(matches!(
            parse_token_response(body).unwrap_err(),
            Error::InvalidResponse(_)
        ));
    }

    #[test]
    fn test_parse_garbage_is_json_error() {
        assert!(matches!(
            parse_token_response("<html>").unwrap_err(),
            Error::Json(_)
        ));
    }
}
