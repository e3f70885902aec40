//! Configuration file parsing.
//!
//! The target directory holds a `config` file with `key=value` lines, `#`
//! comments and blank lines. Keys are lower-cased; unknown keys are kept
//! but unused so configs can be shared with other tools.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use thiserror::Error;

use mailmirror_core::{AuthMethod, FolderSpec, MirrorConfig};
use mailmirror_oauth::RefreshRequest;

/// Name of the configuration file inside the target directory.
const CONFIG_FILE: &str = "config";

/// Configuration errors; every variant renders as one line.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file cannot be read.
    #[error("cannot read {path}: {source}")]
    Unreadable {
        /// Offending path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A line is not `key=value`, a comment or blank.
    #[error("{path}:{line}: expected key=value")]
    Malformed {
        /// Offending path.
        path: String,
        /// 1-based line number.
        line: usize,
    },

    /// A required key is absent.
    #[error("missing required option: {0}")]
    Missing(&'static str),

    /// The credential options conflict.
    #[error("exactly one of pass, xoauth2_request_url, xoauth2_access_token must be set")]
    AmbiguousCredentials,

    /// `xoauth2_request_url` lacks its companion options.
    #[error("xoauth2_request_url requires {0}")]
    IncompleteOAuth(&'static str),

    /// The port is not a number.
    #[error("invalid port: {0}")]
    InvalidPort(String),

    /// Neither folder nor folder_flag is configured.
    #[error("one of folder, folder_flag must be set")]
    NoFolder,
}

/// Fully validated run configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Engine configuration handed to the sync core.
    pub mirror: MirrorConfig,
    /// Optional delivery command; mbox is used when absent.
    pub command: Option<String>,
}

impl Config {
    /// Loads and validates `<dir>/config`.
    ///
    /// # Errors
    ///
    /// Returns a one-line [`ConfigError`] on unreadable files, malformed
    /// lines, or invalid option combinations.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(CONFIG_FILE);
        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Unreadable {
            path: path.display().to_string(),
            source,
        })?;

        let raw = parse_lines(&contents, &path.display().to_string())?;
        Self::from_map(&raw)
    }

    fn from_map(raw: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let server = raw
            .get("server")
            .cloned()
            .ok_or(ConfigError::Missing("server"))?;
        let user = raw
            .get("user")
            .cloned()
            .ok_or(ConfigError::Missing("user"))?;

        let ssl = raw.get("ssl").is_some_and(|v| is_truthy(v));
        let port = match raw.get("port") {
            Some(v) => v
                .parse()
                .map_err(|_| ConfigError::InvalidPort(v.clone()))?,
            None if ssl => 993,
            None => 143,
        };

        let auth = credentials(raw)?;

        let folder = if let Some(name) = raw.get("folder") {
            FolderSpec::Name(name.clone())
        } else if let Some(flag) = raw.get("folder_flag") {
            FolderSpec::Flag(flag.clone())
        } else {
            return Err(ConfigError::NoFolder);
        };

        Ok(Self {
            mirror: MirrorConfig {
                server,
                port,
                ssl,
                user,
                auth,
                folder,
            },
            command: raw.get("command").cloned(),
        })
    }
}

/// Picks exactly one credential source.
fn credentials(raw: &HashMap<String, String>) -> Result<AuthMethod, ConfigError> {
    let pass = raw.get("pass");
    let token = raw.get("xoauth2_access_token");
    let url = raw.get("xoauth2_request_url");

    let configured = [pass.is_some(), token.is_some(), url.is_some()]
        .iter()
        .filter(|&&b| b)
        .count();
    if configured != 1 {
        return Err(ConfigError::AmbiguousCredentials);
    }

    if let Some(pass) = pass {
        return Ok(AuthMethod::Password(pass.clone()));
    }
    if let Some(token) = token {
        return Ok(AuthMethod::XOAuth2Token(token.clone()));
    }

    let url = url.map_or_else(String::new, Clone::clone);
    let client_id = raw
        .get("xoauth2_client_id")
        .ok_or(ConfigError::IncompleteOAuth("xoauth2_client_id"))?;
    let client_secret = raw
        .get("xoauth2_client_secret")
        .ok_or(ConfigError::IncompleteOAuth("xoauth2_client_secret"))?;
    let refresh_token = raw
        .get("xoauth2_refresh_token")
        .ok_or(ConfigError::IncompleteOAuth("xoauth2_refresh_token"))?;

    Ok(AuthMethod::XOAuth2Refresh(RefreshRequest {
        url,
        client_id: client_id.clone(),
        client_secret: client_secret.clone(),
        refresh_token: refresh_token.clone(),
    }))
}

/// Parses `key=value` lines; keys are lower-cased, values kept verbatim.
fn parse_lines(
    contents: &str,
    path: &str,
) -> Result<HashMap<String, String>, ConfigError> {
    let mut map = HashMap::new();

    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            return Err(ConfigError::Malformed {
                path: path.to_string(),
                line: idx + 1,
            });
        };

        map.insert(
            key.trim().to_ascii_lowercase(),
            value.trim().to_string(),
        );
    }

    Ok(map)
}

/// Accepted spellings for an enabled boolean option.
fn is_truthy(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
