//! Configuration module for JMAP credentials and server settings
//!
//! All configuration is loaded from environment variables following the pattern
//! `MAIL_JMAP_<KEY>`. An optional JSON config file (pointed at by
//! `MAIL_JMAP_CONFIG_FILE`) supplies fallback values for variables left unset.

use std::env;
use std::env::VarError;
use std::fs;

use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

use crate::errors::{AppError, AppResult};

/// JMAP account credentials
///
/// Holds everything needed to bootstrap a session against a JMAP service.
/// Secrets are stored using `SecretString` to prevent accidental logging.
/// Immutable once handed to a client instance.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Base service URL (scheme + host, no trailing slash)
    pub base_url: String,
    /// Username for HTTP basic authentication
    pub username: String,
    /// Secret stored in a type that prevents accidental logging
    pub secret: SecretString,
    /// Explicit account identifier override (wins over session discovery)
    pub account_id: Option<String>,
}

/// Server-wide configuration
///
/// Wraps startup credentials (if any) and global settings. Credentials may
/// also arrive later via the `jmap_connect` tool, so their absence at startup
/// is not an error.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Credentials resolved at startup, if the environment supplied them
    pub credentials: Option<Credentials>,
    /// HTTP request timeout in milliseconds
    pub http_timeout_ms: u64,
}

/// Optional JSON config file shape
///
/// Every field is optional; present fields fill in environment variables
/// that were left unset.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    base_url: Option<String>,
    username: Option<String>,
    secret: Option<String>,
    account_id: Option<String>,
}

impl ServerConfig {
    /// Load all configuration from environment variables
    ///
    /// Reads `MAIL_JMAP_BASE_URL`, `MAIL_JMAP_USER`, `MAIL_JMAP_SECRET`, and
    /// the optional `MAIL_JMAP_ACCOUNT_ID`. If `MAIL_JMAP_CONFIG_FILE` is set,
    /// the referenced JSON file provides fallbacks for unset variables.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if credentials are partially specified (some of
    /// base URL / user / secret but not all), if the base URL does not parse,
    /// or if the config file cannot be read or parsed.
    ///
    /// # Example Environment
    ///
    /// ```text
    /// MAIL_JMAP_BASE_URL=https://mail.example.com
    /// MAIL_JMAP_USER=user@example.com
    /// MAIL_JMAP_SECRET=app-password
    /// MAIL_JMAP_ACCOUNT_ID=u12345
    /// ```
    pub fn load_from_env() -> AppResult<Self> {
        let file = match optional_env("MAIL_JMAP_CONFIG_FILE")? {
            Some(path) => load_config_file(&path)?,
            None => ConfigFile::default(),
        };

        let base_url = optional_env("MAIL_JMAP_BASE_URL")?.or(file.base_url);
        let username = optional_env("MAIL_JMAP_USER")?.or(file.username);
        let secret = optional_env("MAIL_JMAP_SECRET")?.or(file.secret);
        let account_id = optional_env("MAIL_JMAP_ACCOUNT_ID")?.or(file.account_id);

        let credentials = match (base_url, username, secret) {
            (Some(base_url), Some(username), Some(secret)) => Some(Credentials::new(
                base_url,
                username,
                SecretString::new(secret.into()),
                account_id,
            )?),
            (None, None, None) => None,
            _ => {
                return Err(AppError::InvalidInput(
                    "incomplete credentials: MAIL_JMAP_BASE_URL, MAIL_JMAP_USER, and \
                     MAIL_JMAP_SECRET must all be set (or all omitted)"
                        .to_owned(),
                ));
            }
        };

        Ok(Self {
            credentials,
            http_timeout_ms: parse_u64_env("MAIL_JMAP_HTTP_TIMEOUT_MS", 30_000)?,
        })
    }
}

impl Credentials {
    /// Construct credentials, validating and normalizing the base URL
    ///
    /// Trailing slashes are stripped so discovery/API paths can be appended
    /// uniformly.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the base URL is not an absolute http(s) URL.
    pub fn new(
        base_url: String,
        username: String,
        secret: SecretString,
        account_id: Option<String>,
    ) -> AppResult<Self> {
        let parsed = Url::parse(&base_url)
            .map_err(|e| AppError::InvalidInput(format!("invalid base URL '{base_url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::InvalidInput(format!(
                "base URL must use http or https, got '{}'",
                parsed.scheme()
            )));
        }
        if parsed.host_str().is_none() {
            return Err(AppError::InvalidInput(format!(
                "base URL '{base_url}' has no host"
            )));
        }

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            username,
            secret,
            account_id: account_id.filter(|id| !id.trim().is_empty()),
        })
    }

    /// Host component of the base URL
    ///
    /// Used to default the sender domain when the username carries none.
    pub fn host(&self) -> AppResult<String> {
        let parsed = Url::parse(&self.base_url)
            .map_err(|e| AppError::Internal(format!("stored base URL failed to parse: {e}")))?;
        parsed
            .host_str()
            .map(str::to_owned)
            .ok_or_else(|| AppError::Internal("stored base URL has no host".to_owned()))
    }
}

/// Read and parse the JSON config file
fn load_config_file(path: &str) -> AppResult<ConfigFile> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::InvalidInput(format!("cannot read config file '{path}': {e}")))?;
    serde_json::from_str(&raw)
        .map_err(|e| AppError::InvalidInput(format!("cannot parse config file '{path}': {e}")))
}

/// Read an optional environment variable, treating empty values as unset
fn optional_env(key: &str) -> AppResult<Option<String>> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(Some(v)),
        Ok(_) | Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Parse a `u64` environment variable with default fallback
///
/// Returns `default` if unset.
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but not a valid `u64`.
fn parse_u64_env(key: &str, default: u64) -> AppResult<u64> {
    match env::var(key) {
        Ok(v) => v.parse::<u64>().map_err(|_| {
            AppError::InvalidInput(format!("invalid u64 environment variable {key}: '{v}'"))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}
