use serde::Deserialize;
use std::env;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const KEY_VAR: &str = "BOTTLE_API_KEY";
pub const SECRET_VAR: &str = "BOTTLE_API_SECRET";
pub const DEFAULT_PATH: &str = "api_credentials.json";

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("error opening {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("ill-formed credentials file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("credentials file provides an empty API key or secret")]
    Empty,
}

/// API key and secret for the inventory service.
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    #[serde(rename = "api_key")]
    key: String,
    #[serde(rename = "api_secret")]
    secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Credentials {
            key: key.into(),
            secret: secret.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Environment variables take precedence over the file, but only when both are set.
    pub fn load(path: &Path) -> Result<Self, CredentialsError> {
        if let Some(credentials) =
            Credentials::from_values(env::var(KEY_VAR).ok(), env::var(SECRET_VAR).ok())
        {
            log::info!("Using API key provided in environment variables");
            return Ok(credentials);
        }
        log::info!(
            "Opening API key expected to be provided in {}",
            path.display()
        );
        let credentials = Credentials::from_file(path)?;
        log::info!("Using API key provided in {}", path.display());
        Ok(credentials)
    }

    pub fn from_values(key: Option<String>, secret: Option<String>) -> Option<Self> {
        match (key, secret) {
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => {
                Some(Credentials { key, secret })
            }
            _ => None,
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, CredentialsError> {
        let contents = fs::read_to_string(path).map_err(|source| CredentialsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Credentials::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, CredentialsError> {
        let credentials: Credentials = serde_json::from_str(contents)?;
        if credentials.key.is_empty() || credentials.secret.is_empty() {
            return Err(CredentialsError::Empty);
        }
        Ok(credentials)
    }
}
