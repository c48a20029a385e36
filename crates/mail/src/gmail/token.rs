//! Access token providers
//!
//! Obtaining OAuth tokens happens outside Sieve. The client only needs a
//! bearer token per request, supplied by one of these providers.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Source of bearer tokens for Gmail API calls
pub trait TokenProvider: Send + Sync {
    /// Return a currently valid access token
    fn access_token(&self) -> Result<String>;
}

/// A fixed token, typically from the environment
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Read the token from an environment variable
    pub fn from_env(var: &str) -> Result<Self> {
        let token = std::env::var(var).with_context(|| format!("{var} environment variable not set"))?;
        if token.trim().is_empty() {
            bail!("{var} is empty");
        }
        Ok(Self(token.trim().to_string()))
    }
}

impl TokenProvider for StaticToken {
    fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Token cache file as written by the OAuth helper
#[derive(Debug, Serialize, Deserialize)]
struct StoredToken {
    access_token: String,
    refresh_token: Option<String>,
    /// Unix timestamp (seconds)
    expires_at: Option<i64>,
}

/// Reads the token from a JSON cache file on every call
pub struct TokenFile {
    path: PathBuf,
}

impl TokenFile {
    /// Default cache filename in the config directory
    pub const FILENAME: &'static str = "gmail-tokens.json";

    /// Refuse tokens expiring within this many seconds
    const EXPIRY_BUFFER_SECS: i64 = 300;

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Token file in the Sieve config directory
    pub fn default_location() -> Result<Self> {
        let path = config::config_path(Self::FILENAME).context("Could not determine config directory")?;
        Ok(Self::new(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenProvider for TokenFile {
    fn access_token(&self) -> Result<String> {
        let token: StoredToken = config::load_json_file(&self.path)?;
        if let Some(expires_at) = token.expires_at {
            let now = chrono::Utc::now().timestamp();
            if expires_at <= now + Self::EXPIRY_BUFFER_SECS {
                bail!(
                    "Access token in {} has expired; refresh it and retry",
                    self.path.display()
                );
            }
        }
        Ok(token.access_token)
    }
}
