//! Runtime settings for a harvest run
//!
//! Settings are loaded (in order of priority) from:
//! 1. Environment variables (`SIEVE_*`)
//! 2. JSON file (`sieve.json` in the config directory)
//! 3. Built-in defaults

use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::classify::{ClassifyOptions, GeminiClassifier};
use crate::sync::{FetchOptions, HarvestOptions};

/// Settings filename in the Sieve config directory
pub const SETTINGS_FILE: &str = "sieve.json";

/// Database filename used when no path is configured
const DEFAULT_DB_FILE: &str = "emails.db";

/// The Gmail batch endpoint rejects more than 100 parts
const MAX_BATCH_SIZE: usize = 100;

/// More parallel batches only trade throughput for throttling
const MAX_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Gmail search query; empty for the whole mailbox
    pub query: String,
    /// SQLite database path; defaults to `emails.db` in the config directory
    pub db_path: Option<PathBuf>,
    /// Skip messages that are already stored
    pub skip_existing: bool,

    pub batch_size: usize,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub jitter_max_ms: u64,
    pub pacing_ms: u64,
    pub concurrency: usize,
    pub max_rounds: Option<usize>,
    pub deadline_secs: Option<u64>,
    pub seed: Option<u64>,

    pub gemini_model: String,
    pub classify_chunk_size: usize,
    pub classify_max_resubmits: usize,

    /// Put NOT IMPORTANT messages under the review label
    pub apply_review_label: bool,
    /// Move freshly labeled messages to trash
    pub move_to_trash: bool,
    /// Also write the unsubscribe report as CSV to this path
    pub unsubscribe_csv: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        let fetch = FetchOptions::default();
        let classify = ClassifyOptions::default();
        Self {
            query: String::new(),
            db_path: None,
            skip_existing: false,
            batch_size: fetch.batch_size,
            max_attempts: fetch.max_attempts_per_batch,
            backoff_base_ms: fetch.backoff_base.as_millis() as u64,
            jitter_max_ms: fetch.jitter_max.as_millis() as u64,
            pacing_ms: fetch.pacing.as_millis() as u64,
            concurrency: fetch.concurrency,
            max_rounds: None,
            deadline_secs: None,
            seed: None,
            gemini_model: GeminiClassifier::DEFAULT_MODEL.to_string(),
            classify_chunk_size: classify.chunk_size,
            classify_max_resubmits: classify.max_resubmits,
            apply_review_label: false,
            move_to_trash: false,
            unsubscribe_csv: None,
        }
    }
}

impl Settings {
    /// Load settings from the config file and the process environment
    pub fn load() -> Result<Self> {
        let mut settings: Settings = config::load_json_opt(SETTINGS_FILE)?.unwrap_or_default();
        settings.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(settings.sanitized())
    }

    /// Apply `SIEVE_*` overrides from a key lookup
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(query) = lookup("SIEVE_QUERY") {
            self.query = query;
        }
        if let Some(path) = get("SIEVE_DB_PATH") {
            self.db_path = Some(PathBuf::from(path));
        }
        if let Some(v) = get("SIEVE_BATCH_SIZE") {
            self.batch_size = parse_var("SIEVE_BATCH_SIZE", &v)?;
        }
        if let Some(v) = get("SIEVE_MAX_ATTEMPTS") {
            self.max_attempts = parse_var("SIEVE_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("SIEVE_CONCURRENCY") {
            self.concurrency = parse_var("SIEVE_CONCURRENCY", &v)?;
        }
        if let Some(v) = get("SIEVE_MAX_ROUNDS") {
            self.max_rounds = Some(parse_var("SIEVE_MAX_ROUNDS", &v)?);
        }
        if let Some(v) = get("SIEVE_DEADLINE_SECS") {
            self.deadline_secs = Some(parse_var("SIEVE_DEADLINE_SECS", &v)?);
        }
        Ok(())
    }

    /// Clamp values the services would reject
    pub fn sanitized(mut self) -> Self {
        if self.batch_size == 0 {
            warn!("[CONFIG] batch_size 0 is invalid, using 1");
            self.batch_size = 1;
        }
        if self.batch_size > MAX_BATCH_SIZE {
            warn!(
                "[CONFIG] batch_size {} exceeds the Gmail limit, using {}",
                self.batch_size, MAX_BATCH_SIZE
            );
            self.batch_size = MAX_BATCH_SIZE;
        }
        self.max_attempts = self.max_attempts.max(1);
        self.concurrency = self.concurrency.max(1);
        if self.concurrency > MAX_CONCURRENCY {
            warn!(
                "[CONFIG] concurrency {} is too high, using {}",
                self.concurrency, MAX_CONCURRENCY
            );
            self.concurrency = MAX_CONCURRENCY;
        }
        self.classify_chunk_size = self.classify_chunk_size.max(1);
        self
    }

    /// Database path, falling back to the config directory
    pub fn db_path(&self) -> Result<PathBuf> {
        match &self.db_path {
            Some(path) => Ok(path.clone()),
            None => config::config_path(DEFAULT_DB_FILE).context("Could not determine config directory"),
        }
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            batch_size: self.batch_size,
            max_attempts_per_batch: self.max_attempts,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            jitter_max: Duration::from_millis(self.jitter_max_ms),
            pacing: Duration::from_millis(self.pacing_ms),
            concurrency: self.concurrency,
            max_rounds: self.max_rounds,
            max_duration: self.deadline_secs.map(Duration::from_secs),
            seed: self.seed,
        }
    }

    pub fn harvest_options(&self) -> HarvestOptions {
        HarvestOptions {
            query: self.query.clone(),
            skip_existing: self.skip_existing,
            fetch: self.fetch_options(),
        }
    }

    pub fn classify_options(&self) -> ClassifyOptions {
        ClassifyOptions {
            chunk_size: self.classify_chunk_size,
            max_resubmits: self.classify_max_resubmits,
            ..ClassifyOptions::default()
        }
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid value for {key}: {value:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_fetch_options() {
        let settings = Settings::default();
        assert_eq!(settings.fetch_options(), FetchOptions::default());
        assert!(!settings.apply_review_label);
        assert!(!settings.move_to_trash);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{ "query": "older_than:1y", "concurrency": 4 }"#).unwrap();
        assert_eq!(settings.query, "older_than:1y");
        assert_eq!(settings.concurrency, 4);
        assert_eq!(settings.batch_size, 50);
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = Settings::default();
        settings
            .apply_overrides(lookup(&[
                ("SIEVE_BATCH_SIZE", "25"),
                ("SIEVE_MAX_ATTEMPTS", "7"),
                ("SIEVE_QUERY", "in:inbox"),
                ("SIEVE_DB_PATH", "/tmp/x.db"),
                ("SIEVE_MAX_ROUNDS", "12"),
                ("SIEVE_DEADLINE_SECS", "600"),
                ("SIEVE_CONCURRENCY", ""),
            ]))
            .unwrap();

        assert_eq!(settings.batch_size, 25);
        assert_eq!(settings.max_attempts, 7);
        assert_eq!(settings.query, "in:inbox");
        assert_eq!(settings.db_path().unwrap(), PathBuf::from("/tmp/x.db"));
        assert_eq!(settings.concurrency, 1);

        let options = settings.fetch_options();
        assert_eq!(options.max_rounds, Some(12));
        assert_eq!(options.max_duration, Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_invalid_override_is_an_error() {
        let mut settings = Settings::default();
        let err = settings
            .apply_overrides(lookup(&[("SIEVE_BATCH_SIZE", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("SIEVE_BATCH_SIZE"));
    }

    #[test]
    fn test_sanitized_clamps() {
        let settings = Settings {
            batch_size: 500,
            max_attempts: 0,
            concurrency: 0,
            ..Settings::default()
        }
        .sanitized();
        assert_eq!(settings.batch_size, 100);
        assert_eq!(settings.max_attempts, 1);
        assert_eq!(settings.concurrency, 1);
    }

    #[test]
    fn test_sanitized_caps_concurrency() {
        let settings = Settings {
            concurrency: 64,
            ..Settings::default()
        }
        .sanitized();
        assert_eq!(settings.concurrency, 8);
        assert_eq!(settings.fetch_options().concurrency, 8);
    }
}
