//! Sieve - bulk Gmail metadata harvester and triage
//!
//! Harvests metadata for every message matching the configured query into
//! SQLite, classifies it, optionally files low-priority mail for review and
//! prints the unsubscribe report. Runs without prompts; everything is driven
//! by `sieve.json` and `SIEVE_*` environment variables.

use std::fs::File;
use std::io::BufWriter;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{error, info, warn};
use mail::classify::API_KEY_ENV;
use mail::sync::ThreadSleeper;
use mail::{
    CancelToken, GeminiClassifier, GmailClient, RecordStore, ReviewActions, Settings, SqliteStore,
    StaticToken, StopReason, TokenFile, TokenProvider, classify_pending, harvest,
    render_unsubscribe_report, unsubscribe_report, write_unsubscribe_csv,
};

/// Environment variable with a ready-to-use Gmail access token
const ACCESS_TOKEN_ENV: &str = "GMAIL_ACCESS_TOKEN";

fn main() -> ExitCode {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    // Bootstrap config directory
    if let Err(e) = config::init() {
        warn!("Failed to initialize config directory: {}", e);
    }

    let settings = Settings::load().context("Failed to load settings")?;
    let tokens = token_provider()?;
    let client = Arc::new(GmailClient::new(tokens));

    let db_path = settings.db_path()?;
    info!("Using database {}", db_path.display());
    let store: Arc<dyn RecordStore> = Arc::new(SqliteStore::new(&db_path)?);

    // 1. Harvest
    let cancel = CancelToken::new();
    let stats = harvest(client.as_ref(), store.as_ref(), &settings.harvest_options(), &cancel)?;
    for (id, reason) in &stats.failures {
        warn!("Not fetched: {} ({})", id, reason);
    }
    if stats.stop != StopReason::Completed {
        warn!(
            "Harvest stopped early ({:?}); re-run to pick up the remaining messages",
            stats.stop
        );
    }

    // 2. Classify
    match GeminiClassifier::from_env(settings.gemini_model.clone()) {
        Some(classifier) => {
            let result = classify_pending(
                store.as_ref(),
                &classifier,
                &settings.classify_options(),
                &ThreadSleeper,
            );
            match result {
                Ok(stats) => info!("Classified {} messages", stats.classified),
                Err(e) => warn!("Classification incomplete: {}", e),
            }
        }
        None => info!("{} not set, skipping classification", API_KEY_ENV),
    }

    // 3. Review actions
    if settings.apply_review_label {
        let actions = ReviewActions::new(client.clone(), store.clone());
        let label_id = actions.ensure_review_label()?;
        let labeled = actions.label_not_important(&label_id)?;
        if settings.move_to_trash && !labeled.is_empty() {
            let outcome = actions.move_to_trash(&labeled);
            if outcome.failed_chunks > 0 {
                warn!("{} trash chunks failed", outcome.failed_chunks);
            }
        }
    } else if settings.move_to_trash {
        warn!("move_to_trash requires apply_review_label; nothing moved");
    }

    // 4. Unsubscribe report
    let links = unsubscribe_report(store.as_ref())?;
    print!("{}", render_unsubscribe_report(&links));
    if let Some(path) = &settings.unsubscribe_csv {
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        write_unsubscribe_csv(&links, BufWriter::new(file))?;
        info!("Exported {} unsubscribe links to {}", links.len(), path.display());
    }

    Ok(())
}

/// Access token from the environment, else the token file in the config dir
fn token_provider() -> Result<Arc<dyn TokenProvider>> {
    if std::env::var(ACCESS_TOKEN_ENV).is_ok_and(|t| !t.trim().is_empty()) {
        return Ok(Arc::new(StaticToken::from_env(ACCESS_TOKEN_ENV)?));
    }

    let file = TokenFile::default_location()?;
    if !file.path().exists() {
        anyhow::bail!(
            "No Gmail access token. Set {} or place a token file at {}",
            ACCESS_TOKEN_ENV,
            file.path().display()
        );
    }
    Ok(Arc::new(file))
}
