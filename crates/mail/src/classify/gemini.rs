//! Gemini `generateContent` classifier
//!
//! Synchronous HTTP (ureq), like the Gmail client.

use anyhow::{Context, Result, anyhow, bail};
use log::{debug, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::Classifier;
use super::prompt::{ClassifyRow, build_prompt, parse_classifications};
use crate::models::{Label, MessageId};

/// Environment variable holding the API key
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Classifies messages with a Gemini model
pub struct GeminiClassifier {
    api_key: String,
    model: String,
    agent: ureq::Agent,
    base_url: String,
    attempts: u32,
    retry_pause: Duration,
}

impl GeminiClassifier {
    const BASE_URL: &'static str = "https://generativelanguage.googleapis.com/v1beta";
    pub const DEFAULT_MODEL: &'static str = "gemini-2.5-flash";
    const TIMEOUT: Duration = Duration::from_secs(120);

    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Self::TIMEOUT))
            .http_status_as_error(false)
            .build()
            .into();

        Self {
            api_key: api_key.into(),
            model: model.into(),
            agent,
            base_url: Self::BASE_URL.to_string(),
            attempts: 3,
            retry_pause: Duration::from_secs(2),
        }
    }

    /// Build from `GEMINI_API_KEY`, or `None` when it is unset or empty
    pub fn from_env(model: impl Into<String>) -> Option<Self> {
        let key = std::env::var(API_KEY_ENV).ok().filter(|k| !k.trim().is_empty())?;
        Some(Self::new(key, model))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry_pause(mut self, pause: Duration) -> Self {
        self.retry_pause = pause;
        self
    }

    /// Send one prompt and return the first candidate
    fn generate(&self, prompt: &str, temperature: f32) -> Result<Candidate> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let request = GenerateRequest::new(prompt, temperature);

        let mut response = self
            .agent
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .send_json(&request)
            .context("Failed to send generateContent request")?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.body_mut().read_to_string().unwrap_or_default();
            bail!(
                "Gemini request failed: HTTP {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            );
        }

        let parsed: GenerateResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse generateContent response")?;
        parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No candidates returned"))
    }
}

impl Classifier for GeminiClassifier {
    /// Up to three attempts with rising temperature. A recitation stop
    /// retags the prompt before the next attempt.
    fn classify(&self, rows: &[ClassifyRow]) -> Result<HashMap<MessageId, Label>> {
        if rows.is_empty() {
            return Ok(HashMap::new());
        }

        let mut rng = rand::rng();
        let mut tag = format!("_batch_{}", rng.random_range(1000..10000));
        let mut last_error = None;

        for attempt in 0..self.attempts {
            let prompt = build_prompt(rows, &tag);
            let temperature = 0.1 + 0.1 * attempt as f32;

            match self.generate(&prompt, temperature) {
                Ok(candidate) if candidate.is_recitation() => {
                    warn!(
                        "[CLASSIFY] Attempt {}: recitation detected, retrying with a modified prompt",
                        attempt + 1
                    );
                    tag = format!("_retry_{}_{}", attempt, rng.random_range(100..1000));
                }
                Ok(candidate) => {
                    let text = candidate.text();
                    if text.trim().is_empty() {
                        warn!("[CLASSIFY] Attempt {}: empty answer", attempt + 1);
                    } else {
                        debug!("[CLASSIFY] Answer:\n{}", text);
                        return Ok(parse_classifications(&text, rows.len())
                            .into_iter()
                            .map(|(i, label)| (rows[i].id.clone(), label))
                            .collect());
                    }
                }
                Err(e) => {
                    warn!("[CLASSIFY] Attempt {} failed: {:#}", attempt + 1, e);
                    last_error = Some(e);
                }
            }

            if attempt + 1 < self.attempts && !self.retry_pause.is_zero() {
                std::thread::sleep(self.retry_pause);
            }
        }

        match last_error {
            Some(e) => Err(e.context(format!("Classification failed after {} attempts", self.attempts))),
            None => Ok(HashMap::new()),
        }
    }
}

// === Wire types ===

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

impl<'a> GenerateRequest<'a> {
    fn new(prompt: &'a str, temperature: f32) -> Self {
        let safety_settings = [
            "HARM_CATEGORY_HARASSMENT",
            "HARM_CATEGORY_HATE_SPEECH",
            "HARM_CATEGORY_SEXUALLY_EXPLICIT",
            "HARM_CATEGORY_DANGEROUS_CONTENT",
        ]
        .into_iter()
        .map(|category| SafetySetting {
            category,
            threshold: "BLOCK_NONE",
        })
        .collect();

        Self {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature,
                top_p: 0.8,
                top_k: 20,
            },
            safety_settings,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl Candidate {
    fn is_recitation(&self) -> bool {
        self.finish_reason.as_deref() == Some("RECITATION")
    }

    /// Text of the first part
    fn text(&self) -> String {
        self.content
            .as_ref()
            .and_then(|c| c.parts.first())
            .and_then(|p| p.text.clone())
            .unwrap_or_default()
    }
}
