//! Scoring providers
//!
//! The processor tries the optional [`VendorScorer`] first and falls back to the
//! always-available [`LocalScorer`]. Both honour a [`CancellationToken`].

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::time::Duration;
use strum::Display;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::check::options::ReportOptions;
use crate::core::config;

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("scorer unavailable: {0}")]
    Unavailable(String),
    #[error("scorer timed out after {0:?}")]
    Timeout(Duration),
    #[error("scoring cancelled")]
    Cancelled,
    #[error("vendor error: {0}")]
    Vendor(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which provider produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ScoreSource {
    Vendor,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scores {
    /// 0-100
    pub similarity: u8,
    /// 0-100
    pub ai: u8,
    pub source: ScoreSource,
}

/// A downloaded document ready for scoring
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    pub filename: String,
    pub options: ReportOptions,
}

#[async_trait]
pub trait ScoringProvider: Send + Sync {
    fn source(&self) -> ScoreSource;

    async fn score(&self, document: &Document, cancel: &CancellationToken) -> Result<Scores, ScoringError>;
}

#[derive(Debug, Deserialize)]
struct VendorResponse {
    similarity: f64,
    ai: f64,
}

fn clamp_percent(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 100.0) as u8
}

/// Best-effort external vendor: multipart upload, JSON `{similarity, ai}` back.
pub struct VendorScorer {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<SecretString>,
    timeout: Duration,
}

impl VendorScorer {
    pub fn new(endpoint: impl Into<String>, api_key: Option<SecretString>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
            timeout,
        }
    }

    /// `None` when VENDOR_API_URL is not configured
    pub fn from_config() -> Option<Self> {
        config::vendor::API_URL
            .as_ref()
            .map(|url| Self::new(url.clone(), config::vendor::API_KEY.clone(), config::vendor::timeout()))
    }

    async fn request(&self, document: &Document) -> Result<Scores, ScoringError> {
        let bytes = tokio::fs::read(&document.path).await?;
        let part = reqwest::multipart::Part::bytes(bytes).file_name(document.filename.clone());
        let flag = |b: bool| if b { "yes" } else { "no" };
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("exclude_bibliography", flag(document.options.exclude_bibliography))
            .text("exclude_quotes", flag(document.options.exclude_quotes))
            .text("exclude_citations", flag(document.options.exclude_citations))
            .text("exclude_small_matches", flag(document.options.exclude_small_matches));

        let mut request = self.client.post(&self.endpoint).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ScoringError::Unavailable(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScoringError::Vendor(format!("HTTP {}", status)));
        }
        let body: VendorResponse = response
            .json()
            .await
            .map_err(|e| ScoringError::Vendor(format!("bad response: {}", e)))?;

        Ok(Scores {
            similarity: clamp_percent(body.similarity),
            ai: clamp_percent(body.ai),
            source: ScoreSource::Vendor,
        })
    }
}

#[async_trait]
impl ScoringProvider for VendorScorer {
    fn source(&self) -> ScoreSource {
        ScoreSource::Vendor
    }

    async fn score(&self, document: &Document, cancel: &CancellationToken) -> Result<Scores, ScoringError> {
        if cancel.is_cancelled() {
            return Err(ScoringError::Cancelled);
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(ScoringError::Cancelled),
            result = tokio::time::timeout(self.timeout, self.request(document)) => {
                result.map_err(|_| ScoringError::Timeout(self.timeout))?
            }
        }
    }
}

/// Deterministic fallback: scores derived from the SHA-256 of the file contents.
///
/// Each exclusion option lowers similarity by a content-derived amount.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalScorer;

impl LocalScorer {
    pub fn scores_for(content: &[u8], options: &ReportOptions) -> Scores {
        let digest = Sha256::digest(content);
        let raw_similarity = u16::from_be_bytes([digest[0], digest[1]]) % 61 + 5;
        let step = u16::from(digest[2] % 4) + 2;
        let reduction = u16::from(options.excluded_count()) * step;
        let similarity = raw_similarity.saturating_sub(reduction);
        let ai = u16::from_be_bytes([digest[3], digest[4]]) % 101;

        Scores {
            similarity: similarity as u8,
            ai: ai as u8,
            source: ScoreSource::Local,
        }
    }
}

#[async_trait]
impl ScoringProvider for LocalScorer {
    fn source(&self) -> ScoreSource {
        ScoreSource::Local
    }

    async fn score(&self, document: &Document, cancel: &CancellationToken) -> Result<Scores, ScoringError> {
        if cancel.is_cancelled() {
            return Err(ScoringError::Cancelled);
        }
        let content = tokio::fs::read(&document.path).await?;
        Ok(Self::scores_for(&content, &document.options))
    }
}
