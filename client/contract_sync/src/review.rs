//! AI-review boundary.
//!
//! A draft project is scored 0–100 by an external generative-AI service
//! before it may reach the contract. The provider gives no retry or
//! idempotence guarantee, so a review is requested exactly once per
//! submission attempt.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::{Result, SyncError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    pub name: String,
    pub description: String,
    pub milestones: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewVerdict {
    pub approved: bool,
    /// Always within 0–100.
    pub score: u8,
    pub feedback: String,
    pub suggestions: Vec<String>,
}

impl ReviewVerdict {
    /// Refuse verdicts scoring below `minimum`.
    pub fn require(&self, minimum: u8) -> Result<()> {
        if self.score < minimum {
            return Err(SyncError::ReviewBelowThreshold {
                score: self.score,
                minimum,
            });
        }
        Ok(())
    }
}

#[async_trait]
pub trait ReviewService: Send + Sync {
    async fn review(&self, request: &ReviewRequest) -> Result<ReviewVerdict>;
}

/// The provider's answer, before the score is normalised.
#[derive(Debug, Deserialize)]
struct RawVerdict {
    #[serde(default)]
    approved: bool,
    score: f64,
    #[serde(default)]
    feedback: String,
    #[serde(default)]
    suggestions: Vec<String>,
}

impl From<RawVerdict> for ReviewVerdict {
    fn from(raw: RawVerdict) -> Self {
        let score = if raw.score.is_finite() {
            raw.score.round().clamp(0.0, 100.0) as u8
        } else {
            0
        };
        Self {
            approved: raw.approved,
            score,
            feedback: raw.feedback,
            suggestions: raw.suggestions,
        }
    }
}

/// JSON-over-HTTP review service.
pub struct HttpReviewService {
    client: Client,
    url: String,
    api_key: Option<String>,
}

impl HttpReviewService {
    pub fn new(url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            url: url.to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl ReviewService for HttpReviewService {
    async fn review(&self, request: &ReviewRequest) -> Result<ReviewVerdict> {
        let mut req = self.client.post(&self.url).json(request);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| SyncError::Review(format!("request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(SyncError::Review(format!("HTTP {}", resp.status())));
        }
        let raw: RawVerdict = resp
            .json()
            .await
            .map_err(|e| SyncError::Review(format!("unreadable verdict: {e}")))?;

        let verdict = ReviewVerdict::from(raw);
        info!("Review of {:?} scored {}", request.name, verdict.score);
        Ok(verdict)
    }
}
