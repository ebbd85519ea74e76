//! HTTP client for an external zero-shot classification service

use super::RiskModel;
use crate::error::{CareGraphError, Result};
use crate::state::LabelScore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Zero-shot multi-label classifier behind an inference endpoint
/// (Hugging Face inference protocol).
pub struct HttpRiskModel {
    client: reqwest::Client,
    url: String,
}

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    inputs: &'a str,
    parameters: ClassifyParameters<'a>,
}

#[derive(Serialize)]
struct ClassifyParameters<'a> {
    candidate_labels: &'a [String],
    hypothesis_template: &'a str,
    multi_label: bool,
}

#[derive(Deserialize)]
struct ClassifyResponse {
    labels: Vec<String>,
    scores: Vec<f64>,
}

impl HttpRiskModel {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("CAREGRAPH_RISK_URL")
            .map_err(|_| CareGraphError::Config("CAREGRAPH_RISK_URL not set".into()))?;
        Self::new(url)
    }
}

#[async_trait]
impl RiskModel for HttpRiskModel {
    async fn classify(
        &self,
        text: &str,
        labels: &[String],
        hypothesis_template: &str,
    ) -> Result<Vec<LabelScore>> {
        let request = ClassifyRequest {
            inputs: text,
            parameters: ClassifyParameters {
                candidate_labels: labels,
                hypothesis_template,
                multi_label: true,
            },
        };
        let response = self.client.post(&self.url).json(&request).send().await?;
        if !response.status().is_success() {
            return Err(CareGraphError::Backend(format!(
                "risk classifier returned {}",
                response.status()
            )));
        }
        let parsed: ClassifyResponse = response.json().await?;
        if parsed.labels.len() != parsed.scores.len() {
            return Err(CareGraphError::Backend(
                "risk classifier returned mismatched labels/scores".into(),
            ));
        }
        Ok(parsed
            .labels
            .into_iter()
            .zip(parsed.scores)
            .map(|(label, score)| LabelScore { label, score })
            .collect())
    }
}
