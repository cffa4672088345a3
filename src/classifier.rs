//! Anthropic Messages API classifier.
//!
//! Sends the triage prompt as a single user message and returns the text
//! of the first content block. Parsing the text into a triage result is
//! the core engine's job; this module only deals with transport.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use helpdesk_triage_core::triage::Classifier;

use crate::config::TriageConfig;

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicClassifier {
    api_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
    client: reqwest::Client,
}

impl AnthropicClassifier {
    pub fn new(config: &TriageConfig, api_key: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            api_url: config.api_url.clone(),
            api_key: api_key.to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            client,
        })
    }
}

#[async_trait]
impl Classifier for AnthropicClassifier {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .context("classifier request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("Classifier API error {}: {}", status, text);
        }

        let json: serde_json::Value = response.json().await?;
        Ok(first_text_block(&json))
    }
}

/// `content[0].text`, or empty when absent so that triage treats the
/// answer as malformed output.
fn first_text_block(json: &serde_json::Value) -> String {
    json.get("content")
        .and_then(|c| c.as_array())
        .and_then(|blocks| blocks.first())
        .and_then(|b| b.get("text"))
        .and_then(|t| t.as_str())
        .unwrap_or_default()
        .to_string()
}
