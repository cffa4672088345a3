//! Embedding provider implementations.
//!
//! Concrete backends for the core [`EmbeddingProvider`] trait:
//! - **[`LocalProvider`]**: runs the model in-process via fastembed (primary)
//!   or tract (musl/Intel Mac). The model is loaded at most once per
//!   provider, on the first non-blank text.
//! - **[`OllamaProvider`]**: calls a local Ollama instance's `/api/embed`.
//!
//! Blank-input short-circuiting and L2 normalization happen in
//! [`helpdesk_triage_core::embedding::embed_text`], so every backend yields
//! unit vectors.
//!
//! # Provider Selection
//!
//! | Config Value | Provider |
//! |-------------|----------|
//! | `"local"` | [`LocalProvider`] (fastembed or tract, see features) |
//! | `"ollama"` | [`OllamaProvider`] |
//!
//! # Retry Strategy
//!
//! The Ollama provider uses exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

#[cfg(feature = "local-embeddings-tract")]
mod local_tract;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use helpdesk_triage_core::embedding::EmbeddingProvider;

use crate::config::EmbeddingConfig;

/// Default local model (sentence-transformers all-MiniLM-L6-v2, 384 dims).
pub const DEFAULT_LOCAL_MODEL: &str = "all-minilm-l6-v2";

/// Create the configured provider.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        #[cfg(any(feature = "local-embeddings-fastembed", feature = "local-embeddings-tract"))]
        "local" => Ok(Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(any(feature = "local-embeddings-fastembed", feature = "local-embeddings-tract")))]
        "local" => bail!(
            "Local embedding provider requires one of: --features local-embeddings-fastembed, --features local-embeddings-tract"
        ),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default: `http://localhost:11434`).
pub struct OllamaProvider {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims,
            url,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(format!("{}/api/embed", self.url))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_ollama_response(&json, self.dims);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        tracing::warn!(%status, attempt, "Ollama transient error, retrying");
                        last_err = Some(anyhow::anyhow!(
                            "Ollama API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Ollama API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(anyhow::anyhow!(
                        "Ollama connection error (is Ollama running at {}?): {}",
                        self.url,
                        e
                    ));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Ollama embedding failed after retries")))
    }
}

fn parse_ollama_response(json: &serde_json::Value, dims: usize) -> Result<Vec<f32>> {
    let first = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .and_then(|a| a.first())
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    let vec: Vec<f32> = first
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect();

    if vec.len() != dims {
        bail!(
            "Ollama returned {} dimensions, embedding.dims is {}",
            vec.len(),
            dims
        );
    }
    Ok(vec)
}

// ============ Local Provider (fastembed or tract) ============

#[cfg(feature = "local-embeddings-fastembed")]
type LocalModel = std::sync::Mutex<fastembed::TextEmbedding>;

#[cfg(all(
    feature = "local-embeddings-tract",
    not(feature = "local-embeddings-fastembed")
))]
type LocalModel = local_tract::TractModel;

/// Embedding provider for local inference.
///
/// Models are downloaded on first use from Hugging Face and cached; after
/// that no network calls are needed. The loaded model lives in a
/// [`tokio::sync::OnceCell`]: concurrent first callers wait on a single
/// load, and a failed load leaves the cell empty so the next call retries.
#[cfg(any(
    feature = "local-embeddings-fastembed",
    feature = "local-embeddings-tract"
))]
pub struct LocalProvider {
    model_name: String,
    dims: usize,
    model: tokio::sync::OnceCell<Arc<LocalModel>>,
}

#[cfg(any(
    feature = "local-embeddings-fastembed",
    feature = "local-embeddings-tract"
))]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string());
        let dims = config.dims.unwrap_or(match model_name.as_str() {
            "bge-base-en-v1.5" => 768,
            "bge-large-en-v1.5" => 1024,
            _ => 384,
        });
        Ok(Self {
            model_name,
            dims,
            model: tokio::sync::OnceCell::new(),
        })
    }

    async fn loaded(&self) -> Result<Arc<LocalModel>> {
        let model = self
            .model
            .get_or_try_init(|| async {
                let name = self.model_name.clone();
                tracing::info!(model = %name, "loading local embedding model");
                let loaded = tokio::task::spawn_blocking(move || load_local_model(&name)).await??;
                Ok::<_, anyhow::Error>(Arc::new(loaded))
            })
            .await?;
        Ok(model.clone())
    }
}

#[cfg(any(
    feature = "local-embeddings-fastembed",
    feature = "local-embeddings-tract"
))]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let model = self.loaded().await?;
        let text = text.to_string();
        let vector = tokio::task::spawn_blocking(move || run_local_model(&model, &text)).await??;
        if vector.len() != self.dims {
            bail!(
                "local model returned {} dimensions, expected {}",
                vector.len(),
                self.dims
            );
        }
        Ok(vector)
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5",
            other
        ),
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn load_local_model(name: &str) -> Result<LocalModel> {
    let model = fastembed::TextEmbedding::try_new(
        fastembed::InitOptions::new(config_to_fastembed_model(name)?)
            .with_show_download_progress(false),
    )
    .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;
    Ok(std::sync::Mutex::new(model))
}

#[cfg(feature = "local-embeddings-fastembed")]
fn run_local_model(model: &LocalModel, text: &str) -> Result<Vec<f32>> {
    let mut guard = model
        .lock()
        .map_err(|_| anyhow::anyhow!("local embedding model lock poisoned"))?;
    guard
        .embed(vec![text.to_string()], None)
        .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

#[cfg(all(
    feature = "local-embeddings-tract",
    not(feature = "local-embeddings-fastembed")
))]
fn load_local_model(name: &str) -> Result<LocalModel> {
    local_tract::TractModel::load(name)
}

#[cfg(all(
    feature = "local-embeddings-tract",
    not(feature = "local-embeddings-fastembed")
))]
fn run_local_model(model: &LocalModel, text: &str) -> Result<Vec<f32>> {
    model.embed(text)
}
