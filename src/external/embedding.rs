use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use ollama_rs::{generation::options::GenerationOptions, Ollama};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::external::error::ExternalError;
use crate::external::llm::{normalize_base_url, ollama_from_url, Provider, OPENAI_BASE_URL};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub provider: Provider,
    pub model: String,
    pub api_key: String,
    pub base_url: String,
    /// Overrides the per-model default dimension
    pub dimension: Option<usize>,
    pub batch_size: usize,
    pub max_concurrent_requests: usize,
    pub timeout_secs: u64,
}

impl EmbeddingConfig {
    /// Get the service URL without a trailing slash
    pub fn get_url(&self) -> Result<String> {
        normalize_base_url(&self.base_url)
    }

    /// Vector size produced by the configured model
    pub fn resolved_dimension(&self) -> usize {
        self.dimension
            .unwrap_or_else(|| default_dimension(self.provider, &self.model))
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: Provider::OpenAI,
            model: "text-embedding-ada-002".to_string(),
            api_key: String::new(),
            base_url: OPENAI_BASE_URL.to_string(),
            dimension: None,
            batch_size: 32,
            max_concurrent_requests: 4,
            timeout_secs: 30,
        }
    }
}

/// Known output sizes, falling back to 1536
pub fn default_dimension(provider: Provider, model: &str) -> usize {
    match (provider, model) {
        (_, "text-embedding-ada-002") | (_, "text-embedding-3-small") => 1536,
        (_, "text-embedding-3-large") => 3072,
        (Provider::Ollama, "nomic-embed-text") => 768,
        (Provider::Ollama, "all-minilm") => 384,
        (Provider::Ollama, "mxbai-embed-large") => 1024,
        _ => 1536,
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Generate the embedding for a single text
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for several texts, in input order
    async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    fn dimension(&self) -> usize;
}

/// Embed `texts` in slices of `batch_size`, running up to `max_concurrent`
/// requests at once. Output order matches input order.
pub async fn embed_in_batches(
    model: &dyn EmbeddingModel,
    texts: &[String],
    batch_size: usize,
    max_concurrent: usize,
) -> Result<Vec<Vec<f32>>> {
    let batch_size = batch_size.max(1);
    let max_concurrent = max_concurrent.max(1);
    let total_batches = texts.len().div_ceil(batch_size);

    tracing::debug!(
        "Embedding {} texts in {} batches ({} concurrent)",
        texts.len(),
        total_batches,
        max_concurrent
    );

    let batches: Vec<Vec<Vec<f32>>> = stream::iter(texts.chunks(batch_size).map(<[String]>::to_vec))
        .map(|batch| model.embed_texts(batch))
        .buffered(max_concurrent)
        .try_collect()
        .await?;

    Ok(batches.into_iter().flatten().collect())
}

/// Client for OpenAI-compatible `/embeddings` endpoints
pub struct OpenAIEmbeddings {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
}

impl OpenAIEmbeddings {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ExternalError::ConnectionError(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.get_url()?,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            dimension: config.resolved_dimension(),
        })
    }
}

#[async_trait]
impl EmbeddingModel for OpenAIEmbeddings {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_texts(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                ExternalError::MalformedResponse {
                    service: "Embedding",
                    reason: "no embedding returned".to_string(),
                }
                .into()
            })
    }

    async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        #[derive(Serialize)]
        struct EmbedRequest<'a> {
            model: &'a str,
            input: &'a [String],
        }

        #[derive(Deserialize)]
        struct EmbedResponse {
            data: Vec<EmbedData>,
        }

        #[derive(Deserialize)]
        struct EmbedData {
            #[serde(default)]
            index: usize,
            embedding: Vec<f32>,
        }

        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&EmbedRequest {
                model: &self.model,
                input: &texts,
            })
            .send()
            .await
            .map_err(|e| ExternalError::ConnectionError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ExternalError::ApiError {
                service: "Embedding",
                status,
                body,
            }
            .into());
        }

        let mut embed_response: EmbedResponse =
            response
                .json()
                .await
                .map_err(|e| ExternalError::MalformedResponse {
                    service: "Embedding",
                    reason: e.to_string(),
                })?;

        if embed_response.data.len() != texts.len() {
            return Err(ExternalError::MalformedResponse {
                service: "Embedding",
                reason: format!(
                    "expected {} embeddings, got {}",
                    texts.len(),
                    embed_response.data.len()
                ),
            }
            .into());
        }

        embed_response.data.sort_by_key(|d| d.index);
        Ok(embed_response
            .data
            .into_iter()
            .map(|d| d.embedding)
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Wrapper for Ollama embedding engine
pub struct OllamaEmbeddings {
    client: Ollama,
    model: String,
    dimension: usize,
}

impl OllamaEmbeddings {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            client: ollama_from_url(&config.base_url)?,
            model: config.model.clone(),
            dimension: config.resolved_dimension(),
        })
    }
}

#[async_trait]
impl EmbeddingModel for OllamaEmbeddings {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .generate_embeddings(
                self.model.clone(),
                text.to_string(),
                Some(GenerationOptions::default()),
            )
            .await
            .map_err(|e| ExternalError::OllamaError(e.to_string()))?;

        // Convert from Vec<f64> to Vec<f32>
        Ok(response.embeddings.into_iter().map(|x| x as f32).collect())
    }

    async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in &texts {
            embeddings.push(self.embed_text(text).await?);
        }
        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Create the embedding model for the configured provider
pub fn create_embedding_model(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingModel>> {
    match config.provider {
        Provider::OpenAI => Ok(Box::new(OpenAIEmbeddings::new(config)?)),
        Provider::Ollama => Ok(Box::new(OllamaEmbeddings::new(config)?)),
    }
}
