use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use ollama_rs::{
    generation::{completion::request::GenerationRequest, options::GenerationOptions},
    Ollama,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::external::error::ExternalError;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Hosted model provider used for both completions and embeddings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAI,
    Ollama,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAI => "openai",
            Provider::Ollama => "ollama",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::OpenAI => OPENAI_BASE_URL,
            Provider::Ollama => OLLAMA_BASE_URL,
        }
    }

    /// Whether requests to this provider need an API key
    pub fn requires_api_key(&self) -> bool {
        matches!(self, Provider::OpenAI)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = ExternalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAI),
            "ollama" => Ok(Provider::Ollama),
            other => Err(ExternalError::ConfigError(format!(
                "Unsupported LLM provider: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    pub provider: Provider,
    pub model: String,
    pub api_key: String,
    pub base_url: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl LLMConfig {
    /// Get the service URL without a trailing slash
    pub fn get_url(&self) -> Result<String> {
        normalize_base_url(&self.base_url)
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: Provider::OpenAI,
            model: "gpt-4".to_string(),
            api_key: String::new(),
            base_url: OPENAI_BASE_URL.to_string(),
            temperature: 0.7,
            timeout_secs: 30,
        }
    }
}

/// Validate a base URL and strip the trailing slash
pub(crate) fn normalize_base_url(base_url: &str) -> Result<String> {
    let url = if base_url.starts_with("http://") || base_url.starts_with("https://") {
        base_url.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", base_url.trim_end_matches('/'))
    };

    Url::parse(&url).map_err(|e| ExternalError::ConfigError(format!("Invalid URL: {}", e)))?;

    Ok(url)
}

/// Split a base URL into the `scheme://host` and port that ollama-rs expects
fn ollama_endpoint(base_url: &str) -> Result<(String, u16)> {
    let url = normalize_base_url(base_url)?;
    let url = Url::parse(&url)
        .map_err(|e| ExternalError::ConfigError(format!("Invalid URL: {}", e)))?;
    let host = url
        .host_str()
        .ok_or_else(|| ExternalError::ConfigError(format!("URL has no host: {}", url)))?;
    let port = url.port_or_known_default().unwrap_or(11434);

    Ok((format!("{}://{}", url.scheme(), host), port))
}

/// Build an Ollama client from a base URL such as `http://localhost:11434`
pub(crate) fn ollama_from_url(base_url: &str) -> Result<Ollama> {
    let (host, port) = ollama_endpoint(base_url)?;
    Ok(Ollama::new(host, port))
}

/// One message of a chat exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Run a chat completion over the given messages
    async fn complete(&self, messages: Vec<ChatMessage>, temperature: f32) -> Result<Completion>;

    fn model_name(&self) -> String;
}

/// Client for OpenAI-compatible `/chat/completions` endpoints
pub struct OpenAIClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAIClient {
    pub fn new(config: &LLMConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ExternalError::ConnectionError(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.get_url()?,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl LLMClient for OpenAIClient {
    async fn complete(&self, messages: Vec<ChatMessage>, temperature: f32) -> Result<Completion> {
        #[derive(Serialize)]
        struct ChatRequest<'a> {
            model: &'a str,
            messages: Vec<ChatMessage>,
            temperature: f32,
        }

        #[derive(Deserialize)]
        struct ChatResponse {
            choices: Vec<ChatChoice>,
            usage: Option<TokenUsage>,
        }

        #[derive(Deserialize)]
        struct ChatChoice {
            message: ChatMessage,
        }

        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature,
        };

        tracing::debug!(model = %self.model, "Sending chat completion request");
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ExternalError::ConnectionError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ExternalError::ApiError {
                service: "LLM",
                status,
                body,
            }
            .into());
        }

        let chat_response: ChatResponse =
            response
                .json()
                .await
                .map_err(|e| ExternalError::MalformedResponse {
                    service: "LLM",
                    reason: e.to_string(),
                })?;

        let content = chat_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ExternalError::MalformedResponse {
                service: "LLM",
                reason: "no choices returned".to_string(),
            })?
            .message
            .content;

        Ok(Completion {
            content,
            model: self.model.clone(),
            usage: chat_response.usage,
        })
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }
}

/// Wrapper for Ollama LLM engine
pub struct OllamaClient {
    client: Ollama,
    model: String,
}

impl OllamaClient {
    pub fn new(config: &LLMConfig) -> Result<Self> {
        Ok(Self {
            client: ollama_from_url(&config.base_url)?,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl LLMClient for OllamaClient {
    async fn complete(&self, messages: Vec<ChatMessage>, temperature: f32) -> Result<Completion> {
        // Ollama's generate endpoint takes one system prompt and one prompt
        let mut system = Vec::new();
        let mut prompt = Vec::new();
        for message in messages {
            if message.role == "system" {
                system.push(message.content);
            } else {
                prompt.push(message.content);
            }
        }

        let mut request = GenerationRequest::new(self.model.clone(), prompt.join("\n\n"));
        if !system.is_empty() {
            request.system = Some(system.join("\n\n"));
        }
        request.options = Some(GenerationOptions::default().temperature(temperature));

        let response = self
            .client
            .generate(request)
            .await
            .map_err(|e| ExternalError::OllamaError(e.to_string()))?;

        Ok(Completion {
            content: response.response,
            model: self.model.clone(),
            usage: None,
        })
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }
}

/// Create the completion client for the configured provider
pub fn create_llm_client(config: &LLMConfig) -> Result<Box<dyn LLMClient>> {
    match config.provider {
        Provider::OpenAI => Ok(Box::new(OpenAIClient::new(config)?)),
        Provider::Ollama => Ok(Box::new(OllamaClient::new(config)?)),
    }
}
