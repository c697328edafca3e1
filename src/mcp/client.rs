use std::time::Duration;

use anyhow::Result;
use serde_json::{json, Value};

use super::protocol::{McpRequest, McpResponse, Params};
use crate::config::McpConfig;

/// HTTP client for an MCP dispatcher
pub struct McpClient {
    client: reqwest::Client,
    base_url: String,
}

fn object(value: Value) -> Params {
    match value {
        Value::Object(map) => map,
        _ => Params::new(),
    }
}

impl McpClient {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &McpConfig, timeout_secs: u64) -> Result<Self> {
        Self::new(config.client_url(), timeout_secs)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a request. Failures to reach the server, or replies that are not
    /// an envelope, come back as an error response carrying the request id.
    pub async fn send_request(&self, method: &str, params: Option<Params>) -> McpResponse {
        let request = McpRequest::new(method, params.unwrap_or_default());
        let id = request.id.clone();
        tracing::debug!(method, id = ?id, "Sending MCP request");

        let response = match self
            .client
            .post(format!("{}/mcp", self.base_url))
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(method, "MCP request failed: {}", e);
                return McpResponse::failure(id, e.to_string());
            }
        };

        let status = response.status();
        match response.json::<McpResponse>().await {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(method, %status, "Unreadable MCP response: {}", e);
                McpResponse::failure(
                    id,
                    format!("Invalid response from MCP server (HTTP {}): {}", status, e),
                )
            }
        }
    }

    pub async fn query_database(&self, query: &str, context: Option<Params>) -> McpResponse {
        let params = json!({
            "query": query,
            "context": context.unwrap_or_default(),
        });
        self.send_request("query_database", Some(object(params))).await
    }

    pub async fn get_schema(&self) -> McpResponse {
        self.send_request("get_schema", None).await
    }

    pub async fn execute_command(&self, command: &str, args: Option<Params>) -> McpResponse {
        let params = json!({
            "command": command,
            "args": args.unwrap_or_default(),
        });
        self.send_request("execute_command", Some(object(params))).await
    }
}
