use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Agent, AgentState, QueryContext};
use crate::external::{Metadata, SearchHit, TokenUsage};
use crate::mcp::{McpClient, Params};
use crate::rag::RagPipeline;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAnswer {
    pub answer: String,
    pub sources: Vec<SearchHit>,
    pub num_documents: usize,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeAdded {
    pub document_ids: Vec<String>,
    pub count: usize,
}

/// Answers questions from the knowledge base and forwards raw queries to
/// the MCP server
pub struct DatabaseAgent {
    state: AgentState,
    pipeline: Arc<RagPipeline>,
    mcp: McpClient,
}

impl DatabaseAgent {
    pub fn new(pipeline: Arc<RagPipeline>, mcp: McpClient, max_iterations: usize) -> Self {
        Self {
            state: AgentState::new("DatabaseAgent", max_iterations),
            pipeline,
            mcp,
        }
    }

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    /// Send `query` to the MCP `query_database` method
    pub async fn query_via_mcp(&self, query: &str, context: Option<Params>) -> Result<Value> {
        tracing::info!(agent = %self.state.name(), "Querying via MCP: {}", query);

        let response = self.mcp.query_database(query, context).await;
        if let Some(error) = &response.error {
            tracing::error!(agent = %self.state.name(), "MCP error: {}", error);
        }
        response.into_result()
    }

    pub async fn add_knowledge(
        &self,
        documents: Vec<String>,
        metadatas: Option<Vec<Metadata>>,
        chunk: bool,
    ) -> Result<KnowledgeAdded> {
        tracing::info!(
            agent = %self.state.name(),
            "Adding {} documents to knowledge base",
            documents.len()
        );

        let document_ids = self.pipeline.add_documents(documents, metadatas, chunk).await?;
        tracing::info!(
            agent = %self.state.name(),
            "Added {} document chunks",
            document_ids.len()
        );

        Ok(KnowledgeAdded {
            count: document_ids.len(),
            document_ids,
        })
    }
}

#[async_trait]
impl Agent for DatabaseAgent {
    type Output = AgentAnswer;

    fn name(&self) -> &str {
        self.state.name()
    }

    async fn process(&mut self, query: &str, context: Option<QueryContext>) -> Result<AgentAnswer> {
        tracing::info!(agent = %self.state.name(), "Processing query: {}", query);
        self.state.begin_iteration(context.as_ref());

        let (top_k, filter) = context.map(|c| (c.top_k, c.filter)).unwrap_or_default();
        let result = self.pipeline.query(query, top_k, filter, None).await?;

        if result.answer.trim().is_empty() {
            bail!("Model returned an empty answer");
        }
        tracing::info!(agent = %self.state.name(), "Generated answer");

        Ok(AgentAnswer {
            answer: result.answer,
            sources: result.retrieved_documents,
            num_documents: result.num_documents,
            usage: result.usage,
        })
    }

    fn reset(&mut self) {
        self.state.reset();
    }
}
