pub mod database_agent;
pub mod query_agent;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::external::Metadata;

pub use database_agent::{AgentAnswer, DatabaseAgent, KnowledgeAdded};
pub use query_agent::{HistoryEntry, Interpretation, QueryAgent, QueryAnalysis, QueryType};

/// Per-call options handed to an agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Metadata>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Bookkeeping shared by every agent: a name, a query counter and the
/// context accumulated since the last reset.
#[derive(Debug, Clone)]
pub struct AgentState {
    name: String,
    max_iterations: usize,
    iteration_count: usize,
    context: Map<String, Value>,
}

impl AgentState {
    pub fn new(name: impl Into<String>, max_iterations: usize) -> Self {
        Self {
            name: name.into(),
            max_iterations,
            iteration_count: 0,
            context: Map::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn iteration_count(&self) -> usize {
        self.iteration_count
    }

    pub fn context(&self) -> &Map<String, Value> {
        &self.context
    }

    pub fn reset(&mut self) {
        self.iteration_count = 0;
        self.context.clear();
    }

    /// Count one query and merge its context. Once `max_iterations` queries
    /// have been seen the state starts over.
    pub fn begin_iteration(&mut self, context: Option<&QueryContext>) {
        if self.max_iterations > 0 && self.iteration_count >= self.max_iterations {
            tracing::info!(agent = %self.name, "Reached {} iterations, resetting context", self.max_iterations);
            self.reset();
        }
        self.iteration_count += 1;

        if let Some(Ok(Value::Object(map))) = context.map(serde_json::to_value) {
            self.context.extend(map);
        }
    }
}

#[async_trait]
pub trait Agent: Send {
    type Output;

    fn name(&self) -> &str;

    async fn process(&mut self, query: &str, context: Option<QueryContext>) -> Result<Self::Output>;

    fn reset(&mut self);
}
