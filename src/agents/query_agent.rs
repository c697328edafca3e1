use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Agent, AgentState, QueryContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Retrieval,
    Insertion,
    Update,
    Deletion,
    Aggregation,
    General,
}

const KEYWORDS: &[(QueryType, &[&str])] = &[
    (QueryType::Retrieval, &["select", "show", "get", "find", "list"]),
    (QueryType::Insertion, &["insert", "add", "create", "new"]),
    (QueryType::Update, &["update", "modify", "change", "edit"]),
    (QueryType::Deletion, &["delete", "remove", "drop"]),
    (QueryType::Aggregation, &["count", "sum", "average", "analyze"]),
];

impl QueryType {
    /// First category with a keyword inside the query, case-insensitive
    pub fn classify(query: &str) -> Self {
        let query = query.to_lowercase();
        KEYWORDS
            .iter()
            .find(|(_, words)| words.iter().any(|word| query.contains(word)))
            .map(|(query_type, _)| *query_type)
            .unwrap_or(QueryType::General)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Retrieval => "retrieval",
            QueryType::Insertion => "insertion",
            QueryType::Update => "update",
            QueryType::Deletion => "deletion",
            QueryType::Aggregation => "aggregation",
            QueryType::General => "general",
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            QueryType::Retrieval => "search_database",
            QueryType::Insertion => "insert_data",
            QueryType::Update => "update_data",
            QueryType::Deletion => "delete_data",
            QueryType::Aggregation => "aggregate_data",
            QueryType::General => "process_general_query",
        }
    }

    pub fn requires_database(&self) -> bool {
        !matches!(self, QueryType::General)
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interpretation {
    #[serde(rename = "type")]
    pub query_type: QueryType,
    pub requires_database: bool,
    pub requires_context: bool,
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub original_query: String,
    pub query_type: QueryType,
    pub interpreted_query: Interpretation,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub query: String,
    pub query_type: QueryType,
    pub timestamp: DateTime<Utc>,
}

fn suggestions(query: &str) -> Vec<String> {
    let mut suggestions = Vec::new();
    if !query.contains('?') && !query.ends_with('.') {
        suggestions.push("Consider phrasing your query as a question for better results".to_string());
    }
    if query.split_whitespace().count() < 3 {
        suggestions.push("Try providing more context in your query".to_string());
    }
    suggestions
}

/// Classifies queries and keeps a history of them. Makes no external calls.
pub struct QueryAgent {
    state: AgentState,
    history: Vec<HistoryEntry>,
}

impl QueryAgent {
    pub fn new(max_iterations: usize) -> Self {
        Self::with_name("QueryAgent", max_iterations)
    }

    pub fn with_name(name: impl Into<String>, max_iterations: usize) -> Self {
        Self {
            state: AgentState::new(name, max_iterations),
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    pub fn analyze(&mut self, query: &str, context: Option<&QueryContext>) -> QueryAnalysis {
        tracing::info!(agent = %self.state.name(), "Processing query: {}", query);
        self.state.begin_iteration(context);

        let query_type = QueryType::classify(query);
        self.history.push(HistoryEntry {
            query: query.to_string(),
            query_type,
            timestamp: Utc::now(),
        });

        QueryAnalysis {
            original_query: query.to_string(),
            query_type,
            interpreted_query: Interpretation {
                query_type,
                requires_database: query_type.requires_database(),
                requires_context: true,
                action: query_type.action().to_string(),
            },
            suggestions: suggestions(query),
        }
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
        tracing::info!(agent = %self.state.name(), "Query history cleared");
    }
}

#[async_trait]
impl Agent for QueryAgent {
    type Output = QueryAnalysis;

    fn name(&self) -> &str {
        self.state.name()
    }

    async fn process(&mut self, query: &str, context: Option<QueryContext>) -> Result<QueryAnalysis> {
        Ok(self.analyze(query, context.as_ref()))
    }

    fn reset(&mut self) {
        self.state.reset();
    }
}
