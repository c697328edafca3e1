use std::sync::Arc;

use anyhow::{bail, Result};

use crate::external::{Metadata, SearchHit, VectorStore};

/// Fetches the documents closest to a query from the vector store
pub struct Retriever {
    store: Arc<dyn VectorStore>,
    top_k: usize,
}

impl Retriever {
    pub fn new(store: Arc<dyn VectorStore>, top_k: usize) -> Self {
        Self { store, top_k }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Retrieve documents for `query`. `k` of `None` or zero uses the
    /// configured `top_k`.
    pub async fn retrieve(
        &self,
        query: &str,
        k: Option<usize>,
        filter: Option<Metadata>,
    ) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() {
            bail!("Query is empty");
        }

        let k = k.filter(|&k| k > 0).unwrap_or(self.top_k);
        tracing::debug!(k, "Retrieving documents");
        self.store.similarity_search(query, k, filter).await
    }

    /// Render hits as numbered `[Document n]` blocks for the prompt
    pub fn format_context(hits: &[SearchHit]) -> String {
        if hits.is_empty() {
            return String::new();
        }

        let mut parts = Vec::with_capacity(hits.len() * 3);
        for (i, hit) in hits.iter().enumerate() {
            parts.push(format!("[Document {}]", i + 1));
            parts.push(hit.document.clone());
            parts.push(String::new());
        }
        parts.join("\n")
    }
}
