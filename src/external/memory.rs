use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::external::embedding::EmbeddingModel;
use crate::external::vectordb::{
    metadata_value_string, prepare_batch, Document, Metadata, SearchHit, VectorStore,
};

struct Entry {
    id: String,
    text: String,
    metadata: Metadata,
    vector: Vec<f32>,
}

/// In-process vector store ranking by cosine similarity.
///
/// Nothing is persisted; contents live as long as the store.
pub struct MemoryVectorStore {
    embedder: Arc<dyn EmbeddingModel>,
    entries: RwLock<Vec<Entry>>,
}

impl MemoryVectorStore {
    pub fn new(embedder: Arc<dyn EmbeddingModel>) -> Self {
        Self {
            embedder,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn matches_filter(metadata: &Metadata, filter: &Metadata) -> bool {
    filter.iter().all(|(key, expected)| {
        metadata
            .get(key)
            .map(|actual| metadata_value_string(actual) == metadata_value_string(expected))
            .unwrap_or(false)
    })
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn add_documents(
        &self,
        documents: Vec<String>,
        metadatas: Option<Vec<Metadata>>,
        ids: Option<Vec<String>>,
    ) -> Result<Vec<String>> {
        let (metadatas, ids) = prepare_batch(&documents, metadatas, ids)?;
        if documents.is_empty() {
            return Ok(ids);
        }

        let vectors = self.embedder.embed_texts(documents.clone()).await?;
        if vectors.len() != documents.len() {
            bail!(
                "Embedding model returned {} vectors for {} documents",
                vectors.len(),
                documents.len()
            );
        }

        let mut entries = self.entries.write().await;
        for (((text, metadata), id), vector) in
            documents.into_iter().zip(metadatas).zip(&ids).zip(vectors)
        {
            // Same id replaces the earlier entry
            entries.retain(|e| &e.id != id);
            entries.push(Entry {
                id: id.clone(),
                text,
                metadata,
                vector,
            });
        }

        Ok(ids)
    }

    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<Metadata>,
    ) -> Result<Vec<SearchHit>> {
        let query_vector = self.embedder.embed_text(query).await?;
        let filter = filter.unwrap_or_default();

        let entries = self.entries.read().await;
        let mut hits: Vec<SearchHit> = entries
            .iter()
            .filter(|e| matches_filter(&e.metadata, &filter))
            .map(|e| SearchHit {
                id: e.id.clone(),
                document: e.text.clone(),
                metadata: e.metadata.clone(),
                score: cosine_similarity(&query_vector, &e.vector),
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete(&self, ids: Vec<String>) -> Result<bool> {
        let mut entries = self.entries.write().await;
        entries.retain(|e| !ids.contains(&e.id));
        Ok(true)
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let entries = self.entries.read().await;
        Ok(entries.iter().find(|e| e.id == id).map(|e| Document {
            id: e.id.clone(),
            text: e.text.clone(),
            metadata: e.metadata.clone(),
        }))
    }

    async fn update_document(
        &self,
        id: &str,
        document: &str,
        metadata: Option<Metadata>,
    ) -> Result<bool> {
        if document.trim().is_empty() {
            bail!("Document text is empty");
        }
        if self.get_document(id).await?.is_none() {
            return Ok(false);
        }

        let vector = self.embedder.embed_text(document).await?;

        let mut entries = self.entries.write().await;
        match entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.text = document.to_string();
                entry.vector = vector;
                if let Some(metadata) = metadata {
                    entry.metadata = metadata;
                }
                Ok(true)
            }
            // Deleted while we were embedding
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::embedding::MockEmbeddingModel;
    use serde_json::json;

    /// Maps a few words onto fixed axes so similarity is predictable
    fn keyword_vector(text: &str) -> Vec<f32> {
        let text = text.to_lowercase();
        ["rust", "python", "database"]
            .iter()
            .map(|word| if text.contains(word) { 1.0 } else { 0.0 })
            .collect()
    }

    fn keyword_embedder() -> Arc<dyn EmbeddingModel> {
        let mut mock = MockEmbeddingModel::new();
        mock.expect_embed_text()
            .returning(|text| Ok(keyword_vector(text)));
        mock.expect_embed_texts()
            .returning(|texts| Ok(texts.iter().map(|t| keyword_vector(t)).collect()));
        mock.expect_dimension().return_const(3usize);
        Arc::new(mock)
    }

    fn metadata(value: serde_json::Value) -> Metadata {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_search_ranks_by_similarity() {
        let store = MemoryVectorStore::new(keyword_embedder());
        let ids = store
            .add_documents(
                vec![
                    "Python is dynamic".to_string(),
                    "Rust is a systems language".to_string(),
                    "A database stores rows".to_string(),
                ],
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(ids.len(), 3);

        let hits = store
            .similarity_search("tell me about rust", 2, None)
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, ids[1]);
        assert_eq!(hits[0].document, "Rust is a systems language");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_search_with_filter() {
        let store = MemoryVectorStore::new(keyword_embedder());
        store
            .add_documents(
                vec!["rust guide".to_string(), "rust faq".to_string()],
                Some(vec![
                    metadata(json!({"kind": "guide"})),
                    metadata(json!({"kind": "faq"})),
                ]),
                None,
            )
            .await
            .unwrap();

        let hits = store
            .similarity_search("rust", 5, Some(metadata(json!({"kind": "faq"}))))
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document, "rust faq");
    }

    #[tokio::test]
    async fn test_get_update_delete() {
        let store = MemoryVectorStore::new(keyword_embedder());
        let ids = store
            .add_documents(
                vec!["python notes".to_string()],
                Some(vec![metadata(json!({"author": "ann"}))]),
                Some(vec!["doc-1".to_string()]),
            )
            .await
            .unwrap();
        assert_eq!(ids, vec!["doc-1"]);

        assert!(store
            .update_document("doc-1", "rust notes", None)
            .await
            .unwrap());
        let doc = store.get_document("doc-1").await.unwrap().unwrap();
        assert_eq!(doc.text, "rust notes");
        assert_eq!(doc.metadata, metadata(json!({"author": "ann"})));

        assert!(!store
            .update_document("missing", "rust", None)
            .await
            .unwrap());

        assert!(store.delete(vec!["doc-1".to_string()]).await.unwrap());
        assert!(store.get_document("doc-1").await.unwrap().is_none());
        assert!(store.is_empty().await);

        // Unknown ids are accepted, as Qdrant accepts them
        assert!(store.delete(vec!["doc-1".to_string()]).await.unwrap());
    }
}
