use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use qdrant_client::{
    config::QdrantConfig,
    qdrant::{
        point_id::PointIdOptions, points_selector::PointsSelectorOneOf, value::Kind,
        vectors_config::Config, CollectionExistsRequest, Condition, CreateCollection,
        DeletePoints, Distance, Filter, GetPoints, PointId, PointStruct, PointsIdsList,
        PointsSelector, SearchPoints, UpsertPoints, Value, VectorParams, VectorsConfig,
        WithPayloadSelector, WriteOrdering,
    },
    Qdrant,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::external::embedding::{embed_in_batches, EmbeddingConfig, EmbeddingModel};
use crate::external::error::ExternalError;
use crate::external::llm::normalize_base_url;
use crate::external::memory::MemoryVectorStore;

/// Free-form document metadata
pub type Metadata = serde_json::Map<String, serde_json::Value>;

const PAYLOAD_ID: &str = "doc_id";
const PAYLOAD_DOCUMENT: &str = "document";
const PAYLOAD_METADATA: &str = "metadata";
const PAYLOAD_META_PREFIX: &str = "meta_";

/// A stored document and its metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
}

/// A document returned by a similarity search. Higher scores are closer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorStoreKind {
    Qdrant,
    Memory,
}

impl VectorStoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VectorStoreKind::Qdrant => "qdrant",
            VectorStoreKind::Memory => "memory",
        }
    }

    /// Whether the backend lives behind a URL
    pub fn requires_url(&self) -> bool {
        matches!(self, VectorStoreKind::Qdrant)
    }
}

impl fmt::Display for VectorStoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VectorStoreKind {
    type Err = ExternalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "qdrant" => Ok(VectorStoreKind::Qdrant),
            "memory" => Ok(VectorStoreKind::Memory),
            other => Err(ExternalError::ConfigError(format!(
                "Unsupported vector database type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorDBConfig {
    pub kind: VectorStoreKind,
    pub url: String,
    pub api_key: String,
    pub collection_name: String,
}

impl VectorDBConfig {
    /// Get the full URL for the vector database service
    pub fn get_url(&self) -> Result<String> {
        normalize_base_url(&self.url)
    }
}

impl Default for VectorDBConfig {
    fn default() -> Self {
        Self {
            kind: VectorStoreKind::Qdrant,
            url: "http://localhost:6334".to_string(),
            api_key: String::new(),
            collection_name: "knowledge_base".to_string(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Store documents, returning their ids. Missing ids are generated.
    async fn add_documents(
        &self,
        documents: Vec<String>,
        metadatas: Option<Vec<Metadata>>,
        ids: Option<Vec<String>>,
    ) -> Result<Vec<String>>;

    /// Return up to `k` documents closest to `query`, restricted to
    /// documents whose metadata matches every entry of `filter`
    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<Metadata>,
    ) -> Result<Vec<SearchHit>>;

    /// Delete documents by id. Returns `true` when the store accepted the
    /// request, even if some ids were never stored, and `false` when the
    /// backend refused it.
    async fn delete(&self, ids: Vec<String>) -> Result<bool>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    /// Replace a document's text. `None` metadata keeps the stored metadata.
    async fn update_document(
        &self,
        id: &str,
        document: &str,
        metadata: Option<Metadata>,
    ) -> Result<bool>;
}

/// Fill in default metadata and ids and check the batch is consistent
pub(crate) fn prepare_batch(
    documents: &[String],
    metadatas: Option<Vec<Metadata>>,
    ids: Option<Vec<String>>,
) -> Result<(Vec<Metadata>, Vec<String>)> {
    if let Some(pos) = documents.iter().position(|d| d.trim().is_empty()) {
        bail!("Document at position {} is empty", pos);
    }

    let metadatas = metadatas.unwrap_or_else(|| vec![Metadata::new(); documents.len()]);
    if metadatas.len() != documents.len() {
        bail!(
            "Got {} metadata entries for {} documents",
            metadatas.len(),
            documents.len()
        );
    }

    let ids = ids.unwrap_or_else(|| {
        documents
            .iter()
            .map(|_| Uuid::new_v4().to_string())
            .collect()
    });
    if ids.len() != documents.len() {
        bail!("Got {} ids for {} documents", ids.len(), documents.len());
    }

    Ok((metadatas, ids))
}

/// Render a metadata value the way filters compare it
pub(crate) fn metadata_value_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Qdrant-backed vector store
pub struct QdrantStore {
    client: Qdrant,
    collection_name: String,
    embedder: Arc<dyn EmbeddingModel>,
    batch_size: usize,
    max_concurrent: usize,
}

impl QdrantStore {
    /// Connect and create the collection when it does not exist yet
    pub async fn connect(
        config: &VectorDBConfig,
        embedding: &EmbeddingConfig,
        embedder: Arc<dyn EmbeddingModel>,
    ) -> Result<Self> {
        let url = config.get_url()?;
        let mut qdrant_config = QdrantConfig::from_url(&url);
        if !config.api_key.is_empty() {
            qdrant_config = qdrant_config.api_key(config.api_key.clone());
        }
        let client = Qdrant::new(qdrant_config)
            .map_err(|e| ExternalError::ConnectionError(e.to_string()))?;

        let store = Self {
            client,
            collection_name: config.collection_name.clone(),
            embedder,
            batch_size: embedding.batch_size,
            max_concurrent: embedding.max_concurrent_requests,
        };
        store.init_collection().await?;

        Ok(store)
    }

    /// Initialize the collection with the embedder's dimension
    async fn init_collection(&self) -> Result<()> {
        let exists = self
            .client
            .collection_exists(CollectionExistsRequest {
                collection_name: self.collection_name.clone(),
            })
            .await
            .map_err(|e| ExternalError::VectorDBError(e.to_string()))?;

        if exists {
            return Ok(());
        }

        let vectors_config = VectorsConfig {
            config: Some(Config::Params(VectorParams {
                size: self.embedder.dimension() as u64,
                distance: Distance::Cosine.into(),
                ..Default::default()
            })),
        };

        let create_collection = CreateCollection {
            collection_name: self.collection_name.clone(),
            vectors_config: Some(vectors_config),
            ..Default::default()
        };

        self.client
            .create_collection(create_collection)
            .await
            .map_err(|e| ExternalError::VectorDBError(e.to_string()))?;

        tracing::info!(collection = %self.collection_name, "Created vector collection");
        Ok(())
    }

    fn point_id(id: &str) -> PointId {
        PointId {
            point_id_options: Some(PointIdOptions::Uuid(point_uuid(id))),
        }
    }

    fn id_string(id: Option<PointId>) -> Option<String> {
        match id?.point_id_options? {
            PointIdOptions::Uuid(uuid) => Some(uuid),
            PointIdOptions::Num(num) => Some(num.to_string()),
        }
    }

    async fn upsert(&self, points: Vec<PointStruct>) -> Result<()> {
        let upsert_points = UpsertPoints {
            collection_name: self.collection_name.clone(),
            wait: Some(true),
            points,
            ordering: Some(WriteOrdering::default()),
            ..Default::default()
        };

        self.client
            .upsert_points(upsert_points)
            .await
            .map_err(|e| ExternalError::VectorDBError(e.to_string()))?;

        Ok(())
    }
}

/// Qdrant point ids must be UUIDs or integers. Other ids map to a stable
/// v5 UUID and the caller's id is kept in the payload.
pub(crate) fn point_uuid(id: &str) -> String {
    match Uuid::parse_str(id) {
        Ok(uuid) => uuid.to_string(),
        Err(_) => Uuid::new_v5(&Uuid::NAMESPACE_OID, id.as_bytes()).to_string(),
    }
}

fn build_payload(id: &str, text: &str, metadata: &Metadata) -> Result<HashMap<String, Value>> {
    let mut payload = HashMap::new();
    payload.insert(PAYLOAD_ID.to_string(), Value::from(id.to_string()));
    payload.insert(PAYLOAD_DOCUMENT.to_string(), Value::from(text.to_string()));
    payload.insert(
        PAYLOAD_METADATA.to_string(),
        Value::from(serde_json::to_string(metadata)?),
    );
    for (key, value) in metadata {
        payload.insert(
            format!("{}{}", PAYLOAD_META_PREFIX, key),
            Value::from(metadata_value_string(value)),
        );
    }
    Ok(payload)
}

fn payload_string(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
    match payload.get(key)?.kind.as_ref()? {
        Kind::StringValue(s) => Some(s.clone()),
        _ => None,
    }
}

/// Points written without a `doc_id` fall back to `point_id`
fn read_payload(payload: &HashMap<String, Value>, point_id: Option<String>) -> Option<Document> {
    let id = payload_string(payload, PAYLOAD_ID).or(point_id)?;
    let text = payload_string(payload, PAYLOAD_DOCUMENT)?;
    let metadata = payload_string(payload, PAYLOAD_METADATA)
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default();
    Some(Document { id, text, metadata })
}

fn build_points(
    documents: &[String],
    metadatas: &[Metadata],
    ids: &[String],
    vectors: Vec<Vec<f32>>,
) -> Result<Vec<PointStruct>> {
    if vectors.len() != documents.len() {
        bail!(
            "Embedding model returned {} vectors for {} documents",
            vectors.len(),
            documents.len()
        );
    }

    let mut points = Vec::with_capacity(documents.len());
    for (((text, metadata), id), vector) in documents.iter().zip(metadatas).zip(ids).zip(vectors) {
        points.push(PointStruct {
            id: Some(QdrantStore::point_id(id)),
            payload: build_payload(id, text, metadata)?,
            vectors: Some(vector.into()),
        });
    }
    Ok(points)
}

fn build_filter(filter: &Metadata) -> Option<Filter> {
    if filter.is_empty() {
        return None;
    }
    Some(Filter::must(filter.iter().map(|(key, value)| {
        Condition::matches(
            format!("{}{}", PAYLOAD_META_PREFIX, key),
            metadata_value_string(value),
        )
    })))
}

#[async_trait]
impl VectorStore for QdrantStore {
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

        let vectors = embed_in_batches(
            self.embedder.as_ref(),
            &documents,
            self.batch_size,
            self.max_concurrent,
        )
        .await?;

        let points = build_points(&documents, &metadatas, &ids, vectors)?;
        self.upsert(points).await?;
        tracing::debug!(count = ids.len(), collection = %self.collection_name, "Upserted documents");

        Ok(ids)
    }

    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<Metadata>,
    ) -> Result<Vec<SearchHit>> {
        let vector = self.embedder.embed_text(query).await?;

        let search_request = SearchPoints {
            collection_name: self.collection_name.clone(),
            vector,
            filter: filter.as_ref().and_then(build_filter),
            limit: k as u64,
            with_payload: Some(WithPayloadSelector::from(true)),
            ..Default::default()
        };

        let results = self
            .client
            .search_points(search_request)
            .await
            .map_err(|e| ExternalError::VectorDBError(e.to_string()))?;

        Ok(results
            .result
            .into_iter()
            .filter_map(|point| {
                let doc = read_payload(&point.payload, Self::id_string(point.id))?;
                Some(SearchHit {
                    id: doc.id,
                    document: doc.text,
                    metadata: doc.metadata,
                    score: point.score,
                })
            })
            .collect())
    }

    async fn delete(&self, ids: Vec<String>) -> Result<bool> {
        let points_selector = PointsSelector {
            points_selector_one_of: Some(PointsSelectorOneOf::Points(PointsIdsList {
                ids: ids.iter().map(|id| Self::point_id(id)).collect(),
            })),
        };

        let delete_points = DeletePoints {
            collection_name: self.collection_name.clone(),
            wait: Some(true),
            points: Some(points_selector),
            ordering: Some(WriteOrdering::default()),
            ..Default::default()
        };

        match self.client.delete_points(delete_points).await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!(collection = %self.collection_name, "Delete failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let request = GetPoints {
            collection_name: self.collection_name.clone(),
            ids: vec![Self::point_id(id)],
            with_payload: Some(WithPayloadSelector::from(true)),
            ..Default::default()
        };

        let response = match self.client.get_points(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(collection = %self.collection_name, "Lookup of {} failed: {}", id, e);
                return Ok(None);
            }
        };

        Ok(response
            .result
            .into_iter()
            .find_map(|point| read_payload(&point.payload, Some(id.to_string()))))
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

        let Some(existing) = self.get_document(id).await? else {
            return Ok(false);
        };
        let metadata = metadata.unwrap_or(existing.metadata);

        let vector = self.embedder.embed_text(document).await?;
        let point = PointStruct {
            id: Some(Self::point_id(id)),
            payload: build_payload(id, document, &metadata)?,
            vectors: Some(vector.into()),
        };

        match self.upsert(vec![point]).await {
            Ok(()) => Ok(true),
            Err(e) => {
                tracing::warn!(collection = %self.collection_name, "Update of {} failed: {}", id, e);
                Ok(false)
            }
        }
    }
}

/// Create the vector store selected by `VECTOR_DB_TYPE`
pub async fn create_vector_store(
    config: &VectorDBConfig,
    embedding: &EmbeddingConfig,
    embedder: Arc<dyn EmbeddingModel>,
) -> Result<Arc<dyn VectorStore>> {
    match config.kind {
        VectorStoreKind::Qdrant => Ok(Arc::new(
            QdrantStore::connect(config, embedding, embedder).await?,
        )),
        VectorStoreKind::Memory => Ok(Arc::new(MemoryVectorStore::new(embedder))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata(value: serde_json::Value) -> Metadata {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_url_generation() {
        let config = VectorDBConfig {
            url: "localhost:6334".to_string(),
            ..Default::default()
        };
        assert_eq!(config.get_url().unwrap(), "http://localhost:6334");

        let config = VectorDBConfig {
            url: "https://example.com:6334/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.get_url().unwrap(), "https://example.com:6334");
    }

    #[test]
    fn test_store_kind_parsing() {
        assert_eq!("qdrant".parse::<VectorStoreKind>().unwrap(), VectorStoreKind::Qdrant);
        assert_eq!("MEMORY".parse::<VectorStoreKind>().unwrap(), VectorStoreKind::Memory);
        assert_eq!(
            "chroma".parse::<VectorStoreKind>().unwrap_err().to_string(),
            "Configuration error: Unsupported vector database type: chroma"
        );
    }

    #[test]
    fn test_prepare_batch_defaults() {
        let documents = vec!["one".to_string(), "two".to_string()];
        let (metadatas, ids) = prepare_batch(&documents, None, None).unwrap();

        assert_eq!(metadatas, vec![Metadata::new(), Metadata::new()]);
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
        assert!(Uuid::parse_str(&ids[0]).is_ok());
    }

    #[test]
    fn test_prepare_batch_rejects_mismatches() {
        let documents = vec!["one".to_string(), "  ".to_string()];
        assert!(prepare_batch(&documents, None, None).is_err());

        let documents = vec!["one".to_string()];
        let err = prepare_batch(&documents, Some(vec![]), None).unwrap_err();
        assert_eq!(err.to_string(), "Got 0 metadata entries for 1 documents");

        let err = prepare_batch(&documents, None, Some(vec![])).unwrap_err();
        assert_eq!(err.to_string(), "Got 0 ids for 1 documents");
    }

    #[test]
    fn test_payload_roundtrip_and_filter_keys() {
        let meta = metadata(json!({"source": "wiki", "page": 3}));
        let payload = build_payload("doc-1", "hello", &meta).unwrap();

        assert_eq!(payload_string(&payload, "meta_source").as_deref(), Some("wiki"));
        assert_eq!(payload_string(&payload, "meta_page").as_deref(), Some("3"));

        let doc = read_payload(&payload, None).unwrap();
        assert_eq!(doc.id, "doc-1");
        assert_eq!(doc.text, "hello");
        assert_eq!(doc.metadata, meta);

        assert!(build_filter(&Metadata::new()).is_none());
        let filter = build_filter(&metadata(json!({"source": "wiki"}))).unwrap();
        assert_eq!(filter.must.len(), 1);
    }

    #[test]
    fn test_point_ids_for_caller_ids() {
        // UUIDs pass through unchanged
        let uuid = Uuid::new_v4().to_string();
        assert_eq!(point_uuid(&uuid), uuid);

        // Other ids map to the same valid UUID every time
        let mapped = point_uuid("cargo-doc");
        assert!(Uuid::parse_str(&mapped).is_ok());
        assert_eq!(mapped, point_uuid("cargo-doc"));
        assert_ne!(mapped, point_uuid("cargo-doc-2"));

        // The caller's id survives the trip through the payload
        let payload = build_payload("cargo-doc", "Rust has cargo.", &Metadata::new()).unwrap();
        let point_id = QdrantStore::id_string(Some(QdrantStore::point_id("cargo-doc")));
        assert_eq!(point_id.as_deref(), Some(mapped.as_str()));
        let doc = read_payload(&payload, point_id.clone()).unwrap();
        assert_eq!(doc.id, "cargo-doc");

        // Points stored without a doc_id report the point id
        let mut legacy = payload.clone();
        legacy.remove(PAYLOAD_ID);
        let doc = read_payload(&legacy, point_id).unwrap();
        assert_eq!(doc.id, mapped);
    }

    #[test]
    fn test_build_points_checks_vector_count() {
        let documents = vec!["one".to_string(), "two".to_string()];
        let (metadatas, ids) = prepare_batch(&documents, None, None).unwrap();

        let err = build_points(&documents, &metadatas, &ids, vec![vec![0.1, 0.2]]).unwrap_err();
        assert_eq!(err.to_string(), "Embedding model returned 1 vectors for 2 documents");

        let points = build_points(
            &documents,
            &metadatas,
            &ids,
            vec![vec![0.1, 0.2], vec![0.3, 0.4]],
        )
        .unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(
            payload_string(&points[1].payload, PAYLOAD_ID).as_deref(),
            Some(ids[1].as_str())
        );
    }
}
