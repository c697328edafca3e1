pub mod embedding;
pub mod error;
pub mod llm;
pub mod memory;
pub mod vectordb;

pub use embedding::{create_embedding_model, EmbeddingConfig, EmbeddingModel};
pub use error::ExternalError;
pub use llm::{create_llm_client, ChatMessage, Completion, LLMClient, LLMConfig, Provider, TokenUsage};
pub use memory::MemoryVectorStore;
pub use vectordb::{
    create_vector_store, Document, Metadata, QdrantStore, SearchHit, VectorDBConfig, VectorStore,
    VectorStoreKind,
};
