pub mod agents;
pub mod config;
pub mod db;
pub mod external;
pub mod mcp;
pub mod rag;

pub use agents::{Agent, AgentAnswer, DatabaseAgent, QueryAgent, QueryContext, QueryType};
pub use config::Settings;
pub use db::Database;
pub use external::{EmbeddingModel, ExternalError, LLMClient, VectorStore};
pub use mcp::{McpClient, McpError, McpServer};
pub use rag::{Generator, RagPipeline, Retriever, TextChunker};
