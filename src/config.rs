use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

use crate::external::{EmbeddingConfig, LLMConfig, Provider, VectorDBConfig, VectorStoreKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k_results: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub max_iterations: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    /// Base URL the client talks to, without the port
    pub server_url: String,
    /// Address the server binds to
    pub host: String,
    pub port: u16,
}

impl McpConfig {
    pub fn client_url(&self) -> String {
        format!("{}:{}", self.server_url.trim_end_matches('/'), self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub vector_db: VectorDBConfig,
    pub llm: LLMConfig,
    pub embedding: EmbeddingConfig,
    pub rag: RagConfig,
    pub agent: AgentConfig,
    pub mcp: McpConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Settings {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let timeout_secs = parse_or("AGENT_TIMEOUT", 30u64);

        // Load vector DB config
        let vector_db = VectorDBConfig {
            kind: var_or("VECTOR_DB_TYPE", "qdrant").parse::<VectorStoreKind>()?,
            url: var_or("VECTOR_DB_URL", ""),
            api_key: var_or("VECTOR_DB_API_KEY", ""),
            collection_name: var_or("VECTOR_DB_COLLECTION", "knowledge_base"),
        };

        // Load LLM config
        let provider = var_or("LLM_PROVIDER", "openai").parse::<Provider>()?;
        let base_url = var_or("LLM_BASE_URL", provider.default_base_url());
        let api_key = var_or("LLM_API_KEY", "");
        let llm = LLMConfig {
            provider,
            model: var_or("LLM_MODEL", "gpt-4"),
            api_key: api_key.clone(),
            base_url: base_url.clone(),
            temperature: parse_or("LLM_TEMPERATURE", 0.7f32),
            timeout_secs,
        };

        // Embeddings come from the same provider as completions
        let embedding = EmbeddingConfig {
            provider,
            model: var_or("EMBEDDING_MODEL", "text-embedding-ada-002"),
            api_key,
            base_url,
            dimension: env::var("EMBEDDING_DIMENSION")
                .ok()
                .and_then(|v| v.trim().parse().ok()),
            batch_size: parse_or("EMBEDDING_BATCH_SIZE", 32usize),
            max_concurrent_requests: parse_or("EMBEDDING_MAX_CONCURRENT", 4usize),
            timeout_secs,
        };

        let rag = RagConfig {
            chunk_size: parse_or("CHUNK_SIZE", 1000usize),
            chunk_overlap: parse_or("CHUNK_OVERLAP", 200usize),
            top_k_results: parse_or("TOP_K_RESULTS", 5usize),
        };

        let agent = AgentConfig {
            max_iterations: parse_or("AGENT_MAX_ITERATIONS", 10usize),
            timeout_secs,
        };

        let mcp = McpConfig {
            server_url: var_or("MCP_SERVER_URL", "http://localhost"),
            host: var_or("MCP_SERVER_HOST", "127.0.0.1"),
            port: parse_or("MCP_SERVER_PORT", 8080u16),
        };

        let database = DatabaseConfig {
            path: var_or("DATABASE_PATH", "./data.db"),
        };

        let logging = LoggingConfig {
            log_level: var_or("LOG_LEVEL", "info"),
        };

        Ok(Self {
            vector_db,
            llm,
            embedding,
            rag,
            agent,
            mcp,
            database,
            logging,
        })
    }

    /// Check that the settings needed by the selected backends are present
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.vector_db.kind.requires_url() && self.vector_db.url.trim().is_empty() {
            missing.push("vector_db_url");
        }
        if self.llm.provider.requires_api_key() && self.llm.api_key.trim().is_empty() {
            missing.push("llm_api_key");
        }

        if !missing.is_empty() {
            bail!("Missing required configuration: {}", missing.join(", "));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scopeguard::guard;
    use std::env;

    const VARS: &[&str] = &[
        "VECTOR_DB_TYPE",
        "VECTOR_DB_URL",
        "VECTOR_DB_API_KEY",
        "VECTOR_DB_COLLECTION",
        "LLM_PROVIDER",
        "LLM_API_KEY",
        "LLM_MODEL",
        "LLM_BASE_URL",
        "LLM_TEMPERATURE",
        "EMBEDDING_MODEL",
        "EMBEDDING_DIMENSION",
        "EMBEDDING_BATCH_SIZE",
        "EMBEDDING_MAX_CONCURRENT",
        "CHUNK_SIZE",
        "CHUNK_OVERLAP",
        "TOP_K_RESULTS",
        "AGENT_MAX_ITERATIONS",
        "AGENT_TIMEOUT",
        "MCP_SERVER_URL",
        "MCP_SERVER_HOST",
        "MCP_SERVER_PORT",
        "DATABASE_PATH",
        "LOG_LEVEL",
    ];

    fn clean_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial_test::serial]
    fn test_default_config() {
        clean_env();
        let _guard = guard((), |_| clean_env());

        let settings = Settings::from_env().unwrap();

        assert_eq!(settings.vector_db.kind, VectorStoreKind::Qdrant);
        assert_eq!(settings.vector_db.collection_name, "knowledge_base");
        assert_eq!(settings.llm.provider, Provider::OpenAI);
        assert_eq!(settings.llm.model, "gpt-4", "wrong default llm model");
        assert_eq!(settings.llm.base_url, "https://api.openai.com/v1");
        assert_eq!(
            settings.embedding.model, "text-embedding-ada-002",
            "wrong default embedding model"
        );
        assert_eq!(settings.rag.chunk_size, 1000);
        assert_eq!(settings.rag.chunk_overlap, 200);
        assert_eq!(settings.rag.top_k_results, 5);
        assert_eq!(settings.agent.max_iterations, 10);
        assert_eq!(settings.agent.timeout_secs, 30);
        assert_eq!(settings.mcp.client_url(), "http://localhost:8080");
        assert_eq!(settings.database.path, "./data.db");
    }

    #[test]
    #[serial_test::serial]
    fn test_custom_config() {
        clean_env();
        let _guard = guard((), |_| clean_env());

        env::set_var("VECTOR_DB_TYPE", "memory");
        env::set_var("LLM_PROVIDER", "ollama");
        env::set_var("LLM_MODEL", "mistral");
        env::set_var("EMBEDDING_MODEL", "nomic-embed-text");
        env::set_var("CHUNK_SIZE", "500");
        env::set_var("TOP_K_RESULTS", "not-a-number");
        env::set_var("AGENT_TIMEOUT", "5");
        env::set_var("MCP_SERVER_PORT", "9090");

        let settings = Settings::from_env().unwrap();

        assert_eq!(settings.vector_db.kind, VectorStoreKind::Memory);
        assert_eq!(settings.llm.provider, Provider::Ollama);
        assert_eq!(settings.llm.base_url, "http://localhost:11434");
        assert_eq!(settings.embedding.provider, Provider::Ollama);
        assert_eq!(settings.embedding.resolved_dimension(), 768);
        assert_eq!(settings.rag.chunk_size, 500, "chunk size mismatch");
        assert_eq!(settings.rag.top_k_results, 5, "unparsable value should fall back");
        assert_eq!(settings.embedding.timeout_secs, 5);
        assert_eq!(settings.mcp.port, 9090);
    }

    #[test]
    #[serial_test::serial]
    fn test_unsupported_backends() {
        clean_env();
        let _guard = guard((), |_| clean_env());

        env::set_var("VECTOR_DB_TYPE", "chroma");
        let err = Settings::from_env().unwrap_err();
        assert!(err
            .to_string()
            .contains("Unsupported vector database type: chroma"));

        clean_env();
        env::set_var("LLM_PROVIDER", "cohere");
        let err = Settings::from_env().unwrap_err();
        assert!(err.to_string().contains("Unsupported LLM provider: cohere"));
    }

    #[test]
    #[serial_test::serial]
    fn test_validate() {
        clean_env();
        let _guard = guard((), |_| clean_env());

        let settings = Settings::from_env().unwrap();
        assert_eq!(
            settings.validate().unwrap_err().to_string(),
            "Missing required configuration: vector_db_url, llm_api_key"
        );

        env::set_var("VECTOR_DB_URL", "http://localhost:6334");
        env::set_var("LLM_API_KEY", "sk-test");
        assert!(Settings::from_env().unwrap().validate().is_ok());

        // Local backends need neither
        clean_env();
        env::set_var("VECTOR_DB_TYPE", "memory");
        env::set_var("LLM_PROVIDER", "ollama");
        assert!(Settings::from_env().unwrap().validate().is_ok());
    }
}
