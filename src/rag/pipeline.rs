use std::sync::Arc;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::external::{Metadata, SearchHit, TokenUsage, VectorStore};
use crate::rag::{Generator, Retriever, TextChunker};

/// Answer to a question together with the documents it was built from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagAnswer {
    pub answer: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
    pub retrieved_documents: Vec<SearchHit>,
    pub num_documents: usize,
}

pub struct RagPipeline {
    store: Arc<dyn VectorStore>,
    retriever: Retriever,
    generator: Generator,
    chunker: TextChunker,
}

impl RagPipeline {
    pub fn new(
        store: Arc<dyn VectorStore>,
        generator: Generator,
        chunker: TextChunker,
        top_k: usize,
    ) -> Self {
        Self {
            retriever: Retriever::new(Arc::clone(&store), top_k),
            store,
            generator,
            chunker,
        }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Retrieve context for `query` and answer it
    pub async fn query(
        &self,
        query: &str,
        k: Option<usize>,
        filter: Option<Metadata>,
        system_prompt: Option<&str>,
    ) -> Result<RagAnswer> {
        let hits = self.retriever.retrieve(query, k, filter).await?;
        tracing::info!(num_documents = hits.len(), "Retrieved context");

        let context = Retriever::format_context(&hits);
        let generation = self.generator.generate(query, &context, system_prompt).await?;

        Ok(RagAnswer {
            answer: generation.answer,
            model: generation.model,
            usage: generation.usage,
            num_documents: hits.len(),
            retrieved_documents: hits,
        })
    }

    /// Store documents in the knowledge base, optionally chunked first.
    /// Returns the ids of what was stored.
    pub async fn add_documents(
        &self,
        documents: Vec<String>,
        metadatas: Option<Vec<Metadata>>,
        chunk: bool,
    ) -> Result<Vec<String>> {
        if documents.is_empty() {
            bail!("No documents to add");
        }

        let (texts, metadatas) = if chunk {
            let (texts, metadatas) = self
                .chunker
                .chunk_documents(&documents, metadatas.as_deref())?;
            (texts, Some(metadatas))
        } else {
            (documents, metadatas)
        };

        if texts.is_empty() {
            bail!("Documents contain no text");
        }

        tracing::info!(count = texts.len(), chunked = chunk, "Adding documents");
        self.store.add_documents(texts, metadatas, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::llm::MockLLMClient;
    use crate::external::vectordb::MockVectorStore;
    use crate::external::Completion;

    fn generator(answer: &'static str) -> Generator {
        let mut client = MockLLMClient::new();
        client
            .expect_complete()
            .withf(|messages, _| messages[1].content.starts_with("Context:\n[Document 1]\nRust"))
            .returning(move |_, _| {
                Ok(Completion {
                    content: answer.to_string(),
                    model: "gpt-4".to_string(),
                    usage: None,
                })
            });
        Generator::new(Arc::new(client), 0.7)
    }

    #[tokio::test]
    async fn test_query_returns_sources() {
        let mut store = MockVectorStore::new();
        store.expect_similarity_search().returning(|_, k, _| {
            assert_eq!(k, 5);
            Ok(vec![SearchHit {
                id: "doc-1".to_string(),
                document: "Rust has no garbage collector.".to_string(),
                metadata: Metadata::new(),
                score: 0.91,
            }])
        });

        let pipeline = RagPipeline::new(
            Arc::new(store),
            generator("It uses ownership."),
            TextChunker::default(),
            5,
        );
        let answer = pipeline
            .query("How does Rust manage memory?", None, None, None)
            .await
            .unwrap();

        assert_eq!(answer.answer, "It uses ownership.");
        assert_eq!(answer.num_documents, 1);
        assert_eq!(answer.retrieved_documents[0].id, "doc-1");
    }

    #[tokio::test]
    async fn test_add_documents_chunks_when_asked() {
        let mut store = MockVectorStore::new();
        store
            .expect_add_documents()
            .withf(|texts, metadatas, ids| {
                texts.len() == 2
                    && ids.is_none()
                    && metadatas
                        .as_ref()
                        .map(|m| m[1]["chunk_index"] == 1)
                        .unwrap_or(false)
            })
            .times(1)
            .returning(|texts, _, _| Ok(texts.iter().map(|_| "id".to_string()).collect()));

        let pipeline = RagPipeline::new(
            Arc::new(store),
            Generator::new(Arc::new(MockLLMClient::new()), 0.7),
            TextChunker::new(15, 2).unwrap(),
            5,
        );
        // Cut after "first half." then the rest
        let ids = pipeline
            .add_documents(vec!["first half. second half".to_string()], None, true)
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);
    }

    #[tokio::test]
    async fn test_add_documents_without_chunking() {
        let mut store = MockVectorStore::new();
        store
            .expect_add_documents()
            .withf(|texts, metadatas, _| texts.len() == 1 && metadatas.is_none())
            .times(1)
            .returning(|_, _, _| Ok(vec!["abc".to_string()]));

        let pipeline = RagPipeline::new(
            Arc::new(store),
            Generator::new(Arc::new(MockLLMClient::new()), 0.7),
            TextChunker::new(10, 2).unwrap(),
            5,
        );
        let ids = pipeline
            .add_documents(vec!["a long document kept whole".to_string()], None, false)
            .await
            .unwrap();
        assert_eq!(ids, vec!["abc"]);

        assert!(pipeline.add_documents(vec![], None, false).await.is_err());
    }
}
