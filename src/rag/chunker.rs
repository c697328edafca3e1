use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::external::Metadata;

/// A piece of a document ready to be embedded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub metadata: Metadata,
}

/// Splits text into overlapping character windows, preferring to cut after
/// a period, newline or space.
#[derive(Debug, Clone)]
pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for TextChunker {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl TextChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            bail!("Chunk size must be greater than zero");
        }
        if chunk_overlap >= chunk_size {
            bail!(
                "Chunk overlap ({}) must be smaller than chunk size ({})",
                chunk_overlap,
                chunk_size
            );
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split one text. Every chunk carries a copy of `metadata` plus
    /// `chunk_start`, `chunk_end` and `chunk_index` (character offsets).
    pub fn chunk_text(&self, text: &str, metadata: Option<&Metadata>) -> Vec<Chunk> {
        let chars: Vec<char> = text.chars().collect();
        let len = chars.len();
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < len {
            let mut end = (start + self.chunk_size).min(len);

            if end < len {
                let boundary = chars[start..end]
                    .iter()
                    .rposition(|c| matches!(c, '.' | '\n' | ' '))
                    .map(|offset| start + offset);
                if let Some(split) = boundary.filter(|&split| split > start) {
                    end = split + 1;
                }
            }

            let window: String = chars[start..end].iter().collect();
            let trimmed = window.trim();
            if !trimmed.is_empty() {
                let mut chunk_metadata = metadata.cloned().unwrap_or_default();
                chunk_metadata.insert("chunk_start".to_string(), Value::from(start));
                chunk_metadata.insert("chunk_end".to_string(), Value::from(end));
                chunk_metadata.insert("chunk_index".to_string(), Value::from(chunks.len()));

                chunks.push(Chunk {
                    text: trimmed.to_string(),
                    metadata: chunk_metadata,
                });
            }

            if end >= len {
                break;
            }
            // A short cut can leave the overlap reaching behind `start`
            let next = end.saturating_sub(self.chunk_overlap);
            start = if next > start { next } else { end };
        }

        chunks
    }

    /// Chunk several documents into parallel text/metadata lists
    pub fn chunk_documents(
        &self,
        documents: &[String],
        metadatas: Option<&[Metadata]>,
    ) -> Result<(Vec<String>, Vec<Metadata>)> {
        if let Some(metadatas) = metadatas {
            if metadatas.len() != documents.len() {
                bail!(
                    "Got {} metadata entries for {} documents",
                    metadatas.len(),
                    documents.len()
                );
            }
        }

        let mut texts = Vec::new();
        let mut chunk_metadatas = Vec::new();
        for (i, document) in documents.iter().enumerate() {
            let metadata = metadatas.map(|m| &m[i]);
            for chunk in self.chunk_text(document, metadata) {
                texts.push(chunk.text);
                chunk_metadatas.push(chunk.metadata);
            }
        }

        Ok((texts, chunk_metadatas))
    }
}
