use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::external::{ChatMessage, LLMClient, TokenUsage};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions based on the provided context. \
If the context doesn't contain relevant information, say so. \
Always cite which document(s) you used to answer.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub answer: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
}

/// Answers a question from retrieved context with the completion model
pub struct Generator {
    client: Arc<dyn LLMClient>,
    temperature: f32,
}

impl Generator {
    pub fn new(client: Arc<dyn LLMClient>, temperature: f32) -> Self {
        Self {
            client,
            temperature,
        }
    }

    pub fn build_messages(
        query: &str,
        context: &str,
        system_prompt: Option<&str>,
    ) -> Vec<ChatMessage> {
        let user_message = format!(
            "Context:\n{}\n\nQuestion: {}\n\nPlease answer the question based on the context provided above.",
            context, query
        );

        vec![
            ChatMessage::system(system_prompt.unwrap_or(DEFAULT_SYSTEM_PROMPT)),
            ChatMessage::user(user_message),
        ]
    }

    pub async fn generate(
        &self,
        query: &str,
        context: &str,
        system_prompt: Option<&str>,
    ) -> Result<Generation> {
        let messages = Self::build_messages(query, context, system_prompt);
        let completion = self.client.complete(messages, self.temperature).await?;

        // Some backends leave the model out of the response
        let model = if completion.model.is_empty() {
            self.client.model_name()
        } else {
            completion.model
        };

        Ok(Generation {
            answer: completion.content,
            model,
            usage: completion.usage,
        })
    }
}
