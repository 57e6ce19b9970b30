//! Opaque text-generation capability.
//!
//! The core only needs "generate text from a structured request". Prompt
//! quality and the model behind it are a collaborator's concern; parsing and
//! validating the structured output stays in this crate (`brief`, `qa`).

use async_trait::async_trait;

use crate::error::GenerationError;
use crate::types::Role;

/// Hint for the shape the response body should take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// Body is expected to be a single JSON object.
    JsonObject,
    /// Free-form prose.
    Text,
}

#[derive(Debug, Clone)]
pub struct GenerationMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub messages: Vec<GenerationMessage>,
    pub response_shape: ResponseShape,
}

impl GenerationRequest {
    pub fn new(system_prompt: impl Into<String>, response_shape: ResponseShape) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages: Vec::new(),
            response_shape,
        }
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(GenerationMessage {
            role,
            content: content.into(),
        });
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Produce the raw response body for a request.
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError>;
}
