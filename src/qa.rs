//! RAG-powered Q&A over the user's synced context.
//!
//! The answer path mirrors the brief path but stays conversational: embed the
//! question, retrieve grounding context, fold in recent conversation turns,
//! generate, and record the exchange. A degraded retrieval still produces an
//! answer; callers see it only as a smaller `context_used` count.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::context::ContextRetriever;
use crate::embeddings::Embedder;
use crate::error::BriefError;
use crate::generation::{GenerationRequest, ResponseShape, TextGenerator};
use crate::store::RecordStore;
use crate::types::{
    truncate_chars, ContextItem, Conversation, ConversationMessage, Role,
};

/// Context items retrieved per question.
const QA_CONTEXT_LIMIT: usize = 10;
/// Prior conversation messages folded into the prompt (3 exchanges).
const HISTORY_MESSAGES: usize = 6;
/// Context items reported back as sources.
const MAX_SOURCES: usize = 5;

const QA_SYSTEM_PROMPT: &str = "You are an AI business intelligence assistant. You help \
founders understand their business by answering questions grounded in their connected \
data sources (mail, issue tracker, chat, documents). Provide clear, actionable \
insights, connect dots between pieces of information, and be honest when the context \
is not enough. Keep responses concise.";

/// Pointer back to a context item that grounded an answer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    pub id: String,
    pub source_type: String,
    pub preview: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub conversation_id: String,
    pub context_used: usize,
}

pub struct AnswerService {
    store: Arc<dyn RecordStore>,
    retriever: Arc<ContextRetriever>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn TextGenerator>,
}

impl AnswerService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        retriever: Arc<ContextRetriever>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        Self {
            store,
            retriever,
            embedder,
            generator,
        }
    }

    /// Answer a question from the user's context, recording the exchange.
    pub async fn ask(
        &self,
        user_id: &str,
        question: &str,
        conversation_id: Option<&str>,
    ) -> Result<Answer, BriefError> {
        let embedding = self.embedder.embed(question);
        let context = self
            .retriever
            .retrieve(user_id, &embedding, QA_CONTEXT_LIMIT)
            .await;

        let history = match conversation_id {
            Some(id) => self
                .store
                .get_conversation(id)
                .await?
                .map(|c| c.messages)
                .unwrap_or_default(),
            None => Vec::new(),
        };

        let mut request = GenerationRequest::new(QA_SYSTEM_PROMPT, ResponseShape::Text);
        for message in history.iter().rev().take(HISTORY_MESSAGES).rev() {
            request.push(message.role, message.content.clone());
        }
        request.push(Role::User, build_question_prompt(question, &context));

        let answer = self.generator.generate(request).await?;

        let sources: Vec<SourceRef> = context
            .iter()
            .take(MAX_SOURCES)
            .map(|item| SourceRef {
                id: item.id.clone(),
                source_type: item.source_type.clone(),
                preview: truncate_chars(&item.text, 100),
            })
            .collect();

        let conversation_id = self
            .record_exchange(user_id, conversation_id, question, &answer, &sources)
            .await?;

        Ok(Answer {
            answer,
            context_used: context.len(),
            sources,
            conversation_id,
        })
    }

    /// A user's conversations, most recently updated first.
    pub async fn conversations(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Conversation>, BriefError> {
        Ok(self.store.conversations_for_user(user_id, limit).await?)
    }

    pub async fn conversation(&self, id: &str) -> Result<Option<Conversation>, BriefError> {
        Ok(self.store.get_conversation(id).await?)
    }

    async fn record_exchange(
        &self,
        user_id: &str,
        conversation_id: Option<&str>,
        question: &str,
        answer: &str,
        sources: &[SourceRef],
    ) -> Result<String, BriefError> {
        let now = Utc::now();
        let new_messages = vec![
            ConversationMessage {
                role: Role::User,
                content: question.to_string(),
                timestamp: now,
            },
            ConversationMessage {
                role: Role::Assistant,
                content: answer.to_string(),
                timestamp: now,
            },
        ];
        let context_used: Vec<String> = sources.iter().map(|s| s.id.clone()).collect();

        let existing = match conversation_id {
            Some(id) => self.store.get_conversation(id).await?,
            None => None,
        };

        let conversation = match existing {
            Some(mut conversation) => {
                conversation.messages.extend(new_messages);
                conversation.context_used = context_used;
                conversation.updated_at = now;
                conversation
            }
            None => Conversation {
                id: Uuid::new_v4().to_string(),
                user_id: user_id.to_string(),
                title: truncate_chars(question, 100),
                messages: new_messages,
                context_used,
                created_at: now,
                updated_at: now,
            },
        };

        let id = conversation.id.clone();
        self.store.upsert_conversation(conversation).await?;
        Ok(id)
    }
}

fn build_question_prompt(question: &str, context: &[ContextItem]) -> String {
    let context_str = context
        .iter()
        .map(|item| format!("[{}]: {}", item.source_type, item.text))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");

    format!(
        "Based on the following business context, answer the question.\n\n\
CONTEXT:\n{}\n\nQUESTION: {}\n\n\
Provide a clear, actionable answer. If the context doesn't contain enough \
information, say so.",
        context_str, question
    )
}
