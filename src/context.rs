//! Context retrieval for grounding generation requests.
//!
//! Two paths by design: semantic ranking against the vector index is the
//! ideal, but the system must still answer when the index is empty,
//! mis-provisioned, or the scoring call errors. The fallback is deterministic
//! recency retrieval over three source types, concatenated in fixed order
//! (documents, issues, chat messages) with an independent per-type limit.

use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::embeddings::VectorIndex;
use crate::store::RecordStore;
use crate::types::{ContextItem, SyncedRecord};

pub struct ContextRetriever {
    store: Arc<dyn RecordStore>,
    index: Arc<dyn VectorIndex>,
    config: RetrievalConfig,
}

impl ContextRetriever {
    pub fn new(
        store: Arc<dyn RecordStore>,
        index: Arc<dyn VectorIndex>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            index,
            config,
        }
    }

    /// Most relevant context items for a query embedding, best first.
    ///
    /// Never errors: a failed or empty similarity search degrades to the
    /// recency fallback, and a failed fallback source type is skipped. The
    /// caller sees degradation only as a smaller result set.
    pub async fn retrieve(
        &self,
        user_id: &str,
        query_embedding: &[f32],
        limit: usize,
    ) -> Vec<ContextItem> {
        match self
            .index
            .similarity_search(
                user_id,
                query_embedding,
                limit,
                self.config.similarity_threshold,
            )
            .await
        {
            Ok(hits) if !hits.is_empty() => hits
                .into_iter()
                .map(|hit| ContextItem {
                    id: hit.id,
                    source_type: hit.source_type,
                    text: hit.text,
                    similarity: Some(hit.score),
                })
                .collect(),
            Ok(_) => {
                log::debug!(
                    "Vector search returned nothing for user {}, using recency fallback",
                    user_id
                );
                self.fallback(user_id, limit).await
            }
            Err(e) => {
                log::warn!(
                    "Vector search failed for user {}, using recency fallback: {}",
                    user_id,
                    e
                );
                self.fallback(user_id, limit).await
            }
        }
    }

    /// Recency-based retrieval: up to `limit` items per source type.
    async fn fallback(&self, user_id: &str, limit: usize) -> Vec<ContextItem> {
        let mut items = Vec::new();

        match self.store.recent_documents(user_id, limit).await {
            Ok(docs) => items.extend(to_items(docs)),
            Err(e) => log::warn!("Failed to fetch documents for user {}: {}", user_id, e),
        }

        match self.store.recent_issues(user_id, limit).await {
            Ok(issues) => items.extend(to_items(issues)),
            Err(e) => log::warn!("Failed to fetch issues for user {}: {}", user_id, e),
        }

        match self.store.recent_chat_messages(user_id, limit).await {
            Ok(messages) => items.extend(to_items(messages)),
            Err(e) => log::warn!("Failed to fetch chat messages for user {}: {}", user_id, e),
        }

        items
    }
}

fn to_items(records: Vec<SyncedRecord>) -> impl Iterator<Item = ContextItem> {
    records.into_iter().map(|r| r.to_context_item(None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{backfill_user_embeddings, Embedder, HashEmbedder, MemoryVectorIndex};
    use crate::error::StoreError;
    use crate::store::MemoryStore;
    use crate::types::{
        ChatMessageRecord, DocumentRecord, IssueRecord, Provider, RecordPayload,
    };
    use async_trait::async_trait;
    use chrono::Utc;

    struct BrokenIndex;

    #[async_trait]
    impl VectorIndex for BrokenIndex {
        async fn similarity_search(
            &self,
            _user_id: &str,
            _embedding: &[f32],
            _k: usize,
            _threshold: f32,
        ) -> Result<Vec<crate::embeddings::SearchHit>, StoreError> {
            Err(StoreError("index unavailable".to_string()))
        }
    }

    fn doc(user: &str, id: &str, title: &str) -> SyncedRecord {
        SyncedRecord::new(
            user,
            Provider::Docs,
            RecordPayload::Document(DocumentRecord {
                source_id: id.to_string(),
                title: title.to_string(),
                doc_type: None,
                content: format!("{} content", title),
                updated_at: Utc::now(),
            }),
        )
    }

    fn issue(user: &str, id: &str) -> SyncedRecord {
        SyncedRecord::new(
            user,
            Provider::IssueTracker,
            RecordPayload::Issue(IssueRecord {
                source_id: id.to_string(),
                identifier: None,
                title: format!("issue {}", id),
                description: None,
                state_name: Some("Todo".to_string()),
                state_type: Some("unstarted".to_string()),
                priority: None,
                project_name: None,
                team_name: None,
                completed_at: None,
                updated_at: Utc::now(),
            }),
        )
    }

    fn message(user: &str, id: &str, text: &str) -> SyncedRecord {
        SyncedRecord::new(
            user,
            Provider::Chat,
            RecordPayload::ChatMessage(ChatMessageRecord {
                source_id: id.to_string(),
                channel_name: "general".to_string(),
                user_name: "sam".to_string(),
                text: text.to_string(),
                sent_at: Utc::now(),
            }),
        )
    }

    #[tokio::test]
    async fn test_empty_index_uses_fallback_with_per_type_limits() {
        let store = MemoryStore::shared();
        let mut records = Vec::new();
        for i in 0..5 {
            records.push(doc("u1", &format!("d{}", i), "Plan"));
            records.push(issue("u1", &format!("i{}", i)));
            records.push(message("u1", &format!("c{}", i), "note"));
        }
        store.upsert_records(&records).await.expect("upsert");

        let retriever = ContextRetriever::new(
            store.clone(),
            Arc::new(MemoryVectorIndex::new(store)),
            RetrievalConfig::default(),
        );

        let embedder = HashEmbedder::default();
        let items = retriever
            .retrieve("u1", &embedder.embed("plan"), 3)
            .await;

        // 3 per source type, fixed source order
        assert_eq!(items.len(), 9);
        assert!(items[..3].iter().all(|i| i.source_type == "document"));
        assert!(items[3..6].iter().all(|i| i.source_type == "issue"));
        assert!(items[6..].iter().all(|i| i.source_type == "chat_message"));
        assert!(items.iter().all(|i| i.similarity.is_none()));
    }

    #[tokio::test]
    async fn test_index_error_degrades_to_fallback() {
        let store = MemoryStore::shared();
        store
            .upsert_records(&[doc("u1", "d1", "Roadmap")])
            .await
            .expect("upsert");

        let retriever = ContextRetriever::new(
            store,
            Arc::new(BrokenIndex),
            RetrievalConfig::default(),
        );

        let embedder = HashEmbedder::default();
        let items = retriever
            .retrieve("u1", &embedder.embed("roadmap"), 10)
            .await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source_type, "document");
    }

    #[tokio::test]
    async fn test_primary_path_orders_by_similarity() {
        let store = MemoryStore::shared();
        let embedder = HashEmbedder::default();
        store
            .upsert_records(&[
                message("u1", "c1", "pricing launch strategy for spring"),
                message("u1", "c2", "database migration window tonight"),
            ])
            .await
            .expect("upsert");
        backfill_user_embeddings(store.as_ref(), &embedder, "u1", 100)
            .await
            .expect("backfill");

        let retriever = ContextRetriever::new(
            store.clone(),
            Arc::new(MemoryVectorIndex::new(store)),
            RetrievalConfig {
                similarity_threshold: 0.05,
                default_limit: 10,
            },
        );

        let items = retriever
            .retrieve("u1", &embedder.embed("spring pricing launch"), 10)
            .await;
        assert!(!items.is_empty());
        assert_eq!(items[0].id, "c1");
        assert!(items[0].similarity.expect("scored") > 0.0);
    }
}
