//! Storage interfaces and the in-memory implementation.
//!
//! The core depends only on these trait shapes; no logic below cares which
//! engine sits behind them. `MemoryStore` backs the binary's dev mode and the
//! test suite; a relational or key-value store slots in behind the same
//! traits.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;

use crate::error::StoreError;
use crate::types::{
    Brief, BusinessProfile, Conversation, Integration, Provider, RecordKey, RecordPayload,
    SyncedRecord, TimeWindow, User, UserId,
};

/// Record schema version this core reads and writes.
pub const SCHEMA_VERSION: u32 = 1;

/// What a store instance was provisioned with. Checked once at startup;
/// derived fields are never conditionally included per write.
#[derive(Debug, Clone, Copy)]
pub struct StoreCapabilities {
    pub schema_version: u32,
    /// Whether a vector index is provisioned for similarity search.
    pub vector_search: bool,
}

/// Persistence operations for synced records and derived entities.
///
/// Upserts are keyed by (user, provider, provider-native id) so re-running a
/// sync with identical input never creates duplicates.
#[async_trait]
pub trait RecordStore: Send + Sync {
    fn capabilities(&self) -> StoreCapabilities;

    async fn upsert_records(&self, records: &[SyncedRecord]) -> Result<usize, StoreError>;

    async fn get_record(&self, key: &RecordKey) -> Result<Option<SyncedRecord>, StoreError>;

    /// Records with embeddable text that have no embedding yet.
    async fn records_missing_embeddings(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<SyncedRecord>, StoreError>;

    async fn set_embedding(&self, key: &RecordKey, embedding: Vec<f32>) -> Result<(), StoreError>;

    /// Recent documents for a user, newest first by document update time.
    async fn recent_documents(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<SyncedRecord>, StoreError>;

    /// Recent issues, newest first by the tracker's last-updated time.
    async fn recent_issues(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<SyncedRecord>, StoreError>;

    /// Recent chat messages, newest first by send time.
    async fn recent_chat_messages(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<SyncedRecord>, StoreError>;

    /// Emails received at or after `since`, newest first.
    async fn recent_emails(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SyncedRecord>, StoreError>;

    /// Calendar events starting inside `window`, ordered by start time.
    async fn events_in_window(
        &self,
        user_id: &str,
        window: TimeWindow,
    ) -> Result<Vec<SyncedRecord>, StoreError>;

    /// Projects not in a terminal state.
    async fn active_projects(&self, user_id: &str) -> Result<Vec<SyncedRecord>, StoreError>;

    async fn upsert_user(&self, user: User) -> Result<(), StoreError>;

    async fn active_users(&self) -> Result<Vec<User>, StoreError>;

    async fn business_profile(&self, user_id: &str)
        -> Result<Option<BusinessProfile>, StoreError>;

    async fn upsert_business_profile(&self, profile: BusinessProfile) -> Result<(), StoreError>;

    /// Upsert keyed by (user, date): the second write for a date wins.
    async fn upsert_brief(&self, brief: Brief) -> Result<Brief, StoreError>;

    async fn brief_for_date(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Option<Brief>, StoreError>;

    async fn upsert_conversation(&self, conversation: Conversation) -> Result<(), StoreError>;

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError>;

    /// A user's conversations, most recently updated first.
    async fn conversations_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Conversation>, StoreError>;
}

/// Integration credential operations.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn active_integration(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<Integration>, StoreError>;

    async fn upsert_integration(&self, integration: Integration) -> Result<(), StoreError>;

    /// Exchange the refresh credential for a fresh access credential.
    async fn refresh(&self, integration: &Integration) -> Result<Integration, StoreError>;

    /// Soft-deactivate; the row stays for the audit trail.
    async fn deactivate(&self, user_id: &str, provider: Provider) -> Result<(), StoreError>;

    async fn mark_synced(
        &self,
        user_id: &str,
        provider: Provider,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Users holding at least one active integration.
    async fn users_with_active_integrations(&self) -> Result<Vec<UserId>, StoreError>;
}

// ============================================================================
// In-memory implementation
// ============================================================================

/// Dashmap-backed store for dev mode and tests.
#[derive(Default)]
pub struct MemoryStore {
    records: DashMap<RecordKey, SyncedRecord>,
    users: DashMap<UserId, User>,
    profiles: DashMap<UserId, BusinessProfile>,
    briefs: DashMap<(UserId, NaiveDate), Brief>,
    conversations: DashMap<String, Conversation>,
    integrations: DashMap<(UserId, Provider), Integration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Records carrying an embedding, for the in-memory vector index.
    pub fn embedded_records(&self, user_id: &str) -> Vec<SyncedRecord> {
        self.user_records(user_id)
            .into_iter()
            .filter(|r| r.embedding.is_some())
            .collect()
    }

    fn user_records(&self, user_id: &str) -> Vec<SyncedRecord> {
        self.records
            .iter()
            .filter(|entry| entry.key().user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect()
    }
}

fn take_sorted<K: Ord>(
    mut records: Vec<SyncedRecord>,
    limit: usize,
    sort_key: impl Fn(&SyncedRecord) -> K,
) -> Vec<SyncedRecord> {
    records.sort_by_key(|r| std::cmp::Reverse(sort_key(r)));
    records.truncate(limit);
    records
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities {
            schema_version: SCHEMA_VERSION,
            vector_search: true,
        }
    }

    async fn upsert_records(&self, records: &[SyncedRecord]) -> Result<usize, StoreError> {
        for record in records {
            self.records.insert(record.key(), record.clone());
        }
        Ok(records.len())
    }

    async fn get_record(&self, key: &RecordKey) -> Result<Option<SyncedRecord>, StoreError> {
        Ok(self.records.get(key).map(|entry| entry.value().clone()))
    }

    async fn records_missing_embeddings(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<SyncedRecord>, StoreError> {
        let mut out: Vec<SyncedRecord> = self
            .user_records(user_id)
            .into_iter()
            .filter(|r| r.embedding.is_none() && r.payload.embedding_text().is_some())
            .collect();
        out.truncate(limit);
        Ok(out)
    }

    async fn set_embedding(&self, key: &RecordKey, embedding: Vec<f32>) -> Result<(), StoreError> {
        match self.records.get_mut(key) {
            Some(mut entry) => {
                entry.value_mut().embedding = Some(embedding);
                Ok(())
            }
            None => Err(StoreError(format!(
                "record not found: {}/{}/{}",
                key.user_id, key.provider, key.source_id
            ))),
        }
    }

    async fn recent_documents(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<SyncedRecord>, StoreError> {
        let docs = self
            .user_records(user_id)
            .into_iter()
            .filter(|r| matches!(r.payload, RecordPayload::Document(_)))
            .collect();
        Ok(take_sorted(docs, limit, |r| match &r.payload {
            RecordPayload::Document(d) => d.updated_at,
            _ => DateTime::<Utc>::MIN_UTC,
        }))
    }

    async fn recent_issues(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<SyncedRecord>, StoreError> {
        let issues = self
            .user_records(user_id)
            .into_iter()
            .filter(|r| matches!(r.payload, RecordPayload::Issue(_)))
            .collect();
        Ok(take_sorted(issues, limit, |r| match &r.payload {
            RecordPayload::Issue(i) => i.updated_at,
            _ => DateTime::<Utc>::MIN_UTC,
        }))
    }

    async fn recent_chat_messages(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<SyncedRecord>, StoreError> {
        let messages = self
            .user_records(user_id)
            .into_iter()
            .filter(|r| matches!(r.payload, RecordPayload::ChatMessage(_)))
            .collect();
        Ok(take_sorted(messages, limit, |r| match &r.payload {
            RecordPayload::ChatMessage(m) => m.sent_at,
            _ => DateTime::<Utc>::MIN_UTC,
        }))
    }

    async fn recent_emails(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SyncedRecord>, StoreError> {
        let emails = self
            .user_records(user_id)
            .into_iter()
            .filter(|r| match &r.payload {
                RecordPayload::Email(e) => e.received_at >= since,
                _ => false,
            })
            .collect();
        Ok(take_sorted(emails, limit, |r| match &r.payload {
            RecordPayload::Email(e) => e.received_at,
            _ => DateTime::<Utc>::MIN_UTC,
        }))
    }

    async fn events_in_window(
        &self,
        user_id: &str,
        window: TimeWindow,
    ) -> Result<Vec<SyncedRecord>, StoreError> {
        let mut events: Vec<SyncedRecord> = self
            .user_records(user_id)
            .into_iter()
            .filter(|r| match &r.payload {
                RecordPayload::CalendarEvent(e) => {
                    e.start_time >= window.start && e.start_time < window.end
                }
                _ => false,
            })
            .collect();
        events.sort_by_key(|r| match &r.payload {
            RecordPayload::CalendarEvent(e) => e.start_time,
            _ => DateTime::<Utc>::MIN_UTC,
        });
        Ok(events)
    }

    async fn active_projects(&self, user_id: &str) -> Result<Vec<SyncedRecord>, StoreError> {
        Ok(self
            .user_records(user_id)
            .into_iter()
            .filter(|r| match &r.payload {
                RecordPayload::Project(p) => !matches!(
                    p.state.as_deref(),
                    Some("completed") | Some("canceled") | Some("cancelled")
                ),
                _ => false,
            })
            .collect())
    }

    async fn upsert_user(&self, user: User) -> Result<(), StoreError> {
        self.users.insert(user.id.clone(), user);
        Ok(())
    }

    async fn active_users(&self) -> Result<Vec<User>, StoreError> {
        let mut users: Vec<User> = self
            .users
            .iter()
            .filter(|entry| entry.value().is_active)
            .map(|entry| entry.value().clone())
            .collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(users)
    }

    async fn business_profile(
        &self,
        user_id: &str,
    ) -> Result<Option<BusinessProfile>, StoreError> {
        Ok(self.profiles.get(user_id).map(|entry| entry.value().clone()))
    }

    async fn upsert_business_profile(&self, profile: BusinessProfile) -> Result<(), StoreError> {
        self.profiles.insert(profile.user_id.clone(), profile);
        Ok(())
    }

    async fn upsert_brief(&self, brief: Brief) -> Result<Brief, StoreError> {
        self.briefs
            .insert((brief.user_id.clone(), brief.brief_date), brief.clone());
        Ok(brief)
    }

    async fn brief_for_date(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Option<Brief>, StoreError> {
        Ok(self
            .briefs
            .get(&(user_id.to_string(), date))
            .map(|entry| entry.value().clone()))
    }

    async fn upsert_conversation(&self, conversation: Conversation) -> Result<(), StoreError> {
        self.conversations
            .insert(conversation.id.clone(), conversation);
        Ok(())
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        Ok(self.conversations.get(id).map(|entry| entry.value().clone()))
    }

    async fn conversations_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Conversation>, StoreError> {
        let mut out: Vec<Conversation> = self
            .conversations
            .iter()
            .filter(|entry| entry.value().user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect();
        out.sort_by_key(|c| std::cmp::Reverse(c.updated_at));
        out.truncate(limit);
        Ok(out)
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn active_integration(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<Integration>, StoreError> {
        Ok(self
            .integrations
            .get(&(user_id.to_string(), provider))
            .map(|entry| entry.value().clone())
            .filter(|integration| integration.is_active))
    }

    async fn upsert_integration(&self, integration: Integration) -> Result<(), StoreError> {
        self.integrations.insert(
            (integration.user_id.clone(), integration.provider),
            integration,
        );
        Ok(())
    }

    async fn refresh(&self, integration: &Integration) -> Result<Integration, StoreError> {
        // Dev-mode refresh: a real credential store performs the token
        // exchange. Requires a refresh credential, like the real exchange.
        if integration.refresh_credential.is_none() {
            return Err(StoreError(format!(
                "no refresh credential for {}/{}",
                integration.user_id, integration.provider
            )));
        }
        let mut refreshed = integration.clone();
        refreshed.expires_at = Some(Utc::now() + chrono::Duration::hours(1));
        self.upsert_integration(refreshed.clone()).await?;
        Ok(refreshed)
    }

    async fn deactivate(&self, user_id: &str, provider: Provider) -> Result<(), StoreError> {
        if let Some(mut entry) = self.integrations.get_mut(&(user_id.to_string(), provider)) {
            entry.value_mut().is_active = false;
        }
        Ok(())
    }

    async fn mark_synced(
        &self,
        user_id: &str,
        provider: Provider,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if let Some(mut entry) = self.integrations.get_mut(&(user_id.to_string(), provider)) {
            entry.value_mut().last_synced_at = Some(at);
        }
        Ok(())
    }

    async fn users_with_active_integrations(&self) -> Result<Vec<UserId>, StoreError> {
        let mut seen: HashSet<UserId> = HashSet::new();
        for entry in self.integrations.iter() {
            if entry.value().is_active {
                seen.insert(entry.value().user_id.clone());
            }
        }
        let mut users: Vec<UserId> = seen.into_iter().collect();
        users.sort();
        Ok(users)
    }
}
