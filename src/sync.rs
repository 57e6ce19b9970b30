//! Per-user sync coordination across all connected providers.
//!
//! Failure isolation is the contract here: every provider sync goes through
//! the retry executor, and one provider's exhausted retries never stop the
//! remaining providers from running. The aggregate report carries both sides.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use crate::config::SyncConfig;
use crate::embeddings::{backfill_user_embeddings, Embedder};
use crate::error::{ProviderError, SyncFailure};
use crate::providers::ProviderRegistry;
use crate::retry::{self, RetryPolicy};
use crate::store::{CredentialStore, RecordStore};
use crate::types::{Provider, TimeWindow, UserId};

/// Number of records embedded per backfill pass.
const EMBEDDING_BACKFILL_BATCH: usize = 200;

/// Aggregate outcome of one user's sync pass.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub user_id: UserId,
    /// Upserted record count per provider that completed.
    pub synced: HashMap<Provider, usize>,
    pub failures: Vec<SyncFailure>,
    /// Integrations whose provider failed permanently (auth revoked).
    pub deactivation_candidates: Vec<Provider>,
}

impl SyncReport {
    pub fn total_synced(&self) -> usize {
        self.synced.values().sum()
    }
}

pub struct SyncCoordinator {
    store: Arc<dyn RecordStore>,
    credentials: Arc<dyn CredentialStore>,
    registry: Arc<ProviderRegistry>,
    embedder: Arc<dyn Embedder>,
    retry_policy: RetryPolicy,
    config: SyncConfig,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        credentials: Arc<dyn CredentialStore>,
        registry: Arc<ProviderRegistry>,
        embedder: Arc<dyn Embedder>,
        retry_policy: RetryPolicy,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            credentials,
            registry,
            embedder,
            retry_policy,
            config,
        }
    }

    /// Run every connected provider's sync for one user.
    ///
    /// Providers without an active integration are skipped silently. An
    /// expired integration is refreshed first; refresh failure counts as that
    /// provider's failure and the loop continues.
    pub async fn sync_user(&self, user_id: &str) -> SyncReport {
        let mut report = SyncReport {
            user_id: user_id.to_string(),
            ..SyncReport::default()
        };
        let now = Utc::now();
        let mut needs_backfill = false;

        for client in self.registry.clients() {
            let provider = client.provider();

            let integration = match self.credentials.active_integration(user_id, provider).await {
                Ok(Some(integration)) => integration,
                Ok(None) => {
                    log::debug!("{}: no active {} integration, skipping", user_id, provider);
                    continue;
                }
                Err(e) => {
                    log::warn!(
                        "{}: could not load {} integration: {}",
                        user_id,
                        provider,
                        e
                    );
                    continue;
                }
            };

            if integration.is_expired(now) {
                log::info!("{}: {} credential expired, refreshing", user_id, provider);
                if let Err(e) = self.credentials.refresh(&integration).await {
                    let failure = SyncFailure {
                        provider,
                        user: user_id.to_string(),
                        attempts: 0,
                        cause: ProviderError::AuthRevoked(format!(
                            "credential refresh failed: {}",
                            e
                        )),
                    };
                    log::error!("{}", failure);
                    report.deactivation_candidates.push(provider);
                    report.failures.push(failure);
                    continue;
                }
            }

            let window = self.window_for(provider, now);
            let label = format!("{} sync for user {}", provider, user_id);
            let outcome = retry::run(&self.retry_policy, &label, || {
                client.sync(user_id, window)
            })
            .await;

            match outcome {
                Ok(records) => {
                    let count = match self.store.upsert_records(&records).await {
                        Ok(count) => count,
                        Err(e) => {
                            log::error!("{}: upsert failed for {}: {}", user_id, provider, e);
                            continue;
                        }
                    };
                    if records.iter().any(|r| r.payload.embedding_text().is_some()) {
                        needs_backfill = true;
                    }
                    if let Err(e) = self.credentials.mark_synced(user_id, provider, now).await {
                        log::warn!("{}: mark_synced failed for {}: {}", user_id, provider, e);
                    }
                    log::debug!("Synced {} {} record(s) for user {}", count, provider, user_id);
                    report.synced.insert(provider, count);
                }
                Err(retry_err) => {
                    let failure = SyncFailure {
                        provider,
                        user: user_id.to_string(),
                        attempts: retry_err.attempts,
                        cause: retry_err.cause,
                    };
                    log::error!("{}", failure);
                    if failure.cause.is_permanent() {
                        report.deactivation_candidates.push(provider);
                    }
                    report.failures.push(failure);
                }
            }
        }

        if needs_backfill {
            self.spawn_embedding_backfill(user_id);
        }

        log::info!(
            "Sync complete for user {}: {} record(s) across {} provider(s), {} failure(s)",
            user_id,
            report.total_synced(),
            report.synced.len(),
            report.failures.len()
        );

        report
    }

    fn window_for(&self, provider: Provider, now: chrono::DateTime<Utc>) -> TimeWindow {
        match provider {
            Provider::Mail => TimeWindow::last_days(now, self.config.mail_days_back),
            Provider::Calendar => TimeWindow::around(
                now,
                self.config.calendar_days_back,
                self.config.calendar_days_forward,
            ),
            Provider::IssueTracker => TimeWindow::last_days(now, self.config.issue_days_back),
            Provider::Chat => TimeWindow::last_days(now, self.config.chat_days_back),
            Provider::Docs => TimeWindow::last_days(now, self.config.docs_days_back),
        }
    }

    /// Fire-and-forget embedding backfill. Failure never fails the sync that
    /// spawned it.
    fn spawn_embedding_backfill(&self, user_id: &str) {
        let store = self.store.clone();
        let embedder = self.embedder.clone();
        let user_id = user_id.to_string();
        tokio::spawn(async move {
            match backfill_user_embeddings(
                store.as_ref(),
                embedder.as_ref(),
                &user_id,
                EMBEDDING_BACKFILL_BATCH,
            )
            .await
            {
                Ok(0) => {}
                Ok(updated) => {
                    log::info!("Embedded {} record(s) for user {}", updated, user_id)
                }
                Err(e) => log::warn!("Embedding backfill failed for user {}: {}", user_id, e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashEmbedder;
    use crate::providers::ProviderClient;
    use crate::store::MemoryStore;
    use crate::types::{ChatMessageRecord, Integration, RecordPayload, SyncedRecord};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct FixedClient {
        provider: Provider,
        records: Vec<SyncedRecord>,
    }

    #[async_trait]
    impl ProviderClient for FixedClient {
        fn provider(&self) -> Provider {
            self.provider
        }

        async fn sync(
            &self,
            _user_id: &str,
            _window: TimeWindow,
        ) -> Result<Vec<SyncedRecord>, ProviderError> {
            Ok(self.records.clone())
        }
    }

    struct FailingClient {
        provider: Provider,
        error: ProviderError,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ProviderClient for FailingClient {
        fn provider(&self) -> Provider {
            self.provider
        }

        async fn sync(
            &self,
            _user_id: &str,
            _window: TimeWindow,
        ) -> Result<Vec<SyncedRecord>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(self.error.clone())
        }
    }

    fn chat_record(user: &str, id: &str) -> SyncedRecord {
        SyncedRecord::new(
            user,
            Provider::Chat,
            RecordPayload::ChatMessage(ChatMessageRecord {
                source_id: id.to_string(),
                channel_name: "general".to_string(),
                user_name: "sam".to_string(),
                text: "shipping friday".to_string(),
                sent_at: Utc::now(),
            }),
        )
    }

    fn integration(user: &str, provider: Provider) -> Integration {
        Integration {
            user_id: user.to_string(),
            provider,
            access_credential: "tok".to_string(),
            refresh_credential: Some("refresh".to_string()),
            expires_at: None,
            is_active: true,
            last_synced_at: None,
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(50),
        }
    }

    fn coordinator(
        store: Arc<MemoryStore>,
        registry: ProviderRegistry,
    ) -> SyncCoordinator {
        SyncCoordinator::new(
            store.clone(),
            store,
            Arc::new(registry),
            Arc::new(HashEmbedder::default()),
            fast_policy(),
            SyncConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_failing_provider_does_not_block_others() {
        let store = MemoryStore::shared();
        store
            .upsert_integration(integration("u1", Provider::Chat))
            .await
            .expect("integration");
        store
            .upsert_integration(integration("u1", Provider::Mail))
            .await
            .expect("integration");

        let failing = Arc::new(FailingClient {
            provider: Provider::Mail,
            error: ProviderError::Network("connection reset".to_string()),
            calls: AtomicU32::new(0),
        });
        let mut registry = ProviderRegistry::new();
        registry.register(failing.clone());
        registry.register(Arc::new(FixedClient {
            provider: Provider::Chat,
            records: vec![chat_record("u1", "c1"), chat_record("u1", "c2")],
        }));

        let report = coordinator(store, registry).sync_user("u1").await;

        assert_eq!(report.synced.get(&Provider::Chat), Some(&2));
        assert_eq!(report.synced.get(&Provider::Mail), None);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].provider, Provider::Mail);
        assert_eq!(report.failures[0].attempts, 3);
        assert_eq!(failing.calls.load(Ordering::SeqCst), 3);
        assert!(report.deactivation_candidates.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_deactivation_candidate() {
        let store = MemoryStore::shared();
        store
            .upsert_integration(integration("u1", Provider::Mail))
            .await
            .expect("integration");

        let failing = Arc::new(FailingClient {
            provider: Provider::Mail,
            error: ProviderError::AuthRevoked("token revoked".to_string()),
            calls: AtomicU32::new(0),
        });
        let mut registry = ProviderRegistry::new();
        registry.register(failing.clone());

        let report = coordinator(store, registry).sync_user("u1").await;

        // Permanent error short-circuits the retry loop
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.deactivation_candidates, vec![Provider::Mail]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skips_providers_without_integration() {
        let store = MemoryStore::shared();
        // Chat integration only; Mail client registered but not connected
        store
            .upsert_integration(integration("u1", Provider::Chat))
            .await
            .expect("integration");

        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(FixedClient {
            provider: Provider::Chat,
            records: vec![chat_record("u1", "c1")],
        }));
        registry.register(Arc::new(FailingClient {
            provider: Provider::Mail,
            error: ProviderError::Network("never called".to_string()),
            calls: AtomicU32::new(0),
        }));

        let report = coordinator(store, registry).sync_user("u1").await;
        assert_eq!(report.failures.len(), 0);
        assert_eq!(report.total_synced(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_integration_is_refreshed_before_sync() {
        let store = MemoryStore::shared();
        let mut expired = integration("u1", Provider::Chat);
        expired.expires_at = Some(Utc::now() - chrono::Duration::minutes(5));
        store
            .upsert_integration(expired)
            .await
            .expect("integration");

        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(FixedClient {
            provider: Provider::Chat,
            records: vec![chat_record("u1", "c1")],
        }));

        let report = coordinator(store.clone(), registry).sync_user("u1").await;
        assert_eq!(report.total_synced(), 1);

        let refreshed = store
            .active_integration("u1", Provider::Chat)
            .await
            .expect("query")
            .expect("exists");
        assert!(!refreshed.is_expired(Utc::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_failure_isolates_provider() {
        let store = MemoryStore::shared();
        let mut expired = integration("u1", Provider::Chat);
        expired.expires_at = Some(Utc::now() - chrono::Duration::minutes(5));
        expired.refresh_credential = None; // refresh will fail
        store
            .upsert_integration(expired)
            .await
            .expect("integration");
        store
            .upsert_integration(integration("u1", Provider::Docs))
            .await
            .expect("integration");

        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(FixedClient {
            provider: Provider::Chat,
            records: vec![],
        }));
        registry.register(Arc::new(FixedClient {
            provider: Provider::Docs,
            records: vec![],
        }));

        let report = coordinator(store, registry).sync_user("u1").await;
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].provider, Provider::Chat);
        assert_eq!(report.deactivation_candidates, vec![Provider::Chat]);
        // Docs still ran
        assert!(report.synced.contains_key(&Provider::Docs));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_triggers_embedding_backfill() {
        let store = MemoryStore::shared();
        store
            .upsert_integration(integration("u1", Provider::Chat))
            .await
            .expect("integration");

        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(FixedClient {
            provider: Provider::Chat,
            records: vec![chat_record("u1", "c1")],
        }));

        coordinator(store.clone(), registry).sync_user("u1").await;

        // Backfill is fire-and-forget; give the spawned task a chance to run.
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if store
                .records_missing_embeddings("u1", 10)
                .await
                .expect("query")
                .is_empty()
            {
                return;
            }
        }
        panic!("embedding backfill never ran");
    }
}
