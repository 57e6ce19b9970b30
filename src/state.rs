//! Application state: the explicitly constructed composition of the core's
//! services. Built once by the process's composition root and passed by
//! handle; no ambient global state.

use std::sync::Arc;

use crate::brief::BriefGenerator;
use crate::config::Config;
use crate::context::ContextRetriever;
use crate::embeddings::{Embedder, VectorIndex};
use crate::error::ConfigError;
use crate::generation::TextGenerator;
use crate::providers::ProviderRegistry;
use crate::qa::AnswerService;
use crate::retry::RetryPolicy;
use crate::store::{CredentialStore, RecordStore, SCHEMA_VERSION};
use crate::sync::SyncCoordinator;

/// External collaborators injected at startup.
pub struct Collaborators {
    pub store: Arc<dyn RecordStore>,
    pub credentials: Arc<dyn CredentialStore>,
    pub registry: Arc<ProviderRegistry>,
    pub embedder: Arc<dyn Embedder>,
    pub vector_index: Arc<dyn VectorIndex>,
    pub generator: Arc<dyn TextGenerator>,
}

/// Shared service graph handed to the scheduler and any surface layer.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn RecordStore>,
    pub credentials: Arc<dyn CredentialStore>,
    pub coordinator: Arc<SyncCoordinator>,
    pub retriever: Arc<ContextRetriever>,
    pub briefs: Arc<BriefGenerator>,
    pub qa: Arc<AnswerService>,
}

impl AppState {
    pub fn new(config: Config, collaborators: Collaborators) -> Result<Arc<Self>, ConfigError> {
        let Collaborators {
            store,
            credentials,
            registry,
            embedder,
            vector_index,
            generator,
        } = collaborators;

        // Schema drift is a startup error, not a per-write conditional.
        let capabilities = store.capabilities();
        if capabilities.schema_version != SCHEMA_VERSION {
            return Err(ConfigError(format!(
                "store schema version {} does not match expected {}",
                capabilities.schema_version, SCHEMA_VERSION
            )));
        }
        if !capabilities.vector_search {
            log::warn!("Vector search not provisioned; retrieval will use the recency fallback");
        }

        let coordinator = Arc::new(SyncCoordinator::new(
            store.clone(),
            credentials.clone(),
            registry,
            embedder.clone(),
            RetryPolicy::from(&config.retry),
            config.sync.clone(),
        ));

        let retriever = Arc::new(ContextRetriever::new(
            store.clone(),
            vector_index,
            config.retrieval.clone(),
        ));

        let briefs = Arc::new(BriefGenerator::new(
            store.clone(),
            retriever.clone(),
            embedder.clone(),
            generator.clone(),
        ));

        let qa = Arc::new(AnswerService::new(
            store.clone(),
            retriever.clone(),
            embedder,
            generator,
        ));

        Ok(Arc::new(Self {
            config,
            store,
            credentials,
            coordinator,
            retriever,
            briefs,
            qa,
        }))
    }
}
