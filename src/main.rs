//! Composition root: builds the service graph, starts the scheduler, and
//! drains it on SIGINT.
//!
//! Dev mode runs fully local: in-memory store, deterministic embedder, and a
//! stub generator that produces an empty brief skeleton. Production wiring
//! swaps the collaborators behind the same traits.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use briefos::error::GenerationError;
use briefos::generation::{GenerationRequest, ResponseShape, TextGenerator};
use briefos::{
    AppState, Collaborators, Config, HashEmbedder, MemoryStore, MemoryVectorIndex,
    ProviderRegistry, SchedulerHandle,
};

/// Dev-mode generator: returns a minimal valid response for each shape so the
/// pipeline can be exercised end to end without a model behind it.
struct StubGenerator;

#[async_trait]
impl TextGenerator for StubGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
        Ok(match request.response_shape {
            ResponseShape::JsonObject => {
                r#"{"priorities": [], "time_blocks": [], "quick_wins": [], "flags": []}"#
                    .to_string()
            }
            ResponseShape::Text => "No generation backend configured.".to_string(),
        })
    }
}

fn config_path() -> PathBuf {
    std::env::var_os("BRIEFOS_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("briefos.json"))
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Config::load(&config_path()) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };

    let store = MemoryStore::shared();
    let state = match AppState::new(
        config,
        Collaborators {
            store: store.clone(),
            credentials: store.clone(),
            registry: Arc::new(ProviderRegistry::new()),
            embedder: Arc::new(HashEmbedder::default()),
            vector_index: Arc::new(MemoryVectorIndex::new(store)),
            generator: Arc::new(StubGenerator),
        },
    ) {
        Ok(state) => state,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };

    let handle = match SchedulerHandle::start(state) {
        Ok(handle) => handle,
        Err(e) => {
            log::error!("Failed to start scheduler: {}", e);
            std::process::exit(1);
        }
    };

    for job in &handle.status().jobs {
        log::info!(
            "Registered job {} ({}), next fire {}",
            job.id,
            job.trigger,
            job.next_fire
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string())
        );
    }

    if tokio::signal::ctrl_c().await.is_err() {
        log::error!("Failed to listen for shutdown signal");
    }

    handle.shutdown().await;
}
