//! briefos: background sync scheduler and context-retrieval core for AI
//! daily briefs.
//!
//! The pipeline: the job scheduler fires the sync coordinator per active user
//! on a timer, provider syncs land normalized records in the store, the
//! context retriever reads that store (plus a vector index) to ground brief
//! generation and Q&A. Every layer isolates failures at the smallest unit
//! (provider, user, job) so one flaky external system degrades output instead
//! of stopping the process.

pub mod brief;
pub mod config;
pub mod context;
pub mod embeddings;
pub mod error;
pub mod executor;
pub mod generation;
pub mod providers;
pub mod qa;
pub mod retry;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod sync;
pub mod types;

pub use brief::BriefGenerator;
pub use config::Config;
pub use context::ContextRetriever;
pub use embeddings::{Embedder, HashEmbedder, MemoryVectorIndex, VectorIndex};
pub use error::{
    BriefError, GenerationError, GenerationParseError, ProviderError, StoreError, SyncFailure,
};
pub use generation::{GenerationRequest, ResponseShape, TextGenerator};
pub use providers::{ProviderClient, ProviderRegistry};
pub use qa::AnswerService;
pub use retry::RetryPolicy;
pub use scheduler::{JobId, SchedulerHandle, SchedulerStatus};
pub use state::{AppState, Collaborators};
pub use store::{CredentialStore, MemoryStore, RecordStore, StoreCapabilities};
pub use sync::{SyncCoordinator, SyncReport};
pub use types::{ContextItem, Provider, SyncedRecord};
