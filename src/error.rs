//! Error types for the sync and generation pipeline.
//!
//! Errors are classified by recoverability and isolated at the smallest
//! meaningful unit: a provider failure does not fail a user's sync, a user
//! failure does not fail the batch job, a job failure does not stop the
//! scheduler.

use thiserror::Error;

use crate::types::{Provider, UserId};

/// Error raised by a provider client during a sync call.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    // Transient: retried with backoff
    #[error("network error: {0}")]
    Network(String),

    #[error("operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("API rate limit exceeded")]
    RateLimit,

    // Permanent: not retried; the integration becomes a deactivation candidate
    #[error("authorization revoked: {0}")]
    AuthRevoked(String),

    #[error("provider rejected request: {0}")]
    Rejected(String),
}

impl ProviderError {
    /// Returns true if this error is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Network(_) | ProviderError::Timeout(_) | ProviderError::RateLimit
        )
    }

    /// Permanent failures surface the integration as a deactivation candidate.
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

/// Exhausted retries (or a permanent error) for one provider of one user.
#[derive(Debug, Clone, Error)]
#[error("{provider} sync failed for user {user} after {attempts} attempt(s): {cause}")]
pub struct SyncFailure {
    pub provider: Provider,
    pub user: UserId,
    pub attempts: u32,
    pub cause: ProviderError,
}

/// Storage-layer error. The core depends only on the trait shape, so this is
/// deliberately opaque about the engine behind it.
#[derive(Debug, Clone, Error)]
#[error("store error: {0}")]
pub struct StoreError(pub String);

/// Error from the opaque text-generation capability.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("generation backend error: {0}")]
    Backend(String),

    #[error("generation timed out")]
    Timeout,
}

/// Malformed structured output from the generation call.
///
/// Carries the raw response body so callers can log it and decide whether to
/// retry or report.
#[derive(Debug, Clone, Error)]
#[error("failed to parse generation response: {message}")]
pub struct GenerationParseError {
    pub message: String,
    pub raw: String,
}

/// Error raised while generating a brief or answering a question.
#[derive(Debug, Error)]
pub enum BriefError {
    #[error("business profile not found for user {0}; onboarding incomplete")]
    MissingProfile(UserId),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Parse(#[from] GenerationParseError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Uncaught error escaping a job body. Caught at the executor boundary,
/// logged and counted, never propagated out of the scheduler.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct JobExecutionError(pub String);

/// Startup configuration error (bad cron expression, unknown timezone).
#[derive(Debug, Clone, Error)]
#[error("configuration error: {0}")]
pub struct ConfigError(pub String);
