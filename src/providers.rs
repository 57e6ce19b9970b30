//! Provider client interface and registry.
//!
//! One client per external service. The core depends only on this shape:
//! `sync(user, window)` returns normalized records or a classified
//! `ProviderError`. Concrete API plumbing (OAuth wire formats, GraphQL/REST
//! pagination) lives behind implementations of this trait.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::types::{Provider, SyncedRecord, TimeWindow};

#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn provider(&self) -> Provider;

    /// Fetch items inside `window` and normalize them into domain records.
    async fn sync(
        &self,
        user_id: &str,
        window: TimeWindow,
    ) -> Result<Vec<SyncedRecord>, ProviderError>;
}

/// Registry of configured provider clients.
#[derive(Default)]
pub struct ProviderRegistry {
    clients: HashMap<Provider, Arc<dyn ProviderClient>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, client: Arc<dyn ProviderClient>) {
        self.clients.insert(client.provider(), client);
    }

    pub fn get(&self, provider: Provider) -> Option<Arc<dyn ProviderClient>> {
        self.clients.get(&provider).cloned()
    }

    /// Registered clients in a stable provider order.
    pub fn clients(&self) -> Vec<Arc<dyn ProviderClient>> {
        Provider::ALL
            .iter()
            .filter_map(|p| self.clients.get(p).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
