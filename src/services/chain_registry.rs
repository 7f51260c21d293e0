//! Chain id → client and settings, built once at startup and shared by handle

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ChainConfig;
use crate::error::ChainClientError;
use crate::services::chain_client::{AlloyChainClient, ChainClient};

#[derive(Clone)]
pub struct ChainHandle {
    pub client: Arc<dyn ChainClient>,
    pub config: ChainConfig,
}

#[derive(Clone, Default)]
pub struct ChainRegistry {
    chains: HashMap<u64, ChainHandle>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect an alloy client for every configured chain
    pub async fn connect(configs: &[ChainConfig]) -> Result<Self, ChainClientError> {
        let mut registry = Self::new();
        for config in configs {
            let client = AlloyChainClient::new(config.chain_id, &config.rpc_url).await?;
            registry.insert(config.clone(), Arc::new(client));
        }
        Ok(registry)
    }

    pub fn insert(&mut self, config: ChainConfig, client: Arc<dyn ChainClient>) {
        self.chains
            .insert(config.chain_id, ChainHandle { client, config });
    }

    pub fn get(&self, chain_id: u64) -> Option<&ChainHandle> {
        self.chains.get(&chain_id)
    }

    pub fn client(&self, chain_id: u64) -> Option<Arc<dyn ChainClient>> {
        self.chains.get(&chain_id).map(|h| h.client.clone())
    }

    pub fn chain_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.chains.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn handles(&self) -> impl Iterator<Item = &ChainHandle> {
        self.chains.values()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}
