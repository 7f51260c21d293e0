#![allow(dead_code)]

use alloy::primitives::{Address, B256, Bytes, U256};
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use parking_lot::Mutex;
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use std::collections::HashMap;
use std::sync::Arc;

use structured_products_indexer::AppState;
use structured_products_indexer::config::{
    ChainConfig, IngestionSettings, SettlementSettings, SignatureScheme, TransferLayout, WebhookSettings,
};
use structured_products_indexer::error::ChainClientError;
use structured_products_indexer::services::chain_client::{
    ChainClient, LogFilter, ProductAddresses, ProductStats, RawLog, TxReceipt,
};
use structured_products_indexer::entities::products;
use structured_products_indexer::models::product::IssuanceCycle;
use structured_products_indexer::services::abi::IProductFactory;
use structured_products_indexer::services::chain_registry::ChainRegistry;
use structured_products_indexer::services::ingestion::IngestionEngine;
use structured_products_indexer::services::early_withdraw::EarlyWithdrawService;
use structured_products_indexer::services::pendle::PendleClient;
use structured_products_indexer::services::product_store::ProductStore;
use structured_products_indexer::services::settlement::SettlementService;
use structured_products_indexer::services::webhook_ingestion::WebhookIngestionEngine;

pub const CHAIN_ID: u64 = 42161;
pub const WEBHOOK_SECRET: &str = "test-secret";

/// In-memory SQLite migrated with the real migrator.
///
/// A single connection: every pooled connection to `sqlite::memory:` would
/// otherwise see its own empty database.
pub async fn setup_test_db() -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new("sqlite::memory:".to_string());
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options).await?;
    migration::Migrator::up(&db, None).await?;
    Ok(db)
}

pub fn addr(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

pub fn factory() -> Address {
    addr(0xfa)
}

pub fn chain_config() -> ChainConfig {
    ChainConfig {
        chain_id: CHAIN_ID,
        rpc_url: "http://localhost:8545".to_string(),
        factory_address: factory(),
        decimals: 6,
        start_block: None,
    }
}

pub fn webhook_settings() -> WebhookSettings {
    WebhookSettings {
        secret: WEBHOOK_SECRET.to_string(),
        scheme: SignatureScheme::Keccak256,
        timeout: std::time::Duration::from_secs(5),
        layout: TransferLayout::default(),
    }
}

pub fn registry(client: Arc<MockChainClient>) -> ChainRegistry {
    let mut registry = ChainRegistry::new();
    registry.insert(chain_config(), client);
    registry
}

/// Full application state over the mock chain
pub fn app_state(db: DatabaseConnection, client: Arc<MockChainClient>, pendle_url: &str) -> AppState {
    let store = ProductStore::new(db.clone());
    let chains = registry(client);
    AppState {
        db,
        store: store.clone(),
        chains: chains.clone(),
        webhook: Arc::new(WebhookIngestionEngine::new(
            store.clone(),
            chains.clone(),
            webhook_settings(),
        )),
        settlement: Arc::new(SettlementService::new(
            store.clone(),
            chains.clone(),
            SettlementSettings::default(),
        )),
        early_withdraw: Arc::new(EarlyWithdrawService::new(
            store,
            chains,
            PendleClient::new(pendle_url.to_string()),
        )),
    }
}

/// Build a mined log for `event` emitted by `emitter`
pub fn log_of<E: SolEvent>(
    emitter: Address,
    event: &E,
    block_number: u64,
    tx_hash: B256,
    log_index: u64,
) -> RawLog {
    let data = event.encode_log_data();
    RawLog {
        address: emitter,
        topics: data.topics().to_vec(),
        data: Bytes::from(data.data.to_vec()),
        block_number,
        transaction_hash: tx_hash,
        log_index,
    }
}

#[derive(Default)]
struct MockState {
    latest_block: u64,
    logs: Vec<RawLog>,
    stats: HashMap<Address, ProductStats>,
    cycles: HashMap<Address, IssuanceCycle>,
    /// Principal reads left to fail with a provider outage
    principal_outages: u32,
    addresses: HashMap<Address, ProductAddresses>,
    principal: HashMap<(Address, Address), U256>,
    decimals: HashMap<Address, u8>,
    balances: HashMap<(Address, Address), U256>,
    receipts: HashMap<B256, TxReceipt>,
    submissions: Vec<Submission>,
    fail_submissions: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub signer_key: String,
    pub product: Address,
    pub users: Vec<Address>,
    pub amounts: Vec<U256>,
}

/// Scriptable chain: every read answers from state set by the test
pub struct MockChainClient {
    chain_id: u64,
    state: Mutex<MockState>,
}

impl MockChainClient {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn set_latest_block(&self, block: u64) {
        self.state.lock().latest_block = block;
    }

    pub fn push_log(&self, log: RawLog) {
        self.state.lock().logs.push(log);
    }

    pub fn set_stats(&self, product: Address, status: u8, current: u64, max: u64) {
        self.state.lock().stats.insert(
            product,
            ProductStats {
                status,
                current_capacity: U256::from(current),
                max_capacity: U256::from(max),
                cycle: None,
            },
        );
    }

    pub fn set_cycle(&self, product: Address, cycle: IssuanceCycle) {
        self.state.lock().cycles.insert(product, cycle);
    }

    /// Fail the next `count` principal-balance reads as a node outage would
    pub fn fail_principal_reads(&self, count: u32) {
        self.state.lock().principal_outages = count;
    }

    pub fn set_addresses(&self, product: Address, addresses: ProductAddresses) {
        self.state.lock().addresses.insert(product, addresses);
    }

    pub fn set_principal(&self, product: Address, user: Address, balance: u64) {
        self.state
            .lock()
            .principal
            .insert((product, user), U256::from(balance));
    }

    pub fn set_decimals(&self, token: Address, decimals: u8) {
        self.state.lock().decimals.insert(token, decimals);
    }

    pub fn set_balance(&self, token: Address, owner: Address, balance: U256) {
        self.state.lock().balances.insert((token, owner), balance);
    }

    pub fn set_receipt(&self, tx_hash: B256, status: bool) {
        self.state.lock().receipts.insert(
            tx_hash,
            TxReceipt {
                status,
                block_number: Some(1),
            },
        );
    }

    pub fn fail_submissions(&self, fail: bool) {
        self.state.lock().fail_submissions = fail;
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state.lock().submissions.clone()
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn latest_block(&self) -> Result<u64, ChainClientError> {
        Ok(self.state.lock().latest_block)
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, ChainClientError> {
        let state = self.state.lock();
        Ok(state
            .logs
            .iter()
            .filter(|l| filter.addresses.is_empty() || filter.addresses.contains(&l.address))
            .filter(|l| {
                filter.topics0.is_empty()
                    || l.topics.first().is_some_and(|t| filter.topics0.contains(t))
            })
            .filter(|l| l.block_number >= filter.from_block && l.block_number <= filter.to_block)
            .cloned()
            .collect())
    }

    async fn product_stats(&self, product: Address) -> Result<ProductStats, ChainClientError> {
        let state = self.state.lock();
        let mut stats = state
            .stats
            .get(&product)
            .cloned()
            .ok_or_else(|| ChainClientError::ContractCall(format!("no stats for {}", product)))?;
        stats.cycle = state.cycles.get(&product).cloned();
        Ok(stats)
    }

    async fn product_addresses(
        &self,
        product: Address,
    ) -> Result<ProductAddresses, ChainClientError> {
        self.state
            .lock()
            .addresses
            .get(&product)
            .copied()
            .ok_or_else(|| ChainClientError::ContractCall(format!("no addresses for {}", product)))
    }

    async fn principal_balance(
        &self,
        product: Address,
        user: Address,
    ) -> Result<U256, ChainClientError> {
        let mut state = self.state.lock();
        if state.principal_outages > 0 {
            state.principal_outages -= 1;
            return Err(ChainClientError::MaxRetriesExceeded(
                "principalBalance: connection reset".to_string(),
            ));
        }
        Ok(state
            .principal
            .get(&(product, user))
            .copied()
            .unwrap_or(U256::ZERO))
    }

    async fn token_decimals(&self, token: Address) -> Result<u8, ChainClientError> {
        self.state
            .lock()
            .decimals
            .get(&token)
            .copied()
            .ok_or_else(|| ChainClientError::ContractCall(format!("no decimals for {}", token)))
    }

    async fn token_balance(
        &self,
        token: Address,
        owner: Address,
    ) -> Result<U256, ChainClientError> {
        Ok(self
            .state
            .lock()
            .balances
            .get(&(token, owner))
            .copied()
            .unwrap_or(U256::ZERO))
    }

    async fn store_option_position(
        &self,
        signer_key: &str,
        product: Address,
        users: Vec<Address>,
        amounts: Vec<U256>,
    ) -> Result<B256, ChainClientError> {
        let mut state = self.state.lock();
        if state.fail_submissions {
            return Err(ChainClientError::Transaction("execution reverted".to_string()));
        }
        state.submissions.push(Submission {
            signer_key: signer_key.to_string(),
            product,
            users,
            amounts,
        });
        Ok(B256::repeat_byte(state.submissions.len() as u8))
    }

    async fn transaction_receipt(
        &self,
        tx_hash: B256,
    ) -> Result<Option<TxReceipt>, ChainClientError> {
        Ok(self.state.lock().receipts.get(&tx_hash).copied())
    }
}

/// Announce `product` through the factory and return its stored row
pub async fn seed_product(
    store: &ProductStore,
    client: &Arc<MockChainClient>,
    product: Address,
) -> products::Model {
    client.set_stats(product, 1, 0, 1000);
    client.set_addresses(
        product,
        ProductAddresses {
            token: addr(0x11),
            pt: addr(0x12),
            market: addr(0x13),
            currency: addr(0x14),
        },
    );
    client.set_latest_block(100);

    let engine = IngestionEngine::new(
        chain_config(),
        client.clone(),
        store.clone(),
        IngestionSettings::default(),
    );
    let log = log_of(
        factory(),
        &IProductFactory::ProductCreated {
            product,
            name: "X".to_string(),
            underlying: "BTC".to_string(),
            maxCapacity: U256::from(1000u64),
        },
        100,
        B256::repeat_byte(0xc0),
        0,
    );
    engine.handle_log(&log).await.expect("Failed to seed product");
    store
        .find_product(CHAIN_ID, &product)
        .await
        .expect("Failed to load product")
        .expect("Product was not created")
}
