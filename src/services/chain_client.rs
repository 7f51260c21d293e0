//! Per-chain JSON-RPC access
//!
//! `ChainClient` is the seam every component uses to reach a chain: log
//! retrieval, typed product/ERC-20 reads, the settlement write and receipt
//! lookups. `AlloyChainClient` is the production implementation over an alloy
//! HTTP provider; reads are retried with exponential backoff, writes are not.

use alloy::{
    eips::BlockNumberOrTag,
    network::EthereumWallet,
    primitives::{Address, B256, Bytes, U256},
    providers::{Provider, ProviderBuilder, RootProvider},
    rpc::types::Filter,
    signers::local::PrivateKeySigner,
    transports::http::{Client, Http},
};
use async_trait::async_trait;
use reqwest::Url;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::ChainClientError;
use crate::models::product::IssuanceCycle;
use crate::services::abi::{IERC20, IProduct};
use crate::services::units::u256_to_f64;

/// Maximum number of retry attempts for RPC reads
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (milliseconds)
const RETRY_BASE_DELAY_MS: u64 = 1000;

/// A mined log, detached from the provider's types
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub transaction_hash: B256,
    pub log_index: u64,
}

/// Inclusive block range over a set of emitters and event signatures
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    pub addresses: Vec<Address>,
    /// Accepted topic0 values; empty matches every event
    pub topics0: Vec<B256>,
    pub from_block: u64,
    pub to_block: u64,
}

/// Aggregate on-chain state of a product
#[derive(Debug, Clone, PartialEq)]
pub struct ProductStats {
    pub status: u8,
    pub current_capacity: U256,
    pub max_capacity: U256,
    /// `None` when the contract exposes no issuance cycle yet
    pub cycle: Option<IssuanceCycle>,
}

/// Contracts a product is wired to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductAddresses {
    pub token: Address,
    pub pt: Address,
    pub market: Address,
    pub currency: Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceipt {
    /// false when the transaction reverted
    pub status: bool,
    pub block_number: Option<u64>,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    fn chain_id(&self) -> u64;

    async fn latest_block(&self) -> Result<u64, ChainClientError>;

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, ChainClientError>;

    async fn product_stats(&self, product: Address) -> Result<ProductStats, ChainClientError>;

    async fn product_addresses(&self, product: Address)
    -> Result<ProductAddresses, ChainClientError>;

    async fn principal_balance(
        &self,
        product: Address,
        user: Address,
    ) -> Result<U256, ChainClientError>;

    async fn token_decimals(&self, token: Address) -> Result<u8, ChainClientError>;

    async fn token_balance(&self, token: Address, owner: Address)
    -> Result<U256, ChainClientError>;

    /// Submit `storeOptionPosition(users, amounts)` signed by `signer_key`.
    ///
    /// Returns once the node accepts the transaction; mining is not awaited.
    async fn store_option_position(
        &self,
        signer_key: &str,
        product: Address,
        users: Vec<Address>,
        amounts: Vec<U256>,
    ) -> Result<B256, ChainClientError>;

    /// `None` while the transaction is unknown or not yet mined
    async fn transaction_receipt(&self, tx_hash: B256)
    -> Result<Option<TxReceipt>, ChainClientError>;
}

/// `ChainClient` over an alloy HTTP provider
pub struct AlloyChainClient {
    chain_id: u64,
    rpc_url: Url,
    provider: RootProvider<Http<Client>>,
}

impl AlloyChainClient {
    /// Build a client for `chain_id`.
    ///
    /// An unreachable node is logged, not fatal: one chain's outage must not
    /// keep the others from starting.
    pub async fn new(chain_id: u64, rpc_url: &str) -> Result<Self, ChainClientError> {
        info!(chain_id = chain_id, rpc_url = %rpc_url, "Initializing chain client");

        let url: Url = rpc_url
            .parse()
            .map_err(|e| ChainClientError::InvalidConfig(format!("Invalid RPC URL: {}", e)))?;

        let provider = ProviderBuilder::new().on_http(url.clone());

        match provider.get_chain_id().await {
            Ok(actual) if actual != chain_id => {
                warn!(expected = chain_id, actual = actual, "Chain ID mismatch");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(chain_id = chain_id, error = %e, "Chain node unreachable at startup");
            }
        }

        Ok(Self {
            chain_id,
            rpc_url: url,
            provider,
        })
    }
}

/// Run `f`, retrying transient failures with exponential backoff.
///
/// Non-transient errors (reverts, bad input) are returned on the first
/// attempt.
pub async fn with_retry<T, F, Fut>(
    chain_id: u64,
    operation: &str,
    f: F,
) -> Result<T, ChainClientError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, ChainClientError>>,
{
    let mut attempts = 0;
    let mut last_error = None;

    while attempts < MAX_RETRIES {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_transient() => {
                debug!(chain_id = chain_id, operation = %operation, error = %e, "RPC call failed, not retrying");
                return Err(e);
            }
            Err(e) => {
                attempts += 1;
                last_error = Some(e);

                if attempts < MAX_RETRIES {
                    let delay = Duration::from_millis(RETRY_BASE_DELAY_MS * (1 << attempts));
                    warn!(
                        chain_id = chain_id,
                        operation = %operation,
                        attempt = attempts,
                        max_attempts = MAX_RETRIES,
                        delay_ms = delay.as_millis(),
                        "RPC call failed, retrying..."
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    error!(
        chain_id = chain_id,
        operation = %operation,
        attempts = attempts,
        "Max retries exceeded"
    );

    Err(ChainClientError::MaxRetriesExceeded(format!(
        "{}: {}",
        operation,
        last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "Unknown error".to_string())
    )))
}

/// Error responses from the node, reverts included, fail the same way on a
/// retry. Anything else on the transport counts as an outage.
fn call_err(method: &str, e: alloy::contract::Error) -> ChainClientError {
    match &e {
        alloy::contract::Error::TransportError(inner) if inner.as_error_resp().is_none() => {
            ChainClientError::Provider(format!("{} failed: {}", method, e))
        }
        _ => ChainClientError::ContractCall(format!("{} failed: {}", method, e)),
    }
}

#[async_trait]
impl ChainClient for AlloyChainClient {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn latest_block(&self) -> Result<u64, ChainClientError> {
        with_retry(self.chain_id, "eth_blockNumber", || async {
            self.provider
                .get_block_number()
                .await
                .map_err(|e| ChainClientError::Provider(format!("Failed to get block number: {}", e)))
        })
        .await
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, ChainClientError> {
        let mut rpc_filter = Filter::new()
            .address(filter.addresses.clone())
            .from_block(BlockNumberOrTag::Number(filter.from_block))
            .to_block(BlockNumberOrTag::Number(filter.to_block));
        if !filter.topics0.is_empty() {
            rpc_filter = rpc_filter.event_signature(filter.topics0.clone());
        }

        let logs = with_retry(self.chain_id, "eth_getLogs", || async {
            self.provider
                .get_logs(&rpc_filter)
                .await
                .map_err(|e| ChainClientError::Provider(format!("Failed to get logs: {}", e)))
        })
        .await?;

        debug!(
            chain_id = self.chain_id,
            from_block = filter.from_block,
            to_block = filter.to_block,
            count = logs.len(),
            "Fetched logs"
        );

        // Logs without a block or hash are pending and get picked up once mined
        Ok(logs
            .into_iter()
            .filter_map(|log| {
                Some(RawLog {
                    address: log.inner.address,
                    topics: log.inner.topics().to_vec(),
                    data: log.inner.data.data.clone(),
                    block_number: log.block_number?,
                    transaction_hash: log.transaction_hash?,
                    log_index: log.log_index.unwrap_or(0),
                })
            })
            .collect())
    }

    async fn product_stats(&self, product: Address) -> Result<ProductStats, ChainClientError> {
        with_retry(self.chain_id, "productStats", || async {
            let contract = IProduct::new(product, &self.provider);
            let status = contract
                .status()
                .call()
                .await
                .map_err(|e| call_err("status", e))?
                ._0;
            let current_capacity = contract
                .currentCapacity()
                .call()
                .await
                .map_err(|e| call_err("currentCapacity", e))?
                ._0;
            let max_capacity = contract
                .maxCapacity()
                .call()
                .await
                .map_err(|e| call_err("maxCapacity", e))?
                ._0;

            let cycle = match contract.issuanceCycle().call().await {
                Ok(c) => Some(IssuanceCycle {
                    underlying_spot_ref: u256_to_f64(c.underlyingSpotRef),
                    option_min_order_size: u256_to_f64(c.optionMinOrderSize),
                    // Percent on-chain
                    participation: u256_to_f64(c.participation) / 100.0,
                    sub_account_id: c.subAccountId,
                    unwind_margin: u256_to_f64(c.unwindMargin),
                }),
                Err(e) => {
                    let e = call_err("issuanceCycle", e);
                    if e.is_transient() {
                        return Err(e);
                    }
                    debug!(chain_id = self.chain_id, product = %product, error = %e, "No issuance cycle");
                    None
                }
            };

            Ok(ProductStats {
                status,
                current_capacity,
                max_capacity,
                cycle,
            })
        })
        .await
    }

    async fn product_addresses(
        &self,
        product: Address,
    ) -> Result<ProductAddresses, ChainClientError> {
        with_retry(self.chain_id, "productAddresses", || async {
            let contract = IProduct::new(product, &self.provider);
            let token = contract
                .tokenAddress()
                .call()
                .await
                .map_err(|e| call_err("tokenAddress", e))?
                ._0;
            let pt = contract.PT().call().await.map_err(|e| call_err("PT", e))?._0;
            let market = contract
                .market()
                .call()
                .await
                .map_err(|e| call_err("market", e))?
                ._0;
            let currency = contract
                .currencyAddress()
                .call()
                .await
                .map_err(|e| call_err("currencyAddress", e))?
                ._0;

            Ok(ProductAddresses {
                token,
                pt,
                market,
                currency,
            })
        })
        .await
    }

    async fn principal_balance(
        &self,
        product: Address,
        user: Address,
    ) -> Result<U256, ChainClientError> {
        with_retry(self.chain_id, "principalBalance", || async {
            let contract = IProduct::new(product, &self.provider);
            Ok(contract
                .principalBalance(user)
                .call()
                .await
                .map_err(|e| call_err("principalBalance", e))?
                ._0)
        })
        .await
    }

    async fn token_decimals(&self, token: Address) -> Result<u8, ChainClientError> {
        with_retry(self.chain_id, "decimals", || async {
            let contract = IERC20::new(token, &self.provider);
            Ok(contract
                .decimals()
                .call()
                .await
                .map_err(|e| call_err("decimals", e))?
                ._0)
        })
        .await
    }

    async fn token_balance(
        &self,
        token: Address,
        owner: Address,
    ) -> Result<U256, ChainClientError> {
        with_retry(self.chain_id, "balanceOf", || async {
            let contract = IERC20::new(token, &self.provider);
            Ok(contract
                .balanceOf(owner)
                .call()
                .await
                .map_err(|e| call_err("balanceOf", e))?
                ._0)
        })
        .await
    }

    async fn store_option_position(
        &self,
        signer_key: &str,
        product: Address,
        users: Vec<Address>,
        amounts: Vec<U256>,
    ) -> Result<B256, ChainClientError> {
        let signer: PrivateKeySigner = signer_key
            .parse()
            .map_err(|e| ChainClientError::InvalidConfig(format!("Invalid private key: {}", e)))?;
        let sender = signer.address();

        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(EthereumWallet::from(signer))
            .on_http(self.rpc_url.clone());

        let contract = IProduct::new(product, &provider);
        let recipients = users.len();

        let pending_tx = contract
            .storeOptionPosition(users, amounts)
            .send()
            .await
            .map_err(|e| {
                error!(
                    chain_id = self.chain_id,
                    product = %product,
                    error = %e,
                    "Failed to send storeOptionPosition transaction"
                );
                ChainClientError::Transaction(format!("Send failed: {}", e))
            })?;

        let tx_hash = *pending_tx.tx_hash();
        info!(
            chain_id = self.chain_id,
            product = %product,
            sender = %sender,
            recipients = recipients,
            tx_hash = %tx_hash,
            "storeOptionPosition submitted"
        );

        Ok(tx_hash)
    }

    async fn transaction_receipt(
        &self,
        tx_hash: B256,
    ) -> Result<Option<TxReceipt>, ChainClientError> {
        let receipt = with_retry(self.chain_id, "eth_getTransactionReceipt", || async {
            self.provider
                .get_transaction_receipt(tx_hash)
                .await
                .map_err(|e| ChainClientError::Provider(format!("Failed to get receipt: {}", e)))
        })
        .await?;

        Ok(receipt.map(|r| TxReceipt {
            status: r.status(),
            block_number: r.block_number,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_invalid_rpc_url_rejected() {
        let result = AlloyChainClient::new(42161, "not a url").await;
        assert!(matches!(result, Err(ChainClientError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_non_transient_error_not_retried() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(1, "status", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(ChainClientError::ContractCall("execution reverted".to_string()))
        })
        .await;

        assert!(matches!(result, Err(ChainClientError::ContractCall(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_success_returns_without_retry() {
        let attempts = AtomicU32::new(0);
        let result = with_retry(1, "eth_blockNumber", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ChainClientError>(7u64)
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_log_filter_default_is_empty() {
        let filter = LogFilter::default();
        assert!(filter.addresses.is_empty());
        assert!(filter.topics0.is_empty());
    }
}
