//! Early-withdraw pricing
//!
//! A quote combines two legs: the principal leg is the PT market's output for
//! selling the user's share of the product's PT, the option leg is the user's
//! share of the option book's unwind value (supplied by the caller from the
//! options desk) less the product's unwind margin. A successful quote is
//! recorded as a Pending withdraw request.

use alloy::primitives::{Address, U256};
use moka::future::Cache;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::entities::products;
use crate::error::{SettlementError, StoreError};
use crate::models::product::IssuanceCycle;
use crate::models::withdraw_request::{EarlyWithdrawQuote, WithdrawRequestStatus};
use crate::services::chain_client::{ChainClient, ProductAddresses};
use crate::services::chain_registry::ChainRegistry;
use crate::services::pendle::{PendleClient, SwapQuoteRequest};
use crate::services::product_store::{NewWithdrawRequest, ProductStore};
use crate::services::units::{format_u256, u256_to_f64};

#[derive(Debug, Clone)]
pub struct QuoteRequest {
    pub chain_id: u64,
    pub wallet: Address,
    pub product: Address,
    pub no_of_block: u32,
    /// Unwind value of the product's whole option book
    pub total_option_position: f64,
}

/// Block arithmetic for one quote, all in human units except `amount_in`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockAllocation {
    pub block_size: f64,
    pub user_blocks: f64,
    /// Raw PT amount to sell
    pub amount_in: U256,
}

/// Size the PT sale for `no_of_block` blocks. `None` when the user holds
/// fewer blocks than requested or the product has no capacity.
pub fn allocate_blocks(
    cycle: &IssuanceCycle,
    no_of_block: u32,
    token_balance: f64,
    token_decimals: u8,
    pt_balance: f64,
    current_capacity: f64,
) -> Option<BlockAllocation> {
    let block_size = cycle.underlying_spot_ref * (cycle.option_min_order_size / 10.0);
    if block_size <= 0.0 || current_capacity <= 0.0 {
        return None;
    }

    let user_blocks = (token_balance / block_size).round();
    if user_blocks < no_of_block as f64 {
        return None;
    }

    let withdraw_raw = no_of_block as f64 * block_size * 10f64.powi(token_decimals as i32);
    let allocation = withdraw_raw / current_capacity;
    let amount_in = (pt_balance * allocation).round().max(0.0) as u128;

    Some(BlockAllocation {
        block_size,
        user_blocks,
        amount_in: U256::from(amount_in),
    })
}

/// Raw option-leg amount owed for `no_of_block` blocks
pub fn option_amount(
    cycle: &IssuanceCycle,
    no_of_block: u32,
    total_option_position: f64,
    token_decimals: u8,
) -> f64 {
    ((cycle.option_min_order_size / 10.0)
        * no_of_block as f64
        * cycle.participation
        * total_option_position
        * (1.0 - cycle.unwind_margin / 1000.0)
        * 10f64.powi(token_decimals as i32))
    .round()
}

fn parse_stored(raw: Option<&String>) -> Option<Address> {
    raw.and_then(|a| Address::from_str(a).ok())
}

pub struct EarlyWithdrawService {
    store: ProductStore,
    chains: ChainRegistry,
    pendle: PendleClient,
    decimals: Arc<Cache<(u64, Address), u8>>,
}

impl EarlyWithdrawService {
    pub fn new(store: ProductStore, chains: ChainRegistry, pendle: PendleClient) -> Self {
        let decimals = Cache::builder()
            .max_capacity(1000)
            .time_to_live(Duration::from_secs(3600))
            .build();

        Self {
            store,
            chains,
            pendle,
            decimals: Arc::new(decimals),
        }
    }

    /// Price an early withdrawal. Any failure, including an insufficient
    /// balance, yields a zero quote.
    pub async fn quote(&self, req: QuoteRequest) -> EarlyWithdrawQuote {
        match self.try_quote(&req).await {
            Ok(Some(quote)) => quote,
            Ok(None) => {
                info!(
                    chain_id = req.chain_id,
                    product = %req.product,
                    wallet = %req.wallet,
                    no_of_block = req.no_of_block,
                    "Early withdraw not possible for requested blocks"
                );
                EarlyWithdrawQuote::default()
            }
            Err(e) => {
                warn!(
                    chain_id = req.chain_id,
                    product = %req.product,
                    wallet = %req.wallet,
                    error = %e,
                    "Early withdraw quote failed"
                );
                EarlyWithdrawQuote::default()
            }
        }
    }

    async fn try_quote(&self, req: &QuoteRequest) -> Result<Option<EarlyWithdrawQuote>, SettlementError> {
        let client = self
            .chains
            .client(req.chain_id)
            .ok_or(SettlementError::UnknownChain(req.chain_id))?;

        let product = match self.store.find_product(req.chain_id, &req.product).await? {
            Some(p) if !p.is_paused => p,
            _ => {
                return Err(StoreError::NotFound(format!("active product {}", req.product)).into());
            }
        };
        let cycle = IssuanceCycle::from_json(product.issuance_cycle.as_ref()).ok_or_else(|| {
            StoreError::InvalidData(format!("product {} has no issuance cycle", product.address))
        })?;

        let addresses = self.addresses(client.as_ref(), &product, req.product).await?;
        let token_decimals = self
            .token_decimals(client.as_ref(), req.chain_id, addresses.token)
            .await?;

        let token_balance = client.token_balance(addresses.token, req.wallet).await?;
        let pt_balance = client.token_balance(addresses.pt, req.product).await?;
        let stats = client.product_stats(req.product).await?;

        let token_balance = format_u256(token_balance, token_decimals as u32)
            .and_then(|d| d.to_f64())
            .unwrap_or(0.0);

        let Some(allocation) = allocate_blocks(
            &cycle,
            req.no_of_block,
            token_balance,
            token_decimals,
            u256_to_f64(pt_balance),
            u256_to_f64(stats.current_capacity),
        ) else {
            return Ok(None);
        };

        debug!(
            chain_id = req.chain_id,
            product = %product.address,
            block_size = allocation.block_size,
            user_blocks = allocation.user_blocks,
            amount_in = %allocation.amount_in,
            "Block allocation computed"
        );

        let amount_token = self
            .pendle
            .swap_amount_out(&SwapQuoteRequest {
                chain_id: req.chain_id,
                market: addresses.market,
                receiver: req.product,
                token_in: addresses.pt,
                token_out: addresses.currency,
                amount_in: allocation.amount_in,
            })
            .await?;

        let amount_option = Decimal::from_f64(option_amount(
            &cycle,
            req.no_of_block,
            req.total_option_position,
            token_decimals,
        ))
        .unwrap_or(Decimal::ZERO);

        let request = self
            .store
            .create_withdraw_request(NewWithdrawRequest {
                chain_id: req.chain_id,
                product: req.product,
                user: req.wallet,
                no_of_blocks: req.no_of_block as i32,
                amount_pt_unwind_price: amount_token,
                amount_option_unwind_price: amount_option,
                status: WithdrawRequestStatus::Pending,
                txid: None,
            })
            .await?;

        info!(
            chain_id = req.chain_id,
            product = %product.address,
            wallet = %request.address,
            request_id = request.id,
            amount_token = %amount_token,
            amount_option = %amount_option,
            "Early withdraw quoted"
        );

        Ok(Some(EarlyWithdrawQuote {
            amount_token,
            amount_option,
        }))
    }

    /// Stored derived addresses, read from the chain when any is missing
    async fn addresses(
        &self,
        client: &dyn ChainClient,
        product: &products::Model,
        product_address: Address,
    ) -> Result<ProductAddresses, SettlementError> {
        let stored = (
            parse_stored(product.token_address.as_ref()),
            parse_stored(product.pt_address.as_ref()),
            parse_stored(product.market_address.as_ref()),
            parse_stored(product.currency_address.as_ref()),
        );
        match stored {
            (Some(token), Some(pt), Some(market), Some(currency)) => Ok(ProductAddresses {
                token,
                pt,
                market,
                currency,
            }),
            _ => Ok(client.product_addresses(product_address).await?),
        }
    }

    async fn token_decimals(
        &self,
        client: &dyn ChainClient,
        chain_id: u64,
        token: Address,
    ) -> Result<u8, SettlementError> {
        if let Some(decimals) = self.decimals.get(&(chain_id, token)).await {
            return Ok(decimals);
        }
        let decimals = client.token_decimals(token).await?;
        self.decimals.insert((chain_id, token), decimals).await;
        Ok(decimals)
    }
}
