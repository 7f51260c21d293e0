//! Batched option-position write-back and withdraw-request reconciliation
//!
//! A sweep walks every active product of a chain, folds its approved and
//! untransferred withdraw requests into one `storeOptionPosition` call signed
//! by the product's custodial key, and marks exactly the folded rows as
//! transferred once the node accepts the transaction. A failed submission
//! leaves every row untouched for the next sweep.

use alloy::primitives::{Address, B256, U256};
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::str::FromStr;
use tracing::{debug, error, info, warn};

use crate::config::SettlementSettings;
use crate::entities::products;
use crate::error::{SettlementError, StoreError};
use crate::models::product::AdminWalletResponse;
use crate::models::response::ActionResult;
use crate::models::withdraw_request::{WithdrawList, WithdrawRequestStatus};
use crate::services::chain_registry::ChainRegistry;
use crate::services::product_store::{NewWithdrawRequest, ProductStore};

/// Outcome of one user-submitted early-withdraw transaction
#[derive(Debug, Clone)]
pub struct WithdrawConfirmation {
    pub chain_id: u64,
    pub product: Address,
    pub user: Address,
    pub txid: B256,
    pub amount_pt_unwind_price: Decimal,
    pub amount_option_unwind_price: Decimal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub products: usize,
    pub submitted: usize,
    pub failed: usize,
}

/// Whole-unit amounts as contract arguments. Negative or fractional sums were
/// already rounded and floored by the store; anything left over is clamped.
fn to_u256(amount: Decimal) -> U256 {
    amount
        .round()
        .max(Decimal::ZERO)
        .to_u128()
        .map(U256::from)
        .unwrap_or(U256::ZERO)
}

#[derive(Clone)]
pub struct SettlementService {
    store: ProductStore,
    chains: ChainRegistry,
    settings: SettlementSettings,
}

impl SettlementService {
    pub fn new(store: ProductStore, chains: ChainRegistry, settings: SettlementSettings) -> Self {
        Self {
            store,
            chains,
            settings,
        }
    }

    pub fn settings(&self) -> &SettlementSettings {
        &self.settings
    }

    pub fn chain_ids(&self) -> Vec<u64> {
        self.chains.chain_ids()
    }

    pub async fn get_withdraw_list(
        &self,
        chain_id: u64,
        product: &Address,
    ) -> Result<WithdrawList, SettlementError> {
        if self.chains.get(chain_id).is_none() {
            return Err(SettlementError::UnknownChain(chain_id));
        }
        Ok(self.store.withdraw_list(chain_id, product).await?)
    }

    /// Submit one batch for `product`. Returns the transaction hash, or `None`
    /// when nothing is waiting.
    pub async fn settle_product(
        &self,
        chain_id: u64,
        product: &products::Model,
    ) -> Result<Option<B256>, SettlementError> {
        let client = self
            .chains
            .client(chain_id)
            .ok_or(SettlementError::UnknownChain(chain_id))?;
        let product_address = Address::from_str(&product.address).map_err(|e| {
            StoreError::InvalidData(format!("product address {}: {}", product.address, e))
        })?;

        let list = self.store.withdraw_list(chain_id, &product_address).await?;
        if list.is_empty() {
            return Ok(None);
        }

        let key = self
            .store
            .custodial_key(chain_id, &product_address)
            .await?
            .ok_or_else(|| SettlementError::MissingCustodialKey(product.address.clone()))?;

        let users = list
            .addresses_list
            .iter()
            .map(|a| {
                Address::from_str(a)
                    .map_err(|e| StoreError::InvalidData(format!("user address {}: {}", a, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let amounts: Vec<U256> = list.amounts_list.iter().copied().map(to_u256).collect();

        let tx_hash = client
            .store_option_position(&key.private_key, product_address, users, amounts)
            .await?;

        let marked = self.store.mark_transferred(&list.request_ids).await?;
        info!(
            chain_id = chain_id,
            product = %product.address,
            tx_hash = %tx_hash,
            users = list.addresses_list.len(),
            requests = marked,
            "Withdraw requests settled"
        );

        Ok(Some(tx_hash))
    }

    /// Settle every active product of one chain. Per-product failures are
    /// logged and counted; they never stop the sweep.
    pub async fn run_sweep(&self, chain_id: u64) -> Result<SweepSummary, SettlementError> {
        let products = self.store.list_active(Some(chain_id)).await?;
        let mut summary = SweepSummary {
            products: products.len(),
            ..Default::default()
        };

        for product in &products {
            match self.settle_product(chain_id, product).await {
                Ok(Some(_)) => summary.submitted += 1,
                Ok(None) => {}
                Err(e) => {
                    summary.failed += 1;
                    error!(
                        chain_id = chain_id,
                        product = %product.address,
                        error = %e,
                        "Settlement failed, requests left for next sweep"
                    );
                }
            }
        }

        debug!(
            chain_id = chain_id,
            products = summary.products,
            submitted = summary.submitted,
            failed = summary.failed,
            "Settlement sweep finished"
        );
        Ok(summary)
    }

    /// Delete abandoned Pending requests older than the retention window
    pub async fn purge_stale(&self) -> Result<u64, SettlementError> {
        let retention = chrono::Duration::from_std(self.settings.retention)
            .unwrap_or_else(|_| chrono::Duration::days(1));
        let cutoff = (Utc::now() - retention).fixed_offset();
        let purged = self.store.purge_stale_requests(cutoff).await?;
        if purged > 0 {
            info!(purged = purged, "Stale withdraw requests purged");
        }
        Ok(purged)
    }

    /// Reconcile a user's early-withdraw transaction against its receipt.
    /// Mined and successful → Success, reverted → Failed, otherwise Pending.
    pub async fn update_withdraw_request(
        &self,
        confirmation: WithdrawConfirmation,
    ) -> Result<ActionResult, SettlementError> {
        let client = self
            .chains
            .client(confirmation.chain_id)
            .ok_or(SettlementError::UnknownChain(confirmation.chain_id))?;

        let status = match client.transaction_receipt(confirmation.txid).await {
            Ok(Some(receipt)) if receipt.status => WithdrawRequestStatus::Success,
            Ok(Some(_)) => WithdrawRequestStatus::Failed,
            Ok(None) => WithdrawRequestStatus::Pending,
            Err(e) => {
                warn!(
                    chain_id = confirmation.chain_id,
                    tx_hash = %confirmation.txid,
                    error = %e,
                    "Receipt lookup failed, request stays pending"
                );
                WithdrawRequestStatus::Pending
            }
        };

        let request = self
            .store
            .resolve_withdraw_request(NewWithdrawRequest {
                chain_id: confirmation.chain_id,
                product: confirmation.product,
                user: confirmation.user,
                no_of_blocks: 0,
                amount_pt_unwind_price: confirmation.amount_pt_unwind_price,
                amount_option_unwind_price: confirmation.amount_option_unwind_price,
                status,
                txid: Some(confirmation.txid.to_string()),
            })
            .await?;

        info!(
            chain_id = confirmation.chain_id,
            product = %request.product,
            user = %request.address,
            request_id = request.id,
            status = %status,
            "Withdraw request updated"
        );

        Ok(ActionResult::new(status.as_str()))
    }

    /// Public half of the product's custodial keypair
    pub async fn admin_wallet(
        &self,
        chain_id: u64,
        product: &Address,
    ) -> Result<AdminWalletResponse, SettlementError> {
        let key = self
            .store
            .custodial_key(chain_id, product)
            .await?
            .ok_or_else(|| SettlementError::MissingCustodialKey(product.to_string()))?;
        Ok(AdminWalletResponse {
            result_public_key: key.public_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_to_u256() {
        assert_eq!(to_u256(dec!(10)), U256::from(10u64));
        assert_eq!(to_u256(dec!(10.6)), U256::from(11u64));
        assert_eq!(to_u256(dec!(-3)), U256::ZERO);
        assert_eq!(to_u256(Decimal::ZERO), U256::ZERO);
    }
}
