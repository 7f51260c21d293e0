//! Persistence for products, histories, users and withdraw requests
//!
//! Every write re-fetches the row it mutates; nothing here holds an entity
//! across an await on behalf of a caller. Exactly-once semantics come from the
//! store's unique constraints: `(chain_id, address)` on products,
//! `(transaction_hash, log_index)` on histories and `address` on users.

use alloy::primitives::{Address, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::entities::{histories, products, users, withdraw_requests};
use crate::entities::prelude::*;
use crate::error::StoreError;
use crate::models::history::balance_sign;
use crate::models::product::{IssuanceCycle, ProductStatus};
use crate::models::withdraw_request::{WithdrawList, WithdrawRequestStatus};
use crate::services::chain_client::{ProductAddresses, ProductStats};
use crate::services::event_decoder::TransferKind;
use crate::services::units::{checksum, format_u256};

/// Product as announced by the factory, enriched with what could be read on-chain
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub chain_id: u64,
    pub address: Address,
    pub name: String,
    pub underlying: String,
    pub max_capacity: U256,
    pub stats: Option<ProductStats>,
    pub addresses: Option<ProductAddresses>,
    pub created_block: Option<u64>,
}

/// One value-transfer event, from either ingestion path
#[derive(Debug, Clone)]
pub struct NewHistory {
    pub chain_id: u64,
    pub product_id: i32,
    pub user: Address,
    pub kind: TransferKind,
    pub amount: U256,
    /// Decimal count of the chain's settlement currency
    pub decimals: u32,
    pub transaction_hash: B256,
    pub log_index: u64,
    pub token_id: Option<U256>,
    pub supply: Option<U256>,
}

#[derive(Debug, Clone)]
pub struct NewWithdrawRequest {
    pub chain_id: u64,
    pub product: Address,
    pub user: Address,
    pub no_of_blocks: i32,
    pub amount_pt_unwind_price: Decimal,
    pub amount_option_unwind_price: Decimal,
    pub status: WithdrawRequestStatus,
    pub txid: Option<String>,
}

/// Keypair holding settlement authority for one product
pub struct CustodialKey {
    pub public_key: String,
    pub private_key: String,
}

impl std::fmt::Debug for CustodialKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustodialKey")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

fn now() -> sea_orm::prelude::DateTimeWithTimeZone {
    Utc::now().fixed_offset()
}

fn generate_keypair() -> CustodialKey {
    let signer = PrivateKeySigner::random();
    CustodialKey {
        public_key: checksum(&signer.address()),
        private_key: format!("0x{}", hex::encode(signer.to_bytes())),
    }
}

/// A cycle read from the chain replaces the stored one; a missing read keeps it
fn cycle_json(cycle: Option<&IssuanceCycle>) -> Option<serde_json::Value> {
    cycle.and_then(|c| serde_json::to_value(c).ok())
}

fn user_product_ids(user: &users::Model) -> Vec<i32> {
    serde_json::from_value(user.product_ids.clone()).unwrap_or_default()
}

#[derive(Clone)]
pub struct ProductStore {
    db: DatabaseConnection,
}

impl ProductStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    // ── products ───────────────────────────────────────────────────────────

    pub async fn find_product(
        &self,
        chain_id: u64,
        address: &Address,
    ) -> Result<Option<products::Model>, StoreError> {
        Ok(Products::find()
            .filter(products::Column::ChainId.eq(chain_id as i64))
            .filter(products::Column::Address.eq(checksum(address)))
            .one(&self.db)
            .await?)
    }

    /// Products that should have live event coverage
    pub async fn list_unpaused(&self, chain_id: u64) -> Result<Vec<products::Model>, StoreError> {
        Ok(Products::find()
            .filter(products::Column::ChainId.eq(chain_id as i64))
            .filter(products::Column::IsPaused.eq(false))
            .order_by_asc(products::Column::Id)
            .all(&self.db)
            .await?)
    }

    /// Products past Pending and not paused, oldest first
    pub async fn list_active(
        &self,
        chain_id: Option<u64>,
    ) -> Result<Vec<products::Model>, StoreError> {
        let mut query = Products::find()
            .filter(products::Column::Status.ne(ProductStatus::Pending.as_i16()))
            .filter(products::Column::IsPaused.eq(false));
        if let Some(chain_id) = chain_id {
            query = query.filter(products::Column::ChainId.eq(chain_id as i64));
        }
        Ok(query
            .order_by_asc(products::Column::CreatedAt)
            .order_by_asc(products::Column::Id)
            .all(&self.db)
            .await?)
    }

    /// Insert a newly announced product with a fresh custodial keypair, or
    /// refresh an existing one. Returns the row and whether it was created.
    pub async fn upsert_product(
        &self,
        new: NewProduct,
    ) -> Result<(products::Model, bool), StoreError> {
        if let Some(existing) = self.find_product(new.chain_id, &new.address).await? {
            let updated = self.refresh_product(existing, &new).await?;
            return Ok((updated, false));
        }

        let key = generate_keypair();
        let status = new
            .stats
            .as_ref()
            .and_then(|s| ProductStatus::try_from(s.status as i16).ok())
            .unwrap_or(ProductStatus::Pending);
        let timestamp = now();

        let model = products::ActiveModel {
            chain_id: Set(new.chain_id as i64),
            address: Set(checksum(&new.address)),
            name: Set(new.name.clone()),
            underlying: Set(new.underlying.clone()),
            max_capacity: Set(new
                .stats
                .as_ref()
                .map(|s| s.max_capacity)
                .unwrap_or(new.max_capacity)
                .to_string()),
            current_capacity: Set(new
                .stats
                .as_ref()
                .map(|s| s.current_capacity.to_string())
                .unwrap_or_else(|| "0".to_string())),
            status: Set(status.as_i16()),
            is_paused: Set(false),
            issuance_cycle: Set(new.stats.as_ref().and_then(|s| cycle_json(s.cycle.as_ref()))),
            public_key: Set(key.public_key.clone()),
            private_key: Set(key.private_key),
            token_address: Set(new.addresses.map(|a| checksum(&a.token))),
            pt_address: Set(new.addresses.map(|a| checksum(&a.pt))),
            market_address: Set(new.addresses.map(|a| checksum(&a.market))),
            currency_address: Set(new.addresses.map(|a| checksum(&a.currency))),
            created_block: Set(new.created_block.map(|b| b as i64)),
            created_at: Set(timestamp),
            updated_at: Set(timestamp),
            ..Default::default()
        };

        let inserted = Products::insert(model)
            .on_conflict(
                OnConflict::columns([products::Column::ChainId, products::Column::Address])
                    .do_nothing()
                    .to_owned(),
            )
            .exec(&self.db)
            .await;

        match inserted {
            Ok(result) => {
                let row = Products::find_by_id(result.last_insert_id)
                    .one(&self.db)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(format!("product {}", new.address)))?;
                info!(
                    chain_id = new.chain_id,
                    product = %row.address,
                    public_key = %key.public_key,
                    "Product created"
                );
                Ok((row, true))
            }
            // Lost a race with the other ingestion path; keep its keypair
            Err(DbErr::RecordNotInserted) => {
                let existing = self
                    .find_product(new.chain_id, &new.address)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(format!("product {}", new.address)))?;
                let updated = self.refresh_product(existing, &new).await?;
                Ok((updated, false))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn refresh_product(
        &self,
        existing: products::Model,
        new: &NewProduct,
    ) -> Result<products::Model, StoreError> {
        let current = ProductStatus::try_from(existing.status).unwrap_or(ProductStatus::Pending);
        let mut active: products::ActiveModel = existing.into();
        active.name = Set(new.name.clone());
        active.underlying = Set(new.underlying.clone());
        active.max_capacity = Set(new
            .stats
            .as_ref()
            .map(|s| s.max_capacity)
            .unwrap_or(new.max_capacity)
            .to_string());
        if let Some(stats) = &new.stats {
            active.current_capacity = Set(stats.current_capacity.to_string());
            if let Some(cycle) = cycle_json(stats.cycle.as_ref()) {
                active.issuance_cycle = Set(Some(cycle));
            }
            if let Ok(observed) = ProductStatus::try_from(stats.status as i16) {
                active.status = Set(current.advance(observed).as_i16());
            }
        }
        if let Some(addresses) = new.addresses {
            active.token_address = Set(Some(checksum(&addresses.token)));
            active.pt_address = Set(Some(checksum(&addresses.pt)));
            active.market_address = Set(Some(checksum(&addresses.market)));
            active.currency_address = Set(Some(checksum(&addresses.currency)));
        }
        active.updated_at = Set(now());
        Ok(active.update(&self.db).await?)
    }

    pub async fn rename_product(
        &self,
        chain_id: u64,
        address: &Address,
        name: &str,
    ) -> Result<Option<products::Model>, StoreError> {
        let Some(existing) = self.find_product(chain_id, address).await? else {
            return Ok(None);
        };
        let mut active: products::ActiveModel = existing.into();
        active.name = Set(name.to_string());
        active.updated_at = Set(now());
        Ok(Some(active.update(&self.db).await?))
    }

    pub async fn set_paused(
        &self,
        chain_id: u64,
        address: &Address,
        paused: bool,
    ) -> Result<Option<products::Model>, StoreError> {
        let Some(existing) = self.find_product(chain_id, address).await? else {
            return Ok(None);
        };
        let mut active: products::ActiveModel = existing.into();
        active.is_paused = Set(paused);
        active.updated_at = Set(now());
        Ok(Some(active.update(&self.db).await?))
    }

    /// Write freshly read capacity and status. Status never moves backwards.
    pub async fn apply_stats(
        &self,
        chain_id: u64,
        address: &Address,
        stats: &ProductStats,
    ) -> Result<Option<products::Model>, StoreError> {
        let Some(existing) = self.find_product(chain_id, address).await? else {
            return Ok(None);
        };
        let current = ProductStatus::try_from(existing.status).unwrap_or(ProductStatus::Pending);
        let next = match ProductStatus::try_from(stats.status as i16) {
            Ok(observed) => current.advance(observed),
            Err(e) => {
                warn!(chain_id = chain_id, product = %address, error = %e, "Ignoring status");
                current
            }
        };

        let mut active: products::ActiveModel = existing.into();
        active.status = Set(next.as_i16());
        active.current_capacity = Set(stats.current_capacity.to_string());
        active.max_capacity = Set(stats.max_capacity.to_string());
        if let Some(cycle) = cycle_json(stats.cycle.as_ref()) {
            active.issuance_cycle = Set(Some(cycle));
        }
        active.updated_at = Set(now());
        Ok(Some(active.update(&self.db).await?))
    }

    /// Move status forward to `observed` if it is later than the stored one
    pub async fn advance_status(
        &self,
        chain_id: u64,
        address: &Address,
        observed: ProductStatus,
    ) -> Result<Option<products::Model>, StoreError> {
        let Some(existing) = self.find_product(chain_id, address).await? else {
            return Ok(None);
        };
        let current = ProductStatus::try_from(existing.status).unwrap_or(ProductStatus::Pending);
        let next = current.advance(observed);
        if next == current {
            return Ok(Some(existing));
        }
        let mut active: products::ActiveModel = existing.into();
        active.status = Set(next.as_i16());
        active.updated_at = Set(now());
        Ok(Some(active.update(&self.db).await?))
    }

    /// The only way to reach a product's private key
    pub async fn custodial_key(
        &self,
        chain_id: u64,
        address: &Address,
    ) -> Result<Option<CustodialKey>, StoreError> {
        Ok(self.find_product(chain_id, address).await?.map(|p| CustodialKey {
            public_key: p.public_key,
            private_key: p.private_key,
        }))
    }

    // ── histories ──────────────────────────────────────────────────────────

    pub async fn history_exists(
        &self,
        transaction_hash: &B256,
        log_index: u64,
    ) -> Result<bool, StoreError> {
        Ok(Histories::find()
            .filter(histories::Column::TransactionHash.eq(transaction_hash.to_string()))
            .filter(histories::Column::LogIndex.eq(log_index as i64))
            .one(&self.db)
            .await?
            .is_some())
    }

    /// Append a ledger row. `None` when `(transaction_hash, log_index)` was
    /// already recorded.
    pub async fn record_history(
        &self,
        new: NewHistory,
    ) -> Result<Option<histories::Model>, StoreError> {
        if self.history_exists(&new.transaction_hash, new.log_index).await? {
            debug!(
                tx_hash = %new.transaction_hash,
                log_index = new.log_index,
                "History already recorded"
            );
            return Ok(None);
        }

        let user = checksum(&new.user);
        let amount_in_decimal = format_u256(new.amount, new.decimals).ok_or_else(|| {
            StoreError::InvalidData(format!("amount {} out of range", new.amount))
        })?;

        let previous = Histories::find()
            .filter(histories::Column::ChainId.eq(new.chain_id as i64))
            .filter(histories::Column::Address.eq(user.clone()))
            .order_by_desc(histories::Column::CreatedAt)
            .order_by_desc(histories::Column::Id)
            .one(&self.db)
            .await?
            .map(|h| h.total_balance)
            .unwrap_or(Decimal::ZERO);

        let history_type = new.kind.history_type();
        let total_balance =
            previous + amount_in_decimal * Decimal::from(balance_sign(history_type));
        let timestamp = now();

        let model = histories::ActiveModel {
            chain_id: Set(new.chain_id as i64),
            product_id: Set(new.product_id),
            address: Set(user),
            history_type: Set(history_type.as_str().to_string()),
            withdraw_type: Set(new.kind.withdraw_type().as_str().to_string()),
            amount: Set(new.amount.to_string()),
            amount_in_decimal: Set(amount_in_decimal),
            total_balance: Set(total_balance),
            token_id: Set(new.token_id.map(|v| v.to_string())),
            supply: Set(new.supply.map(|v| v.to_string())),
            transaction_hash: Set(new.transaction_hash.to_string()),
            log_index: Set(new.log_index as i64),
            created_at: Set(timestamp),
            updated_at: Set(timestamp),
            ..Default::default()
        };

        let inserted = Histories::insert(model)
            .on_conflict(
                OnConflict::columns([
                    histories::Column::TransactionHash,
                    histories::Column::LogIndex,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec(&self.db)
            .await;

        match inserted {
            Ok(result) => Ok(Histories::find_by_id(result.last_insert_id)
                .one(&self.db)
                .await?),
            Err(DbErr::RecordNotInserted) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn histories_for_user(
        &self,
        chain_id: u64,
        user: &Address,
    ) -> Result<Vec<histories::Model>, StoreError> {
        Ok(Histories::find()
            .filter(histories::Column::ChainId.eq(chain_id as i64))
            .filter(histories::Column::Address.eq(checksum(user)))
            .order_by_asc(histories::Column::CreatedAt)
            .order_by_asc(histories::Column::Id)
            .all(&self.db)
            .await?)
    }

    // ── users ──────────────────────────────────────────────────────────────

    pub async fn find_user(&self, address: &Address) -> Result<Option<users::Model>, StoreError> {
        Ok(Users::find()
            .filter(users::Column::Address.eq(checksum(address)))
            .one(&self.db)
            .await?)
    }

    pub async fn user_product_ids(&self, address: &Address) -> Result<Vec<i32>, StoreError> {
        Ok(self
            .find_user(address)
            .await?
            .map(|u| user_product_ids(&u))
            .unwrap_or_default())
    }

    /// Add `product_id` to the user's held set, creating the user if needed
    pub async fn add_user_product(
        &self,
        address: &Address,
        product_id: i32,
    ) -> Result<(), StoreError> {
        if self.find_user(address).await?.is_none() {
            let timestamp = now();
            let model = users::ActiveModel {
                address: Set(checksum(address)),
                user_name: Set(None),
                email: Set(None),
                subscribed: Set(false),
                product_ids: Set(serde_json::json!([product_id])),
                created_at: Set(timestamp),
                updated_at: Set(timestamp),
                ..Default::default()
            };
            let inserted = Users::insert(model)
                .on_conflict(
                    OnConflict::column(users::Column::Address)
                        .do_nothing()
                        .to_owned(),
                )
                .exec(&self.db)
                .await;
            match inserted {
                Ok(_) => return Ok(()),
                Err(DbErr::RecordNotInserted) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let user = self
            .find_user(address)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("user {}", address)))?;
        let mut ids = user_product_ids(&user);
        if ids.contains(&product_id) {
            return Ok(());
        }
        ids.push(product_id);

        let mut active: users::ActiveModel = user.into();
        active.product_ids = Set(serde_json::json!(ids));
        active.updated_at = Set(now());
        active.update(&self.db).await?;
        Ok(())
    }

    pub async fn remove_user_product(
        &self,
        address: &Address,
        product_id: i32,
    ) -> Result<(), StoreError> {
        let Some(user) = self.find_user(address).await? else {
            return Ok(());
        };
        let mut ids = user_product_ids(&user);
        let before = ids.len();
        ids.retain(|id| *id != product_id);
        if ids.len() == before {
            return Ok(());
        }

        let mut active: users::ActiveModel = user.into();
        active.product_ids = Set(serde_json::json!(ids));
        active.updated_at = Set(now());
        active.update(&self.db).await?;
        Ok(())
    }

    // ── withdraw requests ──────────────────────────────────────────────────

    pub async fn create_withdraw_request(
        &self,
        new: NewWithdrawRequest,
    ) -> Result<withdraw_requests::Model, StoreError> {
        let timestamp = now();
        let model = withdraw_requests::ActiveModel {
            chain_id: Set(new.chain_id as i64),
            product: Set(checksum(&new.product)),
            address: Set(checksum(&new.user)),
            no_of_blocks: Set(new.no_of_blocks),
            amount_pt_unwind_price: Set(new.amount_pt_unwind_price),
            amount_option_unwind_price: Set(new.amount_option_unwind_price),
            status: Set(new.status.as_str().to_string()),
            is_transferred: Set(false),
            txid: Set(new.txid),
            created_at: Set(timestamp),
            updated_at: Set(timestamp),
            ..Default::default()
        };
        Ok(model.insert(&self.db).await?)
    }

    /// Latest untransferred Pending request of `user` on `product`
    pub async fn latest_pending_request(
        &self,
        chain_id: u64,
        product: &Address,
        user: &Address,
    ) -> Result<Option<withdraw_requests::Model>, StoreError> {
        Ok(WithdrawRequests::find()
            .filter(withdraw_requests::Column::ChainId.eq(chain_id as i64))
            .filter(withdraw_requests::Column::Product.eq(checksum(product)))
            .filter(withdraw_requests::Column::Address.eq(checksum(user)))
            .filter(withdraw_requests::Column::IsTransferred.eq(false))
            .filter(withdraw_requests::Column::Status.eq(WithdrawRequestStatus::Pending.as_str()))
            .order_by_desc(withdraw_requests::Column::CreatedAt)
            .order_by_desc(withdraw_requests::Column::Id)
            .one(&self.db)
            .await?)
    }

    /// Settle the outcome of a user's early-withdraw transaction onto their
    /// latest pending request, or record a new one when none is open.
    pub async fn resolve_withdraw_request(
        &self,
        new: NewWithdrawRequest,
    ) -> Result<withdraw_requests::Model, StoreError> {
        match self
            .latest_pending_request(new.chain_id, &new.product, &new.user)
            .await?
        {
            Some(existing) => {
                let mut active: withdraw_requests::ActiveModel = existing.into();
                active.status = Set(new.status.as_str().to_string());
                active.txid = Set(new.txid);
                active.amount_pt_unwind_price = Set(new.amount_pt_unwind_price);
                active.amount_option_unwind_price = Set(new.amount_option_unwind_price);
                active.updated_at = Set(now());
                Ok(active.update(&self.db).await?)
            }
            None => self.create_withdraw_request(new).await,
        }
    }

    /// Approved, unsettled requests for one product grouped by user in
    /// first-seen order. Sums are rounded to integers and floored at zero.
    pub async fn withdraw_list(
        &self,
        chain_id: u64,
        product: &Address,
    ) -> Result<WithdrawList, StoreError> {
        let rows = WithdrawRequests::find()
            .filter(withdraw_requests::Column::ChainId.eq(chain_id as i64))
            .filter(withdraw_requests::Column::Product.eq(checksum(product)))
            .filter(withdraw_requests::Column::IsTransferred.eq(false))
            .filter(withdraw_requests::Column::Status.eq(WithdrawRequestStatus::Success.as_str()))
            .order_by_asc(withdraw_requests::Column::Id)
            .all(&self.db)
            .await?;

        let mut list = WithdrawList::default();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for row in rows {
            list.request_ids.push(row.id);
            match positions.get(&row.address) {
                Some(&i) => list.amounts_list[i] += row.amount_option_unwind_price,
                None => {
                    positions.insert(row.address.clone(), list.addresses_list.len());
                    list.addresses_list.push(row.address);
                    list.amounts_list.push(row.amount_option_unwind_price);
                }
            }
        }

        for amount in list.amounts_list.iter_mut() {
            *amount = amount.round().max(Decimal::ZERO);
        }

        Ok(list)
    }

    pub async fn mark_transferred(&self, ids: &[i32]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = WithdrawRequests::update_many()
            .col_expr(
                withdraw_requests::Column::IsTransferred,
                sea_orm::sea_query::Expr::value(true),
            )
            .col_expr(
                withdraw_requests::Column::UpdatedAt,
                sea_orm::sea_query::Expr::value(now()),
            )
            .filter(withdraw_requests::Column::Id.is_in(ids.to_vec()))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }

    /// Delete untransferred Pending requests created before `cutoff`
    pub async fn purge_stale_requests(
        &self,
        cutoff: sea_orm::prelude::DateTimeWithTimeZone,
    ) -> Result<u64, StoreError> {
        let result = WithdrawRequests::delete_many()
            .filter(withdraw_requests::Column::IsTransferred.eq(false))
            .filter(withdraw_requests::Column::Status.eq(WithdrawRequestStatus::Pending.as_str()))
            .filter(withdraw_requests::Column::CreatedAt.lt(cutoff))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn find_withdraw_request(
        &self,
        id: i32,
    ) -> Result<Option<withdraw_requests::Model>, StoreError> {
        Ok(WithdrawRequests::find_by_id(id).one(&self.db).await?)
    }
}
