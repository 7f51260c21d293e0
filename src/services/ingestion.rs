//! Per-chain event ingestion
//!
//! One `IngestionEngine` per chain owns a watch set (factory + products), a
//! `LogWatcher` feeding it over a channel, and the translation of decoded
//! events into store mutations. Engines share nothing with each other except
//! the database.
//!
//! Event handling:
//! - `ProductCreated`: sync the announced product, rescan the last
//!   `catch_up_blocks` for other creations, then watch and backfill every new
//!   product from its creation block
//! - `ProductUpdated`: rename
//! - `Paused` / `Unpaused`: flip `is_paused`
//! - everything else: refresh capacity/status from the chain, then for value
//!   transfers append History and update the user's held products

use alloy::primitives::{Address, B256, U256};
use alloy::sol_types::SolEvent;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ChainConfig, IngestionSettings};
use crate::entities::products;
use crate::error::IngestionError;
use crate::services::abi::IProductFactory;
use crate::services::chain_client::{ChainClient, RawLog};
use crate::services::event_decoder::{
    self, ChainEvent, DecodedLog, LogMeta, TransferKind, ValueTransfer,
};
use crate::services::indexer_progress;
use crate::services::log_watcher::{LogWatcher, WatchSet, WatcherMessage, fetch_chunked};
use crate::services::product_store::{NewHistory, NewProduct, ProductStore};
use crate::services::units::checksum;

/// Capacity of the watcher → engine channel
const CHANNEL_CAPACITY: usize = 1024;

/// Record one value transfer and apply its effect on the user's held
/// products. Shared by the polling and webhook paths so both reach the same
/// end state.
///
/// Chain reads happen before any write. The user's product set is reconciled
/// against the principal balance even when the History row already exists, so
/// a redelivery repairs a delivery that failed after the History insert.
/// Returns false when the `(transaction_hash, log_index)` pair was already
/// recorded.
pub async fn apply_value_transfer(
    store: &ProductStore,
    client: &dyn ChainClient,
    decimals: u32,
    product: &products::Model,
    product_address: Address,
    transfer: &ValueTransfer,
    meta: &LogMeta,
) -> Result<bool, IngestionError> {
    let chain_id = client.chain_id();
    let principal = client
        .principal_balance(product_address, transfer.user)
        .await?;

    let recorded = store
        .record_history(NewHistory {
            chain_id,
            product_id: product.id,
            user: transfer.user,
            kind: transfer.kind,
            amount: transfer.amount,
            decimals,
            transaction_hash: meta.transaction_hash,
            log_index: meta.log_index,
            token_id: transfer.token_id,
            supply: transfer.supply,
        })
        .await?;

    match &recorded {
        Some(history) => info!(
            chain_id = chain_id,
            product = %product.address,
            user = %history.address,
            kind = ?transfer.kind,
            amount = %history.amount_in_decimal,
            total_balance = %history.total_balance,
            "History recorded"
        ),
        None => debug!(
            chain_id = chain_id,
            tx_hash = %meta.transaction_hash,
            log_index = meta.log_index,
            "Duplicate transfer, reconciling user products only"
        ),
    }

    if principal.is_zero() {
        store.remove_user_product(&transfer.user, product.id).await?;
        debug!(
            chain_id = chain_id,
            product = %product.address,
            user = %checksum(&transfer.user),
            "Principal exhausted, product removed from user"
        );
    } else if transfer.kind == TransferKind::Deposit {
        store.add_user_product(&transfer.user, product.id).await?;
    }

    Ok(recorded.is_some())
}

pub struct IngestionEngine {
    chain: ChainConfig,
    client: Arc<dyn ChainClient>,
    store: ProductStore,
    settings: IngestionSettings,
    watch_set: WatchSet,
    /// Products whose creation backfill hit a retryable failure
    unfinished_backfills: Mutex<HashSet<Address>>,
}

impl IngestionEngine {
    pub fn new(
        chain: ChainConfig,
        client: Arc<dyn ChainClient>,
        store: ProductStore,
        settings: IngestionSettings,
    ) -> Self {
        let watch_set = WatchSet::new();
        watch_set.insert(chain.factory_address);
        Self {
            chain,
            client,
            store,
            settings,
            watch_set,
            unfinished_backfills: Mutex::new(HashSet::new()),
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain.chain_id
    }

    pub fn watch_set(&self) -> &WatchSet {
        &self.watch_set
    }

    fn topics(&self) -> Vec<B256> {
        let mut topics = event_decoder::factory_signatures();
        topics.extend(event_decoder::product_signatures());
        topics
    }

    /// Watch every unpaused product in the store. Returns how many were new.
    pub async fn discover(&self) -> Result<usize, IngestionError> {
        let products = self.store.list_unpaused(self.chain.chain_id).await?;
        let mut added = 0;
        for product in products {
            match product.address.parse::<Address>() {
                Ok(address) => {
                    if self.watch_set.insert(address) {
                        added += 1;
                    }
                }
                Err(e) => warn!(
                    chain_id = self.chain.chain_id,
                    product = %product.address,
                    error = %e,
                    "Stored product address is invalid"
                ),
            }
        }
        if added > 0 {
            info!(
                chain_id = self.chain.chain_id,
                added = added,
                watched = self.watch_set.len(),
                "Discovered products"
            );
        }
        Ok(added)
    }

    /// First block to scan: stored cursor + 1, else the configured start
    /// block, else `catch_up_blocks` below the head
    pub async fn start_block(&self) -> Result<u64, IngestionError> {
        if let Some(cursor) = indexer_progress::load_cursor(self.store.db(), self.chain.chain_id).await? {
            return Ok(cursor + 1);
        }
        if let Some(start) = self.chain.start_block {
            return Ok(start);
        }
        let latest = self.client.latest_block().await?;
        Ok(latest.saturating_sub(self.settings.catch_up_blocks))
    }

    /// Decode and apply one log
    pub async fn handle_log(&self, log: &RawLog) -> Result<(), IngestionError> {
        match event_decoder::decode(log) {
            DecodedLog::Event { meta, event } => {
                debug!(
                    chain_id = self.chain.chain_id,
                    event = event.name(),
                    block = meta.block_number,
                    tx_hash = %meta.transaction_hash,
                    "Applying event"
                );
                self.apply(meta, event).await
            }
            DecodedLog::Skip { meta, reason } => {
                debug!(
                    chain_id = self.chain.chain_id,
                    emitter = %meta.emitter,
                    tx_hash = %meta.transaction_hash,
                    reason = %reason,
                    "Skipping log"
                );
                Ok(())
            }
        }
    }

    pub async fn apply(&self, meta: LogMeta, event: ChainEvent) -> Result<(), IngestionError> {
        let chain_id = self.chain.chain_id;

        match event {
            ChainEvent::ProductCreated {
                product,
                name,
                underlying,
                max_capacity,
            } => {
                if meta.emitter != self.chain.factory_address {
                    warn!(chain_id = chain_id, emitter = %meta.emitter, "ProductCreated from unknown factory");
                    return Ok(());
                }
                self.on_product_created(meta, product, name, underlying, max_capacity)
                    .await
            }
            ChainEvent::ProductUpdated { product, name } => {
                if meta.emitter != self.chain.factory_address {
                    return Ok(());
                }
                if self.store.rename_product(chain_id, &product, &name).await?.is_some() {
                    info!(chain_id = chain_id, product = %product, name = %name, "Product renamed");
                }
                Ok(())
            }
            event => self.apply_product_event(meta, event).await,
        }
    }

    /// Apply an event emitted by a product contract. Factory events are not
    /// expected here and are ignored.
    async fn apply_product_event(&self, meta: LogMeta, event: ChainEvent) -> Result<(), IngestionError> {
        let chain_id = self.chain.chain_id;

        match event {
            ChainEvent::PauseChanged { paused } => {
                if self.store.set_paused(chain_id, &meta.emitter, paused).await?.is_some() {
                    info!(chain_id = chain_id, product = %meta.emitter, paused = paused, "Pause status updated");
                }
                Ok(())
            }
            ChainEvent::Lifecycle(kind) => {
                if self.refresh_stats(&meta.emitter).await?.is_some() {
                    info!(chain_id = chain_id, product = %meta.emitter, event = ?kind, "Lifecycle event applied");
                }
                Ok(())
            }
            ChainEvent::Transfer(transfer) => {
                let Some(product) = self.refresh_stats(&meta.emitter).await? else {
                    debug!(chain_id = chain_id, emitter = %meta.emitter, "Transfer for unknown product");
                    return Ok(());
                };
                apply_value_transfer(
                    &self.store,
                    self.client.as_ref(),
                    self.chain.decimals,
                    &product,
                    meta.emitter,
                    &transfer,
                    &meta,
                )
                .await?;
                Ok(())
            }
            ChainEvent::ProductCreated { .. } | ChainEvent::ProductUpdated { .. } => {
                debug!(chain_id = chain_id, emitter = %meta.emitter, "Factory event outside the factory stream");
                Ok(())
            }
        }
    }

    /// Read capacity/status from the chain and write them to a known product
    async fn refresh_stats(
        &self,
        product: &Address,
    ) -> Result<Option<products::Model>, IngestionError> {
        if self.store.find_product(self.chain.chain_id, product).await?.is_none() {
            return Ok(None);
        }
        let stats = self.client.product_stats(*product).await?;
        Ok(self
            .store
            .apply_stats(self.chain.chain_id, product, &stats)
            .await?)
    }

    async fn on_product_created(
        &self,
        meta: LogMeta,
        product: Address,
        name: String,
        underlying: String,
        max_capacity: U256,
    ) -> Result<(), IngestionError> {
        let mut created = Vec::new();

        let (model, is_new) = self
            .sync_product(product, name, underlying, max_capacity, Some(meta.block_number))
            .await?;
        if is_new || self.unfinished_backfills.lock().contains(&product) {
            created.push((product, model.created_block));
        }

        // Creations mined between this log and now may predate our view
        let latest = self.client.latest_block().await?;
        let from = latest.saturating_sub(self.settings.catch_up_blocks);
        let recent = fetch_chunked(
            self.client.as_ref(),
            vec![self.chain.factory_address],
            vec![IProductFactory::ProductCreated::SIGNATURE_HASH],
            from,
            latest,
            self.settings.max_log_range,
        )
        .await?;

        for log in &recent {
            if let DecodedLog::Event {
                meta: recent_meta,
                event:
                    ChainEvent::ProductCreated {
                        product,
                        name,
                        underlying,
                        max_capacity,
                    },
            } = event_decoder::decode(log)
            {
                match self
                    .sync_product(product, name, underlying, max_capacity, Some(recent_meta.block_number))
                    .await
                {
                    Ok((model, is_new)) => {
                        let queued = created.iter().any(|(address, _)| *address == product);
                        if !queued && (is_new || self.unfinished_backfills.lock().contains(&product)) {
                            created.push((product, model.created_block));
                        }
                    }
                    Err(e) => warn!(
                        chain_id = self.chain.chain_id,
                        product = %product,
                        error = %e,
                        "Catch-up product sync failed"
                    ),
                }
            }
        }

        // A retryable backfill failure fails the whole creation so the
        // ProductCreated log is deferred and replayed; replay is idempotent
        let mut deferred = None;
        for (address, created_block) in created {
            self.watch_set.insert(address);
            let from = created_block.map(|b| b as u64).unwrap_or(from);
            match self.backfill_product(address, from, latest).await {
                Ok(_) => {
                    self.unfinished_backfills.lock().remove(&address);
                }
                Err(e) => {
                    warn!(
                        chain_id = self.chain.chain_id,
                        product = %address,
                        error = %e,
                        "Product backfill failed"
                    );
                    if e.is_retryable() {
                        self.unfinished_backfills.lock().insert(address);
                        if deferred.is_none() {
                            deferred = Some(e);
                        }
                    }
                }
            }
        }

        match deferred {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Resolve derived addresses and stats, then upsert
    async fn sync_product(
        &self,
        product: Address,
        name: String,
        underlying: String,
        max_capacity: U256,
        created_block: Option<u64>,
    ) -> Result<(products::Model, bool), IngestionError> {
        let addresses = match self.client.product_addresses(product).await {
            Ok(a) => Some(a),
            Err(e) => {
                warn!(chain_id = self.chain.chain_id, product = %product, error = %e, "Derived addresses unavailable");
                None
            }
        };
        let stats = match self.client.product_stats(product).await {
            Ok(s) => Some(s),
            Err(e) => {
                warn!(chain_id = self.chain.chain_id, product = %product, error = %e, "Product stats unavailable");
                None
            }
        };

        Ok(self
            .store
            .upsert_product(NewProduct {
                chain_id: self.chain.chain_id,
                address: product,
                name,
                underlying,
                max_capacity,
                stats,
                addresses,
                created_block,
            })
            .await?)
    }

    /// Replay a newly watched product's events up to `to`
    async fn backfill_product(&self, product: Address, from: u64, to: u64) -> Result<usize, IngestionError> {
        let logs = fetch_chunked(
            self.client.as_ref(),
            vec![product],
            event_decoder::product_signatures(),
            from,
            to,
            self.settings.max_log_range,
        )
        .await?;

        info!(
            chain_id = self.chain.chain_id,
            product = %checksum(&product),
            from_block = from,
            to_block = to,
            count = logs.len(),
            "Backfilling product events"
        );

        let mut retryable = None;
        for log in &logs {
            let DecodedLog::Event { meta, event } = event_decoder::decode(log) else {
                continue;
            };
            if let Err(e) = self.apply_product_event(meta, event).await {
                error!(
                    chain_id = self.chain.chain_id,
                    tx_hash = %log.transaction_hash,
                    log_index = log.log_index,
                    error = %e,
                    "Failed to apply backfilled log"
                );
                if e.is_retryable() && retryable.is_none() {
                    retryable = Some(e);
                }
            }
        }
        match retryable {
            Some(e) => Err(e),
            None => Ok(logs.len()),
        }
    }

    /// Apply one watcher message.
    ///
    /// Logs that fail on a node or database outage are parked in `retry` and
    /// re-applied at every checkpoint; the cursor is never saved past the
    /// oldest parked log, so a restart refetches it. Logs that fail for any
    /// other reason are logged and skipped.
    async fn handle_message(&self, message: WatcherMessage, retry: &mut Vec<RawLog>) {
        let chain_id = self.chain.chain_id;
        match message {
            WatcherMessage::Log(log) => {
                if let Err(e) = self.handle_log(&log).await {
                    if e.is_retryable() {
                        warn!(
                            chain_id = chain_id,
                            tx_hash = %log.transaction_hash,
                            log_index = log.log_index,
                            error = %e,
                            "Log deferred until the next checkpoint"
                        );
                        retry.push(log);
                    } else {
                        error!(
                            chain_id = chain_id,
                            tx_hash = %log.transaction_hash,
                            log_index = log.log_index,
                            error = %e,
                            "Failed to apply log"
                        );
                    }
                }
            }
            WatcherMessage::Checkpoint(block) => {
                self.retry_deferred(retry).await;

                let safe_block = match retry.iter().map(|l| l.block_number).min() {
                    Some(oldest) => {
                        warn!(
                            chain_id = chain_id,
                            deferred = retry.len(),
                            oldest_block = oldest,
                            "Cursor held behind deferred logs"
                        );
                        match oldest.checked_sub(1) {
                            Some(block) => block,
                            None => return,
                        }
                    }
                    None => block,
                };
                if let Err(e) = indexer_progress::save_cursor(self.store.db(), chain_id, safe_block).await {
                    error!(chain_id = chain_id, block = safe_block, error = %e, "Failed to save cursor");
                }
            }
            WatcherMessage::Error(message) => {
                if let Err(e) = indexer_progress::record_failure(self.store.db(), chain_id, &message).await {
                    warn!(chain_id = chain_id, error = %e, "Failed to record poll failure");
                }
            }
        }
    }

    /// Re-apply deferred logs in order; those still failing stay deferred
    async fn retry_deferred(&self, retry: &mut Vec<RawLog>) {
        if retry.is_empty() {
            return;
        }
        let pending = std::mem::take(retry);
        for log in pending {
            match self.handle_log(&log).await {
                Ok(()) => info!(
                    chain_id = self.chain.chain_id,
                    tx_hash = %log.transaction_hash,
                    log_index = log.log_index,
                    "Deferred log applied"
                ),
                Err(e) if e.is_retryable() => retry.push(log),
                Err(e) => error!(
                    chain_id = self.chain.chain_id,
                    tx_hash = %log.transaction_hash,
                    log_index = log.log_index,
                    error = %e,
                    "Deferred log dropped"
                ),
            }
        }
    }

    /// Discover, backfill from the cursor, then follow the chain until cancelled
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let chain_id = self.chain.chain_id;

        if let Err(e) = self.discover().await {
            error!(chain_id = chain_id, error = %e, "Initial discovery failed");
        }

        let mut retry = interval(self.settings.poll_interval);
        let start = loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = retry.tick() => {}
            }
            match self.start_block().await {
                Ok(block) => break block,
                Err(e) => warn!(chain_id = chain_id, error = %e, "Cannot determine start block, retrying"),
            }
        };

        info!(
            chain_id = chain_id,
            start_block = start,
            watched = self.watch_set.len(),
            "Ingestion started"
        );

        let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
        let watcher = LogWatcher::new(
            self.client.clone(),
            self.watch_set.clone(),
            self.topics(),
            self.settings.poll_interval,
            self.settings.max_log_range,
        );
        let watcher_cancel = cancel.child_token();
        let watcher_handle = tokio::spawn(watcher.run(start, tx, watcher_cancel.clone()));

        let mut discovery = interval(self.settings.discovery_interval);
        discovery.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick fires immediately; discovery already ran
        discovery.tick().await;

        let mut deferred = Vec::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(chain_id = chain_id, "Shutdown signal received, stopping ingestion");
                    break;
                }
                _ = discovery.tick() => {
                    if let Err(e) = self.discover().await {
                        warn!(chain_id = chain_id, error = %e, "Discovery cycle failed");
                    }
                }
                message = rx.recv() => match message {
                    Some(message) => self.handle_message(message, &mut deferred).await,
                    None => {
                        warn!(chain_id = chain_id, "Log watcher stopped");
                        break;
                    }
                }
            }
        }

        watcher_cancel.cancel();
        if let Err(e) = watcher_handle.await {
            error!(chain_id = chain_id, error = %e, "Log watcher task panicked");
        }
        info!(chain_id = chain_id, "Ingestion stopped");
    }
}
