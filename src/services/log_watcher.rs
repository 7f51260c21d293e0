//! Live log subscription over `eth_getLogs` polling
//!
//! The watcher walks forward from a start block over a growing set of
//! addresses, splitting each poll into `max_range`-sized chunks, and pushes
//! logs in on-chain order onto a bounded channel followed by a checkpoint for
//! the last block covered. The consumer handles messages sequentially, so a
//! checkpoint means every log up to that block has been processed.

use alloy::primitives::{Address, B256};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ChainClientError;
use crate::services::chain_client::{ChainClient, LogFilter, RawLog};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherMessage {
    Log(RawLog),
    /// All logs up to and including this block have been sent
    Checkpoint(u64),
    /// A poll failed; the same range is retried on the next tick
    Error(String),
}

/// Addresses whose logs are followed. Only ever grows.
#[derive(Clone, Default)]
pub struct WatchSet {
    inner: Arc<RwLock<HashSet<Address>>>,
}

impl WatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the address was not watched before
    pub fn insert(&self, address: Address) -> bool {
        self.inner.write().insert(address)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.inner.read().contains(address)
    }

    /// Copy taken so the lock is never held across an RPC call
    pub fn snapshot(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> = self.inner.read().iter().copied().collect();
        addresses.sort();
        addresses
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

pub struct LogWatcher {
    client: Arc<dyn ChainClient>,
    watch_set: WatchSet,
    topics0: Vec<B256>,
    poll_interval: Duration,
    max_range: u64,
}

impl LogWatcher {
    pub fn new(
        client: Arc<dyn ChainClient>,
        watch_set: WatchSet,
        topics0: Vec<B256>,
        poll_interval: Duration,
        max_range: u64,
    ) -> Self {
        Self {
            client,
            watch_set,
            topics0,
            poll_interval,
            max_range: max_range.max(1),
        }
    }

    /// Logs of `addresses` in `[from, to]`, chunked by `max_range`, in
    /// (block, log index) order
    pub async fn fetch(
        &self,
        addresses: Vec<Address>,
        topics0: Vec<B256>,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>, ChainClientError> {
        fetch_chunked(self.client.as_ref(), addresses, topics0, from, to, self.max_range).await
    }

    /// Poll until cancelled, starting at `next_block`
    pub async fn run(
        self,
        mut next_block: u64,
        tx: mpsc::Sender<WatcherMessage>,
        cancel: CancellationToken,
    ) {
        let chain_id = self.client.chain_id();
        info!(chain_id = chain_id, from_block = next_block, "Log watcher started");

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(chain_id = chain_id, "Log watcher cancelled");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let latest = match self.client.latest_block().await {
                Ok(block) => block,
                Err(e) => {
                    warn!(chain_id = chain_id, error = %e, "Failed to read block height");
                    if tx.send(WatcherMessage::Error(e.to_string())).await.is_err() {
                        break;
                    }
                    continue;
                }
            };

            while next_block <= latest {
                if cancel.is_cancelled() {
                    break;
                }

                let to = latest.min(next_block + self.max_range - 1);
                let addresses = self.watch_set.snapshot();

                match self.fetch(addresses, self.topics0.clone(), next_block, to).await {
                    Ok(logs) => {
                        if !logs.is_empty() {
                            debug!(
                                chain_id = chain_id,
                                from_block = next_block,
                                to_block = to,
                                count = logs.len(),
                                "Forwarding logs"
                            );
                        }
                        for log in logs {
                            if tx.send(WatcherMessage::Log(log)).await.is_err() {
                                return;
                            }
                        }
                        if tx.send(WatcherMessage::Checkpoint(to)).await.is_err() {
                            return;
                        }
                        next_block = to + 1;
                    }
                    Err(e) => {
                        warn!(
                            chain_id = chain_id,
                            from_block = next_block,
                            to_block = to,
                            error = %e,
                            "Log poll failed, retrying next tick"
                        );
                        if tx.send(WatcherMessage::Error(e.to_string())).await.is_err() {
                            return;
                        }
                        break;
                    }
                }
            }
        }
    }
}

/// `eth_getLogs` over `[from, to]` split into `max_range`-block requests
pub async fn fetch_chunked(
    client: &dyn ChainClient,
    addresses: Vec<Address>,
    topics0: Vec<B256>,
    from: u64,
    to: u64,
    max_range: u64,
) -> Result<Vec<RawLog>, ChainClientError> {
    let mut logs = Vec::new();
    if addresses.is_empty() || from > to {
        return Ok(logs);
    }

    let max_range = max_range.max(1);
    let mut start = from;
    while start <= to {
        let end = to.min(start + max_range - 1);
        let filter = LogFilter {
            addresses: addresses.clone(),
            topics0: topics0.clone(),
            from_block: start,
            to_block: end,
        };
        logs.extend(client.get_logs(&filter).await?);
        start = end + 1;
    }

    logs.sort_by_key(|l| (l.block_number, l.log_index));
    Ok(logs)
}
