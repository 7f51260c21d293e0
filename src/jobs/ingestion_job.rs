use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span};

use crate::services::ingestion::IngestionEngine;

/// Spawn the long-lived ingestion loop of one chain.
///
/// Each chain gets its own task and span so an outage on one chain never
/// stalls another.
pub fn start_ingestion_job(engine: Arc<IngestionEngine>, cancel: CancellationToken) -> JoinHandle<()> {
    let chain_id = engine.chain_id();
    let span = info_span!("chain", chain_id = chain_id);

    tokio::spawn(
        async move {
            info!("Starting ingestion job");
            engine.run(cancel).await;
            info!("Ingestion job stopped");
        }
        .instrument(span),
    )
}
