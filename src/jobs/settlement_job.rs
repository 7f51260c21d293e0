use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span};

use crate::services::settlement::SettlementService;

/// Spawn the periodic settlement sweep: settle every active product on every
/// configured chain, then purge abandoned withdraw requests.
pub fn start_settlement_job(
    service: Arc<SettlementService>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            let period = service.settings().interval;
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!(interval_secs = period.as_secs(), "Starting settlement job");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Settlement job stopping");
                        break;
                    }
                    _ = ticker.tick() => {}
                }

                for chain_id in service.chain_ids() {
                    match service.run_sweep(chain_id).await {
                        Ok(summary) if summary.submitted > 0 || summary.failed > 0 => {
                            info!(
                                chain_id = chain_id,
                                submitted = summary.submitted,
                                failed = summary.failed,
                                "Settlement sweep completed"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!(chain_id = chain_id, error = %e, "Settlement sweep failed");
                        }
                    }
                }

                if let Err(e) = service.purge_stale().await {
                    error!(error = %e, "Failed to purge stale withdraw requests");
                }
            }
        }
        .instrument(info_span!("settlement")),
    )
}
