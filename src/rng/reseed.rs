// Periodic reseed scheduler for the master DRBG

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::metrics;
use crate::rng::drbg::Drbg;
use crate::rng::reservoir::EntropyReservoir;

/// Drive the master DRBG's reseed cadence until shutdown.
///
/// One reservoir draw and one reseed per tick; a failed draw is logged and
/// the previous key stays in service until the next tick. The reservoir
/// draw blocks, so it runs on the blocking pool. Shutdown is observed
/// between ticks and the loop returns without attempting further reseeds.
pub async fn reseed_loop(
    master: Arc<Drbg>,
    reservoir: Arc<EntropyReservoir>,
    interval: Duration,
    reseed_bytes: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let source = Arc::clone(&reservoir);
                let drawn =
                    tokio::task::spawn_blocking(move || source.get(reseed_bytes)).await;

                match drawn {
                    Ok(Ok(entropy)) => {
                        master.reseed(&entropy);
                        metrics::inc_reseeds();
                        debug!(bytes = entropy.len(), "master DRBG reseeded");
                    }
                    Ok(Err(err)) => {
                        warn!(error = %err, "entropy draw failed, keeping previous key");
                    }
                    Err(err) => {
                        warn!(error = %err, "entropy draw task failed, keeping previous key");
                    }
                }
            }
            _ = shutdown.changed() => {
                debug!("reseed scheduler stopping");
                return;
            }
        }
    }
}
