//! Periodic reaping of dead registry entries.
//!
//! Exit observers normally unregister a process as soon as it ends. The
//! sweeper bounds how long a terminated entry can linger if that path
//! is missed.

use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::registry::Registry;

/// Start sweeping `registry` every `period` until `cancel` fires or the
/// registry is dropped.
pub(crate) fn start(
    registry: Weak<Registry>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(registry) = registry.upgrade() else {
                break;
            };
            let reaped = sweep(&registry);
            if reaped > 0 {
                debug!(reaped, "Health check removed terminated processes");
            }
        }

        debug!("Health check sweeper stopped");
    })
}

/// Remove every entry whose process has terminated. Returns how many went.
pub(crate) fn sweep(registry: &Registry) -> usize {
    registry
        .snapshot()
        .into_iter()
        .filter(|process| process.status().is_terminal())
        .filter(|process| registry.remove_if_current(process.id(), process.serial()))
        .count()
}
