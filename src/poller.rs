use std::sync::Weak;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::feed::FeedClient;

/// A running refresh loop. Stopping it also drops any refresh it has in flight.
pub(crate) struct PollerHandle {
    cancel: CancellationToken,
}

impl PollerHandle {
    pub(crate) fn stop(&self) {
        self.cancel.cancel();
    }
}

/// Refreshes the feed right away, then every `period`, until `cancel` fires
/// or the client is dropped.
pub(crate) fn spawn(
    client: Weak<FeedClient>,
    period: Duration,
    cancel: CancellationToken,
) -> PollerHandle {
    let period = period.max(Duration::from_millis(1));
    let token = cancel.clone();

    tokio::spawn(async move {
        info!("feed poller started (period={period:?})");
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(client) = client.upgrade() else {
                debug!("feed client dropped; poller exiting");
                break;
            };

            tokio::select! {
                _ = token.cancelled() => break,
                res = client.refresh_feed() => {
                    if let Err(e) = res {
                        debug!("poll refresh failed: {e}");
                    }
                }
            }
        }
        info!("feed poller stopped");
    });

    PollerHandle { cancel }
}
