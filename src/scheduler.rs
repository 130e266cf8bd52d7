use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::connection::{ConnectionHandle, Session};
use crate::error::ReadError;
use crate::events::{normalize_filter, scan};
use crate::models::CheckpointEvent;

/// Options for [`ConnectionHandle::start_polling`]
#[derive(Debug, Clone, Default)]
pub struct PollOptions {
    /// Defaults to the connection's configured poll interval.
    pub interval: Option<Duration>,
    /// First block to scan. `None` starts after the head seen by the first tick.
    pub from_block: Option<u64>,
    pub shipment_filter: Option<String>,
}

/// Background event poller. Stop it with [`EventPoller::stop`]; dropping it
/// also ends the loop after the current scan.
pub struct EventPoller {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Option<u64>>,
}

impl EventPoller {
    /// Requests shutdown, waits for an in-flight scan to finish, and returns
    /// the block the next scan would have started from.
    pub async fn stop(self) -> Option<u64> {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(next_from_block) => next_from_block,
            Err(e) => {
                warn!(error = %e, "event poller task failed");
                None
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl ConnectionHandle {
    /// Scans for `CheckpointAdded` events on a fixed interval in a background
    /// task, handing each event to `callback` in chain order.
    ///
    /// Consecutive scans cover adjacent block ranges. A failed scan is logged
    /// and retried from the same block on the next tick. The shipment filter
    /// is trimmed and must not be empty.
    pub fn start_polling<F>(&self, options: PollOptions, callback: F) -> Result<EventPoller, ReadError>
    where
        F: Fn(CheckpointEvent) + Send + Sync + 'static,
    {
        let session = self.session().ok_or(ReadError::NotConnected)?.clone();
        let shipment_filter = normalize_filter(options.shipment_filter.as_deref())?.map(str::to_string);
        let interval = options.interval.unwrap_or(session.settings.poll_interval);
        let (shutdown, shutdown_rx) = watch::channel(false);

        info!(interval = ?interval, from_block = ?options.from_block, "starting event poller");

        let task = tokio::spawn(run_poller(
            session,
            interval,
            options.from_block,
            shipment_filter,
            callback,
            shutdown_rx,
        ));

        Ok(EventPoller { shutdown, task })
    }
}

async fn run_poller<F>(
    session: Session,
    interval: Duration,
    mut next_from_block: Option<u64>,
    shipment_filter: Option<String>,
    callback: F,
    mut shutdown: watch::Receiver<bool>,
) -> Option<u64>
where
    F: Fn(CheckpointEvent) + Send + Sync + 'static,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // Shutdown is only observed between scans.
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        let Some(from_block) = next_from_block else {
            match session.rpc.block_number().await {
                Ok(head) => {
                    debug!(head, "event poller anchored at chain head");
                    next_from_block = Some(head + 1);
                }
                Err(e) => warn!(error = %e, "could not read chain head, retrying next tick"),
            }
            continue;
        };

        match scan(&session, from_block, shipment_filter.as_deref()).await {
            Ok(page) => {
                if !page.events.is_empty() {
                    info!(
                        from_block = page.from_block,
                        to_block = ?page.to_block,
                        events = page.events.len(),
                        "new checkpoint events"
                    );
                }
                for event in page.events {
                    callback(event);
                }
                next_from_block = Some(page.next_from_block);
            }
            Err(e) => warn!(from_block, error = %e, "event scan failed, retrying next tick"),
        }
    }

    info!(next_from_block = ?next_from_block, "event poller stopped");
    next_from_block
}
