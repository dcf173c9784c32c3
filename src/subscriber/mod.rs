//! Node-facing half of the broadcaster: live log subscription and ranged backfill.
//!
//! Both produce plain log channels that the event loop reads through [`LogStreams`]. A failing
//! live stream is reported on the resubscribe cycle's error channel, since it runs on a background
//! task. Node requests (subscribe, latest block, backfill batches) are retried with backoff until
//! they succeed or the broadcaster closes.

mod ranges;
mod streams;

use std::time::Duration;

use alloy::{
    primitives::{Address, B256},
    rpc::types::{Filter, Log},
};
use backon::{BackoffBuilder, ExponentialBuilder};
use tokio::{sync::mpsc, time::sleep};
use tokio_stream::StreamExt;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    robust_provider::Error,
    source::{LogSource, LogStream},
};

pub(crate) use ranges::BackfillRanges;
pub(crate) use streams::LogStreams;

/// Sender half of a resubscribe cycle's error channel.
pub(crate) type CycleErrors = mpsc::Sender<Error>;

#[derive(Debug, Clone)]
pub(crate) struct SubscriberConfig {
    pub(crate) block_backfill_depth: u64,
    pub(crate) log_backfill_batch_size: u64,
    pub(crate) log_buffer_capacity: usize,
    pub(crate) retry_min_delay: Duration,
    pub(crate) retry_max_delay: Duration,
}

/// An open log subscription. Dropping it stops forwarding.
#[derive(Debug)]
pub(crate) struct ManagedSubscription {
    logs: Option<mpsc::Receiver<Log>>,
    cancel: Option<CancellationToken>,
}

impl ManagedSubscription {
    /// A subscription that never yields, used while no address is registered.
    fn noop() -> Self {
        Self { logs: None, cancel: None }
    }

    pub(crate) fn take_logs(&mut self) -> Option<mpsc::Receiver<Log>> {
        self.logs.take()
    }

    /// Cancels the forwarding task. The live channel closes once its buffered logs are read.
    pub(crate) fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for ManagedSubscription {
    fn drop(&mut self) {
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
    }
}

pub(crate) struct EthSubscriber<S> {
    source: S,
    config: SubscriberConfig,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl<S: LogSource> EthSubscriber<S> {
    pub(crate) fn new(
        source: S,
        config: SubscriberConfig,
        cancel: CancellationToken,
        tracker: TaskTracker,
    ) -> Self {
        Self { source, config, cancel, tracker }
    }

    /// Open a live subscription for `addresses` and `topics`, retrying until it succeeds.
    ///
    /// Returns `None` if the broadcaster is closing.
    pub(crate) async fn create_subscription(
        &self,
        addresses: &[Address],
        topics: &[B256],
        errors: &CycleErrors,
    ) -> Option<ManagedSubscription> {
        if addresses.is_empty() {
            debug!("No addresses registered, skipping log subscription");
            return Some(ManagedSubscription::noop());
        }

        let filter = log_filter(addresses, topics);
        let stream = retry_until_cancelled("eth_subscribe", &self.config, &self.cancel, || {
            self.source.subscribe_logs(&filter)
        })
        .await?;

        let cancel = self.cancel.child_token();
        let (logs_tx, logs_rx) = mpsc::channel(self.config.log_buffer_capacity);
        self.tracker.spawn(forward_live_logs(stream, logs_tx, errors.clone(), cancel.clone()));

        info!(addresses = addresses.len(), topics = topics.len(), "Subscribed to logs");
        Some(ManagedSubscription { logs: Some(logs_rx), cancel: Some(cancel) })
    }

    /// Stream historical logs for `addresses` and `topics` up to the latest block.
    ///
    /// Starts at `from_block`, or `block_backfill_depth` blocks behind the latest block when
    /// `None`. Failed batches are retried, so the channel only closes once every block up to the
    /// latest one has been fetched. Returns `None` if the broadcaster is closing.
    pub(crate) async fn backfill_logs(
        &self,
        from_block: Option<u64>,
        addresses: &[Address],
        topics: &[B256],
    ) -> Option<mpsc::Receiver<Log>> {
        let (logs_tx, logs_rx) = mpsc::channel(self.config.log_buffer_capacity);
        if addresses.is_empty() {
            return Some(logs_rx);
        }

        let latest = retry_until_cancelled("eth_blockNumber", &self.config, &self.cancel, || {
            self.source.latest_block_number()
        })
        .await?;
        let start = from_block
            .unwrap_or_else(|| latest.saturating_sub(self.config.block_backfill_depth))
            .min(latest);

        let ranges = BackfillRanges::new(start, latest, self.config.log_backfill_batch_size);
        info!(from_block = start, to_block = latest, batches = ranges.remaining(), "Backfilling logs");

        self.tracker.spawn(backfill(
            self.source.clone(),
            log_filter(addresses, topics),
            ranges,
            logs_tx,
            self.config.clone(),
            self.cancel.clone(),
        ));
        Some(logs_rx)
    }
}

/// Run `attempt` until it succeeds, backing off exponentially between failures.
///
/// Returns `None` once `cancel` fires.
async fn retry_until_cancelled<T, F, Fut>(
    operation: &'static str,
    config: &SubscriberConfig,
    cancel: &CancellationToken,
    attempt: F,
) -> Option<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut delays = ExponentialBuilder::default()
        .with_min_delay(config.retry_min_delay)
        .with_max_delay(config.retry_max_delay)
        .without_max_times()
        .build();

    loop {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return None,
            result = attempt() => result,
        };

        match result {
            Ok(value) => return Some(value),
            Err(err) => {
                let delay = delays.next().unwrap_or(config.retry_max_delay);
                warn!(
                    operation = operation,
                    error = %err,
                    retry_in_ms = delay.as_millis(),
                    "Node request failed, retrying"
                );
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return None,
                    () = sleep(delay) => {}
                }
            }
        }
    }
}


fn log_filter(addresses: &[Address], topics: &[B256]) -> Filter {
    Filter::new().address(addresses.to_vec()).event_signature(topics.to_vec())
}

async fn forward_live_logs(
    mut stream: LogStream,
    logs: mpsc::Sender<Log>,
    errors: CycleErrors,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            next = stream.next() => next,
        };

        let log = match next {
            Some(Ok(log)) => log,
            Some(Err(err)) => {
                _ = errors.try_send(err);
                return;
            }
            None => {
                _ = errors.try_send(Error::SubscriptionClosed);
                return;
            }
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            sent = logs.send(log) => if sent.is_err() { return },
        }
    }
}

async fn backfill<S: LogSource>(
    source: S,
    filter: Filter,
    ranges: BackfillRanges,
    logs: mpsc::Sender<Log>,
    config: SubscriberConfig,
    cancel: CancellationToken,
) {
    for range in ranges {
        let batch_filter = filter.clone().from_block(*range.start()).to_block(*range.end());
        let Some(mut batch) =
            retry_until_cancelled("eth_getLogs", &config, &cancel, || source.logs(&batch_filter))
                .await
        else {
            return;
        };
        batch.sort_by_key(|log| (log.block_number, log.log_index));
        trace!(
            from_block = *range.start(),
            to_block = *range.end(),
            logs = batch.len(),
            "Fetched backfill batch"
        );

        for log in batch {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                sent = logs.send(log) => if sent.is_err() { return },
            }
        }
    }
    debug!("Backfill complete");
}
