use std::{
    sync::{Arc, atomic::Ordering},
    time::Duration,
};

use alloy::{primitives::BlockNumber, rpc::types::Log};
use tokio::{
    sync::mpsc,
    time::{MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;

use crate::{
    broadcaster::{Shared, builder::backfill_start},
    dependents::DependentAwaiter,
    ledger::ConsumptionLedger,
    log_pool::LogPool,
    registrations::{RegistrationChange, Registrations},
    robust_provider::Error as ProviderError,
    source::LogSource,
    subscriber::{EthSubscriber, LogStreams, ManagedSubscription},
    types::{Head, LogPosition},
};

/// Distance from the last seen head beyond which an arriving log is reported as suspicious.
const MAX_EXPECTED_HEAD_DISTANCE: u64 = 1000;

#[derive(Debug, Clone)]
pub(crate) struct ServiceConfig {
    pub(crate) finality_depth: u64,
    pub(crate) block_backfill_depth: u64,
    pub(crate) block_backfill_skip: bool,
    pub(crate) resubscribe_debounce: Duration,
}

enum LoopExit {
    Stop,
    /// Resubscribe, backfilling from the given block if set.
    Resubscribe(Option<BlockNumber>),
}

/// The background task. Owns the registrations and the log pool.
pub(crate) struct Service<S, L> {
    subscriber: EthSubscriber<S>,
    ledger: Arc<L>,
    shared: Arc<Shared>,
    replay_rx: mpsc::Receiver<BlockNumber>,
    cancel: CancellationToken,
    dependents: DependentAwaiter,
    config: ServiceConfig,
    highest_saved_head: Option<Head>,
    registrations: Registrations,
    pool: LogPool,
    streams: LogStreams,
    latest_head: Option<Head>,
    needs_resubscribe: bool,
}

impl<S: LogSource, L: ConsumptionLedger> Service<S, L> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        subscriber: EthSubscriber<S>,
        ledger: Arc<L>,
        shared: Arc<Shared>,
        replay_rx: mpsc::Receiver<BlockNumber>,
        cancel: CancellationToken,
        dependents: DependentAwaiter,
        config: ServiceConfig,
        highest_saved_head: Option<Head>,
    ) -> Self {
        Self {
            subscriber,
            ledger,
            shared,
            replay_rx,
            cancel,
            dependents,
            config,
            highest_saved_head,
            registrations: Registrations::default(),
            pool: LogPool::default(),
            streams: LogStreams::default(),
            latest_head: None,
            needs_resubscribe: false,
        }
    }

    pub(crate) async fn run(mut self) {
        if !self.await_initial_subscribers().await {
            debug!("Broadcaster closed before its dependents were ready");
            return;
        }

        let mut backfill_from = self.initial_backfill_start();
        let mut subscription: Option<ManagedSubscription> = None;

        loop {
            self.shared.connected.store(false, Ordering::Release);
            let (addresses, topics) = self.registrations.addresses_and_topics();
            let (errors_tx, errors_rx) = mpsc::channel::<ProviderError>(1);

            let Some(mut next) =
                self.subscriber.create_subscription(&addresses, &topics, &errors_tx).await
            else {
                break;
            };
            let Some(backfill) =
                self.subscriber.backfill_logs(backfill_from.take(), &addresses, &topics).await
            else {
                break;
            };

            self.streams.push(backfill);
            if let Some(live) = next.take_logs() {
                self.streams.push(live);
            }
            if let Some(previous) = subscription.replace(next) {
                previous.unsubscribe();
            }

            self.needs_resubscribe = false;
            self.shared.tracked_addresses.store(addresses.len(), Ordering::Release);
            self.shared.connected.store(true, Ordering::Release);
            info!(
                addresses = addresses.len(),
                topics = topics.len(),
                pending_streams = self.streams.len(),
                "Log broadcaster connected"
            );

            match self.event_loop(errors_rx).await {
                LoopExit::Stop => break,
                LoopExit::Resubscribe(from) => {
                    if from.is_some() {
                        backfill_from = from;
                    }
                }
            }
        }

        self.shared.connected.store(false, Ordering::Release);
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
        debug!("Log broadcaster stopped");
    }

    /// Applies registration changes until every dependent is ready. Returns false on close.
    async fn await_initial_subscribers(&mut self) -> bool {
        let dependents = self.dependents.clone();
        let ready = dependents.await_dependents();
        tokio::pin!(ready);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return false,
                () = &mut ready => {
                    self.apply_registration_changes();
                    return true;
                }
                () = self.shared.changes.notified() => self.apply_registration_changes(),
            }
        }
    }

    fn initial_backfill_start(&mut self) -> Option<BlockNumber> {
        let saved = self.highest_saved_head.take()?;
        if self.config.block_backfill_skip {
            warn!(
                saved_head = saved.number,
                block_backfill_depth = self.config.block_backfill_depth,
                "Backfill skip is set, ignoring the saved head"
            );
            return None;
        }

        let start = backfill_start(
            saved.number,
            self.registrations.highest_num_confirmations(),
            self.config.block_backfill_depth,
        );
        info!(saved_head = saved.number, from_block = start, "Backfilling from the saved head");
        Some(start)
    }

    async fn event_loop(&mut self, mut errors: mpsc::Receiver<ProviderError>) -> LoopExit {
        let mut debounce = interval(self.config.resubscribe_debounce);
        debounce.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debounce.reset();

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return LoopExit::Stop,
                Some(err) = errors.recv() => {
                    warn!(error = %err, "Log stream failed, resubscribing");
                    return LoopExit::Resubscribe(None);
                }
                Some(from_block) = self.replay_rx.recv() => {
                    info!(from_block = from_block, "Replaying logs");
                    return LoopExit::Resubscribe(Some(from_block));
                }
                () = self.shared.heads.notified() => {
                    if let Some(head) = self.shared.heads.retrieve_latest_and_clear() {
                        self.on_new_head(head).await;
                    }
                }
                () = self.shared.changes.notified() => self.apply_registration_changes(),
                Some(log) = self.streams.next() => self.on_new_log(log).await,
                _ = debounce.tick() => {
                    if self.needs_resubscribe {
                        info!(registrations = self.registrations.len(), "Registrations changed, resubscribing");
                        return LoopExit::Resubscribe(None);
                    }
                }
            }
        }
    }

    fn apply_registration_changes(&mut self) {
        while let Some(change) = self.shared.changes.retrieve() {
            self.needs_resubscribe |= match change {
                RegistrationChange::Add(registration) => {
                    self.registrations.add_subscriber(registration)
                }
                RegistrationChange::Remove(id) => self.registrations.remove_subscriber(id),
            };
        }
    }

    async fn on_new_head(&mut self, head: Head) {
        trace!(head = %head, pooled_logs = self.pool.len(), "New head");
        self.latest_head = Some(head);
        self.dispatch(head).await;
    }

    async fn on_new_log(&mut self, log: Log) {
        let Some(position) = LogPosition::of(&log) else {
            warn!(
                address = %log.address(),
                "Ignoring log without block number, block hash or log index"
            );
            return;
        };

        if let Some(head) = self.latest_head {
            if position.block_number.abs_diff(head.number) > MAX_EXPECTED_HEAD_DISTANCE {
                warn!(
                    block_number = position.block_number,
                    head = head.number,
                    "Received log far away from the current head"
                );
            }
        }

        if log.removed {
            debug!(
                block_number = position.block_number,
                block_hash = %position.block_hash,
                log_index = position.log_index,
                "Purging removed log"
            );
            self.pool.remove_log(&log);
            return;
        }

        if !self.registrations.is_address_registered(&log.address()) {
            trace!(address = %log.address(), "Ignoring log for unregistered address");
            return;
        }

        self.pool.add_log(log);

        if self.registrations.highest_num_confirmations() == 0 {
            if let Some(head) = self.latest_head {
                if head.number >= position.block_number {
                    self.dispatch(head).await;
                }
            }
        }
    }

    /// Delivers every pooled log that is confirmed at `head`.
    async fn dispatch(&mut self, head: Head) {
        if self.pool.is_empty() {
            return;
        }

        let highest_num_confirmations = self.registrations.highest_num_confirmations();
        if highest_num_confirmations == 0 {
            self.dispatch_unconfirmed(head).await;
            return;
        }

        let Some((logs, lowest)) = self.pool.get_logs_to_send(head.number) else {
            return;
        };
        let consumed = match self.ledger.find_consumed(lowest, head.number).await {
            Ok(consumed) => consumed,
            Err(err) => {
                error!(
                    from_block = lowest,
                    to_block = head.number,
                    error = %err,
                    "Failed to load consumed logs, retrying on the next head"
                );
                return;
            }
        };

        self.registrations
            .send_logs(&logs, &head, &consumed, self.ledger.as_ref(), &self.cancel)
            .await;

        let retention = self.config.finality_depth.max(highest_num_confirmations);
        self.pool.delete_older_logs(head.number.saturating_sub(retention));
    }

    /// Nobody needs confirmations: drain the pool instead of keeping logs until finality.
    async fn dispatch_unconfirmed(&mut self, head: Head) {
        let Some((logs, _, _)) = self.pool.get_and_delete_all() else {
            return;
        };
        let (ready, ahead): (Vec<Log>, Vec<Log>) = logs
            .into_iter()
            .partition(|log| log.block_number.is_some_and(|block| block <= head.number));
        for log in ahead {
            self.pool.add_log(log);
        }
        let Some(lowest) = ready.iter().filter_map(|log| log.block_number).min() else {
            return;
        };

        let consumed = match self.ledger.find_consumed(lowest, head.number).await {
            Ok(consumed) => consumed,
            Err(err) => {
                error!(
                    from_block = lowest,
                    to_block = head.number,
                    error = %err,
                    "Failed to load consumed logs, retrying on the next head"
                );
                for log in ready {
                    self.pool.add_log(log);
                }
                return;
            }
        };

        self.registrations
            .send_logs(&ready, &head, &consumed, self.ledger.as_ref(), &self.cancel)
            .await;
    }

    #[cfg(test)]
    pub(crate) fn next_replay(&mut self) -> Option<BlockNumber> {
        self.replay_rx.try_recv().ok()
    }
}
