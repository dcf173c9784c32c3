//! The log broadcaster: one background task fanning node logs out to in-process listeners.
//!
//! Build a [`LogBroadcaster`] with [`LogBroadcasterBuilder`], [`register`](Broadcaster::register)
//! listeners, then [`start`](Broadcaster::start) it. The background task subscribes to logs for
//! every registered contract, backfills recent history, and hands each log to the listeners that
//! asked for it once it is buried under enough blocks. New heads must be fed through
//! [`on_new_longest_chain`](Broadcaster::on_new_longest_chain), for example with
//! [`forward_heads`](crate::forward_heads).
//!
//! Delivery is at-least-once. Listeners make it effectively-once by checking
//! [`was_already_consumed`](Broadcaster::was_already_consumed) and calling
//! [`mark_consumed`](Broadcaster::mark_consumed) in the same ledger scope as their own side
//! effects.

mod builder;
mod null;
mod service;

use std::{
    fmt,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering},
    },
};

use alloy::primitives::BlockNumber;
use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    BroadcasterError,
    broadcast::Broadcast,
    dependents::DependentAwaiter,
    ledger::ConsumptionLedger,
    listener::{Listener, ListenerOpts},
    mailbox::Mailbox,
    registrations::{Registration, RegistrationChange, RegistrationId},
    source::LogSource,
    types::Head,
};

pub use builder::{
    DEFAULT_BLOCK_BACKFILL_DEPTH, DEFAULT_FINALITY_DEPTH, DEFAULT_LOG_BACKFILL_BATCH_SIZE,
    DEFAULT_LOG_BUFFER_CAPACITY, DEFAULT_RESUBSCRIBE_DEBOUNCE, DEFAULT_SUBSCRIBE_RETRY_MAX_DELAY,
    DEFAULT_SUBSCRIBE_RETRY_MIN_DELAY, LogBroadcasterBuilder, backfill_start,
};
pub use null::NullBroadcaster;

/// Delivers contract logs to registered listeners.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// The ledger scope listeners pass to the consumption calls.
    type Scope: Send;

    /// Starts the background task. Calling it again is a no-op.
    ///
    /// The first subscription waits until every dependent added with
    /// [`add_dependents`](Self::add_dependents) has reported ready.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcasterError::Closed`] if the broadcaster was already closed.
    fn start(&self) -> Result<(), BroadcasterError>;

    /// Stops the background task and waits for it and every helper task to exit.
    ///
    /// Idempotent. No listener is invoked after this returns.
    async fn close(&self);

    /// Registers `listener` for the logs described by `opts`.
    ///
    /// Takes effect asynchronously. A new contract or topic is picked up on the next debounced
    /// resubscribe.
    ///
    /// # Errors
    ///
    /// * [`BroadcasterError::MissingTopicFilters`] if `opts` names no event
    /// * [`BroadcasterError::Closed`] if the broadcaster was closed
    fn register(
        &self,
        listener: Arc<dyn Listener>,
        opts: ListenerOpts,
    ) -> Result<Unsubscribe, BroadcasterError>;

    /// Re-deliver logs from `block_number` onwards by resubscribing with a backfill from there.
    ///
    /// Best effort. Dropped if another replay is still pending.
    fn replay_from_block(&self, block_number: BlockNumber);

    /// Whether a live log subscription is currently established.
    fn is_connected(&self) -> bool;

    /// Number of contract addresses in the current node subscription.
    fn tracked_addresses_count(&self) -> usize;

    /// Reports a new chain head. Only the latest unprocessed head is kept.
    fn on_new_longest_chain(&self, head: Head);

    fn add_dependents(&self, count: usize);

    fn dependent_ready(&self);

    /// Resolves once every added dependent has reported ready.
    async fn await_dependents(&self);

    /// Whether `broadcast` was already marked consumed for its job.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger lookup fails.
    async fn was_already_consumed(
        &self,
        scope: &mut Self::Scope,
        broadcast: &Broadcast,
    ) -> Result<bool, BroadcasterError>;

    /// Marks `broadcast` consumed for its job within `scope`.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger write fails.
    async fn mark_consumed(
        &self,
        scope: &mut Self::Scope,
        broadcast: &Broadcast,
    ) -> Result<(), BroadcasterError>;
}

pub(crate) const UNSTARTED: u8 = 0;
const STARTED: u8 = 1;
const CLOSED: u8 = 2;

/// State the caller-facing handle shares with the background task.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) connected: AtomicBool,
    pub(crate) tracked_addresses: AtomicUsize,
    pub(crate) changes: Mailbox<RegistrationChange>,
    pub(crate) heads: Mailbox<Head>,
}

impl Shared {
    fn deliver_change(&self, change: RegistrationChange) {
        if self.changes.deliver(change) {
            warn!("Registration mailbox full, dropped the oldest pending change");
        }
    }
}

/// Handle returned by [`Broadcaster::register`]. Call [`unsubscribe`](Self::unsubscribe) to stop
/// deliveries.
#[must_use = "the listener stays registered until `unsubscribe` is called"]
#[derive(Debug)]
pub struct Unsubscribe {
    id: RegistrationId,
    shared: Option<Arc<Shared>>,
}

impl Unsubscribe {
    /// A handle that unregisters nothing.
    pub fn noop() -> Self {
        Self { id: RegistrationId(0), shared: None }
    }

    pub fn unsubscribe(self) {
        if let Some(shared) = self.shared {
            shared.deliver_change(RegistrationChange::Remove(self.id));
        }
    }
}

/// The chain-connected [`Broadcaster`].
///
/// Cheap to clone. Every clone drives the same background task, which is cancelled once the last
/// clone is dropped.
pub struct LogBroadcaster<S, L> {
    inner: Arc<Inner<S, L>>,
}

pub(crate) struct Inner<S, L> {
    pub(crate) ledger: Arc<L>,
    pub(crate) shared: Arc<Shared>,
    pub(crate) replay_tx: mpsc::Sender<BlockNumber>,
    pub(crate) next_registration_id: AtomicU64,
    pub(crate) state: AtomicU8,
    pub(crate) pending: Mutex<Option<service::Service<S, L>>>,
    pub(crate) cancel: CancellationToken,
    pub(crate) tracker: TaskTracker,
    pub(crate) dependents: DependentAwaiter,
}

impl<S, L> Drop for Inner<S, L> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl<S, L> Clone for LogBroadcaster<S, L> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<S, L> fmt::Debug for LogBroadcaster<S, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogBroadcaster")
            .field("state", &self.inner.state.load(Ordering::Acquire))
            .field("connected", &self.inner.shared.connected.load(Ordering::Acquire))
            .field("tracked_addresses", &self.inner.shared.tracked_addresses.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl<S: LogSource, L: ConsumptionLedger> LogBroadcaster<S, L> {
    /// The ledger consumption markers are stored in.
    #[must_use]
    pub fn ledger(&self) -> &Arc<L> {
        &self.inner.ledger
    }
}

#[async_trait]
impl<S: LogSource, L: ConsumptionLedger> Broadcaster for LogBroadcaster<S, L> {
    type Scope = L::Scope;

    fn start(&self) -> Result<(), BroadcasterError> {
        match self.inner.state.compare_exchange(
            UNSTARTED,
            STARTED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                let service =
                    self.inner.pending.lock().unwrap_or_else(PoisonError::into_inner).take();
                if let Some(service) = service {
                    info!("Starting log broadcaster");
                    self.inner.tracker.spawn(service.run());
                }
                Ok(())
            }
            Err(CLOSED) => Err(BroadcasterError::Closed),
            Err(_) => {
                debug!("Log broadcaster already started");
                Ok(())
            }
        }
    }

    async fn close(&self) {
        let previous = self.inner.state.swap(CLOSED, Ordering::AcqRel);
        if previous != CLOSED {
            info!("Closing log broadcaster");
        }
        drop(self.inner.pending.lock().unwrap_or_else(PoisonError::into_inner).take());

        self.inner.cancel.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.inner.shared.connected.store(false, Ordering::Release);
    }

    fn register(
        &self,
        listener: Arc<dyn Listener>,
        opts: ListenerOpts,
    ) -> Result<Unsubscribe, BroadcasterError> {
        if opts.logs_with_topics.is_empty() {
            error!(
                job_id = listener.job_id(),
                contract = %opts.contract,
                "Listener registered without topic filters"
            );
            return Err(BroadcasterError::MissingTopicFilters(opts.contract));
        }
        if self.inner.state.load(Ordering::Acquire) == CLOSED {
            return Err(BroadcasterError::Closed);
        }

        let id = RegistrationId(self.inner.next_registration_id.fetch_add(1, Ordering::Relaxed));
        self.inner.shared.deliver_change(RegistrationChange::Add(Registration { id, listener, opts }));
        Ok(Unsubscribe { id, shared: Some(Arc::clone(&self.inner.shared)) })
    }

    fn replay_from_block(&self, block_number: BlockNumber) {
        match self.inner.replay_tx.try_send(block_number) {
            Ok(()) => info!(from_block = block_number, "Replay requested"),
            Err(TrySendError::Full(_)) => {
                warn!(from_block = block_number, "Replay already pending, dropping request");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(from_block = block_number, "Broadcaster stopped, dropping replay request");
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.inner.shared.connected.load(Ordering::Acquire)
    }

    fn tracked_addresses_count(&self) -> usize {
        self.inner.shared.tracked_addresses.load(Ordering::Acquire)
    }

    fn on_new_longest_chain(&self, head: Head) {
        self.inner.shared.heads.deliver(head);
    }

    fn add_dependents(&self, count: usize) {
        self.inner.dependents.add_dependents(count);
    }

    fn dependent_ready(&self) {
        self.inner.dependents.dependent_ready();
    }

    async fn await_dependents(&self) {
        self.inner.dependents.await_dependents().await;
    }

    async fn was_already_consumed(
        &self,
        scope: &mut L::Scope,
        broadcast: &Broadcast,
    ) -> Result<bool, BroadcasterError> {
        Ok(self.inner.ledger.was_consumed(Some(scope), &broadcast.consumption_key()).await?)
    }

    async fn mark_consumed(
        &self,
        scope: &mut L::Scope,
        broadcast: &Broadcast,
    ) -> Result<(), BroadcasterError> {
        self.inner
            .ledger
            .mark_consumed(Some(scope), &broadcast.consumption_key(), broadcast.block_number())
            .await?;
        Ok(())
    }
}
