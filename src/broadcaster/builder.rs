use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize},
    },
    time::Duration,
};

use alloy::primitives::BlockNumber;
use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    BroadcasterError,
    broadcaster::{
        Inner, LogBroadcaster, Shared, UNSTARTED,
        service::{Service, ServiceConfig},
    },
    dependents::DependentAwaiter,
    ledger::ConsumptionLedger,
    mailbox::{Mailbox, MailboxCapacity},
    source::LogSource,
    subscriber::{EthSubscriber, SubscriberConfig},
    types::Head,
};

/// Blocks after which a log is considered final and evicted from the pool.
pub const DEFAULT_FINALITY_DEPTH: u64 = 50;
/// How far behind the latest block a backfill starts when no saved head is known.
pub const DEFAULT_BLOCK_BACKFILL_DEPTH: u64 = 10;
/// Blocks per `eth_getLogs` request during backfill.
pub const DEFAULT_LOG_BACKFILL_BATCH_SIZE: u64 = 100;
/// Minimum time between two resubscribes caused by registration changes.
pub const DEFAULT_RESUBSCRIBE_DEBOUNCE: Duration = Duration::from_secs(1);
/// Logs buffered per backfill or live channel before the producer waits for the event loop.
pub const DEFAULT_LOG_BUFFER_CAPACITY: usize = 1024;
/// First delay between failed subscribe attempts.
pub const DEFAULT_SUBSCRIBE_RETRY_MIN_DELAY: Duration = Duration::from_secs(1);
/// Cap on the delay between failed subscribe attempts.
pub const DEFAULT_SUBSCRIBE_RETRY_MAX_DELAY: Duration = Duration::from_secs(60);

/// Builder/configuration for [`LogBroadcaster`].
#[derive(Clone, Debug)]
pub struct LogBroadcasterBuilder {
    /// Depth after which logs are evicted from the pool, unless a listener needs more.
    pub finality_depth: u64,
    pub block_backfill_depth: u64,
    /// Ignore [`highest_saved_head`](Self::highest_saved_head) and backfill from
    /// `block_backfill_depth` behind the latest block.
    pub block_backfill_skip: bool,
    /// Must be greater than 0.
    pub log_backfill_batch_size: u64,
    /// Must be non-zero.
    pub resubscribe_debounce: Duration,
    /// Pending `register`/`unsubscribe` requests kept while the event loop is busy.
    ///
    /// A bounded mailbox drops the oldest request on overflow.
    pub registration_mailbox_capacity: MailboxCapacity,
    /// Must be greater than 0.
    pub log_buffer_capacity: usize,
    pub subscribe_retry_min_delay: Duration,
    pub subscribe_retry_max_delay: Duration,
    /// Highest head processed before the last shutdown, used once to pick the backfill start.
    pub highest_saved_head: Option<Head>,
}

impl Default for LogBroadcasterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LogBroadcasterBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            finality_depth: DEFAULT_FINALITY_DEPTH,
            block_backfill_depth: DEFAULT_BLOCK_BACKFILL_DEPTH,
            block_backfill_skip: false,
            log_backfill_batch_size: DEFAULT_LOG_BACKFILL_BATCH_SIZE,
            resubscribe_debounce: DEFAULT_RESUBSCRIBE_DEBOUNCE,
            registration_mailbox_capacity: MailboxCapacity::Unbounded,
            log_buffer_capacity: DEFAULT_LOG_BUFFER_CAPACITY,
            subscribe_retry_min_delay: DEFAULT_SUBSCRIBE_RETRY_MIN_DELAY,
            subscribe_retry_max_delay: DEFAULT_SUBSCRIBE_RETRY_MAX_DELAY,
            highest_saved_head: None,
        }
    }

    #[must_use]
    pub fn finality_depth(mut self, finality_depth: u64) -> Self {
        self.finality_depth = finality_depth;
        self
    }

    #[must_use]
    pub fn block_backfill_depth(mut self, block_backfill_depth: u64) -> Self {
        self.block_backfill_depth = block_backfill_depth;
        self
    }

    #[must_use]
    pub fn block_backfill_skip(mut self, block_backfill_skip: bool) -> Self {
        self.block_backfill_skip = block_backfill_skip;
        self
    }

    /// Sets the number of blocks fetched per `eth_getLogs` request during backfill.
    ///
    /// Must be greater than 0.
    #[must_use]
    pub fn log_backfill_batch_size(mut self, log_backfill_batch_size: u64) -> Self {
        self.log_backfill_batch_size = log_backfill_batch_size;
        self
    }

    /// Sets the window in which registration changes are folded into a single resubscribe.
    ///
    /// Must be non-zero.
    #[must_use]
    pub fn resubscribe_debounce(mut self, resubscribe_debounce: Duration) -> Self {
        self.resubscribe_debounce = resubscribe_debounce;
        self
    }

    #[must_use]
    pub fn registration_mailbox_capacity(mut self, capacity: impl Into<MailboxCapacity>) -> Self {
        self.registration_mailbox_capacity = capacity.into();
        self
    }

    /// Sets the per-channel log buffer.
    ///
    /// # Arguments
    ///
    /// * `log_buffer_capacity` - Logs buffered before backpressure applies (must be greater than
    ///   0)
    #[must_use]
    pub fn log_buffer_capacity(mut self, log_buffer_capacity: usize) -> Self {
        self.log_buffer_capacity = log_buffer_capacity;
        self
    }

    /// Sets the exponential backoff bounds used while (re)subscribing.
    #[must_use]
    pub fn subscribe_retry_delays(mut self, min_delay: Duration, max_delay: Duration) -> Self {
        self.subscribe_retry_min_delay = min_delay;
        self.subscribe_retry_max_delay = max_delay;
        self
    }

    #[must_use]
    pub fn highest_saved_head(mut self, head: Head) -> Self {
        self.highest_saved_head = Some(head);
        self
    }

    /// Builds an unstarted broadcaster reading logs from `source`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * The log backfill batch size is zero
    /// * The resubscribe debounce interval is zero
    /// * The log buffer capacity is zero
    pub fn build<S: LogSource, L: ConsumptionLedger>(
        self,
        source: S,
        ledger: Arc<L>,
    ) -> Result<LogBroadcaster<S, L>, BroadcasterError> {
        if self.log_backfill_batch_size == 0 {
            return Err(BroadcasterError::InvalidBackfillBatchSize);
        }
        if self.resubscribe_debounce.is_zero() {
            return Err(BroadcasterError::InvalidDebounceInterval);
        }
        if self.log_buffer_capacity == 0 {
            return Err(BroadcasterError::InvalidBufferCapacity);
        }

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let dependents = DependentAwaiter::new();
        let shared = Arc::new(Shared {
            connected: AtomicBool::new(false),
            tracked_addresses: AtomicUsize::new(0),
            changes: Mailbox::new(self.registration_mailbox_capacity),
            heads: Mailbox::new(1usize),
        });
        let (replay_tx, replay_rx) = mpsc::channel(1);

        let subscriber = EthSubscriber::new(
            source,
            SubscriberConfig {
                block_backfill_depth: self.block_backfill_depth,
                log_backfill_batch_size: self.log_backfill_batch_size,
                log_buffer_capacity: self.log_buffer_capacity,
                retry_min_delay: self.subscribe_retry_min_delay,
                retry_max_delay: self.subscribe_retry_max_delay,
            },
            cancel.clone(),
            tracker.clone(),
        );
        let service = Service::new(
            subscriber,
            Arc::clone(&ledger),
            Arc::clone(&shared),
            replay_rx,
            cancel.clone(),
            dependents.clone(),
            ServiceConfig {
                finality_depth: self.finality_depth,
                block_backfill_depth: self.block_backfill_depth,
                block_backfill_skip: self.block_backfill_skip,
                resubscribe_debounce: self.resubscribe_debounce,
            },
            self.highest_saved_head,
        );

        Ok(LogBroadcaster {
            inner: Arc::new(Inner {
                ledger,
                shared,
                replay_tx,
                next_registration_id: AtomicU64::new(0),
                state: AtomicU8::new(UNSTARTED),
                pending: Mutex::new(Some(service)),
                cancel,
                tracker,
                dependents,
            }),
        })
    }
}

/// First block to backfill from after a restart.
///
/// Goes back far enough that the deepest confirmation requirement and the configured backfill
/// depth are both covered below the saved head.
#[must_use]
pub const fn backfill_start(
    saved_head: BlockNumber,
    highest_num_confirmations: u64,
    block_backfill_depth: u64,
) -> BlockNumber {
    saved_head.saturating_sub(highest_num_confirmations).saturating_sub(block_backfill_depth)
}
