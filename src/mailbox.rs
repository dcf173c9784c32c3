use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
};

use tokio::sync::Notify;

/// How many undelivered items a [`Mailbox`] retains.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MailboxCapacity {
    /// Keep at most `n` items, dropping the oldest on overflow.
    ///
    /// `Bounded(0)` behaves like `Bounded(1)`: the newest item is always kept.
    Bounded(usize),
    /// Keep every item.
    Unbounded,
}

macro_rules! impl_from_unsigned {
    ($target:ty; $($source:ty),+ $(,)?) => {
        $(
            impl From<$source> for $target {
                fn from(value: $source) -> Self {
                    MailboxCapacity::Bounded(value as usize)
                }
            }
        )+
    };
}

impl_from_unsigned!(MailboxCapacity; u8, u16, u32, usize);

/// A multi-producer, single-consumer queue that never blocks the producer.
///
/// Producers [`deliver`](Self::deliver) and the consumer waits on [`notified`](Self::notified),
/// then drains with [`retrieve`](Self::retrieve) or
/// [`retrieve_latest_and_clear`](Self::retrieve_latest_and_clear). Wake-ups coalesce: one
/// notification may stand for many deliveries, so the consumer must drain.
#[derive(Debug)]
pub(crate) struct Mailbox<T> {
    queue: Mutex<VecDeque<T>>,
    capacity: MailboxCapacity,
    notify: Notify,
}

impl<T> Mailbox<T> {
    pub(crate) fn new(capacity: impl Into<MailboxCapacity>) -> Self {
        Self { queue: Mutex::new(VecDeque::new()), capacity: capacity.into(), notify: Notify::new() }
    }

    /// Enqueue `item`. Returns true if the mailbox was full and its oldest item was dropped.
    pub(crate) fn deliver(&self, item: T) -> bool {
        let dropped = {
            let mut queue = self.lock();
            queue.push_back(item);
            match self.capacity {
                MailboxCapacity::Unbounded => false,
                MailboxCapacity::Bounded(limit) => {
                    let limit = limit.max(1);
                    let overflow = queue.len().saturating_sub(limit);
                    queue.drain(..overflow);
                    overflow > 0
                }
            }
        };
        self.notify.notify_one();
        dropped
    }

    /// Take the oldest pending item.
    pub(crate) fn retrieve(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Take the newest pending item and discard the rest.
    pub(crate) fn retrieve_latest_and_clear(&self) -> Option<T> {
        let mut queue = self.lock();
        let latest = queue.pop_back();
        queue.clear();
        latest
    }

    /// Resolves once something has been delivered since the last wake-up.
    pub(crate) async fn notified(&self) {
        self.notify.notified().await;
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
