use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{sync::watch, time::timeout};

use crate::{
    broadcast::Broadcast,
    ledger::{ConsumptionLedger, InMemoryLedger},
    listener::Listener,
    types::JobId,
};

/// A [`Listener`] that records every broadcast it handles.
///
/// Built with [`marking`](Self::marking) it follows the consumer contract against an
/// [`InMemoryLedger`]: broadcasts already marked consumed are skipped, the rest are recorded and
/// then marked.
#[derive(Debug)]
pub struct RecordingListener {
    job_id: JobId,
    ledger: Option<Arc<InMemoryLedger>>,
    received: Mutex<Vec<Broadcast>>,
    count: watch::Sender<usize>,
}

impl RecordingListener {
    #[must_use]
    pub fn new(job_id: JobId) -> Arc<Self> {
        Self::with_ledger(job_id, None)
    }

    #[must_use]
    pub fn marking(job_id: JobId, ledger: Arc<InMemoryLedger>) -> Arc<Self> {
        Self::with_ledger(job_id, Some(ledger))
    }

    fn with_ledger(job_id: JobId, ledger: Option<Arc<InMemoryLedger>>) -> Arc<Self> {
        Arc::new(Self {
            job_id,
            ledger,
            received: Mutex::new(Vec::new()),
            count: watch::Sender::new(0),
        })
    }

    #[must_use]
    pub fn received(&self) -> Vec<Broadcast> {
        self.lock().clone()
    }

    /// Block numbers of the received broadcasts, in delivery order.
    #[must_use]
    pub fn blocks(&self) -> Vec<u64> {
        self.lock().iter().map(Broadcast::block_number).collect()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        *self.count.borrow()
    }

    /// Waits until at least `count` broadcasts were received. Returns false on timeout.
    pub async fn wait_for_count(&self, count: usize, within: Duration) -> bool {
        let mut received = self.count.subscribe();
        timeout(within, received.wait_for(|received| *received >= count)).await.is_ok()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Broadcast>> {
        self.received.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Listener for RecordingListener {
    async fn handle_log(&self, broadcast: Broadcast) {
        let key = broadcast.consumption_key();
        if let Some(ledger) = &self.ledger {
            if ledger.was_consumed(None, &key).await.unwrap_or(false) {
                return;
            }
        }

        self.lock().push(broadcast.clone());
        self.count.send_modify(|count| *count += 1);

        if let Some(ledger) = &self.ledger {
            _ = ledger.mark_consumed(None, &key, broadcast.block_number()).await;
        }
    }

    fn job_id(&self) -> JobId {
        self.job_id
    }
}
