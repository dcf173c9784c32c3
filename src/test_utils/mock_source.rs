use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use alloy::{
    primitives::Address,
    rpc::types::{Filter, Log},
};
use tokio::{sync::mpsc, time::sleep};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{
    robust_provider::Error,
    source::{LogSource, LogStream},
};

/// A scriptable in-memory [`LogSource`].
///
/// Historical logs are served by `logs` filtered by block range, address and topic 0. Live logs
/// are pushed with [`emit`](Self::emit) to every open subscription whose filter matches.
#[derive(Clone, Debug, Default)]
pub struct MockLogSource {
    state: Arc<Mutex<MockState>>,
}

#[derive(Debug, Default)]
struct MockState {
    latest_block: u64,
    historical: Vec<Log>,
    live: Vec<(Filter, mpsc::UnboundedSender<Result<Log, Error>>)>,
    subscription_filters: Vec<Filter>,
    log_requests: Vec<(u64, u64)>,
    failing_subscriptions: usize,
    failing_log_requests: usize,
    log_request_delay: Duration,
}

impl MockLogSource {
    #[must_use]
    pub fn new(latest_block: u64) -> Self {
        let source = Self::default();
        source.lock().latest_block = latest_block;
        source
    }

    pub fn set_latest_block(&self, latest_block: u64) {
        self.lock().latest_block = latest_block;
    }

    /// Make `log` visible to `eth_getLogs`-style queries.
    pub fn add_historical_log(&self, log: Log) {
        self.lock().historical.push(log);
    }

    /// Push `log` to every open subscription whose filter matches it.
    pub fn emit(&self, log: Log) {
        let mut state = self.lock();
        state.live.retain(|(filter, tx)| {
            if !matches(filter, &log) {
                return !tx.is_closed();
            }
            tx.send(Ok(log.clone())).is_ok()
        });
    }

    /// End every open subscription as if the node dropped the connection.
    pub fn end_subscription(&self) {
        self.lock().live.clear();
    }

    /// Fail every open subscription with `err`.
    pub fn fail_subscription(&self, err: Error) {
        for (_, tx) in self.lock().live.drain(..) {
            _ = tx.send(Err(err.clone()));
        }
    }

    /// Reject the next `count` subscribe attempts.
    pub fn fail_next_subscriptions(&self, count: usize) {
        self.lock().failing_subscriptions = count;
    }

    /// Reject the next `count` log queries.
    pub fn fail_next_log_requests(&self, count: usize) {
        self.lock().failing_log_requests = count;
    }

    /// Delay every log query by `delay`.
    pub fn set_log_request_delay(&self, delay: Duration) {
        self.lock().log_request_delay = delay;
    }

    /// Number of subscriptions successfully opened so far.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.lock().subscription_filters.len()
    }

    /// Number of subscriptions still open.
    #[must_use]
    pub fn open_subscriptions(&self) -> usize {
        self.lock().live.iter().filter(|(_, tx)| !tx.is_closed()).count()
    }

    /// Whether the most recently opened subscription covers `address`.
    #[must_use]
    pub fn last_subscription_covers(&self, address: Address) -> bool {
        self.lock()
            .subscription_filters
            .last()
            .is_some_and(|filter| !filter.address.is_empty() && filter.address.matches(&address))
    }

    /// Block ranges requested by log queries, in request order.
    #[must_use]
    pub fn log_requests(&self) -> Vec<(u64, u64)> {
        self.lock().log_requests.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn matches(filter: &Filter, log: &Log) -> bool {
    let signature_filter = &filter.topics[0];
    filter.address.matches(&log.address())
        && log
            .topics()
            .first()
            .map_or(signature_filter.is_empty(), |signature| signature_filter.matches(signature))
}

impl LogSource for MockLogSource {
    async fn latest_block_number(&self) -> Result<u64, Error> {
        Ok(self.lock().latest_block)
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, Error> {
        let from = filter.get_from_block().unwrap_or(0);
        let to = filter.get_to_block().unwrap_or(u64::MAX);

        let delay = {
            let mut state = self.lock();
            state.log_requests.push((from, to));
            if state.failing_log_requests > 0 {
                state.failing_log_requests -= 1;
                return Err(Error::Timeout);
            }
            state.log_request_delay
        };
        if !delay.is_zero() {
            sleep(delay).await;
        }

        let state = self.lock();
        Ok(state
            .historical
            .iter()
            .filter(|log| log.block_number.is_some_and(|block| (from..=to).contains(&block)))
            .filter(|log| matches(filter, log))
            .cloned()
            .collect())
    }

    async fn subscribe_logs(&self, filter: &Filter) -> Result<LogStream, Error> {
        let mut state = self.lock();
        if state.failing_subscriptions > 0 {
            state.failing_subscriptions -= 1;
            return Err(Error::Timeout);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.live.push((filter.clone(), tx));
        state.subscription_filters.push(filter.clone());
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}
