use std::{
    fmt,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, ready},
    time::{Duration, Instant},
};

use alloy::{
    network::Network,
    providers::RootProvider,
    pubsub::Subscription,
    transports::{RpcError, TransportErrorKind},
};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use tokio::{sync::broadcast::error::RecvError, time::timeout};
use tokio_stream::Stream;
use tokio_util::sync::ReusableBoxFuture;

use crate::robust_provider::{Error, RobustProvider};

/// Default time interval between primary provider reconnection attempts
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(30);

/// Maximum number of consecutive lags before switching providers
const MAX_LAG_COUNT: usize = 3;

/// Opens the underlying `eth_subscribe` stream on a given provider.
pub(crate) type SubscribeFn<N, T> = Arc<
    dyn Fn(RootProvider<N>) -> BoxFuture<'static, Result<Subscription<T>, RpcError<TransportErrorKind>>>
        + Send
        + Sync,
>;

/// A pubsub subscription that survives provider failures.
///
/// `T` is the notification type, block headers for [`RobustProvider::subscribe_blocks`] and logs
/// for [`RobustProvider::subscribe_logs`]. When the current provider goes quiet for longer than the
/// subscription timeout, closes the channel, or lags repeatedly, the same subscription is reopened
/// on the next fallback. While on a fallback the primary is retried every reconnect interval.
pub struct RobustSubscription<N: Network, T> {
    subscription: Option<Subscription<T>>,
    subscribe: SubscribeFn<N, T>,
    robust_provider: RobustProvider<N>,
    last_reconnect_attempt: Option<Instant>,
    consecutive_lags: usize,
    current_fallback_index: Option<usize>,
}

impl<N: Network, T> fmt::Debug for RobustSubscription<N, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RobustSubscription")
            .field("active", &self.subscription.is_some())
            .field("consecutive_lags", &self.consecutive_lags)
            .field("current_fallback_index", &self.current_fallback_index)
            .finish_non_exhaustive()
    }
}

impl<N, T> RobustSubscription<N, T>
where
    N: Network,
    T: DeserializeOwned + fmt::Debug + Send + 'static,
{
    pub(crate) fn new(
        subscription: Subscription<T>,
        subscribe: SubscribeFn<N, T>,
        robust_provider: RobustProvider<N>,
    ) -> Self {
        Self {
            subscription: Some(subscription),
            subscribe,
            robust_provider,
            last_reconnect_attempt: None,
            consecutive_lags: 0,
            current_fallback_index: None,
        }
    }

    /// Receive the next notification, failing over between providers as needed.
    ///
    /// # Errors
    ///
    /// Returns an error once every provider has been tried and failed.
    pub async fn recv(&mut self) -> Result<T, Error> {
        let subscription_timeout = self.robust_provider.subscription_timeout;
        loop {
            self.try_reconnect_to_primary().await;

            let Some(subscription) = &mut self.subscription else {
                return Err(TransportErrorKind::BackendGone.into());
            };

            let received = timeout(subscription_timeout, subscription.recv()).await;
            match received {
                Ok(Ok(item)) => {
                    self.consecutive_lags = 0;
                    return Ok(item);
                }
                Ok(Err(recv_error)) => self.process_recv_error(recv_error).await?,
                Err(elapsed) => {
                    warn!(
                        timeout_secs = subscription_timeout.as_secs(),
                        "Subscription went quiet, switching provider"
                    );

                    if self.current_fallback_index.is_some() && self.try_reconnect_to_primary().await
                    {
                        continue;
                    }

                    self.switch_to_fallback(elapsed.into()).await?;
                }
            }
        }
    }

    async fn process_recv_error(&mut self, recv_error: RecvError) -> Result<(), Error> {
        match recv_error {
            RecvError::Closed => {
                warn!("Subscription channel closed, switching provider");
                self.switch_to_fallback(TransportErrorKind::BackendGone.into()).await?;
            }
            RecvError::Lagged(skipped) => {
                self.consecutive_lags += 1;
                warn!(
                    skipped = skipped,
                    consecutive_lags = self.consecutive_lags,
                    "Subscription lagged"
                );

                if self.consecutive_lags >= MAX_LAG_COUNT {
                    warn!("Too many consecutive lags, switching provider");
                    self.switch_to_fallback(TransportErrorKind::BackendGone.into()).await?;
                }
            }
        }
        Ok(())
    }

    /// Returns true if the subscription moved back to the primary provider.
    async fn try_reconnect_to_primary(&mut self) -> bool {
        let due = self
            .last_reconnect_attempt
            .is_some_and(|last| last.elapsed() >= self.robust_provider.reconnect_interval);
        if !due {
            return false;
        }

        debug!("Attempting to reconnect to primary provider");

        let subscribe = Arc::clone(&self.subscribe);
        let primary = self.robust_provider.primary();
        match self.robust_provider.try_provider_with_timeout(primary, &*subscribe).await {
            Ok(sub) => {
                info!("Reconnected to primary provider");
                self.subscription = Some(sub);
                self.current_fallback_index = None;
                self.last_reconnect_attempt = None;
                self.consecutive_lags = 0;
                true
            }
            Err(e) => {
                self.last_reconnect_attempt = Some(Instant::now());
                warn!(error = %e, "Failed to reconnect to primary provider");
                false
            }
        }
    }

    async fn switch_to_fallback(&mut self, last_error: Error) -> Result<(), Error> {
        if self.last_reconnect_attempt.is_none() {
            self.last_reconnect_attempt = Some(Instant::now());
        }

        let subscribe = Arc::clone(&self.subscribe);
        let start_index = self.current_fallback_index.map_or(0, |idx| idx + 1);

        match self
            .robust_provider
            .try_fallback_providers_from(&*subscribe, true, last_error, start_index)
            .await
        {
            Ok((sub, fallback_idx)) => {
                self.subscription = Some(sub);
                self.current_fallback_index = Some(fallback_idx);
                self.consecutive_lags = 0;
                Ok(())
            }
            Err(e) => {
                self.subscription = None;
                error!(error = %e, "eth_subscribe failed - no fallbacks available");
                Err(e)
            }
        }
    }

    /// Check if the subscription channel has no pending notifications.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscription.as_ref().is_none_or(Subscription::is_empty)
    }

    /// Convert the subscription into a stream.
    #[must_use]
    pub fn into_stream(self) -> RobustSubscriptionStream<N, T> {
        RobustSubscriptionStream::new(self)
    }
}

type RecvOutcome<N, T> = (Result<T, Error>, RobustSubscription<N, T>);

async fn recv_owned<N, T>(mut rx: RobustSubscription<N, T>) -> RecvOutcome<N, T>
where
    N: Network,
    T: DeserializeOwned + fmt::Debug + Send + 'static,
{
    let result = rx.recv().await;
    (result, rx)
}

/// Stream adapter over a [`RobustSubscription`].
///
/// The stream ends after yielding the first error.
pub struct RobustSubscriptionStream<N: Network, T> {
    inner: ReusableBoxFuture<'static, RecvOutcome<N, T>>,
    finished: bool,
}

impl<N, T> RobustSubscriptionStream<N, T>
where
    N: Network,
    T: DeserializeOwned + fmt::Debug + Send + 'static,
{
    /// Create a new `RobustSubscriptionStream`.
    #[must_use]
    pub fn new(rx: RobustSubscription<N, T>) -> Self {
        Self { inner: ReusableBoxFuture::new(recv_owned(rx)), finished: false }
    }

    /// Returns true if the stream has reached a terminal state.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl<N, T> Stream for RobustSubscriptionStream<N, T>
where
    N: Network,
    T: DeserializeOwned + fmt::Debug + Send + 'static,
{
    type Item = Result<T, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        let (result, rx) = ready!(self.inner.poll(cx));

        match result {
            Ok(item) => {
                self.inner.set(recv_owned(rx));
                Poll::Ready(Some(Ok(item)))
            }
            Err(e) => {
                self.finished = true;
                Poll::Ready(Some(Err(e)))
            }
        }
    }
}
