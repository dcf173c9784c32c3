use std::{fmt::Debug, sync::Arc, time::Duration};

use alloy::{
    network::{Ethereum, Network},
    providers::{Provider, RootProvider},
    rpc::types::{Filter, Log},
    transports::{RpcError, TransportErrorKind},
};
use backon::{ExponentialBuilder, Retryable};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use tokio::time::timeout;

use crate::robust_provider::{Error, RobustSubscription, subscription::SubscribeFn};

/// Provider wrapper with built-in retry, timeout and failover.
///
/// Every call is retried with exponential backoff against the primary provider, bounded by a total
/// call timeout. If the primary keeps failing the same call is attempted on each fallback, in the
/// order they were added to the [`RobustProviderBuilder`](super::RobustProviderBuilder).
#[derive(Clone, Debug)]
pub struct RobustProvider<N: Network = Ethereum> {
    pub(crate) primary_provider: RootProvider<N>,
    pub(crate) fallback_providers: Vec<RootProvider<N>>,
    pub(crate) call_timeout: Duration,
    pub(crate) subscription_timeout: Duration,
    pub(crate) max_retries: usize,
    pub(crate) min_delay: Duration,
    pub(crate) reconnect_interval: Duration,
}

impl<N: Network> RobustProvider<N> {
    /// Get a reference to the primary provider
    #[must_use]
    pub fn primary(&self) -> &RootProvider<N> {
        &self.primary_provider
    }

    /// Fetch the latest block number.
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn get_block_number(&self) -> Result<u64, Error> {
        trace!("eth_blockNumber called");
        let result = self
            .try_operation_with_failover(
                move |provider| async move { provider.get_block_number().await },
                false,
            )
            .await;
        if let Err(e) = &result {
            error!(error = %e, "eth_blockNumber failed");
        }
        result
    }

    /// Fetch logs for the given [`Filter`].
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, Error> {
        trace!(
            from_block = ?filter.get_from_block(),
            to_block = ?filter.get_to_block(),
            "eth_getLogs called"
        );
        let result = self
            .try_operation_with_failover(
                move |provider| async move { provider.get_logs(filter).await },
                false,
            )
            .await;
        if let Err(e) = &result {
            error!(error = %e, "eth_getLogs failed");
        }
        result
    }

    /// Subscribe to new block headers.
    ///
    /// The returned [`RobustSubscription`] switches to fallbacks when the current provider stops
    /// producing headers and periodically tries to move back to the primary.
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn subscribe_blocks(&self) -> Result<RobustSubscription<N, N::HeaderResponse>, Error> {
        let subscribe: SubscribeFn<N, N::HeaderResponse> =
            Arc::new(|provider: RootProvider<N>| {
                async move { provider.subscribe_blocks().await }.boxed()
            });
        self.subscribe_with(subscribe).await
    }

    /// Subscribe to logs matching `filter`.
    ///
    /// Reconnections (to a fallback or back to the primary) reuse the same filter. Logs emitted
    /// while switching providers are not replayed; callers that need gap-free delivery backfill
    /// with [`get_logs`](Self::get_logs).
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn subscribe_logs(&self, filter: &Filter) -> Result<RobustSubscription<N, Log>, Error> {
        let filter = filter.clone();
        let subscribe: SubscribeFn<N, Log> = Arc::new(move |provider: RootProvider<N>| {
            let filter = filter.clone();
            async move { provider.subscribe_logs(&filter).await }.boxed()
        });
        self.subscribe_with(subscribe).await
    }

    async fn subscribe_with<T>(
        &self,
        subscribe: SubscribeFn<N, T>,
    ) -> Result<RobustSubscription<N, T>, Error>
    where
        T: DeserializeOwned + Debug + Send + 'static,
    {
        debug!("eth_subscribe called");
        let operation = Arc::clone(&subscribe);
        let subscription = self.try_operation_with_failover(&*operation, true).await;

        match subscription {
            Ok(sub) => Ok(RobustSubscription::new(sub, subscribe, self.clone())),
            Err(e) => {
                error!(error = %e, "eth_subscribe failed");
                Err(e)
            }
        }
    }

    /// Execute `operation` with exponential backoff and a total timeout.
    ///
    /// If the primary provider fails (including by timing out) each fallback is tried in turn.
    /// With `require_pubsub`, fallbacks without a pubsub frontend are skipped.
    ///
    /// # Errors
    /// <a name="retry-errors"></a>
    ///
    /// * [`Error::Timeout`] if the last provider tried exceeded the call timeout.
    /// * [`Error::RpcError`] carrying the last provider's error otherwise, including
    ///   `PubsubUnavailable` when no provider supports subscriptions.
    pub(crate) async fn try_operation_with_failover<T: Debug, F, Fut>(
        &self,
        operation: F,
        require_pubsub: bool,
    ) -> Result<T, Error>
    where
        F: Fn(RootProvider<N>) -> Fut,
        Fut: Future<Output = Result<T, RpcError<TransportErrorKind>>>,
    {
        let last_error = if require_pubsub && !Self::supports_pubsub(self.primary()) {
            Error::from(TransportErrorKind::PubsubUnavailable)
        } else {
            match self.try_provider_with_timeout(self.primary(), &operation).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            }
        };

        self.try_fallback_providers_from(&operation, require_pubsub, last_error, 0)
            .await
            .map(|(value, _)| value)
    }

    pub(crate) async fn try_fallback_providers_from<T: Debug, F, Fut>(
        &self,
        operation: F,
        require_pubsub: bool,
        mut last_error: Error,
        start_index: usize,
    ) -> Result<(T, usize), Error>
    where
        F: Fn(RootProvider<N>) -> Fut,
        Fut: Future<Output = Result<T, RpcError<TransportErrorKind>>>,
    {
        let num_fallbacks = self.fallback_providers.len();
        if num_fallbacks > 0 && start_index == 0 {
            info!(error = %last_error, "Primary provider failed, trying fallback provider(s)");
        }

        for (idx, provider) in self.fallback_providers.iter().enumerate().skip(start_index) {
            if require_pubsub && !Self::supports_pubsub(provider) {
                debug!(provider_num = idx + 1, "Fallback provider lacks pubsub, skipping");
                continue;
            }

            match self.try_provider_with_timeout(provider, &operation).await {
                Ok(value) => {
                    info!(provider_num = idx + 1, "Fallback provider succeeded");
                    return Ok((value, idx));
                }
                Err(e) => {
                    warn!(provider_num = idx + 1, error = %e, "Fallback provider failed");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    /// Run `operation` against one provider with retries, bounded by the call timeout.
    pub(crate) async fn try_provider_with_timeout<T, F, Fut>(
        &self,
        provider: &RootProvider<N>,
        operation: F,
    ) -> Result<T, Error>
    where
        F: Fn(RootProvider<N>) -> Fut,
        Fut: Future<Output = Result<T, RpcError<TransportErrorKind>>>,
    {
        let retry_strategy = ExponentialBuilder::default()
            .with_max_times(self.max_retries)
            .with_min_delay(self.min_delay);

        timeout(
            self.call_timeout,
            (|| operation(provider.clone()))
                .retry(retry_strategy)
                .notify(|err: &RpcError<TransportErrorKind>, dur: Duration| {
                    debug!(error = %err, retry_in_ms = dur.as_millis(), "RPC call failed, retrying");
                })
                .sleep(tokio::time::sleep),
        )
        .await?
        .map_err(Error::from)
    }

    fn supports_pubsub(provider: &RootProvider<N>) -> bool {
        provider.client().pubsub_frontend().is_some()
    }
}
