use std::time::Duration;

use alloy::{network::Network, providers::RootProvider};

use crate::robust_provider::{
    Error, IntoRootProvider, RobustProvider, subscription::DEFAULT_RECONNECT_INTERVAL,
};

// RPC retry and timeout settings
/// Default timeout used by `RobustProvider`
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);
/// Default time a subscription may stay silent before switching providers
pub const DEFAULT_SUBSCRIPTION_TIMEOUT: Duration = Duration::from_secs(120);
/// Default maximum number of retry attempts.
pub const DEFAULT_MAX_RETRIES: usize = 3;
/// Default base delay between retries.
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_secs(1);

/// Builder for constructing a [`RobustProvider`].
///
/// Use this to configure timeouts, retry/backoff, and one or more fallback providers.
#[derive(Debug)]
pub struct RobustProviderBuilder<N: Network> {
    primary_provider: RootProvider<N>,
    fallback_providers: Vec<RootProvider<N>>,
    call_timeout: Duration,
    subscription_timeout: Duration,
    max_retries: usize,
    min_delay: Duration,
    reconnect_interval: Duration,
}

impl<N: Network> RobustProviderBuilder<N> {
    /// Create a builder around `provider` with default settings.
    #[must_use]
    pub fn new(provider: impl IntoRootProvider<N>) -> Self {
        Self {
            primary_provider: provider.into_root_provider(),
            fallback_providers: vec![],
            call_timeout: DEFAULT_CALL_TIMEOUT,
            subscription_timeout: DEFAULT_SUBSCRIPTION_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            min_delay: DEFAULT_MIN_DELAY,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
        }
    }

    /// Connect to `url` (HTTP, WS or IPC) and use it as the primary provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub async fn connect(url: &str) -> Result<Self, Error> {
        let provider = RootProvider::<N>::connect(url).await?;
        Ok(Self::new(provider))
    }

    /// Create a builder that never retries; only the call timeout applies.
    #[must_use]
    pub fn fragile(provider: impl IntoRootProvider<N>) -> Self {
        Self::new(provider).max_retries(0).min_delay(Duration::ZERO)
    }

    /// Add a fallback provider.
    ///
    /// Fallbacks are tried in insertion order when the primary provider fails.
    #[must_use]
    pub fn fallback(mut self, provider: impl IntoRootProvider<N>) -> Self {
        self.fallback_providers.push(provider.into_root_provider());
        self
    }

    /// Set the total timeout for a single RPC call, retries included.
    #[must_use]
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set how long a subscription may stay silent before the provider is considered dead.
    ///
    /// Log subscriptions on quiet contracts can legitimately stay silent for a long time, so keep
    /// this well above the chain's block time. Default is [`DEFAULT_SUBSCRIPTION_TIMEOUT`].
    #[must_use]
    pub fn subscription_timeout(mut self, timeout: Duration) -> Self {
        self.subscription_timeout = timeout;
        self
    }

    /// Set the maximum number of retry attempts.
    #[must_use]
    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the base delay for exponential backoff retries.
    #[must_use]
    pub fn min_delay(mut self, min_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self
    }

    /// Set the interval between attempts to move a subscription back to the primary provider.
    #[must_use]
    pub fn reconnect_interval(mut self, reconnect_interval: Duration) -> Self {
        self.reconnect_interval = reconnect_interval;
        self
    }

    /// Build the [`RobustProvider`].
    #[must_use]
    pub fn build(self) -> RobustProvider<N> {
        debug!(
            call_timeout_ms = self.call_timeout.as_millis(),
            subscription_timeout_ms = self.subscription_timeout.as_millis(),
            max_retries = self.max_retries,
            fallback_count = self.fallback_providers.len(),
            "Building RobustProvider"
        );

        RobustProvider {
            primary_provider: self.primary_provider,
            fallback_providers: self.fallback_providers,
            call_timeout: self.call_timeout,
            subscription_timeout: self.subscription_timeout,
            max_retries: self.max_retries,
            min_delay: self.min_delay,
            reconnect_interval: self.reconnect_interval,
        }
    }
}
