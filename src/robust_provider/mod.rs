//! Retrying, failing-over wrapper around Alloy providers.
//!
//! [`RobustProvider`] wraps a primary [`RootProvider`](alloy::providers::RootProvider) and any
//! number of fallbacks. Every call is bounded by a total timeout and retried with exponential
//! backoff; when the primary keeps failing, the call moves on to the fallbacks in order.
//! Subscriptions ([`RobustSubscription`]) additionally fail over when the current provider goes
//! quiet, closes the channel or lags, and periodically try to return to the primary.
//!
//! `RobustProvider` is the production [`LogSource`](crate::LogSource) for the
//! [`LogBroadcaster`](crate::LogBroadcaster).
//!
//! ```rust,no_run
//! use alloy::network::Ethereum;
//! use log_broadcaster::robust_provider::RobustProviderBuilder;
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let robust = RobustProviderBuilder::<Ethereum>::connect("ws://localhost:8545")
//!     .await?
//!     .call_timeout(Duration::from_secs(30))
//!     .subscription_timeout(Duration::from_secs(600))
//!     .build();
//!
//! let latest = robust.get_block_number().await?;
//! println!("latest block: {latest}");
//! # Ok(()) }
//! ```

mod builder;
mod error;
mod provider;
mod provider_conversion;
mod subscription;

pub use builder::{
    DEFAULT_CALL_TIMEOUT, DEFAULT_MAX_RETRIES, DEFAULT_MIN_DELAY, DEFAULT_SUBSCRIPTION_TIMEOUT,
    RobustProviderBuilder,
};
pub use error::Error;
pub use provider::RobustProvider;
pub use provider_conversion::{IntoRobustProvider, IntoRootProvider};
pub use subscription::{DEFAULT_RECONNECT_INTERVAL, RobustSubscription, RobustSubscriptionStream};
