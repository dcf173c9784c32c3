use std::sync::Arc;

use alloy::transports::{RpcError, TransportErrorKind};
use thiserror::Error;
use tokio::time::error::Elapsed;

/// Errors returned by [`RobustProvider`](super::RobustProvider) calls and subscriptions.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// The total call timeout elapsed on every provider that was tried.
    #[error("Operation timed out")]
    Timeout,

    /// The underlying RPC transport returned an error.
    #[error("RPC error: {0}")]
    RpcError(Arc<RpcError<TransportErrorKind>>),

    /// A subscription stream ended without reporting an error.
    #[error("Subscription closed")]
    SubscriptionClosed,
}

impl From<RpcError<TransportErrorKind>> for Error {
    fn from(err: RpcError<TransportErrorKind>) -> Self {
        Error::RpcError(Arc::new(err))
    }
}

impl From<TransportErrorKind> for Error {
    fn from(kind: TransportErrorKind) -> Self {
        Error::RpcError(Arc::new(RpcError::Transport(kind)))
    }
}

impl From<Elapsed> for Error {
    fn from(_: Elapsed) -> Self {
        Error::Timeout
    }
}
