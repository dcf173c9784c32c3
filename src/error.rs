use std::{error::Error as StdError, sync::Arc};

use alloy::primitives::Address;
use thiserror::Error;

use crate::robust_provider::Error as RobustProviderError;

/// Errors returned by the broadcaster API.
#[derive(Error, Debug, Clone)]
pub enum BroadcasterError {
    /// A listener was registered without any topic filter.
    ///
    /// This is a caller bug: a registration that matches no topic can never receive a log.
    #[error("listener registration for contract {0} declares no topic filters")]
    MissingTopicFilters(Address),

    /// The broadcaster has been closed and cannot be (re)started.
    #[error("broadcaster is closed")]
    Closed,

    /// The broadcaster has no chain connection (see [`NullBroadcaster`](crate::NullBroadcaster)).
    #[error("broadcaster is not connected to a chain")]
    NotConnected,

    /// The consumption ledger failed to read or persist a marker.
    #[error("consumption ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// The node RPC failed.
    #[error(transparent)]
    Provider(#[from] RobustProviderError),

    /// The configured log backfill batch size is invalid (must be greater than zero).
    #[error("Log backfill batch size must be greater than 0")]
    InvalidBackfillBatchSize,

    /// The configured resubscribe debounce interval is invalid (must be non-zero).
    #[error("Resubscribe debounce interval must be greater than 0")]
    InvalidDebounceInterval,

    /// The configured log buffer capacity is invalid (must be greater than zero).
    #[error("Log buffer capacity must be greater than 0")]
    InvalidBufferCapacity,
}

/// Failure reported by a [`ConsumptionLedger`](crate::ConsumptionLedger) backend.
#[derive(Error, Debug, Clone)]
#[error("{context}: {source}")]
pub struct LedgerError {
    context: &'static str,
    #[source]
    source: Arc<dyn StdError + Send + Sync>,
}

impl LedgerError {
    /// Wrap a backend error, naming the operation that failed.
    pub fn new(context: &'static str, source: impl StdError + Send + Sync + 'static) -> Self {
        Self { context, source: Arc::new(source) }
    }

    /// The operation that failed.
    #[must_use]
    pub fn context(&self) -> &'static str {
        self.context
    }
}

/// A registration's decoder rejected a log.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// ABI decoding failed.
    #[error("ABI decoding failed: {0}")]
    Abi(#[from] alloy::sol_types::Error),

    /// A custom decoder rejected the log.
    #[error("{0}")]
    Custom(String),
}
