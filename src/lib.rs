//! Log-Broadcaster delivers EVM contract logs to in-process listeners, each at its own
//! confirmation depth.
//!
//! The main entry point is [`LogBroadcaster`], built via [`LogBroadcasterBuilder`] from a
//! [`LogSource`] (usually a [`robust_provider::RobustProvider`]) and a [`ConsumptionLedger`].
//!
//! Register one or more listeners with [`Broadcaster::register`], call [`Broadcaster::start`],
//! and feed new chain heads through [`Broadcaster::on_new_longest_chain`] (or let
//! [`forward_heads`] do it from a block subscription).
//!
//! # Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use alloy::{network::Ethereum, sol};
//! # use async_trait::async_trait;
//! # use log_broadcaster::{
//! #     Broadcast, Broadcaster, InMemoryLedger, JobId, Listener, ListenerOpts,
//! #     LogBroadcasterBuilder, robust_provider::RobustProviderBuilder,
//! # };
//! # use tokio_util::sync::CancellationToken;
//! sol! {
//!     event Transfer(address indexed from, address indexed to, uint256 value);
//! }
//!
//! struct TransferJob;
//!
//! #[async_trait]
//! impl Listener for TransferJob {
//!     async fn handle_log(&self, broadcast: Broadcast) {
//!         if let Some(transfer) = broadcast.decoded_log::<Transfer>() {
//!             println!("{} -> {}: {}", transfer.from, transfer.to, transfer.value);
//!         }
//!     }
//!
//!     fn job_id(&self) -> JobId {
//!         1
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! # let token = alloy::primitives::address!("0xd8dA6BF26964af9d7eed9e03e53415d37aa96045");
//! let provider = RobustProviderBuilder::<Ethereum>::connect("ws://localhost:8545").await?.build();
//! let broadcaster = LogBroadcasterBuilder::new()
//!     .build(provider.clone(), Arc::new(InMemoryLedger::new()))?;
//!
//! let opts = ListenerOpts::for_event::<Transfer>(token).num_confirmations(12);
//! let _registration = broadcaster.register(Arc::new(TransferJob), opts)?;
//! broadcaster.start()?;
//!
//! let cancel = CancellationToken::new();
//! log_broadcaster::forward_heads(&provider, &broadcaster, &cancel).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Delivery guarantees
//!
//! A log is handed to a listener only once the head is at least `num_confirmations` blocks past
//! the log's block. Logs flagged `removed` by the node are purged before they are delivered.
//!
//! Delivery is at-least-once: resubscribes, replays and restarts may hand the same log to a
//! listener again. Listeners that need effectively-once processing check
//! [`Broadcaster::was_already_consumed`] and call [`Broadcaster::mark_consumed`] in the same
//! ledger scope as their own writes.
//!
//! # Ordering
//!
//! Logs are delivered in chain order per dispatch pass. There is no ordering guarantee between a
//! backfill and the live subscription that replaces it.

#[macro_use]
mod logging;

pub mod robust_provider;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

mod broadcast;
mod broadcaster;
mod dependents;
mod error;
mod head_feed;
mod ledger;
mod listener;
mod log_pool;
mod mailbox;
mod registrations;
mod source;
mod subscriber;
mod types;

pub use broadcast::{Broadcast, DecodedLog};
pub use broadcaster::{
    Broadcaster, DEFAULT_BLOCK_BACKFILL_DEPTH, DEFAULT_FINALITY_DEPTH,
    DEFAULT_LOG_BACKFILL_BATCH_SIZE, DEFAULT_LOG_BUFFER_CAPACITY, DEFAULT_RESUBSCRIBE_DEBOUNCE,
    DEFAULT_SUBSCRIBE_RETRY_MAX_DELAY, DEFAULT_SUBSCRIBE_RETRY_MIN_DELAY, LogBroadcaster,
    LogBroadcasterBuilder, NullBroadcaster, Unsubscribe, backfill_start,
};
pub use error::{BroadcasterError, DecodeError, LedgerError};
pub use head_feed::forward_heads;
pub use ledger::{ConsumptionLedger, InMemoryLedger};
pub use listener::{Listener, ListenerOpts, LogDecoder, SolEventDecoder};
pub use mailbox::MailboxCapacity;
pub use source::{LogSource, LogStream};
pub use types::{ConsumptionKey, Head, JobId};
