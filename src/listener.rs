use std::{collections::HashMap, fmt, marker::PhantomData, sync::Arc};

use alloy::{
    primitives::{Address, B256},
    rpc::types::Log,
    sol_types::SolEvent,
};
use async_trait::async_trait;

use crate::{
    broadcast::{Broadcast, DecodedLog},
    error::DecodeError,
    types::JobId,
};

/// An in-process consumer of log broadcasts.
///
/// `handle_log` runs on the broadcaster's event loop: while it is awaited no other log is
/// dispatched and no new head is processed. Listeners that do heavy work should hand the
/// broadcast off to their own task.
#[async_trait]
pub trait Listener: Send + Sync {
    /// Handle one log. Implementations are expected to check
    /// [`was_already_consumed`](crate::Broadcaster::was_already_consumed) and call
    /// [`mark_consumed`](crate::Broadcaster::mark_consumed) in the same scope as their own side
    /// effects.
    async fn handle_log(&self, broadcast: Broadcast);

    fn job_id(&self) -> JobId;
}

/// Turns a raw log into the listener's own representation.
pub trait LogDecoder: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the log cannot be decoded.
    fn decode(&self, log: &Log) -> Result<DecodedLog, DecodeError>;
}

impl<F> LogDecoder for F
where
    F: Fn(&Log) -> Result<DecodedLog, DecodeError> + Send + Sync,
{
    fn decode(&self, log: &Log) -> Result<DecodedLog, DecodeError> {
        self(log)
    }
}

/// Decodes logs as the `sol!` event `E`.
pub struct SolEventDecoder<E>(PhantomData<fn() -> E>);

impl<E> SolEventDecoder<E> {
    #[must_use]
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<E> Default for SolEventDecoder<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for SolEventDecoder<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SolEventDecoder").field(&std::any::type_name::<E>()).finish()
    }
}

impl<E: SolEvent + Send + Sync + 'static> LogDecoder for SolEventDecoder<E> {
    fn decode(&self, log: &Log) -> Result<DecodedLog, DecodeError> {
        let event = E::decode_log_data(log.data())?;
        Ok(Arc::new(event))
    }
}

/// What a listener subscribes to.
///
/// `logs_with_topics` maps an event signature (topic 0) to per-position value filters for the
/// indexed topics that follow it: entry `i` lists the accepted values for topic `i + 1`, and an
/// empty entry accepts any value.
#[derive(Clone)]
pub struct ListenerOpts {
    pub contract: Address,
    pub logs_with_topics: HashMap<B256, Vec<Vec<B256>>>,
    pub num_confirmations: u64,
    pub decoder: Arc<dyn LogDecoder>,
}

impl ListenerOpts {
    /// Subscribe to nothing yet on `contract`, decoding with `decoder`.
    #[must_use]
    pub fn new(contract: Address, decoder: impl LogDecoder + 'static) -> Self {
        Self {
            contract,
            logs_with_topics: HashMap::new(),
            num_confirmations: 0,
            decoder: Arc::new(decoder),
        }
    }

    /// Subscribe to every `E` emitted by `contract`, decoding it as `E`.
    #[must_use]
    pub fn for_event<E: SolEvent + Send + Sync + 'static>(contract: Address) -> Self {
        Self::new(contract, SolEventDecoder::<E>::new()).topic(E::SIGNATURE_HASH, vec![])
    }

    /// Accept logs whose topic 0 is `signature` and whose indexed topics pass `value_filters`.
    #[must_use]
    pub fn topic(mut self, signature: B256, value_filters: Vec<Vec<B256>>) -> Self {
        self.logs_with_topics.insert(signature, value_filters);
        self
    }

    /// Require `num_confirmations` blocks on top of a log's block before it is dispatched.
    #[must_use]
    pub fn num_confirmations(mut self, num_confirmations: u64) -> Self {
        self.num_confirmations = num_confirmations;
        self
    }

    /// Whether `topics` (topic 0 first) passes this registration's filter.
    pub(crate) fn matches_topics(&self, topics: &[B256]) -> bool {
        let Some((signature, indexed)) = topics.split_first() else {
            return false;
        };
        let Some(value_filters) = self.logs_with_topics.get(signature) else {
            return false;
        };

        value_filters.iter().enumerate().all(|(position, accepted)| {
            accepted.is_empty() || indexed.get(position).is_some_and(|topic| accepted.contains(topic))
        })
    }
}

impl fmt::Debug for ListenerOpts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerOpts")
            .field("contract", &self.contract)
            .field("logs_with_topics", &self.logs_with_topics)
            .field("num_confirmations", &self.num_confirmations)
            .finish_non_exhaustive()
    }
}
