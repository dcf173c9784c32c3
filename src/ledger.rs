use std::{
    collections::{BTreeMap, HashSet},
    sync::{Mutex, PoisonError},
};

use alloy::primitives::BlockNumber;

use crate::{error::LedgerError, types::ConsumptionKey};

/// Durable record of which logs each job has consumed.
///
/// `Scope` is the backend's unit of atomicity, typically a database transaction. Consumers pass
/// their own scope so the consumed marker commits or rolls back together with their side effects.
/// `None` asks the ledger to run the operation in a scope of its own, which the broadcaster uses
/// to retire logs that no listener can decode.
pub trait ConsumptionLedger: Send + Sync + 'static {
    type Scope: Send;

    /// Whether `key` has been marked consumed.
    fn was_consumed(
        &self,
        scope: Option<&mut Self::Scope>,
        key: &ConsumptionKey,
    ) -> impl Future<Output = Result<bool, LedgerError>> + Send;

    /// Mark `key`, a log mined in `block_number`, as consumed.
    fn mark_consumed(
        &self,
        scope: Option<&mut Self::Scope>,
        key: &ConsumptionKey,
        block_number: BlockNumber,
    ) -> impl Future<Output = Result<(), LedgerError>> + Send;

    /// Every marker for logs mined in `from_block..=to_block`.
    fn find_consumed(
        &self,
        from_block: BlockNumber,
        to_block: BlockNumber,
    ) -> impl Future<Output = Result<HashSet<ConsumptionKey>, LedgerError>> + Send;
}

/// A [`ConsumptionLedger`] kept in process memory.
///
/// Markers do not survive restarts. Suitable for tests and for deployments where redelivery after
/// a restart is acceptable.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    markers: Mutex<BTreeMap<BlockNumber, HashSet<ConsumptionKey>>>,
}

impl InMemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of markers stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.markers.lock().unwrap_or_else(PoisonError::into_inner).values().map(HashSet::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ConsumptionLedger for InMemoryLedger {
    type Scope = ();

    async fn was_consumed(
        &self,
        _scope: Option<&mut ()>,
        key: &ConsumptionKey,
    ) -> Result<bool, LedgerError> {
        let markers = self.markers.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(markers.values().any(|keys| keys.contains(key)))
    }

    async fn mark_consumed(
        &self,
        _scope: Option<&mut ()>,
        key: &ConsumptionKey,
        block_number: BlockNumber,
    ) -> Result<(), LedgerError> {
        self.markers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(block_number)
            .or_default()
            .insert(*key);
        Ok(())
    }

    async fn find_consumed(
        &self,
        from_block: BlockNumber,
        to_block: BlockNumber,
    ) -> Result<HashSet<ConsumptionKey>, LedgerError> {
        if from_block > to_block {
            return Ok(HashSet::new());
        }
        let markers = self.markers.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(markers.range(from_block..=to_block).flat_map(|(_, keys)| keys.iter().copied()).collect())
    }
}
