use std::{
    collections::HashSet,
    io,
    sync::atomic::{AtomicUsize, Ordering},
};

use alloy::primitives::BlockNumber;

use crate::{
    error::LedgerError,
    ledger::{ConsumptionLedger, InMemoryLedger},
    types::ConsumptionKey,
};

/// An [`InMemoryLedger`] whose range reads can be made to fail.
///
/// Lookups and writes of single markers always succeed, so listeners behave as usual while the
/// broadcaster's `find_consumed` pass is broken.
#[derive(Debug, Default)]
pub struct FlakyLedger {
    inner: InMemoryLedger,
    failing_reads: AtomicUsize,
    failed_reads: AtomicUsize,
}

impl FlakyLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` calls to `find_consumed`.
    pub fn fail_next_reads(&self, count: usize) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    /// Number of `find_consumed` calls that failed so far.
    #[must_use]
    pub fn failed_reads(&self) -> usize {
        self.failed_reads.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        let failing = self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            self.failed_reads.fetch_add(1, Ordering::SeqCst);
        }
        failing
    }
}

impl ConsumptionLedger for FlakyLedger {
    type Scope = ();

    async fn was_consumed(
        &self,
        scope: Option<&mut ()>,
        key: &ConsumptionKey,
    ) -> Result<bool, LedgerError> {
        self.inner.was_consumed(scope, key).await
    }

    async fn mark_consumed(
        &self,
        scope: Option<&mut ()>,
        key: &ConsumptionKey,
        block_number: BlockNumber,
    ) -> Result<(), LedgerError> {
        self.inner.mark_consumed(scope, key, block_number).await
    }

    async fn find_consumed(
        &self,
        from_block: BlockNumber,
        to_block: BlockNumber,
    ) -> Result<HashSet<ConsumptionKey>, LedgerError> {
        if self.take_failure() {
            return Err(LedgerError::new(
                "find_consumed",
                io::Error::new(io::ErrorKind::ConnectionReset, "ledger unavailable"),
            ));
        }
        self.inner.find_consumed(from_block, to_block).await
    }
}
