use std::fmt;

use alloy::{
    network::primitives::HeaderResponse,
    primitives::{BlockHash, BlockNumber},
    rpc::types::Log,
};

/// Identifier of the job a listener belongs to.
pub type JobId = i32;

/// Position of the canonical chain tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Head {
    pub number: BlockNumber,
    pub hash: BlockHash,
    pub parent_hash: BlockHash,
}

impl Head {
    #[must_use]
    pub const fn new(number: BlockNumber, hash: BlockHash, parent_hash: BlockHash) -> Self {
        Self { number, hash, parent_hash }
    }

    /// Build a head from an RPC block header.
    #[must_use]
    pub fn from_header<H: HeaderResponse>(header: &H) -> Self {
        Self { number: header.number(), hash: header.hash(), parent_hash: header.parent_hash() }
    }
}

impl fmt::Display for Head {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({})", self.number, self.hash)
    }
}

/// Key of a persisted consumption marker.
///
/// A log is identified by the hash of the block that contains it rather than its number, so a
/// log re-included in a different block after a reorg is a different key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumptionKey {
    pub block_hash: BlockHash,
    pub log_index: u64,
    pub job_id: JobId,
}

impl ConsumptionKey {
    #[must_use]
    pub const fn new(block_hash: BlockHash, log_index: u64, job_id: JobId) -> Self {
        Self { block_hash, log_index, job_id }
    }
}

/// Where a mined log sits on chain.
///
/// Pending logs carry no position and are never pooled or dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LogPosition {
    pub(crate) block_number: BlockNumber,
    pub(crate) block_hash: BlockHash,
    pub(crate) log_index: u64,
}

impl LogPosition {
    pub(crate) fn of(log: &Log) -> Option<Self> {
        Some(Self {
            block_number: log.block_number?,
            block_hash: log.block_hash?,
            log_index: log.log_index?,
        })
    }
}
