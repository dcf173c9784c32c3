//! Helpers for testing code built on the broadcaster. Enabled by the `test-utils` feature.

mod flaky_ledger;
pub mod macros;
mod mock_source;
mod recording_listener;

use alloy::{
    primitives::{Address, B256, BlockHash, Bytes, LogData, keccak256},
    rpc::types::Log,
};

pub use flaky_ledger::FlakyLedger;
pub use mock_source::MockLogSource;
pub use recording_listener::RecordingListener;

use crate::types::Head;

/// Deterministic hash of the canonical block at `number`.
#[must_use]
pub fn block_hash(number: u64) -> BlockHash {
    keccak256(number.to_be_bytes())
}

/// A mined log at (`block`, `index`) on the canonical chain described by [`block_hash`].
#[must_use]
pub fn make_log(address: Address, topics: Vec<B256>, block: u64, index: u64) -> Log {
    Log {
        inner: alloy::primitives::Log {
            address,
            data: LogData::new_unchecked(topics, Bytes::new()),
        },
        block_hash: Some(block_hash(block)),
        block_number: Some(block),
        block_timestamp: None,
        transaction_hash: Some(keccak256([block.to_be_bytes(), index.to_be_bytes()].concat())),
        transaction_index: Some(0),
        log_index: Some(index),
        removed: false,
    }
}

/// The `removed` copy the node sends when `log`'s block is reorged out.
#[must_use]
pub fn removed(mut log: Log) -> Log {
    log.removed = true;
    log
}

/// The canonical head at `number`.
#[must_use]
pub fn make_head(number: u64) -> Head {
    Head::new(number, block_hash(number), block_hash(number.saturating_sub(1)))
}
