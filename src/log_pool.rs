use std::collections::{BTreeMap, HashMap};

use alloy::{
    primitives::{BlockHash, BlockNumber},
    rpc::types::Log,
};

use crate::types::LogPosition;

/// Logs waiting for enough confirmations, keyed by block number.
///
/// Within a block a log is identified by `(block hash, log index)`, so a backfilled and a live
/// copy of the same log are stored once, while copies mined in competing blocks at the same
/// height are kept apart until the reorg resolves.
#[derive(Debug, Default)]
pub(crate) struct LogPool {
    blocks: BTreeMap<BlockNumber, HashMap<(BlockHash, u64), Log>>,
}

impl LogPool {
    /// Buffer `log`. Returns false if it has no on-chain position.
    pub(crate) fn add_log(&mut self, log: Log) -> bool {
        let Some(position) = LogPosition::of(&log) else {
            return false;
        };
        self.blocks
            .entry(position.block_number)
            .or_default()
            .insert((position.block_hash, position.log_index), log);
        true
    }

    /// Drop the pooled copy of `log`, if any.
    pub(crate) fn remove_log(&mut self, log: &Log) {
        let Some(position) = LogPosition::of(log) else {
            return;
        };
        if let Some(block) = self.blocks.get_mut(&position.block_number) {
            block.remove(&(position.block_hash, position.log_index));
            if block.is_empty() {
                self.blocks.remove(&position.block_number);
            }
        }
    }

    /// Empty the pool, returning its logs with the lowest and highest block numbers.
    pub(crate) fn get_and_delete_all(&mut self) -> Option<(Vec<Log>, BlockNumber, BlockNumber)> {
        let lowest = *self.blocks.first_key_value()?.0;
        let highest = *self.blocks.last_key_value()?.0;
        let blocks = std::mem::take(&mut self.blocks);
        Some((blocks.into_values().flat_map(sorted_by_index).collect(), lowest, highest))
    }

    /// Logs mined at or below `latest`, in chain order, with the lowest block number among them.
    pub(crate) fn get_logs_to_send(&self, latest: BlockNumber) -> Option<(Vec<Log>, BlockNumber)> {
        let lowest = *self.blocks.range(..=latest).next()?.0;
        let logs = self
            .blocks
            .range(..=latest)
            .flat_map(|(_, block)| sorted_by_index(block.clone()))
            .collect();
        Some((logs, lowest))
    }

    /// Drop every log mined strictly below `threshold`.
    pub(crate) fn delete_older_logs(&mut self, threshold: BlockNumber) {
        self.blocks = self.blocks.split_off(&threshold);
    }

    pub(crate) fn len(&self) -> usize {
        self.blocks.values().map(HashMap::len).sum()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

fn sorted_by_index(block: HashMap<(BlockHash, u64), Log>) -> Vec<Log> {
    let mut logs: Vec<_> = block.into_iter().collect();
    logs.sort_unstable_by_key(|((hash, index), _)| (*index, *hash));
    logs.into_iter().map(|(_, log)| log).collect()
}
