use std::{any::Any, fmt, sync::Arc};

use alloy::{
    primitives::{Address, BlockHash, BlockNumber},
    rpc::types::Log,
};

use crate::types::{ConsumptionKey, Head, JobId};

/// A log decoded by a registration's [`LogDecoder`](crate::LogDecoder).
pub type DecodedLog = Arc<dyn Any + Send + Sync>;

/// One delivery of one log to one listener.
///
/// Carries the raw log, the listener's decoded view of it, and the head that made the log ready
/// for dispatch.
#[derive(Clone)]
pub struct Broadcast {
    raw_log: Log,
    decoded_log: Option<DecodedLog>,
    latest_block_number: BlockNumber,
    latest_block_hash: BlockHash,
    job_id: JobId,
}

impl Broadcast {
    /// Create a broadcast of `raw_log` for `job_id` at `latest_head`, without a decoded log.
    #[must_use]
    pub fn new(raw_log: Log, latest_head: &Head, job_id: JobId) -> Self {
        Self {
            raw_log,
            decoded_log: None,
            latest_block_number: latest_head.number,
            latest_block_hash: latest_head.hash,
            job_id,
        }
    }

    /// Attach the decoded form of the log.
    #[must_use]
    pub fn with_decoded_log(mut self, decoded: DecodedLog) -> Self {
        self.decoded_log = Some(decoded);
        self
    }

    #[must_use]
    pub fn raw_log(&self) -> &Log {
        &self.raw_log
    }

    /// The decoded log, if one was attached and it is a `T`.
    ///
    /// With [`SolEventDecoder<E>`](crate::SolEventDecoder), `T` is `E`.
    #[must_use]
    pub fn decoded_log<T: Any>(&self) -> Option<&T> {
        self.decoded_log.as_deref()?.downcast_ref::<T>()
    }

    #[must_use]
    pub fn latest_block_number(&self) -> BlockNumber {
        self.latest_block_number
    }

    #[must_use]
    pub fn latest_block_hash(&self) -> BlockHash {
        self.latest_block_hash
    }

    #[must_use]
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    #[must_use]
    pub fn contract(&self) -> Address {
        self.raw_log.address()
    }

    /// Block the log was mined in (0 for logs without one).
    #[must_use]
    pub fn block_number(&self) -> BlockNumber {
        self.raw_log.block_number.unwrap_or_default()
    }

    /// Confirmations the log had when it was dispatched.
    #[must_use]
    pub fn confirmations(&self) -> u64 {
        self.latest_block_number.saturating_sub(self.block_number())
    }

    /// The ledger key marking this log as consumed by this job.
    #[must_use]
    pub fn consumption_key(&self) -> ConsumptionKey {
        ConsumptionKey::new(
            self.raw_log.block_hash.unwrap_or_default(),
            self.raw_log.log_index.unwrap_or_default(),
            self.job_id,
        )
    }
}

impl fmt::Debug for Broadcast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broadcast")
            .field("raw_log", &self.raw_log)
            .field("decoded", &self.decoded_log.is_some())
            .field("latest_block_number", &self.latest_block_number)
            .field("latest_block_hash", &self.latest_block_hash)
            .field("job_id", &self.job_id)
            .finish()
    }
}

impl fmt::Display for Broadcast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let topics = self.raw_log.topics();
        write!(
            f,
            "Broadcast(job: {}, address: {}, block: {}, index: {}, topics({}):",
            self.job_id,
            self.contract(),
            self.block_number(),
            self.raw_log.log_index.unwrap_or_default(),
            topics.len(),
        )?;
        for topic in topics {
            write!(f, " {topic}")?;
        }
        f.write_str(")")
    }
}
