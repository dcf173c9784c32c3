use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
    sync::Arc,
};

use alloy::{
    primitives::{Address, B256, BlockNumber},
    rpc::types::Log,
};
use tokio_util::sync::CancellationToken;

use crate::{
    broadcast::Broadcast,
    ledger::ConsumptionLedger,
    listener::{Listener, ListenerOpts},
    types::{ConsumptionKey, Head, LogPosition},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct RegistrationId(pub(crate) u64);

pub(crate) struct Registration {
    pub(crate) id: RegistrationId,
    pub(crate) listener: Arc<dyn Listener>,
    pub(crate) opts: ListenerOpts,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("job_id", &self.listener.job_id())
            .field("opts", &self.opts)
            .finish()
    }
}

/// A pending change to the registry, applied in delivery order by the event loop.
#[derive(Debug)]
pub(crate) enum RegistrationChange {
    Add(Registration),
    Remove(RegistrationId),
}

/// Live listener registrations and the node-level filter they add up to.
#[derive(Debug, Default)]
pub(crate) struct Registrations {
    subscribers: BTreeMap<RegistrationId, Registration>,
    // (address, topic0) -> number of registrations needing it
    topics: HashMap<Address, HashMap<B256, usize>>,
    // required confirmations -> number of registrations requiring it
    confirmations: BTreeMap<u64, usize>,
}

impl Registrations {
    /// Returns true if the node-level filter must grow to cover the new registration.
    pub(crate) fn add_subscriber(&mut self, registration: Registration) -> bool {
        let mut needs_resubscribe = false;
        let address_topics = self.topics.entry(registration.opts.contract).or_default();
        for signature in registration.opts.logs_with_topics.keys() {
            let count = address_topics.entry(*signature).or_default();
            needs_resubscribe |= *count == 0;
            *count += 1;
        }
        *self.confirmations.entry(registration.opts.num_confirmations).or_default() += 1;

        debug!(
            registration = registration.id.0,
            job_id = registration.listener.job_id(),
            contract = %registration.opts.contract,
            num_confirmations = registration.opts.num_confirmations,
            needs_resubscribe = needs_resubscribe,
            "Listener registered"
        );
        self.subscribers.insert(registration.id, registration);
        needs_resubscribe
    }

    /// Returns true if the node-level filter can shrink after the removal.
    pub(crate) fn remove_subscriber(&mut self, id: RegistrationId) -> bool {
        let Some(registration) = self.subscribers.remove(&id) else {
            return false;
        };

        let mut needs_resubscribe = false;
        let contract = registration.opts.contract;
        if let Some(address_topics) = self.topics.get_mut(&contract) {
            for signature in registration.opts.logs_with_topics.keys() {
                if let Some(count) = address_topics.get_mut(signature) {
                    *count -= 1;
                    if *count == 0 {
                        address_topics.remove(signature);
                        needs_resubscribe = true;
                    }
                }
            }
            if address_topics.is_empty() {
                self.topics.remove(&contract);
            }
        }

        let required = registration.opts.num_confirmations;
        if let Some(count) = self.confirmations.get_mut(&required) {
            *count -= 1;
            if *count == 0 {
                self.confirmations.remove(&required);
            }
        }

        debug!(
            registration = id.0,
            needs_resubscribe = needs_resubscribe,
            "Listener unregistered"
        );
        needs_resubscribe
    }

    /// Sorted, deduplicated addresses and topic-0 values across every registration.
    pub(crate) fn addresses_and_topics(&self) -> (Vec<Address>, Vec<B256>) {
        let mut addresses: Vec<Address> = self.topics.keys().copied().collect();
        addresses.sort_unstable();

        let mut topics: Vec<B256> =
            self.topics.values().flat_map(|topics| topics.keys().copied()).collect();
        topics.sort_unstable();
        topics.dedup();

        (addresses, topics)
    }

    pub(crate) fn is_address_registered(&self, address: &Address) -> bool {
        self.topics.contains_key(address)
    }

    /// The largest confirmation requirement, 0 when nobody needs a delay.
    pub(crate) fn highest_num_confirmations(&self) -> u64 {
        self.confirmations.last_key_value().map_or(0, |(required, _)| *required)
    }

    pub(crate) fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Hand every ready, unconsumed log to the listeners that want it.
    ///
    /// Logs are visited in the order given and, for each log, registrations in the order they
    /// were made. A log that fails to decode for one registration is marked consumed for that
    /// registration's job so it is not retried on every head; other registrations still receive
    /// it. Stops early once `cancel` fires.
    pub(crate) async fn send_logs<C: ConsumptionLedger>(
        &self,
        logs: &[Log],
        latest_head: &Head,
        consumed: &HashSet<ConsumptionKey>,
        ledger: &C,
        cancel: &CancellationToken,
    ) {
        for log in logs {
            let Some(position) = LogPosition::of(log) else {
                continue;
            };

            for registration in self.subscribers.values() {
                if cancel.is_cancelled() {
                    return;
                }

                let opts = &registration.opts;
                if opts.contract != log.address()
                    || !is_confirmed(latest_head.number, position.block_number, opts.num_confirmations)
                    || !opts.matches_topics(log.topics())
                {
                    continue;
                }

                let job_id = registration.listener.job_id();
                let key = ConsumptionKey::new(position.block_hash, position.log_index, job_id);
                if consumed.contains(&key) {
                    continue;
                }

                let broadcast = Broadcast::new(log.clone(), latest_head, job_id);
                match opts.decoder.decode(log) {
                    Ok(decoded) => {
                        trace!(job_id = job_id, log = %broadcast, "Dispatching log");
                        registration.listener.handle_log(broadcast.with_decoded_log(decoded)).await;
                    }
                    Err(err) => {
                        error!(
                            job_id = job_id,
                            log = %broadcast,
                            error = %err,
                            "Failed to decode log, marking it consumed"
                        );
                        if let Err(err) =
                            ledger.mark_consumed(None, &key, position.block_number).await
                        {
                            error!(job_id = job_id, error = %err, "Failed to mark undecodable log consumed");
                        }
                    }
                }
            }
        }
    }
}

/// Whether a log mined in `block` has at least `required` confirmations at `head`.
///
/// A log above the head is never confirmed, whatever `required` is.
pub(crate) fn is_confirmed(head: BlockNumber, block: BlockNumber, required: u64) -> bool {
    head.checked_sub(block).is_some_and(|depth| depth >= required)
}
