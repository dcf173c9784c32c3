use std::sync::Arc;

use alloy::primitives::BlockNumber;
use async_trait::async_trait;

use crate::{
    BroadcasterError,
    broadcast::Broadcast,
    broadcaster::{Broadcaster, Unsubscribe},
    listener::{Listener, ListenerOpts},
    types::Head,
};

/// A [`Broadcaster`] for nodes without a chain connection.
///
/// Accepts registrations and never delivers anything. The consumption calls fail with
/// [`BroadcasterError::NotConnected`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBroadcaster;

#[async_trait]
impl Broadcaster for NullBroadcaster {
    type Scope = ();

    fn start(&self) -> Result<(), BroadcasterError> {
        Ok(())
    }

    async fn close(&self) {}

    fn register(
        &self,
        _listener: Arc<dyn Listener>,
        _opts: ListenerOpts,
    ) -> Result<Unsubscribe, BroadcasterError> {
        Ok(Unsubscribe::noop())
    }

    fn replay_from_block(&self, _block_number: BlockNumber) {}

    fn is_connected(&self) -> bool {
        false
    }

    fn tracked_addresses_count(&self) -> usize {
        0
    }

    fn on_new_longest_chain(&self, _head: Head) {}

    fn add_dependents(&self, _count: usize) {}

    fn dependent_ready(&self) {}

    async fn await_dependents(&self) {}

    async fn was_already_consumed(
        &self,
        _scope: &mut (),
        _broadcast: &Broadcast,
    ) -> Result<bool, BroadcasterError> {
        Err(BroadcasterError::NotConnected)
    }

    async fn mark_consumed(
        &self,
        _scope: &mut (),
        _broadcast: &Broadcast,
    ) -> Result<(), BroadcasterError> {
        Err(BroadcasterError::NotConnected)
    }
}
