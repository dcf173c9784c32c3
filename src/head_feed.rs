use alloy::network::Network;
use tokio_util::sync::CancellationToken;

use crate::{
    broadcaster::Broadcaster,
    robust_provider::{Error, RobustProvider},
    types::Head,
};

/// Feeds new block headers from `provider` into `broadcaster` until `cancel` fires.
///
/// Nodes that already track the canonical chain should call
/// [`Broadcaster::on_new_longest_chain`] themselves instead.
///
/// # Errors
///
/// Returns an error if the block subscription cannot be opened or fails on every provider.
pub async fn forward_heads<N, B>(
    provider: &RobustProvider<N>,
    broadcaster: &B,
    cancel: &CancellationToken,
) -> Result<(), Error>
where
    N: Network,
    B: Broadcaster + ?Sized,
{
    let mut subscription = provider.subscribe_blocks().await?;
    info!("Forwarding new heads to the log broadcaster");

    loop {
        let header = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            header = subscription.recv() => header?,
        };

        let head = Head::from_header(&header);
        trace!(head = %head, "Forwarding head");
        broadcaster.on_new_longest_chain(head);
    }
}
