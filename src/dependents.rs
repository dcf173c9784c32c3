use std::sync::Arc;

use tokio::sync::watch;

/// Counts collaborators that must report ready before the broadcaster subscribes.
///
/// Dependents register their listeners first and then call
/// [`dependent_ready`](Self::dependent_ready), so the first subscription already covers every
/// address they care about.
#[derive(Debug, Clone)]
pub(crate) struct DependentAwaiter {
    pending: Arc<watch::Sender<usize>>,
}

impl DependentAwaiter {
    pub(crate) fn new() -> Self {
        Self { pending: Arc::new(watch::Sender::new(0)) }
    }

    pub(crate) fn add_dependents(&self, count: usize) {
        self.pending.send_modify(|pending| *pending += count);
    }

    pub(crate) fn dependent_ready(&self) {
        self.pending.send_modify(|pending| *pending = pending.saturating_sub(1));
    }

    /// Resolves once every added dependent has reported ready.
    pub(crate) async fn await_dependents(&self) {
        let mut pending = self.pending.subscribe();
        // The sender lives in `self`, so the channel cannot close while waiting.
        let _ = pending.wait_for(|pending| *pending == 0).await;
    }
}
