use std::collections::VecDeque;

use alloy::rpc::types::Log;
use tokio::sync::mpsc;

/// Log channels read one after another.
///
/// Each resubscribe cycle appends its backfill and live channels behind whatever the previous
/// cycles left unread, so logs are only ordered within a single channel.
#[derive(Debug, Default)]
pub(crate) struct LogStreams {
    channels: VecDeque<mpsc::Receiver<Log>>,
}

impl LogStreams {
    pub(crate) fn push(&mut self, channel: mpsc::Receiver<Log>) {
        self.channels.push_back(channel);
    }

    /// Next log from the oldest open channel. `None` once every channel is closed and drained.
    ///
    /// Cancel safe.
    pub(crate) async fn next(&mut self) -> Option<Log> {
        loop {
            let channel = self.channels.front_mut()?;
            match channel.recv().await {
                Some(log) => return Some(log),
                None => {
                    self.channels.pop_front();
                }
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.channels.len()
    }
}
