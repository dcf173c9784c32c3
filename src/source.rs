use std::pin::Pin;

use alloy::{
    network::Network,
    rpc::types::{Filter, Log},
};
use tokio_stream::Stream;

use crate::robust_provider::{Error, RobustProvider};

/// Live logs from the node. The stream ends (or yields an error) when the subscription dies.
pub type LogStream = Pin<Box<dyn Stream<Item = Result<Log, Error>> + Send>>;

/// The node-facing side of the broadcaster.
pub trait LogSource: Clone + Send + Sync + 'static {
    /// Number of the latest block.
    fn latest_block_number(&self) -> impl Future<Output = Result<u64, Error>> + Send;

    /// Logs matching `filter`, which carries an explicit block range.
    fn logs(&self, filter: &Filter) -> impl Future<Output = Result<Vec<Log>, Error>> + Send;

    /// Subscribe to logs matching `filter` as they are mined.
    fn subscribe_logs(&self, filter: &Filter) -> impl Future<Output = Result<LogStream, Error>> + Send;
}

impl<N: Network> LogSource for RobustProvider<N> {
    async fn latest_block_number(&self) -> Result<u64, Error> {
        self.get_block_number().await
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, Error> {
        self.get_logs(filter).await
    }

    async fn subscribe_logs(&self, filter: &Filter) -> Result<LogStream, Error> {
        let subscription = RobustProvider::subscribe_logs(self, filter).await?;
        Ok(Box::pin(subscription.into_stream()))
    }
}
