//! Concurrent sends from one donor.

use std::sync::Arc;

use ist_proto::Seqno;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::{
    IstError,
    address::IstAddress,
    cache::WriteSetCache,
    config::TransferConfig,
    sender::Sender,
    session::TransferSummary,
    transport::Transport,
};

/// Tracks the senders a donor is running so they can be cancelled and
/// joined together, e.g. on shutdown. Dropping the map aborts them.
pub struct SenderMap<T: Transport + Clone> {
    config: TransferConfig,
    cache: Arc<dyn WriteSetCache>,
    transport: T,
    tasks: JoinSet<Result<TransferSummary, IstError>>,
}

impl<T: Transport + Clone> SenderMap<T> {
    /// Empty map; every sender shares `cache` and `transport`.
    pub fn new(config: TransferConfig, cache: Arc<dyn WriteSetCache>, transport: T) -> Self {
        Self { config, cache, transport, tasks: JoinSet::new() }
    }

    /// Start streaming `[first, last]` to `peer`.
    pub fn run(
        &mut self,
        peer: IstAddress,
        version: u8,
        first: Seqno,
        last: Seqno,
        preload_start: Seqno,
    ) {
        debug!(%peer, first, last, "starting sender");
        let mut sender = Sender::new(
            self.config.clone(),
            Arc::clone(&self.cache),
            peer,
            version,
            self.transport.clone(),
        );
        self.tasks.spawn(async move { sender.send(first, last, preload_start).await });
    }

    /// Senders not yet joined.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no sender is outstanding.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Abort every running sender. Their cache locks are released as the
    /// tasks unwind; call [`Self::join_all`] to wait for that.
    pub fn cancel_all(&mut self) {
        if !self.tasks.is_empty() {
            info!(senders = self.tasks.len(), "cancelling IST senders");
        }
        self.tasks.abort_all();
    }

    /// Wait for the next sender to finish.
    pub async fn join_next(&mut self) -> Option<Result<TransferSummary, IstError>> {
        let joined = self.tasks.join_next().await?;
        Some(match joined {
            Ok(result) => result,
            Err(err) if err.is_cancelled() => Err(IstError::Cancelled),
            Err(err) => Err(IstError::TaskFailed(err.to_string())),
        })
    }

    /// Wait for every sender and collect the outcomes in completion order.
    pub async fn join_all(&mut self) -> Vec<Result<TransferSummary, IstError>> {
        let mut outcomes = Vec::with_capacity(self.tasks.len());
        while let Some(outcome) = self.join_next().await {
            outcomes.push(outcome);
        }
        outcomes
    }
}
