//! Push fan-out and command correlation.
//!
//! Every inbound push is published to a broadcast channel after the state
//! mirror has been updated. A pending command subscribes, emits its message,
//! and waits for the first push its matcher settles on, or its deadline.
//! Dropping the receiver unsubscribes it, so settlement on any path (success,
//! mapped rejection, timeout) tears the listener down without bookkeeping.

use crate::error::ClientError;
use log::warn;
use shared::messages::ServerPush;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time::timeout;

const BUS_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct PushBus {
    tx: broadcast::Sender<Arc<ServerPush>>,
}

impl PushBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        PushBus { tx }
    }

    /// Publishes a push to all live subscribers. A push with no subscribers
    /// is not an error; most pushes only feed the state mirror.
    pub fn publish(&self, push: Arc<ServerPush>) {
        let _ = self.tx.send(push);
    }

    /// Subscribe before emitting a command so no correlated push can slip
    /// between emission and the wait.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ServerPush>> {
        self.tx.subscribe()
    }

    /// Waits until `matcher` settles the operation or `deadline` passes.
    /// Settles exactly once; the subscription dies with the receiver.
    pub async fn wait<T>(
        &self,
        mut rx: broadcast::Receiver<Arc<ServerPush>>,
        deadline: Duration,
        mut matcher: impl FnMut(&ServerPush) -> Option<Result<T, ClientError>>,
    ) -> Result<T, ClientError> {
        let started = Instant::now();

        let outcome = timeout(deadline, async {
            loop {
                match rx.recv().await {
                    Ok(push) => {
                        if let Some(settled) = matcher(&push) {
                            return settled;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("push subscriber lagged, {} events dropped", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(ClientError::Connection("push channel closed".to_string()));
                    }
                }
            }
        })
        .await;

        match outcome {
            Ok(settled) => settled,
            Err(_) => Err(ClientError::Timeout {
                elapsed: started.elapsed(),
            }),
        }
    }

    /// Convenience for waits that do not race the emission of a command.
    pub async fn await_match<T>(
        &self,
        deadline: Duration,
        matcher: impl FnMut(&ServerPush) -> Option<Result<T, ClientError>>,
    ) -> Result<T, ClientError> {
        let rx = self.subscribe();
        self.wait(rx, deadline, matcher).await
    }
}

impl Default for PushBus {
    fn default() -> Self {
        Self::new()
    }
}
