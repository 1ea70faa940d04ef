//! Process-shutdown coordination for open streaming connections.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::dispatch::Dispatcher;

/// Closes every open channel across every bound path on process stop.
///
/// The outer transport layer is expected to stop routing new requests to
/// the dispatcher before shutdown runs; this coordinator only drains what
/// is already open. Close is best-effort per channel and never blocks the
/// rest of the drain.
pub struct ShutdownCoordinator {
    dispatcher: Arc<Dispatcher>,
}

impl ShutdownCoordinator {
    /// Create a coordinator over the given dispatcher.
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Close all open channels now.
    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
    }

    /// Wait for the shutdown token, then close all open channels.
    ///
    /// Spawn this alongside the server and trigger the token from the
    /// signal handler driving graceful shutdown.
    pub async fn run(self, token: CancellationToken) {
        token.cancelled().await;
        self.shutdown();
    }
}
