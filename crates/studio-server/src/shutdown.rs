//! Shutdown of one running server: a `CancellationToken` plus the tasks it
//! stops.

use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Owns the background tasks of a running server and stops them together.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl ShutdownCoordinator {
    /// Create a coordinator with no tasks.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    /// A token cancelled when shutdown begins.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawn `task` and track it under `name`.
    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push((name, tokio::spawn(task)));
    }

    /// Number of tracked tasks.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Cancel the token and wait up to `timeout` for every task.
    ///
    /// Tasks still running afterwards are aborted. Returns `true` when all
    /// of them finished on their own.
    pub async fn shutdown(self, timeout: Duration) -> bool {
        self.token.cancel();
        let (names, handles): (Vec<_>, Vec<_>) = self.tasks.into_iter().unzip();
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        info!(tasks = ?names, timeout_ms = timeout.as_millis(), "stopping server tasks");

        if tokio::time::timeout(timeout, join_all(handles)).await.is_ok() {
            return true;
        }
        let stuck: Vec<_> = names
            .iter()
            .zip(&aborts)
            .filter(|(_, abort)| !abort.is_finished())
            .map(|(name, _)| *name)
            .collect();
        warn!(?stuck, "server tasks did not stop in {timeout:?}, aborting");
        for abort in aborts {
            abort.abort();
        }
        false
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
