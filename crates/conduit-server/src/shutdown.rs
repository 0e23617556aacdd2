//! Shutdown coordination for a gateway node.
//!
//! One `CancellationToken` stops the listener, every session loop, and the
//! reconciliation task. Session futures are tracked separately so shutdown
//! can wait for each one to deregister before the node reports it is done.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tokio_util::task::task_tracker::TrackedFuture;
use tracing::{info, warn};

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Owns the node-wide cancellation token and the set of live sessions.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    sessions: TaskTracker,
}

impl ShutdownCoordinator {
    /// Create a coordinator that has not been triggered.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            sessions: TaskTracker::new(),
        }
    }

    /// A clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancel the token. Sessions, the listener, and the reconciler observe it.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wrap a session future so shutdown waits for it.
    pub fn track_session<F: Future>(&self, session: F) -> TrackedFuture<F> {
        self.sessions.track_future(session)
    }

    /// Sessions that have started and not yet finished.
    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Cancel, then drain sessions followed by `tasks`, all within `timeout`
    /// (30s by default).
    ///
    /// Returns `false` if the deadline passed first.
    pub async fn graceful_shutdown(&self, tasks: Vec<JoinHandle<()>>, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.shutdown();
        let _ = self.sessions.close();
        info!(
            sessions = self.sessions.len(),
            tasks = tasks.len(),
            timeout_secs = timeout.as_secs(),
            "draining"
        );

        let drain = async {
            self.sessions.wait().await;
            let _ = futures::future::join_all(tasks).await;
        };
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!(
                sessions_left = self.sessions.len(),
                "shutdown timed out after {timeout:?}"
            );
            return false;
        }
        true
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
