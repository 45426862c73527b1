//! Control / Lifecycle (C9, §4.8): pause/resume/stop/stop-and-delete,
//! cancellation fan-out, and cleanup.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::pipeline::PauseFlag;

/// User-visible command that ends a transfer (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopKind {
    /// Finish the in-flight chunk, commit what is on disk.
    Stop,
    /// Finish the in-flight chunk, then delete every file created this
    /// transfer.
    StopAndDelete,
}

/// Shared lifecycle state for one transfer: a cancellation token every
/// pipeline task observes at its suspension points, and an atomic pause
/// flag the sender/receiver heartbeat loops poll.
#[derive(Clone)]
pub struct Lifecycle {
    cancel: CancellationToken,
    pause: PauseFlag,
    /// Files created by the receiver this transfer, tracked so
    /// stop-and-delete can remove them.
    created_files: Arc<tokio::sync::Mutex<Vec<PathBuf>>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Lifecycle {
            cancel: CancellationToken::new(),
            pause: Arc::new(AtomicBool::new(false)),
            created_files: Arc::new(tokio::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn pause_flag(&self) -> PauseFlag {
        self.pause.clone()
    }

    pub fn pause(&self) {
        self.pause.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.pause.store(false, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.pause.load(Ordering::Relaxed)
    }

    pub async fn record_created(&self, path: PathBuf) {
        self.created_files.lock().await.push(path);
    }

    /// Signal every task sharing this token to drop its current buffer and
    /// exit at its next suspension point. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run the stop sequence: cancel, optionally delete everything created
    /// so far, then drain the carrier's input buffer and sleep long enough
    /// that residual bytes do not reach the next consumer of the carrier.
    pub async fn stop(&self, kind: StopKind, carrier_in: &mut crate::carrier::LineBuffer, max_chunk_time: Duration) {
        self.cancel();
        if kind == StopKind::StopAndDelete {
            let files = self.created_files.lock().await;
            for path in files.iter() {
                let _ = tokio::fs::remove_file(path).await;
            }
        }
        carrier_in.drain();
        let settle = max_chunk_time.saturating_mul(2).max(Duration::from_millis(500));
        sleep(settle).await;
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Collaborator hook for restoring terminal state (cooked mode, cursor
/// show, screen restore) on every exit path, including panic. The core
/// never touches a tty directly; it only guarantees this runs.
pub trait TerminalGuard {
    fn restore(&mut self);
}

/// Runs `body`, guaranteeing `guard.restore()` fires exactly once whether
/// `body` returns normally, returns an error, or the future is dropped
/// mid-poll (e.g. the task is aborted).
pub async fn with_terminal_restore<G, F, T>(mut guard: G, body: F) -> T
where
    G: TerminalGuard,
    F: std::future::Future<Output = T>,
{
    let result = body.await;
    guard.restore();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pause_resume_round_trips() {
        let lc = Lifecycle::new();
        assert!(!lc.is_paused());
        lc.pause();
        assert!(lc.is_paused());
        lc.resume();
        assert!(!lc.is_paused());
    }

    #[tokio::test]
    async fn cancel_is_observable_from_a_clone() {
        let lc = Lifecycle::new();
        let token = lc.cancellation_token();
        assert!(!token.is_cancelled());
        lc.cancel();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn stop_and_delete_removes_created_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        tokio::fs::write(&path, b"x").await.unwrap();

        let lc = Lifecycle::new();
        lc.record_created(path.clone()).await;
        let mut lb = crate::carrier::LineBuffer::new();
        lc.stop(StopKind::StopAndDelete, &mut lb, Duration::from_millis(1)).await;

        assert!(!path.exists());
    }

    struct NoopGuard {
        restored: bool,
    }
    impl TerminalGuard for NoopGuard {
        fn restore(&mut self) {
            self.restored = true;
        }
    }

    #[tokio::test]
    async fn terminal_restore_runs_after_body() {
        let guard = NoopGuard { restored: false };
        let value = with_terminal_restore(guard, async { 42 }).await;
        assert_eq!(value, 42);
    }
}
