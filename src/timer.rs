// src/timer.rs
//! Injected timer dependency.
//!
//! The agent never arms timers itself; it asks a [`Timer`] for a periodic
//! fire keyed by checklist and later stops it by handle. Fires are delivered
//! back by the embedding event loop calling `IceAgent::handle_timeout`, which
//! keeps every agent entry point on the loop's single thread.
//!
//! [`TokioTimer`] is the production implementation: one interval task per
//! handle, fires funneled through an mpsc channel the embedding drains.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

/// Opaque id for a started timer
pub type TimerHandle = u64;

/// What a timer fire is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKey {
    /// Periodic Ta tick for one stream's checklist
    Checklist { stream_id: u32 },
}

/// One timer fire, delivered to `IceAgent::handle_timeout`. The handle lets
/// the agent discard fires from timers it has already stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFire {
    pub handle: TimerHandle,
    pub key: TimerKey,
}

/// Timer capability handed to the agent at construction.
///
/// `start` arms a periodic fire every `interval`; `stop` disarms one timer;
/// `shutdown` disarms everything and releases resources. All three are
/// called from inside agent operations, so implementations must not block.
pub trait Timer: Send {
    fn start(&mut self, interval: Duration, key: TimerKey) -> TimerHandle;
    fn stop(&mut self, handle: TimerHandle);
    fn shutdown(&mut self);
}

/// Tokio-backed [`Timer`]: each `start` spawns an interval loop that pushes
/// [`TimerFire`]s into an unbounded channel. The embedding receives from the
/// channel and calls `handle_timeout` while holding whatever lock serializes
/// agent entry.
pub struct TokioTimer {
    tx: mpsc::UnboundedSender<TimerFire>,
    tasks: HashMap<TimerHandle, JoinHandle<()>>,
    next_handle: TimerHandle,
}

impl TokioTimer {
    /// Create the timer and the receiving end the embedding drains
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerFire>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                tasks: HashMap::new(),
                next_handle: 1,
            },
            rx,
        )
    }
}

impl Timer for TokioTimer {
    fn start(&mut self, interval: Duration, key: TimerKey) -> TimerHandle {
        let handle = self.next_handle;
        self.next_handle += 1;

        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick of a tokio interval fires immediately; skip it
            // so the cadence matches "every Ta ms from now".
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if tx.send(TimerFire { handle, key }).is_err() {
                    break;
                }
            }
        });

        trace!(handle, ?key, ?interval, "timer started");
        self.tasks.insert(handle, task);
        handle
    }

    fn stop(&mut self, handle: TimerHandle) {
        if let Some(task) = self.tasks.remove(&handle) {
            task.abort();
            trace!(handle, "timer stopped");
        }
    }

    fn shutdown(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
        trace!("timer shut down");
    }
}

impl Drop for TokioTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_tokio_timer_fires_periodically() {
        let (mut timer, mut rx) = TokioTimer::new();
        let key = TimerKey::Checklist { stream_id: 1 };
        let handle = timer.start(Duration::from_millis(5), key);

        let first = timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("no fire within deadline")
            .expect("channel closed");
        assert_eq!(first.handle, handle);
        assert_eq!(first.key, key);

        let second = timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("no second fire")
            .expect("channel closed");
        assert_eq!(second.key, key);
    }

    #[tokio::test]
    async fn test_stop_halts_fires() {
        let (mut timer, mut rx) = TokioTimer::new();
        let handle = timer.start(Duration::from_millis(5), TimerKey::Checklist { stream_id: 7 });

        // Let it fire at least once, then stop and drain.
        let _ = timeout(Duration::from_millis(500), rx.recv()).await;
        timer.stop(handle);
        while rx.try_recv().is_ok() {}

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_handles_are_unique() {
        let (mut timer, _rx) = TokioTimer::new();
        let a = timer.start(Duration::from_secs(60), TimerKey::Checklist { stream_id: 1 });
        let b = timer.start(Duration::from_secs(60), TimerKey::Checklist { stream_id: 1 });
        assert_ne!(a, b);
        timer.shutdown();
    }
}
