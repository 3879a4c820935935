//! Client/server progress event streams (C6) and the cancellation handle
//! shared between a driver task and its caller.
//!
//! Non-terminal `Interval`/`TestRunning` events are sent with `try_send` and
//! dropped under backpressure (drop-oldest in spirit: the consumer simply
//! never sees the dropped sample). Terminal events (`Complete`, `Error`,
//! `Cancelled`, `Stopped`) are sent with a blocking `send().await` so they
//! are never lost and are always the last item delivered.

use crate::config::TestConfiguration;
use crate::results::{IntervalResult, TestResult};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub enum ClientEvent {
    Idle,
    Connecting { host: String, port: u16 },
    Connected { server_version: Option<String>, cookie: String },
    Started { config: TestConfiguration, start_time: chrono::DateTime<chrono::Utc> },
    Interval { sample: IntervalResult, elapsed_ms: u64, progress: f64 },
    /// Terminal: successful completion.
    Complete { result: TestResult },
    /// Terminal: the test failed. `partial` carries whatever intervals were
    /// collected before the failure.
    Error { message: String, cause: Option<String>, partial: Option<TestResult> },
    /// Terminal: the caller cancelled the test.
    Cancelled { partial: Option<TestResult> },
}

#[derive(Debug, Clone)]
pub enum ServerEvent {
    Starting { port: u16 },
    Ready { status: ServerStatusSnapshot },
    ClientConnected { peer: SocketAddr },
    TestRunning { peer: SocketAddr, bytes_so_far: u64 },
    TestComplete { peer: SocketAddr, result: TestResult },
    ClientDisconnected { peer: SocketAddr },
    /// Terminal: the server was stopped cooperatively.
    Stopped,
    /// Terminal: the listener itself failed (bind or non-timeout accept
    /// error). Per-session errors never reach this variant.
    Error { message: String },
}

/// Point-in-time snapshot of server status, single-writer (the accept
/// loop), read via an atomic snapshot by callers.
#[derive(Debug, Clone, Default)]
pub struct ServerStatusSnapshot {
    pub running: bool,
    pub listen_port: u16,
    pub active_connections: u32,
    pub cumulative_bytes: u64,
    pub last_client_addr: Option<SocketAddr>,
    pub last_error: Option<String>,
}

/// Shared cancellation signal plus closable endpoints, returned alongside
/// an event receiver instead of exposing raw socket fields.
#[derive(Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

impl CancelHandle {
    pub(crate) fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Request cancellation. The driver observes this at its next
    /// cancellation check point or I/O error and stops.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_finished(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Send a non-terminal event, silently dropping it if the channel is full
/// rather than blocking the driver loop.
pub(crate) fn send_best_effort<T>(tx: &mpsc::Sender<T>, event: T) {
    if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(event) {
        tracing::debug!("event channel full, dropping non-terminal event");
    }
}

/// Send a terminal event, blocking if necessary so it is never dropped.
pub(crate) async fn send_terminal<T>(tx: &mpsc::Sender<T>, event: T) {
    if tx.send(event).await.is_err() {
        tracing::debug!("event receiver dropped before terminal event delivery");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_handle_starts_uncancelled_and_running() {
        let handle = CancelHandle::new();
        assert!(!handle.is_cancelled());
        assert!(handle.is_running());
    }

    #[test]
    fn cancel_sets_the_flag_for_all_clones() {
        let handle = CancelHandle::new();
        let clone = handle.clone();
        handle.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn mark_finished_is_visible_through_clones() {
        let handle = CancelHandle::new();
        let clone = handle.clone();
        handle.mark_finished();
        assert!(!clone.is_running());
    }

    #[tokio::test]
    async fn best_effort_send_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        send_best_effort(&tx, 1);
        send_best_effort(&tx, 2); // channel full, dropped
        assert_eq!(rx.recv().await, Some(1));
    }

    #[tokio::test]
    async fn terminal_send_is_delivered() {
        let (tx, mut rx) = mpsc::channel(1);
        send_terminal(&tx, "done").await;
        assert_eq!(rx.recv().await, Some("done"));
    }
}
