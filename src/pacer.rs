//! Token-bucket rate limiter (C4), shared by the client send loop when a
//! bandwidth limit is configured.
//!
//! The critical section only ever touches `{tokens, last_update}`; the
//! resulting sleep always happens after the lock is released so one
//! paced stream never blocks another's bookkeeping.

use std::sync::Mutex;
use std::time::{Duration, Instant};

const MIN_BURST: u64 = 64 * 1024;
const MAX_BURST: u64 = 1024 * 1024;

struct BucketState {
    tokens: f64,
    last_update: Instant,
}

/// A token bucket rate limiter keyed on bytes per second.
///
/// `bandwidth_bps == 0` means unlimited: [`Pacer::acquire`] returns
/// immediately without taking the lock.
pub struct Pacer {
    bandwidth_bps: u64,
    burst_size: f64,
    state: Mutex<BucketState>,
}

impl Pacer {
    /// Build a pacer for the given bandwidth limit, in bits per second.
    /// `burst_size` defaults to `clamp(bandwidth_bytes_per_sec / 10, 64 KiB,
    /// 1 MiB)`.
    pub fn new(bandwidth_bps: u64) -> Self {
        let bytes_per_sec = bandwidth_bps / 8;
        let burst_size = (bytes_per_sec / 10).clamp(MIN_BURST, MAX_BURST) as f64;
        Self {
            bandwidth_bps,
            burst_size,
            state: Mutex::new(BucketState {
                tokens: burst_size,
                last_update: Instant::now(),
            }),
        }
    }

    /// Build a pacer with an explicit burst size, bypassing the default
    /// clamp. Used by tests that need a small bucket to observe blocking
    /// behavior quickly.
    pub fn with_burst_size(bandwidth_bps: u64, burst_size: u64) -> Self {
        let burst_size = burst_size as f64;
        Self {
            bandwidth_bps,
            burst_size,
            state: Mutex::new(BucketState {
                tokens: burst_size,
                last_update: Instant::now(),
            }),
        }
    }

    /// Block until `bytes` worth of tokens are available, refilling the
    /// bucket first. A no-op when unlimited.
    pub async fn acquire(&self, bytes: u64) {
        if self.bandwidth_bps == 0 {
            return;
        }
        let bytes_per_sec = (self.bandwidth_bps / 8).max(1) as f64;

        let wait = {
            let mut state = self.state.lock().unwrap();
            let now = Instant::now();
            let elapsed = now.duration_since(state.last_update).as_secs_f64();
            state.last_update = now;
            state.tokens = (state.tokens + bytes_per_sec * elapsed).min(self.burst_size);

            let bytes = bytes as f64;
            if state.tokens >= bytes {
                state.tokens -= bytes;
                None
            } else {
                let deficit = bytes - state.tokens;
                state.tokens = 0.0;
                let wait_secs = deficit / bytes_per_sec;
                Some(Duration::from_secs_f64(wait_secs.max(0.0)))
            }
        };

        if let Some(wait) = wait {
            tokio::time::sleep(wait).await;
        }
    }

    pub fn burst_size(&self) -> u64 {
        self.burst_size as u64
    }
}
