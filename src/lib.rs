//! # iperf3-rs
//!
//! A Rust implementation of the iperf3 bandwidth measurement wire protocol.
//! This crate provides the protocol engine only: a control-connection state
//! machine, wire framing, paced transfer loops, and interval aggregation,
//! usable as both client and server and interoperable with stock `iperf3`.
//!
//! ```no_run
//! # use iperf3_rs::{TestConfiguration, run_client_test};
//! # async fn run() -> anyhow::Result<()> {
//! let config = TestConfiguration::new("127.0.0.1");
//! let (mut events, _handle) = run_client_test(config)?;
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod cookie;
pub mod engine;
pub mod error;
pub mod events;
pub mod framing;
pub mod logging;
pub mod message;
pub mod pacer;
pub mod results;
pub mod transport;

pub use config::{ServerConfig, TestConfiguration};
pub use engine::client::run_client_test;
pub use engine::server::run_server;
pub use error::EngineError;
pub use events::{CancelHandle, ClientEvent, ServerEvent};
pub use results::{IntervalResult, TestResult};

/// The current version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol-level constants shared across modules.
pub mod defaults {
    /// Default control/data port, matching stock iperf3.
    pub const SERVER_PORT: u16 = 5201;

    /// Default reporting interval between emitted [`crate::IntervalResult`]s.
    pub const REPORTING_INTERVAL_MS: u64 = 1000;

    /// Default per-write buffer length for the transfer loop.
    pub const BUFFER_LENGTH: usize = 131_072;

    /// Default control-read timeout.
    pub const CONTROL_TIMEOUT_MS: u64 = 30_000;

    /// Grace period added to the configured duration for receive-mode reads.
    pub const RECEIVE_GRACE_MS: u64 = 5_000;

    /// Maximum number of parallel data streams.
    pub const MAX_STREAMS: u32 = 128;

    /// Maximum accepted length-prefixed JSON message body.
    pub const MAX_JSON_MESSAGE_BYTES: u32 = 1024 * 1024;

    /// Fixed on-wire cookie length (36 ASCII chars + NUL).
    pub const COOKIE_SIZE: usize = 37;
}
