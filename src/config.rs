//! Core configuration types, free of any CLI dependency: `TestConfiguration`
//! for the client driver and `ServerConfig` for the server driver. The
//! `clap`-based conversion lives in the CLI binary's `cli` module, never
//! here (spec §6/§12).

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Transport protocol for a test. `Udp` is accepted as a data-model value
/// but the engine does not yet drive a UDP transfer loop (spec §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Tcp
    }
}

/// Immutable input to [`crate::engine::client::run_client_test`].
#[derive(Debug, Clone)]
pub struct TestConfiguration {
    pub server_host: String,
    pub server_port: u16,
    pub protocol: Protocol,
    pub duration_ms: u64,
    pub bytes_to_transfer: Option<u64>,
    pub num_streams: u32,
    pub bandwidth_limit_bps: u64,
    pub reverse: bool,
    pub bidirectional: bool,
    pub reporting_interval_ms: u64,
    pub buffer_length: usize,
    pub window_size: Option<u32>,
    pub mss: Option<u32>,
    pub no_delay: bool,
    pub timeout_ms: u64,
}

impl TestConfiguration {
    /// A minimal, valid configuration: a 10s unlimited TCP upload against
    /// `server_host` on the default port, one stream.
    pub fn new(server_host: impl Into<String>) -> Self {
        Self {
            server_host: server_host.into(),
            server_port: crate::defaults::SERVER_PORT,
            protocol: Protocol::Tcp,
            duration_ms: 10_000,
            bytes_to_transfer: None,
            num_streams: 1,
            bandwidth_limit_bps: 0,
            reverse: false,
            bidirectional: false,
            reporting_interval_ms: crate::defaults::REPORTING_INTERVAL_MS,
            buffer_length: crate::defaults::BUFFER_LENGTH,
            window_size: None,
            mss: None,
            no_delay: false,
            timeout_ms: crate::defaults::CONTROL_TIMEOUT_MS,
        }
    }

    /// Pre-I/O validation, per spec §8's boundary behaviors. Never becomes
    /// an `Error` event; callers must check this before starting a test.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.duration_ms == 0 && self.bytes_to_transfer.is_none() {
            return Err(EngineError::ConfigInvalid(
                "one of duration_ms or bytes_to_transfer must be set".to_string(),
            ));
        }
        if self.num_streams == 0 || self.num_streams > crate::defaults::MAX_STREAMS {
            return Err(EngineError::ConfigInvalid(format!(
                "num_streams must be in 1..={}",
                crate::defaults::MAX_STREAMS
            )));
        }
        if self.server_port == 0 {
            return Err(EngineError::ConfigInvalid(
                "server_port must be nonzero".to_string(),
            ));
        }
        if self.reporting_interval_ms == 0 {
            return Err(EngineError::ConfigInvalid(
                "reporting_interval_ms must be nonzero".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the `TestParams` wire message for `PARAM_EXCHANGE`.
    pub fn to_test_params(&self) -> crate::message::TestParams {
        crate::message::TestParams {
            tcp: matches!(self.protocol, Protocol::Tcp),
            udp: matches!(self.protocol, Protocol::Udp),
            time: self.duration_ms / 1000,
            num: self.bytes_to_transfer.unwrap_or(0),
            mss: self.mss.unwrap_or(0),
            nodelay: self.no_delay,
            parallel: self.num_streams,
            reverse: self.reverse,
            bidirectional: self.bidirectional,
            window: self.window_size.unwrap_or(0),
            len: self.buffer_length as u32,
            bandwidth: self.bandwidth_limit_bps,
            client_version: Some(crate::VERSION.to_string()),
            ..Default::default()
        }
    }
}

/// Input to [`crate::engine::server::run_server`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: IpAddr,
    pub port: u16,
}

impl ServerConfig {
    pub fn new(port: u16) -> Self {
        Self {
            bind_address: IpAddr::from([0, 0, 0, 0]),
            port,
        }
    }

    /// `port == 0` is valid and means "ask the OS for an ephemeral port";
    /// the actual bound port is reported back via `local_addr()` once
    /// `run_server` binds the listener.
    pub fn validate(&self) -> Result<(), EngineError> {
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(crate::defaults::SERVER_PORT)
    }
}
