//! Command-line argument parsing for the `iperf3-rs` binary.
//!
//! This module is deliberately outside the core engine: `TestConfiguration`
//! and `ServerConfig` carry no `clap` derives, only the types here do. The
//! `TryFrom`/`From` conversions are where CLI-friendly human strings (a
//! "10s" duration, a size suffix) become strict engine types, and where
//! `ConfigInvalid` validation runs (spec §8, §12).

use crate::config::{Protocol, ServerConfig, TestConfiguration};
use crate::error::EngineError;
use clap::builder::styling::{AnsiColor, Styles};
use clap::{Parser, Subcommand};
use std::time::Duration;

fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Yellow.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// iperf3-rs — a Rust implementation of the iperf3 bandwidth measurement
/// protocol, interoperable with stock `iperf3`.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None, styles = styles())]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Silence all user-facing informational output on stdout.
    #[arg(short = 'q', long, global = true, help_heading = "Output and Logging")]
    pub quiet: bool,

    /// Increase diagnostic log verbosity on stderr (-v info, -vv debug,
    /// -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count, help_heading = "Output and Logging")]
    pub verbose: u8,

    /// Write detailed logs to this file instead of stderr, or "stderr" to
    /// keep them on stderr.
    #[arg(long, global = true, default_value = "stderr", help_heading = "Output and Logging")]
    pub log_file: String,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run as a client against a server.
    Client(ClientArgs),
    /// Run as a server, accepting client connections.
    Server(ServerArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct ClientArgs {
    /// Server host to connect to.
    #[arg(short = 'c', long)]
    pub host: String,

    /// Server port.
    #[arg(short = 'p', long, default_value_t = crate::defaults::SERVER_PORT)]
    pub port: u16,

    /// Test duration (takes precedence over --bytes). Accepts "10s", "5m",
    /// "1h", or a bare number of seconds.
    #[arg(short = 't', long, value_parser = parse_duration, default_value = "10s")]
    pub time: Duration,

    /// Transfer exactly this many bytes instead of running for a fixed
    /// duration. Accepts a plain number or a "K"/"M"/"G" suffix.
    #[arg(short = 'n', long, value_parser = parse_size)]
    pub bytes: Option<u64>,

    /// Number of parallel data streams.
    #[arg(short = 'P', long, default_value_t = 1)]
    pub parallel: u32,

    /// Target bandwidth, e.g. "10M" for 10 Mbps. 0 (default) is unlimited.
    #[arg(short = 'b', long, value_parser = parse_size, default_value = "0")]
    pub bandwidth: u64,

    /// Run in reverse mode: server sends, client receives.
    #[arg(short = 'R', long)]
    pub reverse: bool,

    /// Run a bidirectional test (forwarded to the server; the transfer
    /// loop still only distinguishes send/receive by --reverse).
    #[arg(long)]
    pub bidirectional: bool,

    /// Reporting interval between progress samples, in seconds.
    #[arg(short = 'i', long, default_value_t = 1.0)]
    pub interval: f64,

    /// Length of each read/write buffer, e.g. "128K".
    #[arg(short = 'l', long, value_parser = parse_size, default_value = "128K")]
    pub length: u64,

    /// Use UDP instead of TCP. Accepted but not yet driven by the engine.
    #[arg(short = 'u', long)]
    pub udp: bool,

    /// Set TCP_NODELAY on data streams.
    #[arg(long)]
    pub no_delay: bool,

    /// Connect/control-read timeout, in milliseconds.
    #[arg(long, default_value_t = crate::defaults::CONTROL_TIMEOUT_MS)]
    pub connect_timeout_ms: u64,
}

#[derive(Parser, Debug, Clone)]
pub struct ServerArgs {
    /// Port to listen on.
    #[arg(short = 'p', long, default_value_t = crate::defaults::SERVER_PORT)]
    pub port: u16,

    /// Address to bind to.
    #[arg(short = 'B', long, default_value = "0.0.0.0")]
    pub bind: String,
}

impl TryFrom<&ClientArgs> for TestConfiguration {
    type Error = EngineError;

    fn try_from(args: &ClientArgs) -> Result<Self, Self::Error> {
        let config = TestConfiguration {
            server_host: args.host.clone(),
            server_port: args.port,
            protocol: if args.udp { Protocol::Udp } else { Protocol::Tcp },
            duration_ms: if args.bytes.is_some() {
                0
            } else {
                args.time.as_millis() as u64
            },
            bytes_to_transfer: args.bytes,
            num_streams: args.parallel,
            bandwidth_limit_bps: args.bandwidth,
            reverse: args.reverse,
            bidirectional: args.bidirectional,
            reporting_interval_ms: (args.interval * 1000.0) as u64,
            buffer_length: args.length as usize,
            window_size: None,
            mss: None,
            no_delay: args.no_delay,
            timeout_ms: args.connect_timeout_ms,
        };
        config.validate()?;
        Ok(config)
    }
}

impl From<&ServerArgs> for ServerConfig {
    fn from(args: &ServerArgs) -> Self {
        ServerConfig {
            bind_address: args.bind.parse().unwrap_or_else(|_| [0, 0, 0, 0].into()),
            port: args.port,
        }
    }
}

/// Parse a duration from a human-friendly string: "500ms", "10s", "5m",
/// "1h", or a bare number (seconds assumed).
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s")
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("invalid number in duration: {}", num_str))?;
    if num < 0.0 {
        return Err("duration cannot be negative".to_string());
    }

    Ok(match unit {
        "ms" => Duration::from_millis(num as u64),
        "s" => Duration::from_secs(num as u64),
        "m" => Duration::from_secs((num * 60.0) as u64),
        "h" => Duration::from_secs((num * 3600.0) as u64),
        _ => unreachable!(),
    })
}

/// Parse a byte/rate size with an optional "K"/"M"/"G" suffix (base 1000,
/// matching iperf3's convention for -b/-l/-n).
fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("size cannot be empty".to_string());
    }

    let (num_str, multiplier) = match s.chars().last() {
        Some('K') | Some('k') => (&s[..s.len() - 1], 1_000u64),
        Some('M') | Some('m') => (&s[..s.len() - 1], 1_000_000u64),
        Some('G') | Some('g') => (&s[..s.len() - 1], 1_000_000_000u64),
        _ => (s, 1u64),
    };

    let num: u64 = num_str
        .parse()
        .map_err(|_| format!("invalid number in size: {}", num_str))?;
    Ok(num * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_handles_units() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(
            parse_duration("500ms").unwrap(),
            Duration::from_millis(500)
        );
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn parse_duration_rejects_bad_input() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("invalid").is_err());
        assert!(parse_duration("-5s").is_err());
    }

    #[test]
    fn parse_size_handles_suffixes() {
        assert_eq!(parse_size("128K").unwrap(), 128_000);
        assert_eq!(parse_size("10M").unwrap(), 10_000_000);
        assert_eq!(parse_size("1G").unwrap(), 1_000_000_000);
        assert_eq!(parse_size("42").unwrap(), 42);
    }

    #[test]
    fn client_args_convert_to_valid_test_configuration() {
        let args = ClientArgs {
            host: "127.0.0.1".to_string(),
            port: 5201,
            time: Duration::from_secs(5),
            bytes: None,
            parallel: 2,
            bandwidth: 10_000_000,
            reverse: false,
            bidirectional: false,
            interval: 1.0,
            length: 131_072,
            udp: false,
            no_delay: true,
            connect_timeout_ms: 30_000,
        };
        let config = TestConfiguration::try_from(&args).unwrap();
        assert_eq!(config.server_host, "127.0.0.1");
        assert_eq!(config.duration_ms, 5000);
        assert_eq!(config.num_streams, 2);
        assert_eq!(config.bandwidth_limit_bps, 10_000_000);
        assert!(config.no_delay);
    }

    #[test]
    fn client_args_with_too_many_streams_is_rejected() {
        let args = ClientArgs {
            host: "127.0.0.1".to_string(),
            port: 5201,
            time: Duration::from_secs(5),
            bytes: None,
            parallel: 200,
            bandwidth: 0,
            reverse: false,
            bidirectional: false,
            interval: 1.0,
            length: 131_072,
            udp: false,
            no_delay: false,
            connect_timeout_ms: 30_000,
        };
        assert!(TestConfiguration::try_from(&args).is_err());
    }

    #[test]
    fn server_args_convert_with_default_bind() {
        let args = ServerArgs {
            port: 5201,
            bind: "0.0.0.0".to_string(),
        };
        let config = ServerConfig::from(&args);
        assert_eq!(config.port, 5201);
    }
}
