//! Command-line entry point for `iperf3-rs`.
//!
//! Parses arguments, wires up logging, builds a [`TestConfiguration`] or
//! [`ServerConfig`], and drains the resulting event stream to stdout.

use anyhow::Result;
use clap::Parser;
use iperf3_rs::cli::{Args, ClientArgs, Command, ServerArgs};
use iperf3_rs::{
    run_client_test, run_server, ClientEvent, ServerConfig, ServerEvent, TestConfiguration,
};
use tracing::{error, info};
use tracing_subscriber::{filter::LevelFilter, prelude::*, Layer};

use iperf3_rs::logging::ColorizedFormatter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = match args.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    let guard;
    let detailed_log_layer;

    if args.log_file == "stderr" {
        detailed_log_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(log_level)
            .boxed();
        guard = None;
    } else {
        let log_path = std::path::Path::new(&args.log_file);
        let log_dir = log_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| std::path::Path::new("."));
        let log_filename = log_path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("iperf3-rs.log"));
        let file_appender = tracing_appender::rolling::daily(log_dir, log_filename);
        let (non_blocking_writer, file_guard) = tracing_appender::non_blocking(file_appender);
        detailed_log_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false)
            .with_filter(log_level)
            .boxed();
        guard = Some(file_guard);
    }

    let stdout_log = if !args.quiet {
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .event_format(ColorizedFormatter)
                .with_filter(log_level),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(detailed_log_layer)
        .with(stdout_log)
        .init();

    let _log_guard = guard;

    match &args.command {
        Command::Client(client_args) => run_client(client_args).await,
        Command::Server(server_args) => run_server_command(server_args).await,
    }
}

async fn run_client(args: &ClientArgs) -> Result<()> {
    let config = TestConfiguration::try_from(args)?;
    info!(
        "connecting to {}:{} ({} stream(s), {:?})",
        config.server_host, config.server_port, config.num_streams, config.protocol
    );

    let (mut events, _handle) = run_client_test(config)?;
    let mut final_result = None;

    while let Some(event) = events.recv().await {
        match event {
            ClientEvent::Idle => {}
            ClientEvent::Connecting { host, port } => info!("connecting to {}:{}", host, port),
            ClientEvent::Connected { cookie, .. } => info!("connected, session {}", cookie),
            ClientEvent::Started { start_time, .. } => info!("test started at {}", start_time),
            ClientEvent::Interval {
                sample, progress, ..
            } => {
                info!(
                    "[{:>5.1}s] {:>8.2} Mbps ({:.0}% complete)",
                    sample.end_time,
                    sample.bits_per_second / 1_000_000.0,
                    progress * 100.0
                );
            }
            ClientEvent::Complete { result } => {
                final_result = Some(result);
            }
            ClientEvent::Error { message, cause, .. } => {
                error!("test failed: {}{}", message, cause.map(|c| format!(" ({})", c)).unwrap_or_default());
                return Err(anyhow::anyhow!(message));
            }
            ClientEvent::Cancelled { .. } => {
                info!("test cancelled");
            }
        }
    }

    if let Some(result) = final_result {
        println!(
            "\nSummary: {:.2} Mbps avg over {} streams, {} bytes in {} ms",
            result.avg_bandwidth_bps / 1_000_000.0,
            result.num_streams,
            result.total_bytes,
            result.duration_ms
        );
    }

    Ok(())
}

async fn run_server_command(args: &ServerArgs) -> Result<()> {
    let config = ServerConfig::from(args);
    info!("starting server on port {}", config.port);

    let (mut events, _handle) = run_server(config).await?;

    while let Some(event) = events.recv().await {
        match event {
            ServerEvent::Starting { port } => info!("listening on port {}", port),
            ServerEvent::Ready { .. } => info!("ready for connections"),
            ServerEvent::ClientConnected { peer } => info!("client connected: {}", peer),
            ServerEvent::TestRunning { peer, bytes_so_far } => {
                info!("{}: {} bytes so far", peer, bytes_so_far)
            }
            ServerEvent::TestComplete { peer, result } => info!(
                "{}: test complete, {:.2} Mbps avg",
                peer,
                result.avg_bandwidth_bps / 1_000_000.0
            ),
            ServerEvent::ClientDisconnected { peer } => info!("client disconnected: {}", peer),
            ServerEvent::Stopped => {
                info!("server stopped");
                break;
            }
            ServerEvent::Error { message } => {
                error!("server error: {}", message);
                return Err(anyhow::anyhow!(message));
            }
        }
    }

    Ok(())
}
