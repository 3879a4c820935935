//! Client driver (spec §4.5, 11 steps).

use crate::config::TestConfiguration;
use crate::cookie::SessionCookie;
use crate::engine::check_expected_state;
use crate::error::{EngineError, Result};
use crate::events::{
    send_best_effort, send_terminal, CancelHandle, ClientEvent, EVENT_CHANNEL_CAPACITY,
};
use crate::framing;
use crate::message::{IPerf3Results, State};
use crate::results::{aggregate, IntervalResult};
use crate::transport::{connect_tcp, SocketTuning};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Start a client test against `config`. Returns immediately with an event
/// receiver and a [`CancelHandle`]; the test itself runs on a spawned
/// task. `ConfigInvalid` is returned directly, synchronously, and never
/// becomes an `Error` event (spec §7).
pub fn run_client_test(
    config: TestConfiguration,
) -> Result<(mpsc::Receiver<ClientEvent>, CancelHandle)> {
    config.validate()?;

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let handle = CancelHandle::new();
    let task_handle = handle.clone();

    tokio::spawn(async move {
        let result = drive_client_test(&config, &tx, &task_handle).await;
        task_handle.mark_finished();
        if let Err(err) = result {
            if matches!(err, EngineError::Cancelled) {
                send_terminal(&tx, ClientEvent::Cancelled { partial: None }).await;
            } else {
                send_terminal(
                    &tx,
                    ClientEvent::Error {
                        message: err.to_string(),
                        cause: None,
                        partial: None,
                    },
                )
                .await;
            }
        }
    });

    Ok((rx, handle))
}

async fn drive_client_test(
    config: &TestConfiguration,
    tx: &mpsc::Sender<ClientEvent>,
    handle: &CancelHandle,
) -> Result<()> {
    let addr = resolve(config).await?;
    let timeout = Duration::from_millis(config.timeout_ms);

    send_best_effort(
        tx,
        ClientEvent::Connecting {
            host: config.server_host.clone(),
            port: config.server_port,
        },
    );

    let mut control = connect_tcp(addr, timeout, SocketTuning::default()).await?;
    check_cancelled(handle)?;
    let cookie = SessionCookie::generate();
    framing::write_cookie(&mut control, &cookie).await?;

    wait_for_state(&mut control, State::ParamExchange, timeout, handle).await?;

    let params = config.to_test_params();
    framing::write_json(&mut control, &params).await?;

    wait_for_state(&mut control, State::CreateStreams, timeout, handle).await?;

    send_best_effort(
        tx,
        ClientEvent::Connected {
            server_version: None,
            cookie: cookie.to_string(),
        },
    );

    let mut data_streams = Vec::with_capacity(config.num_streams as usize);
    for _ in 0..config.num_streams {
        check_cancelled(handle)?;
        let mut stream = connect_tcp(addr, timeout, socket_tuning(config)).await?;
        framing::write_cookie(&mut stream, &cookie).await?;
        data_streams.push(stream);
    }

    wait_for_state(&mut control, State::TestStart, timeout, handle).await?;
    send_best_effort(
        tx,
        ClientEvent::Started {
            config: config.clone(),
            start_time: chrono::Utc::now(),
        },
    );
    wait_for_state(&mut control, State::TestRunning, timeout, handle).await?;

    let samples = run_transfer_phase(config, data_streams, tx, handle).await?;

    if handle.is_cancelled() {
        let partial = aggregate(config, samples);
        send_terminal(tx, ClientEvent::Cancelled { partial: Some(partial) }).await;
        return Ok(());
    }

    framing::write_state(&mut control, State::TestEnd).await?;

    exchange_results(&mut control, timeout).await;

    let result = aggregate(config, samples);
    send_terminal(tx, ClientEvent::Complete { result }).await;
    Ok(())
}

async fn resolve(config: &TestConfiguration) -> Result<SocketAddr> {
    let target = format!("{}:{}", config.server_host, config.server_port);
    tokio::net::lookup_host(&target)
        .await
        .map_err(EngineError::from)?
        .next()
        .ok_or_else(|| EngineError::Transport(format!("could not resolve {}", target)))
}

fn socket_tuning(config: &TestConfiguration) -> SocketTuning {
    SocketTuning {
        no_delay: config.no_delay,
        send_buffer: None,
        recv_buffer: config.window_size,
    }
}

async fn wait_for_state(
    control: &mut TcpStream,
    expected: State,
    timeout: Duration,
    handle: &CancelHandle,
) -> Result<()> {
    check_cancelled(handle)?;
    let got = tokio::time::timeout(timeout, framing::read_state(control))
        .await
        .map_err(|_| EngineError::Timeout(format!("waiting for {:?}", expected)))??;
    check_expected_state(expected, got)
}

/// Observe a pending cancellation request as soon as possible, rather than
/// only at the transfer loop's own checks (spec §8: cancel during connect
/// ⇒ `Cancelled{partial: None}`).
fn check_cancelled(handle: &CancelHandle) -> Result<()> {
    if handle.is_cancelled() {
        Err(EngineError::Cancelled)
    } else {
        Ok(())
    }
}

/// Run the per-stream transfer loops concurrently, aggregating bytes into
/// a single stream of aggregate `IntervalResult`s (`stream_id == -1`).
async fn run_transfer_phase(
    config: &TestConfiguration,
    data_streams: Vec<TcpStream>,
    tx: &mpsc::Sender<ClientEvent>,
    handle: &CancelHandle,
) -> Result<Vec<IntervalResult>> {
    let total_bytes = Arc::new(AtomicU64::new(0));
    let start = Instant::now();
    let deadline = if config.duration_ms > 0 {
        Some(Duration::from_millis(config.duration_ms))
    } else {
        None
    };

    let mut streams = JoinSet::new();
    for stream in data_streams {
        let counter = total_bytes.clone();
        let handle = handle.clone();
        let config = config.clone();
        streams.spawn(async move {
            transfer_one_stream(stream, &config, start, deadline, counter, handle).await
        });
    }

    let mut samples = Vec::new();
    let mut last_tick_bytes = 0u64;
    let mut last_tick_elapsed = 0.0f64;
    let reporting_interval = Duration::from_millis(config.reporting_interval_ms);
    let mut ticker = tokio::time::interval(reporting_interval);
    ticker.tick().await; // first tick fires immediately; skip it

    let mut first_error = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let elapsed = start.elapsed().as_secs_f64();
                let bytes_now = total_bytes.load(Ordering::Relaxed);
                let delta = bytes_now.saturating_sub(last_tick_bytes);
                let sample = IntervalResult::new(-1, last_tick_elapsed, elapsed, delta);
                last_tick_bytes = bytes_now;
                last_tick_elapsed = elapsed;

                let progress = progress_fraction(config, elapsed, bytes_now);
                send_best_effort(tx, ClientEvent::Interval {
                    sample: sample.clone(),
                    elapsed_ms: (elapsed * 1000.0) as u64,
                    progress,
                });
                samples.push(sample);

                if handle.is_cancelled() {
                    break;
                }
                if let Some(d) = deadline {
                    if start.elapsed() >= d {
                        break;
                    }
                }
            }
            joined = streams.join_next(), if !streams.is_empty() => {
                match joined {
                    Some(Ok(Err(e))) if first_error.is_none() && !matches!(e, EngineError::Cancelled) => {
                        first_error = Some(e);
                    }
                    Some(Err(e)) => warn!("stream task panicked: {}", e),
                    _ => {}
                }
                if streams.is_empty() {
                    break;
                }
            }
        }
    }

    // Drain any remaining tasks (deadline/cancel reached before every
    // stream noticed) before building the final sample list.
    while let Some(joined) = streams.join_next().await {
        match joined {
            Ok(Err(e)) if first_error.is_none() && !matches!(e, EngineError::Cancelled) => {
                first_error = Some(e);
            }
            Ok(_) => {}
            Err(e) => warn!("stream task panicked: {}", e),
        }
    }

    if let Some(err) = first_error {
        if !handle.is_cancelled() {
            return Err(err);
        }
    }

    Ok(samples)
}

fn progress_fraction(config: &TestConfiguration, elapsed_secs: f64, bytes_so_far: u64) -> f64 {
    let progress = if let Some(target) = config.bytes_to_transfer {
        if target == 0 {
            1.0
        } else {
            bytes_so_far as f64 / target as f64
        }
    } else if config.duration_ms > 0 {
        elapsed_secs / (config.duration_ms as f64 / 1000.0)
    } else {
        0.0
    };
    progress.clamp(0.0, 1.0)
}

async fn transfer_one_stream(
    mut stream: TcpStream,
    config: &TestConfiguration,
    start: Instant,
    deadline: Option<Duration>,
    counter: Arc<AtomicU64>,
    handle: CancelHandle,
) -> Result<()> {
    let pacer = crate::pacer::Pacer::new(config.bandwidth_limit_bps);
    let mut buffer = vec![0u8; config.buffer_length];
    let mut bytes_sent: u64 = 0;
    let per_stream_target = config
        .bytes_to_transfer
        .map(|total| total / config.num_streams.max(1) as u64);

    if config.reverse {
        stream.set_nodelay(config.no_delay).ok();
        let read_timeout = deadline
            .map(|d| d + Duration::from_millis(5_000))
            .unwrap_or(Duration::from_secs(3600));
        loop {
            if handle.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            if let Some(d) = deadline {
                if start.elapsed() >= d {
                    break;
                }
            }
            let read = tokio::time::timeout(read_timeout, stream.read(&mut buffer)).await;
            match read {
                Ok(Ok(0)) => break, // peer closed
                Ok(Ok(n)) => {
                    counter.fetch_add(n as u64, Ordering::Relaxed);
                }
                Ok(Err(e)) => return Err(EngineError::from(e)),
                Err(_) => return Err(EngineError::Timeout("data read timed out".to_string())),
            }
        }
    } else {
        loop {
            if handle.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            if let Some(d) = deadline {
                if start.elapsed() >= d {
                    break;
                }
            }
            if let Some(target) = per_stream_target {
                if bytes_sent >= target {
                    break;
                }
            }
            pacer.acquire(buffer.len() as u64).await;
            if handle.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            if let Some(d) = deadline {
                if start.elapsed() >= d {
                    break;
                }
            }
            stream.write_all(&buffer).await?;
            bytes_sent += buffer.len() as u64;
            counter.fetch_add(buffer.len() as u64, Ordering::Relaxed);
        }
        stream.flush().await?;
    }

    debug!("stream transfer loop finished, {} bytes", bytes_sent);
    Ok(())
}

/// Best-effort result exchange (spec §7): failures here are logged and
/// discarded since the transfer itself already succeeded.
async fn exchange_results(control: &mut TcpStream, timeout: Duration) {
    let outcome: Result<()> = async {
        wait_for_state(control, State::ExchangeResults, timeout).await?;
        let bytes = framing::read_json_bytes(control).await?;
        let _peer_results = IPerf3Results::parse_or_empty(&bytes);
        framing::write_json(control, &IPerf3Results::default()).await?;
        wait_for_state(control, State::DisplayResults, timeout).await?;
        wait_for_state(control, State::IperfDone, timeout).await?;
        Ok(())
    }
    .await;

    if let Err(e) = outcome {
        warn!("result exchange did not complete cleanly: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_clamps_to_unit_interval_for_byte_targets() {
        let mut config = TestConfiguration::new("127.0.0.1");
        config.duration_ms = 0;
        config.bytes_to_transfer = Some(1000);
        assert_eq!(progress_fraction(&config, 0.0, 0), 0.0);
        assert_eq!(progress_fraction(&config, 0.0, 500), 0.5);
        assert_eq!(progress_fraction(&config, 0.0, 5000), 1.0);
    }

    #[test]
    fn progress_uses_elapsed_over_duration_for_duration_targets() {
        let mut config = TestConfiguration::new("127.0.0.1");
        config.duration_ms = 10_000;
        config.bytes_to_transfer = None;
        assert_eq!(progress_fraction(&config, 5.0, 0), 0.5);
        assert_eq!(progress_fraction(&config, 20.0, 0), 1.0);
    }
}
