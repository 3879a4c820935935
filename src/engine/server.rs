//! Server driver (spec §4.5): accept loop + per-session protocol.

use crate::config::{Protocol, ServerConfig};
use crate::cookie::SessionCookie;
use crate::error::{EngineError, Result};
use crate::events::{
    send_best_effort, send_terminal, CancelHandle, ServerEvent, ServerStatusSnapshot,
    EVENT_CHANNEL_CAPACITY,
};
use crate::framing;
use crate::message::{IPerf3Results, State, TestParams};
use crate::results::TestResult;
use crate::transport::{accept_with_poll_timeout, bind_tcp};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(1_000);
const CONTROL_READ_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Start a server listening on `config.port`. Returns immediately with an
/// event receiver and a [`CancelHandle`]; the accept loop runs on a
/// spawned task. Bind failure is returned synchronously rather than as an
/// `Error` event, since the caller needs to know the server never started.
pub async fn run_server(
    config: ServerConfig,
) -> Result<(mpsc::Receiver<ServerEvent>, CancelHandle)> {
    config.validate()?;

    let addr = SocketAddr::new(config.bind_address, config.port);
    let listener = bind_tcp(addr).await?;
    let actual_port = listener
        .local_addr()
        .map_err(EngineError::from)?
        .port();

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let handle = CancelHandle::new();
    let task_handle = handle.clone();

    send_best_effort(&tx, ServerEvent::Starting { port: actual_port });

    tokio::spawn(async move {
        accept_loop(listener, actual_port, &tx, &task_handle).await;
        task_handle.mark_finished();
    });

    Ok((rx, handle))
}

async fn accept_loop(
    listener: tokio::net::TcpListener,
    port: u16,
    tx: &mpsc::Sender<ServerEvent>,
    handle: &CancelHandle,
) {
    let status = Arc::new(StatusCounters::new(port));
    send_best_effort(
        tx,
        ServerEvent::Ready {
            status: status.snapshot(),
        },
    );

    loop {
        if handle.is_cancelled() {
            break;
        }

        match accept_with_poll_timeout(&listener, ACCEPT_POLL_INTERVAL).await {
            Ok(None) => continue, // poll timeout, re-check cancellation
            Ok(Some((stream, peer))) => {
                status.connection_opened(peer);
                send_best_effort(tx, ServerEvent::ClientConnected { peer });

                match run_session(stream, peer, &listener, tx, &status).await {
                    Ok(result) => {
                        send_best_effort(tx, ServerEvent::TestComplete { peer, result });
                    }
                    Err(e) => {
                        warn!("session with {} ended in error: {}", peer, e);
                        status.record_error(&e);
                    }
                }

                status.connection_closed();
                send_best_effort(tx, ServerEvent::ClientDisconnected { peer });
            }
            Err(e) => {
                // A non-timeout accept failure is fatal to the listener,
                // per spec §7.
                send_terminal(
                    tx,
                    ServerEvent::Error {
                        message: e.to_string(),
                    },
                )
                .await;
                return;
            }
        }
    }

    send_terminal(tx, ServerEvent::Stopped).await;
}

struct StatusCounters {
    port: u16,
    active_connections: AtomicU32,
    cumulative_bytes: AtomicU64,
    last_client_addr: Mutex<Option<SocketAddr>>,
    last_error: Mutex<Option<String>>,
}

impl StatusCounters {
    fn new(port: u16) -> Self {
        Self {
            port,
            active_connections: AtomicU32::new(0),
            cumulative_bytes: AtomicU64::new(0),
            last_client_addr: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    fn connection_opened(&self, peer: SocketAddr) {
        self.active_connections.fetch_add(1, Ordering::SeqCst);
        *self.last_client_addr.lock().unwrap() = Some(peer);
    }

    fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::SeqCst);
    }

    fn add_bytes(&self, n: u64) {
        self.cumulative_bytes.fetch_add(n, Ordering::Relaxed);
    }

    fn record_error(&self, e: &EngineError) {
        *self.last_error.lock().unwrap() = Some(e.to_string());
    }

    fn snapshot(&self) -> ServerStatusSnapshot {
        ServerStatusSnapshot {
            running: true,
            listen_port: self.port,
            active_connections: self.active_connections.load(Ordering::SeqCst),
            cumulative_bytes: self.cumulative_bytes.load(Ordering::Relaxed),
            last_client_addr: *self.last_client_addr.lock().unwrap(),
            last_error: self.last_error.lock().unwrap().clone(),
        }
    }
}

async fn run_session(
    mut control: TcpStream,
    peer: SocketAddr,
    listener: &tokio::net::TcpListener,
    tx: &mpsc::Sender<ServerEvent>,
    status: &Arc<StatusCounters>,
) -> Result<TestResult> {
    let cookie = framing::read_cookie(&mut control).await?;

    framing::write_state(&mut control, State::ParamExchange).await?;
    let params: TestParams =
        read_with_state_timeout(&mut control, |c| framing::read_json(c)).await?;
    framing::write_state(&mut control, State::CreateStreams).await?;

    let num_streams = params.parallel.max(1);
    let mut data_streams = Vec::with_capacity(num_streams as usize);
    for _ in 0..num_streams {
        let stream = accept_data_stream(listener, &cookie, CONTROL_READ_TIMEOUT).await?;
        data_streams.push(stream);
    }

    framing::write_state(&mut control, State::TestStart).await?;
    framing::write_state(&mut control, State::TestRunning).await?;

    let duration = Duration::from_secs(params.time.max(1));
    let bytes_moved = run_server_transfer(data_streams, &params, duration, peer, tx, status).await?;
    status.add_bytes(bytes_moved);

    // Tolerate EOF/timeout here: the client may have already closed its
    // side once it sent TEST_END.
    let _ = tokio::time::timeout(CONTROL_READ_TIMEOUT, framing::read_state(&mut control)).await;

    framing::write_state(&mut control, State::ExchangeResults).await?;
    framing::write_json(&mut control, &IPerf3Results::default()).await?;
    if let Ok(Ok(bytes)) =
        tokio::time::timeout(CONTROL_READ_TIMEOUT, framing::read_json_bytes(&mut control)).await
    {
        let _client_results = IPerf3Results::parse_or_empty(&bytes);
    }

    framing::write_state(&mut control, State::DisplayResults).await?;
    framing::write_state(&mut control, State::IperfDone).await?;

    Ok(result_from_session(&params, peer, status.port, bytes_moved, duration))
}

/// Build a [`TestResult`] from session totals. The server mirrors byte
/// counts only and does not produce per-interval samples (spec §9, noted
/// as future work).
fn result_from_session(
    params: &TestParams,
    peer: SocketAddr,
    port: u16,
    bytes_moved: u64,
    duration: Duration,
) -> TestResult {
    let duration_secs = duration.as_secs_f64().max(f64::EPSILON);
    let avg_bandwidth_bps = (bytes_moved as f64 * 8.0) / duration_secs;
    TestResult {
        server_host: peer.ip().to_string(),
        server_port: port,
        protocol: if params.udp { Protocol::Udp } else { Protocol::Tcp },
        reverse: params.reverse,
        num_streams: params.parallel.max(1),
        total_bytes: bytes_moved,
        duration_ms: duration.as_millis() as u64,
        avg_bandwidth_bps,
        min_bandwidth_bps: avg_bandwidth_bps,
        max_bandwidth_bps: avg_bandwidth_bps,
        tcp: None,
        udp: None,
        quality_score: 0,
        intervals: Vec::new(),
        raw_json: None,
    }
}

/// Accept one data-stream connection on the shared listener and validate
/// its cookie matches the session's. Sessions are serialized (§4.5), so
/// the listener is exclusively ours for the duration of `run_session`.
async fn accept_data_stream(
    listener: &tokio::net::TcpListener,
    cookie: &SessionCookie,
    timeout: Duration,
) -> Result<TcpStream> {
    let (mut stream, _addr) = tokio::time::timeout(timeout, listener.accept())
        .await
        .map_err(|_| EngineError::Timeout("waiting for data stream".to_string()))?
        .map_err(EngineError::from)?;

    let got = framing::read_cookie(&mut stream).await?;
    if got.as_str() != cookie.as_str() {
        return Err(EngineError::Protocol(
            "data stream cookie did not match control cookie".to_string(),
        ));
    }
    Ok(stream)
}

async fn run_server_transfer(
    data_streams: Vec<TcpStream>,
    params: &TestParams,
    duration: Duration,
    peer: SocketAddr,
    tx: &mpsc::Sender<ServerEvent>,
    status: &Arc<StatusCounters>,
) -> Result<u64> {
    let start = Instant::now();
    let mut total = 0u64;
    let mut set = tokio::task::JoinSet::new();

    for mut stream in data_streams {
        let reverse = params.reverse;
        let buffer_length = if params.len > 0 {
            params.len as usize
        } else {
            crate::defaults::BUFFER_LENGTH
        };
        set.spawn(async move {
            let mut buffer = vec![0u8; buffer_length];
            let mut bytes: u64 = 0;
            if reverse {
                // Server sends when the client requested reverse mode.
                loop {
                    if start.elapsed() >= duration {
                        break;
                    }
                    stream.write_all(&buffer).await?;
                    bytes += buffer.len() as u64;
                }
            } else {
                let read_timeout = duration + Duration::from_millis(5_000);
                loop {
                    if start.elapsed() >= duration {
                        break;
                    }
                    match tokio::time::timeout(read_timeout, stream.read(&mut buffer)).await {
                        Ok(Ok(0)) => break,
                        Ok(Ok(n)) => bytes += n as u64,
                        Ok(Err(e)) => return Err(EngineError::from(e)),
                        Err(_) => {
                            return Err(EngineError::Timeout("data read timed out".to_string()))
                        }
                    }
                }
            }
            Ok::<u64, EngineError>(bytes)
        });
    }

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(bytes)) => total += bytes,
            Ok(Err(e)) => return Err(e),
            Err(e) => warn!("server transfer task panicked: {}", e),
        }
    }

    send_best_effort(
        tx,
        ServerEvent::TestRunning {
            peer,
            bytes_so_far: total,
        },
    );
    debug!("session with {} moved {} bytes", peer, total);
    Ok(total)
}

async fn read_with_state_timeout<F, Fut, T>(stream: &mut TcpStream, f: F) -> Result<T>
where
    F: FnOnce(&mut TcpStream) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    tokio::time::timeout(CONTROL_READ_TIMEOUT, f(stream))
        .await
        .map_err(|_| EngineError::Timeout("control read timed out".to_string()))?
}
