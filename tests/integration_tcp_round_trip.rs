//! End-to-end client/server loopback tests against `127.0.0.1:0`.
//!
//! Each test binds a real server and drives a real client against it in the
//! same process, exercising the full control-connection handshake and at
//! least one data stream over actual TCP sockets.

use iperf3_rs::{run_client_test, run_server, ClientEvent, ServerConfig, ServerEvent, TestConfiguration};
use std::time::Duration;

async fn start_server() -> (u16, tokio::sync::mpsc::Receiver<ServerEvent>, iperf3_rs::CancelHandle) {
    let config = ServerConfig {
        bind_address: "127.0.0.1".parse().unwrap(),
        port: 0,
    };
    let (mut events, handle) = run_server(config).await.unwrap();
    let port = match events.recv().await.unwrap() {
        ServerEvent::Starting { port } => port,
        other => panic!("expected Starting, got {:?}", other),
    };
    (port, events, handle)
}

#[tokio::test]
async fn tcp_upload_completes_and_both_sides_see_the_same_byte_total() {
    let (port, mut server_events, _server_handle) = start_server().await;

    let client_config = TestConfiguration {
        server_host: "127.0.0.1".to_string(),
        server_port: port,
        duration_ms: 0,
        bytes_to_transfer: Some(512 * 1024),
        num_streams: 1,
        reporting_interval_ms: 100,
        ..TestConfiguration::new("127.0.0.1")
    };

    let (mut client_events, _client_handle) = run_client_test(client_config).unwrap();

    let mut client_result = None;
    while let Some(event) = client_events.recv().await {
        if let ClientEvent::Complete { result } = event {
            client_result = Some(result);
            break;
        }
    }
    let client_result = client_result.expect("client should report Complete");
    assert!(client_result.total_bytes >= 512 * 1024);

    let mut server_result = None;
    while let Some(event) = server_events.recv().await {
        if let ServerEvent::TestComplete { result, .. } = event {
            server_result = Some(result);
            break;
        }
    }
    let server_result = server_result.expect("server should report TestComplete");
    assert_eq!(server_result.total_bytes, client_result.total_bytes);
}

#[tokio::test]
async fn paced_upload_respects_an_approximate_bandwidth_ceiling() {
    let (port, _server_events, _server_handle) = start_server().await;

    let client_config = TestConfiguration {
        server_host: "127.0.0.1".to_string(),
        server_port: port,
        duration_ms: 0,
        bytes_to_transfer: Some(256 * 1024),
        num_streams: 1,
        bandwidth_limit_bps: 1024 * 1024, // 1 Mbps, deliberately slow
        reporting_interval_ms: 100,
        ..TestConfiguration::new("127.0.0.1")
    };

    let (mut client_events, _handle) = run_client_test(client_config).unwrap();
    let started = std::time::Instant::now();
    let mut result = None;
    while let Some(event) = client_events.recv().await {
        if let ClientEvent::Complete { result: r } = event {
            result = Some(r);
            break;
        }
    }
    let result = result.expect("paced transfer should still complete");
    assert_eq!(result.total_bytes, 256 * 1024);
    // 256 KiB at 1 Mbps is ~2s; a completely unpaced transfer would finish
    // in well under 100ms on loopback.
    assert!(started.elapsed() > Duration::from_millis(500));
}

#[tokio::test]
async fn cancelling_mid_test_yields_a_cancelled_event_with_a_partial_result() {
    let (port, _server_events, _server_handle) = start_server().await;

    let client_config = TestConfiguration {
        server_host: "127.0.0.1".to_string(),
        server_port: port,
        duration_ms: 30_000,
        bytes_to_transfer: None,
        num_streams: 1,
        bandwidth_limit_bps: 512 * 1024,
        reporting_interval_ms: 100,
        ..TestConfiguration::new("127.0.0.1")
    };

    let (mut client_events, client_handle) = run_client_test(client_config).unwrap();

    // Let the test run briefly, then cancel it.
    tokio::time::sleep(Duration::from_millis(300)).await;
    client_handle.cancel();

    let mut saw_cancelled = false;
    while let Some(event) = client_events.recv().await {
        if let ClientEvent::Cancelled { .. } = event {
            saw_cancelled = true;
            break;
        }
    }
    assert!(saw_cancelled, "expected a terminal Cancelled event");
}

#[tokio::test]
async fn client_rejects_an_invalid_configuration_before_connecting() {
    let config = TestConfiguration {
        num_streams: 0,
        ..TestConfiguration::new("127.0.0.1")
    };
    let result = run_client_test(config);
    assert!(result.is_err(), "zero streams must fail validation synchronously");
}

#[tokio::test]
async fn server_binds_an_ephemeral_port_when_requested() {
    let (port, _server_events, _server_handle) = start_server().await;
    assert_ne!(port, 0, "the OS should have assigned a concrete port");
}
