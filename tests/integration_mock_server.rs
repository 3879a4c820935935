//! Integration tests against a hand-rolled minimal peer instead of our own
//! server, for wire behaviors our server never exercises (denial, framing
//! errors over a real socket).

use iperf3_rs::message::State;
use iperf3_rs::{run_client_test, ClientEvent, TestConfiguration};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

#[tokio::test]
async fn server_sending_access_denied_surfaces_as_a_protocol_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut cookie_buf = [0u8; 37];
        stream.read_exact(&mut cookie_buf).await.unwrap();
        stream.write_i8(State::AccessDenied.to_byte()).await.unwrap();
        stream.flush().await.unwrap();
    });

    let config = TestConfiguration::new("127.0.0.1");
    let config = TestConfiguration {
        server_port: port,
        ..config
    };
    let (mut events, _handle) = run_client_test(config).unwrap();

    let mut saw_error = false;
    while let Some(event) = events.recv().await {
        if let ClientEvent::Error { message, .. } = event {
            assert!(message.to_lowercase().contains("access denied"));
            saw_error = true;
            break;
        }
    }
    assert!(saw_error, "expected a terminal Error event for access denial");
}

#[tokio::test]
async fn oversized_length_prefix_is_rejected_as_a_framing_error_over_a_real_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream.write_u32(0x7FFF_FFFF).await.unwrap();
        stream.flush().await.unwrap();
    });

    let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
    let err = iperf3_rs::framing::read_json_bytes(&mut client)
        .await
        .unwrap_err();
    assert!(matches!(err, iperf3_rs::EngineError::Framing(_)));

    server.await.unwrap();
}
