//! Wire framing primitives (C2): state bytes, cookies, and length-prefixed
//! JSON messages. All operations here are synchronous with respect to the
//! caller — timeouts are the engine's job, applied at the transport layer.

use crate::cookie::SessionCookie;
use crate::defaults::{COOKIE_SIZE, MAX_JSON_MESSAGE_BYTES};
use crate::error::{EngineError, Result};
use crate::message::State;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Write a single state byte and flush immediately.
pub async fn write_state<W>(writer: &mut W, state: State) -> Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    writer.write_i8(state.to_byte()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a single state byte and map it to a known [`State`].
///
/// An unrecognized byte is a protocol error, not a framing error: the
/// framing itself (one byte) succeeded, but the value is meaningless.
pub async fn read_state<R>(reader: &mut R) -> Result<State>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let byte = reader.read_i8().await?;
    State::from_byte(byte).ok_or_else(|| {
        EngineError::Protocol(format!("unrecognized state byte: {}", byte))
    })
}

/// Write the fixed 37-byte cookie representation.
pub async fn write_cookie<W>(writer: &mut W, cookie: &SessionCookie) -> Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    writer.write_all(&cookie.to_wire_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read exactly 37 bytes and decode them as a cookie.
pub async fn read_cookie<R>(reader: &mut R) -> Result<SessionCookie>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = [0u8; COOKIE_SIZE];
    reader.read_exact(&mut buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            EngineError::Framing("short cookie read".to_string())
        } else {
            EngineError::from(e)
        }
    })?;
    Ok(SessionCookie::from_wire_bytes(&buf))
}

/// Write a value as a 4-byte-big-endian-length-prefixed JSON body.
pub async fn write_json<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(value)
        .map_err(|e| EngineError::Framing(format!("failed to serialize message: {}", e)))?;
    let len: u32 = payload
        .len()
        .try_into()
        .map_err(|_| EngineError::Framing("message too large to frame".to_string()))?;
    writer.write_u32(len).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a 4-byte-big-endian-length-prefixed JSON body and deserialize it.
///
/// Rejects a length of zero or greater than 1 MiB as a framing error before
/// attempting to read the body.
pub async fn read_json<R, T>(reader: &mut R) -> Result<T>
where
    R: tokio::io::AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let bytes = read_json_bytes(reader).await?;
    serde_json::from_slice(&bytes)
        .map_err(|e| EngineError::Framing(format!("invalid JSON message: {}", e)))
}

/// Read the raw bytes of a length-prefixed JSON body without deserializing,
/// for callers that need to tolerate malformed JSON (the result-exchange
/// phase).
pub async fn read_json_bytes<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let len = reader.read_u32().await?;
    if len == 0 || len > MAX_JSON_MESSAGE_BYTES {
        return Err(EngineError::Framing(format!(
            "message length {} out of bounds (1..={})",
            len, MAX_JSON_MESSAGE_BYTES
        )));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}
