//! Smart-socket framing.
//!
//! Requests: 4 lowercase ASCII hex digits of payload length, then the
//! payload bytes. Responses: a bare `OKAY`, or `FAIL` / `OKAY` followed by a
//! 4-hex-digit length and a body. After the acceptance atom the service owns
//! the byte stream, so nothing here buffers past a single frame.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::constants::{MAX_REQUEST_LEN, REQUEST_PREFIX_LEN};
use crate::error::{Error, Result};
use crate::protocol::read_exact_or_eof;

/// Acceptance atom.
pub const OKAY: &[u8; 4] = b"OKAY";

/// Rejection atom.
pub const FAIL: &[u8; 4] = b"FAIL";

/// Parse the 4-hex-digit length prefix.
pub fn parse_len_prefix(prefix: &[u8; REQUEST_PREFIX_LEN]) -> Result<usize> {
    let text = std::str::from_utf8(prefix).map_err(|_| Error::codec("malformed length"))?;
    let len = usize::from_str_radix(text, 16).map_err(|_| Error::codec("malformed length"))?;
    debug_assert!(len <= MAX_REQUEST_LEN);
    Ok(len)
}

/// Encode a request: hex length prefix plus payload.
pub fn encode_request(payload: &[u8]) -> Result<Bytes> {
    if payload.len() > MAX_REQUEST_LEN {
        return Err(Error::codec(format!(
            "request too large: {} bytes (max {})",
            payload.len(),
            MAX_REQUEST_LEN
        )));
    }
    let mut buf = BytesMut::with_capacity(REQUEST_PREFIX_LEN + payload.len());
    buf.put_slice(format!("{:04x}", payload.len()).as_bytes());
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Encode `OKAY` with a length-prefixed body.
pub fn encode_okay(body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(8 + body.len());
    buf.put_slice(OKAY);
    buf.put_slice(format!("{:04x}", body.len()).as_bytes());
    buf.put_slice(body);
    buf.freeze()
}

/// Encode `FAIL` with a length-prefixed message.
pub fn encode_fail(message: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(8 + message.len());
    buf.put_slice(FAIL);
    buf.put_slice(format!("{:04x}", message.len()).as_bytes());
    buf.put_slice(message);
    buf.freeze()
}

/// Read one smart-socket request.
///
/// Returns `Ok(None)` on clean EOF before the length prefix. A truncated
/// prefix or payload is `ConnectionClosed`; non-hex digits are a codec
/// error the caller answers with `FAIL` before closing.
pub async fn read_request<R>(reader: &mut R) -> Result<Option<Bytes>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut prefix = [0u8; REQUEST_PREFIX_LEN];
    if !read_exact_or_eof(reader, &mut prefix).await? {
        return Ok(None);
    }
    let len = parse_len_prefix(&prefix)?;

    let mut payload = vec![0u8; len];
    if len > 0 && !read_exact_or_eof(reader, &mut payload).await? {
        return Err(Error::ConnectionClosed);
    }
    Ok(Some(payload.into()))
}

/// Write a bare `OKAY` and flush.
pub async fn write_okay<W>(writer: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(OKAY).await?;
    writer.flush().await?;
    Ok(())
}

/// Write `OKAY` with a length-prefixed body and flush.
pub async fn write_okay_with<W>(writer: &mut W, body: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(&encode_okay(body)).await?;
    writer.flush().await?;
    Ok(())
}

/// Write `OKAY` followed by raw body bytes (no length prefix) and flush.
///
/// Used by services whose body is fixed-size binary data, e.g. the 8-byte
/// transport id of `host:tport:*`.
pub async fn write_okay_raw<W>(writer: &mut W, body: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(OKAY).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

/// Write `FAIL` with a length-prefixed message and flush.
pub async fn write_fail<W>(writer: &mut W, message: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(&encode_fail(message)).await?;
    writer.flush().await?;
    Ok(())
}
