//! Sync sub-protocol frame codec.
//!
//! Frame layout: `[id: 4 ASCII bytes][length: u32 little-endian]` followed
//! by `length` payload bytes. The DENT and STAT responses extend the header
//! with fixed u32 metadata fields instead of a free-form payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::constants::SYNC_FRAME_HEADER_LEN;
use crate::error::Result;
use crate::protocol::read_exact_or_eof;

// Request ids.
pub const LIST: [u8; 4] = *b"LIST";
pub const STAT: [u8; 4] = *b"STAT";
pub const RECV: [u8; 4] = *b"RECV";
pub const SEND: [u8; 4] = *b"SEND";
pub const QUIT: [u8; 4] = *b"QUIT";

// Response ids.
pub const DENT: [u8; 4] = *b"DENT";
pub const DATA: [u8; 4] = *b"DATA";
pub const DONE: [u8; 4] = *b"DONE";
pub const OKAY: [u8; 4] = *b"OKAY";
pub const FAIL: [u8; 4] = *b"FAIL";

/// File metadata as carried by STAT responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileStat {
    pub mode: u32,
    pub size: u32,
    pub mtime: u32,
}

/// Directory entry as carried by DENT responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dirent {
    pub name: String,
    pub mode: u32,
    pub size: u32,
    pub mtime: u32,
}

/// Encode a bare frame header. The length field doubles as a value slot
/// for DONE (mtime) and the zero of OKAY/DONE terminators.
pub fn encode_header(id: [u8; 4], length: u32) -> [u8; SYNC_FRAME_HEADER_LEN] {
    let mut header = [0u8; SYNC_FRAME_HEADER_LEN];
    header[..4].copy_from_slice(&id);
    header[4..].copy_from_slice(&length.to_le_bytes());
    header
}

/// Parse a frame header into `(id, length)`.
pub fn parse_header(header: &[u8; SYNC_FRAME_HEADER_LEN]) -> ([u8; 4], u32) {
    let id: [u8; 4] = header[..4].try_into().unwrap();
    let len = (&header[4..]).get_u32_le();
    (id, len)
}

/// Encode a DENT frame: header fields `mode`, `size`, `mtime`, `namelen`
/// followed by the UTF-8 name.
pub fn encode_dent(dent: &Dirent) -> Bytes {
    let name = dent.name.as_bytes();
    let mut buf = BytesMut::with_capacity(20 + name.len());
    buf.put_slice(&DENT);
    buf.put_u32_le(dent.mode);
    buf.put_u32_le(dent.size);
    buf.put_u32_le(dent.mtime);
    buf.put_u32_le(name.len() as u32);
    buf.put_slice(name);
    buf.freeze()
}

/// Encode a STAT response: `mode`, `size`, `mtime`.
pub fn encode_stat(stat: &FileStat) -> Bytes {
    let mut buf = BytesMut::with_capacity(16);
    buf.put_slice(&STAT);
    buf.put_u32_le(stat.mode);
    buf.put_u32_le(stat.size);
    buf.put_u32_le(stat.mtime);
    buf.freeze()
}

/// Read one frame header. Returns `Ok(None)` on clean EOF between frames.
///
/// The payload (if any) is left on the stream; callers validate the length
/// before reading it so oversize frames can be rejected without buffering.
pub async fn read_header<R>(reader: &mut R) -> Result<Option<([u8; 4], u32)>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; SYNC_FRAME_HEADER_LEN];
    if !read_exact_or_eof(reader, &mut header).await? {
        return Ok(None);
    }
    Ok(Some(parse_header(&header)))
}

/// Write a header-only frame (DONE, OKAY, or a value-carrying header).
pub async fn write_header<W>(writer: &mut W, id: [u8; 4], length: u32) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(&encode_header(id, length)).await?;
    writer.flush().await?;
    Ok(())
}

/// Write a DATA frame with its chunk payload.
pub async fn write_data<W>(writer: &mut W, chunk: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer
        .write_all(&encode_header(DATA, chunk.len() as u32))
        .await?;
    writer.write_all(chunk).await?;
    writer.flush().await?;
    Ok(())
}

/// Write a FAIL frame with a UTF-8 message payload.
pub async fn write_fail<W>(writer: &mut W, message: &str) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let message = message.as_bytes();
    writer
        .write_all(&encode_header(FAIL, message.len() as u32))
        .await?;
    writer.write_all(message).await?;
    writer.flush().await?;
    Ok(())
}

/// Write a DENT frame.
pub async fn write_dent<W>(writer: &mut W, dent: &Dirent) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(&encode_dent(dent)).await?;
    writer.flush().await?;
    Ok(())
}

/// Write a STAT response.
pub async fn write_stat<W>(writer: &mut W, stat: &FileStat) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(&encode_stat(stat)).await?;
    writer.flush().await?;
    Ok(())
}
