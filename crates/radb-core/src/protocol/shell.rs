//! Shell Protocol v2 packet codec.
//!
//! Packet layout: `[id: u8][length: u32 little-endian][data: length]`.
//! Writes flush after every packet to bound latency on interactive
//! sessions.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::constants::{SHELL_MAX_PACKET, SHELL_PACKET_HEADER_LEN};
use crate::error::{Error, Result};
use crate::protocol::read_exact_or_eof;

/// Shell v2 packet ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketId {
    /// Data for the child's stdin.
    Stdin = 0,
    /// Data from the child's stdout.
    Stdout = 1,
    /// Data from the child's stderr.
    Stderr = 2,
    /// One data byte: the child's exit code. Always the last packet.
    Exit = 3,
    /// Close the child's stdin (no payload).
    CloseStdin = 4,
    /// ASCII `"rows cols xpixel ypixel"`; PTY-only.
    WindowSizeChange = 5,
}

impl PacketId {
    /// Map a wire byte to a packet id. Unknown ids are ignored by
    /// receivers, so this is an `Option` rather than an error.
    pub fn from_u8(id: u8) -> Option<Self> {
        match id {
            0 => Some(PacketId::Stdin),
            1 => Some(PacketId::Stdout),
            2 => Some(PacketId::Stderr),
            3 => Some(PacketId::Exit),
            4 => Some(PacketId::CloseStdin),
            5 => Some(PacketId::WindowSizeChange),
            _ => None,
        }
    }
}

/// Encode a packet header plus payload.
pub fn encode_packet(id: PacketId, data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(SHELL_PACKET_HEADER_LEN + data.len());
    buf.put_u8(id as u8);
    buf.put_u32_le(data.len() as u32);
    buf.put_slice(data);
    buf.freeze()
}

/// Parse a packet header into `(raw id, payload length)`.
pub fn parse_packet_header(header: &[u8; SHELL_PACKET_HEADER_LEN]) -> (u8, u32) {
    let id = header[0];
    let len = (&header[1..]).get_u32_le();
    (id, len)
}

/// Read one packet. Returns `Ok(None)` on clean EOF between packets.
///
/// The raw id byte is returned so callers can skip unknown ids.
pub async fn read_packet<R>(reader: &mut R) -> Result<Option<(u8, Bytes)>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; SHELL_PACKET_HEADER_LEN];
    if !read_exact_or_eof(reader, &mut header).await? {
        return Ok(None);
    }
    let (id, len) = parse_packet_header(&header);
    if len as usize > SHELL_MAX_PACKET {
        return Err(Error::codec(format!(
            "shell packet too large: {len} bytes (max {SHELL_MAX_PACKET})"
        )));
    }
    let mut payload = vec![0u8; len as usize];
    if len > 0 && !read_exact_or_eof(reader, &mut payload).await? {
        return Err(Error::ConnectionClosed);
    }
    Ok(Some((id, payload.into())))
}

/// Write one packet and flush.
pub async fn write_packet<W>(writer: &mut W, id: PacketId, data: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(&encode_packet(id, data)).await?;
    writer.flush().await?;
    Ok(())
}

/// Write the EXIT packet carrying one unsigned exit-code byte and flush.
pub async fn write_exit<W>(writer: &mut W, code: u8) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    write_packet(writer, PacketId::Exit, &[code]).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_stdout_packet_layout() {
        let packet = encode_packet(PacketId::Stdout, b"hi\n");
        assert_eq!(&packet[..], b"\x01\x03\x00\x00\x00hi\n");
    }

    #[test]
    fn encode_empty_packet() {
        let packet = encode_packet(PacketId::CloseStdin, b"");
        assert_eq!(&packet[..], b"\x04\x00\x00\x00\x00");
    }

    #[test]
    fn exit_packet_layout() {
        let packet = encode_packet(PacketId::Exit, &[0xFF]);
        assert_eq!(&packet[..], b"\x03\x01\x00\x00\x00\xff");
    }

    #[test]
    fn header_roundtrip() {
        let packet = encode_packet(PacketId::Stderr, b"err");
        let header: [u8; SHELL_PACKET_HEADER_LEN] = packet[..5].try_into().unwrap();
        let (id, len) = parse_packet_header(&header);
        assert_eq!(id, PacketId::Stderr as u8);
        assert_eq!(len, 3);
    }

    #[test]
    fn packet_id_mapping() {
        for raw in 0u8..=5 {
            assert_eq!(PacketId::from_u8(raw).unwrap() as u8, raw);
        }
        assert!(PacketId::from_u8(6).is_none());
        assert!(PacketId::from_u8(255).is_none());
    }

    #[tokio::test]
    async fn read_packet_roundtrip() {
        let frame = encode_packet(PacketId::Stdin, b"echo hi\n");
        let mut reader = &frame[..];
        let (id, payload) = read_packet(&mut reader).await.unwrap().unwrap();
        assert_eq!(id, PacketId::Stdin as u8);
        assert_eq!(&payload[..], b"echo hi\n");
    }

    #[tokio::test]
    async fn read_packet_clean_eof() {
        let mut reader: &[u8] = b"";
        assert!(read_packet(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn read_packet_truncated() {
        let frame = encode_packet(PacketId::Stdin, b"data");
        let mut reader = &frame[..frame.len() - 1];
        let err = read_packet(&mut reader).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn read_packet_oversize() {
        let mut frame = BytesMut::new();
        frame.put_u8(PacketId::Stdin as u8);
        frame.put_u32_le((SHELL_MAX_PACKET + 1) as u32);
        let mut reader = &frame[..];
        let err = read_packet(&mut reader).await.unwrap_err();
        assert!(matches!(err, Error::Codec { .. }));
    }

    #[tokio::test]
    async fn write_exit_is_single_byte_payload() {
        let mut buf = Vec::new();
        write_exit(&mut buf, 255).await.unwrap();
        assert_eq!(buf, b"\x03\x01\x00\x00\x00\xff".to_vec());
    }
}
