//! Wire protocol codecs.
//!
//! Three layers share one TCP connection:
//! - `smart`: the smart-socket request framing and OKAY/FAIL response atoms
//! - `shell`: Shell Protocol v2 packets (separated stdout/stderr, exit code,
//!   stdin control)
//! - `sync`: the binary file-transfer sub-protocol entered via `sync:`
//!
//! Header encoding and parsing are pure functions over byte buffers; async
//! read/write wrappers drive them against any `AsyncRead`/`AsyncWrite`.

pub mod shell;
pub mod smart;
pub mod sync;

use tokio::io::AsyncReadExt;

use crate::error::{Error, Result};

/// Fill `buf` completely, distinguishing clean EOF before the first byte
/// (`Ok(false)`) from EOF mid-read (`Err(ConnectionClosed)`).
pub(crate) async fn read_exact_or_eof<R>(reader: &mut R, buf: &mut [u8]) -> Result<bool>
where
    R: AsyncReadExt + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(Error::ConnectionClosed);
        }
        filled += n;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn eof_before_first_byte_is_clean() {
        let data: &[u8] = b"";
        let mut reader = data;
        let mut buf = [0u8; 4];
        assert!(!read_exact_or_eof(&mut reader, &mut buf).await.unwrap());
    }

    #[tokio::test]
    async fn eof_mid_read_is_an_error() {
        let data: &[u8] = b"ab";
        let mut reader = data;
        let mut buf = [0u8; 4];
        let err = read_exact_or_eof(&mut reader, &mut buf).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn full_read_fills_buffer() {
        let data: &[u8] = b"abcd";
        let mut reader = data;
        let mut buf = [0u8; 4];
        assert!(read_exact_or_eof(&mut reader, &mut buf).await.unwrap());
        assert_eq!(&buf, b"abcd");
    }
}
