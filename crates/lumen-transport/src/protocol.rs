//! Wire framing: a 4-byte big-endian length followed by the frame body.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::TransportError;

/// Write a length-prefixed frame.
pub(crate) async fn write_framed<W: AsyncWrite + Unpin>(
    send: &mut W,
    data: &[u8],
) -> Result<(), TransportError> {
    let len = u32::try_from(data.len()).map_err(|_| TransportError::FrameTooLarge {
        size: data.len(),
        max: u32::MAX as usize,
    })?;
    send.write_all(&len.to_be_bytes()).await?;
    send.write_all(data).await?;
    send.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame.
///
/// An oversized frame is drained from the stream before
/// [`TransportError::FrameTooLarge`] is returned, so the stream stays
/// aligned on the next frame boundary.
pub(crate) async fn read_framed<R: AsyncRead + Unpin>(
    recv: &mut R,
    max_size: usize,
) -> Result<Vec<u8>, TransportError> {
    let mut len_buf = [0u8; 4];
    recv.read_exact(&mut len_buf).await?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_size {
        let mut skip = (&mut *recv).take(len as u64);
        tokio::io::copy(&mut skip, &mut tokio::io::sink()).await?;
        return Err(TransportError::FrameTooLarge {
            size: len,
            max: max_size,
        });
    }

    let mut buf = vec![0u8; len];
    recv.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Exchange ALPN preambles. Both sides write first, then read.
pub(crate) async fn handshake<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    alpn: &[u8],
) -> Result<(), TransportError> {
    write_framed(stream, alpn).await?;
    let theirs = read_framed(stream, alpn.len().max(64)).await?;
    if theirs != alpn {
        return Err(TransportError::Handshake(format!(
            "alpn mismatch: expected {:?}, got {:?}",
            String::from_utf8_lossy(alpn),
            String::from_utf8_lossy(&theirs)
        )));
    }
    Ok(())
}
