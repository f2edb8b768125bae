//! Bidirectional byte pumping between two streams.

use std::io;

use tokio::io::{copy_bidirectional, AsyncRead, AsyncWrite, AsyncWriteExt};

/// Copies bytes both ways until both sides reach end-of-stream, then shuts
/// both down.
///
/// A peer that vanishes mid-copy (broken pipe, reset, not connected) ends
/// the proxy quietly; other errors are returned.
pub async fn proxy_streams<A, B>(mut local: A, mut remote: B) -> io::Result<(u64, u64)>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let copy_result = copy_bidirectional(&mut local, &mut remote).await;
    let _ = remote.shutdown().await;
    let _ = local.shutdown().await;

    match copy_result {
        Ok(counts) => Ok(counts),
        Err(err) if is_half_close(&err) => Ok((0, 0)),
        Err(err) => Err(err),
    }
}

fn is_half_close(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::NotConnected | io::ErrorKind::ConnectionReset
    )
}
