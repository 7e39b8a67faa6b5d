//! Byte-channel primitives.
//!
//! All stage I/O goes through these four helpers so that no stage can escape
//! cooperative scheduling: tokio parks the task on would-block and wakes it
//! on readiness. The helpers add the termination semantics the pipeline
//! relies on. An empty read means EOF, writes complete fully or fail, and a
//! finished copy leaves its writer flushed.
//!
//! They are generic over `AsyncRead`/`AsyncWrite` because the same
//! operations serve in-process pipes, the process stdio and the pipes of a
//! spawned qrexec client.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Chunk size for reads and copies. Bounds the memory held per half-stream.
pub const READ_BUF_SIZE: usize = 1024 * 1024;

/// Read until some data is available or EOF is reached.
///
/// Returns at most `max` bytes; an empty buffer means EOF.
pub async fn read_some<R>(reader: &mut R, max: usize) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; max];
    let n = reader.read(&mut buf).await?;
    buf.truncate(n);
    Ok(buf)
}

/// Read until `size` bytes are collected or EOF is reached.
///
/// A result shorter than `size` means EOF was observed.
pub async fn read_exactly<R>(reader: &mut R, size: usize) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut out = Vec::with_capacity(size.min(READ_BUF_SIZE));
    while out.len() < size {
        let want = (size - out.len()).min(READ_BUF_SIZE);
        let chunk = read_some(reader, want).await?;
        if chunk.is_empty() {
            break;
        }
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}

/// Write the entire buffer, optionally flushing afterwards.
pub async fn write_all<W>(writer: &mut W, buf: &[u8], flush: bool) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(buf).await?;
    if flush {
        writer.flush().await?;
    }
    Ok(())
}

/// Read and drop everything until EOF, then close the reader.
///
/// Used by stages that decided not to deliver more data: the upstream writer
/// must not stall against a full pipe, or its back-pressure becomes a signal
/// the peer can observe. Returns the number of bytes absorbed.
pub async fn discard<R>(mut reader: R) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut total = 0u64;
    loop {
        let chunk = read_some(&mut reader, READ_BUF_SIZE).await?;
        if chunk.is_empty() {
            return Ok(total);
        }
        total += chunk.len() as u64;
    }
}

/// Copy up to `limit` bytes from `reader` to `writer` (-1 = until EOF).
///
/// The writer is flushed once on exit, not per chunk. Neither end is closed;
/// that stays with the caller, which may want to half-close and keep
/// draining. Returns the number of bytes copied.
pub async fn copy<R, W>(reader: &mut R, writer: &mut W, limit: i64) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; READ_BUF_SIZE];
    let mut copied = 0u64;
    loop {
        let want = if limit < 0 {
            buf.len()
        } else {
            let left = (limit as u64).saturating_sub(copied);
            if left == 0 {
                break;
            }
            left.min(buf.len() as u64) as usize
        };
        let n = reader.read(&mut buf[..want]).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        copied += n as u64;
    }
    writer.flush().await?;
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::open_pipe;

    #[tokio::test]
    async fn read_some_returns_available_data() {
        let (mut r, mut w) = open_pipe();
        w.write_all(b"hello").await.unwrap();
        w.flush().await.unwrap();

        let chunk = read_some(&mut r, 64).await.unwrap();
        assert_eq!(chunk, b"hello");
    }

    #[tokio::test]
    async fn read_some_empty_on_eof() {
        let (mut r, w) = open_pipe();
        drop(w);
        assert!(read_some(&mut r, 64).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_exactly_accumulates_across_writes() {
        let (mut r, mut w) = open_pipe();
        let writer = tokio::spawn(async move {
            for part in [&b"ab"[..], b"cd", b"ef"] {
                w.write_all(part).await.unwrap();
            }
        });

        let data = read_exactly(&mut r, 6).await.unwrap();
        assert_eq!(data, b"abcdef");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn read_exactly_short_on_eof() {
        let (mut r, mut w) = open_pipe();
        w.write_all(b"abc").await.unwrap();
        drop(w);

        let data = read_exactly(&mut r, 10).await.unwrap();
        assert_eq!(data, b"abc");
    }

    #[tokio::test]
    async fn discard_absorbs_everything() {
        let (r, mut w) = open_pipe();
        let writer = tokio::spawn(async move {
            w.write_all(&vec![7u8; 150 * 1024]).await.unwrap();
        });

        assert_eq!(discard(r).await.unwrap(), 150 * 1024);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn copy_unbounded_until_eof() {
        let (mut r, mut w) = open_pipe();
        let (mut out_r, mut out_w) = open_pipe();
        let writer = tokio::spawn(async move {
            w.write_all(b"payload").await.unwrap();
        });

        let n = copy(&mut r, &mut out_w, -1).await.unwrap();
        assert_eq!(n, 7);
        drop(out_w);
        writer.await.unwrap();

        let mut got = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut out_r, &mut got)
            .await
            .unwrap();
        assert_eq!(got, b"payload");
    }

    #[tokio::test]
    async fn copy_respects_limit() {
        let (mut r, mut w) = open_pipe();
        let (mut out_r, mut out_w) = open_pipe();
        w.write_all(b"abcdef").await.unwrap();
        drop(w);

        assert_eq!(copy(&mut r, &mut out_w, 3).await.unwrap(), 3);
        drop(out_w);

        let mut got = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut out_r, &mut got)
            .await
            .unwrap();
        assert_eq!(got, b"abc");

        // the rest is still available for the caller to drain
        assert_eq!(read_some(&mut r, 16).await.unwrap(), b"def");
    }

    #[tokio::test]
    async fn copy_zero_limit_moves_nothing() {
        let (mut r, mut w) = open_pipe();
        let (_out_r, mut out_w) = open_pipe();
        w.write_all(b"x").await.unwrap();

        assert_eq!(copy(&mut r, &mut out_w, 0).await.unwrap(), 0);
    }
}
