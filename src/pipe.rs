//! Pipe fabric: in-process unidirectional byte pipes used to splice stages
//! together.
//!
//! Each pipe is a bounded in-memory simplex stream. Its two halves are
//! move-only values owned by exactly one task at a time; dropping a half is
//! how it gets closed, so an endpoint can never be closed twice or leaked
//! past the task that owns it. Dropping the write half signals EOF to the
//! read half once buffered data has drained; writing after the read half is
//! gone fails with `BrokenPipe`.

use tokio::io::{ReadHalf, SimplexStream, WriteHalf};

/// Capacity of one pipe in bytes. A full pipe suspends the writer, which is
/// the back-pressure path between adjacent stages.
const PIPE_CAPACITY: usize = 64 * 1024;

pub type PipeReader = ReadHalf<SimplexStream>;
pub type PipeWriter = WriteHalf<SimplexStream>;

/// Open a fresh unidirectional pipe. Data written to the writer appears at
/// the reader in order.
pub fn open_pipe() -> (PipeReader, PipeWriter) {
    tokio::io::simplex(PIPE_CAPACITY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn bytes_travel_in_order() {
        let (mut r, mut w) = open_pipe();
        w.write_all(b"abc").await.unwrap();
        w.write_all(b"def").await.unwrap();
        drop(w);

        let mut buf = Vec::new();
        r.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"abcdef");
    }

    #[tokio::test]
    async fn dropping_writer_signals_eof_after_drain() {
        let (mut r, mut w) = open_pipe();
        w.write_all(b"tail").await.unwrap();
        drop(w);

        let mut buf = [0u8; 16];
        let n = r.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"tail");
        assert_eq!(r.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn writing_to_closed_reader_fails() {
        let (r, mut w) = open_pipe();
        drop(r);

        let err = w.write_all(b"x").await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
    }
}
