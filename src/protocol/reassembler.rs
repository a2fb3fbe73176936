//! Reassembles arbitrary reads into fixed-size frames.
//!
//! TCP (and pipes) deliver bytes in whatever pieces they like. The reader
//! keeps asking for the remaining deficit until a whole frame is buffered,
//! the peer closes, or the connection breaks.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Outcome of one [`FrameReader::next_frame`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameRead {
    /// Exactly `frame_bytes` bytes.
    Complete(Vec<u8>),
    /// Peer closed mid-frame; holds the 1..frame_bytes bytes that arrived.
    Partial(Vec<u8>),
    /// Peer closed on a frame boundary.
    EndOfStream,
}

impl FrameRead {
    /// Frame payload, if any.
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            FrameRead::Complete(bytes) | FrameRead::Partial(bytes) => Some(bytes),
            FrameRead::EndOfStream => None,
        }
    }

    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, FrameRead::EndOfStream)
    }
}

/// Pulls fixed-size frames out of an async byte stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    frame_bytes: usize,
    bytes_received: u64,
    frames_read: u64,
    closed: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, frame_bytes: usize) -> Self {
        Self {
            inner,
            frame_bytes,
            bytes_received: 0,
            frames_read: 0,
            closed: false,
        }
    }

    /// Read the next frame.
    ///
    /// A reset or aborted connection ends the stream just like a clean close.
    /// Other I/O errors are returned to the caller.
    pub async fn next_frame(&mut self) -> io::Result<FrameRead> {
        if self.closed || self.frame_bytes == 0 {
            return Ok(FrameRead::EndOfStream);
        }

        let mut buffer = vec![0u8; self.frame_bytes];
        let mut filled = 0;

        while filled < self.frame_bytes {
            let n = match self.inner.read(&mut buffer[filled..]).await {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if is_disconnect(&e) => 0,
                Err(e) => return Err(e),
            };

            if n == 0 {
                self.closed = true;
                if filled == 0 {
                    return Ok(FrameRead::EndOfStream);
                }
                buffer.truncate(filled);
                self.frames_read += 1;
                return Ok(FrameRead::Partial(buffer));
            }

            filled += n;
            self.bytes_received += n as u64;
        }

        self.frames_read += 1;
        Ok(FrameRead::Complete(buffer))
    }

    /// Total payload bytes received so far.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Frames returned so far, partial ones included.
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Errors that mean "the peer is gone" rather than "something is broken".
pub fn is_disconnect(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    /// Serves a fixed list of read results, one per poll.
    struct ScriptedReader {
        reads: Vec<io::Result<Vec<u8>>>,
    }

    impl ScriptedReader {
        fn new(mut reads: Vec<io::Result<Vec<u8>>>) -> Self {
            reads.reverse();
            Self { reads }
        }

        fn fragments(data: &[u8], size: usize) -> Self {
            Self::new(data.chunks(size).map(|c| Ok(c.to_vec())).collect())
        }
    }

    impl AsyncRead for ScriptedReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            match self.reads.pop() {
                None => Poll::Ready(Ok(())),
                Some(Err(e)) => Poll::Ready(Err(e)),
                Some(Ok(mut chunk)) => {
                    let n = chunk.len().min(buf.remaining());
                    buf.put_slice(&chunk[..n]);
                    if n < chunk.len() {
                        let rest = chunk.split_off(n);
                        self.reads.push(Ok(rest));
                    }
                    Poll::Ready(Ok(()))
                }
            }
        }
    }

    async fn collect_frames<R: AsyncRead + Unpin>(reader: &mut FrameReader<R>) -> Vec<FrameRead> {
        let mut frames = Vec::new();
        loop {
            let frame = reader.next_frame().await.unwrap();
            if frame.is_end_of_stream() {
                return frames;
            }
            frames.push(frame);
        }
    }

    #[tokio::test]
    async fn one_byte_reads_reassemble_exact_frames() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let mut reader = FrameReader::new(ScriptedReader::fragments(&data, 1), 64);

        let frames = collect_frames(&mut reader).await;

        let (last, full) = frames.split_last().unwrap();
        assert!(
            full.iter()
                .all(|f| matches!(f, FrameRead::Complete(b) if b.len() == 64))
        );
        assert_eq!(last, &FrameRead::Partial(data[960..].to_vec()));

        let joined: Vec<u8> = frames
            .into_iter()
            .flat_map(|f| f.into_bytes().unwrap())
            .collect();
        assert_eq!(joined, data);
        assert_eq!(reader.bytes_received(), 1000);
        assert_eq!(reader.frames_read(), 16);
    }

    #[tokio::test]
    async fn uneven_fragments_reassemble() {
        let data: Vec<u8> = (0..200u8).collect();
        for size in [3usize, 7, 33, 50, 199, 500] {
            let mut reader = FrameReader::new(ScriptedReader::fragments(&data, size), 50);
            let frames = collect_frames(&mut reader).await;
            assert_eq!(frames.len(), 4, "fragment size {}", size);
            assert!(frames.iter().all(|f| matches!(f, FrameRead::Complete(_))));
            let joined: Vec<u8> = frames
                .into_iter()
                .flat_map(|f| f.into_bytes().unwrap())
                .collect();
            assert_eq!(joined, data, "fragment size {}", size);
        }
    }

    #[tokio::test]
    async fn empty_stream_is_end_of_stream() {
        let mut reader = FrameReader::new(ScriptedReader::new(vec![]), 64000);
        assert_eq!(reader.next_frame().await.unwrap(), FrameRead::EndOfStream);
        assert_eq!(reader.frames_read(), 0);
    }

    #[tokio::test]
    async fn stays_closed_after_end_of_stream() {
        let mut reader = FrameReader::new(ScriptedReader::fragments(b"abc", 3), 2);
        assert_eq!(
            reader.next_frame().await.unwrap(),
            FrameRead::Complete(b"ab".to_vec())
        );
        assert_eq!(
            reader.next_frame().await.unwrap(),
            FrameRead::Partial(b"c".to_vec())
        );
        assert_eq!(reader.next_frame().await.unwrap(), FrameRead::EndOfStream);
        assert_eq!(reader.next_frame().await.unwrap(), FrameRead::EndOfStream);
    }

    #[tokio::test]
    async fn reset_mid_frame_returns_partial() {
        let reads = vec![
            Ok(vec![1, 2, 3]),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ];
        let mut reader = FrameReader::new(ScriptedReader::new(reads), 8);
        assert_eq!(
            reader.next_frame().await.unwrap(),
            FrameRead::Partial(vec![1, 2, 3])
        );
        assert_eq!(reader.next_frame().await.unwrap(), FrameRead::EndOfStream);
    }

    #[tokio::test]
    async fn reset_on_boundary_is_end_of_stream() {
        let reads = vec![Err(io::Error::new(io::ErrorKind::ConnectionAborted, "gone"))];
        let mut reader = FrameReader::new(ScriptedReader::new(reads), 8);
        assert_eq!(reader.next_frame().await.unwrap(), FrameRead::EndOfStream);
    }

    #[tokio::test]
    async fn interrupted_read_is_retried() {
        let reads = vec![
            Ok(vec![1, 2]),
            Err(io::Error::new(io::ErrorKind::Interrupted, "signal")),
            Ok(vec![3, 4]),
        ];
        let mut reader = FrameReader::new(ScriptedReader::new(reads), 4);
        assert_eq!(
            reader.next_frame().await.unwrap(),
            FrameRead::Complete(vec![1, 2, 3, 4])
        );
    }

    #[tokio::test]
    async fn other_errors_propagate() {
        let reads = vec![Err(io::Error::new(io::ErrorKind::InvalidData, "bad"))];
        let mut reader = FrameReader::new(ScriptedReader::new(reads), 4);
        let err = reader.next_frame().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn works_over_duplex_with_closed_writer() {
        use tokio::io::AsyncWriteExt;

        let (mut client, server) = tokio::io::duplex(16);
        let writer = tokio::spawn(async move {
            client.write_all(&[9u8; 40]).await.unwrap();
            client.shutdown().await.unwrap();
        });

        let mut reader = FrameReader::new(server, 32);
        assert!(matches!(reader.next_frame().await.unwrap(), FrameRead::Complete(b) if b.len() == 32));
        assert!(matches!(reader.next_frame().await.unwrap(), FrameRead::Partial(b) if b.len() == 8));
        assert_eq!(reader.next_frame().await.unwrap(), FrameRead::EndOfStream);
        writer.await.unwrap();
    }
}
