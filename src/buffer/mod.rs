//! Push-to-pull chunk buffering
//!
//! The producer side of a session pushes variable-length chunk payloads as
//! they arrive from the transport; the engine pulls fixed-capacity reads on
//! its own schedule. [`FrameBuffer`] adapts between the two: chunks are
//! queued on a bounded channel, and `fill` serves pull requests byte-for-byte
//! in arrival order, keeping at most one partially-delivered chunk as a
//! pending remainder.
//!
//! The contract is short-read: a pull request is answered from the pending
//! remainder or from exactly one queued chunk, never topped up across chunk
//! boundaries. Returning fewer bytes than requested is a normal outcome that
//! the pull side must tolerate.

use bytes::Bytes;
use tokio::sync::mpsc;

/// Create a connected push/pull pair with the given chunk queue capacity.
pub fn chunk_channel(capacity: usize) -> (ChunkSender, FrameBuffer) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ChunkSender { tx },
        FrameBuffer {
            rx,
            pending: None,
        },
    )
}

/// Push handle for the producer side of a [`FrameBuffer`].
///
/// Cloneable; the producer signals end-of-stream by dropping every sender.
#[derive(Clone)]
pub struct ChunkSender {
    tx: mpsc::Sender<Bytes>,
}

impl ChunkSender {
    /// Push one chunk, waiting for queue space.
    pub async fn send(&self, chunk: Bytes) -> Result<(), BufferClosed> {
        self.tx.send(chunk).await.map_err(|_| BufferClosed)
    }

    /// Push one chunk from synchronous code, blocking on queue space.
    ///
    /// Must not be called from an async context.
    pub fn blocking_send(&self, chunk: Bytes) -> Result<(), BufferClosed> {
        self.tx.blocking_send(chunk).map_err(|_| BufferClosed)
    }
}

/// The pull side of the buffer has been torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferClosed;

impl std::fmt::Display for BufferClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "frame buffer closed")
    }
}

impl std::error::Error for BufferClosed {}

/// Outcome of a successful `fill` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillRead {
    /// `n` bytes were copied into the request buffer (a short read is normal)
    Data(usize),
    /// Producer closed and every queued byte has been delivered
    Eof,
}

/// Error type for `fill`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillError {
    /// Producer pushed a zero-length chunk
    EmptyChunk,
}

impl std::fmt::Display for FillError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FillError::EmptyChunk => write!(f, "received empty chunk from producer"),
        }
    }
}

impl std::error::Error for FillError {}

/// The unconsumed tail of a partially-delivered chunk.
///
/// Invariant: `offset <= chunk.len()`, cleared exactly when equal.
struct Remainder {
    chunk: Bytes,
    offset: usize,
}

/// Pull side: serves demand-driven reads over the pushed chunk sequence.
///
/// `fill` blocks on chunk arrival, so it must run on a thread that is allowed
/// to block (the session read loop runs on `spawn_blocking`).
pub struct FrameBuffer {
    rx: mpsc::Receiver<Bytes>,
    pending: Option<Remainder>,
}

impl FrameBuffer {
    /// Serve one pull request into `buf`.
    ///
    /// Serves the pending remainder first; otherwise blocks until the next
    /// chunk arrives or the producer closes. EOF is reported only once the
    /// remainder has been fully drained.
    pub fn fill(&mut self, buf: &mut [u8]) -> Result<FillRead, FillError> {
        if let Some(rem) = self.pending.as_mut() {
            let left = rem.chunk.len() - rem.offset;
            let n = buf.len().min(left);
            buf[..n].copy_from_slice(&rem.chunk[rem.offset..rem.offset + n]);
            rem.offset += n;
            if rem.offset == rem.chunk.len() {
                self.pending = None;
            }
            return Ok(FillRead::Data(n));
        }

        let chunk = match self.rx.blocking_recv() {
            Some(chunk) => chunk,
            None => return Ok(FillRead::Eof),
        };

        if buf.len() < chunk.len() {
            let n = buf.len();
            buf.copy_from_slice(&chunk[..n]);
            self.pending = Some(Remainder { chunk, offset: n });
            return Ok(FillRead::Data(n));
        }

        if chunk.is_empty() {
            return Err(FillError::EmptyChunk);
        }

        let n = chunk.len();
        buf[..n].copy_from_slice(&chunk);
        Ok(FillRead::Data(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_all(sender: ChunkSender, chunks: Vec<Vec<u8>>) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || {
            for chunk in chunks {
                sender
                    .blocking_send(Bytes::from(chunk))
                    .expect("buffer closed");
            }
        })
    }

    fn expect_data(buffer: &mut FrameBuffer, buf: &mut [u8]) -> usize {
        match buffer.fill(buf).unwrap() {
            FillRead::Data(n) => n,
            FillRead::Eof => panic!("unexpected eof"),
        }
    }

    #[test]
    fn test_byte_exact_reassembly() {
        let (sender, mut buffer) = chunk_channel(8);
        let input: Vec<u8> = (0u8..200).collect();
        let chunks: Vec<Vec<u8>> = input.chunks(23).map(|c| c.to_vec()).collect();
        let producer = push_all(sender, chunks);

        // Pull with request sizes that do not line up with chunk boundaries.
        let mut out = Vec::new();
        let sizes = [1usize, 7, 13, 4, 64, 3, 19, 50, 200];
        let mut i = 0;
        loop {
            let mut buf = vec![0u8; sizes[i % sizes.len()]];
            i += 1;
            match buffer.fill(&mut buf).unwrap() {
                FillRead::Data(n) => out.extend_from_slice(&buf[..n]),
                FillRead::Eof => break,
            }
        }

        producer.join().unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn test_short_read_is_legal() {
        let (sender, mut buffer) = chunk_channel(8);
        let producer = push_all(sender, vec![vec![1, 2, 3]]);

        let mut buf = [0u8; 64];
        assert_eq!(expect_data(&mut buffer, &mut buf), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);

        producer.join().unwrap();
        assert_eq!(buffer.fill(&mut buf).unwrap(), FillRead::Eof);
    }

    #[test]
    fn test_empty_chunk_rejected() {
        let (sender, mut buffer) = chunk_channel(8);
        let producer = push_all(sender, vec![vec![]]);
        producer.join().unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(buffer.fill(&mut buf), Err(FillError::EmptyChunk));
    }

    #[test]
    fn test_drain_before_eof() {
        let (sender, mut buffer) = chunk_channel(8);
        let producer = push_all(sender, vec![vec![9; 10]]);
        producer.join().unwrap();
        // Producer is gone; the remainder must still be served before EOF.

        let mut buf = [0u8; 4];
        assert_eq!(expect_data(&mut buffer, &mut buf), 4);
        assert_eq!(expect_data(&mut buffer, &mut buf), 4);
        assert_eq!(expect_data(&mut buffer, &mut buf), 2);
        assert_eq!(buffer.fill(&mut buf).unwrap(), FillRead::Eof);
    }

    #[test]
    fn test_chunk_subdivision_scenario() {
        // Chunks of [10, 5, 8] bytes pulled at sizes [7, 7, 7, 2].
        let (sender, mut buffer) = chunk_channel(8);
        let chunks = vec![
            (0u8..10).collect::<Vec<u8>>(),
            (10u8..15).collect(),
            (15u8..23).collect(),
        ];
        let producer = push_all(sender, chunks);

        let mut out = Vec::new();
        let mut buf = [0u8; 7];
        assert_eq!(expect_data(&mut buffer, &mut buf), 7);
        out.extend_from_slice(&buf);
        assert_eq!(expect_data(&mut buffer, &mut buf), 7);
        out.extend_from_slice(&buf);
        assert_eq!(expect_data(&mut buffer, &mut buf), 7);
        out.extend_from_slice(&buf);
        let mut tail = [0u8; 2];
        assert_eq!(expect_data(&mut buffer, &mut tail), 2);
        out.extend_from_slice(&tail);

        producer.join().unwrap();
        assert_eq!(out, (0u8..23).collect::<Vec<u8>>());
        assert_eq!(buffer.fill(&mut buf).unwrap(), FillRead::Eof);
    }

    #[test]
    fn test_blocks_until_chunk_arrives() {
        let (sender, mut buffer) = chunk_channel(8);

        let producer = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            sender.blocking_send(Bytes::from_static(b"late")).unwrap();
        });

        let mut buf = [0u8; 16];
        assert_eq!(expect_data(&mut buffer, &mut buf), 4);
        assert_eq!(&buf[..4], b"late");
        producer.join().unwrap();
    }
}
