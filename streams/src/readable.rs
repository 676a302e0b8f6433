use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use async_channel::Receiver;
use bytes::Bytes;

use crate::Result;
use crate::StreamError;
use crate::pipe::PIPE_CAPACITY;

/// Shared lock/cancel state. Clones of a stream refer to the same state, so
/// a clone is the *same* stream identity, not a new one.
#[derive(Debug, Default)]
struct SharedState {
    locked: AtomicBool,
    cancelled: AtomicBool,
}

/// A lazy, finite, cancellable sequence of byte chunks.
///
/// Chunk boundaries carry no meaning; consumers that need line semantics
/// buffer until `\n` (see [`crate::LineReader`]).
#[derive(Debug, Clone)]
pub struct ReadableStream {
    rx: Receiver<Bytes>,
    state: Arc<SharedState>,
}

impl ReadableStream {
    /// Wraps a channel receiver. The stream ends when the channel is closed
    /// and drained.
    pub fn from_channel(rx: Receiver<Bytes>) -> Self {
        Self {
            rx,
            state: Arc::new(SharedState::default()),
        }
    }

    /// A stream that yields `data` as a single chunk, then ends.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self::from_chunks(vec![data.into()])
    }

    /// A stream over a UTF-8 string.
    pub fn from_string(data: impl Into<String>) -> Self {
        Self::from_bytes(data.into().into_bytes())
    }

    /// A stream that yields the given chunks, then ends.
    pub fn from_chunks(chunks: Vec<Bytes>) -> Self {
        let (tx, rx) = async_channel::unbounded();
        for chunk in chunks {
            // Unbounded send on an open channel cannot fail.
            let _ = tx.try_send(chunk);
        }
        tx.close();
        Self::from_channel(rx)
    }

    /// A stream that is already at end-of-stream.
    pub fn empty() -> Self {
        Self::from_chunks(Vec::new())
    }

    /// Acquires the single-consumer read lock.
    pub fn lock(&self) -> Result<StreamReader> {
        if self.state.locked.swap(true, Ordering::AcqRel) {
            return Err(StreamError::AlreadyLocked);
        }
        Ok(StreamReader {
            rx: self.rx.clone(),
            state: Arc::clone(&self.state),
        })
    }

    /// Cancels the stream: subsequent reads observe end-of-stream and
    /// producers observe a closed channel.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
        self.rx.close();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// True when both handles refer to the same underlying stream.
    pub fn same_identity(&self, other: &ReadableStream) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

/// RAII guard over the reader side of a stream. Dropping the guard releases
/// the lock and leaves the stream usable for a subsequent acquire.
#[derive(Debug)]
pub struct StreamReader {
    rx: Receiver<Bytes>,
    state: Arc<SharedState>,
}

impl StreamReader {
    /// Returns the next chunk, or `None` at end-of-stream or after
    /// cancellation.
    pub async fn read(&mut self) -> Option<Bytes> {
        if self.state.cancelled.load(Ordering::Acquire) {
            return None;
        }
        self.rx.recv().await.ok()
    }

    /// Non-blocking variant of [`StreamReader::read`]; `None` means no chunk
    /// is currently buffered, which is *not* end-of-stream.
    pub fn try_read(&mut self) -> Option<Bytes> {
        if self.state.cancelled.load(Ordering::Acquire) {
            return None;
        }
        self.rx.try_recv().ok()
    }

    /// Cancels the underlying stream from the reader side.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
        self.rx.close();
    }
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        self.state.locked.store(false, Ordering::Release);
    }
}

/// Fans one readable out into `n` independent readables that each observe
/// every byte. Slow consumers apply backpressure to the source rather than
/// losing data; a cancelled consumer is dropped from the distribution.
pub fn tee(source: &ReadableStream, n: usize) -> Result<Vec<ReadableStream>> {
    let mut reader = source.lock()?;
    let mut senders = Vec::with_capacity(n);
    let mut outputs = Vec::with_capacity(n);
    for _ in 0..n {
        let (tx, rx) = async_channel::bounded(PIPE_CAPACITY);
        senders.push(tx);
        outputs.push(ReadableStream::from_channel(rx));
    }

    tokio::spawn(async move {
        while let Some(chunk) = reader.read().await {
            let mut live = false;
            for tx in &senders {
                if tx.send(chunk.clone()).await.is_ok() {
                    live = true;
                }
            }
            if !live {
                reader.cancel();
                break;
            }
        }
    });

    Ok(outputs)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use crate::collect;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn single_consumer_lock_discipline() {
        let stream = ReadableStream::from_string("abc");
        let first = stream.lock().expect("first lock");
        assert_eq!(stream.lock().unwrap_err(), StreamError::AlreadyLocked);
        drop(first);

        // Releasing the guard makes the stream lockable again.
        let mut second = stream.lock().expect("second lock");
        assert_eq!(collect(&mut second).await, b"abc".to_vec());
    }

    #[tokio::test]
    async fn cancelled_stream_reads_eof() {
        let stream = ReadableStream::from_string("pending bytes");
        stream.cancel();
        let mut reader = stream.lock().expect("lock");
        assert_eq!(reader.read().await, None);
    }

    #[tokio::test]
    async fn tee_subscribers_see_identical_sequences() {
        let source = ReadableStream::from_chunks(crate::chunks_of(b"one two three", 4));
        let outputs = tee(&source, 3).expect("tee");
        for out in outputs {
            let mut reader = out.lock().expect("lock");
            assert_eq!(collect(&mut reader).await, b"one two three".to_vec());
        }
    }

    #[tokio::test]
    async fn tee_drops_cancelled_subscriber() {
        let source = ReadableStream::from_chunks(crate::chunks_of(&[b'z'; 64], 8));
        let outputs = tee(&source, 2).expect("tee");
        outputs[0].cancel();

        let mut reader = outputs[1].lock().expect("lock");
        assert_eq!(collect(&mut reader).await, vec![b'z'; 64]);
    }
}
