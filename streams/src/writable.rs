use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use async_channel::Sender;
use bytes::Bytes;

use crate::Result;
use crate::StreamError;

#[derive(Debug, Default)]
struct WriteState {
    locked: AtomicBool,
}

/// The write side of a stream.
///
/// Clones share the underlying channel, so a clone is the same stream
/// identity; this is what `2>&1` relies on. The stream closes when every
/// sender handle (stream clones and outstanding guards) has been dropped, or
/// when a guard closes it explicitly.
#[derive(Debug, Clone)]
pub struct WritableStream {
    tx: Sender<Bytes>,
    state: Arc<WriteState>,
}

impl WritableStream {
    pub fn from_channel(tx: Sender<Bytes>) -> Self {
        Self {
            tx,
            state: Arc::new(WriteState::default()),
        }
    }

    /// A writable that accepts and discards every chunk.
    pub fn null() -> Self {
        let (tx, rx) = async_channel::unbounded::<Bytes>();
        tokio::spawn(async move { while rx.recv().await.is_ok() {} });
        Self::from_channel(tx)
    }

    /// Acquires the single-writer lock.
    pub fn lock(&self) -> Result<StreamWriter> {
        if self.state.locked.swap(true, Ordering::AcqRel) {
            return Err(StreamError::AlreadyLocked);
        }
        Ok(StreamWriter {
            tx: self.tx.clone(),
            state: Arc::clone(&self.state),
        })
    }

    /// True when both handles feed the same underlying stream.
    pub fn same_identity(&self, other: &WritableStream) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// RAII guard over the writer side. Dropping releases the lock; the channel
/// itself stays open for other handles.
#[derive(Debug)]
pub struct StreamWriter {
    tx: Sender<Bytes>,
    state: Arc<WriteState>,
}

impl StreamWriter {
    /// Writes one chunk, suspending while the destination is above its
    /// backpressure threshold. Empty chunks are dropped.
    pub async fn write(&mut self, chunk: Bytes) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        self.tx
            .send(chunk)
            .await
            .map_err(|_| StreamError::Closed)
    }

    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.write(Bytes::copy_from_slice(data)).await
    }

    pub async fn write_str(&mut self, data: &str) -> Result<()> {
        self.write_all(data.as_bytes()).await
    }

    /// Writes one line with a trailing `\n`.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        self.write(Bytes::from(buf)).await
    }

    /// Closes the stream for every handle; readers drain what was buffered
    /// and then observe end-of-stream.
    pub fn close(&self) {
        self.tx.close();
    }
}

impl Drop for StreamWriter {
    fn drop(&mut self) {
        self.state.locked.store(false, Ordering::Release);
    }
}
