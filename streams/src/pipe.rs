use crate::ReadableStream;
use crate::WritableStream;

/// Chunks buffered in a pipe before the writer suspends.
pub const PIPE_CAPACITY: usize = 32;

/// Creates a FIFO byte pipe: bytes written appear on the reader in order,
/// and the writer suspends once [`PIPE_CAPACITY`] chunks are buffered.
pub fn pipe() -> (WritableStream, ReadableStream) {
    pipe_with_capacity(PIPE_CAPACITY)
}

pub fn pipe_with_capacity(capacity: usize) -> (WritableStream, ReadableStream) {
    let (tx, rx) = async_channel::bounded(capacity.max(1));
    (
        WritableStream::from_channel(tx),
        ReadableStream::from_channel(rx),
    )
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn fifo_order_is_preserved() {
        let (writable, readable) = pipe();
        let writer_task = tokio::spawn(async move {
            let mut w = writable.lock().expect("lock");
            for i in 0..100u8 {
                w.write(Bytes::from(vec![i])).await.expect("write");
            }
            w.close();
        });

        let mut reader = readable.lock().expect("lock");
        let bytes = crate::collect(&mut reader).await;
        writer_task.await.expect("join");
        assert_eq!(bytes, (0..100u8).collect::<Vec<u8>>());
    }

    #[tokio::test]
    async fn backpressure_suspends_writer() {
        let (writable, readable) = pipe_with_capacity(2);
        let mut w = writable.lock().expect("lock");
        w.write(Bytes::from_static(b"1")).await.expect("write");
        w.write(Bytes::from_static(b"2")).await.expect("write");

        // Buffer is full: a third write must not complete until the reader
        // drains a chunk.
        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            w.write(Bytes::from_static(b"3")),
        )
        .await;
        assert!(pending.is_err(), "write should have suspended");

        let mut reader = readable.lock().expect("lock");
        assert_eq!(reader.read().await, Some(Bytes::from_static(b"1")));
        w.write(Bytes::from_static(b"3")).await.expect("write");
    }

    #[tokio::test]
    async fn dropping_every_writer_ends_the_stream() {
        let (writable, readable) = pipe();
        {
            let mut w = writable.lock().expect("lock");
            w.write_str("tail").await.expect("write");
        }
        drop(writable);

        let mut reader = readable.lock().expect("lock");
        assert_eq!(crate::collect(&mut reader).await, b"tail".to_vec());
    }
}
