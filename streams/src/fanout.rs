use std::sync::Arc;

use async_channel::Sender;
use bytes::Bytes;
use tokio::sync::Mutex;

use crate::ReadableStream;
use crate::pipe::PIPE_CAPACITY;

/// Broadcast hub: every published chunk is delivered, in publish order, to
/// each subscriber that was live at publish time. The terminal uses one of
/// these to fan keystrokes out to its input streams.
///
/// Subscribers that cancel their stream are pruned on the next publish;
/// until then their bounded buffer may absorb a few chunks.
#[derive(Debug, Clone, Default)]
pub struct Fanout {
    subscribers: Arc<Mutex<Vec<Sender<Bytes>>>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber. The returned stream observes every chunk
    /// published after this call, until it is cancelled.
    pub async fn subscribe(&self) -> ReadableStream {
        let (tx, rx) = async_channel::bounded(PIPE_CAPACITY);
        self.subscribers.lock().await.push(tx);
        ReadableStream::from_channel(rx)
    }

    /// Delivers `chunk` to every live subscriber, awaiting slow ones rather
    /// than dropping data. Dead subscribers are removed.
    pub async fn publish(&self, chunk: Bytes) {
        let mut subscribers = self.subscribers.lock().await;
        let mut dead = Vec::new();
        for (idx, tx) in subscribers.iter().enumerate() {
            if tx.send(chunk.clone()).await.is_err() {
                dead.push(idx);
            }
        }
        for idx in dead.into_iter().rev() {
            subscribers.swap_remove(idx);
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    /// Closes every subscriber stream.
    pub async fn close(&self) {
        let mut subscribers = self.subscribers.lock().await;
        for tx in subscribers.drain(..) {
            tx.close();
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn all_subscribers_observe_the_same_sequence() {
        let fanout = Fanout::new();
        let a = fanout.subscribe().await;
        let b = fanout.subscribe().await;

        for chunk in [&b"ls"[..], &b" -l"[..], &b"\n"[..]] {
            fanout.publish(Bytes::copy_from_slice(chunk)).await;
        }
        fanout.close().await;

        for stream in [a, b] {
            let mut reader = stream.lock().expect("lock");
            assert_eq!(crate::collect(&mut reader).await, b"ls -l\n".to_vec());
        }
    }

    #[tokio::test]
    async fn cancelled_subscriber_is_pruned() {
        let fanout = Fanout::new();
        let a = fanout.subscribe().await;
        let b = fanout.subscribe().await;
        assert_eq!(fanout.subscriber_count().await, 2);

        a.cancel();
        fanout.publish(Bytes::from_static(b"x")).await;
        assert_eq!(fanout.subscriber_count().await, 1);

        fanout.close().await;
        let mut reader = b.lock().expect("lock");
        assert_eq!(crate::collect(&mut reader).await, b"x".to_vec());
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_chunks() {
        let fanout = Fanout::new();
        fanout.publish(Bytes::from_static(b"early")).await;
        let late = fanout.subscribe().await;
        fanout.publish(Bytes::from_static(b"late")).await;
        fanout.close().await;

        let mut reader = late.lock().expect("lock");
        assert_eq!(crate::collect(&mut reader).await, b"late".to_vec());
    }
}
