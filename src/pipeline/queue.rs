//! Prefetch queue: the bounded channel between producer and controller.
//!
//! Its capacity (`prefetch_factor × batch_size`) is the only limit on how
//! far downloading may run ahead of conversion. The end of the stream is an
//! explicit sentinel; [`QueuePublisher::finish`] consumes the publisher so
//! it can be sent only once.

use crate::item::FetchedItem;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

enum QueueMessage {
    Item(FetchedItem),
    EndOfStream,
}

/// What one [`QueueConsumer::consume`] call produced.
#[derive(Debug)]
pub enum Consumed {
    Item(FetchedItem),
    /// The sentinel. Returned at most once.
    EndOfStream,
    /// Nothing arrived within the idle timeout.
    Idle,
    /// The publisher is gone without (further) sentinel.
    Closed,
}

/// The consumer is gone; the item comes back so its scratch can be released.
#[derive(Debug)]
pub struct QueueClosed(pub FetchedItem);

/// Create a queue holding at most `capacity` items.
pub fn prefetch_queue(capacity: usize) -> (QueuePublisher, QueueConsumer) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    (
        QueuePublisher { tx, capacity },
        QueueConsumer { rx, ended: false },
    )
}

pub struct QueuePublisher {
    tx: mpsc::Sender<QueueMessage>,
    capacity: usize,
}

impl QueuePublisher {
    /// Publish an item, suspending while the queue is full.
    pub async fn publish(&self, item: FetchedItem) -> Result<(), QueueClosed> {
        if self.tx.capacity() == 0 {
            info!(
                "Prefetch queue is FULL ({}/{}). Waiting for the controller to consume items...",
                self.len(),
                self.capacity
            );
        }
        self.tx
            .send(QueueMessage::Item(item))
            .await
            .map_err(|e| match e.0 {
                QueueMessage::Item(item) => QueueClosed(item),
                QueueMessage::EndOfStream => unreachable!("only items are published"),
            })
    }

    /// Items currently buffered.
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Send the end-of-stream sentinel. Returns `false` if nobody is listening.
    pub async fn finish(self) -> bool {
        self.tx.send(QueueMessage::EndOfStream).await.is_ok()
    }
}

pub struct QueueConsumer {
    rx: mpsc::Receiver<QueueMessage>,
    ended: bool,
}

impl QueueConsumer {
    /// Wait up to `idle_timeout` for the next message.
    pub async fn consume(&mut self, idle_timeout: Duration) -> Consumed {
        if self.ended {
            return Consumed::Closed;
        }
        match tokio::time::timeout(idle_timeout, self.rx.recv()).await {
            Ok(Some(QueueMessage::Item(item))) => Consumed::Item(item),
            Ok(Some(QueueMessage::EndOfStream)) => {
                self.ended = true;
                Consumed::EndOfStream
            }
            Ok(None) => {
                self.ended = true;
                Consumed::Closed
            }
            Err(_) => Consumed::Idle,
        }
    }

    /// True if nothing is buffered right now.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::item::{ItemDescriptor, ScratchDir};
    use tokio_test::{assert_pending, assert_ready};

    pub(crate) fn fetched(id: &str) -> FetchedItem {
        let dir = tempfile::tempdir().unwrap();
        let payload_path = dir.path().join(format!("{id}.pdf"));
        std::fs::write(&payload_path, format!("# {id}\n")).unwrap();
        FetchedItem {
            descriptor: ItemDescriptor::new(id, format!("gs://bucket/{id}.pdf")),
            payload_path,
            scratch: ScratchDir::new(dir),
        }
    }

    #[tokio::test]
    async fn publish_suspends_when_full() {
        let (publisher, mut consumer) = prefetch_queue(2);
        publisher.publish(fetched("a")).await.unwrap();
        publisher.publish(fetched("b")).await.unwrap();
        assert_eq!(publisher.len(), 2);

        let mut third = tokio_test::task::spawn(publisher.publish(fetched("c")));
        assert_pending!(third.poll());

        match consumer.consume(Duration::from_secs(1)).await {
            Consumed::Item(item) => assert_eq!(item.id(), "a"),
            other => panic!("expected item, got {other:?}"),
        }
        assert!(third.is_woken());
        assert_ready!(third.poll()).unwrap();
        drop(third);
        assert_eq!(publisher.len(), 2);
    }

    #[tokio::test]
    async fn fifo_then_single_sentinel() {
        let (publisher, mut consumer) = prefetch_queue(4);
        publisher.publish(fetched("a")).await.unwrap();
        publisher.publish(fetched("b")).await.unwrap();
        assert!(publisher.finish().await);

        let t = Duration::from_millis(100);
        let mut order = Vec::new();
        loop {
            match consumer.consume(t).await {
                Consumed::Item(item) => order.push(item.id().to_string()),
                Consumed::EndOfStream => break,
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(order, vec!["a", "b"]);
        assert!(matches!(consumer.consume(t).await, Consumed::Closed));
    }

    #[tokio::test]
    async fn idle_timeout_and_closed_publisher() {
        let (publisher, mut consumer) = prefetch_queue(1);
        assert!(matches!(
            consumer.consume(Duration::from_millis(20)).await,
            Consumed::Idle
        ));
        drop(publisher);
        assert!(matches!(
            consumer.consume(Duration::from_millis(20)).await,
            Consumed::Closed
        ));
    }

    #[tokio::test]
    async fn publish_to_dropped_consumer_returns_item() {
        let (publisher, consumer) = prefetch_queue(1);
        drop(consumer);
        let QueueClosed(item) = publisher.publish(fetched("a")).await.unwrap_err();
        assert_eq!(item.id(), "a");
    }
}
