//! Batch aggregator.

use super::producer::ProducerReport;
use super::queue::{Consumed, QueueConsumer};
use crate::item::FetchedItem;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Items collected for one executor invocation.
#[derive(Debug, Default)]
pub struct GatheredBatch {
    pub items: Vec<FetchedItem>,
    /// The batch reached `batch_size`.
    pub full: bool,
    /// No more items will arrive.
    pub ended: bool,
}

impl GatheredBatch {
    /// The controller loop stops after this batch.
    pub fn is_final(&self) -> bool {
        !self.full && self.ended
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

pub struct BatchAggregator {
    consumer: QueueConsumer,
    batch_size: usize,
    idle_timeout: Duration,
    ended: bool,
}

impl BatchAggregator {
    pub fn new(consumer: QueueConsumer, batch_size: usize, idle_timeout: Duration) -> Self {
        Self {
            consumer,
            batch_size: batch_size.max(1),
            idle_timeout,
            ended: false,
        }
    }

    /// Collect up to `batch_size` items.
    ///
    /// Returns early with `ended` set when the sentinel arrives, when the
    /// queue closes, or when an idle timeout finds the producer finished
    /// and nothing buffered. While the producer is alive an idle timeout
    /// only logs and keeps waiting.
    pub async fn gather(&mut self, producer: &JoinHandle<ProducerReport>) -> GatheredBatch {
        let mut batch = GatheredBatch::default();
        if self.ended {
            batch.ended = true;
            return batch;
        }

        while batch.items.len() < self.batch_size {
            match self.consumer.consume(self.idle_timeout).await {
                Consumed::Item(item) => {
                    debug!("Queued {} for the next batch", item.id());
                    batch.items.push(item);
                }
                Consumed::EndOfStream => {
                    info!("Received end-of-stream from the producer");
                    self.ended = true;
                    break;
                }
                Consumed::Closed => {
                    warn!("Prefetch queue closed without end-of-stream");
                    self.ended = true;
                    break;
                }
                Consumed::Idle => {
                    if producer.is_finished() && self.consumer.is_empty() {
                        warn!(
                            "No items for {:?} and the producer has exited; ending stream",
                            self.idle_timeout
                        );
                        self.ended = true;
                        break;
                    }
                    info!(
                        "Waiting for downloads ({} of {} items gathered)...",
                        batch.items.len(),
                        self.batch_size
                    );
                }
            }
        }

        batch.full = batch.items.len() == self.batch_size;
        batch.ended = self.ended;
        batch
    }
}
