//! Download producer.
//!
//! Fetches pending items strictly in order and publishes them into the
//! prefetch queue, suspending when it is full. A failed fetch is reported to
//! the controller over an unbounded channel and the producer moves on; the
//! controller is the one that checkpoints it. The end-of-stream sentinel is
//! sent on every exit path except a dropped consumer.

use super::queue::{QueueClosed, QueuePublisher};
use crate::error::FetchError;
use crate::item::ItemDescriptor;
use crate::source::Fetcher;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

/// A permanent fetch failure for one item.
#[derive(Debug)]
pub struct FetchFailure {
    pub id: String,
    pub error: FetchError,
}

/// What the producer did before it exited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerReport {
    pub downloaded: usize,
    pub failed: usize,
    /// True if the consumer went away before every item was published.
    pub aborted: bool,
}

pub struct DownloadProducer {
    fetcher: Arc<dyn Fetcher>,
    scratch_root: PathBuf,
    fetch_timeout: Duration,
}

impl DownloadProducer {
    pub fn new(fetcher: Arc<dyn Fetcher>, scratch_root: PathBuf, fetch_timeout: Duration) -> Self {
        Self {
            fetcher,
            scratch_root,
            fetch_timeout,
        }
    }

    pub async fn run(
        self,
        items: Vec<ItemDescriptor>,
        publisher: QueuePublisher,
        failures: UnboundedSender<FetchFailure>,
    ) -> ProducerReport {
        let total = items.len();
        let mut report = ProducerReport::default();

        for (index, item) in items.into_iter().enumerate() {
            debug!("Downloading {} ({}/{})", item.id, index + 1, total);

            let fetched = match tokio::time::timeout(
                self.fetch_timeout,
                self.fetcher.fetch(&item, &self.scratch_root),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout {
                    secs: self.fetch_timeout.as_secs(),
                }),
            };

            match fetched {
                Ok(fetched) => {
                    if let Err(QueueClosed(item)) = publisher.publish(fetched).await {
                        warn!("Controller stopped consuming; discarding {}", item.id());
                        item.release();
                        report.aborted = true;
                        return report;
                    }
                    report.downloaded += 1;
                }
                Err(e) => {
                    error!("Failed to download {}: {}", item.id, e);
                    report.failed += 1;
                    if failures
                        .send(FetchFailure {
                            id: item.id,
                            error: e,
                        })
                        .is_err()
                    {
                        report.aborted = true;
                        return report;
                    }
                }
            }
        }

        info!(
            "Producer finished: {} downloaded, {} failed",
            report.downloaded, report.failed
        );
        if !publisher.finish().await {
            report.aborted = true;
        }
        report
    }
}
