//! Isolated batch executor (controller side).
//!
//! Every batch gets a freshly spawned worker process in its own process
//! group. The exchange is a single request on stdin and a single response
//! line on stdout, bounded by the batch deadline. Whatever happens, the
//! returned [`BatchOutcome`] holds exactly one result per item, in batch
//! order, and the worker has been reaped or killed.

use super::protocol::{BatchRequest, BatchResponse, WorkItem};
use super::termination::{Escalation, TerminationReport, TerminationState};
use crate::config::PipelineConfig;
use crate::error::ItemError;
use crate::item::{ConversionResult, FetchedItem};
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

/// Result of one executor invocation.
#[derive(Debug)]
pub struct BatchOutcome {
    pub worker_id: u64,
    /// One per input item, same order.
    pub results: Vec<ConversionResult>,
    /// `None` when the worker could not be spawned.
    pub termination: Option<TerminationReport>,
    pub timed_out: bool,
}

pub struct BatchExecutor {
    config: PipelineConfig,
    escalation: Escalation,
    next_worker_id: u64,
}

enum Exchange {
    Answered(String),
    Exited,
    Failed(std::io::Error),
    TimedOut,
}

impl BatchExecutor {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            config: config.clone(),
            escalation: Escalation::new(config.grace_period, config.kill_wait),
            next_worker_id: 1,
        }
    }

    /// Convert `items` in a new worker process.
    pub async fn execute(&mut self, items: &[FetchedItem]) -> BatchOutcome {
        let worker_id = self.next_worker_id;
        self.next_worker_id += 1;
        let deadline = self.config.batch_deadline(items.len());

        let request = BatchRequest {
            worker_id,
            items: items.iter().map(WorkItem::from).collect(),
            converter: self.config.converter.clone(),
            assets: self.config.assets.clone(),
        };
        let payload = match serde_json::to_vec(&request) {
            Ok(p) => p,
            Err(e) => {
                error!("Failed to encode request for worker {}: {}", worker_id, e);
                return BatchOutcome {
                    worker_id,
                    results: fail_all(items, ItemError::ProcessManagement {
                        detail: format!("encoding batch request: {e}"),
                    }),
                    termination: None,
                    timed_out: false,
                };
            }
        };

        let mut child = match self.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!(
                    "Failed to start worker {} ({}): {}",
                    worker_id,
                    self.config.worker.program.display(),
                    e
                );
                return BatchOutcome {
                    worker_id,
                    results: fail_all(items, ItemError::ProcessManagement {
                        detail: format!(
                            "spawning '{}': {e}",
                            self.config.worker.program.display()
                        ),
                    }),
                    termination: None,
                    timed_out: false,
                };
            }
        };
        let pgid = child.id();
        info!(
            "Worker {} (pid {:?}) processing batch of {} items, deadline {:?}",
            worker_id,
            pgid,
            items.len(),
            deadline
        );

        match exchange(&mut child, &payload, deadline).await {
            Exchange::Answered(line) => {
                let termination = self.escalation.reap(&mut child, pgid).await;
                let results = match serde_json::from_str::<BatchResponse>(&line) {
                    Ok(response) => {
                        if response.worker_id != worker_id {
                            warn!(
                                "Response from worker {} carries id {}",
                                worker_id, response.worker_id
                            );
                        }
                        reconcile(items, response.results)
                    }
                    Err(e) => {
                        error!("Unexpected result from worker {}: {}", worker_id, e);
                        fail_all(items, ItemError::MalformedResult {
                            detail: format!("unparseable response: {e}"),
                        })
                    }
                };
                BatchOutcome {
                    worker_id,
                    results,
                    termination: Some(termination),
                    timed_out: false,
                }
            }
            Exchange::Exited => {
                let termination = self.escalation.terminate(&mut child, pgid).await;
                let status = termination
                    .exit_status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "unknown status".to_string());
                error!("Worker {} exited without a result ({})", worker_id, status);
                BatchOutcome {
                    worker_id,
                    results: fail_all(items, ItemError::ProcessManagement {
                        detail: format!("worker exited without a result ({status})"),
                    }),
                    termination: Some(termination),
                    timed_out: false,
                }
            }
            Exchange::Failed(e) => {
                error!("I/O with worker {} failed: {}", worker_id, e);
                let termination = self.escalation.terminate(&mut child, pgid).await;
                BatchOutcome {
                    worker_id,
                    results: fail_all(items, ItemError::ProcessManagement {
                        detail: e.to_string(),
                    }),
                    termination: Some(termination),
                    timed_out: false,
                }
            }
            Exchange::TimedOut => {
                error!(
                    "Batch timeout after {:?} for worker {}, terminating",
                    deadline, worker_id
                );
                let termination = self.escalation.terminate(&mut child, pgid).await;
                if termination.state == TerminationState::Killed {
                    warn!("Worker {} had to be killed", worker_id);
                }
                BatchOutcome {
                    worker_id,
                    results: fail_all(items, ItemError::BatchTimeout {
                        secs: deadline.as_secs(),
                    }),
                    termination: Some(termination),
                    timed_out: true,
                }
            }
        }
    }

    fn spawn(&self) -> std::io::Result<Child> {
        let mut cmd = Command::new(&self.config.worker.program);
        cmd.args(&self.config.worker.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(device) = &self.config.accelerator_device {
            cmd.env("CUDA_VISIBLE_DEVICES", device);
        }
        #[cfg(unix)]
        cmd.process_group(0);
        cmd.spawn()
    }
}

/// Send the request and wait for the response line within `deadline`.
async fn exchange(child: &mut Child, payload: &[u8], deadline: Duration) -> Exchange {
    let (Some(mut stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        return Exchange::Failed(std::io::Error::other("worker stdio not captured"));
    };

    let conversation = async move {
        match stdin.write_all(payload).await {
            Ok(()) => {}
            // The worker may die before reading; its stdout tells us more.
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                debug!("Worker closed stdin before reading the request");
            }
            Err(e) => return Exchange::Failed(e),
        }
        drop(stdin);

        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => return Exchange::Answered(line),
                Ok(None) => return Exchange::Exited,
                Err(e) => return Exchange::Failed(e),
            }
        }
    };

    tokio::time::timeout(deadline, conversation)
        .await
        .unwrap_or(Exchange::TimedOut)
}

fn fail_all(items: &[FetchedItem], error: ItemError) -> Vec<ConversionResult> {
    items
        .iter()
        .map(|item| ConversionResult::failure(item.id(), error.clone()))
        .collect()
}

/// Line results up with the batch: first result per id wins, items the
/// worker forgot become malformed-result failures.
fn reconcile(items: &[FetchedItem], results: Vec<ConversionResult>) -> Vec<ConversionResult> {
    let mut by_id: HashMap<String, ConversionResult> = HashMap::with_capacity(results.len());
    for result in results {
        if !items.iter().any(|i| i.id() == result.id()) {
            warn!("Worker returned a result for unknown item {}", result.id());
            continue;
        }
        by_id.entry(result.id().to_string()).or_insert(result);
    }

    items
        .iter()
        .map(|item| {
            by_id.remove(item.id()).unwrap_or_else(|| {
                warn!("Worker returned no result for {}", item.id());
                ConversionResult::failure(
                    item.id(),
                    ItemError::MalformedResult {
                        detail: "no result for item".to_string(),
                    },
                )
            })
        })
        .collect()
}
