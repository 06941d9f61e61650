//! Pipeline stages between discovery and durable state.
//!
//! Each submodule implements exactly one stage. Only the producer runs
//! concurrently with the rest; everything else runs on the controller task,
//! which is therefore the single writer of the checkpoint and output log.
//!
//! ## Data Flow
//!
//! ```text
//! producer ──▶ queue ──▶ aggregate ──▶ executor ──▶ sink
//! (fetch)     (bounded)  (batches)    (worker      (output log,
//!                                      process)     checkpoint)
//! ```
//!
//! 1. [`producer`]  — download items in order into scratch storage; runs as
//!    its own task and records fetch failures without stopping
//! 2. [`queue`]     — bounded hand-off; the capacity is the prefetch limit
//! 3. [`aggregate`] — pull up to `batch_size` items, tolerating idle gaps
//!    while the producer is alive
//! 4. [`executor`]  — run one batch in a fresh OS process under a deadline,
//!    escalating via [`termination`] when it does not exit on its own;
//!    [`protocol`] is what crosses the process boundary
//! 5. [`sink`]      — commit outcomes (output first, then checkpoint) and
//!    release scratch storage

pub mod aggregate;
pub mod executor;
pub mod producer;
pub mod protocol;
pub mod queue;
pub mod sink;
pub mod termination;
