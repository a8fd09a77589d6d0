#![forbid(unsafe_code)]
//! Batched, low-latency client for the Vowpal Wabbit CLI (`vw`) over
//! anonymous pipes.
//!
//! The crate shells out to a locally installed/pinned `vw` binary and
//! speaks its newline-delimited text protocol: one input line per item in,
//! one floating-point score per line out. Two clients cover the two ways of
//! doing that:
//!
//! - [`NonBlockingVowpalClient`] — the latency-oriented client. Both pipe
//!   descriptors run in non-blocking mode and a single-threaded scheduler
//!   interleaves generating lines, writing them (partial writes are
//!   buffered and retried) and draining results, all bounded by an
//!   optional per-call timeout. Predictions come back as a lazy iterator
//!   that yields as pipe data arrives; an elapsed timeout just ends the
//!   sequence early. Linux/Unix only.
//! - [`VowpalClient`] — the blocking counterpart with fixed-size batches
//!   and one batch in flight, which also supports training (optionally
//!   `write_only` for bulk training runs).
//!
//! Feature data reaches the wire through a [`VowpalFormatter`], which
//! splits a line into a per-call common part and a per-item part so the
//! shared half is formatted once. [`PassthroughFormatter`] is the
//! implementation for callers that already hold vw input-format strings.
//!
//! Binary resolution: an explicit [`builder`](NonBlockingVowpalClient::builder)
//! path, then the `VW_BINARY` environment variable, then `vw` on `PATH`.
//! The client owns the `-p` (prediction route) and `-a` (audit) flags;
//! everything else in `vw_args` passes through untouched.
//!
//! ```rust,no_run
//! use vowpal::{NonBlockingVowpalClient, PassthroughFormatter};
//! # use std::time::Duration;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = NonBlockingVowpalClient::builder(PassthroughFormatter)
//!     .vw_args(["--initial_regressor", "model.vw", "-t", "-q", "::"])
//!     .batch_size(20)
//!     .build()?;
//!
//! let common = "|user u1 visit_time_morning".to_string();
//! let items = (0..1000).map(|i| format!("|item i{i}"));
//! for score in client.predict(&common, items, Some(Duration::from_millis(10)))? {
//!     println!("{}", score?);
//! }
//! client.close()?;
//! # Ok(()) }
//! ```

#[cfg(not(unix))]
compile_error!("the vowpal crate drives vw over non-blocking anonymous pipes and only supports Unix");

mod args;
mod blocking;
mod error;
mod explanation;
mod formatter;
mod metrics;
mod nonblocking;
mod pending;
mod pipe;
mod process;
mod reader;
#[cfg(test)]
mod testutil;
mod writer;

pub use blocking::{BlockingPredictions, VowpalClient, VowpalClientBuilder};
pub use error::VowpalError;
pub use explanation::{parse_explanation, ExplanationFeature};
pub use formatter::{PassthroughFormatter, VowpalFormatter};
pub use metrics::{DetailedMetrics, PredictMetrics};
pub use nonblocking::{NonBlockingVowpalClient, NonBlockingVowpalClientBuilder, Predictions};
