//! Fan-in merging for `Stream`s (also known as `AsyncIterator`).
//!
//! A [`Merger`] takes any number of independently produced, independently
//! closable streams and forwards their values into a single output stream.
//! It is built around two rules:
//!
//! - A source that is exhausted is removed from the set of sources being
//!   waited on. It is never polled again, so a closed source cannot make the
//!   merger spin.
//! - The output is closed by exactly one party, the merger, and only once a
//!   single completion count says every source has closed (or the merge was
//!   cancelled). No individual source can close it, and it is never left
//!   open.
//!
//! Values from one source arrive in the order that source produced them.
//! There is no ordering between sources, but ready sources are serviced
//! round-robin so none of them starves.
//!
//! # Examples
//!
//! Merge two streams and read the result:
//!
//! ```rust
//! use futures_fan_in::Merger;
//! use futures_lite::future::block_on;
//! use futures_lite::{stream, StreamExt};
//!
//! block_on(async {
//!     let a = stream::iter(vec![1, 2, 3]);
//!     let b = stream::iter(vec![4, 5, 6]);
//!
//!     // A capacity of 0 selects an unbounded output.
//!     let mut merger = Merger::new(vec![a, b], 0);
//!     let output = merger.output().unwrap();
//!     merger.run_to_completion().await.unwrap();
//!
//!     let mut values: Vec<_> = output.collect().await;
//!     values.sort_unstable();
//!     assert_eq!(values, [1, 2, 3, 4, 5, 6]);
//! })
//! ```
//!
//! Stop early with a cancellation signal. Any future can serve as the
//! signal; the merge stops as soon as it resolves:
//!
//! ```rust
//! use futures_fan_in::{MergeError, Merger};
//! use futures_lite::future::{self, block_on};
//! use futures_lite::{stream, StreamExt};
//!
//! block_on(async {
//!     let mut merger = Merger::new(vec![stream::repeat(1u8)], 4);
//!     let mut output = merger.output().unwrap();
//!
//!     let res = merger.run(future::ready(())).await;
//!     assert_eq!(res, Err(MergeError::Cancelled));
//!     assert_eq!(output.next().await, None);
//! })
//! ```
//!
//! # Building blocks
//!
//! The merger is assembled from parts that can also be used on their own:
//!
//! - [`source::SourceHandle`]: one producer stream plus its `Active`/`Closed` state.
//! - [`readiness::ReadinessSet`]: the active sources, with `wait_any` to await
//!   the next event from any of them.
//! - [`tracker::CompletionTracker`]: the count of sources still active.
//! - [`sink::OutputSink`] and [`sink::Output`]: the two halves of the output
//!   channel.

#![deny(missing_debug_implementations, nonstandard_style)]
#![warn(missing_docs, unreachable_pub)]

mod merger;
mod utils;

pub mod error;
pub mod readiness;
pub mod sink;
pub mod source;
pub mod tracker;

pub use error::MergeError;
pub use merger::{MergeStats, Merger, MergerBuilder, Registrar, Run, State};
pub use source::{BoxSource, Event, SourceId};
