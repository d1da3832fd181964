//! Telemetry for the generation saga.
//!
//! The orchestrator emits a [`GenerationEvent`] at each notable step (rate limited,
//! debited, refunded, refund failed, completed, failed). Events flow through
//! [`TelemetrySink`] implementations which can log, aggregate, or forward them to
//! external systems. The companion crates provide a JSONL audit sink and a
//! Prometheus counter sink.
//!
//! ```rust
//! use studyforge::telemetry::{emit_best_effort, GenerationEvent, MemorySink};
//! use studyforge::{RequestKind, UserId};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let sink = MemorySink::new();
//! emit_best_effort(
//!     sink.clone(),
//!     GenerationEvent::Debited { user: UserId::new(), kind: RequestKind::Quiz, amount: 15, balance: 385 },
//! )
//! .await;
//! assert_eq!(sink.len(), 1);
//! # });
//! ```

pub mod events;
pub mod sinks;

pub use events::{event_to_json, GenerationEvent};
pub use sinks::{
    emit_best_effort, ComposedSinkError, LogSink, MemorySink, MulticastSink, NullSink, TelemetrySink,
};
