//! Keel Settlement - batch records and their lifecycle
//!
//! A batch is created from a sequencer output plus the state root returned by the
//! execution collaborator, goes pending while consensus votes, and ends up finalized or
//! rejected. Batch ids are monotonic and never reused; finalized records are immutable
//! and shared as `Arc<Batch>`.

pub mod batch;
pub mod error;
pub mod execution;
pub mod store;

pub use batch::{Batch, BatchStatus};
pub use error::SettlementError;
pub use execution::{ExecutionEngine, PlaceholderExecutor};
pub use store::{FinalizeOutcome, Settlement, SettlementStats};
