//! Ember - Streaming Buffering and Delim-Join Planning
//!
//! Ember is a fragment of an embedded analytical SQL engine: the
//! back-pressure-aware buffer that feeds a streaming query result from a
//! parallel pipeline, and the planning pass that builds duplicate-eliminated
//! joins for correlated subqueries.
//!
//! # Features
//!
//! - **Batch-ordered delivery**: parallel sink workers append record batches
//!   in arbitrary batch order; the consumer receives them in ascending batch
//!   order, chunks FIFO within a batch.
//! - **Two-tier back-pressure**: separate tuple budgets for the batch being
//!   consumed and for everything buffered ahead of it, with per-batch
//!   blocked-sink tokens to suspend and resume producers.
//! - **Consumer-driven execution**: the streaming result never blocks; when
//!   the buffer runs dry it drives pipeline tasks synchronously.
//! - **Delim-join planning**: join-side normalisation, delim-scan discovery,
//!   and the distinct aggregate that feeds duplicate-eliminated scans.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use arrow::datatypes::{DataType, Field, Schema};
//! use ember::{BufferConfig, StreamingResult, TaskExecutor};
//!
//! fn stream(executor: Arc<dyn TaskExecutor>) -> ember::Result<()> {
//!     let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int32, false)]));
//!     let mut result = StreamingResult::open(schema, BufferConfig::default(), executor);
//!
//!     while let Some(batch) = result.fetch()? {
//!         println!("got {} rows", batch.num_rows());
//!     }
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod error;
pub mod modifier;
pub mod planner;
pub mod streaming;

// Re-export commonly used types
pub use buffer::{
    BatchedBuffer, BlockedSink, BufferConfig, ExecutionStatus, TaskExecutor, WakeSignal,
};
pub use error::{EmberError, ErrorKind, PreservedError, Result};
pub use streaming::StreamingResult;

/// Prelude module for common imports.
pub mod prelude {
    pub use crate::buffer::{
        BatchedBuffer, BlockedSink, BufferConfig, ExecutionStatus, TaskExecutor, WakeSignal,
    };
    pub use crate::error::{EmberError, ErrorKind, PreservedError, Result};
    pub use crate::modifier::ResultModifier;
    pub use crate::planner::{LogicalPlan, PhysicalPlan, PhysicalPlanner};
    pub use crate::streaming::StreamingResult;
}
