//! Batched streaming buffer.
//!
//! This module provides the back-pressure-aware queue that sits between a
//! parallel pipeline's sink workers (producers) and the single consumer of a
//! streaming query result. Parallel workers emit record batches tagged with a
//! batch index in arbitrary arrival order; the buffer hands them to the
//! consumer in ascending batch order.
//!
//! # Design
//!
//! - **Two-tier admission**: the batch currently being consumed (the one at
//!   the `min_batch` watermark) has its own tuple budget; all future batches
//!   share a second budget. Only the current batch can be scanned, so
//!   buffering future batches eagerly trades memory for producer progress
//!   without improving consumer latency.
//! - **Blocked sinks**: a producer that sees the buffer full suspends itself
//!   and registers a [`BlockedSink`] token (at most one per batch index). The
//!   consumer-driven [`BatchedBuffer::unblock_sinks`] sweep wakes tokens whose
//!   budget has freed up; [`BatchedBuffer::close`] wakes every remaining token
//!   with a cancellation signal.
//! - **Watermark promotion**: [`BatchedBuffer::update_min_batch`] is the only
//!   path by which chunks move from a future batch into the scannable queue.
//!
//! A single coarse mutex guards all buffer state: the tuple counters, the
//! watermark, and both batch maps are coupled by the invariants, and every
//! critical section is short.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use arrow::record_batch::RecordBatch;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{EmberError, Result};

// ---------------------------------------------------------------------------
// Task system contract
// ---------------------------------------------------------------------------

/// Outcome of driving the pipeline, shared between the task system and the
/// buffer's replenish step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// The current batch holds enough tuples for the consumer to scan.
    ResultReady,
    /// A task ran but the result is not ready yet.
    ResultNotReady,
    /// The task suspended itself waiting on buffer capacity.
    Blocked,
    /// The pipeline has produced everything it will produce.
    ExecutionFinished,
    /// Execution failed, or the buffer was closed underneath the pipeline.
    ExecutionError,
}

impl ExecutionStatus {
    /// Returns `true` once no further tasks will make progress.
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            ExecutionStatus::ExecutionFinished | ExecutionStatus::ExecutionError
        )
    }
}

/// The slice of the execution context the buffer drives while replenishing.
///
/// The buffer holds this weakly: it must not extend the owning context's
/// lifetime, and it upgrades the handle only for the duration of a replenish
/// loop. Task execution errors are returned unchanged to the caller of
/// [`BatchedBuffer::replenish`].
pub trait TaskExecutor: Send + Sync {
    /// Execute one pipeline task synchronously.
    fn execute_task(&self) -> Result<ExecutionStatus>;
}

// ---------------------------------------------------------------------------
// Blocked sinks
// ---------------------------------------------------------------------------

/// Why a blocked sink's callback is being invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeSignal {
    /// Buffer capacity freed up; the producer task should be rescheduled.
    Resume,
    /// The buffer was closed; the producer task should unwind.
    Cancelled,
}

/// A suspension record for a sink worker that was admitted into the pipeline
/// but paused because the buffer was full.
///
/// The token owns a one-shot callback that reschedules (or cancels) the
/// suspended task. The buffer invokes it at most once, after releasing its
/// internal lock; the callback must not call back into the buffer
/// synchronously.
pub struct BlockedSink {
    callback: Box<dyn FnOnce(WakeSignal) + Send>,
}

impl BlockedSink {
    /// Create a token from the task system's resumption callback.
    pub fn new(callback: impl FnOnce(WakeSignal) + Send + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }

    fn wake(self, signal: WakeSignal) {
        (self.callback)(signal);
    }
}

impl fmt::Debug for BlockedSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockedSink").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuple budgets for the batched buffer.
///
/// The current-batch budget is typically the larger of the two: only the
/// current batch is ever delivered to the consumer, while future batches are
/// held purely so producers can keep working ahead of the watermark.
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Target tuple count buffered for the current batch.
    pub current_batch_buffer_size: usize,
    /// Target tuple count buffered across all future batches combined.
    pub other_batches_buffer_size: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            current_batch_buffer_size: 100_000,
            other_batches_buffer_size: 50_000,
        }
    }
}

impl BufferConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the current-batch tuple budget.
    ///
    /// # Panics
    /// Panics if `size` is 0.
    pub fn with_current_batch_buffer_size(mut self, size: usize) -> Self {
        assert!(size > 0, "current batch buffer size must be positive");
        self.current_batch_buffer_size = size;
        self
    }

    /// Set the combined future-batches tuple budget.
    ///
    /// # Panics
    /// Panics if `size` is 0.
    pub fn with_other_batches_buffer_size(mut self, size: usize) -> Self {
        assert!(size > 0, "other batches buffer size must be positive");
        self.other_batches_buffer_size = size;
        self
    }
}

// ---------------------------------------------------------------------------
// Buffer state
// ---------------------------------------------------------------------------

/// Chunks of a batch that is still ahead of the watermark.
#[derive(Default)]
struct InProgressBatch {
    chunks: Vec<RecordBatch>,
    /// Set once the producer declared the batch done. Reset by any further
    /// append for the same batch.
    completed: bool,
}

struct BufferState {
    /// Smallest batch index not yet fully handed to the consumer. Never
    /// decreases.
    min_batch: u64,
    /// Chunks of the current batch, consumed FIFO.
    batches: VecDeque<RecordBatch>,
    /// Future batches keyed by batch index, iterated in ascending order.
    in_progress: BTreeMap<u64, InProgressBatch>,
    /// Sum of `num_rows` over `batches`.
    current_tuples: usize,
    /// Sum of `num_rows` over all `in_progress` chunks.
    other_tuples: usize,
    /// At most one suspended producer per batch index.
    blocked_sinks: BTreeMap<u64, BlockedSink>,
    /// Weak handle to the owning execution context; cleared when the
    /// consumer drains the stream.
    context: Option<Weak<dyn TaskExecutor>>,
}

/// The batch-ordered producer/consumer buffer behind a streaming query
/// result.
///
/// All operations are thread-safe. Producers call [`append`],
/// [`complete_batch`], [`should_block`] and [`block_sink`]; the consumer side
/// calls [`replenish`], [`scan`], [`update_min_batch`] and [`close`].
///
/// [`append`]: BatchedBuffer::append
/// [`complete_batch`]: BatchedBuffer::complete_batch
/// [`should_block`]: BatchedBuffer::should_block
/// [`block_sink`]: BatchedBuffer::block_sink
/// [`replenish`]: BatchedBuffer::replenish
/// [`scan`]: BatchedBuffer::scan
/// [`update_min_batch`]: BatchedBuffer::update_min_batch
/// [`close`]: BatchedBuffer::close
pub struct BatchedBuffer {
    config: BufferConfig,
    state: Mutex<BufferState>,
    /// Sticky closed flag, readable without the state lock.
    closed: AtomicBool,
}

impl BatchedBuffer {
    /// Create a buffer with no execution context attached.
    ///
    /// [`replenish`](Self::replenish) reports the pipeline as finished until
    /// an executor is attached via [`with_executor`](Self::with_executor).
    pub fn new(config: BufferConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BufferState {
                min_batch: 0,
                batches: VecDeque::new(),
                in_progress: BTreeMap::new(),
                current_tuples: 0,
                other_tuples: 0,
                blocked_sinks: BTreeMap::new(),
                context: None,
            }),
            closed: AtomicBool::new(false),
        }
    }

    /// Create a buffer wired to the execution context that produces into it.
    pub fn with_executor(config: BufferConfig, executor: Weak<dyn TaskExecutor>) -> Self {
        let buffer = Self::new(config);
        buffer.state.lock().context = Some(executor);
        buffer
    }

    /// The configured tuple budgets.
    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    // -- producer side --

    /// Append a chunk for `batch`.
    ///
    /// Chunks for the current batch become scannable immediately; chunks for
    /// a future batch are parked until the watermark reaches them. Appending
    /// to a batch that was already marked complete re-opens it.
    ///
    /// Appending below the watermark is a caller bug: by contract a sink
    /// never emits for a batch the consumer has moved past.
    pub fn append(&self, chunk: RecordBatch, batch: u64) -> Result<()> {
        if self.is_closed() {
            return Err(EmberError::stream_closed(
                "cannot append to a closed result buffer",
            ));
        }
        let state = &mut *self.state.lock();
        if batch < state.min_batch {
            return Err(EmberError::internal(format!(
                "append for batch {} below the minimum batch index {}",
                batch, state.min_batch
            )));
        }
        let tuples = chunk.num_rows();
        if batch == state.min_batch {
            state.current_tuples += tuples;
            state.batches.push_back(chunk);
        } else {
            let entry = state.in_progress.entry(batch).or_default();
            entry.completed = false;
            entry.chunks.push(chunk);
            state.other_tuples += tuples;
        }
        trace!(
            batch,
            min_batch = state.min_batch,
            tuples,
            current_tuples = state.current_tuples,
            other_tuples = state.other_tuples,
            "append"
        );
        Ok(())
    }

    /// Mark `batch` as fully produced.
    ///
    /// Ignored when the batch is not in progress: it was either the current
    /// batch (already scannable) or never received a chunk.
    pub fn complete_batch(&self, batch: u64) {
        let mut state = self.state.lock();
        if let Some(entry) = state.in_progress.get_mut(&batch) {
            entry.completed = true;
            trace!(batch, chunks = entry.chunks.len(), "batch completed");
        }
    }

    /// Advisory admission check for a sink about to produce into `batch`.
    ///
    /// A sink observing `false` may still overshoot the budget by the one
    /// chunk it appends next; the sink task framework serialises the check
    /// and the append per producer, which bounds the overshoot.
    pub fn should_block(&self, batch: u64) -> bool {
        let state = self.state.lock();
        if batch == state.min_batch {
            state.current_tuples >= self.config.current_batch_buffer_size
        } else {
            state.other_tuples >= self.config.other_batches_buffer_size
        }
    }

    /// Register a suspended producer for `batch`.
    ///
    /// Called after the sink observed [`should_block`](Self::should_block)
    /// return `true` and arranged to suspend its task. Registering a second
    /// sink for the same batch is a caller bug. On a closed buffer the token
    /// is immediately woken with [`WakeSignal::Cancelled`].
    pub fn block_sink(&self, sink: BlockedSink, batch: u64) -> Result<()> {
        if self.is_closed() {
            sink.wake(WakeSignal::Cancelled);
            return Err(EmberError::stream_closed(
                "cannot block a sink on a closed result buffer",
            ));
        }
        let mut state = self.state.lock();
        if state.blocked_sinks.contains_key(&batch) {
            return Err(EmberError::internal(format!(
                "a blocked sink is already registered for batch {}",
                batch
            )));
        }
        trace!(batch, "sink blocked");
        state.blocked_sinks.insert(batch, sink);
        Ok(())
    }

    /// Wake every blocked sink whose tuple budget has freed up.
    ///
    /// Tokens that remain over budget stay registered. Wake order is
    /// unspecified.
    pub fn unblock_sinks(&self) {
        let woken = {
            let state = &mut *self.state.lock();
            let ready: Vec<u64> = state
                .blocked_sinks
                .keys()
                .copied()
                .filter(|&batch| {
                    if batch == state.min_batch {
                        state.current_tuples < self.config.current_batch_buffer_size
                    } else {
                        state.other_tuples < self.config.other_batches_buffer_size
                    }
                })
                .collect();
            ready
                .into_iter()
                .filter_map(|batch| state.blocked_sinks.remove(&batch).map(|sink| (batch, sink)))
                .collect::<Vec<_>>()
        };
        for (batch, sink) in woken {
            trace!(batch, "unblocking sink");
            sink.wake(WakeSignal::Resume);
        }
    }

    // -- consumer side --

    /// Advance the watermark to at least `candidate` and promote every
    /// in-progress batch the consumer is now authorised to drain.
    ///
    /// Promotion walks future batches in ascending order and stops at the
    /// first batch beyond the new watermark, or at the first incomplete batch
    /// other than the watermark batch itself. The watermark batch promotes
    /// regardless of its completion flag: the consumer may drain whatever is
    /// ready for the batch it has reached. This is the only path that moves
    /// chunks out of the in-progress set.
    pub fn update_min_batch(&self, candidate: u64) {
        let state = &mut *self.state.lock();
        Self::update_min_batch_locked(state, candidate);
    }

    fn update_min_batch_locked(state: &mut BufferState, candidate: u64) {
        state.min_batch = state.min_batch.max(candidate);

        let mut promoted = Vec::new();
        for (&batch, entry) in state.in_progress.iter() {
            if batch > state.min_batch {
                // Still in progress, cannot be scanned yet.
                break;
            }
            if batch != state.min_batch && !entry.completed {
                break;
            }
            promoted.push(batch);
        }
        for batch in promoted {
            if let Some(entry) = state.in_progress.remove(&batch) {
                let mut tuples = 0;
                for chunk in entry.chunks {
                    tuples += chunk.num_rows();
                    state.batches.push_back(chunk);
                }
                state.other_tuples -= tuples;
                state.current_tuples += tuples;
                trace!(batch, tuples, "promoted batch to the scannable queue");
            }
        }
        trace!(
            min_batch = state.min_batch,
            current_tuples = state.current_tuples,
            other_tuples = state.other_tuples,
            "advanced minimum batch index"
        );
    }

    /// Dequeue at most one chunk for the consumer.
    ///
    /// When the current batch is drained but the next in-progress batch is
    /// already complete, the watermark auto-advances and the scan retries.
    /// `None` marks the end of the stream: the buffer releases its claim on
    /// the execution context, and by then no producer can still be parked.
    pub fn scan(&self) -> Option<RecordBatch> {
        let mut chunk = self.pop_scan_chunk();
        if chunk.is_none() {
            let next_completed = {
                let state = self.state.lock();
                state
                    .in_progress
                    .iter()
                    .next()
                    .and_then(|(&batch, entry)| entry.completed.then_some(batch))
            };
            if let Some(batch) = next_completed {
                self.update_min_batch(batch);
                chunk = self.pop_scan_chunk();
            }
        }
        if chunk.is_none() {
            let state = &mut *self.state.lock();
            state.context = None;
            debug_assert!(state.blocked_sinks.is_empty());
            debug_assert!(state.in_progress.is_empty());
            debug!("stream drained");
            return None;
        }
        chunk
    }

    fn pop_scan_chunk(&self) -> Option<RecordBatch> {
        let state = &mut *self.state.lock();
        let chunk = state.batches.pop_front()?;
        state.current_tuples -= chunk.num_rows();
        trace!(
            min_batch = state.min_batch,
            tuples = chunk.num_rows(),
            current_tuples = state.current_tuples,
            "scan"
        );
        Some(chunk)
    }

    /// Drive the pipeline until the buffer holds enough to scan or execution
    /// finishes.
    ///
    /// Before each task the blocked-sink sweep runs, so capacity freed by the
    /// consumer reaches suspended producers. Task execution errors pass
    /// through unchanged.
    pub fn replenish(&self) -> Result<ExecutionStatus> {
        if self.is_closed() {
            return Ok(ExecutionStatus::ExecutionError);
        }
        if self.buffer_is_full() {
            // There is data to scan already, just return.
            return Ok(ExecutionStatus::ResultReady);
        }
        let Some(executor) = self.executor() else {
            return Ok(ExecutionStatus::ExecutionFinished);
        };
        self.unblock_sinks();
        let mut status = executor.execute_task()?;
        // Let the executor run until the buffer is no longer starved.
        while !status.is_finished() {
            if self.buffer_is_full() {
                break;
            }
            // More capacity may have opened up below the budgets; check if
            // any sinks can be unblocked before running the next task.
            self.unblock_sinks();
            status = executor.execute_task()?;
        }
        Ok(status)
    }

    /// Whether the buffer has reached either tuple budget.
    ///
    /// Always `false` while the current batch is empty: the consumer must not
    /// be starved, so replenishing continues until execution finishes through
    /// another condition.
    pub fn buffer_is_full(&self) -> bool {
        let state = self.state.lock();
        if state.batches.is_empty() {
            return false;
        }
        state.current_tuples >= self.config.current_batch_buffer_size
            || state.other_tuples >= self.config.other_batches_buffer_size
    }

    /// Close the buffer.
    ///
    /// Sticky and idempotent. Every registered blocked sink is woken with
    /// [`WakeSignal::Cancelled`] so suspended producer tasks unwind instead
    /// of hanging; subsequent appends fail with a closed-stream error.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let cancelled: Vec<BlockedSink> = {
            let mut state = self.state.lock();
            std::mem::take(&mut state.blocked_sinks)
                .into_values()
                .collect()
        };
        if !cancelled.is_empty() {
            debug!(count = cancelled.len(), "cancelling blocked sinks on close");
        }
        for sink in cancelled {
            sink.wake(WakeSignal::Cancelled);
        }
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // -- introspection --

    /// The current watermark.
    pub fn min_batch(&self) -> u64 {
        self.state.lock().min_batch
    }

    /// Tuples buffered for the current batch.
    pub fn current_tuple_count(&self) -> usize {
        self.state.lock().current_tuples
    }

    /// Tuples buffered across all future batches.
    pub fn other_tuple_count(&self) -> usize {
        self.state.lock().other_tuples
    }

    /// Number of producers currently parked on the buffer.
    pub fn blocked_sink_count(&self) -> usize {
        self.state.lock().blocked_sinks.len()
    }

    fn executor(&self) -> Option<Arc<dyn TaskExecutor>> {
        let state = self.state.lock();
        state.context.as_ref().and_then(Weak::upgrade)
    }
}

impl fmt::Debug for BatchedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BatchedBuffer")
            .field("min_batch", &state.min_batch)
            .field("current_tuples", &state.current_tuples)
            .field("other_tuples", &state.other_tuples)
            .field("in_progress_batches", &state.in_progress.len())
            .field("blocked_sinks", &state.blocked_sinks.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int32Array;
    use arrow::datatypes::{DataType, Field, Schema};
    use std::collections::VecDeque;
    use std::sync::Arc;

    fn chunk(rows: usize) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int32, false)]));
        let values: Vec<i32> = (0..rows as i32).collect();
        RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from(values))]).unwrap()
    }

    fn buffer(current: usize, other: usize) -> BatchedBuffer {
        BatchedBuffer::new(
            BufferConfig::new()
                .with_current_batch_buffer_size(current)
                .with_other_batches_buffer_size(other),
        )
    }

    /// Executor that pops queued closures; reports finished when drained.
    #[derive(Default)]
    struct QueueExecutor {
        tasks: Mutex<VecDeque<Box<dyn FnOnce() -> Result<ExecutionStatus> + Send>>>,
    }

    impl QueueExecutor {
        fn push(&self, task: impl FnOnce() -> Result<ExecutionStatus> + Send + 'static) {
            self.tasks.lock().push_back(Box::new(task));
        }
    }

    impl TaskExecutor for QueueExecutor {
        fn execute_task(&self) -> Result<ExecutionStatus> {
            let task = self.tasks.lock().pop_front();
            match task {
                Some(task) => task(),
                None => Ok(ExecutionStatus::ExecutionFinished),
            }
        }
    }

    #[test]
    fn test_append_accounts_tuples_per_tier() {
        let buffer = buffer(100, 100);

        buffer.append(chunk(10), 0).unwrap();
        buffer.append(chunk(5), 2).unwrap();
        buffer.append(chunk(7), 2).unwrap();
        buffer.append(chunk(3), 4).unwrap();

        assert_eq!(buffer.current_tuple_count(), 10);
        assert_eq!(buffer.other_tuple_count(), 15);
        assert_eq!(buffer.min_batch(), 0);
    }

    #[test]
    fn test_should_block_checks_the_right_budget() {
        let buffer = buffer(10, 5);

        buffer.append(chunk(10), 0).unwrap();
        assert!(buffer.should_block(0));
        assert!(!buffer.should_block(1));

        buffer.append(chunk(5), 1).unwrap();
        assert!(buffer.should_block(1));
        assert!(buffer.should_block(7));
    }

    #[test]
    fn test_append_reopens_a_completed_batch() {
        let buffer = buffer(100, 100);

        buffer.append(chunk(4), 1).unwrap();
        buffer.complete_batch(1);
        // A late append invalidates the completion.
        buffer.append(chunk(4), 1).unwrap();
        buffer.append(chunk(2), 2).unwrap();
        buffer.complete_batch(2);

        // The promotion walk must stop at the re-opened batch 1, leaving the
        // completed batch 2 parked behind it.
        buffer.update_min_batch(2);
        assert_eq!(buffer.current_tuple_count(), 0);
        assert_eq!(buffer.other_tuple_count(), 10);

        buffer.complete_batch(1);
        buffer.update_min_batch(2);
        assert_eq!(buffer.current_tuple_count(), 10);
        assert_eq!(buffer.other_tuple_count(), 0);
    }

    #[test]
    fn test_update_min_batch_promotes_in_order() {
        let buffer = buffer(100, 100);

        buffer.append(chunk(5), 1).unwrap();
        buffer.append(chunk(6), 2).unwrap();
        buffer.append(chunk(7), 3).unwrap();
        buffer.complete_batch(1);
        buffer.complete_batch(2);
        // Batch 3 stays incomplete.

        buffer.update_min_batch(3);

        // 1 and 2 are complete and behind the watermark; 3 is the watermark
        // batch and promotes regardless of completion.
        assert_eq!(buffer.min_batch(), 3);
        assert_eq!(buffer.current_tuple_count(), 18);
        assert_eq!(buffer.other_tuple_count(), 0);
    }

    #[test]
    fn test_update_min_batch_stops_at_incomplete_batch() {
        let buffer = buffer(100, 100);

        buffer.append(chunk(5), 1).unwrap();
        buffer.append(chunk(6), 2).unwrap();
        buffer.complete_batch(2);
        // Batch 1 is incomplete and below the candidate watermark.

        buffer.update_min_batch(2);

        // The walk stops at incomplete batch 1, so completed batch 2 stays
        // parked behind it.
        assert_eq!(buffer.min_batch(), 2);
        assert_eq!(buffer.current_tuple_count(), 0);
        assert_eq!(buffer.other_tuple_count(), 11);
    }

    #[test]
    fn test_min_batch_is_monotonic() {
        let buffer = buffer(100, 100);
        buffer.update_min_batch(5);
        buffer.update_min_batch(3);
        assert_eq!(buffer.min_batch(), 5);
    }

    #[test]
    fn test_scan_is_fifo_within_a_batch() {
        let buffer = buffer(100, 100);
        buffer.append(chunk(1), 0).unwrap();
        buffer.append(chunk(2), 0).unwrap();
        buffer.append(chunk(3), 0).unwrap();

        assert_eq!(buffer.scan().unwrap().num_rows(), 1);
        assert_eq!(buffer.scan().unwrap().num_rows(), 2);
        assert_eq!(buffer.scan().unwrap().num_rows(), 3);
        assert!(buffer.scan().is_none());
    }

    #[test]
    fn test_scan_auto_promotes_completed_batches() {
        let buffer = buffer(100, 100);
        buffer.append(chunk(5), 1).unwrap();
        buffer.append(chunk(6), 2).unwrap();
        buffer.complete_batch(1);
        buffer.complete_batch(2);

        assert_eq!(buffer.scan().unwrap().num_rows(), 5);
        assert_eq!(buffer.min_batch(), 1);
        assert_eq!(buffer.scan().unwrap().num_rows(), 6);
        assert_eq!(buffer.min_batch(), 2);
        assert!(buffer.scan().is_none());
    }

    #[test]
    fn test_buffer_is_full_requires_a_scannable_chunk() {
        let buffer = buffer(100, 5);

        // Over the future-batches budget, but nothing to scan: the consumer
        // must keep driving the pipeline.
        buffer.append(chunk(10), 3).unwrap();
        assert!(!buffer.buffer_is_full());

        buffer.append(chunk(1), 0).unwrap();
        assert!(buffer.buffer_is_full());
    }

    #[test]
    fn test_unblock_sinks_wakes_only_eligible_tokens() {
        let buffer = buffer(10, 5);
        let signals: Arc<Mutex<Vec<(u64, WakeSignal)>>> = Arc::new(Mutex::new(Vec::new()));

        buffer.append(chunk(10), 0).unwrap();
        buffer.append(chunk(5), 2).unwrap();

        for batch in [0u64, 2u64] {
            let signals = signals.clone();
            buffer
                .block_sink(
                    BlockedSink::new(move |signal| signals.lock().push((batch, signal))),
                    batch,
                )
                .unwrap();
        }
        assert_eq!(buffer.blocked_sink_count(), 2);

        // Nothing freed yet.
        buffer.unblock_sinks();
        assert_eq!(buffer.blocked_sink_count(), 2);

        // Drain the current batch; only the batch-0 sink becomes eligible.
        buffer.scan().unwrap();
        buffer.unblock_sinks();
        assert_eq!(buffer.blocked_sink_count(), 1);
        assert_eq!(signals.lock().as_slice(), &[(0, WakeSignal::Resume)]);

        // Promoting batch 2 empties the future-batches tier.
        buffer.update_min_batch(2);
        buffer.unblock_sinks();
        assert_eq!(buffer.blocked_sink_count(), 0);
        assert_eq!(
            signals.lock().as_slice(),
            &[(0, WakeSignal::Resume), (2, WakeSignal::Resume)]
        );
    }

    #[test]
    fn test_duplicate_blocked_sink_registration_fails() {
        let buffer = buffer(10, 5);
        buffer.block_sink(BlockedSink::new(|_| {}), 1).unwrap();
        let err = buffer.block_sink(BlockedSink::new(|_| {}), 1).unwrap_err();
        assert!(matches!(err, EmberError::Internal { .. }));
    }

    #[test]
    fn test_close_cancels_blocked_sinks() {
        let buffer = buffer(10, 5);
        let signals: Arc<Mutex<Vec<WakeSignal>>> = Arc::new(Mutex::new(Vec::new()));

        for batch in [0u64, 1, 2] {
            let signals = signals.clone();
            buffer
                .block_sink(
                    BlockedSink::new(move |signal| signals.lock().push(signal)),
                    batch,
                )
                .unwrap();
        }

        buffer.close();
        assert_eq!(buffer.blocked_sink_count(), 0);
        assert_eq!(signals.lock().len(), 3);
        assert!(signals
            .lock()
            .iter()
            .all(|signal| *signal == WakeSignal::Cancelled));

        // Idempotent.
        buffer.close();
        assert_eq!(signals.lock().len(), 3);
    }

    #[test]
    fn test_append_after_close_fails() {
        let buffer = buffer(10, 5);
        buffer.close();
        let err = buffer.append(chunk(1), 0).unwrap_err();
        assert!(matches!(err, EmberError::StreamClosed { .. }));
    }

    #[test]
    fn test_block_sink_after_close_is_cancelled() {
        let buffer = buffer(10, 5);
        buffer.close();

        let signals: Arc<Mutex<Vec<WakeSignal>>> = Arc::new(Mutex::new(Vec::new()));
        let recorded = signals.clone();
        let err = buffer
            .block_sink(
                BlockedSink::new(move |signal| recorded.lock().push(signal)),
                0,
            )
            .unwrap_err();
        assert!(matches!(err, EmberError::StreamClosed { .. }));
        assert_eq!(signals.lock().as_slice(), &[WakeSignal::Cancelled]);
    }

    #[test]
    fn test_replenish_on_closed_buffer_reports_error() {
        let buffer = buffer(10, 5);
        buffer.close();
        assert_eq!(
            buffer.replenish().unwrap(),
            ExecutionStatus::ExecutionError
        );
    }

    #[test]
    fn test_replenish_returns_ready_when_full() {
        let buffer = buffer(5, 5);
        buffer.append(chunk(5), 0).unwrap();
        assert_eq!(buffer.replenish().unwrap(), ExecutionStatus::ResultReady);
    }

    #[test]
    fn test_replenish_without_context_reports_finished() {
        let buffer = buffer(10, 5);
        assert_eq!(
            buffer.replenish().unwrap(),
            ExecutionStatus::ExecutionFinished
        );
    }

    #[test]
    fn test_replenish_drives_tasks_until_full() {
        let executor = Arc::new(QueueExecutor::default());
        let buffer = Arc::new(BatchedBuffer::with_executor(
            BufferConfig::new()
                .with_current_batch_buffer_size(8)
                .with_other_batches_buffer_size(8),
            Arc::downgrade(&executor) as Weak<dyn TaskExecutor>,
        ));

        for _ in 0..4 {
            let buffer = buffer.clone();
            executor.push(move || {
                buffer.append(chunk(4), 0)?;
                Ok(ExecutionStatus::ResultNotReady)
            });
        }

        let status = buffer.replenish().unwrap();
        assert_eq!(status, ExecutionStatus::ResultNotReady);
        // Two tasks of four tuples reach the current-batch budget; the other
        // two stay queued.
        assert_eq!(buffer.current_tuple_count(), 8);
        assert_eq!(executor.tasks.lock().len(), 2);
    }

    #[test]
    fn test_replenish_passes_task_errors_through() {
        let executor = Arc::new(QueueExecutor::default());
        let buffer = BatchedBuffer::with_executor(
            BufferConfig::default(),
            Arc::downgrade(&executor) as Weak<dyn TaskExecutor>,
        );

        executor.push(|| Err(EmberError::execution("division by zero")));

        let err = buffer.replenish().unwrap_err();
        assert!(matches!(err, EmberError::Execution { .. }));
    }

    #[test]
    fn test_counter_invariants_hold_across_operations() {
        let buffer = buffer(100, 100);
        let sizes_current = [3usize, 4, 5];
        let sizes_future = [(1u64, 6usize), (2, 7), (2, 8)];

        for &rows in &sizes_current {
            buffer.append(chunk(rows), 0).unwrap();
        }
        for &(batch, rows) in &sizes_future {
            buffer.append(chunk(rows), batch).unwrap();
        }

        assert_eq!(
            buffer.current_tuple_count(),
            sizes_current.iter().sum::<usize>()
        );
        assert_eq!(
            buffer.other_tuple_count(),
            sizes_future.iter().map(|&(_, rows)| rows).sum::<usize>()
        );

        // Drain and promote everything; counters must return to zero.
        buffer.complete_batch(1);
        buffer.complete_batch(2);
        let mut seen = 0;
        while let Some(chunk) = buffer.scan() {
            seen += chunk.num_rows();
        }
        assert_eq!(seen, 33);
        assert_eq!(buffer.current_tuple_count(), 0);
        assert_eq!(buffer.other_tuple_count(), 0);
    }
}
