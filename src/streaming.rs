//! Streaming query results.
//!
//! A [`StreamingResult`] is the consumer side of a [`BatchedBuffer`]: it
//! repeatedly asks the buffer to replenish itself by driving pipeline tasks,
//! then pulls one record batch at a time. The consumer never blocks inside
//! the buffer; when nothing is ready it steals pipeline work synchronously
//! through the buffer's replenish step.
//!
//! The first failure observed while fetching is kept as a
//! [`PreservedError`] and re-raised on every subsequent fetch, so a client
//! polling a broken stream keeps seeing the original error rather than a
//! generic closed-stream message.

use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use tracing::debug;

use crate::buffer::{BatchedBuffer, BufferConfig, ExecutionStatus, TaskExecutor};
use crate::error::{EmberError, PreservedError, Result};

/// A query result that yields record batches incrementally.
///
/// Created when a streaming query is opened; holds the execution context
/// alive for as long as the stream is open, while the buffer itself only
/// keeps a weak handle to it.
pub struct StreamingResult {
    schema: SchemaRef,
    buffer: Arc<BatchedBuffer>,
    /// Keeps the executor alive while the stream is open. The buffer
    /// upgrades its own weak handle only while driving tasks.
    #[allow(dead_code)]
    executor: Arc<dyn TaskExecutor>,
    /// First failure observed; sticky.
    error: Option<PreservedError>,
}

impl StreamingResult {
    /// Open a streaming result over a fresh buffer wired to `executor`.
    pub fn open(schema: SchemaRef, config: BufferConfig, executor: Arc<dyn TaskExecutor>) -> Self {
        let buffer = Arc::new(BatchedBuffer::with_executor(
            config,
            Arc::downgrade(&executor),
        ));
        Self {
            schema,
            buffer,
            executor,
            error: None,
        }
    }

    /// The schema of the batches this result produces.
    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    /// The buffer producers append into. Sink workers clone this handle.
    pub fn buffer(&self) -> Arc<BatchedBuffer> {
        self.buffer.clone()
    }

    /// The error that broke the stream, if any.
    pub fn error(&self) -> Option<&PreservedError> {
        self.error.as_ref()
    }

    /// Fetch the next record batch, driving the pipeline as needed.
    ///
    /// Returns `Ok(None)` once the pipeline has finished and the buffer is
    /// drained. After a failure, every subsequent call re-raises the
    /// preserved error.
    pub fn fetch(&mut self) -> Result<Option<RecordBatch>> {
        if let Some(error) = &self.error {
            return Err(error.to_error("attempted to fetch from an errored stream"));
        }
        loop {
            let status = match self.buffer.replenish() {
                Ok(status) => status,
                Err(error) => return Err(self.record_error(error)),
            };
            if status == ExecutionStatus::ExecutionError {
                let error = EmberError::stream_closed("streaming result was aborted");
                return Err(self.record_error(error));
            }
            if let Some(chunk) = self.buffer.scan() {
                return Ok(Some(chunk));
            }
            if status.is_finished() {
                return Ok(None);
            }
        }
    }

    /// Fetch every remaining batch.
    pub fn collect(&mut self) -> Result<Vec<RecordBatch>> {
        let mut batches = Vec::new();
        while let Some(batch) = self.fetch()? {
            batches.push(batch);
        }
        Ok(batches)
    }

    /// Close the underlying buffer, cancelling any suspended producers.
    pub fn close(&self) {
        self.buffer.close();
    }

    fn record_error(&mut self, error: EmberError) -> EmberError {
        debug!(error = %error, "streaming result failed");
        self.error = Some(PreservedError::from(&error));
        self.buffer.close();
        error
    }
}

impl Drop for StreamingResult {
    fn drop(&mut self) {
        // Releasing the result tears the stream down; parked producers must
        // not be left waiting on a buffer nobody will drain.
        self.buffer.close();
    }
}

impl std::fmt::Debug for StreamingResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingResult")
            .field("schema", &self.schema)
            .field("buffer", &self.buffer)
            .field("errored", &self.error.is_some())
            .finish()
    }
}
