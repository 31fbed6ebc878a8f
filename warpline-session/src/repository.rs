//! Buffered persistence facade over a SessionStore.

use std::sync::Arc;

use tracing::debug;
use warpline_core::{SessionStore, Step, WarplineError};

/// Thin buffering layer in front of the store. `save` writes through;
/// `queue` batches until `flush`, with an automatic intermediate flush once
/// the buffer reaches `auto_flush_size` to bound memory. Callers flush on
/// the success path and `discard` on failure, which mirrors the commit /
/// rollback shape of the write pipeline.
pub struct StepRepository {
    store: Option<Arc<dyn SessionStore>>,
    buffer: Vec<Step>,
    auto_flush_size: usize,
}

impl StepRepository {
    pub fn new(store: Option<Arc<dyn SessionStore>>) -> Self {
        Self {
            store,
            buffer: Vec::new(),
            auto_flush_size: 2,
        }
    }

    pub fn with_auto_flush_size(mut self, auto_flush_size: usize) -> Self {
        self.auto_flush_size = auto_flush_size.max(1);
        self
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// Write-through save, bypassing the buffer.
    pub async fn save(&self, step: &Step) -> Result<(), WarplineError> {
        match &self.store {
            Some(store) => store.save_step(step).await,
            None => Ok(()),
        }
    }

    /// Append to the batch; flushes when the buffer hits the threshold.
    pub async fn queue(&mut self, step: Step) -> Result<(), WarplineError> {
        self.buffer.push(step);
        if self.buffer.len() >= self.auto_flush_size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Persist the batch. Uses the batch write when a store is present.
    pub async fn flush(&mut self) -> Result<(), WarplineError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        if let Some(store) = &self.store {
            debug!(count = self.buffer.len(), "flushing step batch");
            store.save_steps_batch(&self.buffer).await?;
        }
        self.buffer.clear();
        Ok(())
    }

    /// Drop queued steps without persisting them.
    pub fn discard(&mut self) {
        self.buffer.clear();
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
