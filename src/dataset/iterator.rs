//! Batch iterator over an ATDS dataset.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::atds::AtdsDecoder;
use crate::error::ReaderError;

use super::batch::{Batch, BatchContext, DecodeState};
use super::prefetch::{Prefetcher, Shared};

/// Yields decoded batches until every file is read.
///
/// The prefetch task starts on the first call to
/// [`next_batch`](Self::next_batch) and must run inside a tokio runtime.
/// Dropping the iterator cancels it.
pub struct AtdsIterator {
    shared: Arc<Shared>,
    prefetcher: Option<Prefetcher>,
    prefetch_task: Option<JoinHandle<()>>,
    ctx: Arc<BatchContext>,
    /// `None` only while a batch is being decoded
    state: Option<DecodeState>,
    decoder: Option<Arc<AtdsDecoder>>,
    batch_size: usize,
    drop_remainder: bool,
}

impl AtdsIterator {
    pub(crate) fn new(
        shared: Arc<Shared>,
        prefetcher: Prefetcher,
        ctx: BatchContext,
        state: DecodeState,
        batch_size: usize,
        drop_remainder: bool,
    ) -> Self {
        Self {
            shared,
            prefetcher: Some(prefetcher),
            prefetch_task: None,
            ctx: Arc::new(ctx),
            state: Some(state),
            decoder: None,
            batch_size,
            drop_remainder,
        }
    }

    /// Decode the next batch.
    ///
    /// Returns `Ok(None)` at the end of the data or after cancellation. An
    /// error that stopped reading is returned once the records buffered
    /// before it are used up.
    pub async fn next_batch(&mut self) -> Result<Option<Batch>, ReaderError> {
        self.ensure_prefetch_started();
        if !self.wait_for_records().await {
            return Ok(None);
        }

        let mut state = self
            .state
            .take()
            .ok_or_else(|| ReaderError::Internal("A previous batch did not complete".into()))?;

        let (count, finished) = {
            let mut input = self.shared.state.lock();
            state.blocks.append(&mut input.write_blocks);
            state.blocks.retain(|b| !b.is_exhausted());
            let count = state.remaining();
            input.count = count - count.min(self.batch_size);
            if self.decoder.is_none() {
                self.decoder = input.decoder.clone();
            }
            (count, input.finished)
        };
        self.shared.headroom.notify_one();
        if finished {
            state.shuffle.reset_rngs();
        }

        if count >= self.batch_size || (!self.drop_remainder && finished && count > 0) {
            let batch_size = count.min(self.batch_size);
            let Some(decoder) = self.decoder.clone() else {
                self.state = Some(state);
                return Err(ReaderError::Internal(
                    "Records were buffered before a decoder was built".into(),
                ));
            };
            let ctx = Arc::clone(&self.ctx);
            let (state, result) = tokio::task::spawn_blocking(move || {
                let mut state = state;
                let result = state.decode_batch(&ctx, &decoder, batch_size);
                (state, result)
            })
            .await
            .map_err(|e| ReaderError::Internal(format!("Decode task failed: {}", e)))?;
            self.state = Some(state);
            return result.map(Some);
        }

        self.state = Some(state);
        debug!(remaining = count, "End of sequence");
        match self.shared.state.lock().status.take() {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    fn ensure_prefetch_started(&mut self) {
        if let Some(prefetcher) = self.prefetcher.take() {
            self.prefetch_task = Some(tokio::spawn(prefetcher.run()));
        }
    }

    /// Wait for a full batch worth of buffered records, or for reading to
    /// finish. Returns `false` on cancellation.
    async fn wait_for_records(&self) -> bool {
        loop {
            if self.shared.cancel.is_cancelled() {
                return false;
            }
            {
                let input = self.shared.state.lock();
                if input.finished || input.count >= self.shared.watermark {
                    return true;
                }
            }
            tokio::select! {
                _ = self.shared.data_ready.notified() => {}
                _ = self.shared.cancel.cancelled() => return false,
            }
        }
    }

    /// Stop prefetching. Pending and later calls to `next_batch` return
    /// `Ok(None)`.
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Cancel and wait for the prefetch task to exit.
    pub async fn close(&mut self) -> Result<(), ReaderError> {
        self.cancel();
        self.prefetcher = None;
        if let Some(task) = self.prefetch_task.take() {
            task.await
                .map_err(|e| ReaderError::Internal(format!("Prefetch task failed: {}", e)))?;
        }
        Ok(())
    }

    /// Checkpointing is not supported.
    pub fn save(&self) -> Result<Vec<u8>, ReaderError> {
        Err(ReaderError::Unimplemented("SaveInternal".into()))
    }

    /// Checkpointing is not supported.
    pub fn restore(&mut self, _checkpoint: &[u8]) -> Result<(), ReaderError> {
        Err(ReaderError::Unimplemented(
            "Iterator does not support 'RestoreInternal')".into(),
        ))
    }
}

impl Drop for AtdsIterator {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
        if let Some(task) = self.prefetch_task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for AtdsIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtdsIterator")
            .field("batch_size", &self.batch_size)
            .field("drop_remainder", &self.drop_remainder)
            .field("started", &self.prefetch_task.is_some())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
