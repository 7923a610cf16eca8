//! Background block prefetching.
//!
//! One task per iterator reads blocks from the configured files in order and
//! hands them to the consumer through [`Shared`]. It pauses whenever the
//! buffered record count reaches the watermark (`batch_size +
//! shuffle_buffer_size`) and resumes when the consumer claims records.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::atds::AtdsDecoder;
use crate::error::{ReaderError, SchemaError};
use crate::reader::{AvroBlock, BlockReader};
use crate::source::{BoxedSource, SourceProvider};

use super::layout::FeatureLayout;

/// Handoff state between the prefetch task and the consumer.
#[derive(Debug, Default)]
pub(crate) struct InputState {
    /// Undecoded records buffered and not yet claimed by a batch
    pub count: usize,
    /// Blocks read since the consumer last collected them
    pub write_blocks: Vec<AvroBlock>,
    /// All files were read, or reading stopped on an error
    pub finished: bool,
    /// Error that stopped reading, returned once buffered records run out
    pub status: Option<ReaderError>,
    /// Built from the first file's schema
    pub decoder: Option<Arc<AtdsDecoder>>,
}

#[derive(Debug)]
pub(crate) struct Shared {
    pub state: Mutex<InputState>,
    /// Signalled when records are available or reading finished
    pub data_ready: Notify,
    /// Signalled when the consumer claimed records
    pub headroom: Notify,
    pub cancel: CancellationToken,
    /// Buffered record count at which prefetching pauses
    pub watermark: usize,
}

impl Shared {
    pub fn new(watermark: usize) -> Self {
        Self {
            state: Mutex::new(InputState::default()),
            data_ready: Notify::new(),
            headroom: Notify::new(),
            cancel: CancellationToken::new(),
            watermark,
        }
    }

    fn finish(&self, status: Option<ReaderError>) {
        {
            let mut state = self.state.lock();
            state.finished = true;
            state.status = status;
        }
        self.data_ready.notify_one();
    }
}

pub(crate) struct Prefetcher {
    pub shared: Arc<Shared>,
    pub provider: Arc<dyn SourceProvider>,
    pub filenames: Arc<[String]>,
    pub buffer_size: usize,
    pub layout: Arc<FeatureLayout>,
}

impl Prefetcher {
    /// Read every file, then mark the input finished.
    pub async fn run(self) {
        let mut reader: Option<BlockReader<BoxedSource>> = None;
        let mut file_index = 0;
        let mut expected_schema: Option<String> = None;

        loop {
            if !self.wait_for_headroom().await {
                debug!("Prefetch cancelled");
                return;
            }

            if reader.is_none() {
                let Some(filename) = self.filenames.get(file_index) else {
                    self.shared.finish(None);
                    return;
                };
                match self.open(filename, &mut expected_schema).await {
                    Ok(opened) => reader = Some(opened),
                    Err(e) => {
                        error!(file = %filename, error = %e, "Failed to open ATDS file");
                        self.shared.finish(Some(e));
                        return;
                    }
                }
            }
            let Some(current) = reader.as_mut() else {
                continue;
            };

            let result = tokio::select! {
                result = current.read_block() => result,
                _ = self.shared.cancel.cancelled() => return,
            };

            match result {
                Ok(block) => {
                    let reached_watermark = {
                        let mut state = self.shared.state.lock();
                        state.count += block.object_count;
                        state.write_blocks.push(block);
                        state.count >= self.shared.watermark
                    };
                    if reached_watermark {
                        self.shared.data_ready.notify_one();
                    }
                }
                Err(e) if e.is_out_of_range() => {
                    reader = None;
                    file_index += 1;
                    if file_index >= self.filenames.len() {
                        self.shared.finish(None);
                        return;
                    }
                }
                Err(e) => {
                    error!(
                        file = %self.filenames[file_index],
                        error = %e,
                        "Failed to read block"
                    );
                    self.shared.finish(Some(e));
                    return;
                }
            }
        }
    }

    /// Wait until fewer than `watermark` records are buffered. Returns
    /// `false` on cancellation.
    async fn wait_for_headroom(&self) -> bool {
        loop {
            if self.shared.cancel.is_cancelled() {
                return false;
            }
            if self.shared.state.lock().count < self.shared.watermark {
                return true;
            }
            self.shared.data_ready.notify_one();
            tokio::select! {
                _ = self.shared.headroom.notified() => {}
                _ = self.shared.cancel.cancelled() => return false,
            }
        }
    }

    /// Open a file. The first file's schema builds the decoder; every later
    /// file must carry the same schema.
    async fn open(
        &self,
        filename: &str,
        expected_schema: &mut Option<String>,
    ) -> Result<BlockReader<BoxedSource>, ReaderError> {
        let source = self.provider.open(filename).await?;
        let reader = BlockReader::open(source, self.buffer_size).await?;
        let schema = &reader.header().schema;

        match expected_schema {
            None => {
                let decoder =
                    AtdsDecoder::new(schema, self.layout.dense(), self.layout.sparse())?;
                *expected_schema = Some(decoder.schema_json().to_string());
                self.shared.state.lock().decoder = Some(Arc::new(decoder));
            }
            Some(expected) => {
                let found = schema.to_json();
                if found != *expected {
                    return Err(SchemaError::VariedSchema {
                        first_file: self.filenames[0].clone(),
                        file: filename.to_string(),
                        expected: expected.clone(),
                        found,
                    }
                    .into());
                }
            }
        }
        debug!(file = %filename, codec = ?reader.header().codec, "Opened ATDS file");
        Ok(reader)
    }
}
