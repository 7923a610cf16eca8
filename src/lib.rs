//! Streaming decoder for Avro Tensor Dataset (ATDS) files
//!
//! ATDS files are Avro object container files whose records hold one column
//! per feature: dense tensors as nested arrays, sparse tensors as records of
//! index and value arrays, and ragged tensors as nested arrays of varying
//! length. This library reads such files in the background, decodes batches
//! of records in parallel and returns dense, sparse and ragged tensors.
//!
//! The entry point is [`AtdsDataset`]; lower-level pieces (block reader,
//! column decoders, shuffle handler) are public for callers that drive the
//! pipeline themselves.

pub mod atds;
pub mod codec;
pub mod dataset;
pub mod error;
pub mod reader;
pub mod schema;
pub mod shuffle;
pub mod source;
pub mod tensor;

// Re-export main types
pub use atds::{AtdsDecoder, DenseMetadata, FeatureType, SparseMetadata, ValueBuffer};
pub use codec::Codec;
pub use dataset::{
    AtdsConfig, AtdsDataset, AtdsIterator, Batch, CostModel, FeatureSpec, TimingCostModel,
    AUTOTUNE,
};
pub use error::{
    CodecError, DecodeError, ErrorKind, ReaderError, SchemaError, SourceError,
};
pub use reader::{AvroBlock, AvroHeader, BlockReader};
pub use schema::{parse_schema, AvroSchema, FieldSchema, RecordSchema};
pub use shuffle::ShuffleHandler;
pub use source::{
    BoxedSource, LocalFileSystem, LocalSource, MemoryProvider, MemorySource, SourceProvider,
    StreamSource,
};
pub use tensor::{DataType, FeatureTensor, PartialShape, SparseTensor, Tensor, TensorData};
