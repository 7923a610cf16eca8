//! Error types for ATDS decoding

use std::io;
use thiserror::Error;

/// Errors raised while parsing an Avro schema or matching it against the
/// requested features.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Invalid schema format
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),
    /// Unsupported schema type
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),
    /// Schema parsing error
    #[error("Parse error: {0}")]
    ParseError(String),
    /// The writer schema root is not a record
    #[error(
        "ATDS schema is expected to be an Avro Record but found {found}. Invalid schema found: {schema}"
    )]
    NotRecord { found: String, schema: String },
    /// A requested feature has no column in the writer schema
    #[error(
        "User defined feature '{feature}' cannot be found in the input data. Input data schema: {schema}"
    )]
    FeatureNotFound { feature: String, schema: String },
    /// Unions other than `[T]` or `["null", T]`
    #[error(
        "Feature '{feature}' has an unsupported union type. Only [T] and [\"null\", T] unions are accepted. Invalid schema found: {schema}"
    )]
    InvalidUnionType { feature: String, schema: String },
    /// Sparse record without a `values` field
    #[error("Sparse schema is missing values column. Input data schema: {schema}")]
    MissingValuesColumn { schema: String },
    /// Sparse record whose indices columns are not `indices0..indices{rank-1}`
    #[error(
        "Sparse schema indices should be contiguous (indices0, indices1, ...). Input data schema: {schema}"
    )]
    NonContiguousIndices { schema: String },
    /// Sparse record with fields besides the indices and values columns
    #[error(
        "Sparse schema can only contain 'indices' columns and a 'values' column. Input data schema: {schema}"
    )]
    ExtraField { schema: String },
    /// Sparse indices column that is not an array of int or long
    #[error(
        "Unsupported indices type found in feature '{feature}'. Sparse tensor indices must be a non-nullable array of non-nullable int or long. Invalid schema found: {schema}"
    )]
    UnsupportedSparseIndicesType { feature: String, schema: String },
    /// Leaf type that does not map to a tensor dtype
    #[error(
        "Unsupported value type found in feature '{feature}'. Tensor value must be a non-nullable array of non-nullable int, long, float, double, boolean, bytes, or string. Invalid schema found: {schema}"
    )]
    UnsupportedValueType { feature: String, schema: String },
    /// Leaf type maps to a dtype different from the requested one
    #[error(
        "Schema value type and metadata type mismatch in feature '{feature}'. Avro schema data type: {avro_type}, metadata type: {dtype}. Invalid schema found: {schema}"
    )]
    ValueTypeMismatch {
        feature: String,
        avro_type: String,
        dtype: String,
        schema: String,
    },
    /// Dense column containing records, unions or maps
    #[error(
        "Dense feature '{feature}' must be non-nullable nested arrays only. Invalid schema found: {schema}"
    )]
    InvalidDenseFeatureSchema { feature: String, schema: String },
    /// Varlen column containing records, unions or maps
    #[error(
        "Varlen feature '{feature}' must be non-nullable nested arrays only. Invalid schema found: {schema}"
    )]
    InvalidVarlenFeatureSchema { feature: String, schema: String },
    /// Array nesting depth differs from the requested rank
    #[error(
        "Mismatch between avro schema rank and metadata rank in feature '{feature}'. Avro schema rank: {schema_rank}, metadata rank: {metadata_rank}. Invalid schema found: {schema}"
    )]
    RankMismatch {
        feature: String,
        schema_rank: usize,
        metadata_rank: usize,
        schema: String,
    },
    /// A later file carries a different writer schema than the first file
    #[error(
        "Avro schema should be consistent for all input files. Schema in file {first_file} varies from the schema in file {file}\n{expected}\n != \n{found}"
    )]
    VariedSchema {
        first_file: String,
        file: String,
        expected: String,
        found: String,
    },
}

/// Errors that can occur during codec operations
#[derive(Debug, Error)]
pub enum CodecError {
    /// Codec name not recognised in the file metadata
    #[error("Unknown codec in data file: {0}")]
    UnknownCodec(String),
    /// Codec recognised but compiled out
    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),
    /// Decompression error
    #[error("Decompression error: {0}")]
    DecompressionError(String),
}

/// Errors that can occur while decoding Avro data
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Invalid Avro data
    #[error("Invalid data: {0}")]
    InvalidData(String),
    /// Unexpected end of data
    #[error("Unexpected end of file")]
    UnexpectedEof,
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// Invalid varint encoding
    #[error("Invalid varint encoding")]
    InvalidVarint,
    /// A nullable column held the null branch
    #[error("Feature value is null.")]
    NullValue,
    /// Array length disagrees with the declared dimension size
    #[error(
        "Number of decoded value {number} does not match the expected dimension size {expected} at the {}th dimension in user defined shape {shape}",
        .dim + 1
    )]
    Shape {
        number: usize,
        dim: usize,
        expected: i64,
        shape: String,
    },
    /// Sparse indices and values arrays of one record differ in length
    #[error(
        "Numbers of decoded value in indice and values array are different. Numbers of decoded value in [{}] arrays are [{}]",
        .names.join(", "),
        .counts.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(", ")
    )]
    SparseArraysNotEqual { names: Vec<String>, counts: Vec<usize> },
    /// Any failure inside one column of a record
    #[error("Failed to decode feature {feature}. Reason: {source}")]
    Feature {
        feature: String,
        #[source]
        source: Box<DecodeError>,
    },
}

impl DecodeError {
    /// Wrap this error with the name of the column that produced it.
    pub fn in_feature(self, feature: &str) -> Self {
        DecodeError::Feature {
            feature: feature.to_string(),
            source: Box::new(self),
        }
    }
}

/// Errors that can occur with data sources
#[derive(Debug, Error)]
pub enum SourceError {
    /// File system error
    #[error("File system error: {0}")]
    FileSystemError(String),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// Path not found
    #[error("Not found: {0}")]
    NotFound(String),
    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}

/// Broad error category, used by callers that only need to tell end of
/// data from corruption or misuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    OutOfRange,
    DataLoss,
    NotFound,
    PermissionDenied,
    Unimplemented,
    Internal,
}

/// Top-level error type
#[derive(Debug, Error)]
pub enum ReaderError {
    /// Source error
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Malformed container header
    #[error("Parse error at offset {offset}: {message}")]
    Parse { offset: u64, message: String },

    /// Schema error
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Record decoding error
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Codec error
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invalid magic bytes
    #[error("Invalid data file. Magic does not match.")]
    InvalidMagic([u8; 4]),

    /// Header metadata lacks `avro.schema`
    #[error("No schema in metadata")]
    MissingSchema,

    /// Block trailer differs from the header sync marker
    #[error("Avro sync marker mismatch.")]
    SyncMarkerMismatch { block_index: usize, offset: u64 },

    /// End of the underlying data
    #[error("eof")]
    OutOfRange,

    /// Operation the iterator does not provide
    #[error("Unimplemented: {0}")]
    Unimplemented(String),

    /// Broken internal invariant or a failed background task
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReaderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReaderError::Source(SourceError::NotFound(_)) => ErrorKind::NotFound,
            ReaderError::Source(SourceError::PermissionDenied(_)) => ErrorKind::PermissionDenied,
            ReaderError::Source(_) => ErrorKind::Internal,
            ReaderError::Schema(_) | ReaderError::Configuration(_) => ErrorKind::InvalidArgument,
            ReaderError::Codec(CodecError::UnknownCodec(_)) => ErrorKind::InvalidArgument,
            ReaderError::Codec(_) => ErrorKind::DataLoss,
            ReaderError::Decode(_) | ReaderError::Parse { .. } => ErrorKind::InvalidArgument,
            ReaderError::InvalidMagic(_) | ReaderError::MissingSchema => {
                ErrorKind::InvalidArgument
            }
            ReaderError::SyncMarkerMismatch { .. } => ErrorKind::DataLoss,
            ReaderError::OutOfRange => ErrorKind::OutOfRange,
            ReaderError::Unimplemented(_) => ErrorKind::Unimplemented,
            ReaderError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// True for the end-of-data condition of a block reader.
    pub fn is_out_of_range(&self) -> bool {
        matches!(self, ReaderError::OutOfRange)
    }
}
