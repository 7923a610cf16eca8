//! Skipping of columns that no requested feature reads.

use crate::error::DecodeError;
use crate::reader::skip_value;
use crate::schema::AvroSchema;

/// Consumes a column nobody requested so the next column starts at the right
/// byte. The value itself is dropped.
#[derive(Debug, Clone)]
pub struct OpaqueDecoder {
    schema: AvroSchema,
}

impl OpaqueDecoder {
    pub fn new(schema: AvroSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &AvroSchema {
        &self.schema
    }

    pub fn decode(&self, data: &mut &[u8]) -> Result<(), DecodeError> {
        skip_value(data, &self.schema)
    }
}
