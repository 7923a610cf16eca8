//! Avro schema types and parsing.

mod parser;
mod types;

pub use parser::{parse_schema, SchemaParser};
pub use types::*;
