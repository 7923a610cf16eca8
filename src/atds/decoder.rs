//! Per-column decoder registry.

use tracing::warn;

use super::{
    DenseBatch, DenseDecoder, DenseMetadata, FeatureType, OpaqueDecoder, SparseDecoder,
    SparseMetadata, ValueBuffer, VarlenDecoder,
};
use crate::error::{DecodeError, SchemaError};
use crate::reader::decode_union_index;
use crate::schema::AvroSchema;

/// Decoder for one top-level column, chosen when the registry is built.
#[derive(Debug, Clone)]
pub enum ColumnDecoder {
    Dense(DenseDecoder),
    Sparse(SparseDecoder),
    Varlen(VarlenDecoder),
    Opaque(OpaqueDecoder),
    Nullable(NullableDecoder),
}

impl ColumnDecoder {
    #[inline]
    pub fn decode(
        &self,
        data: &mut &[u8],
        dense: &mut DenseBatch<'_>,
        buffer: &mut ValueBuffer,
        offset: usize,
    ) -> Result<(), DecodeError> {
        match self {
            ColumnDecoder::Dense(d) => d.decode(data, dense, offset),
            ColumnDecoder::Sparse(d) => d.decode(data, buffer, offset),
            ColumnDecoder::Varlen(d) => d.decode(data, buffer, offset),
            ColumnDecoder::Opaque(d) => d.decode(data),
            ColumnDecoder::Nullable(d) => d.decode(data, dense, buffer, offset),
        }
    }

    pub fn feature_type(&self) -> FeatureType {
        match self {
            ColumnDecoder::Dense(_) => FeatureType::Dense,
            ColumnDecoder::Sparse(_) => FeatureType::Sparse,
            ColumnDecoder::Varlen(_) => FeatureType::Varlen,
            ColumnDecoder::Opaque(_) => FeatureType::OpaqueContextual,
            ColumnDecoder::Nullable(d) => d.inner.feature_type(),
        }
    }
}

/// A `["null", T]` column; any branch but `T` fails the record.
#[derive(Debug, Clone)]
pub struct NullableDecoder {
    non_null_index: usize,
    num_branches: usize,
    inner: Box<ColumnDecoder>,
}

impl NullableDecoder {
    pub fn new(non_null_index: usize, num_branches: usize, inner: ColumnDecoder) -> Self {
        Self {
            non_null_index,
            num_branches,
            inner: Box::new(inner),
        }
    }

    pub fn decode(
        &self,
        data: &mut &[u8],
        dense: &mut DenseBatch<'_>,
        buffer: &mut ValueBuffer,
        offset: usize,
    ) -> Result<(), DecodeError> {
        let index = decode_union_index(data, self.num_branches)?;
        if index != self.non_null_index {
            return Err(DecodeError::NullValue);
        }
        self.inner.decode(data, dense, buffer, offset)
    }
}

#[derive(Debug, Clone)]
struct Column {
    name: String,
    decoder: ColumnDecoder,
}

enum Requested<'a> {
    Dense(&'a DenseMetadata),
    Sparse(&'a SparseMetadata),
}

impl Requested<'_> {
    fn name(&self) -> &str {
        match self {
            Requested::Dense(m) => &m.name,
            Requested::Sparse(m) => &m.name,
        }
    }

    fn build(&self, schema: &AvroSchema) -> Result<ColumnDecoder, SchemaError> {
        match self {
            Requested::Dense(m) => {
                DenseDecoder::validate(schema, m)?;
                Ok(ColumnDecoder::Dense(DenseDecoder::new(m)))
            }
            Requested::Sparse(m) if m.feature_type == FeatureType::Varlen => {
                VarlenDecoder::validate(schema, m)?;
                Ok(ColumnDecoder::Varlen(VarlenDecoder::new(m)))
            }
            Requested::Sparse(m) => Ok(ColumnDecoder::Sparse(SparseDecoder::new(schema, m)?)),
        }
    }
}

/// Decodes whole ATDS records, one decoder per top-level column in schema
/// order.
#[derive(Debug, Clone)]
pub struct AtdsDecoder {
    columns: Vec<Column>,
    schema: AvroSchema,
    schema_json: String,
}

impl AtdsDecoder {
    /// Match the requested features against the writer `schema`.
    ///
    /// `sparse` holds both sparse and varlen features. Columns that no
    /// feature asks for are skipped on decode, with a warning logged once
    /// here.
    pub fn new(
        schema: &AvroSchema,
        dense: &[DenseMetadata],
        sparse: &[SparseMetadata],
    ) -> Result<Self, SchemaError> {
        let schema_json = schema.to_json();
        let AvroSchema::Record(root) = schema else {
            return Err(SchemaError::NotRecord {
                found: schema.type_name().to_string(),
                schema: schema_json,
            });
        };

        let mut decoders: Vec<Option<ColumnDecoder>> = vec![None; root.fields.len()];
        let requested = dense
            .iter()
            .map(Requested::Dense)
            .chain(sparse.iter().map(Requested::Sparse));
        for feature in requested {
            let name = feature.name();
            let pos = root
                .field_position(name)
                .ok_or_else(|| SchemaError::FeatureNotFound {
                    feature: name.to_string(),
                    schema: schema_json.clone(),
                })?;
            let column = &root.fields[pos].schema;

            let decoder = match column {
                AvroSchema::Union(branches)
                    if branches.len() == 2 && branches[0] == AvroSchema::Null =>
                {
                    ColumnDecoder::Nullable(NullableDecoder::new(1, 2, feature.build(&branches[1])?))
                }
                AvroSchema::Union(branches) if branches.len() == 1 => {
                    ColumnDecoder::Nullable(NullableDecoder::new(0, 1, feature.build(&branches[0])?))
                }
                AvroSchema::Union(_) => {
                    return Err(SchemaError::InvalidUnionType {
                        feature: name.to_string(),
                        schema: column.to_json(),
                    })
                }
                _ => feature.build(column)?,
            };
            decoders[pos] = Some(decoder);
        }

        let columns = root
            .fields
            .iter()
            .zip(decoders)
            .map(|(field, decoder)| {
                let decoder = decoder.unwrap_or_else(|| {
                    warn!(
                        column = %field.name,
                        "Column '{}' from input data is not used. Cost of parsing an unused column is prohibitive!! Consider dropping it to improve I/O performance.",
                        field.name
                    );
                    ColumnDecoder::Opaque(OpaqueDecoder::new(field.schema.clone()))
                });
                Column {
                    name: field.name.clone(),
                    decoder,
                }
            })
            .collect();

        Ok(Self {
            columns,
            schema: schema.clone(),
            schema_json,
        })
    }

    /// Decode one record. `offset` is the record's row in the batch.
    ///
    /// Errors are wrapped with the name of the failing column.
    pub fn decode_datum(
        &self,
        data: &mut &[u8],
        dense: &mut DenseBatch<'_>,
        buffer: &mut ValueBuffer,
        offset: usize,
    ) -> Result<(), DecodeError> {
        for column in &self.columns {
            column
                .decoder
                .decode(data, dense, buffer, offset)
                .map_err(|e| e.in_feature(&column.name))?;
        }
        Ok(())
    }

    /// Writer schema this decoder was built for.
    pub fn schema(&self) -> &AvroSchema {
        &self.schema
    }

    /// Canonical JSON of the writer schema, compared against later files.
    pub fn schema_json(&self) -> &str {
        &self.schema_json
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// `(column name, kind)` in schema order.
    pub fn column_types(&self) -> impl Iterator<Item = (&str, FeatureType)> {
        self.columns
            .iter()
            .map(|c| (c.name.as_str(), c.decoder.feature_type()))
    }

    /// Columns that are parsed but not returned.
    pub fn unused_columns(&self) -> impl Iterator<Item = &str> {
        self.column_types()
            .filter(|(_, t)| *t == FeatureType::OpaqueContextual)
            .map(|(name, _)| name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::write_zigzag;
    use crate::schema::{FieldSchema, RecordSchema};
    use crate::tensor::{DataType, PartialShape, Tensor};

    fn dense_meta(name: &str, dtype: DataType, shape: Vec<i64>, pos: usize) -> DenseMetadata {
        DenseMetadata {
            name: name.to_string(),
            dtype,
            shape: PartialShape::new(shape),
            tensor_position: pos,
        }
    }

    fn nullable_long_schema(branches: Vec<AvroSchema>) -> AvroSchema {
        AvroSchema::Record(RecordSchema::new(
            "r",
            vec![
                FieldSchema::new("label", AvroSchema::Union(branches)),
                FieldSchema::new("extra", AvroSchema::String),
            ],
        ))
    }

    fn decode_label(decoder: &AtdsDecoder, bytes: &[u8]) -> Result<i64, DecodeError> {
        let mut tensor = Tensor::zeros(DataType::Int64, vec![1]);
        let mut buffer = ValueBuffer::default();
        {
            let mut dense = DenseBatch::new(0, 1, vec![tensor.data_mut().as_slice_mut()]);
            let mut data = bytes;
            decoder.decode_datum(&mut data, &mut dense, &mut buffer, 0)?;
            assert!(data.is_empty());
        }
        Ok(tensor.as_slice::<i64>().unwrap()[0])
    }

    #[test]
    fn test_nullable_column() {
        let schema = nullable_long_schema(vec![AvroSchema::Null, AvroSchema::Long]);
        let label = dense_meta("label", DataType::Int64, vec![], 0);
        let decoder = AtdsDecoder::new(&schema, &[label], &[]).unwrap();
        assert_eq!(decoder.unused_columns().collect::<Vec<_>>(), vec!["extra"]);

        let mut bytes = Vec::new();
        write_zigzag(&mut bytes, 1);
        write_zigzag(&mut bytes, 42);
        write_zigzag(&mut bytes, 2);
        bytes.extend_from_slice(b"xy");
        assert_eq!(decode_label(&decoder, &bytes).unwrap(), 42);

        let mut null = Vec::new();
        write_zigzag(&mut null, 0);
        let err = decode_label(&decoder, &null).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to decode feature label. Reason: Feature value is null."
        );
    }

    #[test]
    fn test_single_branch_union() {
        let schema = nullable_long_schema(vec![AvroSchema::Long]);
        let label = dense_meta("label", DataType::Int64, vec![], 0);
        let decoder = AtdsDecoder::new(&schema, &[label], &[]).unwrap();
        let mut bytes = vec![0];
        write_zigzag(&mut bytes, -5);
        write_zigzag(&mut bytes, 0);
        assert_eq!(decode_label(&decoder, &bytes).unwrap(), -5);
    }

    #[test]
    fn test_invalid_unions() {
        let label = dense_meta("label", DataType::Int64, vec![], 0);
        for branches in [
            vec![AvroSchema::Long, AvroSchema::Null],
            vec![AvroSchema::Null, AvroSchema::Long, AvroSchema::Int],
        ] {
            let schema = nullable_long_schema(branches);
            let err = AtdsDecoder::new(&schema, std::slice::from_ref(&label), &[]).unwrap_err();
            assert!(matches!(err, SchemaError::InvalidUnionType { .. }));
        }
    }

    #[test]
    fn test_feature_not_found_and_not_record() {
        let schema = nullable_long_schema(vec![AvroSchema::Long]);
        let missing = dense_meta("weight", DataType::Float, vec![], 0);
        let err = AtdsDecoder::new(&schema, &[missing], &[]).unwrap_err();
        assert!(err
            .to_string()
            .starts_with("User defined feature 'weight' cannot be found in the input data."));

        let err = AtdsDecoder::new(&AvroSchema::Long, &[], &[]).unwrap_err();
        assert!(matches!(err, SchemaError::NotRecord { ref found, .. } if found == "long"));
    }

    #[test]
    fn test_column_types_follow_schema_order() {
        let schema = nullable_long_schema(vec![AvroSchema::Null, AvroSchema::Long]);
        let label = dense_meta("label", DataType::Int64, vec![], 0);
        let decoder = AtdsDecoder::new(&schema, &[label], &[]).unwrap();
        assert_eq!(decoder.num_columns(), 2);
        assert_eq!(
            decoder.column_types().collect::<Vec<_>>(),
            vec![
                ("label", FeatureType::Dense),
                ("extra", FeatureType::OpaqueContextual)
            ]
        );
    }
}
