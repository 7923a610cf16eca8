//! Helpers shared by the integration tests: an Avro container writer and a
//! small datum encoder for building ATDS files in memory.

#![allow(dead_code)]

use std::sync::Arc;

use atds::reader::write_zigzag;
use atds::{AtdsConfig, AtdsDataset, Batch, MemoryProvider, ReaderError};

pub const SYNC: [u8; 16] = [
    0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE, 0xBA, 0xBE, 0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE,
    0xF0,
];

pub fn run_async<F: std::future::Future>(f: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(f)
}

// ============================================================================
// Datum encoding
// ============================================================================

/// A value in Avro binary encoding terms.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
    Array(Vec<Datum>),
    /// Fields in schema order
    Record(Vec<Datum>),
    Union(usize, Box<Datum>),
}

impl Datum {
    pub fn str(s: &str) -> Self {
        Datum::Str(s.to_string())
    }

    pub fn longs(values: &[i64]) -> Self {
        Datum::Array(values.iter().map(|&v| Datum::Long(v)).collect())
    }

    pub fn ints(values: &[i32]) -> Self {
        Datum::Array(values.iter().map(|&v| Datum::Int(v)).collect())
    }

    pub fn floats(values: &[f32]) -> Self {
        Datum::Array(values.iter().map(|&v| Datum::Float(v)).collect())
    }

    pub fn doubles(values: &[f64]) -> Self {
        Datum::Array(values.iter().map(|&v| Datum::Double(v)).collect())
    }

    pub fn bools(values: &[bool]) -> Self {
        Datum::Array(values.iter().map(|&v| Datum::Bool(v)).collect())
    }

    pub fn strs(values: &[&str]) -> Self {
        Datum::Array(values.iter().map(|v| Datum::str(v)).collect())
    }

    /// A sparse column: one `indices{d}` array per dimension, then `values`.
    pub fn sparse(indices: &[&[i64]], values: Datum) -> Self {
        let mut fields: Vec<Datum> = indices.iter().map(|dim| Datum::longs(dim)).collect();
        fields.push(values);
        Datum::Record(fields)
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Datum::Null => {}
            Datum::Bool(v) => out.push(u8::from(*v)),
            Datum::Int(v) => write_zigzag(out, i64::from(*v)),
            Datum::Long(v) => write_zigzag(out, *v),
            Datum::Float(v) => out.extend_from_slice(&v.to_le_bytes()),
            Datum::Double(v) => out.extend_from_slice(&v.to_le_bytes()),
            Datum::Str(s) => {
                write_zigzag(out, s.len() as i64);
                out.extend_from_slice(s.as_bytes());
            }
            Datum::Array(items) => {
                if !items.is_empty() {
                    write_zigzag(out, items.len() as i64);
                    for item in items {
                        item.encode(out);
                    }
                }
                out.push(0);
            }
            Datum::Record(fields) => {
                for field in fields {
                    field.encode(out);
                }
            }
            Datum::Union(branch, value) => {
                write_zigzag(out, *branch as i64);
                value.encode(out);
            }
        }
    }
}

pub fn encode_records(records: &[Datum]) -> Vec<u8> {
    let mut out = Vec::new();
    for record in records {
        record.encode(&mut out);
    }
    out
}

// ============================================================================
// Container files
// ============================================================================

/// Compress block content the way a writer with `codec` would.
pub fn compress(codec: &str, data: &[u8]) -> Vec<u8> {
    match codec {
        "null" => data.to_vec(),
        #[cfg(feature = "deflate")]
        "deflate" => {
            use std::io::Write;
            let mut encoder =
                flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(data).unwrap();
            encoder.finish().unwrap()
        }
        #[cfg(feature = "snappy")]
        "snappy" => {
            let mut out = snap::raw::Encoder::new().compress_vec(data).unwrap();
            out.extend_from_slice(&crc32fast::hash(data).to_be_bytes());
            out
        }
        other => panic!("codec {} not available", other),
    }
}

/// Build an object container file. Each inner slice is one block.
pub fn create_avro_file_with_blocks(schema: &str, codec: &str, blocks: &[&[Datum]]) -> Vec<u8> {
    let mut file = Vec::new();
    file.extend_from_slice(b"Obj\x01");

    write_zigzag(&mut file, 2);
    for (key, value) in [("avro.schema", schema), ("avro.codec", codec)] {
        write_zigzag(&mut file, key.len() as i64);
        file.extend_from_slice(key.as_bytes());
        write_zigzag(&mut file, value.len() as i64);
        file.extend_from_slice(value.as_bytes());
    }
    file.push(0);
    file.extend_from_slice(&SYNC);

    for records in blocks {
        let content = compress(codec, &encode_records(records));
        write_zigzag(&mut file, records.len() as i64);
        write_zigzag(&mut file, content.len() as i64);
        file.extend_from_slice(&content);
        file.extend_from_slice(&SYNC);
    }
    file
}

// ============================================================================
// Schemas
// ============================================================================

pub fn record_schema(fields: &[(&str, String)]) -> String {
    let fields: Vec<String> = fields
        .iter()
        .map(|(name, ty)| format!(r#"{{"name":"{}","type":{}}}"#, name, ty))
        .collect();
    format!(
        r#"{{"type":"record","name":"row","fields":[{}]}}"#,
        fields.join(",")
    )
}

/// `rank` levels of arrays around `item`.
pub fn array_type(item: &str, rank: usize) -> String {
    let mut ty = format!(r#""{}""#, item);
    for _ in 0..rank {
        ty = format!(r#"{{"type":"array","items":{}}}"#, ty);
    }
    ty
}

/// Record with `indices0..indices{rank-1}` and `values`.
pub fn sparse_type(name: &str, item: &str, rank: usize) -> String {
    let mut fields: Vec<String> = (0..rank)
        .map(|d| format!(r#"{{"name":"indices{}","type":{}}}"#, d, array_type("long", 1)))
        .collect();
    fields.push(format!(r#"{{"name":"values","type":{}}}"#, array_type(item, 1)));
    format!(
        r#"{{"type":"record","name":"{}","fields":[{}]}}"#,
        name,
        fields.join(",")
    )
}

/// `id: long` plus a varlen `tags: array<long>`; record `i` carries `i % 3`
/// copies of `i` as tags.
pub fn id_tags_schema() -> String {
    record_schema(&[("id", array_type("long", 0)), ("tags", array_type("long", 1))])
}

pub fn id_tags_record(id: i64) -> Datum {
    let tags = vec![id; (id % 3) as usize];
    Datum::Record(vec![Datum::Long(id), Datum::longs(&tags)])
}

/// Records `start..end` split into blocks of `block_size`.
pub fn id_tags_blocks(start: i64, end: i64, block_size: usize) -> Vec<Vec<Datum>> {
    let records: Vec<Datum> = (start..end).map(id_tags_record).collect();
    records.chunks(block_size).map(<[Datum]>::to_vec).collect()
}

pub fn id_tags_file(codec: &str, start: i64, end: i64, block_size: usize) -> Vec<u8> {
    let blocks = id_tags_blocks(start, end, block_size);
    let refs: Vec<&[Datum]> = blocks.iter().map(Vec::as_slice).collect();
    create_avro_file_with_blocks(&id_tags_schema(), codec, &refs)
}

pub fn id_tags_config(filenames: &[&str], batch_size: i64) -> AtdsConfig {
    use atds::tensor::DataType;
    use atds::FeatureSpec;

    AtdsConfig::new()
        .with_filenames(filenames.iter().copied())
        .with_batch_size(batch_size)
        .with_feature("id", FeatureSpec::dense(DataType::Int64, []))
        .with_feature("tags", FeatureSpec::varlen(DataType::Int64, [-1]))
}

// ============================================================================
// Running a dataset
// ============================================================================

pub fn dataset(config: AtdsConfig, provider: MemoryProvider) -> AtdsDataset {
    AtdsDataset::with_provider(config, Arc::new(provider)).unwrap()
}

/// Collect every batch, stopping at the first error.
pub async fn collect_batches(dataset: &AtdsDataset) -> (Vec<Batch>, Option<ReaderError>) {
    let mut iter = dataset.iter().unwrap();
    let mut batches = Vec::new();
    loop {
        match iter.next_batch().await {
            Ok(Some(batch)) => batches.push(batch),
            Ok(None) => return (batches, None),
            Err(e) => return (batches, Some(e)),
        }
    }
}

pub fn ids(batch: &Batch) -> Vec<i64> {
    batch
        .get("id")
        .and_then(|f| f.as_dense())
        .and_then(|t| t.as_slice::<i64>())
        .unwrap()
        .to_vec()
}
