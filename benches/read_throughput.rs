//! Benchmark suite for ATDS read throughput
//!
//! Files are generated in memory so the suite needs no fixtures. Each record
//! holds a dense float vector, a sparse float feature and a varlen list of
//! ids. The groups measure:
//! - codecs (null, snappy, deflate)
//! - batch sizes
//! - decode parallelism, including autotuning
//! - shuffle buffer sizes
//!
//! # Configuration
//!
//! - `BENCH_SAMPLE_SIZE`: Number of samples to collect (default: 100)
//! - `BENCH_MEASUREMENT_TIME`: Measurement time in seconds (default: 5)
//! - `BENCH_WARM_UP_TIME`: Warm-up time in seconds (default: 3)
//! - `BENCH_RECORDS`: Records per generated file (default: 100000)
//!
//! ```bash
//! BENCH_SAMPLE_SIZE=20 BENCH_RECORDS=20000 cargo bench
//! ```

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use atds::reader::write_zigzag;
use atds::tensor::DataType;
use atds::{AtdsConfig, AtdsDataset, FeatureSpec, MemoryProvider, AUTOTUNE};

const RECORDS_PER_BLOCK: usize = 1_000;
const DENSE_WIDTH: usize = 16;
const SYNC: [u8; 16] = [0x5A; 16];

fn run_async<F: std::future::Future>(f: F) -> F::Output {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
        .block_on(f)
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let value = std::env::var(name).ok()?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            eprintln!("Warning: Invalid {} value: {}", name, value);
            None
        }
    }
}

fn configure_criterion() -> Criterion {
    let mut criterion = Criterion::default();
    if let Some(size) = env_parse::<usize>("BENCH_SAMPLE_SIZE") {
        criterion = criterion.sample_size(size);
    }
    if let Some(secs) = env_parse::<u64>("BENCH_MEASUREMENT_TIME") {
        criterion = criterion.measurement_time(Duration::from_secs(secs));
    }
    if let Some(secs) = env_parse::<u64>("BENCH_WARM_UP_TIME") {
        criterion = criterion.warm_up_time(Duration::from_secs(secs));
    }
    criterion
}

fn num_records() -> usize {
    env_parse("BENCH_RECORDS").unwrap_or(100_000)
}

// ============================================================================
// File generation
// ============================================================================

const SCHEMA: &str = r#"{"type":"record","name":"row","fields":[
    {"name":"embedding","type":{"type":"array","items":"float"}},
    {"name":"weights","type":{"type":"record","name":"weights","fields":[
        {"name":"indices0","type":{"type":"array","items":"long"}},
        {"name":"values","type":{"type":"array","items":"float"}}]}},
    {"name":"ids","type":{"type":"array","items":"long"}},
    {"name":"comment","type":"string"}]}"#;

fn write_long_array(out: &mut Vec<u8>, values: impl ExactSizeIterator<Item = i64>) {
    if values.len() > 0 {
        write_zigzag(out, values.len() as i64);
        for v in values {
            write_zigzag(out, v);
        }
    }
    out.push(0);
}

fn write_float_array(out: &mut Vec<u8>, values: impl ExactSizeIterator<Item = f32>) {
    if values.len() > 0 {
        write_zigzag(out, values.len() as i64);
        for v in values {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    out.push(0);
}

fn write_record(out: &mut Vec<u8>, i: usize) {
    write_float_array(out, (0..DENSE_WIDTH).map(|d| (i * d) as f32 * 0.5));
    let nnz = i % 4;
    write_long_array(out, (0..nnz).map(|k| (k * 7 + i % 5) as i64));
    write_float_array(out, (0..nnz).map(|k| k as f32));
    write_long_array(out, (0..i % 8).map(|k| (i + k) as i64));
    let comment = b"not requested";
    write_zigzag(out, comment.len() as i64);
    out.extend_from_slice(comment);
}

fn compress(codec: &str, data: Vec<u8>) -> Vec<u8> {
    match codec {
        #[cfg(feature = "deflate")]
        "deflate" => {
            use std::io::Write;
            let mut encoder =
                flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::fast());
            encoder.write_all(&data).unwrap();
            encoder.finish().unwrap()
        }
        #[cfg(feature = "snappy")]
        "snappy" => {
            let mut out = snap::raw::Encoder::new().compress_vec(&data).unwrap();
            out.extend_from_slice(&crc32fast::hash(&data).to_be_bytes());
            out
        }
        _ => data,
    }
}

fn generate_file(codec: &str, records: usize) -> Vec<u8> {
    let mut file = b"Obj\x01".to_vec();
    write_zigzag(&mut file, 2);
    for (key, value) in [("avro.schema", SCHEMA), ("avro.codec", codec)] {
        write_zigzag(&mut file, key.len() as i64);
        file.extend_from_slice(key.as_bytes());
        write_zigzag(&mut file, value.len() as i64);
        file.extend_from_slice(value.as_bytes());
    }
    file.push(0);
    file.extend_from_slice(&SYNC);

    let mut start = 0;
    while start < records {
        let end = (start + RECORDS_PER_BLOCK).min(records);
        let mut content = Vec::new();
        for i in start..end {
            write_record(&mut content, i);
        }
        let content = compress(codec, content);
        write_zigzag(&mut file, (end - start) as i64);
        write_zigzag(&mut file, content.len() as i64);
        file.extend_from_slice(&content);
        file.extend_from_slice(&SYNC);
        start = end;
    }
    file
}

fn dataset(file: &[u8], config: AtdsConfig) -> AtdsDataset {
    let provider = MemoryProvider::new().with_file("bench.avro", file.to_vec());
    let config = config
        .with_filenames(["bench.avro"])
        .with_feature("embedding", FeatureSpec::dense(DataType::Float, [DENSE_WIDTH as i64]))
        .with_feature("weights", FeatureSpec::sparse(DataType::Float, [64]))
        .with_feature("ids", FeatureSpec::varlen(DataType::Int64, [-1]));
    AtdsDataset::with_provider(config, Arc::new(provider)).unwrap()
}

async fn read_all_records(dataset: &AtdsDataset) -> usize {
    let mut iter = dataset.iter().unwrap();
    let mut total_records = 0;
    while let Some(batch) = iter.next_batch().await.unwrap() {
        total_records += batch.num_records();
        black_box(&batch);
    }
    total_records
}

// ============================================================================
// Benchmarks
// ============================================================================

fn bench_codecs(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec_throughput");
    let records = num_records();
    group.throughput(Throughput::Elements(records as u64));

    for codec in ["null", "snappy", "deflate"] {
        if codec == "snappy" && !cfg!(feature = "snappy") {
            continue;
        }
        if codec == "deflate" && !cfg!(feature = "deflate") {
            continue;
        }
        let file = generate_file(codec, records);
        let ds = dataset(&file, AtdsConfig::new().with_batch_size(1024));
        group.bench_with_input(BenchmarkId::new("read", codec), &ds, |b, ds| {
            b.iter(|| run_async(read_all_records(ds)));
        });
    }

    group.finish();
}

fn bench_batch_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_size_throughput");
    let records = num_records();
    let file = generate_file("null", records);
    group.throughput(Throughput::Bytes(file.len() as u64));

    for batch_size in [64, 512, 4096, 16384] {
        let ds = dataset(&file, AtdsConfig::new().with_batch_size(batch_size));
        group.bench_with_input(BenchmarkId::new("read", batch_size), &ds, |b, ds| {
            b.iter(|| run_async(read_all_records(ds)));
        });
    }

    group.finish();
}

fn bench_parallelism(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_decode_throughput");
    let records = num_records();
    let file = generate_file("snappy", records);
    group.throughput(Throughput::Elements(records as u64));

    for (name, num_parallel_calls) in [("1", 1), ("2", 2), ("4", 4), ("autotune", AUTOTUNE)] {
        let config = AtdsConfig::new()
            .with_batch_size(4096)
            .with_num_parallel_calls(num_parallel_calls);
        let ds = dataset(&file, config);
        group.bench_with_input(BenchmarkId::new("threads", name), &ds, |b, ds| {
            b.iter(|| run_async(read_all_records(ds)));
        });
    }

    group.finish();
}

fn bench_shuffle(c: &mut Criterion) {
    let mut group = c.benchmark_group("shuffle_throughput");
    let records = num_records();
    let file = generate_file("null", records);
    group.throughput(Throughput::Elements(records as u64));

    for shuffle_buffer_size in [0, 1024, 16384] {
        let config = AtdsConfig::new()
            .with_batch_size(1024)
            .with_shuffle_buffer_size(shuffle_buffer_size);
        let ds = dataset(&file, config);
        group.bench_with_input(
            BenchmarkId::new("buffer", shuffle_buffer_size),
            &ds,
            |b, ds| {
                b.iter(|| run_async(read_all_records(ds)));
            },
        );
    }

    group.finish();
}

criterion_group! {
    name = benches;
    config = configure_criterion();
    targets = bench_codecs, bench_batch_sizes, bench_parallelism, bench_shuffle
}

criterion_main!(benches);
