//! Avro container file reading
//!
//! Header parsing, block framing over a chunked stream, and the binary
//! decoding primitives the column decoders are built on.

mod block;
pub mod decode;
mod header;
pub mod stream;
pub mod varint;

pub use block::{AvroBlock, BlockReader};
pub use decode::{
    decode_block_len, decode_boolean, decode_bytes, decode_bytes_ref, decode_double,
    decode_float, decode_int, decode_item_count, decode_long, decode_union_index, skip_bytes,
    skip_fixed, skip_value, AvroDecode,
};
pub use header::{AvroHeader, AVRO_MAGIC, SYNC_SIZE};
pub use stream::ChunkedStream;
pub use varint::{decode_varint, decode_zigzag, encode_zigzag, write_varint, write_zigzag};
