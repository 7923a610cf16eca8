//! Data sources for ATDS files
//!
//! Files are read through async range requests so the block reader never
//! needs the whole file in memory.

mod local;
mod memory;
mod traits;

pub use local::{LocalFileSystem, LocalSource};
pub use memory::{MemoryProvider, MemorySource};
pub use traits::{BoxedSource, SourceProvider, StreamSource};
