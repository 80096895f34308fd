//! Source adapter: locating run-date partitions and reading batch files.

pub mod discovery;
pub mod reader;

pub use discovery::{locate, partition_dir, BatchFile};
pub use reader::{read_batch, read_rows, Batch, HeaderMapping};
