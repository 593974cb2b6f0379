//! Chunked, cache-backed binary file store.
//!
//! Files are addressed by `(block_id, name, offset)` and split into 128 KiB
//! parts that are cached individually and written through to SQLite by a
//! periodic flush. Circular files wrap writes and reads at `max_size`, which
//! makes them suitable for unbounded log-like output with a bounded
//! footprint.

mod cache;
mod error;
mod flush;
mod sql;
mod store;

#[cfg(test)]
mod tests;

pub use cache::{CacheBlock, CacheEntry, CacheKey};
pub use error::BlockStoreError;
pub use store::{BlockStore, FileInfo, FileMeta, FileOpts, DEFAULT_FLUSH_TIMEOUT, PART_SIZE};
