use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use crate::store::FileInfo;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub block_id: String,
    pub name: String,
}

#[derive(Debug, Default)]
pub struct CacheBlock {
    pub data: Vec<u8>,
    pub dirty: bool,
}

/// State guarded by the entry lock: the authoritative file info plus the
/// sparse array of cached parts (index = part number).
#[derive(Debug)]
pub struct CacheEntryState {
    pub info: FileInfo,
    pub parts: Vec<Option<CacheBlock>>,
}

/// One cached file. The ref count is a borrow marker: flush may evict an
/// entry only when `refs == 0` and no part is dirty.
#[derive(Debug)]
pub struct CacheEntry {
    pub state: Mutex<CacheEntryState>,
    pub cache_ts: i64,
    refs: AtomicI64,
}

impl CacheEntry {
    pub fn new(info: FileInfo, cache_ts: i64) -> Self {
        Self {
            state: Mutex::new(CacheEntryState {
                info,
                parts: Vec::new(),
            }),
            cache_ts,
            refs: AtomicI64::new(0),
        }
    }

    pub fn inc_refs(&self) {
        self.refs.fetch_add(1, Ordering::SeqCst);
    }

    pub fn dec_refs(&self) {
        self.refs.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn refs(&self) -> i64 {
        self.refs.load(Ordering::SeqCst)
    }
}
