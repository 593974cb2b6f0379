use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use termbench_model::now_ms;

use crate::cache::{CacheBlock, CacheEntry, CacheKey};
use crate::error::BlockStoreError;
use crate::flush::FlushTimerControl;
use crate::sql;

pub const PART_SIZE: i64 = 128 * 1024;
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

pub type FileMeta = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOpts {
    /// 0 means unbounded.
    #[serde(rename = "maxsize", default)]
    pub max_size: i64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub circular: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ijson: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileInfo {
    pub block_id: String,
    pub name: String,
    pub size: i64,
    pub created_ts: i64,
    pub mod_ts: i64,
    pub opts: FileOpts,
    pub meta: FileMeta,
}

pub(crate) struct Inner {
    pub(crate) conn: Mutex<Connection>,
    pub(crate) cache: Mutex<HashMap<CacheKey, Arc<CacheEntry>>>,
    pub(crate) append_lock: Mutex<()>,
    pub(crate) flush: FlushTimerControl,
}

/// Handle to one blockstore. Cheap to clone; all clones share the cache, the
/// SQLite backend, the append lock, and the flush timer.
#[derive(Clone)]
pub struct BlockStore {
    pub(crate) inner: Arc<Inner>,
}

impl BlockStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BlockStoreError> {
        let conn = Connection::open(path)?;
        Self::from_conn(conn)
    }

    pub fn in_memory() -> Result<Self, BlockStoreError> {
        let conn = Connection::open_in_memory()?;
        Self::from_conn(conn)
    }

    fn from_conn(conn: Connection) -> Result<Self, BlockStoreError> {
        let _ = conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()));
        let _ = conn.query_row("PRAGMA busy_timeout = 5000", [], |_| Ok(()));
        sql::init_schema(&conn)?;
        Ok(Self {
            inner: Arc::new(Inner {
                conn: Mutex::new(conn),
                cache: Mutex::new(HashMap::new()),
                append_lock: Mutex::new(()),
                flush: FlushTimerControl::default(),
            }),
        })
    }

    /// Creates the file row synchronously (no cache involvement). Fails when
    /// the `(block_id, name)` pair already exists.
    pub fn make_file(
        &self,
        block_id: &str,
        name: &str,
        meta: FileMeta,
        opts: FileOpts,
    ) -> Result<(), BlockStoreError> {
        let cur_ts = now_ms();
        let info = FileInfo {
            block_id: block_id.to_owned(),
            name: name.to_owned(),
            size: 0,
            created_ts: cur_ts,
            mod_ts: cur_ts,
            opts,
            meta,
        };
        let conn = self.lock_conn();
        if sql::file_exists(&conn, block_id, name)? {
            return Err(BlockStoreError::DuplicateFile {
                block_id: block_id.to_owned(),
                name: name.to_owned(),
            });
        }
        sql::insert_file(&conn, &info)
    }

    /// `make_file` followed by an append; an already-existing file just gets
    /// the data appended.
    pub fn write_file(
        &self,
        block_id: &str,
        name: &str,
        meta: FileMeta,
        opts: FileOpts,
        data: &[u8],
    ) -> Result<usize, BlockStoreError> {
        match self.make_file(block_id, name, meta, opts) {
            Ok(()) | Err(BlockStoreError::DuplicateFile { .. }) => {}
            Err(err) => return Err(err),
        }
        self.append_data(block_id, name, data)
    }

    /// Appends are serialized by a store-wide lock so concurrent appenders
    /// observe a total order.
    pub fn append_data(
        &self,
        block_id: &str,
        name: &str,
        data: &[u8],
    ) -> Result<usize, BlockStoreError> {
        let _append_guard = self
            .inner
            .append_lock
            .lock()
            .expect("blockstore append lock poisoned");
        let info = self.stat(block_id, name)?;
        self.write_at(block_id, name, data, info.size)
    }

    pub fn write_at(
        &self,
        block_id: &str,
        name: &str,
        data: &[u8],
        off: i64,
    ) -> Result<usize, BlockStoreError> {
        let entry = self.entry_or_populate(block_id, name)?;
        entry.inc_refs();
        let result = self.write_at_entry(block_id, name, &entry, data, off, true);
        entry.dec_refs();
        result
    }

    pub fn read_at(
        &self,
        block_id: &str,
        name: &str,
        buf: &mut [u8],
        off: i64,
    ) -> Result<usize, BlockStoreError> {
        let entry = self.entry_or_populate(block_id, name)?;
        entry.inc_refs();
        let result = self.read_at_entry(block_id, name, &entry, buf, off, true);
        entry.dec_refs();
        result
    }

    /// Deep-copied file info; populates a cache entry as a side effect.
    pub fn stat(&self, block_id: &str, name: &str) -> Result<FileInfo, BlockStoreError> {
        if let Some(entry) = self.get_entry(block_id, name) {
            let state = entry.state.lock().expect("blockstore entry lock poisoned");
            return Ok(state.info.clone());
        }
        let info = {
            let conn = self.lock_conn();
            sql::get_file_info(&conn, block_id, name)?
        }
        .ok_or_else(|| BlockStoreError::FileNotFound {
            block_id: block_id.to_owned(),
            name: name.to_owned(),
        })?;
        self.set_entry(block_id, name, &info);
        Ok(info)
    }

    /// Replaces the file's metadata map; persisted on the next flush.
    pub fn write_meta(
        &self,
        block_id: &str,
        name: &str,
        meta: FileMeta,
    ) -> Result<(), BlockStoreError> {
        self.stat(block_id, name)?;
        let entry = self
            .get_entry(block_id, name)
            .ok_or_else(|| BlockStoreError::Persistence("cache entry not found".to_owned()))?;
        let mut state = entry.state.lock().expect("blockstore entry lock poisoned");
        state.info.meta = meta;
        state.info.mod_ts = now_ms();
        Ok(())
    }

    pub fn delete_file(&self, block_id: &str, name: &str) -> Result<(), BlockStoreError> {
        {
            let mut cache = self.lock_cache();
            cache.remove(&CacheKey {
                block_id: block_id.to_owned(),
                name: name.to_owned(),
            });
        }
        let conn = self.lock_conn();
        sql::delete_file_rows(&conn, block_id, name)
    }

    pub fn delete_block(&self, block_id: &str) -> Result<(), BlockStoreError> {
        {
            let mut cache = self.lock_cache();
            cache.retain(|key, _| key.block_id != block_id);
        }
        let conn = self.lock_conn();
        sql::delete_block_rows(&conn, block_id)
    }

    pub fn list_files(&self, block_id: &str) -> Result<Vec<FileInfo>, BlockStoreError> {
        let conn = self.lock_conn();
        sql::list_files(&conn, block_id)
    }

    pub fn get_all_block_ids(&self) -> Result<Vec<String>, BlockStoreError> {
        let conn = self.lock_conn();
        sql::get_all_block_ids(&conn)
    }

    /// Persist every dirty part and file-info row; dirty parts are dropped
    /// after write-through, and entries with nothing cached and no borrowers
    /// are evicted.
    pub fn flush_cache(&self) -> Result<(), BlockStoreError> {
        self.inner.flush_cache()
    }

    pub fn start_flush_timer(&self, timeout: Duration) -> Result<(), BlockStoreError> {
        crate::flush::start_flush_timer(self, timeout)
    }

    /// Blocks until the timer thread has exited. No-op when not running.
    pub fn stop_flush_timer(&self) {
        crate::flush::stop_flush_timer(self);
    }

    /// Compact an incremental-JSON file into a single snapshot object: each
    /// line is a JSON object patch, later keys win.
    pub fn collapse_ijson(&self, block_id: &str, name: &str) -> Result<(), BlockStoreError> {
        let info = self.stat(block_id, name)?;
        if !info.opts.ijson {
            return Err(BlockStoreError::Persistence(format!(
                "collapse_ijson: {block_id}/{name} is not an ijson file"
            )));
        }
        let mut buf = vec![0u8; info.size as usize];
        let read = self.read_at(block_id, name, &mut buf, 0)?;
        buf.truncate(read);

        let mut snapshot = serde_json::Map::new();
        for chunk in buf.split(|b| *b == b'\n') {
            if chunk.is_empty() {
                continue;
            }
            let patch: serde_json::Map<String, serde_json::Value> =
                serde_json::from_slice(chunk).map_err(|err| {
                    BlockStoreError::Persistence(format!(
                        "collapse_ijson: bad patch in {block_id}/{name}: {err}"
                    ))
                })?;
            snapshot.extend(patch);
        }
        let mut out = serde_json::to_vec(&snapshot)
            .map_err(|err| BlockStoreError::Persistence(err.to_string()))?;
        out.push(b'\n');

        // truncate in cache and in the backend, then rewrite from offset 0
        let entry = self.entry_or_populate(block_id, name)?;
        {
            let mut state = entry.state.lock().expect("blockstore entry lock poisoned");
            state.parts.clear();
            state.info.size = 0;
            state.info.mod_ts = now_ms();
            let conn = self.lock_conn();
            sql::delete_part_rows(&conn, block_id, name)?;
            sql::write_file_info(&conn, &state.info)?;
        }
        self.write_at(block_id, name, &out, 0)?;
        Ok(())
    }

    // -- internals ---------------------------------------------------------

    fn lock_conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.inner.conn.lock().expect("blockstore db lock poisoned")
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, Arc<CacheEntry>>> {
        self.inner
            .cache
            .lock()
            .expect("blockstore cache lock poisoned")
    }

    fn get_entry(&self, block_id: &str, name: &str) -> Option<Arc<CacheEntry>> {
        let cache = self.lock_cache();
        cache
            .get(&CacheKey {
                block_id: block_id.to_owned(),
                name: name.to_owned(),
            })
            .cloned()
    }

    fn set_entry(&self, block_id: &str, name: &str, info: &FileInfo) {
        let mut cache = self.lock_cache();
        cache
            .entry(CacheKey {
                block_id: block_id.to_owned(),
                name: name.to_owned(),
            })
            .or_insert_with(|| Arc::new(CacheEntry::new(info.clone(), now_ms())));
    }

    fn entry_or_populate(
        &self,
        block_id: &str,
        name: &str,
    ) -> Result<Arc<CacheEntry>, BlockStoreError> {
        if let Some(entry) = self.get_entry(block_id, name) {
            return Ok(entry);
        }
        self.stat(block_id, name)?;
        self.get_entry(block_id, name)
            .ok_or_else(|| BlockStoreError::Persistence("cache entry not found".to_owned()))
    }

    fn write_at_entry(
        &self,
        block_id: &str,
        name: &str,
        entry: &Arc<CacheEntry>,
        data: &[u8],
        mut off: i64,
        allow_wrap: bool,
    ) -> Result<usize, BlockStoreError> {
        let (max_size, circular) = {
            let state = entry.state.lock().expect("blockstore entry lock poisoned");
            (state.info.opts.max_size, state.info.opts.circular)
        };

        let mut buf = data;
        let mut skipped = 0usize;
        if circular && max_size > 0 {
            // only the final window of an oversized write can survive, so the
            // wrap below recurses at most once
            if buf.len() as i64 > max_size {
                skipped = buf.len() - max_size as usize;
                buf = &buf[skipped..];
                off += skipped as i64;
            }
            if off >= max_size {
                off %= max_size;
            }
        }

        let mut written = 0usize;
        while !buf.is_empty() {
            let part_idx = off / PART_SIZE;
            let part_off = (off - part_idx * PART_SIZE) as usize;
            let want = buf.len().min(PART_SIZE as usize - part_off);
            // a full-part overwrite never needs the backend copy
            let pull_from_db = !(part_off == 0 && want == PART_SIZE as usize);
            let (wrote, hit_max) = self.write_to_part(
                block_id,
                name,
                entry,
                part_idx,
                part_off,
                &buf[..want],
                pull_from_db,
                max_size,
                circular,
            )?;
            written += wrote;
            off += wrote as i64;
            buf = &buf[wrote..];
            if hit_max {
                if !buf.is_empty() {
                    if circular && allow_wrap {
                        written += self.write_at_entry(block_id, name, entry, buf, 0, false)?;
                    } else {
                        return Err(BlockStoreError::MaxSize);
                    }
                }
                break;
            }
        }
        Ok(written + skipped)
    }

    #[allow(clippy::too_many_arguments)]
    fn write_to_part(
        &self,
        block_id: &str,
        name: &str,
        entry: &Arc<CacheEntry>,
        part_idx: i64,
        part_off: usize,
        data: &[u8],
        pull_from_db: bool,
        max_size: i64,
        circular: bool,
    ) -> Result<(usize, bool), BlockStoreError> {
        if part_off + data.len() > PART_SIZE as usize {
            return Err(BlockStoreError::PartOverflow(format!(
                "part {part_idx}: offset {part_off} + len {} exceeds part size",
                data.len()
            )));
        }

        let mut state = entry.state.lock().expect("blockstore entry lock poisoned");
        if state.parts.len() <= part_idx as usize {
            state.parts.resize_with(part_idx as usize + 1, || None);
        }
        if state.parts[part_idx as usize].is_none() {
            let block = if pull_from_db {
                let conn = self.lock_conn();
                let data = sql::get_part_data(&conn, block_id, name, part_idx)?.unwrap_or_default();
                CacheBlock { data, dirty: false }
            } else {
                CacheBlock::default()
            };
            state.parts[part_idx as usize] = Some(block);
        }

        // cap within this part imposed by the file max size
        let part_cap = if max_size > 0 {
            (max_size - part_idx * PART_SIZE).clamp(0, PART_SIZE) as usize
        } else {
            PART_SIZE as usize
        };
        if part_off >= part_cap {
            return Ok((0, true));
        }

        let writable = data.len().min(part_cap - part_off);
        let hit_max = writable < data.len();

        let block = state.parts[part_idx as usize]
            .as_mut()
            .expect("part populated above");
        if part_off > block.data.len() {
            // zero left-pad preserves positional semantics for sparse writes
            block.data.resize(part_off, 0);
        }
        let end = part_off + writable;
        if end > block.data.len() {
            block.data.resize(end, 0);
        }
        block.data[part_off..end].copy_from_slice(&data[..writable]);
        block.dirty = true;

        let abs_end = part_idx * PART_SIZE + end as i64;
        let size_cap = if circular && max_size > 0 {
            max_size
        } else {
            i64::MAX
        };
        state.info.size = state.info.size.max(abs_end.min(size_cap));
        state.info.mod_ts = now_ms();
        Ok((writable, hit_max))
    }

    fn read_at_entry(
        &self,
        block_id: &str,
        name: &str,
        entry: &Arc<CacheEntry>,
        buf: &mut [u8],
        mut off: i64,
        allow_wrap: bool,
    ) -> Result<usize, BlockStoreError> {
        let (size, max_size, circular) = {
            let state = entry.state.lock().expect("blockstore entry lock poisoned");
            (
                state.info.size,
                state.info.opts.max_size,
                state.info.opts.circular,
            )
        };
        if circular && max_size > 0 && off >= max_size {
            off %= max_size;
        }
        if off > size {
            return Err(BlockStoreError::ReadPastEnd);
        }

        let mut to_read = (buf.len() as i64).min(size - off).max(0) as usize;
        let mut read = 0usize;
        while to_read > 0 {
            let part_idx = off / PART_SIZE;
            let part_off = (off - part_idx * PART_SIZE) as usize;
            let want = to_read.min(PART_SIZE as usize - part_off);
            let (got, hit_max) = self.read_from_part(
                block_id,
                name,
                entry,
                part_idx,
                part_off,
                &mut buf[read..read + want],
                max_size,
            )?;
            read += got;
            off += got as i64;
            to_read -= got;
            if hit_max {
                if circular && allow_wrap && to_read > 0 {
                    let got =
                        self.read_at_entry(block_id, name, entry, &mut buf[read..], 0, false)?;
                    read += got;
                }
                break;
            }
            if got < want {
                // sparse region or short part: nothing further is stored
                break;
            }
        }
        Ok(read)
    }

    #[allow(clippy::too_many_arguments)]
    fn read_from_part(
        &self,
        block_id: &str,
        name: &str,
        entry: &Arc<CacheEntry>,
        part_idx: i64,
        part_off: usize,
        out: &mut [u8],
        max_size: i64,
    ) -> Result<(usize, bool), BlockStoreError> {
        let mut state = entry.state.lock().expect("blockstore entry lock poisoned");
        if state.parts.len() <= part_idx as usize {
            state.parts.resize_with(part_idx as usize + 1, || None);
        }
        if state.parts[part_idx as usize].is_none() {
            let conn = self.lock_conn();
            let data = sql::get_part_data(&conn, block_id, name, part_idx)?.unwrap_or_default();
            state.parts[part_idx as usize] = Some(CacheBlock { data, dirty: false });
        }
        let block = state.parts[part_idx as usize]
            .as_ref()
            .expect("part populated above");

        let part_cap = if max_size > 0 {
            (max_size - part_idx * PART_SIZE).clamp(0, PART_SIZE) as usize
        } else {
            PART_SIZE as usize
        };
        if part_off >= part_cap {
            return Ok((0, true));
        }
        let readable_cap = part_cap - part_off;
        let avail = block.data.len().saturating_sub(part_off);
        let n = out.len().min(avail).min(readable_cap);
        out[..n].copy_from_slice(&block.data[part_off..part_off + n]);
        let hit_max = n == readable_cap && n < out.len();
        Ok((n, hit_max))
    }
}

impl Inner {
    pub(crate) fn flush_cache(&self) -> Result<(), BlockStoreError> {
        let entries: Vec<(CacheKey, Arc<CacheEntry>)> = {
            let cache = self.cache.lock().expect("blockstore cache lock poisoned");
            cache
                .iter()
                .map(|(key, entry)| (key.clone(), Arc::clone(entry)))
                .collect()
        };

        for (key, entry) in entries {
            let mut clear_entry = true;
            {
                let mut state = entry.state.lock().expect("blockstore entry lock poisoned");
                {
                    let conn = self.conn.lock().expect("blockstore db lock poisoned");
                    sql::write_file_info(&conn, &state.info)?;
                }
                for part_idx in 0..state.parts.len() {
                    let Some(block) = state.parts[part_idx].as_ref() else {
                        continue;
                    };
                    if block.data.is_empty() {
                        continue;
                    }
                    if !block.dirty {
                        // clean data stays cached for readers; keeps the entry
                        clear_entry = false;
                        continue;
                    }
                    {
                        let conn = self.conn.lock().expect("blockstore db lock poisoned");
                        sql::write_part_data(
                            &conn,
                            &state.info.block_id,
                            &state.info.name,
                            part_idx as i64,
                            &block.data,
                        )?;
                    }
                    state.parts[part_idx] = None;
                }
            }
            if clear_entry && entry.refs() <= 0 {
                let mut cache = self.cache.lock().expect("blockstore cache lock poisoned");
                if let Some(current) = cache.get(&key) {
                    if Arc::ptr_eq(current, &entry) {
                        cache.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }
}
