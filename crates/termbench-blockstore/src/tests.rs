use std::time::Duration;

use crate::{BlockStore, BlockStoreError, FileMeta, FileOpts, PART_SIZE};

fn unbounded() -> FileOpts {
    FileOpts::default()
}

fn circular(max_size: i64) -> FileOpts {
    FileOpts {
        max_size,
        circular: true,
        ijson: false,
    }
}

fn read_all(store: &BlockStore, block_id: &str, name: &str) -> Vec<u8> {
    let info = store.stat(block_id, name).expect("stat file");
    let mut buf = vec![0u8; info.size as usize];
    let read = store
        .read_at(block_id, name, &mut buf, 0)
        .expect("read file");
    buf.truncate(read);
    buf
}

#[test]
fn make_file_rejects_duplicates() {
    let store = BlockStore::in_memory().expect("open store");
    store
        .make_file("b1", "f", FileMeta::new(), unbounded())
        .expect("create file");
    let err = store
        .make_file("b1", "f", FileMeta::new(), unbounded())
        .expect_err("duplicate create should fail");
    assert!(matches!(err, BlockStoreError::DuplicateFile { .. }));
}

#[test]
fn contiguous_chunked_writes_round_trip_across_parts() {
    let store = BlockStore::in_memory().expect("open store");
    store
        .make_file("b1", "f", FileMeta::new(), unbounded())
        .expect("create file");

    // ~3.2 parts, written in uneven chunks
    let total = (PART_SIZE * 3 + 27_000) as usize;
    let payload: Vec<u8> = (0..total).map(|idx| (idx % 251) as u8).collect();
    let mut off = 0usize;
    for chunk in payload.chunks(61_000) {
        let written = store
            .write_at("b1", "f", chunk, off as i64)
            .expect("write chunk");
        assert_eq!(written, chunk.len());
        off += chunk.len();
    }

    assert_eq!(store.stat("b1", "f").expect("stat").size, total as i64);
    store.flush_cache().expect("flush");
    assert_eq!(read_all(&store, "b1", "f"), payload);
}

#[test]
fn append_data_tracks_file_size() {
    let store = BlockStore::in_memory().expect("open store");
    store
        .make_file("b1", "log", FileMeta::new(), unbounded())
        .expect("create file");
    store.append_data("b1", "log", b"hello ").expect("append");
    store.append_data("b1", "log", b"world").expect("append");
    assert_eq!(read_all(&store, "b1", "log"), b"hello world");
}

#[test]
fn sparse_write_left_pads_with_zero_bytes() {
    let store = BlockStore::in_memory().expect("open store");
    store
        .make_file("b1", "f", FileMeta::new(), unbounded())
        .expect("create file");
    store.write_at("b1", "f", b"xyz", 10).expect("sparse write");

    let data = read_all(&store, "b1", "f");
    assert_eq!(data.len(), 13);
    assert_eq!(&data[..10], &[0u8; 10]);
    assert_eq!(&data[10..], b"xyz");
}

#[test]
fn circular_append_caps_size_and_keeps_written_window() {
    let store = BlockStore::in_memory().expect("open store");
    store
        .make_file("b1", "f", FileMeta::new(), circular(300))
        .expect("create file");
    let written = store
        .append_data("b1", "f", &[b'A'; 350])
        .expect("append 350 bytes");
    assert_eq!(written, 350);

    let info = store.stat("b1", "f").expect("stat");
    assert_eq!(info.size, 300);

    let mut buf = vec![0u8; 300];
    let read = store.read_at("b1", "f", &mut buf, 0).expect("read window");
    assert_eq!(read, 300);
    assert!(buf.iter().all(|b| *b == b'A'));
}

#[test]
fn circular_sequential_writes_keep_last_window() {
    let max = 256i64;
    let store = BlockStore::in_memory().expect("open store");
    store
        .make_file("b1", "f", FileMeta::new(), circular(max))
        .expect("create file");

    // 3 * max + 100 bytes of a recognizable sequence, written in chunks at
    // increasing absolute offsets
    let total = (3 * max + 100) as usize;
    let payload: Vec<u8> = (0..total).map(|idx| (idx % 199) as u8).collect();
    let mut off = 0usize;
    for chunk in payload.chunks(37) {
        store
            .write_at("b1", "f", chunk, off as i64)
            .expect("write chunk");
        off += chunk.len();
    }

    let info = store.stat("b1", "f").expect("stat");
    assert_eq!(info.size, max);

    // the stored window holds stream position p at offset (p mod max)
    let mut buf = vec![0u8; max as usize];
    let read = store.read_at("b1", "f", &mut buf, 0).expect("read window");
    assert_eq!(read, max as usize);
    for (idx, byte) in buf.iter().enumerate() {
        let mut stream_pos = idx;
        // the last occupant of this slot
        while stream_pos + (max as usize) < total {
            stream_pos += max as usize;
        }
        assert_eq!(*byte, payload[stream_pos], "offset {idx}");
    }
}

#[test]
fn oversized_circular_write_survives_and_keeps_last_max_bytes() {
    let store = BlockStore::in_memory().expect("open store");
    store
        .make_file("b1", "f", FileMeta::new(), circular(100))
        .expect("create file");
    let payload: Vec<u8> = (0..1000u32).map(|idx| (idx % 256) as u8).collect();
    let written = store.write_at("b1", "f", &payload, 0).expect("big write");
    assert_eq!(written, 1000);

    let window = read_all(&store, "b1", "f");
    assert_eq!(window.len(), 100);
    for (idx, byte) in window.iter().enumerate() {
        // stream positions 900..1000 land on offsets (p mod 100) = p - 900
        assert_eq!(*byte, payload[900 + idx]);
    }
}

#[test]
fn read_past_end_fails_but_read_at_end_returns_zero_bytes() {
    let store = BlockStore::in_memory().expect("open store");
    store
        .make_file("b1", "f", FileMeta::new(), unbounded())
        .expect("create file");
    store.write_at("b1", "f", b"abc", 0).expect("write");

    let mut buf = [0u8; 8];
    let read = store.read_at("b1", "f", &mut buf, 3).expect("read at end");
    assert_eq!(read, 0);

    let err = store
        .read_at("b1", "f", &mut buf, 4)
        .expect_err("read past end should fail");
    assert!(matches!(err, BlockStoreError::ReadPastEnd));
}

#[test]
fn non_circular_write_past_max_size_surfaces_sentinel() {
    let store = BlockStore::in_memory().expect("open store");
    store
        .make_file(
            "b1",
            "f",
            FileMeta::new(),
            FileOpts {
                max_size: 10,
                circular: false,
                ijson: false,
            },
        )
        .expect("create file");
    let err = store
        .write_at("b1", "f", b"0123456789abcdef", 0)
        .expect_err("overflowing a bounded file should fail");
    assert!(matches!(err, BlockStoreError::MaxSize));
    // the in-bounds prefix landed
    assert_eq!(store.stat("b1", "f").expect("stat").size, 10);
}

#[test]
fn flush_is_idempotent_and_persists_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("blockstore.db");
    let payload: Vec<u8> = (0..10_000u32).map(|idx| (idx % 241) as u8).collect();

    {
        let store = BlockStore::open(&db_path).expect("open store");
        store
            .make_file("b1", "f", FileMeta::new(), unbounded())
            .expect("create file");
        store.write_at("b1", "f", &payload, 0).expect("write");
        store.flush_cache().expect("first flush");
        store.flush_cache().expect("second flush");
        assert_eq!(read_all(&store, "b1", "f"), payload);
    }

    let reopened = BlockStore::open(&db_path).expect("reopen store");
    assert_eq!(reopened.stat("b1", "f").expect("stat").size, 10_000);
    assert_eq!(read_all(&reopened, "b1", "f"), payload);
}

#[test]
fn flush_evicts_idle_entries_with_no_dirty_parts() {
    let store = BlockStore::in_memory().expect("open store");
    store
        .make_file("b1", "f", FileMeta::new(), unbounded())
        .expect("create file");
    store.write_at("b1", "f", b"data", 0).expect("write");
    store.flush_cache().expect("flush");

    let cache = store
        .inner
        .cache
        .lock()
        .expect("cache lock poisoned in test");
    assert!(
        cache.is_empty(),
        "flushed entry with no refs should be evicted"
    );
}

#[test]
fn write_meta_survives_flush_and_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("blockstore.db");

    {
        let store = BlockStore::open(&db_path).expect("open store");
        store
            .make_file("b1", "f", FileMeta::new(), unbounded())
            .expect("create file");
        let mut meta = FileMeta::new();
        meta.insert("ptypos".to_owned(), serde_json::json!(120));
        store.write_meta("b1", "f", meta).expect("write meta");
        store.flush_cache().expect("flush");
    }

    let reopened = BlockStore::open(&db_path).expect("reopen store");
    let info = reopened.stat("b1", "f").expect("stat");
    assert_eq!(info.meta.get("ptypos"), Some(&serde_json::json!(120)));
}

#[test]
fn delete_file_and_block_remove_rows_and_cache_entries() {
    let store = BlockStore::in_memory().expect("open store");
    for name in ["f1", "f2"] {
        store
            .make_file("b1", name, FileMeta::new(), unbounded())
            .expect("create file");
        store.write_at("b1", name, b"x", 0).expect("write");
    }

    store.delete_file("b1", "f1").expect("delete file");
    assert!(matches!(
        store.stat("b1", "f1"),
        Err(BlockStoreError::FileNotFound { .. })
    ));
    assert_eq!(store.list_files("b1").expect("list").len(), 1);

    store.delete_block("b1").expect("delete block");
    assert!(store.list_files("b1").expect("list").is_empty());
    assert!(store.get_all_block_ids().expect("block ids").is_empty());
}

#[test]
fn collapse_ijson_compacts_patches_into_single_snapshot() {
    let store = BlockStore::in_memory().expect("open store");
    store
        .make_file(
            "b1",
            "state.ijson",
            FileMeta::new(),
            FileOpts {
                max_size: 0,
                circular: false,
                ijson: true,
            },
        )
        .expect("create file");
    store
        .append_data("b1", "state.ijson", b"{\"a\":1,\"c\":true}\n")
        .expect("append patch");
    store
        .append_data("b1", "state.ijson", b"{\"b\":2}\n")
        .expect("append patch");
    store
        .append_data("b1", "state.ijson", b"{\"a\":3}\n")
        .expect("append patch");

    store
        .collapse_ijson("b1", "state.ijson")
        .expect("collapse ijson");

    let data = read_all(&store, "b1", "state.ijson");
    let value: serde_json::Value =
        serde_json::from_slice(data.strip_suffix(b"\n").unwrap_or(&data)).expect("parse snapshot");
    assert_eq!(value, serde_json::json!({"a": 3, "b": 2, "c": true}));
}

#[test]
fn collapse_ijson_rejects_non_ijson_files() {
    let store = BlockStore::in_memory().expect("open store");
    store
        .make_file("b1", "f", FileMeta::new(), unbounded())
        .expect("create file");
    assert!(store.collapse_ijson("b1", "f").is_err());
}

#[test]
fn flush_timer_persists_writes_and_stops_deterministically() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("blockstore.db");
    let store = BlockStore::open(&db_path).expect("open store");
    store
        .make_file("b1", "f", FileMeta::new(), unbounded())
        .expect("create file");

    store
        .start_flush_timer(Duration::from_millis(20))
        .expect("start timer");
    assert!(matches!(
        store.start_flush_timer(Duration::from_millis(20)),
        Err(BlockStoreError::FlushTimerRunning)
    ));

    store.write_at("b1", "f", b"ticked", 0).expect("write");

    let reader = BlockStore::open(&db_path).expect("second handle");
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        if reader.stat("b1", "f").map(|info| info.size).unwrap_or(0) == 6 {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "flush timer never persisted the write"
        );
        std::thread::sleep(Duration::from_millis(10));
    }

    store.stop_flush_timer();
    // restart after stop is allowed
    store
        .start_flush_timer(Duration::from_millis(20))
        .expect("restart timer");
    store.stop_flush_timer();
}
