use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

use rusqlite::{params, Connection, OptionalExtension};
use termbench_model::{LineId, ScreenId};

use crate::error::PtyFileError;
use crate::store::PtyFileStore;

/// Artefacts at or below this size are inlined into the per-screen filedb;
/// anything larger stays on disk.
pub const MAX_DB_FILE_SIZE: i64 = 10 * 1024;

const FILEDB_NAME: &str = "filedb.db";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub screen_id: ScreenId,
    pub line_id: LineId,
    pub filename: String,
    pub file_type: String,
    pub disk_filename: String,
    pub contents: Vec<u8>,
}

#[derive(Debug, Default)]
struct HandleFlag {
    in_use: bool,
}

/// One open filedb. Callers wait on the condvar while another caller holds
/// the handle; the connection itself is only touched by the holder.
#[derive(Debug)]
struct FileDbHandle {
    flag: Mutex<HandleFlag>,
    cvar: Condvar,
    conn: Mutex<Connection>,
}

/// Cache of per-screen filedb handles.
pub struct FileDbCache {
    files: PtyFileStore,
    handles: Mutex<HashMap<ScreenId, Arc<FileDbHandle>>>,
}

impl FileDbCache {
    pub fn new(files: PtyFileStore) -> Self {
        Self {
            files,
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn write_file(&self, record: &FileRecord) -> Result<(), PtyFileError> {
        let size = record.contents.len() as i64;
        if size > MAX_DB_FILE_SIZE {
            return Err(PtyFileError::TooLarge {
                size,
                max: MAX_DB_FILE_SIZE,
            });
        }
        self.with_db(&record.screen_id, |conn| {
            conn.execute(
                "
                INSERT INTO file (screenid, lineid, filename, filetype, diskfilename, contents)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(screenid, lineid, filename) DO UPDATE SET
                    filetype = excluded.filetype,
                    diskfilename = excluded.diskfilename,
                    contents = excluded.contents
                ",
                params![
                    record.screen_id.as_str(),
                    record.line_id.as_str(),
                    record.filename,
                    record.file_type,
                    record.disk_filename,
                    record.contents,
                ],
            )?;
            Ok(())
        })
    }

    pub fn read_file(
        &self,
        screen_id: &ScreenId,
        line_id: &LineId,
        filename: &str,
    ) -> Result<Option<FileRecord>, PtyFileError> {
        self.with_db(screen_id, |conn| {
            let record = conn
                .query_row(
                    "
                    SELECT screenid, lineid, filename, filetype, diskfilename, contents
                    FROM file
                    WHERE screenid = ?1 AND lineid = ?2 AND filename = ?3
                    ",
                    params![screen_id.as_str(), line_id.as_str(), filename],
                    |row| {
                        Ok(FileRecord {
                            screen_id: ScreenId::new(row.get::<_, String>(0)?),
                            line_id: LineId::new(row.get::<_, String>(1)?),
                            filename: row.get(2)?,
                            file_type: row.get(3)?,
                            disk_filename: row.get(4)?,
                            contents: row.get(5)?,
                        })
                    },
                )
                .optional()?;
            Ok(record)
        })
    }

    pub fn list_line_files(
        &self,
        screen_id: &ScreenId,
        line_id: &LineId,
    ) -> Result<Vec<String>, PtyFileError> {
        self.with_db(screen_id, |conn| {
            let mut stmt = conn.prepare(
                "SELECT filename FROM file WHERE screenid = ?1 AND lineid = ?2 ORDER BY filename",
            )?;
            let rows = stmt.query_map(params![screen_id.as_str(), line_id.as_str()], |row| {
                row.get::<_, String>(0)
            })?;
            let mut names = Vec::new();
            for row in rows {
                names.push(row?);
            }
            Ok(names)
        })
    }

    pub fn delete_line_files(
        &self,
        screen_id: &ScreenId,
        line_id: &LineId,
    ) -> Result<(), PtyFileError> {
        self.with_db(screen_id, |conn| {
            conn.execute(
                "DELETE FROM file WHERE screenid = ?1 AND lineid = ?2",
                params![screen_id.as_str(), line_id.as_str()],
            )?;
            Ok(())
        })
    }

    /// Drop the cached handle for a screen (its directory is going away).
    pub fn evict_screen(&self, screen_id: &ScreenId) {
        let mut handles = self.handles.lock().expect("filedb cache lock poisoned");
        handles.remove(screen_id);
    }

    fn with_db<T>(
        &self,
        screen_id: &ScreenId,
        f: impl FnOnce(&Connection) -> Result<T, PtyFileError>,
    ) -> Result<T, PtyFileError> {
        let handle = self.handle(screen_id)?;

        {
            let mut flag = handle.flag.lock().expect("filedb handle lock poisoned");
            while flag.in_use {
                flag = handle
                    .cvar
                    .wait(flag)
                    .expect("filedb handle lock poisoned");
            }
            flag.in_use = true;
        }

        let result = {
            let conn = handle.conn.lock().expect("filedb conn lock poisoned");
            f(&conn)
        };

        let mut flag = handle.flag.lock().expect("filedb handle lock poisoned");
        flag.in_use = false;
        handle.cvar.notify_one();
        result
    }

    fn handle(&self, screen_id: &ScreenId) -> Result<Arc<FileDbHandle>, PtyFileError> {
        {
            let handles = self.handles.lock().expect("filedb cache lock poisoned");
            if let Some(handle) = handles.get(screen_id) {
                return Ok(Arc::clone(handle));
            }
        }
        let dir = self.files.ensure_screen_dir(screen_id)?;
        let conn = Connection::open(dir.join(FILEDB_NAME))?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS file (
                screenid TEXT NOT NULL,
                lineid TEXT NOT NULL,
                filename TEXT NOT NULL,
                filetype TEXT NOT NULL,
                diskfilename TEXT NOT NULL,
                contents BLOB NOT NULL,
                PRIMARY KEY (screenid, lineid, filename)
            );
            ",
        )?;
        let handle = Arc::new(FileDbHandle {
            flag: Mutex::new(HandleFlag::default()),
            cvar: Condvar::new(),
            conn: Mutex::new(conn),
        });
        let mut handles = self.handles.lock().expect("filedb cache lock poisoned");
        Ok(Arc::clone(
            handles
                .entry(screen_id.clone())
                .or_insert_with(|| handle),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> (tempfile::TempDir, FileDbCache) {
        let dir = tempfile::tempdir().expect("tempdir");
        let files = PtyFileStore::new(dir.path());
        (dir, FileDbCache::new(files))
    }

    fn record(screen_id: &ScreenId, line_id: &LineId, contents: &[u8]) -> FileRecord {
        FileRecord {
            screen_id: screen_id.clone(),
            line_id: line_id.clone(),
            filename: "output.json".to_owned(),
            file_type: "json".to_owned(),
            disk_filename: String::new(),
            contents: contents.to_vec(),
        }
    }

    #[test]
    fn small_files_round_trip() {
        let (_dir, cache) = cache();
        let screen_id = ScreenId::generate();
        let line_id = LineId::generate();

        cache
            .write_file(&record(&screen_id, &line_id, b"{\"ok\":true}"))
            .expect("write file");
        let read = cache
            .read_file(&screen_id, &line_id, "output.json")
            .expect("read file")
            .expect("file should exist");
        assert_eq!(read.contents, b"{\"ok\":true}");
        assert_eq!(read.file_type, "json");

        assert_eq!(
            cache
                .list_line_files(&screen_id, &line_id)
                .expect("list files"),
            vec!["output.json".to_owned()]
        );

        cache
            .delete_line_files(&screen_id, &line_id)
            .expect("delete files");
        assert!(cache
            .read_file(&screen_id, &line_id, "output.json")
            .expect("read after delete")
            .is_none());
    }

    #[test]
    fn oversized_contents_are_rejected() {
        let (_dir, cache) = cache();
        let screen_id = ScreenId::generate();
        let line_id = LineId::generate();
        let big = vec![0u8; (MAX_DB_FILE_SIZE + 1) as usize];

        let err = cache
            .write_file(&record(&screen_id, &line_id, &big))
            .expect_err("oversized write should fail");
        assert!(matches!(err, PtyFileError::TooLarge { .. }));
    }

    #[test]
    fn upsert_overwrites_existing_row() {
        let (_dir, cache) = cache();
        let screen_id = ScreenId::generate();
        let line_id = LineId::generate();

        cache
            .write_file(&record(&screen_id, &line_id, b"v1"))
            .expect("write v1");
        cache
            .write_file(&record(&screen_id, &line_id, b"v2"))
            .expect("write v2");
        let read = cache
            .read_file(&screen_id, &line_id, "output.json")
            .expect("read")
            .expect("exists");
        assert_eq!(read.contents, b"v2");
    }
}
