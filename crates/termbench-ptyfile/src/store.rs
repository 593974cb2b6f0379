use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use termbench_model::{LineId, PtyDataUpdate, ScreenId};

use crate::cirfile::{CirFile, CirFileStat};
use crate::error::PtyFileError;

pub const SCREENS_DIR_NAME: &str = "screens";
pub const SESSIONS_DIR_NAME: &str = "sessions";
pub const PTY_OUT_SUFFIX: &str = ".ptyout.cf";

const SCREEN_DIR_DELETE_DEADLINE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskSize {
    pub num_files: i64,
    pub total_size: i64,
    pub error_count: i64,
    pub location: PathBuf,
}

/// Pty-output files on disk, one circular file per `(screen, line)` under
/// the screen's directory. Screen-directory resolution is memoised.
#[derive(Debug, Clone)]
pub struct PtyFileStore {
    home_dir: PathBuf,
    screen_dirs: Arc<Mutex<HashMap<ScreenId, PathBuf>>>,
}

impl PtyFileStore {
    pub fn new(home_dir: impl Into<PathBuf>) -> Self {
        Self {
            home_dir: home_dir.into(),
            screen_dirs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    pub fn ensure_screen_dir(&self, screen_id: &ScreenId) -> Result<PathBuf, PtyFileError> {
        if screen_id.is_empty() {
            return Err(PtyFileError::InvalidArg(
                "cannot get screen dir for blank screenid".to_owned(),
            ));
        }
        {
            let dirs = self.screen_dirs.lock().expect("screen dir lock poisoned");
            if let Some(dir) = dirs.get(screen_id) {
                return Ok(dir.clone());
            }
        }
        let dir = self
            .home_dir
            .join(SCREENS_DIR_NAME)
            .join(screen_id.as_str());
        std::fs::create_dir_all(&dir)?;
        let mut dirs = self.screen_dirs.lock().expect("screen dir lock poisoned");
        dirs.insert(screen_id.clone(), dir.clone());
        Ok(dir)
    }

    pub fn pty_out_file(
        &self,
        screen_id: &ScreenId,
        line_id: &LineId,
    ) -> Result<PathBuf, PtyFileError> {
        if line_id.is_empty() {
            return Err(PtyFileError::InvalidArg(
                "cannot get ptyout file for blank lineid".to_owned(),
            ));
        }
        let dir = self.ensure_screen_dir(screen_id)?;
        Ok(dir.join(format!("{}{}", line_id.as_str(), PTY_OUT_SUFFIX)))
    }

    pub fn create_cmd_pty_file(
        &self,
        screen_id: &ScreenId,
        line_id: &LineId,
        max_size: i64,
    ) -> Result<(), PtyFileError> {
        let path = self.pty_out_file(screen_id, line_id)?;
        CirFile::create(path, max_size)?;
        Ok(())
    }

    pub fn stat_cmd_pty_file(
        &self,
        screen_id: &ScreenId,
        line_id: &LineId,
    ) -> Result<CirFileStat, PtyFileError> {
        let path = self.pty_out_file(screen_id, line_id)?;
        CirFile::stat_path(path)
    }

    /// Append terminal bytes at `pos` and return the incremental update
    /// record for watchers.
    pub fn append_to_cmd_pty_blob(
        &self,
        screen_id: &ScreenId,
        line_id: &LineId,
        data: &[u8],
        pos: i64,
    ) -> Result<PtyDataUpdate, PtyFileError> {
        if screen_id.is_empty() {
            return Err(PtyFileError::InvalidArg(
                "cannot append to pty blob, screenid is not set".to_owned(),
            ));
        }
        if pos < 0 {
            return Err(PtyFileError::InvalidArg(format!(
                "invalid seek pos '{pos}' in pty append"
            )));
        }
        let path = self.pty_out_file(screen_id, line_id)?;
        let mut cf = CirFile::open(path)?;
        cf.write_at(data, pos)?;
        Ok(PtyDataUpdate::new(
            screen_id.clone(),
            line_id.clone(),
            pos,
            data,
        ))
    }

    /// Returns `(real_offset, data)` for the whole stored window.
    pub fn read_full_pty_out_file(
        &self,
        screen_id: &ScreenId,
        line_id: &LineId,
    ) -> Result<(i64, Vec<u8>), PtyFileError> {
        let path = self.pty_out_file(screen_id, line_id)?;
        CirFile::open(path)?.read_all()
    }

    /// Returns `(real_offset, data)` for up to `max_size` bytes at `offset`.
    pub fn read_pty_out_file(
        &self,
        screen_id: &ScreenId,
        line_id: &LineId,
        offset: i64,
        max_size: i64,
    ) -> Result<(i64, Vec<u8>), PtyFileError> {
        let path = self.pty_out_file(screen_id, line_id)?;
        CirFile::open(path)?.read_at_with_max(offset, max_size)
    }

    /// Remove and recreate the file, preserving its previous max size when
    /// one exists; `fallback_max_size` covers the fresh-file case.
    pub fn clear_cmd_pty_file(
        &self,
        screen_id: &ScreenId,
        line_id: &LineId,
        fallback_max_size: i64,
    ) -> Result<(), PtyFileError> {
        let path = self.pty_out_file(screen_id, line_id)?;
        let max_size = match CirFile::stat_path(&path) {
            Ok(stat) => stat.max_size,
            Err(PtyFileError::NotFound) => fallback_max_size,
            Err(err) => return Err(err),
        };
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        CirFile::create(path, max_size)?;
        Ok(())
    }

    pub fn delete_pty_out_file(
        &self,
        screen_id: &ScreenId,
        line_id: &LineId,
    ) -> Result<(), PtyFileError> {
        let path = self.pty_out_file(screen_id, line_id)?;
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn delete_screen_dir(&self, screen_id: &ScreenId) -> Result<(), PtyFileError> {
        let dir = self.ensure_screen_dir(screen_id)?;
        tracing::debug!(screen_id = %screen_id, dir = %dir.display(), "removing screen dir");
        std::fs::remove_dir_all(&dir)?;
        let mut dirs = self.screen_dirs.lock().expect("screen dir lock poisoned");
        dirs.remove(screen_id);
        Ok(())
    }

    /// Background teardown of screen directories. Runs on its own thread
    /// under a one-minute deadline; failures are logged, never surfaced.
    pub fn spawn_delete_screen_dirs(&self, screen_ids: Vec<ScreenId>) {
        let store = self.clone();
        std::thread::spawn(move || {
            let deadline = Instant::now() + SCREEN_DIR_DELETE_DEADLINE;
            for screen_id in screen_ids {
                if Instant::now() >= deadline {
                    tracing::warn!(
                        screen_id = %screen_id,
                        "screen dir teardown deadline hit; remaining dirs skipped"
                    );
                    return;
                }
                if let Err(err) = store.delete_screen_dir(&screen_id) {
                    tracing::warn!(screen_id = %screen_id, error = %err, "error deleting screen dir");
                }
            }
        });
    }

    /// Size check gate for future inline migration of small pty files; the
    /// conversion itself is reserved.
    pub fn try_convert_pty_file(
        &self,
        screen_id: &ScreenId,
        line_id: &LineId,
    ) -> Result<(), PtyFileError> {
        let stat = self.stat_cmd_pty_file(screen_id, line_id)?;
        if stat.data_size > crate::filedb::MAX_DB_FILE_SIZE {
            return Ok(());
        }
        Ok(())
    }

    pub fn session_disk_size(&self, session_id: &str) -> Result<DiskSize, PtyFileError> {
        let dir = self.home_dir.join(SESSIONS_DIR_NAME).join(session_id);
        std::fs::create_dir_all(&dir)?;
        Ok(directory_size(&dir))
    }

    /// Per-session disk usage under the sessions tree; non-uuid entries are
    /// ignored.
    pub fn full_session_disk_size(&self) -> Result<HashMap<String, DiskSize>, PtyFileError> {
        let sessions_dir = self.home_dir.join(SESSIONS_DIR_NAME);
        let mut rtn = HashMap::new();
        let entries = match std::fs::read_dir(&sessions_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(rtn),
            Err(err) => return Err(err.into()),
        };
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if uuid::Uuid::parse_str(&name).is_err() {
                continue;
            }
            rtn.insert(name, directory_size(&entry.path()));
        }
        Ok(rtn)
    }
}

fn directory_size(dir: &Path) -> DiskSize {
    let mut rtn = DiskSize {
        location: dir.to_path_buf(),
        ..DiskSize::default()
    };
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => {
            rtn.error_count += 1;
            return rtn;
        }
    };
    for entry in entries {
        let Ok(entry) = entry else {
            rtn.error_count += 1;
            continue;
        };
        match entry.metadata() {
            Ok(meta) if meta.is_dir() => rtn.error_count += 1,
            Ok(meta) => {
                rtn.num_files += 1;
                rtn.total_size += meta.len() as i64;
            }
            Err(_) => rtn.error_count += 1,
        }
    }
    rtn
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, PtyFileStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = PtyFileStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn pty_blob_append_and_read_round_trip() {
        let (_dir, store) = store();
        let screen_id = ScreenId::generate();
        let line_id = LineId::generate();
        store
            .create_cmd_pty_file(&screen_id, &line_id, 4096)
            .expect("create pty file");

        let update = store
            .append_to_cmd_pty_blob(&screen_id, &line_id, b"shell output", 0)
            .expect("append");
        assert_eq!(update.pty_pos, 0);
        assert_eq!(update.pty_data_len, 12);
        assert_eq!(update.decode_data().expect("decode"), b"shell output");

        store
            .append_to_cmd_pty_blob(&screen_id, &line_id, b" more", 12)
            .expect("append");
        let (real_offset, data) = store
            .read_full_pty_out_file(&screen_id, &line_id)
            .expect("read full");
        assert_eq!(real_offset, 0);
        assert_eq!(data, b"shell output more");

        let (real_offset, data) = store
            .read_pty_out_file(&screen_id, &line_id, 6, 6)
            .expect("windowed read");
        assert_eq!(real_offset, 6);
        assert_eq!(data, b"output");
    }

    #[test]
    fn clear_preserves_previous_max_size() {
        let (_dir, store) = store();
        let screen_id = ScreenId::generate();
        let line_id = LineId::generate();
        store
            .create_cmd_pty_file(&screen_id, &line_id, 777)
            .expect("create pty file");
        store
            .append_to_cmd_pty_blob(&screen_id, &line_id, b"data", 0)
            .expect("append");

        store
            .clear_cmd_pty_file(&screen_id, &line_id, 4096)
            .expect("clear");
        let stat = store
            .stat_cmd_pty_file(&screen_id, &line_id)
            .expect("stat after clear");
        assert_eq!(stat.max_size, 777);
        assert_eq!(stat.data_size, 0);
    }

    #[test]
    fn clear_on_missing_file_uses_fallback_max_size() {
        let (_dir, store) = store();
        let screen_id = ScreenId::generate();
        let line_id = LineId::generate();
        store
            .clear_cmd_pty_file(&screen_id, &line_id, 2048)
            .expect("clear fresh");
        let stat = store.stat_cmd_pty_file(&screen_id, &line_id).expect("stat");
        assert_eq!(stat.max_size, 2048);
    }

    #[test]
    fn blank_ids_are_rejected() {
        let (_dir, store) = store();
        assert!(matches!(
            store.ensure_screen_dir(&ScreenId::new("")),
            Err(PtyFileError::InvalidArg(_))
        ));
        assert!(matches!(
            store.pty_out_file(&ScreenId::generate(), &LineId::new("")),
            Err(PtyFileError::InvalidArg(_))
        ));
    }

    #[test]
    fn delete_screen_dir_removes_files_and_memo() {
        let (_dir, store) = store();
        let screen_id = ScreenId::generate();
        let line_id = LineId::generate();
        store
            .create_cmd_pty_file(&screen_id, &line_id, 128)
            .expect("create pty file");

        let dir = store.ensure_screen_dir(&screen_id).expect("screen dir");
        assert!(dir.exists());
        store.delete_screen_dir(&screen_id).expect("delete dir");
        assert!(!dir.exists());
    }

    #[test]
    fn disk_size_only_counts_uuid_session_dirs() {
        let (dir, store) = store();
        let session_id = uuid::Uuid::new_v4().to_string();
        let sessions = dir.path().join(SESSIONS_DIR_NAME);
        std::fs::create_dir_all(sessions.join(&session_id)).expect("mkdir session");
        std::fs::create_dir_all(sessions.join("not-a-uuid")).expect("mkdir junk");
        std::fs::write(sessions.join(&session_id).join("blob"), b"1234").expect("write blob");

        let sizes = store.full_session_disk_size().expect("disk sizes");
        assert_eq!(sizes.len(), 1);
        let entry = sizes.get(&session_id).expect("session entry");
        assert_eq!(entry.num_files, 1);
        assert_eq!(entry.total_size, 4);
    }
}
