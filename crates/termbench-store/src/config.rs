use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub const ENV_TERMBENCH_CONFIG: &str = "TERMBENCH_CONFIG";

pub const DB_FILE_NAME: &str = "termbench.db";
pub const DB_WAL_FILE_NAME: &str = "termbench.db-wal";
pub const DB_BACKUP_FILE_NAME: &str = "backup.termbench.db";

const DEFAULT_FLUSH_INTERVAL_MS: u64 = 1_000;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MAX_PTY_SIZE: i64 = 256 * 1024;
const DEFAULT_UPDATE_WRITER_BATCH: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Application home: the SQL store, `screens/`, and `sessions/` live
    /// underneath it.
    pub home_dir: PathBuf,
    #[serde(default = "default_db_file")]
    pub db_file: String,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    #[serde(default = "default_max_pty_size")]
    pub default_max_pty_size: i64,
    #[serde(default = "default_update_writer_batch")]
    pub update_writer_batch: usize,
}

fn default_db_file() -> String {
    DB_FILE_NAME.to_owned()
}

fn default_flush_interval_ms() -> u64 {
    DEFAULT_FLUSH_INTERVAL_MS
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

fn default_max_pty_size() -> i64 {
    DEFAULT_MAX_PTY_SIZE
}

fn default_update_writer_batch() -> usize {
    DEFAULT_UPDATE_WRITER_BATCH
}

impl CoreConfig {
    pub fn new(home_dir: impl Into<PathBuf>) -> Self {
        Self {
            home_dir: home_dir.into(),
            db_file: default_db_file(),
            flush_interval_ms: default_flush_interval_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            default_max_pty_size: default_max_pty_size(),
            update_writer_batch: default_update_writer_batch(),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.home_dir.join(&self.db_file)
    }
}

/// Load the config file, honoring the `TERMBENCH_CONFIG` override. A missing
/// file is created with defaults rooted at `fallback_home`.
pub fn load_from_env(fallback_home: impl Into<PathBuf>) -> Result<CoreConfig, StoreError> {
    match std::env::var(ENV_TERMBENCH_CONFIG) {
        Ok(raw) if !raw.trim().is_empty() => load_from_path(raw.trim(), fallback_home),
        _ => {
            let home: PathBuf = fallback_home.into();
            let path = home.join("termbench.toml");
            load_from_path(path, home)
        }
    }
}

pub fn load_from_path(
    path: impl AsRef<Path>,
    fallback_home: impl Into<PathBuf>,
) -> Result<CoreConfig, StoreError> {
    let path = path.as_ref();
    match std::fs::read_to_string(path) {
        Ok(raw) => toml::from_str(&raw)
            .map_err(|err| StoreError::validation(format!("bad config {}: {err}", path.display()))),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            let config = CoreConfig::new(fallback_home);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|err| StoreError::Persistence(err.to_string()))?;
            }
            let rendered = toml::to_string_pretty(&config)
                .map_err(|err| StoreError::Persistence(err.to_string()))?;
            std::fs::write(path, rendered)
                .map_err(|err| StoreError::Persistence(err.to_string()))?;
            Ok(config)
        }
        Err(err) => Err(StoreError::Persistence(format!(
            "reading config {}: {err}",
            path.display()
        ))),
    }
}
