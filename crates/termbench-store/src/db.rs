use std::ops::Deref;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, Params};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreError;

const CURRENT_SCHEMA_VERSION: i64 = 1;

/// Single-connection store handle. The mutex makes the embedded SQL backend
/// effectively single-writer: at most one transaction is ever active.
pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    pub fn open(path: impl AsRef<Path>, busy_timeout_ms: u64) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let _ = conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()));
        let _ = conn.query_row(&format!("PRAGMA busy_timeout = {busy_timeout_ms}"), [], |_| {
            Ok(())
        });
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Run `f` inside a transaction. Commits on `Ok`, rolls back on `Err`;
    /// the connection mutex is held for the duration of the call.
    pub fn with_tx<T>(&self, f: impl FnOnce(&Tx<'_>) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let mut guard = self.conn.lock().expect("store db lock poisoned");
        let tx = Tx {
            inner: guard.transaction()?,
        };
        match f(&tx) {
            Ok(value) => {
                tx.inner.commit()?;
                Ok(value)
            }
            Err(err) => {
                let _ = tx.inner.rollback();
                Err(err)
            }
        }
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let mut guard = self.conn.lock().expect("store db lock poisoned");
        guard.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
        )?;
        let current: i64 = guard.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )?;
        if current > CURRENT_SCHEMA_VERSION {
            return Err(StoreError::Persistence(format!(
                "database schema version {current} is newer than supported {CURRENT_SCHEMA_VERSION}"
            )));
        }
        for version in (current + 1)..=CURRENT_SCHEMA_VERSION {
            let tx = guard.transaction()?;
            apply_migration(&tx, version)?;
            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at)
                 VALUES (?1, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))",
                [version],
            )?;
            tx.commit()?;
        }
        Ok(())
    }

    pub fn schema_version(&self) -> Result<i64, StoreError> {
        let guard = self.conn.lock().expect("store db lock poisoned");
        let version: i64 = guard.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )?;
        Ok(version)
    }
}

fn apply_migration(tx: &rusqlite::Transaction<'_>, version: i64) -> Result<(), StoreError> {
    match version {
        1 => {
            tx.execute_batch(
                "
                CREATE TABLE client (
                    clientid TEXT NOT NULL,
                    userid TEXT NOT NULL,
                    userpublickeybytes BLOB NOT NULL,
                    userprivatekeybytes BLOB NOT NULL,
                    activesessionid TEXT NOT NULL DEFAULT '',
                    winsize TEXT NOT NULL DEFAULT '{}',
                    clientopts TEXT NOT NULL DEFAULT '{}',
                    feopts TEXT NOT NULL DEFAULT '{}',
                    cmdstoretype TEXT NOT NULL DEFAULT 'screen',
                    openaiopts TEXT NOT NULL DEFAULT '',
                    releaseinfo TEXT NOT NULL DEFAULT '{}'
                );

                CREATE TABLE session (
                    sessionid TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    sessionidx INTEGER NOT NULL,
                    activescreenid TEXT NOT NULL DEFAULT '',
                    sharemode TEXT NOT NULL DEFAULT 'local',
                    notifynum INTEGER NOT NULL DEFAULT 0,
                    archived INTEGER NOT NULL DEFAULT 0,
                    archivedts INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE session_tombstone (
                    sessionid TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    deletedts INTEGER NOT NULL
                );

                CREATE TABLE screen (
                    screenid TEXT PRIMARY KEY,
                    sessionid TEXT NOT NULL,
                    name TEXT NOT NULL,
                    screenidx INTEGER NOT NULL,
                    screenopts TEXT NOT NULL DEFAULT '{}',
                    screenviewopts TEXT NOT NULL DEFAULT '{}',
                    ownerid TEXT NOT NULL DEFAULT '',
                    sharemode TEXT NOT NULL DEFAULT 'local',
                    webshareopts TEXT NOT NULL DEFAULT '',
                    curremoteownerid TEXT NOT NULL DEFAULT '',
                    curremoteid TEXT NOT NULL DEFAULT '',
                    curremotename TEXT NOT NULL DEFAULT '',
                    nextlinenum INTEGER NOT NULL DEFAULT 1,
                    selectedline INTEGER NOT NULL DEFAULT 0,
                    anchor TEXT NOT NULL DEFAULT '{}',
                    focustype TEXT NOT NULL DEFAULT 'input',
                    archived INTEGER NOT NULL DEFAULT 0,
                    archivedts INTEGER NOT NULL DEFAULT 0
                );
                CREATE INDEX idx_screen_session ON screen(sessionid, archived, screenidx);

                CREATE TABLE screen_tombstone (
                    screenid TEXT PRIMARY KEY,
                    sessionid TEXT NOT NULL,
                    name TEXT NOT NULL,
                    deletedts INTEGER NOT NULL,
                    screenopts TEXT NOT NULL DEFAULT '{}'
                );

                CREATE TABLE line (
                    screenid TEXT NOT NULL,
                    lineid TEXT NOT NULL,
                    userid TEXT NOT NULL DEFAULT '',
                    ts INTEGER NOT NULL,
                    linenum INTEGER NOT NULL,
                    linenumtemp INTEGER NOT NULL DEFAULT 0,
                    linelocal INTEGER NOT NULL DEFAULT 0,
                    linetype TEXT NOT NULL,
                    linestate TEXT NOT NULL DEFAULT '{}',
                    text TEXT NOT NULL DEFAULT '',
                    renderer TEXT NOT NULL DEFAULT '',
                    ephemeral INTEGER NOT NULL DEFAULT 0,
                    contentheight INTEGER NOT NULL DEFAULT 0,
                    star INTEGER NOT NULL DEFAULT 0,
                    archived INTEGER NOT NULL DEFAULT 0,
                    PRIMARY KEY (screenid, lineid)
                );
                CREATE INDEX idx_line_screen_linenum ON line(screenid, linenum);

                CREATE TABLE cmd (
                    screenid TEXT NOT NULL,
                    lineid TEXT NOT NULL,
                    remoteownerid TEXT NOT NULL DEFAULT '',
                    remoteid TEXT NOT NULL DEFAULT '',
                    remotename TEXT NOT NULL DEFAULT '',
                    cmdstr TEXT NOT NULL DEFAULT '',
                    rawcmdstr TEXT NOT NULL DEFAULT '',
                    festate TEXT NOT NULL DEFAULT '{}',
                    statebasehash TEXT NOT NULL DEFAULT '',
                    statediffhasharr TEXT NOT NULL DEFAULT '[]',
                    termopts TEXT NOT NULL DEFAULT '{}',
                    origtermopts TEXT NOT NULL DEFAULT '{}',
                    status TEXT NOT NULL DEFAULT 'done',
                    cmdpid INTEGER NOT NULL DEFAULT 0,
                    remotepid INTEGER NOT NULL DEFAULT 0,
                    donets INTEGER NOT NULL DEFAULT 0,
                    restartts INTEGER NOT NULL DEFAULT 0,
                    exitcode INTEGER NOT NULL DEFAULT 0,
                    durationms INTEGER NOT NULL DEFAULT 0,
                    runout TEXT NOT NULL DEFAULT '[]',
                    rtnstate INTEGER NOT NULL DEFAULT 0,
                    rtnbasehash TEXT NOT NULL DEFAULT '',
                    rtndiffhasharr TEXT NOT NULL DEFAULT '[]',
                    PRIMARY KEY (screenid, lineid)
                );

                CREATE TABLE remote (
                    remoteid TEXT PRIMARY KEY,
                    remotetype TEXT NOT NULL,
                    remotealias TEXT NOT NULL DEFAULT '',
                    remotecanonicalname TEXT NOT NULL,
                    remoteuser TEXT NOT NULL DEFAULT '',
                    remotehost TEXT NOT NULL DEFAULT '',
                    connectmode TEXT NOT NULL DEFAULT 'manual',
                    autoinstall INTEGER NOT NULL DEFAULT 0,
                    sshopts TEXT NOT NULL DEFAULT '',
                    remoteopts TEXT NOT NULL DEFAULT '',
                    lastconnectts INTEGER NOT NULL DEFAULT 0,
                    archived INTEGER NOT NULL DEFAULT 0,
                    remoteidx INTEGER NOT NULL DEFAULT 0,
                    local INTEGER NOT NULL DEFAULT 0,
                    statevars TEXT NOT NULL DEFAULT '{}',
                    sshconfigsrc TEXT NOT NULL DEFAULT 'termbench-manual',
                    openaiopts TEXT NOT NULL DEFAULT '',
                    shellpref TEXT NOT NULL DEFAULT 'detect'
                );

                CREATE TABLE remote_instance (
                    riid TEXT PRIMARY KEY,
                    name TEXT NOT NULL DEFAULT '',
                    sessionid TEXT NOT NULL,
                    screenid TEXT NOT NULL DEFAULT '',
                    remoteownerid TEXT NOT NULL DEFAULT '',
                    remoteid TEXT NOT NULL,
                    festate TEXT NOT NULL DEFAULT '{}',
                    statebasehash TEXT NOT NULL DEFAULT '',
                    statediffhasharr TEXT NOT NULL DEFAULT '[]',
                    shelltype TEXT NOT NULL DEFAULT ''
                );

                CREATE TABLE state_base (
                    basehash TEXT PRIMARY KEY,
                    ts INTEGER NOT NULL,
                    version TEXT NOT NULL,
                    data BLOB NOT NULL
                );

                CREATE TABLE state_diff (
                    diffhash TEXT PRIMARY KEY,
                    ts INTEGER NOT NULL,
                    basehash TEXT NOT NULL,
                    diffhasharr TEXT NOT NULL DEFAULT '[]',
                    data BLOB NOT NULL
                );

                CREATE TABLE screenupdate (
                    updateid INTEGER PRIMARY KEY AUTOINCREMENT,
                    screenid TEXT NOT NULL,
                    lineid TEXT NOT NULL DEFAULT '',
                    updatetype TEXT NOT NULL,
                    updatets INTEGER NOT NULL
                );
                CREATE INDEX idx_screenupdate_line ON screenupdate(screenid, lineid);

                CREATE TABLE webptypos (
                    screenid TEXT NOT NULL,
                    lineid TEXT NOT NULL,
                    ptypos INTEGER NOT NULL DEFAULT 0,
                    PRIMARY KEY (screenid, lineid)
                );

                CREATE TABLE history (
                    historyid TEXT PRIMARY KEY,
                    ts INTEGER NOT NULL,
                    userid TEXT NOT NULL DEFAULT '',
                    sessionid TEXT NOT NULL DEFAULT '',
                    screenid TEXT NOT NULL DEFAULT '',
                    lineid TEXT NOT NULL DEFAULT '',
                    linenum INTEGER NOT NULL DEFAULT 0,
                    cmdstr TEXT NOT NULL DEFAULT '',
                    remoteownerid TEXT NOT NULL DEFAULT '',
                    remoteid TEXT NOT NULL DEFAULT '',
                    remotename TEXT NOT NULL DEFAULT '',
                    ismetacmd INTEGER NOT NULL DEFAULT 0,
                    exitcode INTEGER NOT NULL DEFAULT 0,
                    durationms INTEGER NOT NULL DEFAULT 0,
                    festate TEXT NOT NULL DEFAULT '{}',
                    status TEXT NOT NULL DEFAULT 'unknown'
                );
                CREATE INDEX idx_history_line ON history(screenid, lineid);
                ",
            )?;
            Ok(())
        }
        _ => Err(StoreError::Persistence(format!(
            "no migration implementation for version {version}"
        ))),
    }
}

/// Thin wrapper around a live transaction with the small query helpers the
/// mutator code leans on. Missing rows read as zero values, matching how the
/// operations express their existence checks.
pub struct Tx<'conn> {
    pub(crate) inner: rusqlite::Transaction<'conn>,
}

impl<'conn> Deref for Tx<'conn> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.inner
    }
}

impl<'conn> Tx<'conn> {
    pub fn exists(&self, sql: &str, params: impl Params) -> Result<bool, StoreError> {
        let found = self.inner.query_row(sql, params, |_| Ok(())).optional()?;
        Ok(found.is_some())
    }

    pub fn get_i64(&self, sql: &str, params: impl Params) -> Result<i64, StoreError> {
        let value: Option<Option<i64>> = self
            .inner
            .query_row(sql, params, |row| row.get(0))
            .optional()?;
        Ok(value.flatten().unwrap_or(0))
    }

    pub fn get_string(&self, sql: &str, params: impl Params) -> Result<String, StoreError> {
        let value: Option<Option<String>> = self
            .inner
            .query_row(sql, params, |row| row.get(0))
            .optional()?;
        Ok(value.flatten().unwrap_or_default())
    }

    pub fn get_bool(&self, sql: &str, params: impl Params) -> Result<bool, StoreError> {
        Ok(self.get_i64(sql, params)? != 0)
    }

    pub fn select_strings(&self, sql: &str, params: impl Params) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.inner.prepare(sql)?;
        let rows = stmt.query_map(params, |row| row.get::<_, String>(0))?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn exec(&self, sql: &str, params: impl Params) -> Result<usize, StoreError> {
        Ok(self.inner.execute(sql, params)?)
    }
}

// -- JSON column codecs -----------------------------------------------------

pub fn quick_json<T: Serialize>(value: &T) -> Result<String, StoreError> {
    Ok(serde_json::to_string(value)?)
}

/// Optional compound column: `None` is stored as the empty string.
pub fn quick_nullable_json<T: Serialize>(value: &Option<T>) -> Result<String, StoreError> {
    match value {
        Some(inner) => quick_json(inner),
        None => Ok(String::new()),
    }
}

pub fn quick_set_json<T: DeserializeOwned + Default>(raw: &str) -> Result<T, StoreError> {
    if raw.is_empty() || raw == "null" {
        return Ok(T::default());
    }
    Ok(serde_json::from_str(raw)?)
}

pub fn quick_set_nullable_json<T: DeserializeOwned>(raw: &str) -> Result<Option<T>, StoreError> {
    if raw.is_empty() || raw == "null" {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(raw)?))
}

pub fn quick_json_arr(values: &[String]) -> Result<String, StoreError> {
    Ok(serde_json::to_string(values)?)
}

pub fn quick_set_json_arr(raw: &str) -> Result<Vec<String>, StoreError> {
    quick_set_json(raw)
}
