use rusqlite::params;
use termbench_model::{
    now_ms, ActiveSessionIdUpdate, ScreenId, Session, SessionId, SessionTombstone, ShareMode,
    UpdatePacket, UpdateRecord, DEFAULT_SESSION_NAME,
};

use crate::db::Tx;
use crate::error::StoreError;
use crate::lifecycle::Core;

/// Pick a unique name. A caller-supplied name gets a `-2`, `-3`, … suffix on
/// collision; an empty name falls back to `default_fmt` (which must contain
/// `%d`) numbered from `start_idx`.
pub(crate) fn fmt_unique_name(
    name: &str,
    default_fmt: &str,
    start_idx: i64,
    taken: &[String],
) -> String {
    let contains = |candidate: &str| taken.iter().any(|existing| existing == candidate);
    let (fmt, mut idx) = if !name.is_empty() {
        if !contains(name) {
            return name.to_owned();
        }
        (format!("{name}-%d"), 2)
    } else {
        assert!(
            default_fmt.contains("%d"),
            "invalid format string: {default_fmt}"
        );
        (default_fmt.to_owned(), start_idx)
    };
    loop {
        let candidate = fmt.replace("%d", &idx.to_string());
        if !contains(&candidate) {
            return candidate;
        }
        idx += 1;
    }
}

/// The id adjacent to `del_id` in `ids` (next one, or previous at the end).
pub(crate) fn get_next_id(ids: &[String], del_id: &str) -> String {
    if ids.is_empty() {
        return String::new();
    }
    if ids.len() == 1 {
        if ids[0] == del_id {
            return String::new();
        }
        return ids[0].clone();
    }
    for (idx, id) in ids.iter().enumerate() {
        if id == del_id {
            let rtn_idx = if idx == ids.len() - 1 { idx - 1 } else { idx + 1 };
            return ids[rtn_idx].clone();
        }
    }
    ids[0].clone()
}

pub(crate) fn map_session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        session_id: SessionId::new(row.get::<_, String>(0)?),
        name: row.get(1)?,
        session_idx: row.get(2)?,
        active_screen_id: ScreenId::new(row.get::<_, String>(3)?),
        share_mode: ShareMode::parse(&row.get::<_, String>(4)?).unwrap_or_default(),
        notify_num: row.get(5)?,
        archived: row.get::<_, i64>(6)? != 0,
        archived_ts: row.get(7)?,
        remotes: Vec::new(),
        remove: false,
    })
}

const SESSION_COLS: &str =
    "sessionid, name, sessionidx, activescreenid, sharemode, notifynum, archived, archivedts";

pub(crate) fn tx_get_bare_session(
    tx: &Tx<'_>,
    session_id: &SessionId,
) -> Result<Option<Session>, StoreError> {
    use rusqlite::OptionalExtension;
    let session = tx
        .query_row(
            &format!("SELECT {SESSION_COLS} FROM session WHERE sessionid = ?1"),
            params![session_id.as_str()],
            map_session_row,
        )
        .optional()?;
    Ok(session)
}

pub(crate) fn tx_first_session_id(tx: &Tx<'_>) -> Result<String, StoreError> {
    let ids = tx.select_strings(
        "SELECT sessionid FROM session WHERE NOT archived ORDER BY sessionidx",
        [],
    )?;
    Ok(ids.into_iter().next().unwrap_or_default())
}

/// Re-point the client's active session at the lowest non-archived session
/// when the current one is gone or archived. Returns the new id when it
/// changed.
pub(crate) fn tx_fix_active_session_id(tx: &Tx<'_>) -> Result<Option<SessionId>, StoreError> {
    let current = tx.get_string("SELECT activesessionid FROM client", [])?;
    if tx.exists(
        "SELECT sessionid FROM session WHERE sessionid = ?1 AND NOT archived",
        params![current],
    )? {
        return Ok(None);
    }
    let next = tx_first_session_id(tx)?;
    tx.exec("UPDATE client SET activesessionid = ?1", params![next])?;
    Ok(Some(SessionId::new(next)))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub session_id: SessionId,
    pub num_screens: i64,
    pub num_archived_screens: i64,
    pub num_lines: i64,
    pub num_cmds: i64,
    pub disk_size: termbench_ptyfile::DiskSize,
}

impl Core {
    /// Non-archived session count.
    pub fn get_session_count(&self) -> Result<i64, StoreError> {
        self.db().with_tx(|tx| {
            tx.get_i64(
                "SELECT COALESCE(count(*), 0) FROM session WHERE NOT archived",
                [],
            )
        })
    }

    /// All sessions, archived ones last.
    pub fn get_bare_sessions(&self) -> Result<Vec<Session>, StoreError> {
        self.db().with_tx(|tx| {
            let mut stmt = tx.prepare(&format!(
                "SELECT {SESSION_COLS} FROM session ORDER BY archived, sessionidx, archivedts"
            ))?;
            let rows = stmt.query_map([], map_session_row)?;
            let mut sessions = Vec::new();
            for row in rows {
                sessions.push(row?);
            }
            Ok(sessions)
        })
    }

    pub fn get_bare_session_by_id(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<Session>, StoreError> {
        self.db().with_tx(|tx| tx_get_bare_session(tx, session_id))
    }

    pub fn get_session_by_name(&self, name: &str) -> Result<Option<Session>, StoreError> {
        self.db().with_tx(|tx| {
            let session_id = tx.get_string(
                "SELECT sessionid FROM session WHERE name = ?1",
                params![name],
            )?;
            if session_id.is_empty() {
                return Ok(None);
            }
            tx_get_bare_session(tx, &SessionId::new(session_id))
        })
    }

    pub fn get_first_session_id(&self) -> Result<Option<SessionId>, StoreError> {
        self.db().with_tx(|tx| {
            let id = tx_first_session_id(tx)?;
            Ok((!id.is_empty()).then(|| SessionId::new(id)))
        })
    }

    /// Create a session (unique name, next index) plus its initial screen,
    /// optionally activating both.
    pub fn insert_session_with_name(
        &self,
        session_name: &str,
        activate: bool,
    ) -> Result<UpdatePacket, StoreError> {
        let new_session_id = SessionId::generate();
        let new_screen_id = self.db().with_tx(|tx| {
            let names = tx.select_strings("SELECT name FROM session", [])?;
            let name = fmt_unique_name(
                session_name,
                "workspace-%d",
                names.len() as i64 + 1,
                &names,
            );
            let max_idx = tx.get_i64("SELECT COALESCE(max(sessionidx), 0) FROM session", [])?;
            tx.exec(
                "INSERT INTO session (sessionid, name, activescreenid, sessionidx, notifynum,
                                      archived, archivedts, sharemode)
                 VALUES (?1, ?2, '', ?3, 0, 0, 0, ?4)",
                params![
                    new_session_id.as_str(),
                    name,
                    max_idx + 1,
                    ShareMode::Local.as_str()
                ],
            )?;
            let screen_id =
                crate::screen::tx_insert_screen(tx, &new_session_id, "", &Default::default(), true)?;
            if activate {
                tx.exec(
                    "UPDATE client SET activesessionid = ?1",
                    params![new_session_id.as_str()],
                )?;
            }
            Ok(screen_id)
        })?;

        let session = self
            .get_bare_session_by_id(&new_session_id)?
            .ok_or_else(|| StoreError::validation("no session found"))?;
        let screen = self
            .get_screen_by_id(&new_screen_id)?
            .ok_or_else(|| StoreError::validation("screen not found"))?;
        let mut update = UpdatePacket::new();
        update.add_update(UpdateRecord::Session(session));
        update.add_update(UpdateRecord::Screen(screen));
        if activate {
            update.add_update(UpdateRecord::ActiveSessionId(ActiveSessionIdUpdate {
                session_id: new_session_id,
            }));
        }
        Ok(update)
    }

    pub fn ensure_one_session(&self) -> Result<(), StoreError> {
        if self.get_session_count()? > 0 {
            return Ok(());
        }
        self.insert_session_with_name(DEFAULT_SESSION_NAME, true)?;
        Ok(())
    }

    pub fn set_session_name(&self, session_id: &SessionId, name: &str) -> Result<(), StoreError> {
        self.db().with_tx(|tx| {
            if !tx.exists(
                "SELECT sessionid FROM session WHERE sessionid = ?1",
                params![session_id.as_str()],
            )? {
                return Err(StoreError::validation("session does not exist"));
            }
            let archived = tx.get_bool(
                "SELECT archived FROM session WHERE sessionid = ?1",
                params![session_id.as_str()],
            )?;
            if !archived {
                let dup_id = tx.get_string(
                    "SELECT sessionid FROM session WHERE name = ?1 AND NOT archived",
                    params![name],
                )?;
                if dup_id == session_id.as_str() {
                    return Ok(());
                }
                if !dup_id.is_empty() {
                    return Err(StoreError::validation(format!(
                        "invalid duplicate session name '{name}'"
                    )));
                }
            }
            tx.exec(
                "UPDATE session SET name = ?1 WHERE sessionid = ?2",
                params![name, session_id.as_str()],
            )?;
            Ok(())
        })
    }

    /// Archive reversibly; the session keeps its screens but loses its slot
    /// in the active ordering.
    pub fn archive_session(&self, session_id: &SessionId) -> Result<UpdatePacket, StoreError> {
        if session_id.is_empty() {
            return Err(StoreError::validation("invalid blank sessionid"));
        }
        let new_active = self.db().with_tx(|tx| {
            if !tx.exists(
                "SELECT sessionid FROM session WHERE sessionid = ?1",
                params![session_id.as_str()],
            )? {
                return Err(StoreError::validation("session does not exist"));
            }
            let archived = tx.get_bool(
                "SELECT archived FROM session WHERE sessionid = ?1",
                params![session_id.as_str()],
            )?;
            if archived {
                return Ok(None);
            }
            tx.exec(
                "UPDATE session SET archived = 1, archivedts = ?1, sessionidx = 0 WHERE sessionid = ?2",
                params![now_ms(), session_id.as_str()],
            )?;
            tx_fix_active_session_id(tx)
        })?;

        let mut update = UpdatePacket::new();
        if let Some(session) = self.get_bare_session_by_id(session_id)? {
            update.add_update(UpdateRecord::Session(session));
        }
        if let Some(new_active_id) = new_active {
            if !new_active_id.is_empty() {
                update.add_update(UpdateRecord::ActiveSessionId(ActiveSessionIdUpdate {
                    session_id: new_active_id,
                }));
            }
        }
        Ok(update)
    }

    pub fn unarchive_session(
        &self,
        session_id: &SessionId,
        activate: bool,
    ) -> Result<UpdatePacket, StoreError> {
        if session_id.is_empty() {
            return Err(StoreError::validation("invalid blank sessionid"));
        }
        self.db().with_tx(|tx| {
            if !tx.exists(
                "SELECT sessionid FROM session WHERE sessionid = ?1",
                params![session_id.as_str()],
            )? {
                return Err(StoreError::validation("session does not exist"));
            }
            let archived = tx.get_bool(
                "SELECT archived FROM session WHERE sessionid = ?1",
                params![session_id.as_str()],
            )?;
            if !archived {
                return Ok(());
            }
            let max_idx = tx.get_i64(
                "SELECT COALESCE(max(sessionidx), 0) FROM session WHERE NOT archived",
                [],
            )?;
            tx.exec(
                "UPDATE session SET archived = 0, archivedts = 0, sessionidx = ?1 WHERE sessionid = ?2",
                params![max_idx + 1, session_id.as_str()],
            )?;
            if activate {
                tx.exec(
                    "UPDATE client SET activesessionid = ?1",
                    params![session_id.as_str()],
                )?;
            }
            Ok(())
        })?;

        let mut update = UpdatePacket::new();
        if let Some(session) = self.get_bare_session_by_id(session_id)? {
            update.add_update(UpdateRecord::Session(session));
        }
        if activate {
            update.add_update(UpdateRecord::ActiveSessionId(ActiveSessionIdUpdate {
                session_id: session_id.clone(),
            }));
        }
        Ok(update)
    }

    /// Cascade-delete all screens (and their lines/cmds), leave a tombstone,
    /// and fix the active session pointer.
    pub fn delete_session(&self, session_id: &SessionId) -> Result<UpdatePacket, StoreError> {
        let mut update = UpdatePacket::new();
        let (screen_ids, tombstone, new_active) = self.db().with_tx(|tx| {
            let session = tx_get_bare_session(tx, session_id)?
                .ok_or_else(|| StoreError::validation("cannot delete session (not found)"))?;
            let screen_ids = tx.select_strings(
                "SELECT screenid FROM screen WHERE sessionid = ?1",
                params![session_id.as_str()],
            )?;
            for screen_id in &screen_ids {
                crate::screen::tx_delete_screen(
                    tx,
                    &ScreenId::new(screen_id.clone()),
                    true,
                    &mut update,
                )?;
            }
            tx.exec(
                "DELETE FROM session WHERE sessionid = ?1",
                params![session_id.as_str()],
            )?;
            let new_active = tx_fix_active_session_id(tx)?;
            let tombstone = SessionTombstone {
                session_id: session_id.clone(),
                name: session.name,
                deleted_ts: now_ms(),
            };
            tx.exec(
                "INSERT INTO session_tombstone (sessionid, name, deletedts) VALUES (?1, ?2, ?3)",
                params![
                    tombstone.session_id.as_str(),
                    tombstone.name,
                    tombstone.deleted_ts
                ],
            )?;
            Ok((screen_ids, tombstone, new_active))
        })?;

        self.pty_files()
            .spawn_delete_screen_dirs(screen_ids.into_iter().map(ScreenId::new).collect());
        if let Some(new_active_id) = new_active {
            if !new_active_id.is_empty() {
                update.add_update(UpdateRecord::ActiveSessionId(ActiveSessionIdUpdate {
                    session_id: new_active_id,
                }));
            }
        }
        update.add_update(UpdateRecord::Session(Session::removal(session_id.clone())));
        update.add_update(UpdateRecord::SessionTombstone(tombstone));
        Ok(update)
    }

    pub fn get_session_tombstones(&self) -> Result<Vec<SessionTombstone>, StoreError> {
        self.db().with_tx(|tx| {
            let mut stmt = tx.prepare(
                "SELECT sessionid, name, deletedts FROM session_tombstone ORDER BY deletedts",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(SessionTombstone {
                    session_id: SessionId::new(row.get::<_, String>(0)?),
                    name: row.get(1)?,
                    deleted_ts: row.get(2)?,
                })
            })?;
            let mut tombstones = Vec::new();
            for row in rows {
                tombstones.push(row?);
            }
            Ok(tombstones)
        })
    }

    pub fn get_session_stats(&self, session_id: &SessionId) -> Result<SessionStats, StoreError> {
        let mut stats = self.db().with_tx(|tx| {
            if !tx.exists(
                "SELECT sessionid FROM session WHERE sessionid = ?1",
                params![session_id.as_str()],
            )? {
                return Err(StoreError::validation("no session found"));
            }
            Ok(SessionStats {
                session_id: session_id.clone(),
                num_screens: tx.get_i64(
                    "SELECT count(*) FROM screen WHERE sessionid = ?1 AND NOT archived",
                    params![session_id.as_str()],
                )?,
                num_archived_screens: tx.get_i64(
                    "SELECT count(*) FROM screen WHERE sessionid = ?1 AND archived",
                    params![session_id.as_str()],
                )?,
                num_lines: tx.get_i64(
                    "SELECT count(*) FROM line WHERE screenid IN
                        (SELECT screenid FROM screen WHERE sessionid = ?1)",
                    params![session_id.as_str()],
                )?,
                num_cmds: tx.get_i64(
                    "SELECT count(*) FROM cmd WHERE screenid IN
                        (SELECT screenid FROM screen WHERE sessionid = ?1)",
                    params![session_id.as_str()],
                )?,
                disk_size: Default::default(),
            })
        })?;
        stats.disk_size = self.pty_files().session_disk_size(session_id.as_str())?;
        Ok(stats)
    }

}
