use std::sync::{Arc, Condvar, Mutex, Weak};

use rusqlite::params;
use termbench_model::{
    now_ms, LineId, PtyDataUpdate, ScreenId, ScreenUpdateKind, ScreenUpdateRow,
};

use crate::db::{Db, Tx};
use crate::error::StoreError;
use crate::lifecycle::{Core, CoreInner};

/// Sink for drained screen-update rows (the web-share relay).
pub trait UpdateDispatcher: Send + Sync {
    fn dispatch(&self, update: &ScreenUpdateRow) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub(crate) struct UpdateWriterControl {
    state: Mutex<UpdateWriterState>,
    cvar: Condvar,
}

#[derive(Debug, Default)]
struct UpdateWriterState {
    running: bool,
    stop_requested: bool,
    pending: bool,
}

pub(crate) fn tx_is_web_share(tx: &Tx<'_>, screen_id: &ScreenId) -> Result<bool, StoreError> {
    tx.exists(
        "SELECT screenid FROM screen WHERE screenid = ?1 AND sharemode = 'web'",
        params![screen_id.as_str()],
    )
}

/// Append a `(screen, line)` update row. `line:new`/`line:del` coalesce:
/// prior rows for the pair are dropped first, and `line:new` implies a
/// paired `pty:pos`.
pub(crate) fn tx_insert_screen_line_update(
    tx: &Tx<'_>,
    screen_id: &ScreenId,
    line_id: &LineId,
    kind: ScreenUpdateKind,
) -> Result<(), StoreError> {
    if screen_id.is_empty() {
        return Err(StoreError::validation(
            "invalid screen-update, screenid is empty",
        ));
    }
    if line_id.is_empty() {
        return Err(StoreError::validation(
            "invalid screen-update, lineid is empty",
        ));
    }
    if matches!(kind, ScreenUpdateKind::LineNew | ScreenUpdateKind::LineDel) {
        tx.exec(
            "DELETE FROM screenupdate WHERE screenid = ?1 AND lineid = ?2",
            params![screen_id.as_str(), line_id.as_str()],
        )?;
    }
    let now = now_ms();
    tx.exec(
        "INSERT INTO screenupdate (screenid, lineid, updatetype, updatets) VALUES (?1, ?2, ?3, ?4)",
        params![screen_id.as_str(), line_id.as_str(), kind.as_str(), now],
    )?;
    if kind == ScreenUpdateKind::LineNew {
        tx.exec(
            "INSERT INTO screenupdate (screenid, lineid, updatetype, updatets) VALUES (?1, ?2, ?3, ?4)",
            params![
                screen_id.as_str(),
                line_id.as_str(),
                ScreenUpdateKind::PtyPos.as_str(),
                now
            ],
        )?;
    }
    Ok(())
}

pub(crate) fn tx_insert_screen_update(
    tx: &Tx<'_>,
    screen_id: &ScreenId,
    kind: ScreenUpdateKind,
) -> Result<(), StoreError> {
    if screen_id.is_empty() {
        return Err(StoreError::validation(
            "invalid screen-update, screenid is empty",
        ));
    }
    tx.exec(
        "INSERT INTO screenupdate (screenid, lineid, updatetype, updatets) VALUES (?1, '', ?2, ?3)",
        params![screen_id.as_str(), kind.as_str(), now_ms()],
    )?;
    Ok(())
}

/// Seed the update log for a freshly web-shared screen: `line:new` for every
/// visible line plus `pty:pos` for every cmd line.
pub(crate) fn tx_insert_screen_new_update(
    tx: &Tx<'_>,
    screen_id: &ScreenId,
) -> Result<(), StoreError> {
    let now = now_ms();
    tx.exec(
        "INSERT INTO screenupdate (screenid, lineid, updatetype, updatets)
         SELECT screenid, lineid, ?1, ?2 FROM line
         WHERE screenid = ?3 AND NOT archived ORDER BY linenum DESC",
        params![ScreenUpdateKind::LineNew.as_str(), now, screen_id.as_str()],
    )?;
    tx.exec(
        "INSERT INTO screenupdate (screenid, lineid, updatetype, updatets)
         SELECT c.screenid, c.lineid, ?1, ?2 FROM cmd c, line l
         WHERE c.screenid = ?3 AND l.screenid = c.screenid AND l.lineid = c.lineid
           AND NOT l.archived ORDER BY l.linenum DESC",
        params![ScreenUpdateKind::PtyPos.as_str(), now, screen_id.as_str()],
    )?;
    Ok(())
}

/// A screen stopped being shared (or is going away): its queued updates and
/// watcher positions are moot.
pub(crate) fn tx_handle_screen_del_update(
    tx: &Tx<'_>,
    screen_id: &ScreenId,
) -> Result<(), StoreError> {
    tx.exec(
        "DELETE FROM screenupdate WHERE screenid = ?1",
        params![screen_id.as_str()],
    )?;
    tx.exec(
        "DELETE FROM webptypos WHERE screenid = ?1",
        params![screen_id.as_str()],
    )?;
    Ok(())
}

fn db_count_screen_updates(db: &Db) -> Result<i64, StoreError> {
    db.with_tx(|tx| tx.get_i64("SELECT count(*) FROM screenupdate", []))
}

fn db_get_screen_updates(db: &Db, max_num: usize) -> Result<Vec<ScreenUpdateRow>, StoreError> {
    db.with_tx(|tx| {
        let mut stmt = tx.prepare(
            "SELECT updateid, screenid, lineid, updatetype, updatets
             FROM screenupdate ORDER BY updateid LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![max_num as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;
        let mut updates = Vec::new();
        for row in rows {
            let (update_id, screen_id, line_id, update_type, update_ts) = row?;
            let kind = ScreenUpdateKind::parse(&update_type).ok_or_else(|| {
                StoreError::Corruption(format!("unknown screenupdate type '{update_type}'"))
            })?;
            updates.push(ScreenUpdateRow {
                update_id,
                screen_id: ScreenId::new(screen_id),
                line_id: LineId::new(line_id),
                kind,
                update_ts,
            });
        }
        Ok(updates)
    })
}

fn db_remove_screen_updates(db: &Db, update_ids: &[i64]) -> Result<(), StoreError> {
    if update_ids.is_empty() {
        return Ok(());
    }
    let encoded = serde_json::to_string(update_ids)?;
    db.with_tx(|tx| {
        tx.exec(
            "DELETE FROM screenupdate WHERE updateid IN (SELECT value FROM json_each(?1))",
            params![encoded],
        )?;
        Ok(())
    })
}

impl Core {
    pub fn count_screen_updates(&self) -> Result<i64, StoreError> {
        db_count_screen_updates(self.db())
    }

    pub fn get_screen_updates(&self, max_num: usize) -> Result<Vec<ScreenUpdateRow>, StoreError> {
        db_get_screen_updates(self.db(), max_num)
    }

    pub fn remove_screen_updates(&self, update_ids: &[i64]) -> Result<(), StoreError> {
        db_remove_screen_updates(self.db(), update_ids)
    }

    /// Edge-triggered wakeup for the persistent update writer; repeated
    /// notifications coalesce.
    pub fn notify_update_writer(&self) {
        let control = &self.inner.update_writer;
        let mut state = control.state.lock().expect("update writer lock poisoned");
        state.pending = true;
        control.cvar.notify_all();
    }

    /// Start the background thread that drains the persistent update log
    /// into `dispatcher`. Returns an error when it is already running.
    pub fn start_update_writer(
        &self,
        dispatcher: Arc<dyn UpdateDispatcher>,
    ) -> Result<(), StoreError> {
        {
            let mut state = self
                .inner
                .update_writer
                .state
                .lock()
                .expect("update writer lock poisoned");
            if state.running {
                return Err(StoreError::validation("update writer already running"));
            }
            state.running = true;
            state.stop_requested = false;
            state.pending = true;
        }
        let weak: Weak<CoreInner> = Arc::downgrade(&self.inner);
        std::thread::spawn(move || update_writer_loop(weak, dispatcher));
        Ok(())
    }

    /// Blocks until the writer thread has exited. No-op when not running.
    pub fn stop_update_writer(&self) {
        let control = &self.inner.update_writer;
        let mut state = control.state.lock().expect("update writer lock poisoned");
        if !state.running {
            return;
        }
        state.stop_requested = true;
        control.cvar.notify_all();
        while state.running {
            state = control
                .cvar
                .wait(state)
                .expect("update writer lock poisoned");
        }
    }

    /// Record a `pty:pos` row for web watchers; no-op for unshared screens.
    pub fn maybe_insert_pty_pos_update(
        &self,
        screen_id: &ScreenId,
        line_id: &LineId,
    ) -> Result<(), StoreError> {
        let inserted = self.db().with_tx(|tx| {
            if !tx_is_web_share(tx, screen_id)? {
                return Ok(false);
            }
            tx_insert_screen_line_update(tx, screen_id, line_id, ScreenUpdateKind::PtyPos)?;
            Ok(true)
        })?;
        if inserted {
            self.notify_update_writer();
        }
        Ok(())
    }

    /// Create the pty file for a command line; a non-positive `max_size`
    /// falls back to the configured default.
    pub fn create_cmd_pty_file(
        &self,
        screen_id: &ScreenId,
        line_id: &LineId,
        max_size: i64,
    ) -> Result<(), StoreError> {
        let max_size = if max_size > 0 {
            max_size
        } else {
            self.inner.config.default_max_pty_size
        };
        self.pty_files()
            .create_cmd_pty_file(screen_id, line_id, max_size)?;
        Ok(())
    }

    /// Clear a command's pty file, preserving its max size (or falling back
    /// to the configured default for a missing file).
    pub fn clear_cmd_pty_file(
        &self,
        screen_id: &ScreenId,
        line_id: &LineId,
    ) -> Result<(), StoreError> {
        self.pty_files().clear_cmd_pty_file(
            screen_id,
            line_id,
            self.inner.config.default_max_pty_size,
        )?;
        Ok(())
    }

    /// Append terminal output for a command line: writes the circular file,
    /// records `pty:pos` when the screen is shared, and returns the
    /// incremental record for the bus.
    pub fn append_to_cmd_pty_blob(
        &self,
        screen_id: &ScreenId,
        line_id: &LineId,
        data: &[u8],
        pos: i64,
    ) -> Result<PtyDataUpdate, StoreError> {
        let update = self
            .pty_files()
            .append_to_cmd_pty_blob(screen_id, line_id, data, pos)?;
        if let Err(err) = self.maybe_insert_pty_pos_update(screen_id, line_id) {
            tracing::warn!(
                screen_id = %screen_id,
                line_id = %line_id,
                error = %err,
                "error inserting pty:pos update"
            );
        }
        Ok(update)
    }

    pub fn get_web_pty_pos(
        &self,
        screen_id: &ScreenId,
        line_id: &LineId,
    ) -> Result<i64, StoreError> {
        self.db().with_tx(|tx| {
            tx.get_i64(
                "SELECT ptypos FROM webptypos WHERE screenid = ?1 AND lineid = ?2",
                params![screen_id.as_str(), line_id.as_str()],
            )
        })
    }

    pub fn set_web_pty_pos(
        &self,
        screen_id: &ScreenId,
        line_id: &LineId,
        pty_pos: i64,
    ) -> Result<(), StoreError> {
        self.db().with_tx(|tx| {
            tx.exec(
                "INSERT INTO webptypos (screenid, lineid, ptypos) VALUES (?1, ?2, ?3)
                 ON CONFLICT(screenid, lineid) DO UPDATE SET ptypos = excluded.ptypos",
                params![screen_id.as_str(), line_id.as_str(), pty_pos],
            )?;
            Ok(())
        })
    }

    pub fn delete_web_pty_pos(
        &self,
        screen_id: &ScreenId,
        line_id: &LineId,
    ) -> Result<(), StoreError> {
        self.db().with_tx(|tx| {
            tx.exec(
                "DELETE FROM webptypos WHERE screenid = ?1 AND lineid = ?2",
                params![screen_id.as_str(), line_id.as_str()],
            )?;
            Ok(())
        })
    }
}

fn update_writer_loop(weak: Weak<CoreInner>, dispatcher: Arc<dyn UpdateDispatcher>) {
    loop {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        // sleep until work is signalled (or a stop is requested)
        {
            let mut state = inner
                .update_writer
                .state
                .lock()
                .expect("update writer lock poisoned");
            while !state.pending && !state.stop_requested {
                state = inner
                    .update_writer
                    .cvar
                    .wait(state)
                    .expect("update writer lock poisoned");
            }
            if state.stop_requested {
                state.running = false;
                state.stop_requested = false;
                inner.update_writer.cvar.notify_all();
                return;
            }
            state.pending = false;
        }

        loop {
            let count = match db_count_screen_updates(&inner.db) {
                Ok(count) => count,
                Err(err) => {
                    tracing::warn!(error = %err, "error counting screen updates");
                    break;
                }
            };
            if count == 0 {
                break;
            }
            let batch = match db_get_screen_updates(&inner.db, inner.config.update_writer_batch) {
                Ok(batch) => batch,
                Err(err) => {
                    tracing::warn!(error = %err, "error reading screen updates");
                    break;
                }
            };
            if batch.is_empty() {
                break;
            }
            let mut delivered = Vec::with_capacity(batch.len());
            let mut had_failure = false;
            for update in &batch {
                match dispatcher.dispatch(update) {
                    Ok(()) => delivered.push(update.update_id),
                    Err(err) => {
                        had_failure = true;
                        tracing::warn!(
                            update_id = update.update_id,
                            error = %err,
                            "screen update dispatch failed; leaving row for retry"
                        );
                    }
                }
            }
            if let Err(err) = db_remove_screen_updates(&inner.db, &delivered) {
                tracing::warn!(error = %err, "error removing delivered screen updates");
                break;
            }
            if had_failure {
                // failed rows stay queued; wait for the next notify instead
                // of spinning on them
                break;
            }
        }
    }
}
