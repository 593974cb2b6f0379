use rusqlite::params;
use termbench_model::{
    now_ms, ActiveSessionIdUpdate, FocusType, RemoteId, RemoteInstanceId, RemotePtr, Screen,
    ScreenAnchor, ScreenCreateOpts, ScreenEdit, ScreenId, ScreenOpts, ScreenTombstone,
    ScreenUpdateKind, ScreenViewOpts, ScreenWebShareOpts, SessionId, ShareMode, UpdatePacket,
    UpdateRecord, LOCAL_REMOTE_ALIAS,
};

use crate::db::{quick_json, quick_nullable_json, quick_set_json, quick_set_nullable_json, Tx};
use crate::error::StoreError;
use crate::lifecycle::Core;
use crate::session::{fmt_unique_name, get_next_id};
use crate::update_log::{
    tx_handle_screen_del_update, tx_insert_screen_new_update, tx_insert_screen_update,
    tx_is_web_share,
};

const SCREEN_COLS: &str = "screenid, sessionid, name, screenidx, screenopts, screenviewopts, \
     ownerid, sharemode, webshareopts, curremoteownerid, curremoteid, curremotename, \
     nextlinenum, selectedline, anchor, focustype, archived, archivedts";

pub(crate) fn map_screen_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Screen> {
    let screen_opts: String = row.get(4)?;
    let view_opts: String = row.get(5)?;
    let web_share_opts: String = row.get(8)?;
    let anchor: String = row.get(14)?;
    Ok(Screen {
        screen_id: ScreenId::new(row.get::<_, String>(0)?),
        session_id: SessionId::new(row.get::<_, String>(1)?),
        name: row.get(2)?,
        screen_idx: row.get(3)?,
        screen_opts: quick_set_json::<ScreenOpts>(&screen_opts).map_err(store_to_sql_error)?,
        screen_view_opts: quick_set_json::<ScreenViewOpts>(&view_opts)
            .map_err(store_to_sql_error)?,
        owner_id: row.get(6)?,
        share_mode: ShareMode::parse(&row.get::<_, String>(7)?).unwrap_or_default(),
        web_share_opts: quick_set_nullable_json::<ScreenWebShareOpts>(&web_share_opts)
            .map_err(store_to_sql_error)?,
        cur_remote: RemotePtr {
            owner_id: row.get(9)?,
            remote_id: RemoteId::new(row.get::<_, String>(10)?),
            name: row.get(11)?,
        },
        next_line_num: row.get(12)?,
        selected_line: row.get(13)?,
        anchor: quick_set_json::<ScreenAnchor>(&anchor).map_err(store_to_sql_error)?,
        focus_type: FocusType::parse(&row.get::<_, String>(15)?).unwrap_or_default(),
        archived: row.get::<_, i64>(16)? != 0,
        archived_ts: row.get(17)?,
        remove: false,
    })
}

fn store_to_sql_error(err: StoreError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::other(err.to_string())),
    )
}

pub(crate) fn tx_get_screen(
    tx: &Tx<'_>,
    screen_id: &ScreenId,
) -> Result<Option<Screen>, StoreError> {
    use rusqlite::OptionalExtension;
    let screen = tx
        .query_row(
            &format!("SELECT {SCREEN_COLS} FROM screen WHERE screenid = ?1"),
            params![screen_id.as_str()],
            map_screen_row,
        )
        .optional()?;
    Ok(screen)
}

/// Create a screen inside an existing transaction; returns the new id.
pub(crate) fn tx_insert_screen(
    tx: &Tx<'_>,
    session_id: &SessionId,
    orig_name: &str,
    opts: &ScreenCreateOpts,
    activate: bool,
) -> Result<ScreenId, StoreError> {
    if !tx.exists(
        "SELECT sessionid FROM session WHERE sessionid = ?1 AND NOT archived",
        params![session_id.as_str()],
    )? {
        return Err(StoreError::validation(
            "cannot create screen, no session found (or session archived)",
        ));
    }
    let local_remote_id = tx.get_string(
        "SELECT remoteid FROM remote WHERE remotealias = ?1",
        params![LOCAL_REMOTE_ALIAS],
    )?;
    if local_remote_id.is_empty() {
        return Err(StoreError::validation(
            "cannot create screen, no local remote found",
        ));
    }
    let max_screen_idx = tx.get_i64(
        "SELECT COALESCE(max(screenidx), 0) FROM screen WHERE sessionid = ?1 AND NOT archived",
        params![session_id.as_str()],
    )?;
    let screen_name = if orig_name.is_empty() {
        let names = tx.select_strings(
            "SELECT name FROM screen WHERE sessionid = ?1 AND NOT archived",
            params![session_id.as_str()],
        )?;
        fmt_unique_name("", "s%d", max_screen_idx + 1, &names)
    } else {
        orig_name.to_owned()
    };

    let mut cur_remote = RemotePtr::new(RemoteId::new(local_remote_id));
    if opts.has_copy() {
        let base_screen_id = opts.base_screen_id.as_ref().ok_or_else(|| {
            StoreError::validation("invalid screen create opts, copy option with no base screen specified")
        })?;
        let base_screen = tx_get_screen(tx, base_screen_id)?
            .ok_or_else(|| StoreError::validation("cannot create screen, base screen not found"))?;
        if opts.copy_remote {
            cur_remote = base_screen.cur_remote.clone();
        }
    }

    let new_screen_id = ScreenId::generate();
    tx.exec(
        "INSERT INTO screen (screenid, sessionid, name, screenidx, screenopts, screenviewopts,
                             ownerid, sharemode, webshareopts, curremoteownerid, curremoteid,
                             curremotename, nextlinenum, selectedline, anchor, focustype,
                             archived, archivedts)
         VALUES (?1, ?2, ?3, ?4, '{}', '{}', '', ?5, '', ?6, ?7, ?8, 1, 0, '{}', ?9, 0, 0)",
        params![
            new_screen_id.as_str(),
            session_id.as_str(),
            screen_name,
            max_screen_idx + 1,
            ShareMode::Local.as_str(),
            cur_remote.owner_id,
            cur_remote.remote_id.as_str(),
            cur_remote.name,
            FocusType::Input.as_str(),
        ],
    )?;

    if opts.copy_cwd || opts.copy_env {
        let base_screen_id = opts
            .base_screen_id
            .as_ref()
            .expect("has_copy checked above");
        copy_screen_remote_instances(tx, session_id, base_screen_id, &new_screen_id)?;
    }

    if activate {
        tx.exec(
            "UPDATE session SET activescreenid = ?1 WHERE sessionid = ?2",
            params![new_screen_id.as_str(), session_id.as_str()],
        )?;
    }
    Ok(new_screen_id)
}

// carries cwd/env forward by cloning the base screen's shell instances under
// fresh instance ids
fn copy_screen_remote_instances(
    tx: &Tx<'_>,
    session_id: &SessionId,
    base_screen_id: &ScreenId,
    new_screen_id: &ScreenId,
) -> Result<(), StoreError> {
    let riids = tx.select_strings(
        "SELECT riid FROM remote_instance WHERE sessionid = ?1 AND screenid = ?2",
        params![session_id.as_str(), base_screen_id.as_str()],
    )?;
    for riid in riids {
        tx.exec(
            "INSERT INTO remote_instance (riid, name, sessionid, screenid, remoteownerid,
                                          remoteid, festate, statebasehash, statediffhasharr,
                                          shelltype)
             SELECT ?1, name, sessionid, ?2, remoteownerid, remoteid, festate, statebasehash,
                    statediffhasharr, shelltype
             FROM remote_instance WHERE riid = ?3",
            params![
                RemoteInstanceId::generate().as_str(),
                new_screen_id.as_str(),
                riid
            ],
        )?;
    }
    Ok(())
}

/// Cascade-delete a screen inside an open transaction, appending the
/// tombstone and removal records to `update`. With `session_del` the
/// last-screen guard and active-screen fixup are skipped (the whole session
/// is going away). Returns the session id when the deleted screen was the
/// active one.
pub(crate) fn tx_delete_screen(
    tx: &Tx<'_>,
    screen_id: &ScreenId,
    session_del: bool,
    update: &mut UpdatePacket,
) -> Result<Option<SessionId>, StoreError> {
    let screen = tx_get_screen(tx, screen_id)?
        .ok_or_else(|| StoreError::validation("cannot delete screen (not found)"))?;
    let web_sharing = tx_is_web_share(tx, screen_id)?;
    let mut active_session = None;
    if !session_del {
        let session_id = screen.session_id.clone();
        if session_id.is_empty() {
            return Err(StoreError::validation("cannot delete screen (no sessionid)"));
        }
        let num_screens = tx.get_i64(
            "SELECT count(*) FROM screen WHERE sessionid = ?1 AND NOT archived",
            params![session_id.as_str()],
        )?;
        if num_screens <= 1 {
            return Err(StoreError::validation(
                "cannot delete the last screen in a session",
            ));
        }
        let is_active = tx.exists(
            "SELECT sessionid FROM session WHERE sessionid = ?1 AND activescreenid = ?2",
            params![session_id.as_str(), screen_id.as_str()],
        )?;
        if is_active {
            let screen_ids = tx.select_strings(
                "SELECT screenid FROM screen WHERE sessionid = ?1 AND NOT archived ORDER BY screenidx",
                params![session_id.as_str()],
            )?;
            let next_id = get_next_id(&screen_ids, screen_id.as_str());
            tx.exec(
                "UPDATE session SET activescreenid = ?1 WHERE sessionid = ?2",
                params![next_id, session_id.as_str()],
            )?;
            active_session = Some(session_id);
        }
    }

    let tombstone = ScreenTombstone {
        screen_id: screen.screen_id.clone(),
        session_id: screen.session_id.clone(),
        name: screen.name.clone(),
        deleted_ts: now_ms(),
        screen_opts: screen.screen_opts.clone(),
    };
    tx.exec(
        "INSERT INTO screen_tombstone (screenid, sessionid, name, deletedts, screenopts)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            tombstone.screen_id.as_str(),
            tombstone.session_id.as_str(),
            tombstone.name,
            tombstone.deleted_ts,
            quick_json(&tombstone.screen_opts)?,
        ],
    )?;
    tx.exec(
        "DELETE FROM screen WHERE screenid = ?1",
        params![screen_id.as_str()],
    )?;
    tx.exec(
        "DELETE FROM line WHERE screenid = ?1",
        params![screen_id.as_str()],
    )?;
    tx.exec(
        "DELETE FROM cmd WHERE screenid = ?1",
        params![screen_id.as_str()],
    )?;
    tx.exec(
        "DELETE FROM remote_instance WHERE screenid = ?1",
        params![screen_id.as_str()],
    )?;
    tx.exec(
        "UPDATE history SET lineid = '', linenum = 0 WHERE screenid = ?1",
        params![screen_id.as_str()],
    )?;
    if web_sharing {
        tx_handle_screen_del_update(tx, screen_id)?;
        tx_insert_screen_update(tx, screen_id, ScreenUpdateKind::ScreenDel)?;
    }

    update.add_update(UpdateRecord::ScreenTombstone(tombstone));
    update.add_update(UpdateRecord::Screen(Screen::removal(
        screen.session_id,
        screen.screen_id,
    )));
    Ok(active_session)
}

impl Core {
    pub fn get_screen_by_id(&self, screen_id: &ScreenId) -> Result<Option<Screen>, StoreError> {
        self.db().with_tx(|tx| tx_get_screen(tx, screen_id))
    }

    /// All screens of a session, archived ones last.
    pub fn get_session_screens(&self, session_id: &SessionId) -> Result<Vec<Screen>, StoreError> {
        self.db().with_tx(|tx| {
            let mut stmt = tx.prepare(&format!(
                "SELECT {SCREEN_COLS} FROM screen WHERE sessionid = ?1
                 ORDER BY archived, screenidx, archivedts"
            ))?;
            let rows = stmt.query_map(params![session_id.as_str()], map_screen_row)?;
            let mut screens = Vec::new();
            for row in rows {
                screens.push(row?);
            }
            Ok(screens)
        })
    }

    pub fn get_all_screens(&self) -> Result<Vec<Screen>, StoreError> {
        self.db().with_tx(|tx| {
            let mut stmt = tx.prepare(&format!(
                "SELECT {SCREEN_COLS} FROM screen ORDER BY archived, screenidx, archivedts"
            ))?;
            let rows = stmt.query_map([], map_screen_row)?;
            let mut screens = Vec::new();
            for row in rows {
                screens.push(row?);
            }
            Ok(screens)
        })
    }

    /// Create a screen (uniqued `s%d` name, next index) in a session.
    pub fn insert_screen(
        &self,
        session_id: &SessionId,
        name: &str,
        opts: &ScreenCreateOpts,
        activate: bool,
    ) -> Result<UpdatePacket, StoreError> {
        let new_screen_id = self
            .db()
            .with_tx(|tx| tx_insert_screen(tx, session_id, name, opts, activate))?;
        let screen = self
            .get_screen_by_id(&new_screen_id)?
            .ok_or_else(|| StoreError::validation("screen not found"))?;
        let mut update = UpdatePacket::new();
        update.add_update(UpdateRecord::Screen(screen));
        if activate {
            if let Some(session) = self.get_bare_session_by_id(session_id)? {
                update.add_update(UpdateRecord::Session(session));
            }
            update = self.update_with_current_openai_cmd_info_chat(&new_screen_id, Some(update));
        }
        Ok(update)
    }

    /// Archive a screen. Refused for web-shared screens and for the last
    /// non-archived screen of a session; archiving the active screen
    /// advances the session to the next screen by index.
    pub fn archive_screen(
        &self,
        session_id: &SessionId,
        screen_id: &ScreenId,
    ) -> Result<UpdatePacket, StoreError> {
        let was_active = self.db().with_tx(|tx| {
            if !tx.exists(
                "SELECT screenid FROM screen WHERE sessionid = ?1 AND screenid = ?2",
                params![session_id.as_str(), screen_id.as_str()],
            )? {
                return Err(StoreError::validation("cannot close screen (not found)"));
            }
            if tx_is_web_share(tx, screen_id)? {
                return Err(StoreError::validation(
                    "cannot archive screen while web-sharing. stop web-sharing before trying to archive.",
                ));
            }
            let already = tx.get_bool(
                "SELECT archived FROM screen WHERE sessionid = ?1 AND screenid = ?2",
                params![session_id.as_str(), screen_id.as_str()],
            )?;
            if already {
                return Ok(false);
            }
            let num_screens = tx.get_i64(
                "SELECT count(*) FROM screen WHERE sessionid = ?1 AND NOT archived",
                params![session_id.as_str()],
            )?;
            if num_screens <= 1 {
                return Err(StoreError::validation(
                    "cannot archive the last screen in a session",
                ));
            }
            tx.exec(
                "UPDATE screen SET archived = 1, archivedts = ?1, screenidx = 0
                 WHERE sessionid = ?2 AND screenid = ?3",
                params![now_ms(), session_id.as_str(), screen_id.as_str()],
            )?;
            let is_active = tx.exists(
                "SELECT sessionid FROM session WHERE sessionid = ?1 AND activescreenid = ?2",
                params![session_id.as_str(), screen_id.as_str()],
            )?;
            if is_active {
                let screen_ids = tx.select_strings(
                    "SELECT screenid FROM screen WHERE sessionid = ?1 AND NOT archived ORDER BY screenidx",
                    params![session_id.as_str()],
                )?;
                let next_id = get_next_id(&screen_ids, screen_id.as_str());
                tx.exec(
                    "UPDATE session SET activescreenid = ?1 WHERE sessionid = ?2",
                    params![next_id, session_id.as_str()],
                )?;
            }
            Ok(is_active)
        })?;

        let screen = self
            .get_screen_by_id(screen_id)?
            .ok_or_else(|| StoreError::validation("cannot retrieve archived screen"))?;
        let mut update = UpdatePacket::new();
        update.add_update(UpdateRecord::Screen(screen));
        if was_active {
            if let Some(session) = self.get_bare_session_by_id(session_id)? {
                update.add_update(UpdateRecord::Session(session));
            }
        }
        Ok(update)
    }

    pub fn unarchive_screen(
        &self,
        session_id: &SessionId,
        screen_id: &ScreenId,
    ) -> Result<(), StoreError> {
        self.db().with_tx(|tx| {
            if !tx.exists(
                "SELECT screenid FROM screen WHERE sessionid = ?1 AND screenid = ?2 AND archived",
                params![session_id.as_str(), screen_id.as_str()],
            )? {
                return Err(StoreError::validation(
                    "cannot re-open screen (not found or not archived)",
                ));
            }
            let max_idx = tx.get_i64(
                "SELECT COALESCE(max(screenidx), 0) FROM screen WHERE sessionid = ?1 AND NOT archived",
                params![session_id.as_str()],
            )?;
            tx.exec(
                "UPDATE screen SET archived = 0, screenidx = ?1 WHERE sessionid = ?2 AND screenid = ?3",
                params![max_idx + 1, session_id.as_str(), screen_id.as_str()],
            )?;
            Ok(())
        })
    }

    /// Delete a screen, cascading to its lines, cmds, and shell instances.
    pub fn delete_screen(
        &self,
        screen_id: &ScreenId,
        session_del: bool,
    ) -> Result<UpdatePacket, StoreError> {
        let mut update = UpdatePacket::new();
        let active_session = self
            .db()
            .with_tx(|tx| tx_delete_screen(tx, screen_id, session_del, &mut update))?;
        if !session_del {
            self.pty_files()
                .spawn_delete_screen_dirs(vec![screen_id.clone()]);
        }
        self.inner.screen_mem.remove_screen(screen_id);
        self.filedb().evict_screen(screen_id);
        self.bus().remove_screen(screen_id);
        if let Some(session_id) = active_session {
            if let Some(session) = self.get_bare_session_by_id(&session_id)? {
                update.add_update(UpdateRecord::Session(session));
            }
        }
        self.notify_update_writer();
        Ok(update)
    }

    /// Move a screen to a 1-based position among the session's non-archived
    /// screens, reindexing the rest densely.
    pub fn set_screen_idx(
        &self,
        session_id: &SessionId,
        screen_id: &ScreenId,
        new_screen_idx: i64,
    ) -> Result<Vec<Screen>, StoreError> {
        if new_screen_idx <= 0 {
            return Err(StoreError::validation(
                "invalid screenidx/pos, must be greater than 0",
            ));
        }
        self.db().with_tx(|tx| {
            if !tx.exists(
                "SELECT screenid FROM screen WHERE sessionid = ?1 AND screenid = ?2 AND NOT archived",
                params![session_id.as_str(), screen_id.as_str()],
            )? {
                return Err(StoreError::validation("invalid screen, not found (or archived)"));
            }
            let screens = tx.select_strings(
                "SELECT screenid FROM screen WHERE sessionid = ?1 AND NOT archived ORDER BY screenidx",
                params![session_id.as_str()],
            )?;
            let reordered = reorder_strs(&screens, screen_id.as_str(), (new_screen_idx - 1) as usize);
            for (idx, sid) in reordered.iter().enumerate() {
                tx.exec(
                    "UPDATE screen SET screenidx = ?1 WHERE sessionid = ?2 AND screenid = ?3",
                    params![idx as i64 + 1, session_id.as_str(), sid],
                )?;
            }
            Ok(())
        })?;
        self.get_session_screens(session_id)
            .map(|screens| screens.into_iter().filter(|s| !s.archived).collect())
    }

    pub fn set_screen_name(
        &self,
        session_id: &SessionId,
        screen_id: &ScreenId,
        name: &str,
    ) -> Result<(), StoreError> {
        self.db().with_tx(|tx| {
            if !tx.exists(
                "SELECT screenid FROM screen WHERE sessionid = ?1 AND screenid = ?2",
                params![session_id.as_str(), screen_id.as_str()],
            )? {
                return Err(StoreError::validation("screen does not exist"));
            }
            tx.exec(
                "UPDATE screen SET name = ?1 WHERE sessionid = ?2 AND screenid = ?3",
                params![name, session_id.as_str(), screen_id.as_str()],
            )?;
            Ok(())
        })
    }

    /// Activate a session+screen pair and replay the screen's non-persistent
    /// state for the front end.
    pub fn switch_screen(
        &self,
        session_id: &SessionId,
        screen_id: &ScreenId,
    ) -> Result<UpdatePacket, StoreError> {
        self.set_active_session_id(session_id)?;
        self.db().with_tx(|tx| {
            if !tx.exists(
                "SELECT screenid FROM screen WHERE sessionid = ?1 AND screenid = ?2",
                params![session_id.as_str(), screen_id.as_str()],
            )? {
                return Err(StoreError::validation(format!(
                    "cannot switch to screen, screen={} does not exist in session={}",
                    screen_id.as_str(),
                    session_id.as_str()
                )));
            }
            tx.exec(
                "UPDATE session SET activescreenid = ?1 WHERE sessionid = ?2",
                params![screen_id.as_str(), session_id.as_str()],
            )?;
            Ok(())
        })?;

        let mut update = UpdatePacket::new();
        update.add_update(UpdateRecord::ActiveSessionId(ActiveSessionIdUpdate {
            session_id: session_id.clone(),
        }));
        if let Some(session) = self.get_bare_session_by_id(session_id)? {
            update.add_update(UpdateRecord::Session(session));
        }
        let mem = self.screen_mem_snapshot(screen_id);
        update.add_update(UpdateRecord::CmdLine(mem.cmd_input_text));
        update = self.update_with_current_openai_cmd_info_chat(screen_id, Some(update));
        if let Err(err) = self.reset_status_indicator_update(&mut update, screen_id) {
            tracing::warn!(error = %err, "error resetting status indicator on screen switch");
        }
        Ok(update)
    }

    /// Apply a typed field-edit set; unset fields are untouched.
    pub fn update_screen(
        &self,
        screen_id: &ScreenId,
        edit: &ScreenEdit,
    ) -> Result<Screen, StoreError> {
        let inserted_updates = self.db().with_tx(|tx| {
            if !tx.exists(
                "SELECT screenid FROM screen WHERE screenid = ?1",
                params![screen_id.as_str()],
            )? {
                return Err(StoreError::validation("screen not found"));
            }
            let mut inserted = false;
            if let Some(anchor_line) = edit.anchor_line {
                tx.exec(
                    "UPDATE screen SET anchor = json_set(anchor, '$.anchorline', ?1) WHERE screenid = ?2",
                    params![anchor_line, screen_id.as_str()],
                )?;
            }
            if let Some(anchor_offset) = edit.anchor_offset {
                tx.exec(
                    "UPDATE screen SET anchor = json_set(anchor, '$.anchoroffset', ?1) WHERE screenid = ?2",
                    params![anchor_offset, screen_id.as_str()],
                )?;
            }
            if let Some(selected_line) = edit.selected_line {
                tx.exec(
                    "UPDATE screen SET selectedline = ?1 WHERE screenid = ?2",
                    params![selected_line, screen_id.as_str()],
                )?;
                if tx_is_web_share(tx, screen_id)? {
                    tx_insert_screen_update(tx, screen_id, ScreenUpdateKind::ScreenSelectedLine)?;
                    inserted = true;
                }
            }
            if let Some(focus_type) = edit.focus_type {
                tx.exec(
                    "UPDATE screen SET focustype = ?1 WHERE screenid = ?2",
                    params![focus_type.as_str(), screen_id.as_str()],
                )?;
            }
            if let Some(tab_color) = &edit.tab_color {
                tx.exec(
                    "UPDATE screen SET screenopts = json_set(screenopts, '$.tabcolor', ?1) WHERE screenid = ?2",
                    params![tab_color, screen_id.as_str()],
                )?;
            }
            if let Some(tab_icon) = &edit.tab_icon {
                tx.exec(
                    "UPDATE screen SET screenopts = json_set(screenopts, '$.tabicon', ?1) WHERE screenid = ?2",
                    params![tab_icon, screen_id.as_str()],
                )?;
            }
            if let Some(pterm) = &edit.pterm {
                tx.exec(
                    "UPDATE screen SET screenopts = json_set(screenopts, '$.pterm', ?1) WHERE screenid = ?2",
                    params![pterm, screen_id.as_str()],
                )?;
            }
            if let Some(name) = &edit.name {
                tx.exec(
                    "UPDATE screen SET name = ?1 WHERE screenid = ?2",
                    params![name, screen_id.as_str()],
                )?;
            }
            if let Some(share_name) = &edit.share_name {
                if !tx_is_web_share(tx, screen_id)? {
                    return Err(StoreError::validation(
                        "cannot set sharename, screen is not web-shared",
                    ));
                }
                tx.exec(
                    "UPDATE screen SET webshareopts = json_set(webshareopts, '$.sharename', ?1)
                     WHERE screenid = ?2",
                    params![share_name, screen_id.as_str()],
                )?;
                tx_insert_screen_update(tx, screen_id, ScreenUpdateKind::ScreenShareName)?;
                inserted = true;
            }
            Ok(inserted)
        })?;
        if inserted_updates {
            self.notify_update_writer();
        }
        self.get_screen_by_id(screen_id)?
            .ok_or_else(|| StoreError::validation("screen not found"))
    }

    pub fn screen_update_view_opts(
        &self,
        screen_id: &ScreenId,
        view_opts: &ScreenViewOpts,
    ) -> Result<(), StoreError> {
        let encoded = quick_json(view_opts)?;
        self.db().with_tx(|tx| {
            tx.exec(
                "UPDATE screen SET screenviewopts = ?1 WHERE screenid = ?2",
                params![encoded, screen_id.as_str()],
            )?;
            Ok(())
        })
    }

    /// Line id behind the screen's selected line number, when one exists.
    pub fn get_screen_selected_line_id(
        &self,
        screen_id: &ScreenId,
    ) -> Result<Option<String>, StoreError> {
        self.db().with_tx(|tx| {
            let selected = tx.get_i64(
                "SELECT selectedline FROM screen WHERE screenid = ?1",
                params![screen_id.as_str()],
            )?;
            if selected <= 0 {
                return Ok(None);
            }
            let line_id = tx.get_string(
                "SELECT lineid FROM line WHERE screenid = ?1 AND linenum = ?2",
                params![screen_id.as_str(), selected],
            )?;
            Ok((!line_id.is_empty()).then_some(line_id))
        })
    }

    /// When the selected line no longer exists, snap to the closest higher
    /// line number (or the closest lower one). Returns the screen when it
    /// changed.
    pub fn fixup_screen_selected_line(
        &self,
        screen_id: &ScreenId,
    ) -> Result<Option<Screen>, StoreError> {
        self.db().with_tx(|tx| {
            let selected = tx.get_i64(
                "SELECT selectedline FROM screen WHERE screenid = ?1",
                params![screen_id.as_str()],
            )?;
            if tx.exists(
                "SELECT linenum FROM line WHERE screenid = ?1 AND linenum = ?2",
                params![screen_id.as_str(), selected],
            )? {
                return Ok(None);
            }
            let mut new_selected = tx.get_i64(
                "SELECT min(linenum) FROM line WHERE screenid = ?1 AND linenum > ?2",
                params![screen_id.as_str(), selected],
            )?;
            if new_selected == 0 {
                new_selected = tx.get_i64(
                    "SELECT max(linenum) FROM line WHERE screenid = ?1 AND linenum < ?2",
                    params![screen_id.as_str(), selected],
                )?;
            }
            // zero is fine here: it means the screen has no lines at all
            tx.exec(
                "UPDATE screen SET selectedline = ?1 WHERE screenid = ?2",
                params![new_selected, screen_id.as_str()],
            )?;
            tx_get_screen(tx, screen_id)
        })
    }

    /// A done command whose line is still selected with cmd focus hands the
    /// focus back to the input. Returns the updated screen once.
    pub fn update_screen_focus_for_done_cmd(
        &self,
        screen_id: &ScreenId,
        line_id: &str,
    ) -> Result<Option<Screen>, StoreError> {
        let needs_update = self.db().with_tx(|tx| {
            tx.exists(
                "SELECT screenid FROM screen s
                 WHERE s.screenid = ?1 AND s.focustype = 'cmd'
                   AND s.selectedline IN
                       (SELECT linenum FROM line l WHERE l.screenid = s.screenid AND l.lineid = ?2)",
                params![screen_id.as_str(), line_id],
            )
        })?;
        if !needs_update {
            return Ok(None);
        }
        let edit = ScreenEdit {
            focus_type: Some(FocusType::Input),
            ..ScreenEdit::default()
        };
        self.update_screen(screen_id, &edit).map(Some)
    }

    /// Drop every shell instance bound to the screen; returns removal
    /// records for the bus.
    pub fn screen_reset(
        &self,
        screen_id: &ScreenId,
    ) -> Result<Vec<termbench_model::RemoteInstance>, StoreError> {
        self.db().with_tx(|tx| {
            let session_id = tx.get_string(
                "SELECT sessionid FROM screen WHERE screenid = ?1",
                params![screen_id.as_str()],
            )?;
            if session_id.is_empty() {
                return Err(StoreError::validation("screen does not exist"));
            }
            let riids = tx.select_strings(
                "SELECT riid FROM remote_instance WHERE sessionid = ?1 AND screenid = ?2",
                params![session_id, screen_id.as_str()],
            )?;
            let session_id = SessionId::new(session_id);
            let removed = riids
                .into_iter()
                .map(|riid| {
                    termbench_model::RemoteInstance::removal(
                        session_id.clone(),
                        screen_id.clone(),
                        RemoteInstanceId::new(riid),
                    )
                })
                .collect();
            tx.exec(
                "DELETE FROM remote_instance WHERE sessionid = ?1 AND screenid = ?2",
                params![session_id.as_str(), screen_id.as_str()],
            )?;
            Ok(removed)
        })
    }

    /// Start web-sharing: flips the share mode and seeds the persistent
    /// update log with the screen's visible lines.
    pub fn screen_web_share_start(
        &self,
        screen_id: &ScreenId,
        share_opts: &ScreenWebShareOpts,
    ) -> Result<(), StoreError> {
        let encoded = quick_nullable_json(&Some(share_opts.clone()))?;
        self.db().with_tx(|tx| {
            if !tx.exists(
                "SELECT screenid FROM screen WHERE screenid = ?1",
                params![screen_id.as_str()],
            )? {
                return Err(StoreError::validation("screen does not exist"));
            }
            let share_mode = tx.get_string(
                "SELECT sharemode FROM screen WHERE screenid = ?1",
                params![screen_id.as_str()],
            )?;
            if share_mode == ShareMode::Web.as_str() {
                return Err(StoreError::validation("screen is already shared to web"));
            }
            if share_mode != ShareMode::Local.as_str() {
                return Err(StoreError::validation(format!(
                    "screen cannot be shared, invalid current share mode \"{share_mode}\" (must be local)"
                )));
            }
            tx.exec(
                "UPDATE screen SET sharemode = ?1, webshareopts = ?2 WHERE screenid = ?3",
                params![ShareMode::Web.as_str(), encoded, screen_id.as_str()],
            )?;
            tx_insert_screen_update(tx, screen_id, ScreenUpdateKind::ScreenNew)?;
            tx_insert_screen_new_update(tx, screen_id)?;
            Ok(())
        })?;
        self.notify_update_writer();
        Ok(())
    }

    pub fn screen_web_share_stop(&self, screen_id: &ScreenId) -> Result<(), StoreError> {
        self.db().with_tx(|tx| {
            if !tx.exists(
                "SELECT screenid FROM screen WHERE screenid = ?1",
                params![screen_id.as_str()],
            )? {
                return Err(StoreError::validation("screen does not exist"));
            }
            let share_mode = tx.get_string(
                "SELECT sharemode FROM screen WHERE screenid = ?1",
                params![screen_id.as_str()],
            )?;
            if share_mode != ShareMode::Web.as_str() {
                return Err(StoreError::validation(
                    "screen is not currently shared to the web",
                ));
            }
            tx.exec(
                "UPDATE screen SET sharemode = ?1, webshareopts = '' WHERE screenid = ?2",
                params![ShareMode::Local.as_str(), screen_id.as_str()],
            )?;
            tx_handle_screen_del_update(tx, screen_id)?;
            Ok(())
        })
    }

    pub fn count_screen_web_shares(&self) -> Result<i64, StoreError> {
        self.db().with_tx(|tx| {
            tx.get_i64(
                "SELECT count(*) FROM screen WHERE sharemode = ?1",
                params![ShareMode::Web.as_str()],
            )
        })
    }

    pub fn count_screen_lines(&self, screen_id: &ScreenId) -> Result<i64, StoreError> {
        self.db().with_tx(|tx| {
            tx.get_i64(
                "SELECT count(*) FROM line WHERE screenid = ?1 AND NOT archived",
                params![screen_id.as_str()],
            )
        })
    }

    /// All screens become input-focused (startup recovery).
    pub fn re_init_focus(&self) -> Result<(), StoreError> {
        self.db().with_tx(|tx| {
            tx.exec("UPDATE screen SET focustype = 'input'", [])?;
            Ok(())
        })
    }

    pub fn update_cur_remote(
        &self,
        screen_id: &ScreenId,
        remote_ptr: &RemotePtr,
    ) -> Result<(), StoreError> {
        self.db().with_tx(|tx| {
            if !tx.exists(
                "SELECT screenid FROM screen WHERE screenid = ?1",
                params![screen_id.as_str()],
            )? {
                return Err(StoreError::validation("cannot update curremote: no screen found"));
            }
            tx.exec(
                "UPDATE screen SET curremoteownerid = ?1, curremoteid = ?2, curremotename = ?3
                 WHERE screenid = ?4",
                params![
                    remote_ptr.owner_id,
                    remote_ptr.remote_id.as_str(),
                    remote_ptr.name,
                    screen_id.as_str()
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_screen_tombstones(&self) -> Result<Vec<ScreenTombstone>, StoreError> {
        self.db().with_tx(|tx| {
            let mut stmt = tx.prepare(
                "SELECT screenid, sessionid, name, deletedts, screenopts
                 FROM screen_tombstone ORDER BY deletedts",
            )?;
            let rows = stmt.query_map([], |row| {
                let opts: String = row.get(4)?;
                Ok(ScreenTombstone {
                    screen_id: ScreenId::new(row.get::<_, String>(0)?),
                    session_id: SessionId::new(row.get::<_, String>(1)?),
                    name: row.get(2)?,
                    deleted_ts: row.get(3)?,
                    screen_opts: quick_set_json::<ScreenOpts>(&opts)
                        .map_err(store_to_sql_error)?,
                })
            })?;
            let mut tombstones = Vec::new();
            for row in rows {
                tombstones.push(row?);
            }
            Ok(tombstones)
        })
    }
}

// newPos is 0-indexed
fn reorder_strs(strs: &[String], to_move: &str, new_pos: usize) -> Vec<String> {
    if !strs.iter().any(|s| s == to_move) {
        return strs.to_vec();
    }
    let mut rtn = Vec::with_capacity(strs.len());
    let mut added = false;
    for s in strs {
        if s == to_move {
            continue;
        }
        if rtn.len() == new_pos {
            added = true;
            rtn.push(to_move.to_owned());
        }
        rtn.push(s.clone());
    }
    if !added {
        rtn.push(to_move.to_owned());
    }
    rtn
}

#[cfg(test)]
mod tests {
    use super::reorder_strs;

    fn strs(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn reorder_moves_to_front_middle_and_back() {
        let input = strs(&["a", "b", "c"]);
        assert_eq!(reorder_strs(&input, "c", 0), strs(&["c", "a", "b"]));
        assert_eq!(reorder_strs(&input, "a", 1), strs(&["b", "a", "c"]));
        assert_eq!(reorder_strs(&input, "a", 5), strs(&["b", "c", "a"]));
    }

    #[test]
    fn reorder_unknown_id_is_a_noop() {
        let input = strs(&["a", "b"]);
        assert_eq!(reorder_strs(&input, "zz", 0), input);
    }
}
