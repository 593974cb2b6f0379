use rusqlite::params;
use termbench_model::{
    Cmd, CmdDoneInfo, CmdStatus, Line, LineId, LineState, LineType, RemoteId, RemotePtr, Screen,
    ScreenId, ScreenLines, ScreenUpdateKind, ShellStatePtr, StatusIndicatorLevel, TermOpts,
    UpdatePacket, UpdateRecord, UserId, MAX_LINE_STATE_SIZE,
};

use crate::db::{quick_json, quick_json_arr, quick_set_json, quick_set_json_arr, Tx};
use crate::error::StoreError;
use crate::lifecycle::Core;

const LINE_COLS: &str = "screenid, lineid, userid, ts, linenum, linenumtemp, linelocal, linetype, \
     linestate, text, renderer, ephemeral, contentheight, star, archived";

pub(crate) fn map_line_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Line> {
    let line_type: String = row.get(7)?;
    let line_state: String = row.get(8)?;
    Ok(Line {
        screen_id: ScreenId::new(row.get::<_, String>(0)?),
        line_id: LineId::new(row.get::<_, String>(1)?),
        user_id: UserId::new(row.get::<_, String>(2)?),
        ts: row.get(3)?,
        line_num: row.get(4)?,
        line_num_temp: row.get::<_, i64>(5)? != 0,
        line_local: row.get::<_, i64>(6)? != 0,
        line_type: LineType::parse(&line_type).unwrap_or_default(),
        line_state: quick_set_json::<LineState>(&line_state).map_err(store_to_sql_error)?,
        text: row.get(9)?,
        renderer: row.get(10)?,
        ephemeral: row.get::<_, i64>(11)? != 0,
        content_height: row.get(12)?,
        star: row.get::<_, i64>(13)? != 0,
        archived: row.get::<_, i64>(14)? != 0,
        remove: false,
    })
}

const CMD_COLS: &str = "screenid, lineid, remoteownerid, remoteid, remotename, cmdstr, rawcmdstr, \
     festate, statebasehash, statediffhasharr, termopts, origtermopts, status, cmdpid, remotepid, \
     donets, restartts, exitcode, durationms, runout, rtnstate, rtnbasehash, rtndiffhasharr";

pub(crate) fn map_cmd_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Cmd> {
    let fe_state: String = row.get(7)?;
    let diff_hash_arr: String = row.get(9)?;
    let term_opts: String = row.get(10)?;
    let orig_term_opts: String = row.get(11)?;
    let status: String = row.get(12)?;
    let run_out: String = row.get(19)?;
    let rtn_diff_hash_arr: String = row.get(22)?;
    Ok(Cmd {
        screen_id: ScreenId::new(row.get::<_, String>(0)?),
        line_id: LineId::new(row.get::<_, String>(1)?),
        remote: RemotePtr {
            owner_id: row.get(2)?,
            remote_id: RemoteId::new(row.get::<_, String>(3)?),
            name: row.get(4)?,
        },
        cmd_str: row.get(5)?,
        raw_cmd_str: row.get(6)?,
        fe_state: quick_set_json(&fe_state).map_err(store_to_sql_error)?,
        state_ptr: ShellStatePtr {
            base_hash: row.get(8)?,
            diff_hash_arr: quick_set_json_arr(&diff_hash_arr).map_err(store_to_sql_error)?,
        },
        term_opts: quick_set_json::<TermOpts>(&term_opts).map_err(store_to_sql_error)?,
        orig_term_opts: quick_set_json::<TermOpts>(&orig_term_opts).map_err(store_to_sql_error)?,
        status: CmdStatus::parse(&status).unwrap_or(CmdStatus::Unknown),
        cmd_pid: row.get(13)?,
        remote_pid: row.get(14)?,
        done_ts: row.get(15)?,
        restart_ts: row.get(16)?,
        exit_code: row.get(17)?,
        duration_ms: row.get(18)?,
        run_out: quick_set_json(&run_out).map_err(store_to_sql_error)?,
        rtn_state: row.get::<_, i64>(20)? != 0,
        rtn_state_ptr: ShellStatePtr {
            base_hash: row.get(21)?,
            diff_hash_arr: quick_set_json_arr(&rtn_diff_hash_arr).map_err(store_to_sql_error)?,
        },
        remove: false,
        restarted: false,
    })
}

fn store_to_sql_error(err: StoreError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::other(err.to_string())),
    )
}

pub(crate) fn tx_get_line(
    tx: &Tx<'_>,
    screen_id: &ScreenId,
    line_id: &LineId,
) -> Result<Option<Line>, StoreError> {
    use rusqlite::OptionalExtension;
    let line = tx
        .query_row(
            &format!("SELECT {LINE_COLS} FROM line WHERE screenid = ?1 AND lineid = ?2"),
            params![screen_id.as_str(), line_id.as_str()],
            map_line_row,
        )
        .optional()?;
    Ok(line)
}

pub(crate) fn tx_get_cmd(
    tx: &Tx<'_>,
    screen_id: &ScreenId,
    line_id: &LineId,
) -> Result<Option<Cmd>, StoreError> {
    use rusqlite::OptionalExtension;
    let cmd = tx
        .query_row(
            &format!("SELECT {CMD_COLS} FROM cmd WHERE screenid = ?1 AND lineid = ?2"),
            params![screen_id.as_str(), line_id.as_str()],
            map_cmd_row,
        )
        .optional()?;
    Ok(cmd)
}

fn tx_insert_cmd(tx: &Tx<'_>, cmd: &Cmd) -> Result<(), StoreError> {
    tx.exec(
        "INSERT INTO cmd (screenid, lineid, remoteownerid, remoteid, remotename, cmdstr,
                          rawcmdstr, festate, statebasehash, statediffhasharr, termopts,
                          origtermopts, status, cmdpid, remotepid, donets, restartts, exitcode,
                          durationms, runout, rtnstate, rtnbasehash, rtndiffhasharr)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                 ?18, ?19, ?20, ?21, ?22, ?23)",
        params![
            cmd.screen_id.as_str(),
            cmd.line_id.as_str(),
            cmd.remote.owner_id,
            cmd.remote.remote_id.as_str(),
            cmd.remote.name,
            cmd.cmd_str,
            cmd.raw_cmd_str,
            quick_json(&cmd.fe_state)?,
            cmd.state_ptr.base_hash,
            quick_json_arr(&cmd.state_ptr.diff_hash_arr)?,
            quick_json(&cmd.term_opts)?,
            quick_json(&cmd.orig_term_opts)?,
            cmd.status.as_str(),
            cmd.cmd_pid,
            cmd.remote_pid,
            cmd.done_ts,
            cmd.restart_ts,
            cmd.exit_code,
            cmd.duration_ms,
            quick_json(&cmd.run_out)?,
            cmd.rtn_state as i64,
            cmd.rtn_state_ptr.base_hash,
            quick_json_arr(&cmd.rtn_state_ptr.diff_hash_arr)?,
        ],
    )?;
    Ok(())
}

impl Core {
    /// Insert a line (and its cmd row, for cmd lines). The line number is
    /// assigned here from the screen's `next_line_num`, atomically with the
    /// counter bump, so numbers are dense and never reused.
    pub fn insert_line(&self, line: &mut Line, cmd: Option<&Cmd>) -> Result<(), StoreError> {
        if line.line_id.is_empty() {
            return Err(StoreError::validation("line must have lineid set"));
        }
        if line.line_num != 0 {
            return Err(StoreError::validation("line should not have linenum set"));
        }
        if let Some(cmd) = cmd {
            if cmd.screen_id.is_empty() {
                return Err(StoreError::validation("cmd should have screenid set"));
            }
        }
        let state_json = quick_json(&line.line_state)?;
        if state_json.len() > MAX_LINE_STATE_SIZE {
            return Err(StoreError::validation(format!(
                "linestate exceeds maxsize, size[{}] max[{}]",
                state_json.len(),
                MAX_LINE_STATE_SIZE
            )));
        }

        let line_num = self.db().with_tx(|tx| {
            if !tx.exists(
                "SELECT screenid FROM screen WHERE screenid = ?1",
                params![line.screen_id.as_str()],
            )? {
                return Err(StoreError::validation(format!(
                    "screen not found, cannot insert line[{}]",
                    line.screen_id.as_str()
                )));
            }
            let next_line_num = tx.get_i64(
                "SELECT nextlinenum FROM screen WHERE screenid = ?1",
                params![line.screen_id.as_str()],
            )?;
            tx.exec(
                "INSERT INTO line (screenid, lineid, userid, ts, linenum, linenumtemp, linelocal,
                                   linetype, linestate, text, renderer, ephemeral, contentheight,
                                   star, archived)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    line.screen_id.as_str(),
                    line.line_id.as_str(),
                    line.user_id.as_str(),
                    line.ts,
                    next_line_num,
                    line.line_num_temp as i64,
                    line.line_local as i64,
                    line.line_type.as_str(),
                    state_json,
                    line.text,
                    line.renderer,
                    line.ephemeral as i64,
                    line.content_height,
                    line.star as i64,
                    line.archived as i64,
                ],
            )?;
            tx.exec(
                "UPDATE screen SET nextlinenum = ?1 WHERE screenid = ?2",
                params![next_line_num + 1, line.screen_id.as_str()],
            )?;
            if let Some(cmd) = cmd {
                let mut cmd = cmd.clone();
                cmd.orig_term_opts = cmd.term_opts;
                tx_insert_cmd(tx, &cmd)?;
            }
            if crate::update_log::tx_is_web_share(tx, &line.screen_id)? {
                crate::update_log::tx_insert_screen_line_update(
                    tx,
                    &line.screen_id,
                    &line.line_id,
                    ScreenUpdateKind::LineNew,
                )?;
            }
            Ok(next_line_num)
        })?;
        line.line_num = line_num;
        self.notify_update_writer();
        Ok(())
    }

    pub fn add_comment_line(
        &self,
        screen_id: &ScreenId,
        user_id: &UserId,
        comment_text: &str,
    ) -> Result<Line, StoreError> {
        let mut line = Line::new_text(screen_id.clone(), user_id.clone(), comment_text);
        self.insert_line(&mut line, None)?;
        Ok(line)
    }

    pub fn add_cmd_line(
        &self,
        screen_id: &ScreenId,
        user_id: &UserId,
        cmd: &Cmd,
        renderer: &str,
        line_state: Option<LineState>,
    ) -> Result<Line, StoreError> {
        let mut line = Line::new_cmd(
            screen_id.clone(),
            user_id.clone(),
            cmd.line_id.clone(),
            renderer,
            line_state,
        );
        self.insert_line(&mut line, Some(cmd))?;
        Ok(line)
    }

    pub fn add_openai_line(
        &self,
        screen_id: &ScreenId,
        user_id: &UserId,
        cmd: &Cmd,
    ) -> Result<Line, StoreError> {
        let mut line = Line::new_openai(screen_id.clone(), user_id.clone(), cmd.line_id.clone());
        self.insert_line(&mut line, Some(cmd))?;
        Ok(line)
    }

    pub fn get_line_by_id(
        &self,
        screen_id: &ScreenId,
        line_id: &LineId,
    ) -> Result<Option<Line>, StoreError> {
        self.db().with_tx(|tx| tx_get_line(tx, screen_id, line_id))
    }

    pub fn get_line_cmd_by_line_id(
        &self,
        screen_id: &ScreenId,
        line_id: &LineId,
    ) -> Result<Option<(Line, Option<Cmd>)>, StoreError> {
        self.db().with_tx(|tx| {
            let Some(line) = tx_get_line(tx, screen_id, line_id)? else {
                return Ok(None);
            };
            let cmd = tx_get_cmd(tx, screen_id, line_id)?;
            Ok(Some((line, cmd)))
        })
    }

    /// Resolve a user-facing line argument: `E` is the last unarchived line,
    /// `EA` the last line outright, a number matches `linenum`, an 8-char
    /// string matches an id prefix, anything else the full id.
    pub fn find_line_id_by_arg(
        &self,
        screen_id: &ScreenId,
        line_arg: &str,
    ) -> Result<Option<LineId>, StoreError> {
        self.db().with_tx(|tx| {
            let line_id = if line_arg == "E" {
                tx.get_string(
                    "SELECT lineid FROM line WHERE screenid = ?1 AND NOT archived
                     ORDER BY linenum DESC LIMIT 1",
                    params![screen_id.as_str()],
                )?
            } else if line_arg == "EA" {
                tx.get_string(
                    "SELECT lineid FROM line WHERE screenid = ?1 ORDER BY linenum DESC LIMIT 1",
                    params![screen_id.as_str()],
                )?
            } else if let Ok(line_num) = line_arg.parse::<i64>() {
                tx.get_string(
                    "SELECT lineid FROM line WHERE screenid = ?1 AND linenum = ?2",
                    params![screen_id.as_str(), line_num],
                )?
            } else if line_arg.len() == 8 {
                tx.get_string(
                    "SELECT lineid FROM line WHERE screenid = ?1 AND substr(lineid, 1, 8) = ?2",
                    params![screen_id.as_str(), line_arg],
                )?
            } else {
                tx.get_string(
                    "SELECT lineid FROM line WHERE screenid = ?1 AND lineid = ?2",
                    params![screen_id.as_str(), line_arg],
                )?
            };
            Ok((!line_id.is_empty()).then(|| LineId::new(line_id)))
        })
    }

    pub fn get_screen_lines_by_id(
        &self,
        screen_id: &ScreenId,
    ) -> Result<Option<ScreenLines>, StoreError> {
        self.db().with_tx(|tx| {
            if !tx.exists(
                "SELECT screenid FROM screen WHERE screenid = ?1",
                params![screen_id.as_str()],
            )? {
                return Ok(None);
            }
            let mut screen_lines = ScreenLines {
                screen_id: screen_id.clone(),
                lines: Vec::new(),
                cmds: Vec::new(),
            };
            {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {LINE_COLS} FROM line WHERE screenid = ?1 ORDER BY linenum"
                ))?;
                let rows = stmt.query_map(params![screen_id.as_str()], map_line_row)?;
                for row in rows {
                    screen_lines.lines.push(row?);
                }
            }
            {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {CMD_COLS} FROM cmd WHERE screenid = ?1"
                ))?;
                let rows = stmt.query_map(params![screen_id.as_str()], map_cmd_row)?;
                for row in rows {
                    screen_lines.cmds.push(row?);
                }
            }
            Ok(Some(screen_lines))
        })
    }

    /// Delete lines and their cmd rows. Lines whose command is still running
    /// are refused (the whole batch rolls back); history rows keep their
    /// text but lose the line reference.
    pub fn delete_lines_by_ids(
        &self,
        screen_id: &ScreenId,
        line_ids: &[LineId],
    ) -> Result<UpdatePacket, StoreError> {
        self.db().with_tx(|tx| {
            let is_web_share = crate::update_log::tx_is_web_share(tx, screen_id)?;
            for line_id in line_ids {
                let status = tx.get_string(
                    "SELECT status FROM cmd WHERE screenid = ?1 AND lineid = ?2",
                    params![screen_id.as_str(), line_id.as_str()],
                )?;
                if status == CmdStatus::Running.as_str() {
                    return Err(StoreError::CmdRunning(line_id.as_str().to_owned()));
                }
                tx.exec(
                    "DELETE FROM line WHERE screenid = ?1 AND lineid = ?2",
                    params![screen_id.as_str(), line_id.as_str()],
                )?;
                tx.exec(
                    "DELETE FROM cmd WHERE screenid = ?1 AND lineid = ?2",
                    params![screen_id.as_str(), line_id.as_str()],
                )?;
                // history keeps the command text, only the line ref is cleared
                tx.exec(
                    "UPDATE history SET lineid = '', linenum = 0 WHERE screenid = ?1 AND lineid = ?2",
                    params![screen_id.as_str(), line_id.as_str()],
                )?;
                if is_web_share {
                    crate::update_log::tx_insert_screen_line_update(
                        tx,
                        screen_id,
                        line_id,
                        ScreenUpdateKind::LineDel,
                    )?;
                }
            }
            Ok(())
        })?;
        self.notify_update_writer();

        let mut update = UpdatePacket::new();
        for line_id in line_ids {
            update.add_update(UpdateRecord::Line(Line::removal(
                screen_id.clone(),
                line_id.clone(),
            )));
        }
        Ok(update)
    }

    /// Archive every line that is not running.
    pub fn archive_screen_lines(&self, screen_id: &ScreenId) -> Result<UpdatePacket, StoreError> {
        self.db().with_tx(|tx| {
            if !tx.exists(
                "SELECT screenid FROM screen WHERE screenid = ?1",
                params![screen_id.as_str()],
            )? {
                return Err(StoreError::validation("screen does not exist"));
            }
            tx.exec(
                "UPDATE line SET archived = 1
                 WHERE line.archived = 0 AND line.screenid = ?1 AND NOT EXISTS
                     (SELECT 1 FROM cmd c WHERE line.screenid = c.screenid
                        AND line.lineid = c.lineid AND c.status IN ('running', 'detached'))",
                params![screen_id.as_str()],
            )?;
            Ok(())
        })?;
        let screen_lines = self
            .get_screen_lines_by_id(screen_id)?
            .ok_or_else(|| StoreError::validation("screen does not exist"))?;
        let mut update = UpdatePacket::new();
        update.add_update(UpdateRecord::ScreenLines(screen_lines));
        Ok(update)
    }

    /// Delete every non-running line of a screen; orphaned cmd rows and
    /// their pty files are cleaned up in the background.
    pub fn delete_screen_lines(&self, screen_id: &ScreenId) -> Result<UpdatePacket, StoreError> {
        let line_ids = self.db().with_tx(|tx| {
            let line_ids = tx.select_strings(
                "SELECT lineid FROM line
                 WHERE screenid = ?1 AND NOT EXISTS
                     (SELECT 1 FROM cmd c WHERE c.screenid = ?1 AND c.lineid = line.lineid
                        AND c.status IN ('running', 'detached'))",
                params![screen_id.as_str()],
            )?;
            let encoded = quick_json_arr(&line_ids)?;
            tx.exec(
                "DELETE FROM line WHERE screenid = ?1
                   AND lineid IN (SELECT value FROM json_each(?2))",
                params![screen_id.as_str(), encoded],
            )?;
            tx.exec(
                "UPDATE history SET lineid = '', linenum = 0 WHERE screenid = ?1
                   AND lineid IN (SELECT value FROM json_each(?2))",
                params![screen_id.as_str(), encoded],
            )?;
            Ok(line_ids)
        })?;

        {
            let core = self.clone();
            let screen_id = screen_id.clone();
            std::thread::spawn(move || {
                if let Err(err) = core.clean_screen_cmds(&screen_id) {
                    tracing::warn!(screen_id = %screen_id, error = %err, "error cleaning screen cmds");
                }
            });
        }

        let screen = self.get_screen_by_id(screen_id)?;
        let mut screen_lines = self
            .get_screen_lines_by_id(screen_id)?
            .unwrap_or_else(|| ScreenLines {
                screen_id: screen_id.clone(),
                lines: Vec::new(),
                cmds: Vec::new(),
            });
        for line_id in line_ids {
            screen_lines
                .lines
                .push(Line::removal(screen_id.clone(), LineId::new(line_id)));
        }
        let mut update = UpdatePacket::new();
        if let Some(screen) = screen {
            update.add_update(UpdateRecord::Screen(screen));
        }
        update.add_update(UpdateRecord::ScreenLines(screen_lines));
        Ok(update)
    }

    /// Remove cmd rows with no backing line (the screen itself may already
    /// be gone) and their pty files.
    pub fn clean_screen_cmds(&self, screen_id: &ScreenId) -> Result<(), StoreError> {
        let removed = self.db().with_tx(|tx| {
            let removed = tx.select_strings(
                "SELECT lineid FROM cmd WHERE screenid = ?1
                   AND lineid NOT IN (SELECT lineid FROM line WHERE screenid = ?1)",
                params![screen_id.as_str()],
            )?;
            tx.exec(
                "DELETE FROM cmd WHERE screenid = ?1
                   AND lineid NOT IN (SELECT lineid FROM line WHERE screenid = ?1)",
                params![screen_id.as_str()],
            )?;
            Ok(removed)
        })?;
        for line_id in removed {
            if let Err(err) = self
                .pty_files()
                .delete_pty_out_file(screen_id, &LineId::new(line_id.clone()))
            {
                tracing::warn!(
                    screen_id = %screen_id,
                    line_id = %line_id,
                    error = %err,
                    "error deleting pty file"
                );
            }
        }
        Ok(())
    }

    pub fn update_line_star(
        &self,
        screen_id: &ScreenId,
        line_id: &LineId,
        star: bool,
    ) -> Result<(), StoreError> {
        self.db().with_tx(|tx| {
            tx.exec(
                "UPDATE line SET star = ?1 WHERE screenid = ?2 AND lineid = ?3",
                params![star as i64, screen_id.as_str(), line_id.as_str()],
            )?;
            Ok(())
        })
    }

    pub fn update_line_height(
        &self,
        screen_id: &ScreenId,
        line_id: &LineId,
        height: i64,
    ) -> Result<(), StoreError> {
        self.db().with_tx(|tx| {
            tx.exec(
                "UPDATE line SET contentheight = ?1 WHERE screenid = ?2 AND lineid = ?3",
                params![height, screen_id.as_str(), line_id.as_str()],
            )?;
            if crate::update_log::tx_is_web_share(tx, screen_id)? {
                crate::update_log::tx_insert_screen_line_update(
                    tx,
                    screen_id,
                    line_id,
                    ScreenUpdateKind::LineContentHeight,
                )?;
            }
            Ok(())
        })?;
        self.notify_update_writer();
        Ok(())
    }

    pub fn update_line_renderer(
        &self,
        screen_id: &ScreenId,
        line_id: &LineId,
        renderer: &str,
    ) -> Result<(), StoreError> {
        self.db().with_tx(|tx| {
            tx.exec(
                "UPDATE line SET renderer = ?1 WHERE screenid = ?2 AND lineid = ?3",
                params![renderer, screen_id.as_str(), line_id.as_str()],
            )?;
            if crate::update_log::tx_is_web_share(tx, screen_id)? {
                crate::update_log::tx_insert_screen_line_update(
                    tx,
                    screen_id,
                    line_id,
                    ScreenUpdateKind::LineRenderer,
                )?;
            }
            Ok(())
        })?;
        self.notify_update_writer();
        Ok(())
    }

    pub fn update_line_state(
        &self,
        screen_id: &ScreenId,
        line_id: &LineId,
        line_state: &LineState,
    ) -> Result<(), StoreError> {
        let encoded = quick_json(line_state)?;
        if encoded.len() > MAX_LINE_STATE_SIZE {
            return Err(StoreError::validation(format!(
                "linestate for line[{}:{}] exceeds maxsize, size[{}] max[{}]",
                screen_id.as_str(),
                line_id.as_str(),
                encoded.len(),
                MAX_LINE_STATE_SIZE
            )));
        }
        self.db().with_tx(|tx| {
            tx.exec(
                "UPDATE line SET linestate = ?1 WHERE screenid = ?2 AND lineid = ?3",
                params![encoded, screen_id.as_str(), line_id.as_str()],
            )?;
            if crate::update_log::tx_is_web_share(tx, screen_id)? {
                crate::update_log::tx_insert_screen_line_update(
                    tx,
                    screen_id,
                    line_id,
                    ScreenUpdateKind::LineState,
                )?;
            }
            Ok(())
        })?;
        self.notify_update_writer();
        Ok(())
    }

    /// Archiving is the web-share visibility toggle: archived lines read as
    /// deleted to watchers, unarchiving replays them.
    pub fn set_line_archived(
        &self,
        screen_id: &ScreenId,
        line_id: &LineId,
        archived: bool,
    ) -> Result<(), StoreError> {
        self.db().with_tx(|tx| {
            tx.exec(
                "UPDATE line SET archived = ?1 WHERE screenid = ?2 AND lineid = ?3",
                params![archived as i64, screen_id.as_str(), line_id.as_str()],
            )?;
            if crate::update_log::tx_is_web_share(tx, screen_id)? {
                let kind = if archived {
                    ScreenUpdateKind::LineDel
                } else {
                    ScreenUpdateKind::LineNew
                };
                crate::update_log::tx_insert_screen_line_update(tx, screen_id, line_id, kind)?;
            }
            Ok(())
        })?;
        self.notify_update_writer();
        Ok(())
    }

    // -- cmd lifecycle -----------------------------------------------------

    pub fn get_cmd_by_screen_id(
        &self,
        screen_id: &ScreenId,
        line_id: &LineId,
    ) -> Result<Option<Cmd>, StoreError> {
        self.db().with_tx(|tx| tx_get_cmd(tx, screen_id, line_id))
    }

    pub fn get_running_screen_cmds(&self, screen_id: &ScreenId) -> Result<Vec<Cmd>, StoreError> {
        self.db().with_tx(|tx| {
            let mut stmt = tx.prepare(&format!(
                "SELECT {CMD_COLS} FROM cmd WHERE screenid = ?1 AND status = 'running'"
            ))?;
            let rows = stmt.query_map(params![screen_id.as_str()], map_cmd_row)?;
            let mut cmds = Vec::new();
            for row in rows {
                cmds.push(row?);
            }
            Ok(cmds)
        })
    }

    /// Record a finished command: status, done-ts, exit code, duration; the
    /// screen's indicator and running counter move with it.
    pub fn update_cmd_done_info(
        &self,
        update: &mut UpdatePacket,
        screen_id: &ScreenId,
        line_id: &LineId,
        done: &CmdDoneInfo,
        status: CmdStatus,
    ) -> Result<(), StoreError> {
        if screen_id.is_empty() || line_id.is_empty() {
            return Err(StoreError::validation(
                "cannot update cmd done info, empty command key",
            ));
        }
        let cmd = self.db().with_tx(|tx| {
            tx.exec(
                "UPDATE cmd SET status = ?1, donets = ?2, exitcode = ?3, durationms = ?4
                 WHERE screenid = ?5 AND lineid = ?6",
                params![
                    status.as_str(),
                    done.ts,
                    done.exit_code,
                    done.duration_ms,
                    screen_id.as_str(),
                    line_id.as_str()
                ],
            )?;
            tx.exec(
                "UPDATE history SET status = ?1, exitcode = ?2, durationms = ?3
                 WHERE screenid = ?4 AND lineid = ?5",
                params![
                    status.as_str(),
                    done.exit_code,
                    done.duration_ms,
                    screen_id.as_str(),
                    line_id.as_str()
                ],
            )?;
            let cmd = tx_get_cmd(tx, screen_id, line_id)?;
            if crate::update_log::tx_is_web_share(tx, screen_id)? {
                for kind in [
                    ScreenUpdateKind::CmdExitCode,
                    ScreenUpdateKind::CmdDurationMs,
                    ScreenUpdateKind::CmdStatus,
                ] {
                    crate::update_log::tx_insert_screen_line_update(tx, screen_id, line_id, kind)?;
                }
            }
            Ok(cmd)
        })?;
        self.notify_update_writer();

        let cmd = cmd.ok_or_else(|| {
            StoreError::validation(format!(
                "cmd data not found for [{}:{}]",
                screen_id.as_str(),
                line_id.as_str()
            ))
        })?;
        let exit_code = cmd.exit_code;
        update.add_update(UpdateRecord::Cmd(cmd));

        let indicator = if exit_code == 0 {
            StatusIndicatorLevel::Success
        } else {
            StatusIndicatorLevel::Error
        };
        if let Err(err) = self.set_status_indicator_level_update(update, screen_id, indicator, false)
        {
            tracing::warn!(error = %err, "error setting status indicator after done packet");
        }
        self.increment_num_running_cmds_update(update, screen_id, -1);
        Ok(())
    }

    /// Restart transition: detached/done/error back to running with a fresh
    /// restart timestamp and zeroed exit info.
    pub fn update_cmd_for_restart(
        &self,
        screen_id: &ScreenId,
        line_id: &LineId,
        ts: i64,
        cmd_pid: i64,
        remote_pid: i64,
        term_opts: &TermOpts,
    ) -> Result<(), StoreError> {
        let encoded = quick_json(term_opts)?;
        self.db().with_tx(|tx| {
            tx.exec(
                "UPDATE cmd SET restartts = ?1, status = 'running', exitcode = 0, cmdpid = ?2,
                        remotepid = ?3, durationms = 0, termopts = ?4, origtermopts = ?4
                 WHERE screenid = ?5 AND lineid = ?6",
                params![
                    ts,
                    cmd_pid,
                    remote_pid,
                    encoded,
                    screen_id.as_str(),
                    line_id.as_str()
                ],
            )?;
            tx.exec(
                "UPDATE history SET ts = ?1, status = 'running', exitcode = 0, durationms = 0
                 WHERE screenid = ?2 AND lineid = ?3",
                params![ts, screen_id.as_str(), line_id.as_str()],
            )?;
            Ok(())
        })
    }

    pub fn update_cmd_rtn_state(
        &self,
        screen_id: &ScreenId,
        line_id: &LineId,
        state_ptr: &ShellStatePtr,
    ) -> Result<(), StoreError> {
        if screen_id.is_empty() || line_id.is_empty() {
            return Err(StoreError::validation(
                "cannot update cmd rtn state, empty command key",
            ));
        }
        let encoded = quick_json_arr(&state_ptr.diff_hash_arr)?;
        self.db().with_tx(|tx| {
            tx.exec(
                "UPDATE cmd SET rtnbasehash = ?1, rtndiffhasharr = ?2
                 WHERE screenid = ?3 AND lineid = ?4",
                params![
                    state_ptr.base_hash,
                    encoded,
                    screen_id.as_str(),
                    line_id.as_str()
                ],
            )?;
            if crate::update_log::tx_is_web_share(tx, screen_id)? {
                crate::update_log::tx_insert_screen_line_update(
                    tx,
                    screen_id,
                    line_id,
                    ScreenUpdateKind::CmdRtnState,
                )?;
            }
            Ok(())
        })?;
        self.notify_update_writer();
        Ok(())
    }

    pub fn update_cmd_term_opts(
        &self,
        screen_id: &ScreenId,
        line_id: &LineId,
        term_opts: &TermOpts,
    ) -> Result<(), StoreError> {
        let encoded = quick_json(term_opts)?;
        self.db().with_tx(|tx| {
            tx.exec(
                "UPDATE cmd SET termopts = ?1 WHERE screenid = ?2 AND lineid = ?3",
                params![encoded, screen_id.as_str(), line_id.as_str()],
            )?;
            if crate::update_log::tx_is_web_share(tx, screen_id)? {
                crate::update_log::tx_insert_screen_line_update(
                    tx,
                    screen_id,
                    line_id,
                    ScreenUpdateKind::CmdTermOpts,
                )?;
            }
            Ok(())
        })?;
        self.notify_update_writer();
        Ok(())
    }

    /// Startup recovery: commands still marked running belong to a previous
    /// process and get a hangup status.
    pub fn hangup_all_running_cmds(&self) -> Result<(), StoreError> {
        self.db().with_tx(|tx| {
            let cmd_ptrs = {
                let mut stmt = tx.prepare(
                    "SELECT screenid, lineid FROM cmd WHERE status = 'running'",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
                let mut ptrs = Vec::new();
                for row in rows {
                    ptrs.push(row?);
                }
                ptrs
            };
            tx.exec("UPDATE cmd SET status = 'hangup' WHERE status = 'running'", [])?;
            for (screen_id, line_id) in cmd_ptrs {
                let screen_id = ScreenId::new(screen_id);
                let line_id = LineId::new(line_id);
                if crate::update_log::tx_is_web_share(tx, &screen_id)? {
                    crate::update_log::tx_insert_screen_line_update(
                        tx,
                        &screen_id,
                        &line_id,
                        ScreenUpdateKind::CmdStatus,
                    )?;
                }
                tx.exec(
                    "UPDATE history SET status = 'hangup' WHERE screenid = ?1 AND lineid = ?2",
                    params![screen_id.as_str(), line_id.as_str()],
                )?;
            }
            Ok(())
        })?;
        self.notify_update_writer();
        Ok(())
    }

    pub fn hangup_cmd(
        &self,
        screen_id: &ScreenId,
        line_id: &LineId,
    ) -> Result<Option<Screen>, StoreError> {
        self.db().with_tx(|tx| {
            tx.exec(
                "UPDATE cmd SET status = 'hangup' WHERE screenid = ?1 AND lineid = ?2",
                params![screen_id.as_str(), line_id.as_str()],
            )?;
            tx.exec(
                "UPDATE history SET status = 'hangup' WHERE screenid = ?1 AND lineid = ?2",
                params![screen_id.as_str(), line_id.as_str()],
            )?;
            if crate::update_log::tx_is_web_share(tx, screen_id)? {
                crate::update_log::tx_insert_screen_line_update(
                    tx,
                    screen_id,
                    line_id,
                    ScreenUpdateKind::CmdStatus,
                )?;
            }
            Ok(())
        })?;
        self.notify_update_writer();
        self.update_screen_focus_for_done_cmd(screen_id, line_id.as_str())
    }

    /// Hang up every running command on one remote (its connection dropped).
    /// Returns the affected screens after focus fixup.
    pub fn hangup_running_cmds_by_remote_id(
        &self,
        remote_id: &RemoteId,
    ) -> Result<Vec<Screen>, StoreError> {
        let cmd_ptrs = self.db().with_tx(|tx| {
            let cmd_ptrs = {
                let mut stmt = tx.prepare(
                    "SELECT screenid, lineid FROM cmd WHERE status = 'running' AND remoteid = ?1",
                )?;
                let rows = stmt.query_map(params![remote_id.as_str()], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
                let mut ptrs = Vec::new();
                for row in rows {
                    ptrs.push(row?);
                }
                ptrs
            };
            tx.exec(
                "UPDATE cmd SET status = 'hangup' WHERE status = 'running' AND remoteid = ?1",
                params![remote_id.as_str()],
            )?;
            for (screen_id, line_id) in &cmd_ptrs {
                let screen_id = ScreenId::new(screen_id.clone());
                if crate::update_log::tx_is_web_share(tx, &screen_id)? {
                    crate::update_log::tx_insert_screen_line_update(
                        tx,
                        &screen_id,
                        &LineId::new(line_id.clone()),
                        ScreenUpdateKind::CmdStatus,
                    )?;
                }
                tx.exec(
                    "UPDATE history SET status = 'hangup' WHERE screenid = ?1 AND lineid = ?2",
                    params![screen_id.as_str(), line_id],
                )?;
            }
            Ok(cmd_ptrs)
        })?;
        self.notify_update_writer();

        let mut screens = Vec::new();
        for (screen_id, line_id) in cmd_ptrs {
            let screen_id = ScreenId::new(screen_id);
            if let Some(screen) = self.update_screen_focus_for_done_cmd(&screen_id, &line_id)? {
                screens.push(screen);
            }
        }
        Ok(screens)
    }
}
