use rusqlite::params;
use termbench_model::{new_uuid, now_ms, CmdStatus, LineId, RemotePtr, ScreenId, SessionId, UserId};

use crate::db::{quick_json, quick_set_json};
use crate::error::StoreError;
use crate::lifecycle::Core;

/// One executed-command record. History outlives its line: deleting a line
/// only clears the back-reference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryItem {
    pub history_id: String,
    pub ts: i64,
    pub user_id: UserId,
    pub session_id: SessionId,
    pub screen_id: ScreenId,
    pub line_id: LineId,
    pub line_num: i64,
    pub cmd_str: String,
    pub remote: RemotePtr,
    pub is_meta_cmd: bool,
    pub exit_code: i64,
    pub duration_ms: i64,
    pub fe_state: termbench_model::FeState,
    pub status: CmdStatus,
}

impl HistoryItem {
    pub fn new(
        session_id: SessionId,
        screen_id: ScreenId,
        line_id: LineId,
        line_num: i64,
        cmd_str: impl Into<String>,
    ) -> Self {
        Self {
            history_id: new_uuid(),
            ts: now_ms(),
            session_id,
            screen_id,
            line_id,
            line_num,
            cmd_str: cmd_str.into(),
            status: CmdStatus::Running,
            ..Self::default()
        }
    }
}

fn map_history_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<HistoryItem> {
    let fe_state: String = row.get(14)?;
    let status: String = row.get(15)?;
    Ok(HistoryItem {
        history_id: row.get(0)?,
        ts: row.get(1)?,
        user_id: UserId::new(row.get::<_, String>(2)?),
        session_id: SessionId::new(row.get::<_, String>(3)?),
        screen_id: ScreenId::new(row.get::<_, String>(4)?),
        line_id: LineId::new(row.get::<_, String>(5)?),
        line_num: row.get(6)?,
        cmd_str: row.get(7)?,
        remote: RemotePtr {
            owner_id: row.get(8)?,
            remote_id: termbench_model::RemoteId::new(row.get::<_, String>(9)?),
            name: row.get(10)?,
        },
        is_meta_cmd: row.get::<_, i64>(11)? != 0,
        exit_code: row.get(12)?,
        duration_ms: row.get(13)?,
        fe_state: quick_set_json(&fe_state).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::other(err.to_string())),
            )
        })?,
        status: CmdStatus::parse(&status).unwrap_or(CmdStatus::Unknown),
    })
}

const HISTORY_COLS: &str = "historyid, ts, userid, sessionid, screenid, lineid, linenum, cmdstr, \
     remoteownerid, remoteid, remotename, ismetacmd, exitcode, durationms, festate, status";

impl Core {
    pub fn insert_history_item(&self, item: &HistoryItem) -> Result<(), StoreError> {
        let fe_state = quick_json(&item.fe_state)?;
        self.db().with_tx(|tx| {
            tx.exec(
                "INSERT INTO history (historyid, ts, userid, sessionid, screenid, lineid, linenum,
                                      cmdstr, remoteownerid, remoteid, remotename, ismetacmd,
                                      exitcode, durationms, festate, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    item.history_id,
                    item.ts,
                    item.user_id.as_str(),
                    item.session_id.as_str(),
                    item.screen_id.as_str(),
                    item.line_id.as_str(),
                    item.line_num,
                    item.cmd_str,
                    item.remote.owner_id,
                    item.remote.remote_id.as_str(),
                    item.remote.name,
                    item.is_meta_cmd as i64,
                    item.exit_code,
                    item.duration_ms,
                    fe_state,
                    item.status.as_str(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_history_for_screen(
        &self,
        screen_id: &ScreenId,
    ) -> Result<Vec<HistoryItem>, StoreError> {
        self.db().with_tx(|tx| {
            let mut stmt = tx.prepare(&format!(
                "SELECT {HISTORY_COLS} FROM history WHERE screenid = ?1 ORDER BY ts DESC"
            ))?;
            let rows = stmt.query_map(params![screen_id.as_str()], map_history_row)?;
            let mut items = Vec::new();
            for row in rows {
                items.push(row?);
            }
            Ok(items)
        })
    }
}
