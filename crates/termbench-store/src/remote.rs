use rusqlite::params;
use termbench_model::{
    new_uuid, now_ms, ConnectMode, OpenAiOpts, Remote, RemoteEdit, RemoteId, RemoteInstance,
    RemoteInstanceId, RemoteKind, RemoteOpts, RemotePtr, ScreenId, SessionId, ShellStatePtr,
    ShellTypePref, SshConfigSrc, SshOpts, LOCAL_REMOTE_ALIAS, SUDO_REMOTE_ALIAS,
};

use crate::db::{
    quick_json, quick_nullable_json, quick_set_json, quick_set_json_arr, quick_set_nullable_json,
    Tx,
};
use crate::error::StoreError;
use crate::lifecycle::Core;

const REMOTE_COLS: &str = "remoteid, remotetype, remotealias, remotecanonicalname, remoteuser, \
     remotehost, connectmode, autoinstall, sshopts, remoteopts, lastconnectts, archived, \
     remoteidx, local, statevars, sshconfigsrc, openaiopts, shellpref";

pub(crate) fn map_remote_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Remote> {
    let remote_type: String = row.get(1)?;
    let connect_mode: String = row.get(6)?;
    let ssh_opts: String = row.get(8)?;
    let remote_opts: String = row.get(9)?;
    let state_vars: String = row.get(14)?;
    let ssh_config_src: String = row.get(15)?;
    let openai_opts: String = row.get(16)?;
    let shell_pref: String = row.get(17)?;
    Ok(Remote {
        remote_id: RemoteId::new(row.get::<_, String>(0)?),
        remote_type: RemoteKind::parse(&remote_type).unwrap_or_default(),
        remote_alias: row.get(2)?,
        remote_canonical_name: row.get(3)?,
        remote_user: row.get(4)?,
        remote_host: row.get(5)?,
        connect_mode: ConnectMode::parse(&connect_mode).unwrap_or_default(),
        auto_install: row.get::<_, i64>(7)? != 0,
        ssh_opts: quick_set_nullable_json::<SshOpts>(&ssh_opts).map_err(store_to_sql_error)?,
        remote_opts: quick_set_nullable_json::<RemoteOpts>(&remote_opts)
            .map_err(store_to_sql_error)?,
        last_connect_ts: row.get(10)?,
        archived: row.get::<_, i64>(11)? != 0,
        remote_idx: row.get(12)?,
        local: row.get::<_, i64>(13)? != 0,
        state_vars: quick_set_json(&state_vars).map_err(store_to_sql_error)?,
        ssh_config_src: SshConfigSrc::parse(&ssh_config_src).unwrap_or_default(),
        openai_opts: quick_set_nullable_json::<OpenAiOpts>(&openai_opts)
            .map_err(store_to_sql_error)?,
        shell_pref: ShellTypePref::parse(&shell_pref).unwrap_or_default(),
    })
}

const REMOTE_INSTANCE_COLS: &str = "riid, name, sessionid, screenid, remoteownerid, remoteid, \
     festate, statebasehash, statediffhasharr, shelltype";

pub(crate) fn map_remote_instance_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RemoteInstance> {
    let fe_state: String = row.get(6)?;
    let diff_hash_arr: String = row.get(8)?;
    Ok(RemoteInstance {
        ri_id: RemoteInstanceId::new(row.get::<_, String>(0)?),
        name: row.get(1)?,
        session_id: SessionId::new(row.get::<_, String>(2)?),
        screen_id: ScreenId::new(row.get::<_, String>(3)?),
        remote_owner_id: row.get(4)?,
        remote_id: RemoteId::new(row.get::<_, String>(5)?),
        fe_state: quick_set_json(&fe_state).map_err(store_to_sql_error)?,
        state_ptr: ShellStatePtr {
            base_hash: row.get(7)?,
            diff_hash_arr: quick_set_json_arr(&diff_hash_arr).map_err(store_to_sql_error)?,
        },
        shell_type: row.get(9)?,
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

pub(crate) fn tx_get_remote_instance(
    tx: &Tx<'_>,
    session_id: &SessionId,
    screen_id: &ScreenId,
    remote_ptr: &RemotePtr,
) -> Result<Option<RemoteInstance>, StoreError> {
    use rusqlite::OptionalExtension;
    let instance = tx
        .query_row(
            &format!(
                "SELECT {REMOTE_INSTANCE_COLS} FROM remote_instance
                 WHERE sessionid = ?1 AND screenid = ?2 AND remoteownerid = ?3
                   AND remoteid = ?4 AND name = ?5"
            ),
            params![
                session_id.as_str(),
                screen_id.as_str(),
                remote_ptr.owner_id,
                remote_ptr.remote_id.as_str(),
                remote_ptr.name
            ],
            map_remote_instance_row,
        )
        .optional()?;
    Ok(instance)
}

impl Core {
    /// First run: create the `local` remote (and its sudo sibling) for the
    /// current user and host.
    pub fn ensure_local_remote(&self) -> Result<(), StoreError> {
        if self.get_local_remote()?.is_some() {
            return Ok(());
        }
        let host_name = hostname();
        let user_name = username();
        let local = Remote {
            remote_id: RemoteId::new(new_uuid()),
            remote_type: RemoteKind::Ssh,
            remote_alias: LOCAL_REMOTE_ALIAS.to_owned(),
            remote_canonical_name: format!("{user_name}@{host_name}"),
            remote_user: user_name.clone(),
            remote_host: host_name.clone(),
            connect_mode: ConnectMode::Startup,
            auto_install: true,
            ssh_opts: Some(SshOpts {
                local: true,
                ..SshOpts::default()
            }),
            local: true,
            ssh_config_src: SshConfigSrc::Manual,
            shell_pref: ShellTypePref::Detect,
            ..Remote::default()
        };
        self.upsert_remote(&local)?;
        tracing::info!(
            canonical_name = %local.remote_canonical_name,
            remote_id = %local.remote_id,
            "added local remote"
        );
        let sudo = Remote {
            remote_id: RemoteId::new(new_uuid()),
            remote_type: RemoteKind::Ssh,
            remote_alias: SUDO_REMOTE_ALIAS.to_owned(),
            remote_canonical_name: format!("sudo@{user_name}@{host_name}"),
            remote_user: "root".to_owned(),
            remote_host: host_name,
            connect_mode: ConnectMode::Manual,
            auto_install: true,
            ssh_opts: Some(SshOpts {
                local: true,
                is_sudo: true,
                ..SshOpts::default()
            }),
            remote_opts: Some(RemoteOpts {
                color: "red".to_owned(),
            }),
            local: true,
            ssh_config_src: SshConfigSrc::Manual,
            shell_pref: ShellTypePref::Detect,
            ..Remote::default()
        };
        self.upsert_remote(&sudo)?;
        tracing::info!(
            canonical_name = %sudo.remote_canonical_name,
            remote_id = %sudo.remote_id,
            "added sudo remote"
        );
        Ok(())
    }

    pub fn get_all_remotes(&self) -> Result<Vec<Remote>, StoreError> {
        self.db().with_tx(|tx| {
            let mut stmt = tx.prepare(&format!(
                "SELECT {REMOTE_COLS} FROM remote ORDER BY remoteidx"
            ))?;
            let rows = stmt.query_map([], map_remote_row)?;
            let mut remotes = Vec::new();
            for row in rows {
                remotes.push(row?);
            }
            Ok(remotes)
        })
    }

    pub fn get_remote_by_id(&self, remote_id: &RemoteId) -> Result<Option<Remote>, StoreError> {
        use rusqlite::OptionalExtension;
        self.db().with_tx(|tx| {
            let remote = tx
                .query_row(
                    &format!("SELECT {REMOTE_COLS} FROM remote WHERE remoteid = ?1"),
                    params![remote_id.as_str()],
                    map_remote_row,
                )
                .optional()?;
            Ok(remote)
        })
    }

    pub fn get_remote_by_alias(&self, alias: &str) -> Result<Option<Remote>, StoreError> {
        use rusqlite::OptionalExtension;
        self.db().with_tx(|tx| {
            let remote = tx
                .query_row(
                    &format!("SELECT {REMOTE_COLS} FROM remote WHERE remotealias = ?1"),
                    params![alias],
                    map_remote_row,
                )
                .optional()?;
            Ok(remote)
        })
    }

    pub fn get_remote_by_canonical_name(&self, cname: &str) -> Result<Option<Remote>, StoreError> {
        use rusqlite::OptionalExtension;
        self.db().with_tx(|tx| {
            let remote = tx
                .query_row(
                    &format!("SELECT {REMOTE_COLS} FROM remote WHERE remotecanonicalname = ?1"),
                    params![cname],
                    map_remote_row,
                )
                .optional()?;
            Ok(remote)
        })
    }

    /// The non-sudo local remote.
    pub fn get_local_remote(&self) -> Result<Option<Remote>, StoreError> {
        use rusqlite::OptionalExtension;
        self.db().with_tx(|tx| {
            let remote = tx
                .query_row(
                    &format!(
                        "SELECT {REMOTE_COLS} FROM remote WHERE local AND remotealias = ?1"
                    ),
                    params![LOCAL_REMOTE_ALIAS],
                    map_remote_row,
                )
                .optional()?;
            Ok(remote)
        })
    }

    /// Replace-or-insert by id. Aliases and canonical names stay unique
    /// across remotes; the index is allocated at the end of the order.
    pub fn upsert_remote(&self, remote: &Remote) -> Result<(), StoreError> {
        if remote.remote_id.is_empty() {
            return Err(StoreError::validation("cannot insert remote without id"));
        }
        if remote.remote_canonical_name.is_empty() {
            return Err(StoreError::validation(
                "cannot insert remote without canonicalname",
            ));
        }
        let ssh_opts = quick_nullable_json(&remote.ssh_opts)?;
        let remote_opts = quick_nullable_json(&remote.remote_opts)?;
        let openai_opts = quick_nullable_json(&remote.openai_opts)?;
        let state_vars = quick_json(&remote.state_vars)?;
        self.db().with_tx(|tx| {
            if tx.exists(
                "SELECT remoteid FROM remote WHERE remoteid = ?1",
                params![remote.remote_id.as_str()],
            )? {
                tx.exec(
                    "DELETE FROM remote WHERE remoteid = ?1",
                    params![remote.remote_id.as_str()],
                )?;
            }
            if tx.exists(
                "SELECT remoteid FROM remote WHERE remotecanonicalname = ?1",
                params![remote.remote_canonical_name],
            )? {
                return Err(StoreError::validation(format!(
                    "remote has duplicate canonicalname '{}', cannot create",
                    remote.remote_canonical_name
                )));
            }
            if !remote.remote_alias.is_empty()
                && tx.exists(
                    "SELECT remoteid FROM remote WHERE remotealias = ?1",
                    params![remote.remote_alias],
                )?
            {
                return Err(StoreError::validation(format!(
                    "remote has duplicate alias '{}', cannot create",
                    remote.remote_alias
                )));
            }
            let max_idx = tx.get_i64("SELECT COALESCE(max(remoteidx), 0) FROM remote", [])?;
            tx.exec(
                "INSERT INTO remote (remoteid, remotetype, remotealias, remotecanonicalname,
                                     remoteuser, remotehost, connectmode, autoinstall, sshopts,
                                     remoteopts, lastconnectts, archived, remoteidx, local,
                                     statevars, sshconfigsrc, openaiopts, shellpref)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                         ?17, ?18)",
                params![
                    remote.remote_id.as_str(),
                    remote.remote_type.as_str(),
                    remote.remote_alias,
                    remote.remote_canonical_name,
                    remote.remote_user,
                    remote.remote_host,
                    remote.connect_mode.as_str(),
                    remote.auto_install as i64,
                    ssh_opts,
                    remote_opts,
                    remote.last_connect_ts,
                    remote.archived as i64,
                    max_idx + 1,
                    remote.local as i64,
                    state_vars,
                    remote.ssh_config_src.as_str(),
                    openai_opts,
                    remote.shell_pref.as_str(),
                ],
            )?;
            Ok(())
        })
    }

    /// Apply a typed edit set; alias uniqueness is enforced here, other
    /// validation happens at the call site.
    pub fn update_remote(
        &self,
        remote_id: &RemoteId,
        edit: &RemoteEdit,
    ) -> Result<Remote, StoreError> {
        use rusqlite::OptionalExtension;
        self.db().with_tx(|tx| {
            if !tx.exists(
                "SELECT remoteid FROM remote WHERE remoteid = ?1",
                params![remote_id.as_str()],
            )? {
                return Err(StoreError::validation("remote not found"));
            }
            if let Some(alias) = &edit.alias {
                if !alias.is_empty()
                    && tx.exists(
                        "SELECT remoteid FROM remote WHERE remotealias = ?1 AND remoteid <> ?2",
                        params![alias, remote_id.as_str()],
                    )?
                {
                    return Err(StoreError::validation(
                        "remote has duplicate alias, cannot update",
                    ));
                }
                tx.exec(
                    "UPDATE remote SET remotealias = ?1 WHERE remoteid = ?2",
                    params![alias, remote_id.as_str()],
                )?;
            }
            if let Some(mode) = edit.connect_mode {
                tx.exec(
                    "UPDATE remote SET connectmode = ?1 WHERE remoteid = ?2",
                    params![mode.as_str(), remote_id.as_str()],
                )?;
            }
            if let Some(ssh_identity) = &edit.ssh_identity {
                tx.exec(
                    "UPDATE remote SET sshopts = json_set(sshopts, '$.sshidentity', ?1)
                     WHERE remoteid = ?2",
                    params![ssh_identity, remote_id.as_str()],
                )?;
            }
            if let Some(ssh_password) = &edit.ssh_password {
                tx.exec(
                    "UPDATE remote SET sshopts = json_set(sshopts, '$.sshpassword', ?1)
                     WHERE remoteid = ?2",
                    params![ssh_password, remote_id.as_str()],
                )?;
            }
            if let Some(shell_pref) = edit.shell_pref {
                tx.exec(
                    "UPDATE remote SET shellpref = ?1 WHERE remoteid = ?2",
                    params![shell_pref.as_str(), remote_id.as_str()],
                )?;
            }
            if let Some(color) = &edit.color {
                tx.exec(
                    "UPDATE remote SET remoteopts = json_set(remoteopts, '$.color', ?1)
                     WHERE remoteid = ?2",
                    params![color, remote_id.as_str()],
                )?;
            }
            tx.query_row(
                &format!("SELECT {REMOTE_COLS} FROM remote WHERE remoteid = ?1"),
                params![remote_id.as_str()],
                map_remote_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::validation("remote not found"))
        })
    }

    pub fn update_remote_state_vars(
        &self,
        remote_id: &RemoteId,
        state_vars: &std::collections::BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        let encoded = quick_json(state_vars)?;
        self.db().with_tx(|tx| {
            tx.exec(
                "UPDATE remote SET statevars = ?1 WHERE remoteid = ?2",
                params![encoded, remote_id.as_str()],
            )?;
            Ok(())
        })
    }

    pub fn update_remote_last_connect(&self, remote_id: &RemoteId) -> Result<(), StoreError> {
        self.db().with_tx(|tx| {
            tx.exec(
                "UPDATE remote SET lastconnectts = ?1 WHERE remoteid = ?2",
                params![now_ms(), remote_id.as_str()],
            )?;
            Ok(())
        })
    }

    /// Shell types with a live instance on this remote.
    pub fn get_remote_active_shells(&self, remote_id: &RemoteId) -> Result<Vec<String>, StoreError> {
        self.db().with_tx(|tx| {
            let mut shells = tx.select_strings(
                "SELECT DISTINCT shelltype FROM remote_instance
                 WHERE remoteid = ?1 AND shelltype <> ''",
                params![remote_id.as_str()],
            )?;
            shells.sort();
            Ok(shells)
        })
    }

    pub fn get_remote_instance(
        &self,
        session_id: &SessionId,
        screen_id: &ScreenId,
        remote_ptr: &RemotePtr,
    ) -> Result<Option<RemoteInstance>, StoreError> {
        let screen_id = if remote_ptr.is_session_scope() {
            ScreenId::default()
        } else {
            screen_id.clone()
        };
        self.db()
            .with_tx(|tx| tx_get_remote_instance(tx, session_id, &screen_id, remote_ptr))
    }

    /// Instances visible from a screen: its own plus the session-scoped
    /// ones.
    pub fn get_ris_for_screen(
        &self,
        session_id: &SessionId,
        screen_id: &ScreenId,
    ) -> Result<Vec<RemoteInstance>, StoreError> {
        self.db().with_tx(|tx| {
            let mut stmt = tx.prepare(&format!(
                "SELECT {REMOTE_INSTANCE_COLS} FROM remote_instance
                 WHERE sessionid = ?1 AND (screenid = '' OR screenid = ?2)"
            ))?;
            let rows = stmt.query_map(
                params![session_id.as_str(), screen_id.as_str()],
                map_remote_instance_row,
            )?;
            let mut instances = Vec::new();
            for row in rows {
                instances.push(row?);
            }
            Ok(instances)
        })
    }

    pub fn get_all_remote_instances(&self) -> Result<Vec<RemoteInstance>, StoreError> {
        self.db().with_tx(|tx| {
            let mut stmt = tx.prepare(&format!(
                "SELECT {REMOTE_INSTANCE_COLS} FROM remote_instance"
            ))?;
            let rows = stmt.query_map([], map_remote_instance_row)?;
            let mut instances = Vec::new();
            for row in rows {
                instances.push(row?);
            }
            Ok(instances)
        })
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|value| !value.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        })
        .unwrap_or_else(|| "localhost".to_owned())
}

fn username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "user".to_owned())
}
