use rusqlite::params;
use termbench_model::{
    apply_shell_state_diff, now_ms, FeState, RemoteInstance, RemoteInstanceId, RemotePtr, ScreenId,
    SessionId, ShellState, ShellStateDiff, ShellStatePtr,
};

use crate::db::{quick_json, quick_json_arr, Tx};
use crate::error::StoreError;
use crate::lifecycle::Core;
use crate::remote::tx_get_remote_instance;

fn tx_state_base_exists(tx: &Tx<'_>, base_hash: &str) -> Result<bool, StoreError> {
    tx.exists(
        "SELECT basehash FROM state_base WHERE basehash = ?1",
        params![base_hash],
    )
}

fn tx_state_diff_exists(tx: &Tx<'_>, diff_hash: &str) -> Result<bool, StoreError> {
    tx.exists(
        "SELECT diffhash FROM state_diff WHERE diffhash = ?1",
        params![diff_hash],
    )
}

fn tx_get_state_base_data(tx: &Tx<'_>, base_hash: &str) -> Result<Option<Vec<u8>>, StoreError> {
    use rusqlite::OptionalExtension;
    let data = tx
        .query_row(
            "SELECT data FROM state_base WHERE basehash = ?1",
            params![base_hash],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()?;
    Ok(data)
}

fn tx_get_state_diff_data(tx: &Tx<'_>, diff_hash: &str) -> Result<Option<Vec<u8>>, StoreError> {
    use rusqlite::OptionalExtension;
    let data = tx
        .query_row(
            "SELECT data FROM state_diff WHERE diffhash = ?1",
            params![diff_hash],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()?;
    Ok(data)
}

impl Core {
    /// Store a captured state under its content hash. Idempotent: an
    /// existing base is left untouched. Returns the base hash.
    pub fn store_state_base(&self, state: &ShellState) -> Result<String, StoreError> {
        let (base_hash, data) = state.encode_and_hash();
        let version = state.version.clone();
        self.db().with_tx(|tx| {
            if tx_state_base_exists(tx, &base_hash)? {
                return Ok(());
            }
            tx.exec(
                "INSERT INTO state_base (basehash, ts, version, data) VALUES (?1, ?2, ?3, ?4)",
                params![base_hash, now_ms(), version, data],
            )?;
            Ok(())
        })?;
        Ok(base_hash)
    }

    /// Store a diff under its content hash. The base and every predecessor
    /// diff must already exist. Returns the diff hash.
    pub fn store_state_diff(&self, diff: &ShellStateDiff) -> Result<String, StoreError> {
        let (diff_hash, data) = diff.encode_and_hash();
        self.db().with_tx(|tx| {
            if diff.base_hash.is_empty() || !tx_state_base_exists(tx, &diff.base_hash)? {
                return Err(StoreError::validation(format!(
                    "cannot store statediff, basehash:{} does not exist",
                    diff.base_hash
                )));
            }
            for (idx, pred_hash) in diff.diff_hash_arr.iter().enumerate() {
                if !tx_state_diff_exists(tx, pred_hash)? {
                    return Err(StoreError::validation(format!(
                        "cannot store statediff, diffhash[{idx}]:{pred_hash} does not exist"
                    )));
                }
            }
            if tx_state_diff_exists(tx, &diff_hash)? {
                return Ok(());
            }
            tx.exec(
                "INSERT INTO state_diff (diffhash, ts, basehash, diffhasharr, data)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    diff_hash,
                    now_ms(),
                    diff.base_hash,
                    quick_json_arr(&diff.diff_hash_arr)?,
                    data
                ],
            )?;
            Ok(())
        })?;
        Ok(diff_hash)
    }

    pub fn get_state_base(&self, base_hash: &str) -> Result<ShellState, StoreError> {
        let data = self
            .db()
            .with_tx(|tx| tx_get_state_base_data(tx, base_hash))?
            .ok_or_else(|| StoreError::Corruption(format!("state base {base_hash} not found")))?;
        Ok(ShellState::decode(&data)?)
    }

    pub fn get_state_diff(&self, diff_hash: &str) -> Result<ShellStateDiff, StoreError> {
        let data = self
            .db()
            .with_tx(|tx| tx_get_state_diff_data(tx, diff_hash))?
            .ok_or_else(|| StoreError::Corruption(format!("state diff {diff_hash} not found")))?;
        Ok(ShellStateDiff::decode(&data)?)
    }

    pub fn get_state_base_version(&self, base_hash: &str) -> Result<String, StoreError> {
        self.db().with_tx(|tx| {
            tx.get_string(
                "SELECT version FROM state_base WHERE basehash = ?1",
                params![base_hash],
            )
        })
    }

    /// Resolve a state pointer: load the base, then fold the diff chain in
    /// order. A missing base or diff is a corruption error naming the hash.
    pub fn get_full_state(&self, ptr: &ShellStatePtr) -> Result<ShellState, StoreError> {
        if ptr.base_hash.is_empty() {
            return Err(StoreError::validation("invalid empty basehash"));
        }
        self.db().with_tx(|tx| {
            let base_data = tx_get_state_base_data(tx, &ptr.base_hash)?.ok_or_else(|| {
                StoreError::Corruption(format!("shell state {} not found", ptr.base_hash))
            })?;
            let mut state = ShellState::decode(&base_data)?;
            for (idx, diff_hash) in ptr.diff_hash_arr.iter().enumerate() {
                let diff_data = tx_get_state_diff_data(tx, diff_hash)?.ok_or_else(|| {
                    StoreError::Corruption(format!(
                        "shell state diff[{idx}]:{diff_hash} not found"
                    ))
                })?;
                let diff = ShellStateDiff::decode(&diff_data)?;
                state = apply_shell_state_diff(&state, &diff);
            }
            Ok(state)
        })
    }

    /// The final diff of a pointer's chain; an empty chain yields an empty
    /// diff carrying the base version.
    pub fn get_cur_state_diff_from_ptr(
        &self,
        ptr: &ShellStatePtr,
    ) -> Result<ShellStateDiff, StoreError> {
        if ptr.is_empty() {
            return Err(StoreError::validation("cannot resolve state, empty stateptr"));
        }
        let Some(last_diff_hash) = ptr.diff_hash_arr.last() else {
            let version = self.get_state_base_version(&ptr.base_hash)?;
            return Ok(ShellStateDiff {
                version,
                base_hash: ptr.base_hash.clone(),
                ..ShellStateDiff::default()
            });
        };
        self.get_state_diff(last_diff_hash)
    }

    /// Record a connection's new environment for a (session, screen, remote)
    /// triple. Exactly one of `state_base`/`state_diff` must be given; the
    /// capture is stored content-addressed and the instance row upserted
    /// with the new pointer and fe-state.
    pub fn update_remote_state(
        &self,
        session_id: &SessionId,
        screen_id: &ScreenId,
        remote_ptr: &RemotePtr,
        fe_state: FeState,
        state_base: Option<&ShellState>,
        state_diff: Option<&ShellStateDiff>,
    ) -> Result<RemoteInstance, StoreError> {
        if state_base.is_none() && state_diff.is_none() {
            return Err(StoreError::validation(
                "update remote state, must set state or diff",
            ));
        }
        if state_base.is_some() && state_diff.is_some() {
            return Err(StoreError::validation(
                "update remote state, cannot set state and diff",
            ));
        }
        let screen_id = if remote_ptr.is_session_scope() {
            ScreenId::default()
        } else {
            screen_id.clone()
        };

        // resolve the new pointer (storing the capture) before touching the
        // instance row
        let (state_ptr, shell_type) = if let Some(state) = state_base {
            let base_hash = self.store_state_base(state)?;
            (ShellStatePtr::new(base_hash), state.shell_type().to_owned())
        } else {
            let diff = state_diff.expect("checked above");
            let diff_hash = self.store_state_diff(diff)?;
            let mut diff_hash_arr = diff.diff_hash_arr.clone();
            diff_hash_arr.push(diff_hash);
            (
                ShellStatePtr {
                    base_hash: diff.base_hash.clone(),
                    diff_hash_arr,
                },
                diff.shell_type().to_owned(),
            )
        };

        let fe_state_json = quick_json(&fe_state)?;
        let diff_arr_json = quick_json_arr(&state_ptr.diff_hash_arr)?;
        self.db().with_tx(|tx| {
            tx_validate_session_screen(tx, session_id, &screen_id)?;
            let existing = tx_get_remote_instance(tx, session_id, &screen_id, remote_ptr)?;
            match existing {
                None => {
                    let instance = RemoteInstance {
                        ri_id: RemoteInstanceId::generate(),
                        name: remote_ptr.name.clone(),
                        session_id: session_id.clone(),
                        screen_id: screen_id.clone(),
                        remote_owner_id: remote_ptr.owner_id.clone(),
                        remote_id: remote_ptr.remote_id.clone(),
                        fe_state,
                        shell_type,
                        state_ptr,
                        remove: false,
                    };
                    tx.exec(
                        "INSERT INTO remote_instance (riid, name, sessionid, screenid,
                                                      remoteownerid, remoteid, festate,
                                                      statebasehash, statediffhasharr, shelltype)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                        params![
                            instance.ri_id.as_str(),
                            instance.name,
                            instance.session_id.as_str(),
                            instance.screen_id.as_str(),
                            instance.remote_owner_id,
                            instance.remote_id.as_str(),
                            fe_state_json,
                            instance.state_ptr.base_hash,
                            diff_arr_json,
                            instance.shell_type,
                        ],
                    )?;
                    Ok(instance)
                }
                Some(mut instance) => {
                    instance.fe_state = fe_state;
                    instance.state_ptr = state_ptr;
                    instance.shell_type = shell_type;
                    tx.exec(
                        "UPDATE remote_instance
                         SET festate = ?1, statebasehash = ?2, statediffhasharr = ?3, shelltype = ?4
                         WHERE riid = ?5",
                        params![
                            fe_state_json,
                            instance.state_ptr.base_hash,
                            diff_arr_json,
                            instance.shell_type,
                            instance.ri_id.as_str(),
                        ],
                    )?;
                    Ok(instance)
                }
            }
        })
    }

    /// State pointer of a connection's instance, when one exists.
    pub fn get_remote_state_ptr(
        &self,
        session_id: &SessionId,
        screen_id: &ScreenId,
        remote_ptr: &RemotePtr,
    ) -> Result<Option<ShellStatePtr>, StoreError> {
        let instance = self.get_remote_instance(session_id, screen_id, remote_ptr)?;
        Ok(instance.map(|ri| ri.state_ptr))
    }

    /// Full state plus pointer for a connection, resolving the chain.
    pub fn get_remote_state(
        &self,
        session_id: &SessionId,
        screen_id: &ScreenId,
        remote_ptr: &RemotePtr,
    ) -> Result<Option<(ShellState, ShellStatePtr)>, StoreError> {
        let Some(ptr) = self.get_remote_state_ptr(session_id, screen_id, remote_ptr)? else {
            return Ok(None);
        };
        let state = self.get_full_state(&ptr)?;
        Ok(Some((state, ptr)))
    }
}

fn tx_validate_session_screen(
    tx: &Tx<'_>,
    session_id: &SessionId,
    screen_id: &ScreenId,
) -> Result<(), StoreError> {
    if screen_id.is_empty() {
        if !tx.exists(
            "SELECT sessionid FROM session WHERE sessionid = ?1",
            params![session_id.as_str()],
        )? {
            return Err(StoreError::validation("no session found"));
        }
    } else if !tx.exists(
        "SELECT screenid FROM screen WHERE sessionid = ?1 AND screenid = ?2",
        params![session_id.as_str(), screen_id.as_str()],
    )? {
        return Err(StoreError::validation("no screen found"));
    }
    Ok(())
}
