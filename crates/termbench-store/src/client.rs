use rand::RngCore;
use rusqlite::params;
use termbench_model::{
    ClientData, ClientId, ClientOpts, ClientWinSize, FeOpts, OpenAiOpts, ReleaseInfo, SessionId,
    UserId,
};

use crate::db::{quick_json, quick_nullable_json, quick_set_json, quick_set_nullable_json, Tx};
use crate::error::StoreError;
use crate::lifecycle::Core;

const KEY_BYTES: usize = 48;

// key generation proper lives with the auth layer; the core only guarantees
// the row carries non-empty, distinct key material
fn generate_keypair_bytes() -> (Vec<u8>, Vec<u8>) {
    let mut rng = rand::rngs::OsRng;
    let mut public = vec![0u8; KEY_BYTES];
    let mut private = vec![0u8; KEY_BYTES];
    rng.fill_bytes(&mut public);
    rng.fill_bytes(&mut private);
    (public, private)
}

fn map_client_row(tx: &Tx<'_>) -> Result<Option<ClientData>, StoreError> {
    use rusqlite::OptionalExtension;
    let row = tx
        .query_row(
            "SELECT clientid, userid, userpublickeybytes, userprivatekeybytes, activesessionid,
                    winsize, clientopts, feopts, cmdstoretype, openaiopts, releaseinfo
             FROM client",
            [],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, String>(9)?,
                    row.get::<_, String>(10)?,
                ))
            },
        )
        .optional()?;
    let Some((
        client_id,
        user_id,
        public_key,
        private_key,
        active_session_id,
        winsize,
        clientopts,
        feopts,
        cmd_store_type,
        openaiopts,
        releaseinfo,
    )) = row
    else {
        return Ok(None);
    };
    Ok(Some(ClientData {
        client_id: ClientId::new(client_id),
        user_id: UserId::new(user_id),
        user_public_key: public_key,
        user_private_key: private_key,
        active_session_id: SessionId::new(active_session_id),
        win_size: quick_set_json::<ClientWinSize>(&winsize)?,
        client_opts: quick_set_json::<ClientOpts>(&clientopts)?,
        fe_opts: quick_set_json::<FeOpts>(&feopts)?,
        cmd_store_type,
        openai_opts: quick_set_nullable_json::<OpenAiOpts>(&openaiopts)?,
        release_info: quick_set_json::<ReleaseInfo>(&releaseinfo)?,
        db_version: 0,
    }))
}

impl Core {
    /// Returns the singleton client row, creating it (with fresh ids and key
    /// material) on first run. More than one row means the database is not
    /// ours.
    pub fn ensure_client_data(&self) -> Result<ClientData, StoreError> {
        let version = self.db().schema_version()?;
        let mut client = self.db().with_tx(|tx| {
            let count = tx.get_i64("SELECT count(*) FROM client", [])?;
            if count > 1 {
                return Err(StoreError::validation(format!(
                    "invalid client database, multiple ({count}) rows in client table"
                )));
            }
            if count == 0 {
                let (public_key, private_key) = generate_keypair_bytes();
                let client_id = ClientId::generate();
                let user_id = UserId::generate();
                tx.exec(
                    "INSERT INTO client (clientid, userid, userpublickeybytes, userprivatekeybytes,
                                         activesessionid, winsize, cmdstoretype, releaseinfo)
                     VALUES (?1, ?2, ?3, ?4, '', '{}', 'screen', '{}')",
                    params![client_id.as_str(), user_id.as_str(), public_key, private_key],
                )?;
                tracing::info!(
                    client_id = %client_id,
                    user_id = %user_id,
                    "created new client row with keypair"
                );
            }
            map_client_row(tx)?
                .ok_or_else(|| StoreError::validation("no client data found"))
        })?;
        if client.user_id.is_empty() {
            return Err(StoreError::validation("invalid client data (no userid)"));
        }
        if client.user_public_key.is_empty() || client.user_private_key.is_empty() {
            return Err(StoreError::validation(
                "invalid client data (no public/private keypair)",
            ));
        }
        client.db_version = version;
        Ok(client)
    }

    pub fn get_client_data(&self) -> Result<Option<ClientData>, StoreError> {
        self.db().with_tx(map_client_row)
    }

    pub fn set_client_opts(&self, client_opts: &ClientOpts) -> Result<(), StoreError> {
        let encoded = quick_json(client_opts)?;
        self.db().with_tx(|tx| {
            tx.exec("UPDATE client SET clientopts = ?1", params![encoded])?;
            Ok(())
        })
    }

    pub fn set_win_size(&self, win_size: &ClientWinSize) -> Result<(), StoreError> {
        let encoded = quick_json(win_size)?;
        self.db().with_tx(|tx| {
            tx.exec("UPDATE client SET winsize = ?1", params![encoded])?;
            Ok(())
        })
    }

    pub fn update_client_fe_opts(&self, fe_opts: &FeOpts) -> Result<(), StoreError> {
        let encoded = quick_json(fe_opts)?;
        self.db().with_tx(|tx| {
            tx.exec("UPDATE client SET feopts = ?1", params![encoded])?;
            Ok(())
        })
    }

    pub fn update_client_openai_opts(&self, opts: Option<&OpenAiOpts>) -> Result<(), StoreError> {
        let encoded = quick_nullable_json(&opts.cloned())?;
        self.db().with_tx(|tx| {
            tx.exec("UPDATE client SET openaiopts = ?1", params![encoded])?;
            Ok(())
        })
    }

    pub fn set_release_info(&self, release_info: &ReleaseInfo) -> Result<(), StoreError> {
        let encoded = quick_json(release_info)?;
        self.db().with_tx(|tx| {
            tx.exec("UPDATE client SET releaseinfo = ?1", params![encoded])?;
            Ok(())
        })
    }

    pub fn get_active_session_id(&self) -> Result<SessionId, StoreError> {
        self.db().with_tx(|tx| {
            Ok(SessionId::new(
                tx.get_string("SELECT activesessionid FROM client", [])?,
            ))
        })
    }

    pub fn set_active_session_id(&self, session_id: &SessionId) -> Result<(), StoreError> {
        self.db().with_tx(|tx| {
            if !tx.exists(
                "SELECT sessionid FROM session WHERE sessionid = ?1",
                params![session_id.as_str()],
            )? {
                return Err(StoreError::validation("cannot switch to session, not found"));
            }
            tx.exec(
                "UPDATE client SET activesessionid = ?1",
                params![session_id.as_str()],
            )?;
            Ok(())
        })
    }
}
