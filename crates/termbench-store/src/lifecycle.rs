use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use termbench_blockstore::BlockStore;
use termbench_bus::UpdateBus;
use termbench_model::ClientData;
use termbench_ptyfile::{FileDbCache, PtyFileStore};

use crate::config::CoreConfig;
use crate::db::Db;
use crate::error::StoreError;
use crate::screen_mem::ScreenMemStore;
use crate::update_log::UpdateWriterControl;

pub(crate) struct CoreInner {
    pub(crate) db: Db,
    pub(crate) bus: UpdateBus,
    pub(crate) blockstore: BlockStore,
    pub(crate) pty_files: PtyFileStore,
    pub(crate) filedb: FileDbCache,
    pub(crate) screen_mem: ScreenMemStore,
    pub(crate) update_writer: UpdateWriterControl,
    pub(crate) config: CoreConfig,
}

/// The persistence core. Cheap to clone; all clones share one database
/// handle, one blockstore, one bus, and one set of background tasks.
#[derive(Clone)]
pub struct Core {
    pub(crate) inner: Arc<CoreInner>,
}

impl Core {
    /// Open (and migrate) the store rooted at `config.home_dir`.
    pub fn open(config: CoreConfig) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&config.home_dir)
            .map_err(|err| StoreError::Persistence(err.to_string()))?;
        let db_path = config.db_path();
        let db = Db::open(&db_path, config.busy_timeout_ms)?;
        let blockstore = BlockStore::open(&db_path)?;
        Self::assemble(db, blockstore, config)
    }

    /// Fully in-memory store (plus a throwaway home dir for pty files);
    /// used by tests.
    pub fn open_in_memory(home_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let config = CoreConfig::new(home_dir.as_ref());
        let db = Db::in_memory()?;
        let blockstore = BlockStore::in_memory()?;
        Self::assemble(db, blockstore, config)
    }

    fn assemble(db: Db, blockstore: BlockStore, config: CoreConfig) -> Result<Self, StoreError> {
        let pty_files = PtyFileStore::new(&config.home_dir);
        let filedb = FileDbCache::new(pty_files.clone());
        Ok(Self {
            inner: Arc::new(CoreInner {
                db,
                bus: UpdateBus::default(),
                blockstore,
                pty_files,
                filedb,
                screen_mem: ScreenMemStore::default(),
                update_writer: UpdateWriterControl::default(),
                config,
            }),
        })
    }

    /// Startup sequence: ensure the singleton client row, the local/sudo
    /// remotes, and at least one session; recover commands orphaned by a
    /// crash; start the flush timer.
    pub fn bootstrap(&self) -> Result<ClientData, StoreError> {
        let client = self.ensure_client_data()?;
        self.ensure_local_remote()?;
        self.ensure_one_session()?;
        self.hangup_all_running_cmds()?;
        self.re_init_focus()?;
        self.inner
            .blockstore
            .start_flush_timer(Duration::from_millis(self.inner.config.flush_interval_ms))?;
        Ok(client)
    }

    /// Shutdown: stop background tasks, then converge the blockstore cache
    /// with the SQL backend.
    pub fn shutdown(&self) {
        self.stop_update_writer();
        self.inner.blockstore.stop_flush_timer();
        if let Err(err) = self.inner.blockstore.flush_cache() {
            tracing::error!(error = %err, "final blockstore flush failed");
        }
    }

    pub fn bus(&self) -> &UpdateBus {
        &self.inner.bus
    }

    pub fn blockstore(&self) -> &BlockStore {
        &self.inner.blockstore
    }

    pub fn pty_files(&self) -> &PtyFileStore {
        &self.inner.pty_files
    }

    pub fn filedb(&self) -> &FileDbCache {
        &self.inner.filedb
    }

    pub fn config(&self) -> &CoreConfig {
        &self.inner.config
    }

    pub(crate) fn db(&self) -> &Db {
        &self.inner.db
    }

    /// Full-state resync payload: every session (with its shell instances),
    /// every screen, the remote definitions, the non-persistent screen
    /// state, and the active session pointer.
    pub fn get_connect_update(
        &self,
    ) -> Result<termbench_model::ConnectUpdate, StoreError> {
        use termbench_model::{ConnectUpdate, ScreenNumRunningCommands, ScreenStatusIndicator};

        let mut update = ConnectUpdate {
            sessions: self.get_bare_sessions()?,
            screens: self.get_all_screens()?,
            remotes: self.get_all_remotes()?,
            ..ConnectUpdate::default()
        };
        for instance in self.get_all_remote_instances()? {
            if let Some(session) = update
                .sessions
                .iter_mut()
                .find(|session| session.session_id == instance.session_id)
            {
                session.remotes.push(instance);
            }
        }
        for (screen_id, mem) in self.inner.screen_mem.snapshot_all() {
            update
                .screen_status_indicators
                .push(ScreenStatusIndicator {
                    screen_id: screen_id.clone(),
                    status: mem.indicator,
                });
            update
                .screen_num_running_commands
                .push(ScreenNumRunningCommands {
                    screen_id,
                    num: mem.num_running_commands,
                });
        }
        update.active_session_id = self.get_active_session_id()?;
        Ok(update)
    }
}
