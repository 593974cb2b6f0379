//! Persistence and mutation core: the relational workspace store
//! (sessions, screens, lines, commands, remotes), the content-addressed
//! shell-state repository, the persistent screen-update log, and the
//! in-memory per-screen state. All mutators run inside the single-writer
//! transaction wrapper and report their effects as update packets.

pub mod config;
pub mod db;
pub mod error;
mod client;
mod history;
mod lifecycle;
mod line;
mod remote;
mod screen;
mod screen_mem;
mod session;
mod shellstate;
mod suggest;
mod update_log;

#[cfg(test)]
mod tests;

pub use config::{load_from_env, load_from_path, CoreConfig};
pub use db::Db;
pub use error::StoreError;
pub use history::HistoryItem;
pub use lifecycle::Core;
pub use screen_mem::ScreenMemState;
pub use session::SessionStats;
pub use suggest::{NoopSuggestionProvider, SuggestionProvider};
pub use update_log::UpdateDispatcher;
