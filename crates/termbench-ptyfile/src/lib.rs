//! On-disk storage for live terminal output.
//!
//! Every `(screen, line)` pair owns one bounded circular file ("cirfile")
//! under the screen's directory. The file stores the trailing window of the
//! output stream; reads hand back `(real_offset, data)` so callers can
//! reconstruct absolute positions after the window has slid. Small artefacts
//! below the inline cap live in a per-screen SQLite filedb instead.

mod cirfile;
mod error;
mod filedb;
mod store;

pub use cirfile::{CirFile, CirFileStat, HEADER_LEN};
pub use error::PtyFileError;
pub use filedb::{FileDbCache, FileRecord, MAX_DB_FILE_SIZE};
pub use store::{DiskSize, PtyFileStore, PTY_OUT_SUFFIX, SCREENS_DIR_NAME, SESSIONS_DIR_NAME};
