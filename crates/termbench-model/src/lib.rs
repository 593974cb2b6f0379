//! Shared data model for the termbench persistence core: typed ids, entity
//! records, shell-state encoding, and the update-record vocabulary consumed
//! by the bus and the front end.

pub mod client;
pub mod cmd;
pub mod ids;
pub mod line;
pub mod remote;
pub mod screen;
pub mod session;
pub mod shellstate;
pub mod update;

pub use client::{ClientData, ClientOpts, ClientWinSize, FeOpts, ReleaseInfo, SidebarValue};
pub use cmd::{Cmd, CmdDoneInfo, CmdStatus, TermOpts};
pub use ids::{
    new_uuid, ClientId, LineId, RemoteId, RemoteInstanceId, RemotePtr, ScreenId, SessionId, UserId,
};
pub use line::{Line, LineState, LineType, LINE_NO_HEIGHT, MAX_LINE_STATE_SIZE};
pub use remote::{
    ConnectMode, OpenAiOpts, Remote, RemoteEdit, RemoteInstance, RemoteKind, RemoteOpts,
    ShellTypePref, SshConfigSrc, SshOpts,
};
pub use screen::{
    FocusType, Screen, ScreenAnchor, ScreenCreateOpts, ScreenEdit, ScreenOpts,
    ScreenSidebarOpts, ScreenTombstone, ScreenViewOpts, ScreenWebShareOpts, ShareMode,
};
pub use session::{Session, SessionTombstone};
pub use shellstate::{
    apply_shell_state_diff, fe_state_from_shell_state, FeState, ShellState, ShellStateDiff,
    ShellStatePtr, StateBaseRow, StateDiffRow, StateError, VarDiffOp,
};
pub use update::{
    ActiveSessionIdUpdate, CmdLineUpdate, ConnectUpdate, OpenAiCmdInfoChatMessage,
    OpenAiCmdInfoChatUpdate, PtyDataUpdate, ScreenLines, ScreenNumRunningCommands,
    ScreenStatusIndicator, ScreenUpdateKind, ScreenUpdateRow, StatusIndicatorLevel, StrWithPos,
    UpdatePacket, UpdateRecord,
};

pub const DEFAULT_SESSION_NAME: &str = "default";
pub const LOCAL_REMOTE_ALIAS: &str = "local";
pub const SUDO_REMOTE_ALIAS: &str = "sudo";

/// Current wall-clock time in unix milliseconds, the timestamp unit used
/// throughout the store.
pub fn now_ms() -> i64 {
    let now = time::OffsetDateTime::now_utc();
    (now.unix_timestamp_nanos() / 1_000_000) as i64
}
