use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{LineId, RemotePtr, ScreenId};
use crate::shellstate::ShellStatePtr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CmdStatus {
    Running,
    Detached,
    Error,
    #[default]
    Done,
    Hangup,
    /// History rows without a recorded status.
    Unknown,
}

impl CmdStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CmdStatus::Running => "running",
            CmdStatus::Detached => "detached",
            CmdStatus::Error => "error",
            CmdStatus::Done => "done",
            CmdStatus::Hangup => "hangup",
            CmdStatus::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "running" => Some(CmdStatus::Running),
            "detached" => Some(CmdStatus::Detached),
            "error" => Some(CmdStatus::Error),
            "done" => Some(CmdStatus::Done),
            "hangup" => Some(CmdStatus::Hangup),
            "unknown" => Some(CmdStatus::Unknown),
            _ => None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, CmdStatus::Running | CmdStatus::Detached)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermOpts {
    pub rows: i64,
    pub cols: i64,
    #[serde(rename = "flexrows", default, skip_serializing_if = "std::ops::Not::not")]
    pub flex_rows: bool,
    #[serde(rename = "maxptysize", default, skip_serializing_if = "is_zero")]
    pub max_pty_size: i64,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cmd {
    #[serde(rename = "screenid")]
    pub screen_id: ScreenId,
    #[serde(rename = "lineid")]
    pub line_id: LineId,
    pub remote: RemotePtr,
    #[serde(rename = "cmdstr")]
    pub cmd_str: String,
    #[serde(rename = "rawcmdstr")]
    pub raw_cmd_str: String,
    #[serde(rename = "festate")]
    pub fe_state: BTreeMap<String, String>,
    #[serde(rename = "state")]
    pub state_ptr: ShellStatePtr,
    #[serde(rename = "termopts")]
    pub term_opts: TermOpts,
    #[serde(rename = "origtermopts")]
    pub orig_term_opts: TermOpts,
    pub status: CmdStatus,
    #[serde(rename = "cmdpid")]
    pub cmd_pid: i64,
    #[serde(rename = "remotepid")]
    pub remote_pid: i64,
    #[serde(rename = "restartts", default, skip_serializing_if = "is_zero")]
    pub restart_ts: i64,
    #[serde(rename = "donets")]
    pub done_ts: i64,
    #[serde(rename = "exitcode")]
    pub exit_code: i64,
    #[serde(rename = "durationms")]
    pub duration_ms: i64,
    #[serde(rename = "runout", default, skip_serializing_if = "Vec::is_empty")]
    pub run_out: Vec<serde_json::Value>,
    #[serde(rename = "rtnstate", default, skip_serializing_if = "std::ops::Not::not")]
    pub rtn_state: bool,
    #[serde(rename = "rtnstateptr", default, skip_serializing_if = "ShellStatePtr::is_empty")]
    pub rtn_state_ptr: ShellStatePtr,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub remove: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub restarted: bool,
}

impl Cmd {
    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }
}

/// Fields reported by the shell integration when a command finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CmdDoneInfo {
    pub ts: i64,
    #[serde(rename = "exitcode")]
    pub exit_code: i64,
    #[serde(rename = "durationms")]
    pub duration_ms: i64,
}
