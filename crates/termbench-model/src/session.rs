use serde::{Deserialize, Serialize};

use crate::ids::{ScreenId, SessionId};
use crate::remote::RemoteInstance;
use crate::screen::ShareMode;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "sessionid")]
    pub session_id: SessionId,
    pub name: String,
    #[serde(rename = "sessionidx")]
    pub session_idx: i64,
    /// Empty when the session has no active screen yet.
    #[serde(rename = "activescreenid")]
    pub active_screen_id: ScreenId,
    #[serde(rename = "sharemode")]
    pub share_mode: ShareMode,
    #[serde(rename = "notifynum")]
    pub notify_num: i64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub archived: bool,
    #[serde(rename = "archivedts", default, skip_serializing_if = "is_zero")]
    pub archived_ts: i64,
    /// Remote instances attached to this session; populated for connect
    /// updates, never persisted on the session row itself.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remotes: Vec<RemoteInstance>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub remove: bool,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

impl Session {
    pub fn removal(session_id: SessionId) -> Self {
        Self {
            session_id,
            remove: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTombstone {
    #[serde(rename = "sessionid")]
    pub session_id: SessionId,
    pub name: String,
    #[serde(rename = "deletedts")]
    pub deleted_ts: i64,
}
