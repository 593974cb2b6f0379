use serde::{Deserialize, Serialize};

use crate::ids::{RemotePtr, ScreenId, SessionId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareMode {
    #[default]
    Local,
    Web,
}

impl ShareMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShareMode::Local => "local",
            ShareMode::Web => "web",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "local" => Some(ShareMode::Local),
            "web" => Some(ShareMode::Web),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FocusType {
    #[default]
    Input,
    Cmd,
}

impl FocusType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FocusType::Input => "input",
            FocusType::Cmd => "cmd",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "input" => Some(FocusType::Input),
            "cmd" => Some(FocusType::Cmd),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenOpts {
    #[serde(rename = "tabcolor", default, skip_serializing_if = "String::is_empty")]
    pub tab_color: String,
    #[serde(rename = "tabicon", default, skip_serializing_if = "String::is_empty")]
    pub tab_icon: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pterm: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSidebarOpts {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub open: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub width: String,
    #[serde(
        rename = "sidebarlineid",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub sidebar_line_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenViewOpts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sidebar: Option<ScreenSidebarOpts>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenAnchor {
    #[serde(rename = "anchorline", default, skip_serializing_if = "is_zero")]
    pub anchor_line: i64,
    #[serde(rename = "anchoroffset", default, skip_serializing_if = "is_zero")]
    pub anchor_offset: i64,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenWebShareOpts {
    #[serde(rename = "sharename")]
    pub share_name: String,
    #[serde(rename = "viewkey")]
    pub view_key: String,
}

/// Options for `insert_screen`; the copy flags pull the remote pointer and
/// environment forward from an existing screen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScreenCreateOpts {
    pub base_screen_id: Option<ScreenId>,
    pub copy_remote: bool,
    pub copy_cwd: bool,
    pub copy_env: bool,
}

impl ScreenCreateOpts {
    pub fn has_copy(&self) -> bool {
        self.copy_remote || self.copy_cwd || self.copy_env
    }
}

/// Field set accepted by `update_screen`. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScreenEdit {
    pub anchor_line: Option<i64>,
    pub anchor_offset: Option<i64>,
    pub selected_line: Option<i64>,
    pub focus_type: Option<FocusType>,
    pub tab_color: Option<String>,
    pub tab_icon: Option<String>,
    pub pterm: Option<String>,
    pub name: Option<String>,
    pub share_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Screen {
    #[serde(rename = "sessionid")]
    pub session_id: SessionId,
    #[serde(rename = "screenid")]
    pub screen_id: ScreenId,
    pub name: String,
    #[serde(rename = "screenidx")]
    pub screen_idx: i64,
    #[serde(rename = "screenopts")]
    pub screen_opts: ScreenOpts,
    #[serde(rename = "screenviewopts")]
    pub screen_view_opts: ScreenViewOpts,
    #[serde(rename = "ownerid")]
    pub owner_id: String,
    #[serde(rename = "sharemode")]
    pub share_mode: ShareMode,
    #[serde(rename = "webshareopts", default, skip_serializing_if = "Option::is_none")]
    pub web_share_opts: Option<ScreenWebShareOpts>,
    #[serde(rename = "curremote")]
    pub cur_remote: RemotePtr,
    #[serde(rename = "nextlinenum")]
    pub next_line_num: i64,
    #[serde(rename = "selectedline")]
    pub selected_line: i64,
    pub anchor: ScreenAnchor,
    #[serde(rename = "focustype")]
    pub focus_type: FocusType,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub archived: bool,
    #[serde(rename = "archivedts", default, skip_serializing_if = "is_zero")]
    pub archived_ts: i64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub remove: bool,
}

impl Screen {
    pub fn removal(session_id: SessionId, screen_id: ScreenId) -> Self {
        Self {
            session_id,
            screen_id,
            remove: true,
            ..Self::default()
        }
    }

    pub fn is_web_share(&self) -> bool {
        self.share_mode == ShareMode::Web
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenTombstone {
    #[serde(rename = "screenid")]
    pub screen_id: ScreenId,
    #[serde(rename = "sessionid")]
    pub session_id: SessionId,
    pub name: String,
    #[serde(rename = "deletedts")]
    pub deleted_ts: i64,
    #[serde(rename = "screenopts")]
    pub screen_opts: ScreenOpts,
}
