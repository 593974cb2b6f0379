use serde::{Deserialize, Serialize};

use crate::ids::{ClientId, SessionId, UserId};
use crate::remote::OpenAiOpts;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientWinSize {
    pub width: i64,
    pub height: i64,
    pub top: i64,
    pub left: i64,
    #[serde(rename = "fullscreen", default, skip_serializing_if = "std::ops::Not::not")]
    pub full_screen: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidebarValue {
    pub collapsed: bool,
    pub width: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientOpts {
    #[serde(rename = "notelemetry", default, skip_serializing_if = "std::ops::Not::not")]
    pub no_telemetry: bool,
    #[serde(rename = "noreleasecheck", default, skip_serializing_if = "std::ops::Not::not")]
    pub no_release_check: bool,
    #[serde(rename = "acceptedtos", default, skip_serializing_if = "is_zero")]
    pub accepted_tos: i64,
    #[serde(rename = "mainsidebar", default, skip_serializing_if = "Option::is_none")]
    pub main_sidebar: Option<SidebarValue>,
    #[serde(rename = "rightsidebar", default, skip_serializing_if = "Option::is_none")]
    pub right_sidebar: Option<SidebarValue>,
    #[serde(rename = "globalshortcut", default, skip_serializing_if = "String::is_empty")]
    pub global_shortcut: String,
    #[serde(
        rename = "globalshortcutenabled",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub global_shortcut_enabled: bool,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeOpts {
    #[serde(rename = "termfontsize", default, skip_serializing_if = "is_zero")]
    pub term_font_size: i64,
    #[serde(rename = "termfontfamily", default, skip_serializing_if = "String::is_empty")]
    pub term_font_family: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub theme: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    #[serde(rename = "latestversion", default, skip_serializing_if = "String::is_empty")]
    pub latest_version: String,
}

/// Singleton client row. The keypair bytes are opaque to the core; key
/// generation and use live with the auth layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientData {
    #[serde(rename = "clientid")]
    pub client_id: ClientId,
    #[serde(rename = "userid")]
    pub user_id: UserId,
    #[serde(skip)]
    pub user_public_key: Vec<u8>,
    #[serde(skip)]
    pub user_private_key: Vec<u8>,
    #[serde(rename = "activesessionid")]
    pub active_session_id: SessionId,
    #[serde(rename = "winsize")]
    pub win_size: ClientWinSize,
    #[serde(rename = "clientopts")]
    pub client_opts: ClientOpts,
    #[serde(rename = "feopts")]
    pub fe_opts: FeOpts,
    #[serde(rename = "cmdstoretype")]
    pub cmd_store_type: String,
    #[serde(rename = "openaiopts", default, skip_serializing_if = "Option::is_none")]
    pub openai_opts: Option<OpenAiOpts>,
    #[serde(rename = "releaseinfo")]
    pub release_info: ReleaseInfo,
    #[serde(rename = "dbversion", default, skip_serializing_if = "is_zero")]
    pub db_version: i64,
}

pub const CMD_STORE_TYPE_SCREEN: &str = "screen";
pub const CMD_STORE_TYPE_SESSION: &str = "session";

pub const API_TOKEN_SENTINEL: &str = "--apitoken--";

impl ClientData {
    /// Copy safe to hand to the front end: the openai api token is replaced
    /// with a sentinel, key material is never serialized.
    pub fn clean(&self) -> Self {
        let mut rtn = self.clone();
        rtn.user_public_key = Vec::new();
        rtn.user_private_key = Vec::new();
        if let Some(opts) = rtn.openai_opts.as_mut() {
            if !opts.api_token.is_empty() {
                opts.api_token = API_TOKEN_SENTINEL.to_owned();
            }
        }
        rtn
    }
}
