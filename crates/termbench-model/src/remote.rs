use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{RemoteId, RemoteInstanceId, ScreenId, SessionId};
use crate::shellstate::ShellStatePtr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteKind {
    #[default]
    Ssh,
    #[serde(rename = "openai")]
    OpenAi,
}

impl RemoteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteKind::Ssh => "ssh",
            RemoteKind::OpenAi => "openai",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ssh" => Some(RemoteKind::Ssh),
            "openai" => Some(RemoteKind::OpenAi),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectMode {
    Startup,
    Auto,
    #[default]
    Manual,
}

impl ConnectMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectMode::Startup => "startup",
            ConnectMode::Auto => "auto",
            ConnectMode::Manual => "manual",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "startup" => Some(ConnectMode::Startup),
            "auto" => Some(ConnectMode::Auto),
            "manual" => Some(ConnectMode::Manual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellTypePref {
    Bash,
    Zsh,
    #[default]
    Detect,
}

impl ShellTypePref {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShellTypePref::Bash => "bash",
            ShellTypePref::Zsh => "zsh",
            ShellTypePref::Detect => "detect",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "bash" => Some(ShellTypePref::Bash),
            "zsh" => Some(ShellTypePref::Zsh),
            "detect" => Some(ShellTypePref::Detect),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SshConfigSrc {
    #[default]
    #[serde(rename = "termbench-manual")]
    Manual,
    #[serde(rename = "sshconfig-import")]
    SshConfigImport,
}

impl SshConfigSrc {
    pub fn as_str(&self) -> &'static str {
        match self {
            SshConfigSrc::Manual => "termbench-manual",
            SshConfigSrc::SshConfigImport => "sshconfig-import",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "termbench-manual" => Some(SshConfigSrc::Manual),
            "sshconfig-import" => Some(SshConfigSrc::SshConfigImport),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshOpts {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub local: bool,
    #[serde(rename = "issudo", default, skip_serializing_if = "std::ops::Not::not")]
    pub is_sudo: bool,
    #[serde(rename = "sshhost")]
    pub ssh_host: String,
    #[serde(rename = "sshuser")]
    pub ssh_user: String,
    #[serde(rename = "sshopts", default, skip_serializing_if = "String::is_empty")]
    pub ssh_opts_str: String,
    #[serde(rename = "sshidentity", default, skip_serializing_if = "String::is_empty")]
    pub ssh_identity: String,
    #[serde(rename = "sshport", default, skip_serializing_if = "is_zero")]
    pub ssh_port: i64,
    #[serde(rename = "sshpassword", default, skip_serializing_if = "String::is_empty")]
    pub ssh_password: String,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteOpts {
    pub color: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAiOpts {
    pub model: String,
    #[serde(rename = "apitoken")]
    pub api_token: String,
    #[serde(rename = "baseurl", default, skip_serializing_if = "String::is_empty")]
    pub base_url: String,
    #[serde(rename = "maxtokens", default, skip_serializing_if = "is_zero")]
    pub max_tokens: i64,
    #[serde(rename = "maxchoices", default, skip_serializing_if = "is_zero")]
    pub max_choices: i64,
}

/// A connection definition: local shell, ssh host, sudo shell, or an openai
/// endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Remote {
    #[serde(rename = "remoteid")]
    pub remote_id: RemoteId,
    #[serde(rename = "remotetype")]
    pub remote_type: RemoteKind,
    #[serde(rename = "remotealias")]
    pub remote_alias: String,
    #[serde(rename = "remotecanonicalname")]
    pub remote_canonical_name: String,
    #[serde(rename = "remoteuser")]
    pub remote_user: String,
    #[serde(rename = "remotehost")]
    pub remote_host: String,
    #[serde(rename = "connectmode")]
    pub connect_mode: ConnectMode,
    #[serde(rename = "autoinstall")]
    pub auto_install: bool,
    #[serde(rename = "sshopts", default, skip_serializing_if = "Option::is_none")]
    pub ssh_opts: Option<SshOpts>,
    #[serde(rename = "remoteopts", default, skip_serializing_if = "Option::is_none")]
    pub remote_opts: Option<RemoteOpts>,
    #[serde(rename = "lastconnectts")]
    pub last_connect_ts: i64,
    pub archived: bool,
    #[serde(rename = "remoteidx")]
    pub remote_idx: i64,
    pub local: bool,
    #[serde(rename = "statevars", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub state_vars: BTreeMap<String, String>,
    #[serde(rename = "sshconfigsrc")]
    pub ssh_config_src: SshConfigSrc,
    #[serde(rename = "openaiopts", default, skip_serializing_if = "Option::is_none")]
    pub openai_opts: Option<OpenAiOpts>,
    #[serde(rename = "shellpref")]
    pub shell_pref: ShellTypePref,
}

impl Remote {
    pub fn is_local(&self) -> bool {
        self.local && !self.is_sudo()
    }

    pub fn is_sudo(&self) -> bool {
        self.ssh_opts.as_ref().is_some_and(|o| o.is_sudo)
    }

    pub fn display_name(&self) -> &str {
        if self.remote_alias.is_empty() {
            &self.remote_canonical_name
        } else {
            &self.remote_alias
        }
    }
}

/// Field set accepted by `update_remote`; validation happens before the
/// transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteEdit {
    pub alias: Option<String>,
    pub connect_mode: Option<ConnectMode>,
    pub ssh_identity: Option<String>,
    pub ssh_password: Option<String>,
    pub color: Option<String>,
    pub shell_pref: Option<ShellTypePref>,
}

/// An active shell instance bound to a (session, screen, remote) triple.
/// `screen_id` is empty for session-scoped instances.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteInstance {
    #[serde(rename = "riid")]
    pub ri_id: RemoteInstanceId,
    pub name: String,
    #[serde(rename = "sessionid")]
    pub session_id: SessionId,
    #[serde(rename = "screenid")]
    pub screen_id: ScreenId,
    #[serde(rename = "remoteownerid")]
    pub remote_owner_id: String,
    #[serde(rename = "remoteid")]
    pub remote_id: RemoteId,
    #[serde(rename = "festate")]
    pub fe_state: BTreeMap<String, String>,
    #[serde(rename = "shelltype")]
    pub shell_type: String,
    #[serde(skip)]
    pub state_ptr: ShellStatePtr,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub remove: bool,
}

impl RemoteInstance {
    pub fn removal(session_id: SessionId, screen_id: ScreenId, ri_id: RemoteInstanceId) -> Self {
        Self {
            ri_id,
            session_id,
            screen_id,
            remove: true,
            ..Self::default()
        }
    }
}
