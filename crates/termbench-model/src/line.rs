use serde::{Deserialize, Serialize};

use crate::ids::{LineId, ScreenId, UserId};
use crate::now_ms;

pub const MAX_LINE_STATE_SIZE: usize = 4 * 1024;
pub const LINE_NO_HEIGHT: i64 = -1;

pub const RENDERER_OPENAI: &str = "openai";

/// Small per-line JSON state map (renderer hints, file/source pointers).
pub type LineState = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineType {
    #[default]
    Cmd,
    Text,
    #[serde(rename = "openai")]
    OpenAi,
}

impl LineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineType::Cmd => "cmd",
            LineType::Text => "text",
            LineType::OpenAi => "openai",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "cmd" => Some(LineType::Cmd),
            "text" => Some(LineType::Text),
            "openai" => Some(LineType::OpenAi),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Line {
    #[serde(rename = "screenid")]
    pub screen_id: ScreenId,
    #[serde(rename = "userid")]
    pub user_id: UserId,
    #[serde(rename = "lineid")]
    pub line_id: LineId,
    pub ts: i64,
    #[serde(rename = "linenum")]
    pub line_num: i64,
    #[serde(rename = "linenumtemp", default, skip_serializing_if = "std::ops::Not::not")]
    pub line_num_temp: bool,
    #[serde(rename = "linelocal")]
    pub line_local: bool,
    #[serde(rename = "linetype")]
    pub line_type: LineType,
    #[serde(rename = "linestate")]
    pub line_state: LineState,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub renderer: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ephemeral: bool,
    #[serde(rename = "contentheight", default)]
    pub content_height: i64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub star: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub archived: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub remove: bool,
}

impl Line {
    pub fn new_cmd(
        screen_id: ScreenId,
        user_id: UserId,
        line_id: LineId,
        renderer: impl Into<String>,
        line_state: Option<LineState>,
    ) -> Self {
        Self {
            screen_id,
            user_id,
            line_id,
            ts: now_ms(),
            line_local: true,
            line_type: LineType::Cmd,
            line_state: line_state.unwrap_or_default(),
            renderer: renderer.into(),
            content_height: LINE_NO_HEIGHT,
            ..Self::default()
        }
    }

    pub fn new_text(screen_id: ScreenId, user_id: UserId, text: impl Into<String>) -> Self {
        Self {
            screen_id,
            user_id,
            line_id: LineId::generate(),
            ts: now_ms(),
            line_local: true,
            line_type: LineType::Text,
            text: text.into(),
            content_height: LINE_NO_HEIGHT,
            ..Self::default()
        }
    }

    pub fn new_openai(screen_id: ScreenId, user_id: UserId, line_id: LineId) -> Self {
        Self {
            screen_id,
            user_id,
            line_id,
            ts: now_ms(),
            line_local: true,
            line_type: LineType::OpenAi,
            renderer: RENDERER_OPENAI.to_owned(),
            content_height: LINE_NO_HEIGHT,
            ..Self::default()
        }
    }

    pub fn removal(screen_id: ScreenId, line_id: LineId) -> Self {
        Self {
            screen_id,
            line_id,
            remove: true,
            ..Self::default()
        }
    }
}
