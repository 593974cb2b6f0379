use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::cmd::Cmd;
use crate::ids::{LineId, ScreenId, SessionId};
use crate::line::Line;
use crate::remote::{Remote, RemoteInstance};
use crate::screen::{Screen, ScreenTombstone};
use crate::session::{Session, SessionTombstone};

pub const MODEL_UPDATE_PACKET_TYPE: &str = "model-update";

/// Non-persistent per-screen status light. Levels only ever combine upward
/// within a command; advancing past the line resets to `None`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum StatusIndicatorLevel {
    #[default]
    None,
    Output,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenStatusIndicator {
    #[serde(rename = "screenid")]
    pub screen_id: ScreenId,
    pub status: StatusIndicatorLevel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenNumRunningCommands {
    #[serde(rename = "screenid")]
    pub screen_id: ScreenId,
    pub num: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSessionIdUpdate {
    #[serde(rename = "sessionid")]
    pub session_id: SessionId,
}

/// Cursor-carrying command line text, also the input to the suggestion seam.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrWithPos {
    pub str: String,
    pub pos: i64,
}

pub type CmdLineUpdate = StrWithPos;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAiCmdInfoChatMessage {
    #[serde(rename = "messageid")]
    pub message_id: i64,
    #[serde(rename = "isassistantresponse", default)]
    pub is_assistant_response: bool,
    #[serde(
        rename = "assistantresponse",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub assistant_response: Option<String>,
    #[serde(rename = "userquery", default, skip_serializing_if = "Option::is_none")]
    pub user_query: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAiCmdInfoChatUpdate {
    pub messages: Vec<OpenAiCmdInfoChatMessage>,
}

/// Incremental pty bytes for web watchers; payload travels base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PtyDataUpdate {
    #[serde(rename = "screenid")]
    pub screen_id: ScreenId,
    #[serde(rename = "lineid")]
    pub line_id: LineId,
    #[serde(rename = "ptypos")]
    pub pty_pos: i64,
    #[serde(rename = "ptydata64")]
    pub pty_data64: String,
    #[serde(rename = "ptydatalen")]
    pub pty_data_len: i64,
}

impl PtyDataUpdate {
    pub fn new(screen_id: ScreenId, line_id: LineId, pty_pos: i64, data: &[u8]) -> Self {
        Self {
            screen_id,
            line_id,
            pty_pos,
            pty_data64: BASE64.encode(data),
            pty_data_len: data.len() as i64,
        }
    }

    pub fn decode_data(&self) -> Option<Vec<u8>> {
        BASE64.decode(&self.pty_data64).ok()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScreenLines {
    #[serde(rename = "screenid")]
    pub screen_id: ScreenId,
    pub lines: Vec<Line>,
    pub cmds: Vec<Cmd>,
}

/// Full-state resync payload sent when a subscriber (re)connects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectUpdate {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sessions: Vec<Session>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub screens: Vec<Screen>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remotes: Vec<Remote>,
    #[serde(
        rename = "screenstatusindicators",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub screen_status_indicators: Vec<ScreenStatusIndicator>,
    #[serde(
        rename = "screennumrunningcommands",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub screen_num_running_commands: Vec<ScreenNumRunningCommands>,
    #[serde(
        rename = "activesessionid",
        default,
        skip_serializing_if = "SessionId::is_empty"
    )]
    pub active_session_id: SessionId,
}

/// One change record; `remove: true` inside the payload expresses deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UpdateRecord {
    #[serde(rename = "session")]
    Session(Session),
    #[serde(rename = "sessiontombstone")]
    SessionTombstone(SessionTombstone),
    #[serde(rename = "screen")]
    Screen(Screen),
    #[serde(rename = "screentombstone")]
    ScreenTombstone(ScreenTombstone),
    #[serde(rename = "line")]
    Line(Line),
    #[serde(rename = "cmd")]
    Cmd(Cmd),
    #[serde(rename = "remoteinstance")]
    RemoteInstance(RemoteInstance),
    #[serde(rename = "screenstatusindicator")]
    ScreenStatusIndicator(ScreenStatusIndicator),
    #[serde(rename = "screennumrunningcommands")]
    ScreenNumRunningCommands(ScreenNumRunningCommands),
    #[serde(rename = "activesessionid")]
    ActiveSessionId(ActiveSessionIdUpdate),
    #[serde(rename = "ptydata")]
    PtyData(PtyDataUpdate),
    #[serde(rename = "cmdline")]
    CmdLine(CmdLineUpdate),
    #[serde(rename = "openaicmdinfochat")]
    OpenAiCmdInfoChat(OpenAiCmdInfoChatUpdate),
    #[serde(rename = "screenlines")]
    ScreenLines(ScreenLines),
    #[serde(rename = "connect")]
    Connect(ConnectUpdate),
}

impl UpdateRecord {
    /// Screen this record belongs to, for per-screen bus routing.
    pub fn screen_id(&self) -> Option<&ScreenId> {
        match self {
            UpdateRecord::Screen(s) => Some(&s.screen_id),
            UpdateRecord::ScreenTombstone(s) => Some(&s.screen_id),
            UpdateRecord::Line(l) => Some(&l.screen_id),
            UpdateRecord::Cmd(c) => Some(&c.screen_id),
            UpdateRecord::ScreenStatusIndicator(s) => Some(&s.screen_id),
            UpdateRecord::ScreenNumRunningCommands(s) => Some(&s.screen_id),
            UpdateRecord::PtyData(p) => Some(&p.screen_id),
            UpdateRecord::ScreenLines(s) => Some(&s.screen_id),
            _ => None,
        }
    }
}

/// A batch of update records delivered as one wire packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePacket {
    #[serde(rename = "type")]
    pub packet_type: String,
    pub updates: Vec<UpdateRecord>,
}

impl Default for UpdatePacket {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdatePacket {
    pub fn new() -> Self {
        Self {
            packet_type: MODEL_UPDATE_PACKET_TYPE.to_owned(),
            updates: Vec::new(),
        }
    }

    pub fn add_update(&mut self, update: UpdateRecord) {
        self.updates.push(update);
    }

    /// Screen records coalesce by id inside one packet; the latest write
    /// wins.
    pub fn add_screen_update(&mut self, screen: Screen) {
        for existing in self.updates.iter_mut() {
            if let UpdateRecord::Screen(prev) = existing {
                if prev.screen_id == screen.screen_id {
                    *prev = screen;
                    return;
                }
            }
        }
        self.updates.push(UpdateRecord::Screen(screen));
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }
}

/// Closed set of persistent screen-update kinds written to `screenupdate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScreenUpdateKind {
    #[serde(rename = "screen:new")]
    ScreenNew,
    #[serde(rename = "screen:del")]
    ScreenDel,
    #[serde(rename = "screen:selectedline")]
    ScreenSelectedLine,
    #[serde(rename = "screen:sharename")]
    ScreenShareName,
    #[serde(rename = "line:new")]
    LineNew,
    #[serde(rename = "line:del")]
    LineDel,
    #[serde(rename = "line:renderer")]
    LineRenderer,
    #[serde(rename = "line:contentheight")]
    LineContentHeight,
    #[serde(rename = "line:state")]
    LineState,
    #[serde(rename = "cmd:status")]
    CmdStatus,
    #[serde(rename = "cmd:termopts")]
    CmdTermOpts,
    #[serde(rename = "cmd:exitcode")]
    CmdExitCode,
    #[serde(rename = "cmd:durationms")]
    CmdDurationMs,
    #[serde(rename = "cmd:rtnstate")]
    CmdRtnState,
    #[serde(rename = "pty:pos")]
    PtyPos,
}

impl ScreenUpdateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScreenUpdateKind::ScreenNew => "screen:new",
            ScreenUpdateKind::ScreenDel => "screen:del",
            ScreenUpdateKind::ScreenSelectedLine => "screen:selectedline",
            ScreenUpdateKind::ScreenShareName => "screen:sharename",
            ScreenUpdateKind::LineNew => "line:new",
            ScreenUpdateKind::LineDel => "line:del",
            ScreenUpdateKind::LineRenderer => "line:renderer",
            ScreenUpdateKind::LineContentHeight => "line:contentheight",
            ScreenUpdateKind::LineState => "line:state",
            ScreenUpdateKind::CmdStatus => "cmd:status",
            ScreenUpdateKind::CmdTermOpts => "cmd:termopts",
            ScreenUpdateKind::CmdExitCode => "cmd:exitcode",
            ScreenUpdateKind::CmdDurationMs => "cmd:durationms",
            ScreenUpdateKind::CmdRtnState => "cmd:rtnstate",
            ScreenUpdateKind::PtyPos => "pty:pos",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "screen:new" => Some(ScreenUpdateKind::ScreenNew),
            "screen:del" => Some(ScreenUpdateKind::ScreenDel),
            "screen:selectedline" => Some(ScreenUpdateKind::ScreenSelectedLine),
            "screen:sharename" => Some(ScreenUpdateKind::ScreenShareName),
            "line:new" => Some(ScreenUpdateKind::LineNew),
            "line:del" => Some(ScreenUpdateKind::LineDel),
            "line:renderer" => Some(ScreenUpdateKind::LineRenderer),
            "line:contentheight" => Some(ScreenUpdateKind::LineContentHeight),
            "line:state" => Some(ScreenUpdateKind::LineState),
            "cmd:status" => Some(ScreenUpdateKind::CmdStatus),
            "cmd:termopts" => Some(ScreenUpdateKind::CmdTermOpts),
            "cmd:exitcode" => Some(ScreenUpdateKind::CmdExitCode),
            "cmd:durationms" => Some(ScreenUpdateKind::CmdDurationMs),
            "cmd:rtnstate" => Some(ScreenUpdateKind::CmdRtnState),
            "pty:pos" => Some(ScreenUpdateKind::PtyPos),
            _ => None,
        }
    }
}

/// A row from the persistent `screenupdate` log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenUpdateRow {
    pub update_id: i64,
    pub screen_id: ScreenId,
    pub line_id: LineId,
    pub kind: ScreenUpdateKind,
    pub update_ts: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_serializes_with_model_update_type_tag() {
        let mut packet = UpdatePacket::new();
        packet.add_update(UpdateRecord::ActiveSessionId(ActiveSessionIdUpdate {
            session_id: SessionId::new("sess-1"),
        }));

        let json = serde_json::to_value(&packet).expect("serialize packet");
        assert_eq!(json["type"], "model-update");
        assert_eq!(json["updates"][0]["type"], "activesessionid");
        assert_eq!(json["updates"][0]["sessionid"], "sess-1");
    }

    #[test]
    fn screen_updates_coalesce_by_id_latest_wins() {
        let mut packet = UpdatePacket::new();
        let mut screen = Screen {
            screen_id: ScreenId::new("scr-1"),
            name: "s1".to_owned(),
            ..Screen::default()
        };
        packet.add_screen_update(screen.clone());
        screen.name = "renamed".to_owned();
        packet.add_screen_update(screen);

        assert_eq!(packet.updates.len(), 1);
        match &packet.updates[0] {
            UpdateRecord::Screen(s) => assert_eq!(s.name, "renamed"),
            other => panic!("unexpected record: {other:?}"),
        }
    }

    #[test]
    fn pty_data_round_trips_through_base64() {
        let update = PtyDataUpdate::new(
            ScreenId::new("scr-1"),
            LineId::new("line-1"),
            42,
            b"hello pty",
        );
        assert_eq!(update.pty_data_len, 9);
        assert_eq!(update.decode_data().expect("decode"), b"hello pty");
    }

    #[test]
    fn screen_update_kinds_round_trip_as_strings() {
        for kind in [
            ScreenUpdateKind::ScreenNew,
            ScreenUpdateKind::ScreenDel,
            ScreenUpdateKind::ScreenSelectedLine,
            ScreenUpdateKind::ScreenShareName,
            ScreenUpdateKind::LineNew,
            ScreenUpdateKind::LineDel,
            ScreenUpdateKind::LineRenderer,
            ScreenUpdateKind::LineContentHeight,
            ScreenUpdateKind::LineState,
            ScreenUpdateKind::CmdStatus,
            ScreenUpdateKind::CmdTermOpts,
            ScreenUpdateKind::CmdExitCode,
            ScreenUpdateKind::CmdDurationMs,
            ScreenUpdateKind::CmdRtnState,
            ScreenUpdateKind::PtyPos,
        ] {
            assert_eq!(ScreenUpdateKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ScreenUpdateKind::parse("bogus"), None);
    }

    #[test]
    fn status_indicator_levels_are_ordered() {
        assert!(StatusIndicatorLevel::None < StatusIndicatorLevel::Output);
        assert!(StatusIndicatorLevel::Output < StatusIndicatorLevel::Success);
        assert!(StatusIndicatorLevel::Success < StatusIndicatorLevel::Error);
    }
}
