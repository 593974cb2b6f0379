use std::collections::HashMap;
use std::sync::Mutex;

use termbench_model::{
    OpenAiCmdInfoChatMessage, OpenAiCmdInfoChatUpdate, ScreenId, ScreenNumRunningCommands,
    ScreenStatusIndicator, StatusIndicatorLevel, StrWithPos, UpdatePacket, UpdateRecord,
};

use crate::error::StoreError;
use crate::lifecycle::Core;

/// Per-screen flags that do not survive a restart.
#[derive(Debug, Clone, Default)]
pub struct ScreenMemState {
    pub indicator: StatusIndicatorLevel,
    pub num_running_commands: i64,
    pub cmd_info_chat: Vec<OpenAiCmdInfoChatMessage>,
    pub cmd_input_text: StrWithPos,
    next_chat_message_id: i64,
}

#[derive(Debug, Default)]
pub(crate) struct ScreenMemStore {
    state: Mutex<HashMap<ScreenId, ScreenMemState>>,
}

impl ScreenMemStore {
    fn with_state<T>(&self, screen_id: &ScreenId, f: impl FnOnce(&mut ScreenMemState) -> T) -> T {
        let mut state = self.state.lock().expect("screen mem lock poisoned");
        f(state.entry(screen_id.clone()).or_default())
    }

    pub(crate) fn snapshot(&self, screen_id: &ScreenId) -> ScreenMemState {
        self.with_state(screen_id, |mem| mem.clone())
    }

    pub(crate) fn snapshot_all(&self) -> Vec<(ScreenId, ScreenMemState)> {
        let state = self.state.lock().expect("screen mem lock poisoned");
        state
            .iter()
            .map(|(id, mem)| (id.clone(), mem.clone()))
            .collect()
    }

    pub(crate) fn set_indicator_level(&self, screen_id: &ScreenId, level: StatusIndicatorLevel) {
        self.with_state(screen_id, |mem| mem.indicator = level);
    }

    /// Monotonic combine: the stored level only moves up. Returns the level
    /// now in effect.
    pub(crate) fn combine_indicator_level(
        &self,
        screen_id: &ScreenId,
        level: StatusIndicatorLevel,
    ) -> StatusIndicatorLevel {
        self.with_state(screen_id, |mem| {
            if level > mem.indicator {
                mem.indicator = level;
            }
            mem.indicator
        })
    }

    pub(crate) fn increment_num_running(&self, screen_id: &ScreenId, delta: i64) -> i64 {
        self.with_state(screen_id, |mem| {
            mem.num_running_commands = (mem.num_running_commands + delta).max(0);
            mem.num_running_commands
        })
    }

    pub(crate) fn clear_cmd_info_chat(&self, screen_id: &ScreenId) {
        self.with_state(screen_id, |mem| {
            mem.cmd_info_chat.clear();
            mem.next_chat_message_id = 0;
        });
    }

    pub(crate) fn add_cmd_info_chat_message(
        &self,
        screen_id: &ScreenId,
        mut message: OpenAiCmdInfoChatMessage,
    ) -> i64 {
        self.with_state(screen_id, |mem| {
            mem.next_chat_message_id += 1;
            message.message_id = mem.next_chat_message_id;
            mem.cmd_info_chat.push(message);
            mem.next_chat_message_id
        })
    }

    pub(crate) fn update_cmd_info_chat_message(
        &self,
        screen_id: &ScreenId,
        message_id: i64,
        message: OpenAiCmdInfoChatMessage,
    ) -> Result<(), StoreError> {
        self.with_state(screen_id, |mem| {
            for existing in mem.cmd_info_chat.iter_mut() {
                if existing.message_id == message_id {
                    *existing = OpenAiCmdInfoChatMessage {
                        message_id,
                        ..message
                    };
                    return Ok(());
                }
            }
            Err(StoreError::validation(format!(
                "cmd info chat message {message_id} not found"
            )))
        })
    }

    pub(crate) fn cmd_info_chat(&self, screen_id: &ScreenId) -> Vec<OpenAiCmdInfoChatMessage> {
        self.with_state(screen_id, |mem| mem.cmd_info_chat.clone())
    }

    pub(crate) fn set_cmd_input_text(&self, screen_id: &ScreenId, input: StrWithPos) {
        self.with_state(screen_id, |mem| mem.cmd_input_text = input);
    }

    pub(crate) fn remove_screen(&self, screen_id: &ScreenId) {
        let mut state = self.state.lock().expect("screen mem lock poisoned");
        state.remove(screen_id);
    }
}

impl Core {
    /// Record an indicator level for a screen and append the resulting
    /// record to `update`. Without `force`, the active screen is skipped and
    /// levels only combine upward.
    pub fn set_status_indicator_level_update(
        &self,
        update: &mut UpdatePacket,
        screen_id: &ScreenId,
        level: StatusIndicatorLevel,
        force: bool,
    ) -> Result<(), StoreError> {
        let new_status;
        if force {
            self.inner.screen_mem.set_indicator_level(screen_id, level);
            new_status = level;
        } else {
            let active_session_id = self.get_active_session_id()?;
            let active_screen_id = match self.get_bare_session_by_id(&active_session_id)? {
                Some(session) => session.active_screen_id,
                None => Default::default(),
            };
            if active_screen_id.as_str() == screen_id.as_str() {
                return Ok(());
            }
            let combined = self.inner.screen_mem.combine_indicator_level(screen_id, level);
            if combined != level {
                return Ok(());
            }
            new_status = level;
        }
        update.add_update(UpdateRecord::ScreenStatusIndicator(ScreenStatusIndicator {
            screen_id: screen_id.clone(),
            status: new_status,
        }));
        Ok(())
    }

    pub fn set_status_indicator_level(
        &self,
        screen_id: &ScreenId,
        level: StatusIndicatorLevel,
        force: bool,
    ) -> Result<(), StoreError> {
        let mut update = UpdatePacket::new();
        self.set_status_indicator_level_update(&mut update, screen_id, level, force)?;
        self.bus().publish(update);
        Ok(())
    }

    pub fn reset_status_indicator_update(
        &self,
        update: &mut UpdatePacket,
        screen_id: &ScreenId,
    ) -> Result<(), StoreError> {
        self.set_status_indicator_level_update(update, screen_id, StatusIndicatorLevel::None, true)
    }

    pub fn reset_status_indicator(&self, screen_id: &ScreenId) -> Result<(), StoreError> {
        self.set_status_indicator_level(screen_id, StatusIndicatorLevel::None, true)
    }

    pub fn increment_num_running_cmds_update(
        &self,
        update: &mut UpdatePacket,
        screen_id: &ScreenId,
        delta: i64,
    ) {
        let num = self.inner.screen_mem.increment_num_running(screen_id, delta);
        update.add_update(UpdateRecord::ScreenNumRunningCommands(
            ScreenNumRunningCommands {
                screen_id: screen_id.clone(),
                num,
            },
        ));
    }

    pub fn increment_num_running_cmds(&self, screen_id: &ScreenId, delta: i64) {
        let mut update = UpdatePacket::new();
        self.increment_num_running_cmds_update(&mut update, screen_id, delta);
        self.bus().publish(update);
    }

    pub fn screen_mem_snapshot(&self, screen_id: &ScreenId) -> ScreenMemState {
        self.inner.screen_mem.snapshot(screen_id)
    }

    pub fn set_cmd_input_text(&self, screen_id: &ScreenId, input: StrWithPos) {
        self.inner.screen_mem.set_cmd_input_text(screen_id, input);
    }

    pub fn update_with_clear_openai_cmd_info(&self, screen_id: &ScreenId) -> UpdatePacket {
        self.inner.screen_mem.clear_cmd_info_chat(screen_id);
        self.update_with_current_openai_cmd_info_chat(screen_id, None)
    }

    pub fn update_with_add_new_openai_cmd_info_msg(
        &self,
        screen_id: &ScreenId,
        message: OpenAiCmdInfoChatMessage,
    ) -> UpdatePacket {
        self.inner
            .screen_mem
            .add_cmd_info_chat_message(screen_id, message);
        self.update_with_current_openai_cmd_info_chat(screen_id, None)
    }

    pub fn update_with_update_openai_cmd_info_msg(
        &self,
        screen_id: &ScreenId,
        message_id: i64,
        message: OpenAiCmdInfoChatMessage,
    ) -> Result<UpdatePacket, StoreError> {
        self.inner
            .screen_mem
            .update_cmd_info_chat_message(screen_id, message_id, message)?;
        Ok(self.update_with_current_openai_cmd_info_chat(screen_id, None))
    }

    pub fn update_with_current_openai_cmd_info_chat(
        &self,
        screen_id: &ScreenId,
        update: Option<UpdatePacket>,
    ) -> UpdatePacket {
        let mut update = update.unwrap_or_default();
        update.add_update(UpdateRecord::OpenAiCmdInfoChat(OpenAiCmdInfoChatUpdate {
            messages: self.inner.screen_mem.cmd_info_chat(screen_id),
        }));
        update
    }
}
