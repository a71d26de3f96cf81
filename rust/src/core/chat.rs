// Message list reconciliation: full loads, local mutations, push events.

use super::*;
use crate::realtime::ChatEvent;
use crate::reconcile;
use crate::service::ChatHistory;
use crate::state::{ChatInfo, PendingEdit};

fn chat_info_from(chat_id: String, history: ChatHistory) -> ChatInfo {
    ChatInfo {
        chat_id,
        chat_name: history.chat_name,
        description: history.description,
        members: history.members,
    }
}

impl AppCore {
    pub(super) fn open_chat(&mut self, chat_id: &str) {
        let chat_id = chat_id.trim();
        if chat_id.is_empty() {
            return;
        }
        if self.state.is_active_chat(chat_id) {
            // Re-opening refreshes the chat and is the retry path for a dead link;
            // a healthy subscription is kept.
            if self.link_is_down() {
                self.subscribe(chat_id);
                self.emit_state();
            }
            self.load_chat(chat_id);
            return;
        }

        // Tear the old link down before anything for the new chat can arrive.
        self.close_subscription();
        self.reset_chat_state();
        self.state.active_chat_id = Some(chat_id.to_string());
        self.subscribe(chat_id);
        self.emit_state();
        self.load_chat(chat_id);
    }

    pub(super) fn close_chat(&mut self) {
        if self.state.active_chat_id.is_none() {
            return;
        }
        self.close_subscription();
        self.reset_chat_state();
        self.state.active_chat_id = None;
        self.emit_state();
    }

    /// Full refetch of history + metadata for `chat_id`.
    pub(super) fn load_chat(&mut self, chat_id: &str) {
        self.loads_in_flight += 1;
        if !self.state.busy.loading_chat {
            self.state.busy.loading_chat = true;
            self.emit_state();
        }

        let service = self.service.clone();
        let chat_id = chat_id.to_string();
        self.spawn_task(async move {
            let result = service
                .fetch_chat_history(&chat_id)
                .await
                .map_err(|e| e.to_string());
            InternalEvent::ChatLoaded { chat_id, result }
        });
    }

    /// Metadata-only refresh; messages are left alone.
    pub(super) fn refresh_chat_info(&mut self, chat_id: &str) {
        let service = self.service.clone();
        let chat_id = chat_id.to_string();
        self.spawn_task(async move {
            let result = service
                .fetch_chat_history(&chat_id)
                .await
                .map_err(|e| e.to_string());
            InternalEvent::ChatInfoRefreshed { chat_id, result }
        });
    }

    pub(super) fn apply_chat_loaded(&mut self, chat_id: String, result: Result<ChatHistory, String>) {
        self.loads_in_flight = self.loads_in_flight.saturating_sub(1);
        self.state.busy.loading_chat = self.loads_in_flight > 0;

        match result {
            Ok(mut history) => match history.chats.take() {
                Some(chats) => {
                    tracing::info!(%chat_id, count = chats.len(), "chat history loaded");
                    self.state.messages = reconcile::display_order(chats);
                    self.state.chat_info = Some(chat_info_from(chat_id, history));
                    self.drop_orphaned_edit();
                }
                None => {
                    tracing::warn!(%chat_id, "chat history response carried no messages");
                    self.state.messages = vec![];
                    self.state.chat_info = None;
                    self.state.pending_edit = None;
                }
            },
            Err(e) => {
                tracing::error!(%chat_id, err = %e, "failed to fetch chat history");
                self.state.messages = vec![];
                self.state.chat_info = None;
                self.state.pending_edit = None;
                self.state.toast = Some(format!("Failed to load chat: {e}"));
            }
        }
        self.emit_state();
    }

    pub(super) fn apply_chat_info_refreshed(
        &mut self,
        chat_id: String,
        result: Result<ChatHistory, String>,
    ) {
        match result {
            Ok(history) => {
                self.state.chat_info = Some(chat_info_from(chat_id, history));
                self.emit_state();
            }
            Err(e) => {
                tracing::warn!(%chat_id, err = %e, "failed to update chat info");
            }
        }
    }

    pub(super) fn send_message(&mut self, text: String) {
        if text.trim().is_empty() {
            return;
        }
        let Some(chat_id) = self.active_chat_id() else {
            tracing::debug!("send without an active chat");
            return;
        };

        self.sends_in_flight += 1;
        self.state.busy.sending_message = true;
        self.emit_state();

        let service = self.service.clone();
        self.spawn_task(async move {
            let result = service
                .send_message(&chat_id, &text)
                .await
                .map_err(|e| e.to_string());
            InternalEvent::MessageSent { chat_id, result }
        });
    }

    pub(super) fn apply_message_sent(&mut self, chat_id: &str, result: Result<(), String>) {
        self.sends_in_flight = self.sends_in_flight.saturating_sub(1);
        self.state.busy.sending_message = self.sends_in_flight > 0;
        match result {
            // The service assigns ids and ordering; refetch instead of inserting.
            Ok(()) => {
                self.emit_state();
                self.load_chat(chat_id);
            }
            Err(e) => {
                tracing::error!(%chat_id, err = %e, "failed to send message");
                self.toast(format!("Failed to send message: {e}"));
            }
        }
    }

    pub(super) fn delete_message(&mut self, message_id: String) {
        let Some(chat_id) = self.active_chat_id() else {
            return;
        };
        let service = self.service.clone();
        self.spawn_task(async move {
            let result = service
                .delete_message(&chat_id, &message_id)
                .await
                .map_err(|e| e.to_string());
            InternalEvent::MessageDeleted {
                chat_id,
                message_id,
                result,
            }
        });
    }

    pub(super) fn apply_message_deleted(&mut self, message_id: &str, result: Result<(), String>) {
        match result {
            Ok(()) => {
                reconcile::remove_message(&mut self.state.messages, message_id);
                self.drop_orphaned_edit();
                self.emit_state();
            }
            Err(e) => {
                tracing::error!(%message_id, err = %e, "failed to delete message");
                self.toast(format!("Failed to delete message: {e}"));
            }
        }
    }

    pub(super) fn start_edit(&mut self, message_id: &str) {
        let Some(message) = self.state.message(message_id) else {
            tracing::debug!(%message_id, "edit requested for unknown message");
            return;
        };
        self.state.pending_edit = Some(PendingEdit {
            target_message_id: message.id.clone(),
            draft_text: message.text.clone(),
        });
        self.emit_state();
    }

    pub(super) fn cancel_edit(&mut self) {
        if self.state.pending_edit.take().is_some() {
            self.emit_state();
        }
    }

    pub(super) fn commit_edit(&mut self, text: String) {
        let Some(pending) = self.state.pending_edit.clone() else {
            return;
        };
        if text.trim().is_empty() {
            return;
        }
        let Some(chat_id) = self.active_chat_id() else {
            return;
        };

        self.state.busy.saving_edit = true;
        self.emit_state();

        let service = self.service.clone();
        let message_id = pending.target_message_id;
        self.spawn_task(async move {
            let result = service
                .update_message(&chat_id, &message_id, &text)
                .await
                .map_err(|e| e.to_string());
            InternalEvent::MessageEdited {
                chat_id,
                message_id,
                text,
                result,
            }
        });
    }

    pub(super) fn apply_message_edited(
        &mut self,
        message_id: &str,
        text: &str,
        result: Result<(), String>,
    ) {
        self.state.busy.saving_edit = false;
        match result {
            Ok(()) => {
                reconcile::patch_text(&mut self.state.messages, message_id, text);
                let still_targeted = self
                    .state
                    .pending_edit
                    .as_ref()
                    .map(|p| p.target_message_id == message_id)
                    .unwrap_or(false);
                if still_targeted {
                    self.state.pending_edit = None;
                }
                self.emit_state();
            }
            Err(e) => {
                // Keep the pending edit so the user can retry.
                tracing::error!(%message_id, err = %e, "failed to update message");
                self.toast(format!("Failed to update message: {e}"));
            }
        }
    }

    pub(super) fn apply_chat_event(&mut self, chat_id: &str, event: ChatEvent) {
        tracing::debug!(%chat_id, event = event.tag(), "realtime event");
        match event {
            ChatEvent::SendMessage => self.load_chat(chat_id),
            ChatEvent::EditMessage { message_id, text } => {
                if reconcile::patch_text(&mut self.state.messages, &message_id, &text) {
                    self.emit_state();
                }
                self.refresh_chat_info(chat_id);
            }
            ChatEvent::DeleteMessage { message_id } => {
                if reconcile::remove_message(&mut self.state.messages, &message_id) {
                    self.drop_orphaned_edit();
                    self.emit_state();
                }
                self.refresh_chat_info(chat_id);
            }
        }
    }

    /// A pending edit cannot outlive the message it targets.
    fn drop_orphaned_edit(&mut self) {
        let orphaned = self
            .state
            .pending_edit
            .as_ref()
            .map(|p| self.state.message(&p.target_message_id).is_none())
            .unwrap_or(false);
        if orphaned {
            self.state.pending_edit = None;
        }
    }
}
