mod chat;
pub(crate) mod config;
mod membership;
mod subscription;

use std::future::Future;
use std::sync::{Arc, RwLock};

use flume::Sender;

use crate::actions::AppAction;
use crate::realtime::RealtimeConnector;
use crate::service::ChatService;
use crate::state::{AppState, BusyState, ConnectionState};
use crate::updates::{AppUpdate, CoreMsg, InternalEvent};

pub struct AppCore {
    pub state: AppState,
    rev: u64,

    update_sender: Sender<AppUpdate>,
    core_sender: Sender<CoreMsg>,
    shared_state: Arc<RwLock<AppState>>,

    config: config::AppConfig,
    runtime: tokio::runtime::Runtime,

    service: Arc<dyn ChatService>,
    connector: Arc<dyn RealtimeConnector>,

    subscription: Option<subscription::Subscription>,
    subscription_generation: u64,

    // Overlapping full loads / sends for the active chat; busy flags stay up
    // until the last one resolves.
    loads_in_flight: u32,
    sends_in_flight: u32,
}

impl AppCore {
    pub(crate) fn new(
        update_sender: Sender<AppUpdate>,
        core_sender: Sender<CoreMsg>,
        config: config::AppConfig,
        shared_state: Arc<RwLock<AppState>>,
        service: Arc<dyn ChatService>,
        connector: Arc<dyn RealtimeConnector>,
    ) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .enable_io()
            .build()
            .expect("tokio runtime");

        let this = Self {
            state: AppState::empty(),
            rev: 0,
            update_sender,
            core_sender,
            shared_state,
            config,
            runtime,
            service,
            connector,
            subscription: None,
            subscription_generation: 0,
            loads_in_flight: 0,
            sends_in_flight: 0,
        };

        // Ensure ChatApp.state() has an immediately-available snapshot.
        let snapshot = this.state.clone();
        this.commit_state_snapshot(&snapshot);
        this
    }

    fn next_rev(&mut self) -> u64 {
        self.rev += 1;
        self.state.rev = self.rev;
        self.rev
    }

    fn commit_state_snapshot(&self, snapshot: &AppState) {
        match self.shared_state.write() {
            Ok(mut g) => *g = snapshot.clone(),
            Err(poison) => *poison.into_inner() = snapshot.clone(),
        }
    }

    fn emit_state(&mut self) {
        self.next_rev();
        let snapshot = self.state.clone();
        self.commit_state_snapshot(&snapshot);
        let _ = self.update_sender.send(AppUpdate::FullState(snapshot));
    }

    fn toast(&mut self, msg: impl Into<String>) {
        // Kept until the UI clears it, so a snapshot taken later still shows it.
        self.state.toast = Some(msg.into());
        self.emit_state();
    }

    fn active_chat_id(&self) -> Option<String> {
        self.state.active_chat_id.clone()
    }

    /// Runs `fut` on the core runtime and feeds its result back into the actor.
    fn spawn_task<F>(&self, fut: F)
    where
        F: Future<Output = InternalEvent> + Send + 'static,
    {
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let event = fut.await;
            let _ = tx.send(CoreMsg::Internal(Box::new(event)));
        });
    }

    /// Forgets everything tied to the active chat.
    fn reset_chat_state(&mut self) {
        self.state.messages = vec![];
        self.state.chat_info = None;
        self.state.pending_edit = None;
        self.state.membership = None;
        self.state.busy = BusyState::idle();
        self.loads_in_flight = 0;
        self.sends_in_flight = 0;
    }

    pub fn handle_message(&mut self, msg: CoreMsg) {
        match msg {
            CoreMsg::Action(action) => {
                // Never log `?action` directly: it carries message text.
                tracing::info!(action = action.tag(), "dispatch");
                self.handle_action(action);
            }
            CoreMsg::Internal(internal) => self.handle_internal(*internal),
            CoreMsg::Shutdown => {
                tracing::info!("core shutting down");
                self.close_subscription();
            }
        }
    }

    fn handle_action(&mut self, action: AppAction) {
        match action {
            // Chat window
            AppAction::OpenChat { chat_id } => self.open_chat(&chat_id),
            AppAction::ReloadChat => {
                if let Some(chat_id) = self.active_chat_id() {
                    self.load_chat(&chat_id);
                }
            }
            AppAction::CloseChat => self.close_chat(),

            // Messages
            AppAction::SendMessage { text } => self.send_message(text),
            AppAction::DeleteMessage { message_id } => self.delete_message(message_id),
            AppAction::StartEdit { message_id } => self.start_edit(&message_id),
            AppAction::CancelEdit => self.cancel_edit(),
            AppAction::CommitEdit { text } => self.commit_edit(text),

            // Chat info panel
            AppAction::OpenChatInfo => self.open_chat_info(),
            AppAction::CloseChatInfo => self.close_chat_info(),
            AppAction::SearchProfiles { query } => self.search_profiles(query),
            AppAction::ToggleProfileSelection { username } => {
                self.toggle_profile_selection(&username)
            }
            AppAction::AddSelectedMembers => self.add_selected_members(),
            AppAction::RemoveMember { username } => self.remove_member(username),

            // UI
            AppAction::ClearToast => {
                if self.state.toast.take().is_some() {
                    self.emit_state();
                }
            }
        }
    }

    fn handle_internal(&mut self, internal: InternalEvent) {
        // Results issued for a chat the user has since left are stale.
        if !self.state.is_active_chat(internal.chat_id()) {
            tracing::debug!(chat_id = internal.chat_id(), "dropping result for inactive chat");
            return;
        }

        match internal {
            InternalEvent::ChatLoaded { chat_id, result } => {
                self.apply_chat_loaded(chat_id, result)
            }
            InternalEvent::ChatInfoRefreshed { chat_id, result } => {
                self.apply_chat_info_refreshed(chat_id, result)
            }
            InternalEvent::MessageSent { chat_id, result } => {
                self.apply_message_sent(&chat_id, result)
            }
            InternalEvent::MessageDeleted {
                message_id, result, ..
            } => self.apply_message_deleted(&message_id, result),
            InternalEvent::MessageEdited {
                message_id,
                text,
                result,
                ..
            } => self.apply_message_edited(&message_id, &text, result),
            InternalEvent::RealtimeStatus {
                generation, status, ..
            } => {
                if self.is_current_subscription(generation) {
                    self.apply_link_status(status);
                }
            }
            InternalEvent::RealtimePublication {
                chat_id,
                generation,
                event,
            } => {
                if !self.is_current_subscription(generation) {
                    tracing::debug!(%chat_id, generation, "dropping event from closed subscription");
                    return;
                }
                self.apply_chat_event(&chat_id, event);
            }
            InternalEvent::MembersFetched { result, .. } => self.apply_members_fetched(result),
            InternalEvent::ProfilesSearched { query, result, .. } => {
                self.apply_profiles_searched(&query, result)
            }
            InternalEvent::MembersAdded {
                chat_id,
                added,
                result,
            } => self.apply_members_added(&chat_id, added, result),
            InternalEvent::MemberRemoved {
                chat_id,
                username,
                result,
            } => self.apply_member_removed(&chat_id, &username, result),
        }
    }

    fn set_connection(&mut self, connection: ConnectionState) {
        if self.state.connection != connection {
            self.state.connection = connection;
            self.emit_state();
        }
    }
}
