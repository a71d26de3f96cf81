// Realtime subscription lifecycle for the active chat.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinHandle;

use super::*;
use crate::realtime::{LinkStatus, RealtimeSink};

/// The single live realtime link. Dropping it closes the link: the sink goes
/// quiet first, then the connector task is aborted.
pub(super) struct Subscription {
    chat_id: String,
    generation: u64,
    alive: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Subscription {
    fn open(
        runtime: &tokio::runtime::Runtime,
        connector: Arc<dyn RealtimeConnector>,
        core_sender: Sender<CoreMsg>,
        chat_id: String,
        generation: u64,
    ) -> Self {
        let alive = Arc::new(AtomicBool::new(true));
        let sink = RealtimeSink::new(chat_id.clone(), generation, alive.clone(), core_sender);
        let task = runtime.spawn(async move {
            if let Err(e) = connector.run(sink.clone()).await {
                let reason = format!("{e:#}");
                tracing::error!(chat_id = %sink.chat_id(), err = %reason, "realtime link failed");
                sink.status(LinkStatus::Failed { reason });
            }
        });
        tracing::info!(%chat_id, generation, "realtime subscription opened");
        Self {
            chat_id,
            generation,
            alive,
            task,
        }
    }

    pub(super) fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        self.task.abort();
        tracing::info!(chat_id = %self.chat_id, generation = self.generation, "realtime subscription closed");
    }
}

impl AppCore {
    /// Replaces any existing subscription with one for `chat_id`.
    pub(super) fn subscribe(&mut self, chat_id: &str) {
        self.close_subscription();
        if !self.network_enabled() {
            tracing::info!(%chat_id, "network disabled; realtime subscription skipped");
            return;
        }
        self.subscription_generation += 1;
        self.subscription = Some(Subscription::open(
            &self.runtime,
            self.connector.clone(),
            self.core_sender.clone(),
            chat_id.to_string(),
            self.subscription_generation,
        ));
        self.state.connection = ConnectionState::Connecting;
    }

    pub(super) fn close_subscription(&mut self) {
        // Dropping the handle releases the link exactly once.
        self.subscription = None;
        self.state.connection = ConnectionState::Disconnected;
    }

    /// No live link for the active chat: never opened, failed or closed by the
    /// server.
    pub(super) fn link_is_down(&self) -> bool {
        self.subscription.is_none()
            || matches!(
                self.state.connection,
                ConnectionState::Failed { .. } | ConnectionState::Disconnected
            )
    }

    pub(super) fn is_current_subscription(&self, generation: u64) -> bool {
        self.subscription
            .as_ref()
            .map(|s| s.generation() == generation)
            .unwrap_or(false)
    }

    pub(super) fn apply_link_status(&mut self, status: LinkStatus) {
        match status {
            LinkStatus::Connecting => self.set_connection(ConnectionState::Connecting),
            LinkStatus::Connected => self.set_connection(ConnectionState::Connected),
            LinkStatus::Disconnected { reason } => {
                tracing::info!(%reason, "realtime link closed by server");
                self.set_connection(ConnectionState::Disconnected);
            }
            LinkStatus::Failed { reason } => {
                self.state.connection = ConnectionState::Failed {
                    reason: reason.clone(),
                };
                self.toast(format!("Live updates unavailable: {reason}"));
            }
        }
    }
}
