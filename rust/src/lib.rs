mod actions;
mod core;
mod logging;
mod realtime;
pub mod reconcile;
mod service;
mod state;
mod updates;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use flume::{Receiver, Sender};

pub use actions::AppAction;
pub use crate::core::config::{load_app_config, AppConfig};
pub use logging::init_logging;
pub use realtime::{
    CentrifugoConnector, ChatEvent, EventParseError, LinkStatus, RealtimeConnector, RealtimeSink,
};
pub use service::{ChatHistory, ChatService, HttpChatService, RealtimeToken, ServiceError};
pub use state::*;
pub use updates::*;

uniffi::setup_scaffolding!();

#[uniffi::export(callback_interface)]
pub trait AppReconciler: Send + Sync + 'static {
    fn reconcile(&self, update: AppUpdate);
}

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum ChatAppError {
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },
}

#[derive(uniffi::Object)]
pub struct ChatApp {
    core_tx: Sender<CoreMsg>,
    update_rx: Receiver<AppUpdate>,
    listening: AtomicBool,
    shared_state: Arc<RwLock<AppState>>,
}

#[uniffi::export]
impl ChatApp {
    #[uniffi::constructor]
    pub fn new(data_dir: String) -> Result<Arc<Self>, ChatAppError> {
        logging::init_logging();
        tracing::info!(data_dir = %data_dir, "ChatApp::new() starting");

        let config = load_app_config(&data_dir);
        let service = HttpChatService::new(
            &config.api_base_url(),
            config.api_token(),
            config.request_timeout(),
        )
        .map_err(|e| ChatAppError::InvalidConfig {
            message: e.to_string(),
        })?;
        let service: Arc<dyn ChatService> = Arc::new(service);
        let connector: Arc<dyn RealtimeConnector> =
            Arc::new(CentrifugoConnector::new(service.clone()));

        Ok(Self::start(config, service, connector))
    }

    pub fn state(&self) -> AppState {
        match self.shared_state.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    pub fn dispatch(&self, action: AppAction) {
        // Contract: never block caller.
        let _ = self.core_tx.send(CoreMsg::Action(action));
    }

    pub fn listen_for_updates(&self, reconciler: Box<dyn AppReconciler>) {
        if self
            .listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Avoid multiple listeners that would split messages.
            return;
        }

        let rx = self.update_rx.clone();
        thread::spawn(move || {
            while let Ok(update) = rx.recv() {
                reconciler.reconcile(update);
            }
        });
    }
}

impl ChatApp {
    /// Builds an app around caller-supplied backends. Config (network switch)
    /// is still read from `data_dir`; logging is left to the caller.
    pub fn with_backends(
        data_dir: &str,
        service: Arc<dyn ChatService>,
        connector: Arc<dyn RealtimeConnector>,
    ) -> Arc<Self> {
        let config = load_app_config(data_dir);
        Self::start(config, service, connector)
    }

    fn start(
        config: AppConfig,
        service: Arc<dyn ChatService>,
        connector: Arc<dyn RealtimeConnector>,
    ) -> Arc<Self> {
        let (update_tx, update_rx) = flume::unbounded();
        let (core_tx, core_rx) = flume::unbounded::<CoreMsg>();
        let shared_state = Arc::new(RwLock::new(AppState::empty()));

        // Actor loop thread (single threaded "app actor").
        let core_tx_for_core = core_tx.clone();
        let shared_for_core = shared_state.clone();
        thread::spawn(move || {
            let mut core = crate::core::AppCore::new(
                update_tx,
                core_tx_for_core,
                config,
                shared_for_core,
                service,
                connector,
            );
            while let Ok(msg) = core_rx.recv() {
                let stop = matches!(msg, CoreMsg::Shutdown);
                core.handle_message(msg);
                if stop {
                    break;
                }
            }
        });

        Arc::new(Self {
            core_tx,
            update_rx,
            listening: AtomicBool::new(false),
            shared_state,
        })
    }
}

impl Drop for ChatApp {
    fn drop(&mut self) {
        let _ = self.core_tx.send(CoreMsg::Shutdown);
    }
}
