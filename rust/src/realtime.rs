//! Realtime notification channel: typed chat events, the connector seam, and
//! the Centrifugo websocket connector.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use flume::Sender;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

use crate::service::{opaque_id, ChatService};
use crate::updates::{CoreMsg, InternalEvent};

/// A publication on a chat channel, validated at the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    SendMessage,
    EditMessage { message_id: String, text: String },
    DeleteMessage { message_id: String },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EventParseError {
    #[error("publication has no type")]
    MissingType,
    #[error("unknown publication type {0:?}")]
    UnknownType(String),
    #[error("malformed {kind} payload: {reason}")]
    Malformed { kind: &'static str, reason: String },
}

#[derive(Debug, Deserialize)]
struct EditPayload {
    #[serde(rename = "messageId", deserialize_with = "opaque_id")]
    message_id: String,
    text: String,
}

#[derive(Debug, Deserialize)]
struct DeletePayload {
    #[serde(rename = "messageId", deserialize_with = "opaque_id")]
    message_id: String,
}

impl ChatEvent {
    /// Parses a `{type, data}` publication envelope.
    pub fn from_publication(value: &Value) -> Result<Self, EventParseError> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(EventParseError::MissingType)?;
        let data = value.get("data").cloned().unwrap_or(Value::Null);
        match kind {
            "send_message" => Ok(ChatEvent::SendMessage),
            "edit_message" => {
                let p: EditPayload =
                    serde_json::from_value(data).map_err(|e| EventParseError::Malformed {
                        kind: "edit_message",
                        reason: e.to_string(),
                    })?;
                Ok(ChatEvent::EditMessage {
                    message_id: p.message_id,
                    text: p.text,
                })
            }
            "delete_message" => {
                let p: DeletePayload =
                    serde_json::from_value(data).map_err(|e| EventParseError::Malformed {
                        kind: "delete_message",
                        reason: e.to_string(),
                    })?;
                Ok(ChatEvent::DeleteMessage {
                    message_id: p.message_id,
                })
            }
            other => Err(EventParseError::UnknownType(other.to_string())),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            ChatEvent::SendMessage => "send_message",
            ChatEvent::EditMessage { .. } => "edit_message",
            ChatEvent::DeleteMessage { .. } => "delete_message",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    Connecting,
    Connected,
    Disconnected { reason: String },
    Failed { reason: String },
}

/// Delivery end of one chat subscription. Once the owning subscription is
/// closed the sink goes quiet, so a connector can never feed a stale chat.
#[derive(Clone)]
pub struct RealtimeSink {
    chat_id: String,
    generation: u64,
    alive: Arc<AtomicBool>,
    core_sender: Sender<CoreMsg>,
}

impl RealtimeSink {
    pub(crate) fn new(
        chat_id: String,
        generation: u64,
        alive: Arc<AtomicBool>,
        core_sender: Sender<CoreMsg>,
    ) -> Self {
        Self {
            chat_id,
            generation,
            alive,
            core_sender,
        }
    }

    /// Channel name for this subscription.
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn status(&self, status: LinkStatus) {
        if !self.is_alive() {
            return;
        }
        let _ = self
            .core_sender
            .send(CoreMsg::Internal(Box::new(InternalEvent::RealtimeStatus {
                chat_id: self.chat_id.clone(),
                generation: self.generation,
                status,
            })));
    }

    /// Validates a raw publication and forwards it to the core. Unrecognized
    /// payloads are dropped with a warning.
    pub fn publish(&self, payload: &Value) {
        if !self.is_alive() {
            return;
        }
        let event = match ChatEvent::from_publication(payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(chat_id = %self.chat_id, err = %e, "dropping realtime publication");
                return;
            }
        };
        let _ = self.core_sender.send(CoreMsg::Internal(Box::new(
            InternalEvent::RealtimePublication {
                chat_id: self.chat_id.clone(),
                generation: self.generation,
                event,
            },
        )));
    }
}

/// Opens the realtime link for one chat. `run` drives the link until it ends;
/// the core aborts the task when the subscription is closed.
#[async_trait::async_trait]
pub trait RealtimeConnector: Send + Sync + 'static {
    async fn run(&self, sink: RealtimeSink) -> anyhow::Result<()>;
}

/// Centrifugo JSON protocol client over a websocket.
pub struct CentrifugoConnector {
    service: Arc<dyn ChatService>,
}

impl CentrifugoConnector {
    pub fn new(service: Arc<dyn ChatService>) -> Self {
        Self { service }
    }
}

const CONNECT_CMD_ID: u32 = 1;
const SUBSCRIBE_CMD_ID: u32 = 2;

#[derive(Debug, Default, Deserialize)]
struct Reply {
    id: Option<u32>,
    error: Option<ReplyError>,
    connect: Option<Value>,
    subscribe: Option<Value>,
    push: Option<Push>,
}

#[derive(Debug, Deserialize)]
struct ReplyError {
    code: u32,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct Push {
    #[serde(default)]
    channel: String,
    #[serde(rename = "pub")]
    publication: Option<Publication>,
    disconnect: Option<PushDisconnect>,
}

#[derive(Debug, Deserialize)]
struct Publication {
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct PushDisconnect {
    #[serde(default)]
    code: u32,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, PartialEq)]
enum Frame {
    Ping,
    Connected,
    Subscribed,
    Publication { channel: String, data: Value },
    Disconnect { reason: String },
    Error { id: Option<u32>, reason: String },
    Other,
}

fn classify(line: &str) -> anyhow::Result<Frame> {
    let reply: Reply = serde_json::from_str(line).context("decode realtime frame")?;
    if let Some(err) = reply.error {
        return Ok(Frame::Error {
            id: reply.id,
            reason: format!("{} {}", err.code, err.message).trim().to_string(),
        });
    }
    if let Some(push) = reply.push {
        if let Some(publication) = push.publication {
            return Ok(Frame::Publication {
                channel: push.channel,
                data: publication.data,
            });
        }
        if let Some(d) = push.disconnect {
            return Ok(Frame::Disconnect {
                reason: format!("{} {}", d.code, d.reason).trim().to_string(),
            });
        }
        return Ok(Frame::Other);
    }
    match reply.id {
        Some(CONNECT_CMD_ID) if reply.connect.is_some() => Ok(Frame::Connected),
        Some(SUBSCRIBE_CMD_ID) if reply.subscribe.is_some() => Ok(Frame::Subscribed),
        None if reply.connect.is_none() && reply.subscribe.is_none() => Ok(Frame::Ping),
        _ => Ok(Frame::Other),
    }
}

fn text_frame(v: Value) -> Message {
    Message::Text(v.to_string().into())
}

#[async_trait::async_trait]
impl RealtimeConnector for CentrifugoConnector {
    async fn run(&self, sink: RealtimeSink) -> anyhow::Result<()> {
        sink.status(LinkStatus::Connecting);
        let token = self
            .service
            .fetch_realtime_token()
            .await
            .context("fetch realtime token")?;
        tracing::info!(url = %token.url, chat_id = %sink.chat_id(), "realtime connecting");

        let (ws, _) = tokio_tungstenite::connect_async(token.url.as_str())
            .await
            .with_context(|| format!("connect realtime websocket {}", token.url))?;
        let (mut write, mut read) = ws.split();

        write
            .send(text_frame(
                json!({ "id": CONNECT_CMD_ID, "connect": { "token": token.token } }),
            ))
            .await
            .context("send connect command")?;
        write
            .send(text_frame(
                json!({ "id": SUBSCRIBE_CMD_ID, "subscribe": { "channel": sink.chat_id() } }),
            ))
            .await
            .context("send subscribe command")?;

        while let Some(msg) = read.next().await {
            let msg = msg.context("read realtime frame")?;
            let text = match msg {
                Message::Text(text) => text,
                Message::Close(frame) => {
                    let reason = frame
                        .map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str()))
                        .unwrap_or_else(|| "closed".into());
                    tracing::info!(chat_id = %sink.chat_id(), %reason, "realtime disconnected");
                    sink.status(LinkStatus::Disconnected { reason });
                    return Ok(());
                }
                _ => continue,
            };
            // The server may batch several replies into one frame.
            for line in text.as_str().lines().filter(|l| !l.trim().is_empty()) {
                let frame = match classify(line) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(err = %format!("{e:#}"), "ignoring undecodable realtime frame");
                        continue;
                    }
                };
                match frame {
                    Frame::Ping => {
                        write
                            .send(text_frame(json!({})))
                            .await
                            .context("send pong")?;
                    }
                    Frame::Connected => {
                        tracing::info!(transport = "websocket", "realtime connected");
                    }
                    Frame::Subscribed => {
                        tracing::info!(chat_id = %sink.chat_id(), "realtime subscribed");
                        sink.status(LinkStatus::Connected);
                    }
                    Frame::Publication { channel, data } => {
                        if channel != sink.chat_id() {
                            tracing::debug!(%channel, "publication for another channel");
                            continue;
                        }
                        sink.publish(&data);
                    }
                    Frame::Disconnect { reason } => {
                        tracing::info!(chat_id = %sink.chat_id(), %reason, "realtime disconnected");
                        sink.status(LinkStatus::Disconnected { reason });
                        return Ok(());
                    }
                    Frame::Error { id, reason } => {
                        anyhow::bail!("realtime command {id:?} rejected: {reason}");
                    }
                    Frame::Other => {}
                }
            }
        }

        sink.status(LinkStatus::Disconnected {
            reason: "connection closed".into(),
        });
        Ok(())
    }
}
