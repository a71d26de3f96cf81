//! Client for the remote chat REST service.

use std::time::Duration;

use reqwest::{StatusCode, Url};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::state::{ChatMessage, Member};

/// Failures talking to the chat service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("invalid chat service url {0:?}")]
    InvalidBaseUrl(String),
    #[error("{action}: request failed: {source}")]
    Transport {
        action: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{action} failed: {status}")]
    Status {
        action: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("decode {action} response: {source}")]
    Decode {
        action: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

/// `fetchChatHistory` payload. `chats` holds the messages, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatHistory {
    #[serde(default)]
    pub chat_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub chats: Option<Vec<ChatMessage>>,
}

/// Connection parameters for the realtime service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeToken {
    pub url: String,
    pub token: String,
}

#[derive(Debug, Deserialize)]
struct MembersResponse {
    #[serde(default)]
    members: Vec<Member>,
}

#[derive(Debug, Deserialize)]
struct ProfilesResponse {
    #[serde(default)]
    profiles: Vec<Member>,
}

#[derive(Debug, Serialize)]
struct TextBody<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct AddMembersBody<'a> {
    members: &'a [String],
}

/// Accepts a JSON string or number and keeps it as an opaque string.
pub(crate) fn opaque_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(D::Error::custom(format!("unsupported id: {other}"))),
    }
}

#[async_trait::async_trait]
pub trait ChatService: Send + Sync + 'static {
    async fn fetch_chat_history(&self, chat_id: &str) -> Result<ChatHistory, ServiceError>;
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), ServiceError>;
    async fn update_message(
        &self,
        chat_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<(), ServiceError>;
    async fn delete_message(&self, chat_id: &str, message_id: &str) -> Result<(), ServiceError>;
    async fn fetch_chat_members(&self, chat_id: &str) -> Result<Vec<Member>, ServiceError>;
    async fn add_chat_members(
        &self,
        chat_id: &str,
        usernames: &[String],
    ) -> Result<(), ServiceError>;
    async fn delete_chat_member(&self, chat_id: &str, username: &str)
        -> Result<(), ServiceError>;
    async fn search_profiles(&self, query: &str) -> Result<Vec<Member>, ServiceError>;
    async fn fetch_realtime_token(&self) -> Result<RealtimeToken, ServiceError>;
}

/// `ChatService` over HTTP/JSON. Keeps a cookie store so session cookies set
/// by the service are sent back on every call.
#[derive(Debug)]
pub struct HttpChatService {
    client: reqwest::Client,
    base_url: Url,
    api_token: Option<String>,
}

impl HttpChatService {
    pub fn new(
        base_url: &str,
        api_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let trimmed = base_url.trim();
        let base_url = Url::parse(trimmed)
            .ok()
            .filter(|u| !u.cannot_be_a_base())
            .ok_or_else(|| ServiceError::InvalidBaseUrl(trimmed.to_string()))?;
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .build()
            .map_err(|source| ServiceError::Transport {
                action: "build http client",
                source,
            })?;
        Ok(Self {
            client,
            base_url,
            api_token: api_token
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Joins `segments` onto the base url, percent-encoding each one.
    fn endpoint(&self, segments: &[&str], trailing_slash: bool) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            path.extend(segments);
            if trailing_slash {
                path.push("");
            }
        }
        url
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        action: &'static str,
    ) -> Result<reqwest::Response, ServiceError> {
        let resp = self
            .request(builder)
            .send()
            .await
            .map_err(|source| ServiceError::Transport { action, source })?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        tracing::debug!(action, %status, body = %body, "chat service rejected request");
        Err(ServiceError::Status {
            action,
            status,
            body,
        })
    }

    async fn decode<T: for<'de> Deserialize<'de>>(
        resp: reqwest::Response,
        action: &'static str,
    ) -> Result<T, ServiceError> {
        resp.json::<T>()
            .await
            .map_err(|source| ServiceError::Decode { action, source })
    }
}

#[async_trait::async_trait]
impl ChatService for HttpChatService {
    async fn fetch_chat_history(&self, chat_id: &str) -> Result<ChatHistory, ServiceError> {
        let url = self.endpoint(&["chats", chat_id], true);
        let resp = self
            .send(self.client.get(url), "fetch chat history")
            .await?;
        Self::decode(resp, "fetch chat history").await
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), ServiceError> {
        let url = self.endpoint(&["chats", chat_id, "messages"], true);
        self.send(
            self.client.post(url).json(&TextBody { text }),
            "send message",
        )
        .await?;
        Ok(())
    }

    async fn update_message(
        &self,
        chat_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<(), ServiceError> {
        let url = self.endpoint(&["chats", chat_id, "messages", message_id], true);
        self.send(
            self.client.patch(url).json(&TextBody { text }),
            "update message",
        )
        .await?;
        Ok(())
    }

    async fn delete_message(&self, chat_id: &str, message_id: &str) -> Result<(), ServiceError> {
        let url = self.endpoint(&["chats", chat_id, "messages", message_id], true);
        self.send(self.client.delete(url), "delete message").await?;
        Ok(())
    }

    async fn fetch_chat_members(&self, chat_id: &str) -> Result<Vec<Member>, ServiceError> {
        let url = self.endpoint(&["chats", chat_id, "members"], true);
        let resp = self
            .send(self.client.get(url), "fetch chat members")
            .await?;
        let body: MembersResponse = Self::decode(resp, "fetch chat members").await?;
        Ok(body.members)
    }

    async fn add_chat_members(
        &self,
        chat_id: &str,
        usernames: &[String],
    ) -> Result<(), ServiceError> {
        let url = self.endpoint(&["chats", chat_id, "members"], true);
        self.send(
            self.client.post(url).json(&AddMembersBody { members: usernames }),
            "add chat members",
        )
        .await?;
        Ok(())
    }

    async fn delete_chat_member(
        &self,
        chat_id: &str,
        username: &str,
    ) -> Result<(), ServiceError> {
        let url = self.endpoint(&["chats", chat_id, "members", username], true);
        self.send(self.client.delete(url), "delete chat member")
            .await?;
        Ok(())
    }

    async fn search_profiles(&self, query: &str) -> Result<Vec<Member>, ServiceError> {
        let url = self.endpoint(&["profiles", "search"], true);
        let resp = self
            .send(
                self.client.get(url).query(&[("query", query)]),
                "search profiles",
            )
            .await?;
        let body: ProfilesResponse = Self::decode(resp, "search profiles").await?;
        Ok(body.profiles)
    }

    async fn fetch_realtime_token(&self) -> Result<RealtimeToken, ServiceError> {
        let url = self.endpoint(&["chats", "get-cent-token"], false);
        let resp = self
            .send(self.client.get(url), "fetch realtime token")
            .await?;
        Self::decode(resp, "fetch realtime token").await
    }
}
