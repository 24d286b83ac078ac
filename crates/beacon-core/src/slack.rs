//! Minimal blocking client for the Slack Web API methods beacon needs.
//!
//! `chat.postMessage` and `chat.update` take JSON bodies; every other method
//! is sent form-encoded. A response with `"ok": false` is an API error
//! carrying Slack's error code. Transport failures, HTTP 429, and 5xx are
//! retried with backoff; API errors are not.

use crate::config::RetryPolicy;
use crate::error::BeaconError;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_API_URL: &str = "https://slack.com/api";
const PAGE_LIMIT: &str = "200";

#[derive(Debug, Error)]
pub enum SlackError {
    #[error("{method}: transport error: {reason}")]
    Transport { method: String, reason: String },

    #[error("{method}: Slack API error: {code}")]
    Api { method: String, code: String },

    #[error("{method}: unexpected response: {reason}")]
    Decode { method: String, reason: String },
}

impl SlackError {
    fn is_transient(&self) -> bool {
        matches!(self, SlackError::Transport { .. })
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            SlackError::Api { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn is_message_missing(&self) -> bool {
        matches!(
            self.code(),
            Some("message_not_found") | Some("cant_update_message") | Some("cant_delete_message")
        )
    }

    /// Map a failure of a state-store call onto the store error kinds.
    pub fn into_store_error(self) -> BeaconError {
        if self.is_message_missing() {
            return BeaconError::NotFound(self.to_string());
        }
        BeaconError::StoreUnavailable(self.to_string())
    }

    /// Map a failure of an outward-message call onto the publish error kinds.
    pub fn into_publish_error(self) -> BeaconError {
        if self.is_message_missing() {
            return BeaconError::MessageNotFound(self.to_string());
        }
        BeaconError::PublishFailed(self.to_string())
    }
}

pub type SlackResult<T> = std::result::Result<T, SlackError>;

/// A message as returned by `conversations.history`.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryMessage {
    pub ts: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub bot_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryPage {
    #[serde(default)]
    messages: Vec<HistoryMessage>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct ChannelPage {
    #[serde(default)]
    channels: Vec<Channel>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct Channel {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: Option<String>,
}

fn next_cursor(meta: Option<ResponseMetadata>) -> Option<String> {
    meta.and_then(|m| m.next_cursor).filter(|c| !c.is_empty())
}

enum Body<'a> {
    Json(&'a Value),
    Form(&'a [(&'a str, String)]),
}

// ---------------------------------------------------------------------------
// SlackClient
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SlackClient {
    http: reqwest::blocking::Client,
    token: String,
    base_url: String,
    retry: RetryPolicy,
}

impl SlackClient {
    pub fn new(
        token: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> crate::Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(concat!("beacon/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BeaconError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            http,
            token: token.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry,
        })
    }

    fn call(&self, method: &str, body: Body<'_>) -> SlackResult<Value> {
        let mut attempt = 1;
        loop {
            match self.call_once(method, &body) {
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!(method, attempt, error = %e, ?delay, "retrying Slack call");
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn call_once(&self, method: &str, body: &Body<'_>) -> SlackResult<Value> {
        let url = format!("{}/{}", self.base_url, method);
        tracing::debug!(method, "Slack API call");
        let request = self.http.post(&url).bearer_auth(&self.token);
        let request = match body {
            Body::Json(v) => request.json(v),
            Body::Form(params) => request.form(params),
        };
        let transport = |reason: String| SlackError::Transport {
            method: method.to_string(),
            reason,
        };
        let response = request.send().map_err(|e| transport(e.to_string()))?;
        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(transport(format!("HTTP {status}")));
        }
        let value: Value = response.json().map_err(|e| SlackError::Decode {
            method: method.to_string(),
            reason: e.to_string(),
        })?;
        if value.get("ok").and_then(Value::as_bool) != Some(true) {
            let code = value
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown_error")
                .to_string();
            return Err(SlackError::Api {
                method: method.to_string(),
                code,
            });
        }
        Ok(value)
    }

    fn decode<T: serde::de::DeserializeOwned>(method: &str, value: Value) -> SlackResult<T> {
        serde_json::from_value(value).map_err(|e| SlackError::Decode {
            method: method.to_string(),
            reason: e.to_string(),
        })
    }

    // -----------------------------------------------------------------------
    // chat.*
    // -----------------------------------------------------------------------

    /// Post a message and return its `ts`.
    pub fn post_message(
        &self,
        channel: &str,
        text: &str,
        attachments: Option<&Value>,
    ) -> SlackResult<String> {
        let mut payload = json!({ "channel": channel, "text": text });
        if let Some(a) = attachments {
            payload["attachments"] = a.clone();
        }
        let value = self.call("chat.postMessage", Body::Json(&payload))?;
        value
            .get("ts")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SlackError::Decode {
                method: "chat.postMessage".to_string(),
                reason: "missing ts".to_string(),
            })
    }

    pub fn update_message(
        &self,
        channel: &str,
        ts: &str,
        text: &str,
        attachments: Option<&Value>,
    ) -> SlackResult<()> {
        let mut payload = json!({ "channel": channel, "ts": ts, "text": text });
        if let Some(a) = attachments {
            payload["attachments"] = a.clone();
        }
        self.call("chat.update", Body::Json(&payload))?;
        Ok(())
    }

    pub fn delete_message(&self, channel: &str, ts: &str) -> SlackResult<()> {
        let params = [("channel", channel.to_string()), ("ts", ts.to_string())];
        self.call("chat.delete", Body::Form(&params))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // conversations.*
    // -----------------------------------------------------------------------

    /// Every message in `channel`, following pagination to the end.
    pub fn history(&self, channel: &str) -> SlackResult<Vec<HistoryMessage>> {
        let mut all = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut params = vec![
                ("channel", channel.to_string()),
                ("limit", PAGE_LIMIT.to_string()),
            ];
            if let Some(c) = &cursor {
                params.push(("cursor", c.clone()));
            }
            let value = self.call("conversations.history", Body::Form(&params))?;
            let page: HistoryPage = Self::decode("conversations.history", value)?;
            all.extend(page.messages);
            cursor = next_cursor(page.response_metadata);
            if cursor.is_none() {
                return Ok(all);
            }
        }
    }

    /// The single message at `ts`, if it still exists.
    pub fn message_at(&self, channel: &str, ts: &str) -> SlackResult<Option<HistoryMessage>> {
        let params = [
            ("channel", channel.to_string()),
            ("latest", ts.to_string()),
            ("oldest", ts.to_string()),
            ("inclusive", "true".to_string()),
            ("limit", "1".to_string()),
        ];
        let value = self.call("conversations.history", Body::Form(&params))?;
        let page: HistoryPage = Self::decode("conversations.history", value)?;
        Ok(page.messages.into_iter().find(|m| m.ts == ts))
    }

    /// Resolve a channel name to its id across all pages of `conversations.list`.
    pub fn find_channel_id(&self, name: &str) -> SlackResult<Option<String>> {
        let wanted = name.trim_start_matches('#');
        let mut cursor: Option<String> = None;
        loop {
            let mut params = vec![
                ("types", "public_channel,private_channel".to_string()),
                ("limit", PAGE_LIMIT.to_string()),
            ];
            if let Some(c) = &cursor {
                params.push(("cursor", c.clone()));
            }
            let value = self.call("conversations.list", Body::Form(&params))?;
            let page: ChannelPage = Self::decode("conversations.list", value)?;
            if let Some(ch) = page.channels.into_iter().find(|c| c.name == wanted) {
                return Ok(Some(ch.id));
            }
            cursor = next_cursor(page.response_metadata);
            if cursor.is_none() {
                return Ok(None);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
