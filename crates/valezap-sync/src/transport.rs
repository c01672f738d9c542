//! Network channels: history fetch, send, and the live event stream.
//!
//! Every inbound payload is normalized into a [`Message`] before it leaves
//! this module; malformed entries are logged and skipped, never fatal.

use std::pin::Pin;
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tracing::{debug, warn, Level};
use valezap_observability::{emit_event, ObservabilityEvent, ProcessKind};
use valezap_types::{ConversationKey, HistoryResponse, Message, SendRequest, SendResponse, WireMessage};

use crate::config::{ClientConfig, HISTORY_PATH, SEND_PATH, STREAM_PATH};
use crate::error::SyncError;
use crate::sse::SseDecoder;

/// Live messages in arrival order. The stream ends after yielding exactly one
/// `Err`; a clean server close is reported as [`SyncError::Stream`] too.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<Message, SyncError>> + Send>>;

/// What a successful send brought back. Either part may be absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendOutcome {
    pub record: Option<Message>,
    pub reply: Option<Message>,
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn fetch_history(&self, conversation: &ConversationKey) -> Result<Vec<Message>, SyncError>;

    async fn send(&self, conversation: &ConversationKey, text: &str) -> Result<SendOutcome, SyncError>;

    async fn open_stream(&self, conversation: &ConversationKey) -> Result<MessageStream, SyncError>;
}

fn add_auth(rb: reqwest::RequestBuilder, api_key: &str) -> reqwest::RequestBuilder {
    if api_key.is_empty() {
        rb
    } else {
        rb.header("x-api-key", api_key)
    }
}

fn conversation_query(conversation: &ConversationKey) -> [(&'static str, &str); 2] {
    [
        ("sessao", conversation.session_id.as_str()),
        ("player", conversation.player_id.as_str()),
    ]
}

/// Log a payload that could not be turned into a message.
fn report_malformed(process: ProcessKind, conversation: &ConversationKey, source: &str, detail: &str) {
    warn!("skipping malformed {source} payload: {detail}");
    emit_event(
        Level::WARN,
        process,
        ObservabilityEvent {
            event: "payload.malformed",
            component: source,
            session_id: Some(&conversation.session_id),
            player_id: Some(&conversation.player_id),
            error_code: Some("MALFORMED_PAYLOAD"),
            detail: Some(detail),
            ..Default::default()
        },
    );
}

fn value_to_message(value: Value, conversation: &ConversationKey) -> Result<Option<Message>, serde_json::Error> {
    Ok(WireMessage::parse(value)?.into_message(conversation))
}

/// reqwest-backed transport against the Valezap HTTP API.
#[derive(Clone)]
pub struct HttpTransport {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    stream_client: reqwest::Client,
    process: ProcessKind,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(config.send_timeout)
            .build()?;
        // No overall timeout: the stream is meant to stay open.
        let stream_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            base_url: config.base_url().to_string(),
            api_key: config.api_key.clone(),
            client,
            stream_client,
            process: ProcessKind::Chat,
        })
    }

    pub fn with_process(mut self, process: ProcessKind) -> Self {
        self.process = process;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, SyncError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(SyncError::Status {
            status: status.as_u16(),
            body: truncate(&body, 300),
        })
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn fetch_history(&self, conversation: &ConversationKey) -> Result<Vec<Message>, SyncError> {
        let resp = self
            .client
            .get(self.url(HISTORY_PATH))
            .query(&conversation_query(conversation))
            .send()
            .await?;
        let body = Self::check_status(resp).await?.text().await?;
        let page: HistoryResponse = serde_json::from_str(&body)?;

        let mut messages = Vec::new();
        for item in page.into_items() {
            match value_to_message(item, conversation) {
                Ok(Some(message)) => messages.push(message),
                Ok(None) => debug!("history entry without text skipped"),
                Err(e) => report_malformed(self.process, conversation, "history", &e.to_string()),
            }
        }
        Ok(messages)
    }

    async fn send(&self, conversation: &ConversationKey, text: &str) -> Result<SendOutcome, SyncError> {
        let resp = add_auth(self.client.post(self.url(SEND_PATH)), &self.api_key)
            .json(&SendRequest::new(conversation, text))
            .send()
            .await?;
        let body = Self::check_status(resp).await?.text().await?;

        // The server accepted the message; an unreadable body only loses the
        // echo, which the live stream delivers anyway.
        let parsed = match SendResponse::parse(&body) {
            Ok(parsed) => parsed,
            Err(e) => {
                report_malformed(self.process, conversation, "send", &e.to_string());
                return Ok(SendOutcome::default());
            }
        };

        let convert = |value: Option<&Value>| {
            let value = value?.clone();
            match value_to_message(value, conversation) {
                Ok(message) => message,
                Err(e) => {
                    report_malformed(self.process, conversation, "send", &e.to_string());
                    None
                }
            }
        };
        let record = convert(parsed.record());
        let reply = convert(parsed.reply());
        Ok(SendOutcome { record, reply })
    }

    async fn open_stream(&self, conversation: &ConversationKey) -> Result<MessageStream, SyncError> {
        let resp = self
            .stream_client
            .get(self.url(STREAM_PATH))
            .query(&conversation_query(conversation))
            .header("Accept", "text/event-stream")
            .send()
            .await?;
        let resp = Self::check_status(resp).await?;

        let conversation = conversation.clone();
        let process = self.process;
        let mut bytes = resp.bytes_stream();
        let stream = stream! {
            let mut decoder = SseDecoder::new();
            loop {
                let chunk = match bytes.next().await {
                    Some(Ok(chunk)) => chunk,
                    Some(Err(e)) => {
                        yield Err(SyncError::Stream(e.to_string()));
                        break;
                    }
                    None => {
                        yield Err(SyncError::Stream("server closed the event stream".to_string()));
                        break;
                    }
                };
                for payload in decoder.push(&chunk) {
                    match WireMessage::parse_str(&payload) {
                        Ok(wire) => match wire.into_message(&conversation) {
                            Some(message) => yield Ok(message),
                            None => debug!("stream event without text skipped"),
                        },
                        Err(e) => report_malformed(process, &conversation, "stream", &e.to_string()),
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééééé", 2), "éé...");
    }

    #[test]
    fn api_key_is_optional() {
        let client = reqwest::Client::new();
        let req = add_auth(client.get("http://localhost/"), "").build().unwrap();
        assert!(req.headers().get("x-api-key").is_none());
        let req = add_auth(client.get("http://localhost/"), "k1").build().unwrap();
        assert_eq!(req.headers().get("x-api-key").unwrap(), "k1");
    }

    #[test]
    fn query_uses_backend_parameter_names() {
        let key = ConversationKey::new("s1", "p1");
        let q = conversation_query(&key);
        assert_eq!(q, [("sessao", "s1"), ("player", "p1")]);
    }
}
