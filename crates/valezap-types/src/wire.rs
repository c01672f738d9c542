//! JSON shapes exchanged with the chat backend.
//!
//! The backend stores messages as `{id, session_id, message, is_from_user,
//! created_at}` while newer callers speak `{id, text, origin}`. Both spellings
//! are accepted on the way in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::message::{ConversationKey, LifecycleState, Message, Origin};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: Option<String>,
    #[serde(default, alias = "sessionId", alias = "sessao")]
    pub session_id: Option<String>,
    #[serde(default, alias = "playerId", alias = "player")]
    pub player_id: Option<String>,
    // Separate fields rather than aliases: payloads may carry several.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mensagem: Option<String>,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default, alias = "isFromUser")]
    pub is_from_user: Option<bool>,
    #[serde(default, alias = "createdAt", alias = "timestamp")]
    pub created_at: Option<String>,
}

impl WireMessage {
    pub fn parse(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn parse_str(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn origin(&self) -> Origin {
        match self.origin.as_deref().map(str::trim) {
            Some(o) if o.eq_ignore_ascii_case("user") => return Origin::User,
            Some(o)
                if o.eq_ignore_ascii_case("assistant")
                    || o.eq_ignore_ascii_case("bot")
                    || o.eq_ignore_ascii_case("system") =>
            {
                return Origin::Assistant
            }
            _ => {}
        }
        if self.is_from_user.unwrap_or(false) {
            Origin::User
        } else {
            Origin::Assistant
        }
    }

    /// First non-blank of `text`, `message`, `mensagem`, trimmed.
    pub fn body(&self) -> Option<&str> {
        [&self.text, &self.message, &self.mensagem]
            .into_iter()
            .filter_map(|v| v.as_deref())
            .map(str::trim)
            .find(|v| !v.is_empty())
    }

    /// Convert into a domain message. Missing conversation fields are filled
    /// from `fallback`. Returns `None` for blank text.
    pub fn into_message(self, fallback: &ConversationKey) -> Option<Message> {
        let origin = self.origin();
        let text = self.body()?.to_string();
        let conversation = ConversationKey {
            session_id: non_blank(self.session_id).unwrap_or_else(|| fallback.session_id.clone()),
            player_id: non_blank(self.player_id).unwrap_or_else(|| fallback.player_id.clone()),
        };
        Some(Message {
            id: non_blank(self.id),
            conversation,
            text,
            origin,
            timestamp: self.created_at.as_deref().and_then(parse_timestamp),
            state: LifecycleState::Confirmed,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    // Naive ISO timestamps are treated as UTC.
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Body of `GET /api/messages`. Items stay raw so one bad entry does not sink
/// the whole page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryResponse {
    #[serde(default)]
    pub messages: Option<Vec<Value>>,
}

impl HistoryResponse {
    pub fn into_items(self) -> Vec<Value> {
        self.messages.unwrap_or_default()
    }
}

/// Body of the send request. The webhook reads the text from `mensagem`,
/// so it is sent under both names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendRequest {
    pub session: String,
    pub player: String,
    pub text: String,
    #[serde(rename = "mensagem")]
    pub webhook_text: String,
}

impl SendRequest {
    pub fn new(conversation: &ConversationKey, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            session: conversation.session_id.clone(),
            player: conversation.player_id.clone(),
            webhook_text: text.clone(),
            text,
        }
    }
}

/// Body of a successful send. `data.record` echoes the stored user message;
/// `reply` (top level or under `data`) carries the assistant answer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendResponse {
    #[serde(default)]
    pub data: Option<SendResponseData>,
    #[serde(default)]
    pub reply: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendResponseData {
    #[serde(default)]
    pub record: Option<Value>,
    #[serde(default)]
    pub reply: Option<Value>,
}

impl SendResponse {
    /// Empty bodies are valid and carry nothing.
    pub fn parse(body: &str) -> Result<Self, serde_json::Error> {
        if body.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(body)
    }

    pub fn record(&self) -> Option<&Value> {
        self.data
            .as_ref()
            .and_then(|d| d.record.as_ref())
            .filter(|v| v.is_object())
    }

    pub fn reply(&self) -> Option<&Value> {
        self.reply
            .as_ref()
            .filter(|v| v.is_object())
            .or_else(|| {
                self.data
                    .as_ref()
                    .and_then(|d| d.reply.as_ref())
                    .filter(|v| v.is_object())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fallback() -> ConversationKey {
        ConversationKey::new("s1", "p1")
    }

    #[test]
    fn parses_backend_shape() {
        let wire = WireMessage::parse(json!({
            "id": "9b2f",
            "session_id": "s1",
            "message": " ola! ",
            "is_from_user": false,
            "created_at": "2024-05-01T12:30:00.123456+00:00"
        }))
        .unwrap();
        let msg = wire.into_message(&fallback()).unwrap();
        assert_eq!(msg.id.as_deref(), Some("9b2f"));
        assert_eq!(msg.text, "ola!");
        assert_eq!(msg.origin, Origin::Assistant);
        assert_eq!(msg.conversation, fallback());
        assert!(msg.timestamp.is_some());
        assert_eq!(msg.state, LifecycleState::Confirmed);
    }

    #[test]
    fn parses_text_and_origin_shape() {
        let wire = WireMessage::parse(json!({"id": "m1", "text": "oi", "origin": "user"})).unwrap();
        let msg = wire.into_message(&fallback()).unwrap();
        assert_eq!(msg.origin, Origin::User);
        assert_eq!(msg.conversation.player_id, "p1");
    }

    #[test]
    fn numeric_id_is_stringified() {
        let wire = WireMessage::parse(json!({"id": 42, "text": "x"})).unwrap();
        assert_eq!(wire.id.as_deref(), Some("42"));
    }

    #[test]
    fn blank_text_is_not_a_message() {
        let wire = WireMessage::parse(json!({"id": "m1", "message": "   "})).unwrap();
        assert!(wire.into_message(&fallback()).is_none());
        let wire = WireMessage::parse(json!({"id": "m1"})).unwrap();
        assert!(wire.into_message(&fallback()).is_none());
    }

    #[test]
    fn payload_with_text_and_message_keys_is_accepted() {
        let wire = WireMessage::parse(json!({
            "id": "m3",
            "text": "  ",
            "message": "oi",
            "mensagem": "ignored"
        }))
        .unwrap();
        assert_eq!(wire.body(), Some("oi"));
        assert_eq!(wire.into_message(&fallback()).unwrap().text, "oi");
    }

    #[test]
    fn naive_timestamp_is_utc() {
        let ts = parse_timestamp("2024-05-01T12:30:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-05-01T12:30:00+00:00");
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn send_response_fields_are_independent() {
        let resp = SendResponse::parse(
            r#"{"data":{"record":{"id":"m1","text":"oi","origin":"user"}},"reply":{"id":"m2","text":"ola!","origin":"assistant"}}"#,
        )
        .unwrap();
        assert!(resp.record().is_some());
        assert!(resp.reply().is_some());

        let resp = SendResponse::parse(r#"{"success":true,"data":{"reply":{"id":"m2","message":"ola!"}}}"#).unwrap();
        assert!(resp.record().is_none());
        assert!(resp.reply().is_some());

        let resp = SendResponse::parse("").unwrap();
        assert!(resp.record().is_none() && resp.reply().is_none());
    }

    #[test]
    fn history_without_messages_is_empty() {
        let resp: HistoryResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.into_items().is_empty());
        let resp: HistoryResponse = serde_json::from_str(r#"{"messages":null}"#).unwrap();
        assert!(resp.into_items().is_empty());
    }

    #[test]
    fn send_request_uses_conversation_fields() {
        let req = SendRequest::new(&fallback(), "oi");
        let body = serde_json::to_value(&req).unwrap();
        assert_eq!(
            body,
            json!({"session": "s1", "player": "p1", "text": "oi", "mensagem": "oi"})
        );
    }
}
