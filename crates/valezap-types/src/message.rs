use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix for ids minted on the client for messages the server never sees.
pub const LOCAL_ID_PREFIX: &str = "local-";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    User,
    Assistant,
}

impl Origin {
    pub fn as_str(self) -> &'static str {
        match self {
            Origin::User => "user",
            Origin::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Pending,
    Confirmed,
}

/// Scopes every dedup and merge decision to one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    pub session_id: String,
    pub player_id: String,
}

impl ConversationKey {
    pub fn new(session_id: impl Into<String>, player_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            player_id: player_id.into(),
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.session_id, self.player_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Option<String>,
    pub conversation: ConversationKey,
    pub text: String,
    pub origin: Origin,
    /// Display only. Never part of a [`DedupKey`].
    pub timestamp: Option<DateTime<Utc>>,
    pub state: LifecycleState,
}

impl Message {
    /// Optimistic echo of something the local user typed. Returns `None` when
    /// the text is blank.
    pub fn pending_user(conversation: ConversationKey, text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        Some(Self {
            id: None,
            conversation,
            text: text.to_string(),
            origin: Origin::User,
            timestamp: Some(Utc::now()),
            state: LifecycleState::Pending,
        })
    }

    /// Assistant-side notice produced on the client. Carries a unique local id
    /// so two identical notices never collapse into one render.
    pub fn local_notice(conversation: ConversationKey, text: &str) -> Self {
        Self {
            id: Some(format!("{LOCAL_ID_PREFIX}{}", Uuid::new_v4())),
            conversation,
            text: text.trim().to_string(),
            origin: Origin::Assistant,
            timestamp: Some(Utc::now()),
            state: LifecycleState::Confirmed,
        }
    }

    pub fn confirmed(
        id: impl Into<String>,
        conversation: ConversationKey,
        text: impl Into<String>,
        origin: Origin,
    ) -> Self {
        Self {
            id: Some(id.into()),
            conversation,
            text: text.into(),
            origin,
            timestamp: None,
            state: LifecycleState::Confirmed,
        }
    }

    pub fn trimmed_text(&self) -> &str {
        self.text.trim()
    }

    pub fn has_content(&self) -> bool {
        !self.trimmed_text().is_empty()
    }

    pub fn is_pending(&self) -> bool {
        self.state == LifecycleState::Pending
    }

    pub fn dedup_key(&self) -> DedupKey {
        match self.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => DedupKey::Id(id.to_string()),
            _ => DedupKey::Content {
                conversation: self.conversation.clone(),
                text: self.trimmed_text().to_string(),
            },
        }
    }
}

/// Identity used to guarantee at most one render per message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    Id(String),
    Content {
        conversation: ConversationKey,
        text: String,
    },
}

impl DedupKey {
    pub fn is_id(&self) -> bool {
        matches!(self, DedupKey::Id(_))
    }
}
