use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Message id, unique within one conversation.
pub type MessageId = i64;

/// Identifies one conversation of one account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationKey {
    pub account: String,
    pub conversation_id: String,
}

impl ConversationKey {
    pub fn new(account: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            conversation_id: conversation_id.into(),
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account, self.conversation_id)
    }
}

/// Per-conversation metadata the normalizer needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationMeta {
    pub is_group: bool,
    /// Avatar used when a row carries none
    pub fallback_avatar: Option<String>,
}

impl ConversationMeta {
    pub fn single() -> Self {
        Self::default()
    }

    pub fn group() -> Self {
        Self {
            is_group: true,
            fallback_avatar: None,
        }
    }

    pub fn with_fallback_avatar(mut self, url: impl Into<String>) -> Self {
        self.fallback_avatar = Some(url.into());
        self
    }
}

/// How a record is presented. The engine never looks inside a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderKind {
    #[default]
    Text,
    Image,
    Voice,
    Video,
    Emoji,
    Location,
    ContactCard,
    Link,
    File,
    Quote,
    Transfer,
    RedPacket,
    Call,
    System,
    Revoked,
    /// Known app message with an unrecognised sub-type
    App,
}

impl RenderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderKind::Text => "text",
            RenderKind::Image => "image",
            RenderKind::Voice => "voice",
            RenderKind::Video => "video",
            RenderKind::Emoji => "emoji",
            RenderKind::Location => "location",
            RenderKind::ContactCard => "contact_card",
            RenderKind::Link => "link",
            RenderKind::File => "file",
            RenderKind::Quote => "quote",
            RenderKind::Transfer => "transfer",
            RenderKind::RedPacket => "red_packet",
            RenderKind::Call => "call",
            RenderKind::System => "system",
            RenderKind::Revoked => "revoked",
            RenderKind::App => "app",
        }
    }
}

/// A message row as produced by the decryption backend.
///
/// Every field is optional: the backend omits what it could not decode, and
/// numeric fields may arrive as numbers or numeric strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawMessageRow {
    #[serde(deserialize_with = "lenient_i64")]
    pub local_id: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub server_id: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub create_time: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub sort_seq: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub local_type: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub app_type: Option<i64>,
    #[serde(deserialize_with = "lenient_flag")]
    pub is_send: Option<bool>,
    pub sender_username: Option<String>,
    pub sender_avatar_url: Option<String>,
    pub parsed_content: Option<String>,
    pub raw_content: Option<String>,
    /// Everything else the backend attached (media paths, transfer amounts, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Opaque, render-ready content of a record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub text: String,
    pub avatar_url: Option<String>,
    /// Kind-specific fields passed through untouched
    #[serde(default)]
    pub extra: Map<String, Value>,
}

/// Canonical record held by the window store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    /// Sort key; ties are broken by `id`
    pub ordering_time: i64,
    pub create_time: i64,
    pub render_kind: RenderKind,
    pub is_outgoing: bool,
    pub sender_id: String,
    pub payload: MessagePayload,
}

impl MessageRecord {
    pub fn sort_key(&self) -> (i64, MessageId) {
        (self.ordering_time, self.id)
    }
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        Some(Value::Bool(b)) => Some(b as i64),
        _ => None,
    })
}

fn lenient_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Bool(b)) => Some(b),
        Some(Value::Number(n)) => n.as_i64().map(|v| v != 0),
        Some(Value::String(s)) => match s.trim() {
            "1" | "true" => Some(true),
            "0" | "false" => Some(false),
            _ => None,
        },
        _ => None,
    })
}
