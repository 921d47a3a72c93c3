//! Maps raw backend rows to canonical [`MessageRecord`]s.
//!
//! Normalization is pure: the same row and conversation context always yield
//! the same record. Nothing here fails; missing or malformed fields degrade to
//! defaults (id 0, empty text, `RenderKind::Text`).

use crate::constants::raw_types;
use crate::models::{
    ConversationKey, ConversationMeta, MessagePayload, MessageRecord, RawMessageRow, RenderKind,
};

pub fn normalize(
    row: &RawMessageRow,
    key: &ConversationKey,
    meta: &ConversationMeta,
) -> MessageRecord {
    let id = row.local_id.or(row.server_id).unwrap_or(0);
    let create_time = row.create_time.unwrap_or(0);
    let ordering_time = row.sort_seq.unwrap_or(create_time);
    let render_kind = render_kind_for(row.local_type, row.app_type);
    let is_outgoing = row.is_send.unwrap_or(false);

    let content = row
        .parsed_content
        .as_deref()
        .or(row.raw_content.as_deref())
        .unwrap_or("");

    let (embedded_sender, text) = if meta.is_group && !is_outgoing {
        split_group_sender(content)
    } else {
        (None, content)
    };

    let sender_id = if is_outgoing {
        key.account.clone()
    } else {
        row.sender_username
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(embedded_sender)
            .map(str::to_string)
            .unwrap_or_else(|| {
                if meta.is_group {
                    String::new()
                } else {
                    key.conversation_id.clone()
                }
            })
    };

    let avatar_url = row
        .sender_avatar_url
        .clone()
        .filter(|s| !s.is_empty())
        .or_else(|| meta.fallback_avatar.clone());

    MessageRecord {
        id,
        ordering_time,
        create_time,
        render_kind,
        is_outgoing,
        sender_id,
        payload: MessagePayload {
            text: text.to_string(),
            avatar_url,
            extra: row.extra.clone(),
        },
    }
}

pub fn normalize_all(
    rows: &[RawMessageRow],
    key: &ConversationKey,
    meta: &ConversationMeta,
) -> Vec<MessageRecord> {
    rows.iter().map(|row| normalize(row, key, meta)).collect()
}

pub fn render_kind_for(local_type: Option<i64>, app_type: Option<i64>) -> RenderKind {
    match local_type {
        Some(raw_types::TEXT) | None => RenderKind::Text,
        Some(raw_types::IMAGE) => RenderKind::Image,
        Some(raw_types::VOICE) => RenderKind::Voice,
        Some(raw_types::CONTACT_CARD) => RenderKind::ContactCard,
        Some(raw_types::VIDEO) => RenderKind::Video,
        Some(raw_types::EMOJI) => RenderKind::Emoji,
        Some(raw_types::LOCATION) => RenderKind::Location,
        Some(raw_types::VOIP) => RenderKind::Call,
        Some(raw_types::SYSTEM) => RenderKind::System,
        Some(raw_types::REVOKE) => RenderKind::Revoked,
        Some(raw_types::APP) => match app_type {
            Some(raw_types::APP_LINK) => RenderKind::Link,
            Some(raw_types::APP_FILE) => RenderKind::File,
            Some(raw_types::APP_QUOTE) => RenderKind::Quote,
            Some(raw_types::APP_TRANSFER) => RenderKind::Transfer,
            Some(raw_types::APP_RED_PACKET) => RenderKind::RedPacket,
            _ => RenderKind::App,
        },
        Some(_) => RenderKind::Text,
    }
}

/// Group rows prefix their text with `"<sender>:\n"`.
fn split_group_sender(content: &str) -> (Option<&str>, &str) {
    if let Some((head, rest)) = content.split_once(":\n") {
        let head = head.trim();
        if !head.is_empty() && !head.contains(char::is_whitespace) {
            return (Some(head), rest);
        }
    }
    (None, content)
}
