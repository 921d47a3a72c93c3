use serde::{Deserialize, Serialize};

use super::record::{ConversationKey, MessageId};

/// Lifecycle of the full-text index as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexPhase {
    /// No index on the backend yet
    #[default]
    Absent,
    Building,
    Ready,
    Error,
}

/// Build status as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    #[default]
    Idle,
    Building,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchIndexState {
    pub exists: bool,
    pub ready: bool,
    pub build_status: BuildStatus,
    pub indexed_count: u64,
    /// Backend-provided message for `BuildStatus::Error`
    pub error: Option<String>,
}

impl SearchIndexState {
    pub fn phase(&self) -> IndexPhase {
        match self.build_status {
            BuildStatus::Building => IndexPhase::Building,
            BuildStatus::Error => IndexPhase::Error,
            BuildStatus::Idle if self.ready => IndexPhase::Ready,
            BuildStatus::Idle if self.exists => IndexPhase::Building,
            BuildStatus::Idle => IndexPhase::Absent,
        }
    }

    /// Queries may run: the index is ready and no build is in progress.
    pub fn is_queryable(&self) -> bool {
        self.ready && self.build_status != BuildStatus::Building
    }
}

/// Where a query looks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SearchScope {
    #[default]
    All,
    Conversation { conversation_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilters {
    pub sender_id: Option<String>,
    /// Inclusive unix-seconds lower bound
    pub start_time: Option<i64>,
    /// Inclusive unix-seconds upper bound
    pub end_time: Option<i64>,
    pub render_kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub id: MessageId,
    pub conversation_id: String,
    pub snippet: String,
    pub sender_id: String,
    pub create_time: i64,
}

impl SearchHit {
    pub fn conversation_key(&self, account: &str) -> ConversationKey {
        ConversationKey::new(account, self.conversation_id.clone())
    }
}

/// One page of hits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPage {
    pub hits: Vec<SearchHit>,
    pub has_more: bool,
    pub total: u64,
}

/// Facet entry: one sender that appears in the current scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderOption {
    pub sender_id: String,
    pub display_name: String,
    #[serde(default)]
    pub count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_phase() {
        let mut state = SearchIndexState::default();
        assert_eq!(state.phase(), IndexPhase::Absent);

        state.build_status = BuildStatus::Building;
        assert_eq!(state.phase(), IndexPhase::Building);
        assert!(!state.is_queryable());

        state.build_status = BuildStatus::Idle;
        state.exists = true;
        state.ready = true;
        assert_eq!(state.phase(), IndexPhase::Ready);
        assert!(state.is_queryable());

        state.build_status = BuildStatus::Error;
        assert_eq!(state.phase(), IndexPhase::Error);
    }

    #[test]
    fn test_scope_serialization() {
        let scope = SearchScope::Conversation {
            conversation_id: "room".into(),
        };
        let json = serde_json::to_value(&scope).unwrap();
        assert_eq!(json["type"], "conversation");
        assert_eq!(json["conversation_id"], "room");
    }
}
