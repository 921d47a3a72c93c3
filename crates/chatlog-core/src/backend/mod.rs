//! Backend operations consumed by the engine.
//!
//! The decryption service owns storage; the engine only sees these calls.
//! [`http::HttpBackend`] is the production implementation.

pub mod http;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{
    Anchor, AnchorKind, ConversationKey, DailyCounts, ExportJob, ExportParams, MessageId,
    RawMessageRow, RenderKind, SearchFilters, SearchHit, SearchIndexState, SearchScope,
    SenderOption,
};

/// Order of rows inside a returned page. Offsets always count back from the newest message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListMessagesRequest {
    pub key: ConversationKey,
    pub limit: usize,
    pub offset: usize,
    pub order: SortOrder,
    pub render_filter: Option<RenderKind>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessagePage {
    pub messages: Vec<RawMessageRow>,
    pub total: u64,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AroundRequest {
    pub key: ConversationKey,
    pub anchor_id: MessageId,
    pub before: usize,
    pub after: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AroundPage {
    pub messages: Vec<RawMessageRow>,
    /// Anchor as resolved by the backend (may differ from the requested one)
    pub anchor_id: Option<MessageId>,
    pub anchor_index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub account: String,
    pub query: String,
    pub scope: SearchScope,
    pub filters: SearchFilters,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    #[default]
    Success,
    IndexBuilding,
    IndexError,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResponse {
    pub status: SearchStatus,
    pub hits: Vec<SearchHit>,
    pub has_more: bool,
    pub total: u64,
    pub index: Option<SearchIndexState>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SenderFacetRequest {
    pub account: String,
    pub scope: SearchScope,
    pub query: String,
    pub filters: SearchFilters,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SenderFacets {
    pub status: SearchStatus,
    pub senders: Vec<SenderOption>,
}

/// Progress updates pushed for one export job.
pub type JobStream = BoxStream<'static, Result<ExportJob>>;

#[async_trait]
pub trait ArchiveBackend: Send + Sync {
    async fn list_messages(&self, request: ListMessagesRequest) -> Result<MessagePage>;

    async fn messages_around(&self, request: AroundRequest) -> Result<AroundPage>;

    /// `None` when nothing matches (e.g. a day without messages).
    async fn anchor_for(
        &self,
        key: &ConversationKey,
        kind: AnchorKind,
        date: Option<NaiveDate>,
    ) -> Result<Option<Anchor>>;

    async fn daily_counts(&self, key: &ConversationKey, year: i32, month: u32)
        -> Result<DailyCounts>;

    async fn search_messages(&self, request: SearchRequest) -> Result<SearchResponse>;

    async fn search_index_status(&self, account: &str) -> Result<SearchIndexState>;

    async fn build_search_index(&self, account: &str, rebuild: bool) -> Result<SearchIndexState>;

    async fn list_search_senders(&self, request: SenderFacetRequest) -> Result<SenderFacets>;

    async fn create_export_job(&self, params: &ExportParams) -> Result<ExportJob>;

    async fn get_export_job(&self, export_id: &str) -> Result<ExportJob>;

    async fn cancel_export_job(&self, export_id: &str) -> Result<()>;

    /// Open the server-push progress channel for a job.
    ///
    /// `Ok(None)` means the environment has no push support and callers should poll.
    async fn export_progress(&self, _export_id: &str) -> Result<Option<JobStream>> {
        Ok(None)
    }
}
