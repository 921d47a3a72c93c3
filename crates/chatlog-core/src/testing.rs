//! Scripted in-memory backend for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::backend::{
    AroundPage, AroundRequest, ArchiveBackend, JobStream, ListMessagesRequest, MessagePage,
    SearchRequest, SearchResponse, SearchStatus, SenderFacetRequest, SenderFacets,
};
use crate::error::{CoreError, Result};
use crate::models::{
    Anchor, AnchorKind, ConversationKey, DailyCounts, ExportJob, ExportParams, ExportStatus,
    MessageId, RawMessageRow, SearchHit, SearchIndexState, SenderOption,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    List { conversation: String, limit: usize, offset: usize },
    Around { anchor: MessageId, before: usize, after: usize },
    Anchor { kind: AnchorKind },
    DailyCounts { year: i32, month: u32 },
    Search { query: String, offset: usize },
    IndexStatus,
    BuildIndex { rebuild: bool },
    Senders { query: String },
    CreateExport,
    GetExport,
    CancelExport,
    ExportProgress,
}

pub fn row(id: MessageId, time: i64) -> RawMessageRow {
    RawMessageRow {
        local_id: Some(id),
        create_time: Some(time),
        local_type: Some(1),
        parsed_content: Some(format!("m{id}")),
        ..Default::default()
    }
}

/// Rows with ids in `ids`, each at `id * 10` seconds.
pub fn rows(ids: impl IntoIterator<Item = MessageId>) -> Vec<RawMessageRow> {
    ids.into_iter().map(|id| row(id, id * 10)).collect()
}

pub fn hit(id: MessageId, conversation: &str) -> SearchHit {
    SearchHit {
        id,
        conversation_id: conversation.to_string(),
        snippet: format!("hit {id}"),
        sender_id: "wxid_peer".to_string(),
        create_time: id * 10,
    }
}

pub fn job(export_id: &str, status: ExportStatus) -> ExportJob {
    ExportJob {
        export_id: export_id.to_string(),
        status,
        progress: Default::default(),
        error: None,
    }
}

pub fn ready_index() -> SearchIndexState {
    SearchIndexState {
        exists: true,
        ready: true,
        ..Default::default()
    }
}

pub fn building_index() -> SearchIndexState {
    SearchIndexState {
        exists: true,
        ready: false,
        build_status: crate::models::BuildStatus::Building,
        ..Default::default()
    }
}

#[derive(Default)]
pub struct MockBackend {
    calls: Mutex<Vec<Call>>,
    /// conversation id -> rows in ascending order
    conversations: Mutex<HashMap<String, Vec<RawMessageRow>>>,
    list_gate: Mutex<Option<Arc<Semaphore>>>,
    around_gate: Mutex<Option<Arc<Semaphore>>>,
    fail_list: AtomicBool,
    fail_around: AtomicBool,
    anchors: Mutex<HashMap<(AnchorKind, Option<NaiveDate>), Anchor>>,
    daily: Mutex<DailyCounts>,
    /// Statuses served in order; the last one repeats
    index_statuses: Mutex<VecDeque<SearchIndexState>>,
    index: Mutex<SearchIndexState>,
    hits: Mutex<Vec<SearchHit>>,
    senders: Mutex<Vec<SenderOption>>,
    /// Polled statuses served in order; the last one repeats
    export_polls: Mutex<VecDeque<ExportJob>>,
    last_export: Mutex<Option<ExportJob>>,
    push_updates: Mutex<Option<Vec<Result<ExportJob>>>>,
    pulled_push_items: Arc<Mutex<usize>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_conversation(self: Arc<Self>, id: &str, rows: Vec<RawMessageRow>) -> Arc<Self> {
        self.set_conversation(id, rows);
        self
    }

    pub fn set_conversation(&self, id: &str, rows: Vec<RawMessageRow>) {
        self.conversations.lock().insert(id.to_string(), rows);
    }

    pub fn push_rows(&self, id: &str, rows: Vec<RawMessageRow>) {
        self.conversations
            .lock()
            .entry(id.to_string())
            .or_default()
            .extend(rows);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Block `list_messages` until permits are added to the returned semaphore.
    pub fn gate_list(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.list_gate.lock() = Some(gate.clone());
        gate
    }

    /// Block `messages_around` until permits are added to the returned semaphore.
    pub fn gate_around(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.around_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn set_fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_around(&self, fail: bool) {
        self.fail_around.store(fail, Ordering::SeqCst);
    }

    pub fn set_anchor(&self, kind: AnchorKind, date: Option<NaiveDate>, anchor: Anchor) {
        self.anchors.lock().insert((kind, date), anchor);
    }

    pub fn set_daily(&self, counts: DailyCounts) {
        *self.daily.lock() = counts;
    }

    pub fn script_index(&self, statuses: Vec<SearchIndexState>) {
        *self.index_statuses.lock() = statuses.into();
    }

    pub fn set_index(&self, state: SearchIndexState) {
        *self.index.lock() = state;
        self.index_statuses.lock().clear();
    }

    pub fn set_hits(&self, hits: Vec<SearchHit>) {
        *self.hits.lock() = hits;
    }

    pub fn set_senders(&self, senders: Vec<SenderOption>) {
        *self.senders.lock() = senders;
    }

    pub fn script_export_polls(&self, jobs: Vec<ExportJob>) {
        *self.export_polls.lock() = jobs.into();
    }

    pub fn set_push_updates(&self, updates: Vec<Result<ExportJob>>) {
        *self.push_updates.lock() = Some(updates);
    }

    pub fn pulled_push_items(&self) -> usize {
        *self.pulled_push_items.lock()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    fn current_index(&self) -> SearchIndexState {
        let mut scripted = self.index_statuses.lock();
        if let Some(next) = scripted.pop_front() {
            if scripted.is_empty() {
                *self.index.lock() = next.clone();
            }
            return next;
        }
        self.index.lock().clone()
    }
}

#[async_trait]
impl ArchiveBackend for MockBackend {
    async fn list_messages(&self, request: ListMessagesRequest) -> Result<MessagePage> {
        self.record(Call::List {
            conversation: request.key.conversation_id.clone(),
            limit: request.limit,
            offset: request.offset,
        });

        let gate = self.list_gate.lock().clone();
        if let Some(gate) = gate {
            let permit = gate.acquire().await.map_err(|_| CoreError::Network("closed".into()))?;
            permit.forget();
        }

        if self.fail_list.load(Ordering::SeqCst) {
            return Err(CoreError::Network("connection reset".into()));
        }

        let conversations = self.conversations.lock();
        let all = conversations
            .get(&request.key.conversation_id)
            .cloned()
            .unwrap_or_default();
        let end = all.len().saturating_sub(request.offset);
        let start = end.saturating_sub(request.limit);
        Ok(MessagePage {
            messages: all[start..end].to_vec(),
            total: all.len() as u64,
            has_more: start > 0,
        })
    }

    async fn messages_around(&self, request: AroundRequest) -> Result<AroundPage> {
        self.record(Call::Around {
            anchor: request.anchor_id,
            before: request.before,
            after: request.after,
        });

        let gate = self.around_gate.lock().clone();
        if let Some(gate) = gate {
            let permit = gate.acquire().await.map_err(|_| CoreError::Network("closed".into()))?;
            permit.forget();
        }

        if self.fail_around.load(Ordering::SeqCst) {
            return Err(CoreError::Network("timeout".into()));
        }

        let conversations = self.conversations.lock();
        let all = conversations
            .get(&request.key.conversation_id)
            .cloned()
            .unwrap_or_default();
        let Some(index) = all
            .iter()
            .position(|r| r.local_id.unwrap_or(0) >= request.anchor_id)
        else {
            return Ok(AroundPage::default());
        };
        let start = index.saturating_sub(request.before);
        let end = (index + request.after + 1).min(all.len());
        Ok(AroundPage {
            messages: all[start..end].to_vec(),
            anchor_id: all[index].local_id,
            anchor_index: Some(index - start),
        })
    }

    async fn anchor_for(
        &self,
        _key: &ConversationKey,
        kind: AnchorKind,
        date: Option<NaiveDate>,
    ) -> Result<Option<Anchor>> {
        self.record(Call::Anchor { kind });
        Ok(self.anchors.lock().get(&(kind, date)).copied())
    }

    async fn daily_counts(
        &self,
        _key: &ConversationKey,
        year: i32,
        month: u32,
    ) -> Result<DailyCounts> {
        self.record(Call::DailyCounts { year, month });
        Ok(self.daily.lock().clone())
    }

    async fn search_messages(&self, request: SearchRequest) -> Result<SearchResponse> {
        self.record(Call::Search {
            query: request.query.clone(),
            offset: request.offset,
        });
        let index = self.index.lock().clone();
        if !index.is_queryable() {
            return Ok(SearchResponse {
                status: SearchStatus::IndexBuilding,
                index: Some(index),
                ..Default::default()
            });
        }
        let hits = self.hits.lock().clone();
        let page: Vec<SearchHit> = hits
            .iter()
            .skip(request.offset)
            .take(request.limit)
            .cloned()
            .collect();
        Ok(SearchResponse {
            status: SearchStatus::Success,
            has_more: request.offset + page.len() < hits.len(),
            total: hits.len() as u64,
            hits: page,
            index: Some(index),
            error: None,
        })
    }

    async fn search_index_status(&self, _account: &str) -> Result<SearchIndexState> {
        self.record(Call::IndexStatus);
        Ok(self.current_index())
    }

    async fn build_search_index(&self, _account: &str, rebuild: bool) -> Result<SearchIndexState> {
        self.record(Call::BuildIndex { rebuild });
        Ok(building_index())
    }

    async fn list_search_senders(&self, request: SenderFacetRequest) -> Result<SenderFacets> {
        self.record(Call::Senders {
            query: request.query.clone(),
        });
        Ok(SenderFacets {
            status: SearchStatus::Success,
            senders: self.senders.lock().clone(),
        })
    }

    async fn create_export_job(&self, params: &ExportParams) -> Result<ExportJob> {
        self.record(Call::CreateExport);
        let created = job(&format!("exp-{}", params.conversation_ids.len()), ExportStatus::Queued);
        *self.last_export.lock() = Some(created.clone());
        Ok(created)
    }

    async fn get_export_job(&self, export_id: &str) -> Result<ExportJob> {
        self.record(Call::GetExport);
        let mut polls = self.export_polls.lock();
        let next = if polls.len() > 1 {
            polls.pop_front()
        } else {
            polls.front().cloned()
        };
        next.or_else(|| self.last_export.lock().clone())
            .ok_or_else(|| CoreError::Backend {
                status: 404,
                message: format!("unknown export {export_id}"),
            })
    }

    async fn cancel_export_job(&self, export_id: &str) -> Result<()> {
        self.record(Call::CancelExport);
        self.script_export_polls(vec![job(export_id, ExportStatus::Cancelled)]);
        Ok(())
    }

    async fn export_progress(&self, _export_id: &str) -> Result<Option<JobStream>> {
        self.record(Call::ExportProgress);
        let Some(updates) = self.push_updates.lock().take() else {
            return Ok(None);
        };
        let pulled = self.pulled_push_items.clone();
        let stream = futures::stream::iter(updates).inspect(move |_| {
            *pulled.lock() += 1;
        });
        Ok(Some(stream.boxed()))
    }
}
