//! Timeline synchronization and navigation.
//!
//! [`TimelineEngine`] reconciles four producers against one [`WindowStore`]:
//! backward pagination, anchor-based context windows, realtime tail merges
//! and point edits. All writes go through the store's merge/replace
//! operations; each producer is guarded by its own loading flag and checks
//! that its response still belongs to the current selection (or context
//! session) before applying it.

pub mod context;
pub mod pagination;
pub mod realtime;
pub mod viewport;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{AroundRequest, ArchiveBackend};
use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::events::{EventEmitter, TimelineCallback, TimelineEvent};
use crate::models::{
    ConversationKey, ConversationMeta, DailyCounts, MessageId, RawMessageRow, RenderKind,
};
use crate::normalizer;
use crate::observable::{Observable, SubscriptionId};
use crate::store::{ConversationWindow, WindowStore};

pub use context::{ContextKind, ContextSession, ContextSnapshot, Direction, ExitOutcome};
pub use pagination::PaginationState;
pub use realtime::{Coalescer, RealtimeSignal, SignalOutcome};
pub use viewport::{EdgeGate, ScrollAnchor, ScrollMetrics};

/// What a scroll report caused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollAction {
    None,
    LoadedOlder(usize),
    LoadedBefore(usize),
    LoadedAfter(usize),
}

/// Read-only view published to subscribers after every mutation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimelineSnapshot {
    pub selected: Option<ConversationKey>,
    pub window: Option<ConversationWindow>,
    pub reloading: bool,
    pub loading_more: bool,
    pub context: Option<ContextSnapshot>,
    /// Conversation-scoped error for the selected conversation
    pub error: Option<String>,
    pub flashed: Option<MessageId>,
    /// Increases with every publish; a snapshot never replaces a newer one
    pub revision: u64,
}

pub(crate) struct TimelineState {
    pub selected: Option<ConversationKey>,
    /// Bumped whenever the selected window is swapped out (selection change,
    /// reload, context enter/exit); pagination responses from an older epoch
    /// are dropped
    pub selection_epoch: u64,
    pub store: WindowStore,
    pub metas: HashMap<ConversationKey, ConversationMeta>,
    pub render_filters: HashMap<ConversationKey, RenderKind>,
    pub pagination: PaginationState,
    pub context: Option<ContextSession>,
    pub next_session_id: u64,
    /// Last viewport reported for the selected conversation
    pub viewport: Option<ScrollMetrics>,
    pub errors: HashMap<ConversationKey, String>,
    pub daily_counts: HashMap<(ConversationKey, i32, u32), DailyCounts>,
    pub flashed: Option<MessageId>,
    pub revision: u64,
}

impl TimelineState {
    fn new() -> Self {
        Self {
            selected: None,
            selection_epoch: 0,
            store: WindowStore::new(),
            metas: HashMap::new(),
            render_filters: HashMap::new(),
            pagination: PaginationState::new(),
            context: None,
            next_session_id: 1,
            viewport: None,
            errors: HashMap::new(),
            daily_counts: HashMap::new(),
            flashed: None,
            revision: 0,
        }
    }

    pub fn is_selected(&self, key: &ConversationKey) -> bool {
        self.selected.as_ref() == Some(key)
    }

    /// A response fetched under `epoch` for `key` may still be applied.
    pub fn is_current(&self, key: &ConversationKey, epoch: u64) -> bool {
        self.selection_epoch == epoch && self.is_selected(key)
    }

    pub fn meta_for(&self, key: &ConversationKey) -> ConversationMeta {
        self.metas.get(key).cloned().unwrap_or_default()
    }

    pub fn context_for(&self, key: &ConversationKey) -> Option<&ContextSession> {
        self.context.as_ref().filter(|s| &s.key == key)
    }

    /// Switch selection, resetting per-selection pagination and viewport state.
    pub fn select(&mut self, key: &ConversationKey) {
        self.selected = Some(key.clone());
        self.invalidate_window_fetches();
        self.pagination = PaginationState::new();
        self.viewport = None;
    }

    /// Orphan any in-flight pagination fetch; its response will be dropped.
    pub fn invalidate_window_fetches(&mut self) {
        self.selection_epoch += 1;
        self.pagination.loading_more = false;
        self.pagination.reloading = false;
    }

    pub fn set_error(&mut self, key: &ConversationKey, err: &CoreError) -> TimelineEvent {
        let message = err.to_string();
        self.errors.insert(key.clone(), message.clone());
        TimelineEvent::Error {
            key: key.clone(),
            message,
        }
    }

    fn snapshot(&mut self) -> TimelineSnapshot {
        self.revision += 1;
        let window = self
            .selected
            .as_ref()
            .and_then(|key| self.store.get(key))
            .cloned();
        TimelineSnapshot {
            selected: self.selected.clone(),
            window,
            reloading: self.pagination.reloading,
            loading_more: self.pagination.loading_more,
            context: self.context.as_ref().map(ContextSession::snapshot),
            error: self
                .selected
                .as_ref()
                .and_then(|key| self.errors.get(key))
                .cloned(),
            flashed: self.flashed,
            revision: self.revision,
        }
    }
}

pub(crate) struct EngineInner {
    pub backend: Arc<dyn ArchiveBackend>,
    pub config: CoreConfig,
    pub state: Mutex<TimelineState>,
    pub snapshot: Observable<TimelineSnapshot>,
    pub events: EventEmitter,
    pub realtime: Coalescer,
}

/// Cheap-to-clone handle to one engine instance.
#[derive(Clone)]
pub struct TimelineEngine {
    pub(crate) inner: Arc<EngineInner>,
}

impl TimelineEngine {
    pub fn new(backend: Arc<dyn ArchiveBackend>, config: CoreConfig) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                backend,
                config,
                state: Mutex::new(TimelineState::new()),
                snapshot: Observable::default(),
                events: EventEmitter::default(),
                realtime: Coalescer::new(),
            }),
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.inner.config
    }

    // ===== Observation =====

    pub fn snapshot(&self) -> TimelineSnapshot {
        self.inner.snapshot.snapshot()
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(&TimelineSnapshot) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.inner.snapshot.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.snapshot.unsubscribe(id)
    }

    pub fn attach_callback(&self, callback: Arc<dyn TimelineCallback>) {
        self.inner.events.attach(callback);
    }

    pub fn detach_callbacks(&self) {
        self.inner.events.clear();
    }

    pub fn selected(&self) -> Option<ConversationKey> {
        self.inner.state.lock().selected.clone()
    }

    pub fn window(&self, key: &ConversationKey) -> Option<ConversationWindow> {
        self.inner.state.lock().store.get(key).cloned()
    }

    pub fn error_for(&self, key: &ConversationKey) -> Option<String> {
        self.inner.state.lock().errors.get(key).cloned()
    }

    /// Publish the current snapshot, then emit `events`.
    ///
    /// Snapshots are built and published outside one lock, so two commits can
    /// race; the revision check keeps the later state visible.
    pub(crate) fn commit(&self, events: Vec<TimelineEvent>) {
        let snapshot = self.inner.state.lock().snapshot();
        self.publish(snapshot);
        self.inner.events.emit_all(events);
    }

    fn publish(&self, snapshot: TimelineSnapshot) -> bool {
        self.inner
            .snapshot
            .set_if(snapshot, |current, next| next.revision > current.revision)
    }

    // ===== Selection =====

    /// Select a conversation.
    ///
    /// A conversation seen before gets its last window back without a fetch;
    /// otherwise page 0 is loaded. Any active context session is exited first.
    pub async fn select_conversation(
        &self,
        key: &ConversationKey,
        meta: ConversationMeta,
    ) -> Result<()> {
        let mut events = Vec::new();
        let has_window = {
            let mut state = self.inner.state.lock();
            state.metas.insert(key.clone(), meta);

            if state.is_selected(key) && state.context.is_none() {
                state.store.contains(key)
            } else {
                if state.context.is_some() {
                    events.extend(context::exit_locked(&mut state));
                }
                state.select(key);
                events.push(TimelineEvent::ConversationChanged {
                    key: Some(key.clone()),
                });
                let has_window = state.store.contains(key);
                if has_window {
                    events.push(TimelineEvent::WindowChanged { key: key.clone() });
                }
                has_window
            }
        };
        info!(conversation = %key, cached = has_window, "conversation selected");
        self.commit(events);

        if has_window {
            Ok(())
        } else {
            self.reload(key).await
        }
    }

    pub fn clear_selection(&self) {
        let mut events = Vec::new();
        {
            let mut state = self.inner.state.lock();
            if state.context.is_some() {
                events.extend(context::exit_locked(&mut state));
            }
            state.selected = None;
            state.invalidate_window_fetches();
            state.pagination = PaginationState::new();
            state.viewport = None;
        }
        events.push(TimelineEvent::ConversationChanged { key: None });
        self.commit(events);
    }

    /// Explicit refresh: drops cached calendar counts and reloads page 0.
    pub async fn refresh(&self, key: &ConversationKey) -> Result<()> {
        self.inner
            .state
            .lock()
            .daily_counts
            .retain(|(k, _, _), _| k != key);
        self.reload(key).await
    }

    /// Restrict the window to one render kind (or lift the filter) and reload.
    pub async fn set_render_filter(
        &self,
        key: &ConversationKey,
        filter: Option<RenderKind>,
    ) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            match filter {
                Some(kind) => state.render_filters.insert(key.clone(), kind),
                None => state.render_filters.remove(key),
            };
        }
        self.reload(key).await
    }

    // ===== Viewport =====

    /// Report the viewport. Drives pagination or context paging through the
    /// edge gates; at most one fetch is started per report.
    pub async fn handle_scroll(
        &self,
        key: &ConversationKey,
        metrics: ScrollMetrics,
    ) -> Result<ScrollAction> {
        let threshold = self.inner.config.edge_threshold_px;
        let fire = {
            let mut state = self.inner.state.lock();
            if !state.is_selected(key) {
                return Ok(ScrollAction::None);
            }
            state.viewport = Some(metrics);

            if let Some(session) = state.context.as_mut().filter(|s| &s.key == key) {
                let ready_before = session.can_load(Direction::Before);
                let ready_after = session.can_load(Direction::After);
                let top = session
                    .top_gate
                    .check(metrics.near_top(threshold), ready_before);
                let bottom = !top
                    && session
                        .bottom_gate
                        .check(metrics.near_bottom(threshold), ready_after);
                let direction = if top {
                    Some(Direction::Before)
                } else if bottom {
                    Some(Direction::After)
                } else {
                    None
                };
                direction.map(Fire::Context)
            } else {
                let ready = !state.pagination.is_busy()
                    && state.store.get(key).is_some_and(|w| w.has_more_older());
                state
                    .pagination
                    .top_gate
                    .check(metrics.near_top(threshold), ready)
                    .then_some(Fire::Older)
            }
        };

        match fire {
            None => Ok(ScrollAction::None),
            Some(Fire::Older) => {
                debug!(conversation = %key, "top edge reached, loading older page");
                self.load_older(key, Some(metrics))
                    .await
                    .map(ScrollAction::LoadedOlder)
            }
            Some(Fire::Context(Direction::Before)) => self
                .load_context_before(Some(metrics))
                .await
                .map(ScrollAction::LoadedBefore),
            Some(Fire::Context(Direction::After)) => self
                .load_context_after()
                .await
                .map(ScrollAction::LoadedAfter),
        }
    }

    // ===== Point edits =====

    /// Replace one record in place from an edited backend row.
    /// Returns false when the record is not in the window.
    pub fn apply_edit(&self, key: &ConversationKey, row: &RawMessageRow) -> bool {
        let replaced = {
            let mut state = self.inner.state.lock();
            let record = normalizer::normalize(row, key, &state.meta_for(key));
            let id = record.id;
            state.store.replace_one(key, id, record)
        };
        if replaced {
            self.commit(vec![TimelineEvent::WindowChanged { key: key.clone() }]);
        }
        replaced
    }

    /// Re-fetch one record and replace it in place.
    pub async fn reset_record(&self, key: &ConversationKey, id: MessageId) -> Result<bool> {
        if !self.window(key).is_some_and(|w| w.contains(id)) {
            return Ok(false);
        }

        let page = self
            .inner
            .backend
            .messages_around(AroundRequest {
                key: key.clone(),
                anchor_id: id,
                before: 0,
                after: 0,
            })
            .await?;

        let replaced = {
            let mut state = self.inner.state.lock();
            let meta = state.meta_for(key);
            let record = page
                .messages
                .iter()
                .map(|row| normalizer::normalize(row, key, &meta))
                .find(|r| r.id == id);
            match record {
                Some(record) => state.store.replace_one(key, id, record),
                None => false,
            }
        };
        if replaced {
            self.commit(vec![TimelineEvent::WindowChanged { key: key.clone() }]);
        } else {
            warn!(conversation = %key, id, "reset: record not returned by backend");
        }
        Ok(replaced)
    }

    // ===== Calendar =====

    /// Per-day counts for a month, cached until the next explicit refresh.
    pub async fn daily_counts(
        &self,
        key: &ConversationKey,
        year: i32,
        month: u32,
    ) -> Result<DailyCounts> {
        if !(1..=12).contains(&month) {
            return Err(CoreError::validation(format!("invalid month: {month}")));
        }
        let cache_key = (key.clone(), year, month);
        if let Some(counts) = self.inner.state.lock().daily_counts.get(&cache_key) {
            return Ok(counts.clone());
        }

        let counts = self.inner.backend.daily_counts(key, year, month).await?;
        self.inner
            .state
            .lock()
            .daily_counts
            .insert(cache_key, counts.clone());
        Ok(counts)
    }
}

enum Fire {
    Older,
    Context(Direction),
}
