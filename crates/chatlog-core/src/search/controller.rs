//! Debounced full-text search over one account.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::facets::{FacetCache, FacetKey};
use super::index::{IndexLifecycle, IndexTransition};
use crate::backend::{ArchiveBackend, SearchRequest, SearchStatus, SenderFacetRequest};
use crate::config::CoreConfig;
use crate::error::Result;
use crate::models::{
    BuildStatus, IndexPhase, SearchFilters, SearchHit, SearchIndexState, SearchPage, SearchScope,
    SenderOption,
};
use crate::observable::{Observable, SubscriptionId};
use crate::task::TaskSlot;
use crate::timeline::{ContextKind, TimelineEngine};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchSnapshot {
    pub query: String,
    pub scope: SearchScope,
    pub filters: SearchFilters,
    pub index: SearchIndexState,
    pub phase: IndexPhase,
    pub hits: Vec<SearchHit>,
    pub has_more: bool,
    pub total: u64,
    pub loading: bool,
    /// A query is waiting for the index to become ready
    pub pending: bool,
    pub error: Option<String>,
    pub senders: Vec<SenderOption>,
}

#[derive(Default)]
struct SearchState {
    query: String,
    scope: SearchScope,
    filters: SearchFilters,
    index: IndexLifecycle,
    hits: Vec<SearchHit>,
    has_more: bool,
    total: u64,
    loading: bool,
    pending: bool,
    /// Bumped on every query/scope/filter change; older responses are dropped
    generation: u64,
    error: Option<String>,
    facets: FacetCache,
    senders: Vec<SenderOption>,
}

impl SearchState {
    fn snapshot(&self) -> SearchSnapshot {
        SearchSnapshot {
            query: self.query.clone(),
            scope: self.scope.clone(),
            filters: self.filters.clone(),
            index: self.index.state().clone(),
            phase: self.index.phase(),
            hits: self.hits.clone(),
            has_more: self.has_more,
            total: self.total,
            loading: self.loading,
            pending: self.pending,
            error: self.error.clone(),
            senders: self.senders.clone(),
        }
    }

    fn facet_key(&self, account: &str) -> FacetKey {
        FacetKey {
            account: account.to_string(),
            scope: self.scope.clone(),
            query: self.query.trim().to_string(),
            filters: self.filters.clone(),
        }
    }
}

struct SearchInner {
    backend: Arc<dyn ArchiveBackend>,
    config: CoreConfig,
    account: String,
    state: Mutex<SearchState>,
    snapshot: Observable<SearchSnapshot>,
    debounce: TaskSlot,
    poll: TaskSlot,
}

/// Search session for one account. Clones share state.
#[derive(Clone)]
pub struct SearchController {
    inner: Arc<SearchInner>,
}

impl SearchController {
    pub fn new(
        backend: Arc<dyn ArchiveBackend>,
        config: CoreConfig,
        account: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(SearchInner {
                backend,
                config,
                account: account.into(),
                state: Mutex::new(SearchState::default()),
                snapshot: Observable::default(),
                debounce: TaskSlot::new(),
                poll: TaskSlot::new(),
            }),
        }
    }

    fn from_weak(weak: &Weak<SearchInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub fn account(&self) -> &str {
        &self.inner.account
    }

    pub fn snapshot(&self) -> SearchSnapshot {
        self.inner.snapshot.snapshot()
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(&SearchSnapshot) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.inner.snapshot.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.snapshot.unsubscribe(id)
    }

    pub fn is_polling(&self) -> bool {
        self.inner.poll.is_running()
    }

    fn publish(&self) {
        let snapshot = self.inner.state.lock().snapshot();
        self.inner.snapshot.set(snapshot);
    }

    // ===== Index lifecycle =====

    /// Fetch the index status once; starts polling if a build is running.
    pub async fn refresh_index(&self) -> Result<SearchIndexState> {
        let status = match self
            .inner
            .backend
            .search_index_status(&self.inner.account)
            .await
        {
            Ok(status) => status,
            Err(err) => {
                self.inner.state.lock().error = Some(err.to_string());
                self.publish();
                return Err(err);
            }
        };

        let (building, run_pending) = self.observe_index(status.clone());
        if building {
            self.start_polling();
        }
        if run_pending {
            self.run_pending().await;
        }
        Ok(status)
    }

    /// Ask the backend to (re)build the index and poll until it settles.
    pub async fn request_build(&self, rebuild: bool) -> Result<()> {
        if let Err(err) = self
            .inner
            .backend
            .build_search_index(&self.inner.account, rebuild)
            .await
        {
            error!(account = %self.inner.account, error = %err, "index build request failed");
            self.inner.state.lock().error = Some(err.to_string());
            self.publish();
            return Err(err);
        }

        {
            let mut state = self.inner.state.lock();
            state.index.mark_building();
            state.facets.clear();
            state.error = None;
        }
        info!(account = %self.inner.account, rebuild, "search index build started");
        self.publish();
        self.start_polling();
        Ok(())
    }

    /// Returns `(still_building, run_pending_query)`.
    fn observe_index(&self, status: SearchIndexState) -> (bool, bool) {
        let result = {
            let mut state = self.inner.state.lock();
            let transition = state.index.observe(status);
            match transition {
                IndexTransition::BecameReady => {
                    info!(account = %self.inner.account, "search index ready");
                }
                IndexTransition::Failed => {
                    let message = state
                        .index
                        .state()
                        .error
                        .clone()
                        .unwrap_or_else(|| "index build failed".to_string());
                    error!(account = %self.inner.account, %message, "search index build failed");
                    state.error = Some(message);
                }
                IndexTransition::StartedBuilding | IndexTransition::Unchanged => {}
            }

            let run_pending = state.pending && state.index.is_queryable();
            if run_pending {
                state.pending = false;
            }
            (state.index.is_building(), run_pending)
        };
        self.publish();
        result
    }

    fn start_polling(&self) {
        if self.inner.poll.is_running() {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        let interval = self.inner.config.index_poll_interval();
        debug!(account = %self.inner.account, ?interval, "index polling started");

        self.inner.poll.spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(controller) = SearchController::from_weak(&weak) else {
                    break;
                };
                if !controller.poll_once().await {
                    debug!(account = %controller.inner.account, "index polling stopped");
                    break;
                }
            }
        });
    }

    /// One poll tick. Returns false once polling should stop.
    async fn poll_once(&self) -> bool {
        let status = match self
            .inner
            .backend
            .search_index_status(&self.inner.account)
            .await
        {
            Ok(status) => status,
            Err(err) => {
                warn!(account = %self.inner.account, error = %err, "index status poll failed");
                return true;
            }
        };

        let (building, run_pending) = self.observe_index(status);
        if !run_pending {
            return building;
        }
        // The deferred query can itself report the index as still building,
        // which re-marks it pending; keep ticking until it lands.
        self.run_pending().await;
        self.inner.state.lock().index.is_building()
    }

    async fn run_pending(&self) {
        let generation = self.inner.state.lock().generation;
        debug!(account = %self.inner.account, "running query deferred during index build");
        if let Err(err) = self.execute(0, generation).await {
            warn!(account = %self.inner.account, error = %err, "deferred search failed");
        }
    }

    // ===== Queries =====

    /// Replace the query. Hits are cleared immediately; the request is sent
    /// after the debounce delay, and only for queries of the minimum length.
    pub fn set_query(&self, text: impl Into<String>) {
        let text = text.into();
        self.resubmit(|state| state.query = text);
    }

    pub fn set_scope(&self, scope: SearchScope) {
        self.resubmit(|state| state.scope = scope);
    }

    pub fn set_filters(&self, filters: SearchFilters) {
        self.resubmit(|state| state.filters = filters);
    }

    fn resubmit(&self, change: impl FnOnce(&mut SearchState)) {
        let (generation, long_enough) = {
            let mut state = self.inner.state.lock();
            change(&mut *state);
            state.generation += 1;
            state.hits.clear();
            state.has_more = false;
            state.total = 0;
            state.loading = false;
            state.pending = false;
            state.error = None;
            let long_enough =
                state.query.trim().chars().count() >= self.inner.config.search_min_query_len;
            (state.generation, long_enough)
        };
        self.inner.debounce.abort();
        self.publish();
        if !long_enough {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let delay = self.inner.config.search_debounce();
        self.inner.debounce.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(controller) = SearchController::from_weak(&weak) {
                if let Err(err) = controller.execute(0, generation).await {
                    debug!(error = %err, "debounced search failed");
                }
            }
        });
    }

    /// Run the current query now at `offset`, bypassing the debounce.
    ///
    /// `Ok(None)` when the query was deferred until the index is ready, or
    /// when it was superseded while in flight.
    pub async fn search(&self, offset: usize) -> Result<Option<SearchPage>> {
        let generation = self.inner.state.lock().generation;
        self.execute(offset, generation).await
    }

    /// Append the next page of hits. Returns how many were added.
    pub async fn load_more(&self) -> Result<usize> {
        let (offset, generation) = {
            let state = self.inner.state.lock();
            if state.loading || state.pending || !state.has_more {
                return Ok(0);
            }
            (state.hits.len(), state.generation)
        };
        let page = self.execute(offset, generation).await?;
        Ok(page.map(|p| p.hits.len()).unwrap_or(0))
    }

    async fn execute(&self, offset: usize, generation: u64) -> Result<Option<SearchPage>> {
        let request = {
            let mut state = self.inner.state.lock();
            if state.generation != generation {
                return Ok(None);
            }
            let query = state.query.trim().to_string();
            if query.chars().count() < self.inner.config.search_min_query_len {
                return Ok(None);
            }
            if state.index.is_building() {
                state.pending = true;
                drop(state);
                debug!(account = %self.inner.account, "index building, query deferred");
                self.publish();
                self.start_polling();
                return Ok(None);
            }
            state.loading = true;
            SearchRequest {
                account: self.inner.account.clone(),
                query,
                scope: state.scope.clone(),
                filters: state.filters.clone(),
                limit: self.inner.config.search_page_size,
                offset,
            }
        };
        self.publish();

        let result = self.inner.backend.search_messages(request).await;

        let mut start_polling = false;
        let outcome = {
            let mut state = self.inner.state.lock();
            if state.generation != generation {
                debug!(generation, "dropping superseded search response");
                return Ok(None);
            }
            state.loading = false;

            match result {
                Err(err) => {
                    state.error = Some(err.to_string());
                    Err(err)
                }
                Ok(response) => {
                    if let Some(index) = response.index.clone() {
                        state.index.observe(index);
                    }
                    match response.status {
                        SearchStatus::Success => {
                            if offset == 0 {
                                state.hits = response.hits.clone();
                            } else {
                                state.hits.extend(response.hits.iter().cloned());
                            }
                            state.has_more = response.has_more;
                            state.total = response.total;
                            state.error = None;
                            Ok(Some(SearchPage {
                                hits: response.hits,
                                has_more: response.has_more,
                                total: response.total,
                            }))
                        }
                        SearchStatus::IndexBuilding => {
                            if !state.index.is_building() {
                                state.index.mark_building();
                            }
                            state.pending = true;
                            start_polling = true;
                            Ok(None)
                        }
                        SearchStatus::IndexError => {
                            let message = response
                                .error
                                .unwrap_or_else(|| "search index error".to_string());
                            let mut failed = state.index.state().clone();
                            failed.build_status = BuildStatus::Error;
                            failed.error = Some(message.clone());
                            state.index.observe(failed);
                            state.error = Some(message);
                            Ok(None)
                        }
                    }
                }
            }
        };
        self.publish();
        if start_polling {
            self.start_polling();
        }
        outcome
    }

    // ===== Facets =====

    /// Sender options for the current scope, query and filters. Refetched
    /// only when that combination changes.
    pub async fn load_facets(&self) -> Result<Vec<SenderOption>> {
        let (key, request) = {
            let state = self.inner.state.lock();
            let key = state.facet_key(&self.inner.account);
            if let Some(cached) = state.facets.get(&key) {
                return Ok(cached.to_vec());
            }
            let request = SenderFacetRequest {
                account: key.account.clone(),
                scope: key.scope.clone(),
                query: key.query.clone(),
                filters: key.filters.clone(),
            };
            (key, request)
        };

        let facets = self.inner.backend.list_search_senders(request).await?;
        if facets.status != SearchStatus::Success {
            debug!(status = ?facets.status, "sender facets unavailable");
            return Ok(Vec::new());
        }

        {
            let mut state = self.inner.state.lock();
            state.facets.store(key, facets.senders.clone());
            state.senders = facets.senders.clone();
        }
        self.publish();
        Ok(facets.senders)
    }

    // ===== Navigation =====

    /// Open the hit's conversation in a search context centred on the hit.
    pub async fn select_hit(&self, hit: &SearchHit, engine: &TimelineEngine) -> Result<()> {
        let key = hit.conversation_key(&self.inner.account);
        info!(conversation = %key, id = hit.id, "opening search hit");
        engine.enter(&key, hit.id, ContextKind::Search).await
    }

    /// Stop the debounce timer and the index poll.
    pub fn shutdown(&self) {
        self.inner.debounce.abort();
        self.inner.poll.abort();
    }
}
