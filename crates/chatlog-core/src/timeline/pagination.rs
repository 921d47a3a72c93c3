//! Backward-fill pagination and full reloads of the normal window.

use tracing::{debug, error, info};

use super::viewport::{EdgeGate, ScrollAnchor, ScrollMetrics};
use super::{context, TimelineEngine};
use crate::backend::{ListMessagesRequest, SortOrder};
use crate::error::{CoreError, Result};
use crate::events::TimelineEvent;
use crate::models::ConversationKey;
use crate::normalizer;
use crate::store::WindowMeta;

/// Loading flags for the selected conversation's normal window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PaginationState {
    pub loading_more: bool,
    pub reloading: bool,
    pub top_gate: EdgeGate,
}

impl PaginationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.loading_more || self.reloading
    }
}

impl TimelineEngine {
    /// Fetch page 0 and replace the window wholesale, then pin to the tail.
    ///
    /// An active context session for `key` is exited first. On failure the
    /// previous window is kept and the error is recorded for `key`.
    pub async fn reload(&self, key: &ConversationKey) -> Result<()> {
        let (epoch, request) = {
            let mut state = self.inner.state.lock();
            if !state.is_selected(key) {
                return Err(CoreError::validation(format!("{key} is not selected")));
            }
            let mut events = Vec::new();
            if state.context_for(key).is_some() {
                events.extend(context::exit_locked(&mut state));
            }
            state.invalidate_window_fetches();
            state.pagination.reloading = true;
            state.errors.remove(key);

            let request = ListMessagesRequest {
                key: key.clone(),
                limit: self.inner.config.page_size,
                offset: 0,
                order: SortOrder::Asc,
                render_filter: state.render_filters.get(key).copied(),
            };
            let epoch = state.selection_epoch;
            drop(state);
            self.commit(events);
            (epoch, request)
        };

        let result = self.inner.backend.list_messages(request).await;

        let mut events = Vec::new();
        let outcome = {
            let mut state = self.inner.state.lock();
            if !state.is_current(key, epoch) {
                debug!(conversation = %key, "dropping stale reload response");
                return Ok(());
            }
            state.pagination.reloading = false;

            match result {
                Ok(page) => {
                    let meta = state.meta_for(key);
                    let has_more_older = page.has_more && !page.messages.is_empty();
                    let records = normalizer::normalize_all(&page.messages, key, &meta);
                    let window = state.store.replace(
                        key,
                        records,
                        WindowMeta {
                            total_known: page.total,
                            has_more_older,
                        },
                    );
                    info!(
                        conversation = %key,
                        loaded = window.len(),
                        total = page.total,
                        "window reloaded"
                    );
                    state.pagination.top_gate.rearm();
                    events.push(TimelineEvent::WindowChanged { key: key.clone() });
                    events.push(TimelineEvent::ScrollToTail { key: key.clone() });
                    Ok(())
                }
                Err(err) => {
                    error!(conversation = %key, error = %err, "reload failed");
                    events.push(state.set_error(key, &err));
                    Err(err)
                }
            }
        };
        self.commit(events);
        outcome
    }

    /// Fetch the next older page and merge it at the head.
    ///
    /// Returns the number of records added. Does nothing while a context
    /// session is active for `key`, while another pagination fetch is in
    /// flight, or once the window has no more older records.
    pub async fn load_older(
        &self,
        key: &ConversationKey,
        metrics: Option<ScrollMetrics>,
    ) -> Result<usize> {
        let (epoch, request, metrics) = {
            let mut state = self.inner.state.lock();
            if !state.is_selected(key) {
                return Err(CoreError::validation(format!("{key} is not selected")));
            }
            if state.context_for(key).is_some() || state.pagination.is_busy() {
                return Ok(0);
            }
            let Some(window) = state.store.get(key) else {
                return Ok(0);
            };
            if !window.has_more_older() {
                return Ok(0);
            }

            let request = ListMessagesRequest {
                key: key.clone(),
                limit: self.inner.config.page_size,
                offset: window.len(),
                order: SortOrder::Asc,
                render_filter: state.render_filters.get(key).copied(),
            };
            state.pagination.loading_more = true;
            let metrics = metrics.or(state.viewport);
            let epoch = state.selection_epoch;
            drop(state);
            self.commit(Vec::new());
            (epoch, request, metrics)
        };
        debug!(conversation = %key, offset = request.offset, "loading older page");

        let result = self.inner.backend.list_messages(request).await;

        let mut events = Vec::new();
        let outcome = {
            let mut state = self.inner.state.lock();
            if !state.is_current(key, epoch) {
                debug!(conversation = %key, "dropping stale backfill response");
                return Ok(0);
            }
            state.pagination.loading_more = false;

            match result {
                Ok(page) => {
                    let meta = state.meta_for(key);
                    let has_more_older = page.has_more && !page.messages.is_empty();
                    let records = normalizer::normalize_all(&page.messages, key, &meta);
                    let added = state.store.prepend_older(key, records);
                    state.store.update_meta(key, |m| {
                        m.total_known = page.total;
                        m.has_more_older = has_more_older;
                    });
                    state.errors.remove(key);

                    events.push(TimelineEvent::WindowChanged { key: key.clone() });
                    if added > 0 {
                        if let Some(metrics) = metrics {
                            events.push(TimelineEvent::PreserveScroll {
                                key: key.clone(),
                                anchor: ScrollAnchor::capture(&metrics),
                            });
                        }
                    }
                    Ok(added)
                }
                Err(err) => {
                    error!(conversation = %key, error = %err, "backfill failed");
                    events.push(state.set_error(key, &err));
                    Err(err)
                }
            }
        };
        self.commit(events);
        outcome
    }
}
