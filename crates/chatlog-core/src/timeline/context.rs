//! Anchor-based context windows.
//!
//! Entering a context session swaps the conversation's normal window out
//! for a slice centred on an anchor record; exiting puts the saved window
//! back verbatim. At most one session exists per engine.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::viewport::{EdgeGate, ScrollAnchor, ScrollMetrics};
use super::{TimelineEngine, TimelineState};
use crate::backend::AroundRequest;
use crate::error::Result;
use crate::events::TimelineEvent;
use crate::models::{AnchorKind, ConversationKey, MessageId, MessageRecord};
use crate::normalizer;
use crate::store::{ConversationWindow, WindowMeta};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextKind {
    Search,
    Date,
    First,
}

impl ContextKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextKind::Search => "search",
            ContextKind::Date => "date",
            ContextKind::First => "first",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Before,
    After,
}

#[derive(Debug, Clone)]
pub struct ContextSession {
    pub id: u64,
    pub key: ConversationKey,
    pub kind: ContextKind,
    pub anchor_id: MessageId,
    /// Heuristic: assumed true unless the anchor is the first message
    pub has_more_before: bool,
    pub has_more_after: bool,
    pub loading_before: bool,
    pub loading_after: bool,
    /// The around-anchor fetch has not landed yet
    pub entering: bool,
    pub saved_window: Option<ConversationWindow>,
    pub top_gate: EdgeGate,
    pub bottom_gate: EdgeGate,
}

impl ContextSession {
    fn new(
        id: u64,
        key: ConversationKey,
        kind: ContextKind,
        anchor_id: MessageId,
        saved_window: Option<ConversationWindow>,
    ) -> Self {
        Self {
            id,
            key,
            kind,
            anchor_id,
            has_more_before: kind != ContextKind::First,
            has_more_after: true,
            loading_before: false,
            loading_after: false,
            entering: true,
            saved_window,
            top_gate: EdgeGate::new(),
            bottom_gate: EdgeGate::new(),
        }
    }

    /// Whether a page in `direction` may be requested right now.
    pub fn can_load(&self, direction: Direction) -> bool {
        if self.entering {
            return false;
        }
        match direction {
            Direction::Before => self.has_more_before && !self.loading_before,
            Direction::After => self.has_more_after && !self.loading_after,
        }
    }

    fn set_loading(&mut self, direction: Direction, loading: bool) {
        match direction {
            Direction::Before => self.loading_before = loading,
            Direction::After => self.loading_after = loading,
        }
    }

    fn end_reached(&mut self, direction: Direction) {
        match direction {
            Direction::Before => self.has_more_before = false,
            Direction::After => self.has_more_after = false,
        }
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            key: self.key.clone(),
            kind: self.kind,
            anchor_id: self.anchor_id,
            has_more_before: self.has_more_before,
            has_more_after: self.has_more_after,
            loading_before: self.loading_before,
            loading_after: self.loading_after,
            entering: self.entering,
        }
    }
}

/// Public view of the active session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextSnapshot {
    pub key: ConversationKey,
    pub kind: ContextKind,
    pub anchor_id: MessageId,
    pub has_more_before: bool,
    pub has_more_after: bool,
    pub loading_before: bool,
    pub loading_after: bool,
    pub entering: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitOutcome {
    pub key: ConversationKey,
    /// False when there was no window to restore
    pub restored: bool,
}

/// Tear down the active session, restoring the saved window.
fn exit_session(state: &mut TimelineState) -> Option<(ExitOutcome, Vec<TimelineEvent>)> {
    let session = state.context.take()?;
    let key = session.key;

    let restored = match session.saved_window {
        Some(window) => {
            state.store.restore(window);
            true
        }
        None => {
            state.store.remove(&key);
            false
        }
    };
    state.flashed = None;
    if state.is_selected(&key) {
        state.invalidate_window_fetches();
    }
    info!(conversation = %key, restored, "context session exited");

    let events = vec![
        TimelineEvent::ContextExited { key: key.clone() },
        TimelineEvent::ClearFlash,
        TimelineEvent::WindowChanged { key: key.clone() },
    ];
    Some((ExitOutcome { key, restored }, events))
}

pub(crate) fn exit_locked(state: &mut TimelineState) -> Vec<TimelineEvent> {
    exit_session(state)
        .map(|(_, events)| events)
        .unwrap_or_default()
}

/// Put the pre-session window back after a failed enter.
fn abandon_enter(state: &mut TimelineState, session: ContextSession) {
    match session.saved_window {
        Some(window) => state.store.restore(window),
        None => state.store.remove(&session.key),
    }
    state.flashed = None;
}

impl TimelineEngine {
    /// Snapshot of the active context session, if any.
    pub fn context(&self) -> Option<ContextSnapshot> {
        self.inner
            .state
            .lock()
            .context
            .as_ref()
            .map(ContextSession::snapshot)
    }

    /// Swap the window for `key` to a slice centred on `anchor_id`.
    ///
    /// Selects `key` if needed. A session on another conversation is exited
    /// first; re-entering on the same conversation keeps the window saved by
    /// the original session so `exit` still returns to normal browsing.
    pub async fn enter(
        &self,
        key: &ConversationKey,
        anchor_id: MessageId,
        kind: ContextKind,
    ) -> Result<()> {
        let (session_id, request) = {
            let mut state = self.inner.state.lock();
            let mut events = Vec::new();

            if state.context.as_ref().is_some_and(|s| &s.key != key) {
                events.extend(exit_locked(&mut state));
            }
            if !state.is_selected(key) {
                state.select(key);
                events.push(TimelineEvent::ConversationChanged {
                    key: Some(key.clone()),
                });
            }

            let saved_window = match state.context.take() {
                Some(previous) => previous.saved_window,
                None => state.store.get(key).cloned(),
            };
            let session_id = state.next_session_id;
            state.next_session_id += 1;
            state.context = Some(ContextSession::new(
                session_id,
                key.clone(),
                kind,
                anchor_id,
                saved_window,
            ));
            state.invalidate_window_fetches();
            state.flashed = None;
            state.errors.remove(key);
            drop(state);
            self.commit(events);

            let request = AroundRequest {
                key: key.clone(),
                anchor_id,
                before: self.inner.config.context_before,
                after: self.inner.config.context_after,
            };
            (session_id, request)
        };
        info!(conversation = %key, anchor_id, kind = kind.as_str(), "entering context");

        let result = self.inner.backend.messages_around(request).await;

        let mut events = Vec::new();
        let outcome = {
            let mut state = self.inner.state.lock();
            if state.context.as_ref().map(|s| s.id) != Some(session_id) {
                debug!(conversation = %key, session_id, "dropping stale context response");
                return Ok(());
            }

            match result {
                Ok(page) => {
                    let meta = state.meta_for(key);
                    let records = normalizer::normalize_all(&page.messages, key, &meta);
                    let resolved = page.anchor_id.unwrap_or(anchor_id);
                    let total_known = state
                        .context
                        .as_ref()
                        .and_then(|s| s.saved_window.as_ref())
                        .map(|w| w.total_known())
                        .unwrap_or_default();
                    state.store.replace(
                        key,
                        records,
                        WindowMeta {
                            total_known,
                            has_more_older: false,
                        },
                    );
                    if let Some(session) = state.context.as_mut() {
                        session.entering = false;
                        session.anchor_id = resolved;
                    }
                    state.flashed = Some(resolved);

                    events.push(TimelineEvent::WindowChanged { key: key.clone() });
                    events.push(TimelineEvent::ContextEntered {
                        key: key.clone(),
                        kind,
                        anchor_id: resolved,
                    });
                    events.push(TimelineEvent::RevealRecord {
                        key: key.clone(),
                        id: resolved,
                    });
                    events.push(TimelineEvent::FlashRecord {
                        key: key.clone(),
                        id: resolved,
                    });
                    Ok(())
                }
                Err(err) => {
                    error!(conversation = %key, anchor_id, error = %err, "context fetch failed");
                    if let Some(session) = state.context.take() {
                        abandon_enter(&mut state, session);
                    }
                    events.push(TimelineEvent::WindowChanged { key: key.clone() });
                    events.push(state.set_error(key, &err));
                    Err(err)
                }
            }
        };
        self.commit(events);
        outcome
    }

    /// Jump to the first message on `date`. Returns false (and changes
    /// nothing) when the day has no messages.
    pub async fn enter_date(&self, key: &ConversationKey, date: NaiveDate) -> Result<bool> {
        let anchor = self
            .inner
            .backend
            .anchor_for(key, AnchorKind::Day, Some(date))
            .await?;
        match anchor {
            Some(anchor) => {
                self.enter(key, anchor.anchor_id, ContextKind::Date).await?;
                Ok(true)
            }
            None => {
                debug!(conversation = %key, %date, "no messages on date");
                Ok(false)
            }
        }
    }

    /// Jump to the first message in the conversation.
    pub async fn enter_first(&self, key: &ConversationKey) -> Result<bool> {
        let anchor = self
            .inner
            .backend
            .anchor_for(key, AnchorKind::First, None)
            .await?;
        match anchor {
            Some(anchor) => {
                self.enter(key, anchor.anchor_id, ContextKind::First).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Leave the active session and restore the window saved on entry.
    ///
    /// When nothing was saved (the conversation had never been loaded) and
    /// the conversation is still selected, page 0 is loaded instead.
    pub async fn exit(&self) -> Result<Option<ExitOutcome>> {
        let (outcome, needs_reload) = {
            let mut state = self.inner.state.lock();
            let Some((outcome, events)) = exit_session(&mut state) else {
                return Ok(None);
            };
            let needs_reload = !outcome.restored && state.is_selected(&outcome.key);
            drop(state);
            self.commit(events);
            (outcome, needs_reload)
        };

        if needs_reload {
            self.reload(&outcome.key).await?;
        }
        Ok(Some(outcome))
    }

    pub async fn load_context_before(&self, metrics: Option<ScrollMetrics>) -> Result<usize> {
        self.load_context(Direction::Before, metrics).await
    }

    pub async fn load_context_after(&self) -> Result<usize> {
        self.load_context(Direction::After, None).await
    }

    async fn load_context(
        &self,
        direction: Direction,
        metrics: Option<ScrollMetrics>,
    ) -> Result<usize> {
        let page_size = self.inner.config.context_page_size;
        let (session_id, request, metrics) = {
            let mut state = self.inner.state.lock();
            let viewport = state.viewport;
            let Some(session) = state.context.as_ref() else {
                return Ok(0);
            };
            if !session.can_load(direction) {
                return Ok(0);
            }
            let key = session.key.clone();
            let session_id = session.id;

            let edge = state.store.get(&key).and_then(|w| match direction {
                Direction::Before => w.first_id(),
                Direction::After => w.last_id(),
            });
            let Some(edge) = edge else {
                return Ok(0);
            };
            let (before, after) = match direction {
                Direction::Before => (page_size, 0),
                Direction::After => (0, page_size),
            };
            if let Some(session) = state.context.as_mut() {
                session.set_loading(direction, true);
            }
            drop(state);
            self.commit(Vec::new());

            let request = AroundRequest {
                key,
                anchor_id: edge,
                before,
                after,
            };
            (session_id, request, metrics.or(viewport))
        };
        let key = request.key.clone();
        debug!(conversation = %key, ?direction, edge = request.anchor_id, "loading context page");

        let result = self.inner.backend.messages_around(request).await;

        let mut events = Vec::new();
        let outcome = {
            let mut state = self.inner.state.lock();
            let Some(session) = state.context.as_mut().filter(|s| s.id == session_id) else {
                debug!(conversation = %key, session_id, "dropping context page for ended session");
                return Ok(0);
            };
            session.set_loading(direction, false);

            match result {
                Ok(page) => {
                    let meta = state.meta_for(&key);
                    let records = normalizer::normalize_all(&page.messages, &key, &meta);
                    let fresh = strictly_new(state.store.get(&key), records, direction);

                    let added = match direction {
                        Direction::Before => state.store.prepend_older(&key, fresh),
                        Direction::After => state.store.append_newer(&key, fresh),
                    };
                    if added == 0 {
                        if let Some(session) = state.context.as_mut() {
                            session.end_reached(direction);
                        }
                        info!(conversation = %key, ?direction, "context end reached");
                        events.push(TimelineEvent::ContextEndReached {
                            key: key.clone(),
                            direction,
                        });
                    } else {
                        events.push(TimelineEvent::WindowChanged { key: key.clone() });
                        if direction == Direction::Before {
                            if let Some(metrics) = metrics {
                                events.push(TimelineEvent::PreserveScroll {
                                    key: key.clone(),
                                    anchor: ScrollAnchor::capture(&metrics),
                                });
                            }
                        }
                    }
                    Ok(added)
                }
                Err(err) => {
                    error!(conversation = %key, ?direction, error = %err, "context page failed");
                    events.push(state.set_error(&key, &err));
                    Err(err)
                }
            }
        };
        self.commit(events);
        outcome
    }
}

/// Records strictly beyond the window's edge in `direction` and not already held.
fn strictly_new(
    window: Option<&ConversationWindow>,
    records: Vec<MessageRecord>,
    direction: Direction,
) -> Vec<MessageRecord> {
    let Some(window) = window else {
        return records;
    };
    let edge = match direction {
        Direction::Before => window.records().first(),
        Direction::After => window.records().last(),
    };
    let Some(edge) = edge.map(MessageRecord::sort_key) else {
        return records;
    };
    records
        .into_iter()
        .filter(|r| !window.contains(r.id))
        .filter(|r| match direction {
            Direction::Before => r.sort_key() < edge,
            Direction::After => r.sort_key() > edge,
        })
        .collect()
}
