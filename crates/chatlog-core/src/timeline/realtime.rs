//! Realtime tail-following merge.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::TimelineEngine;
use crate::backend::{ListMessagesRequest, SortOrder};
use crate::events::TimelineEvent;
use crate::normalizer;

/// External "re-check the tail" tick. Carries no payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeSignal {
    pub seq: u64,
    pub last_action: Option<String>,
}

impl RealtimeSignal {
    pub fn new(seq: u64) -> Self {
        Self {
            seq,
            last_action: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// No run was in flight; one was started
    Started,
    /// Folded into the trailing run of the in-flight task
    Coalesced,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoalescerStats {
    pub runs: u64,
    pub coalesced: u64,
}

#[derive(Default)]
struct CoalescerState {
    in_flight: bool,
    queued: bool,
    stats: CoalescerStats,
}

/// Single-flight task runner.
///
/// At most one run is in flight. Any number of signals arriving meanwhile
/// collapse into exactly one follow-up run after it finishes.
#[derive(Clone)]
pub struct Coalescer {
    state: Arc<Mutex<CoalescerState>>,
    busy: Arc<watch::Sender<bool>>,
}

impl Coalescer {
    pub fn new() -> Self {
        let (busy, _) = watch::channel(false);
        Self {
            state: Arc::new(Mutex::new(CoalescerState::default())),
            busy: Arc::new(busy),
        }
    }

    pub fn signal<F, Fut>(&self, task: F) -> SignalOutcome
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        {
            let mut state = self.state.lock();
            if state.in_flight {
                state.queued = true;
                state.stats.coalesced += 1;
                return SignalOutcome::Coalesced;
            }
            state.in_flight = true;
            self.busy.send_replace(true);
        }

        let state = self.state.clone();
        let busy = self.busy.clone();
        tokio::spawn(async move {
            loop {
                task().await;

                let again = {
                    let mut state = state.lock();
                    state.stats.runs += 1;
                    if state.queued {
                        state.queued = false;
                        true
                    } else {
                        state.in_flight = false;
                        busy.send_replace(false);
                        false
                    }
                };
                if !again {
                    break;
                }
            }
        });
        SignalOutcome::Started
    }

    pub fn is_busy(&self) -> bool {
        *self.busy.borrow()
    }

    /// Resolves once no run is in flight or queued.
    pub async fn idle(&self) {
        let mut rx = self.busy.subscribe();
        // The sender lives in `self`, so the channel cannot close here
        let _ = rx.wait_for(|busy| !*busy).await;
    }

    pub fn stats(&self) -> CoalescerStats {
        self.state.lock().stats
    }
}

impl Default for Coalescer {
    fn default() -> Self {
        Self::new()
    }
}

impl TimelineEngine {
    /// Schedule a tail merge for the selected conversation.
    pub fn on_realtime_signal(&self, signal: RealtimeSignal) -> SignalOutcome {
        let engine = self.clone();
        let outcome = self.inner.realtime.signal(move || {
            let engine = engine.clone();
            async move { engine.run_merge().await }
        });
        debug!(
            seq = signal.seq,
            last_action = signal.last_action.as_deref().unwrap_or(""),
            ?outcome,
            "realtime signal"
        );
        outcome
    }

    /// Wait until no realtime merge is running or queued.
    pub async fn realtime_idle(&self) {
        self.inner.realtime.idle().await
    }

    pub fn realtime_stats(&self) -> CoalescerStats {
        self.inner.realtime.stats()
    }

    /// Fetch the newest tail and append ids not already held.
    ///
    /// Best effort: a no-op during a context session, with nothing selected,
    /// or while a pagination fetch is in flight. Failures are only logged.
    async fn run_merge(&self) {
        let threshold = self.inner.config.edge_threshold_px;
        let (key, epoch, was_at_tail, request) = {
            let state = self.inner.state.lock();
            if state.context.is_some() || state.pagination.is_busy() {
                return;
            }
            let Some(key) = state.selected.clone() else {
                return;
            };
            if !state.store.contains(&key) {
                return;
            }
            let was_at_tail = state
                .viewport
                .map(|m| m.near_bottom(threshold))
                .unwrap_or(true);
            let request = ListMessagesRequest {
                key: key.clone(),
                limit: self.inner.config.realtime_tail_size,
                offset: 0,
                order: SortOrder::Asc,
                render_filter: state.render_filters.get(&key).copied(),
            };
            (key, state.selection_epoch, was_at_tail, request)
        };

        let page = match self.inner.backend.list_messages(request).await {
            Ok(page) => page,
            Err(err) => {
                warn!(conversation = %key, error = %err, "realtime merge failed");
                return;
            }
        };

        let mut events = Vec::new();
        {
            let mut state = self.inner.state.lock();
            if !state.is_current(&key, epoch) || state.context.is_some() {
                debug!(conversation = %key, "dropping stale realtime tail");
                return;
            }
            let meta = state.meta_for(&key);
            let fresh: Vec<_> = match state.store.get(&key) {
                Some(window) => normalizer::normalize_all(&page.messages, &key, &meta)
                    .into_iter()
                    .filter(|r| !window.contains(r.id))
                    .collect(),
                None => return,
            };
            let added = state.store.append_newer(&key, fresh);
            if added == 0 {
                return;
            }
            state.store.update_meta(&key, |m| {
                m.total_known = m.total_known.max(page.total);
            });
            debug!(conversation = %key, added, was_at_tail, "realtime merge applied");

            events.push(TimelineEvent::WindowChanged { key: key.clone() });
            if was_at_tail {
                events.push(TimelineEvent::ScrollToTail { key });
            }
        }
        self.commit(events);
    }
}
