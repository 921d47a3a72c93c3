//! Search index lifecycle.
//!
//! `absent -> building -> {ready, error}`, and `ready | error -> building`
//! on an explicit (re)build request.

use crate::models::{BuildStatus, IndexPhase, SearchIndexState};

/// What an observed status did to the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexTransition {
    Unchanged,
    BecameReady,
    StartedBuilding,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexLifecycle {
    state: SearchIndexState,
    phase: IndexPhase,
    /// A status has been observed from the backend at least once
    known: bool,
}

impl IndexLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &SearchIndexState {
        &self.state
    }

    pub fn phase(&self) -> IndexPhase {
        self.phase
    }

    /// Ready and not rebuilding.
    pub fn is_queryable(&self) -> bool {
        self.known && self.state.is_queryable()
    }

    pub fn is_building(&self) -> bool {
        self.phase == IndexPhase::Building
    }

    /// An explicit (re)build was accepted by the backend.
    pub fn mark_building(&mut self) -> IndexTransition {
        self.state.build_status = BuildStatus::Building;
        self.state.error = None;
        self.known = true;
        self.set_phase(IndexPhase::Building)
    }

    /// Fold a status reported by the backend into the lifecycle.
    pub fn observe(&mut self, state: SearchIndexState) -> IndexTransition {
        let phase = if state.is_queryable() {
            IndexPhase::Ready
        } else {
            state.phase()
        };
        self.state = state;
        self.known = true;
        self.set_phase(phase)
    }

    fn set_phase(&mut self, phase: IndexPhase) -> IndexTransition {
        let previous = std::mem::replace(&mut self.phase, phase);
        if previous == phase {
            return IndexTransition::Unchanged;
        }
        match phase {
            IndexPhase::Ready => IndexTransition::BecameReady,
            IndexPhase::Building => IndexTransition::StartedBuilding,
            IndexPhase::Error => IndexTransition::Failed,
            IndexPhase::Absent => IndexTransition::Unchanged,
        }
    }
}
