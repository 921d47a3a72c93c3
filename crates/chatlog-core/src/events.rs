use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::{ConversationKey, MessageId};
use crate::timeline::context::{ContextKind, Direction};
use crate::timeline::viewport::ScrollAnchor;

/// Emitted by the timeline engine at the point of each mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum TimelineEvent {
    /// Selected conversation changed (`None` = nothing selected)
    ConversationChanged { key: Option<ConversationKey> },
    /// The window for `key` was replaced, extended or edited
    WindowChanged { key: ConversationKey },
    /// Pin the viewport to the newest record
    ScrollToTail { key: ConversationKey },
    /// Content was inserted above the viewport; restore with the new height
    PreserveScroll { key: ConversationKey, anchor: ScrollAnchor },
    /// Bring a record into view
    RevealRecord { key: ConversationKey, id: MessageId },
    /// Briefly highlight a record (anchor of a context session)
    FlashRecord { key: ConversationKey, id: MessageId },
    ClearFlash,
    ContextEntered {
        key: ConversationKey,
        kind: ContextKind,
        anchor_id: MessageId,
    },
    ContextExited { key: ConversationKey },
    /// A context page came back empty; that direction will not be fetched again
    ContextEndReached {
        key: ConversationKey,
        direction: Direction,
    },
    /// Conversation-scoped, non-fatal failure
    Error { key: ConversationKey, message: String },
}

/// Receiver for timeline events.
///
/// Called synchronously on the task that performed the mutation; hosts that
/// render on another thread should hop there themselves.
pub trait TimelineCallback: Send + Sync {
    fn on_event(&self, event: &TimelineEvent);
}

impl<F> TimelineCallback for F
where
    F: Fn(&TimelineEvent) + Send + Sync,
{
    fn on_event(&self, event: &TimelineEvent) {
        self(event)
    }
}

/// Fan-out of events to attached callbacks.
#[derive(Default)]
pub(crate) struct EventEmitter {
    callbacks: Mutex<Vec<Arc<dyn TimelineCallback>>>,
}

impl EventEmitter {
    pub fn attach(&self, callback: Arc<dyn TimelineCallback>) {
        self.callbacks.lock().push(callback);
    }

    pub fn clear(&self) {
        self.callbacks.lock().clear();
    }

    pub fn emit(&self, event: TimelineEvent) {
        let callbacks: Vec<_> = self.callbacks.lock().clone();
        for callback in callbacks {
            callback.on_event(&event);
        }
    }

    pub fn emit_all(&self, events: Vec<TimelineEvent>) {
        for event in events {
            self.emit(event);
        }
    }
}
