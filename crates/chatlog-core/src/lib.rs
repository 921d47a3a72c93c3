pub mod backend;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod export;
pub mod models;
pub mod normalizer;
pub mod observable;
pub mod search;
pub mod store;
pub mod streaming;
pub mod timeline;
pub mod tracing_setup;

mod task;

#[cfg(test)]
mod testing;

// Re-export the engine handles at crate root for convenience
pub use backend::{http::HttpBackend, ArchiveBackend};
pub use config::CoreConfig;
pub use error::{CoreError, Result};
pub use events::{TimelineCallback, TimelineEvent};
pub use export::{ExportSnapshot, ExportTracker, ProgressChannel};
pub use search::{SearchController, SearchSnapshot};
pub use timeline::{
    ContextKind, Direction, RealtimeSignal, ScrollAction, ScrollMetrics, TimelineEngine,
    TimelineSnapshot,
};
