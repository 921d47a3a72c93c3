pub mod calendar;
pub mod export;
pub mod record;
pub mod search;

pub use calendar::{Anchor, AnchorKind, DailyCounts};
pub use export::{DateRange, ExportFormat, ExportJob, ExportParams, ExportProgress, ExportStatus};
pub use record::{
    ConversationKey, ConversationMeta, MessageId, MessagePayload, MessageRecord, RawMessageRow,
    RenderKind,
};
pub use search::{
    BuildStatus, IndexPhase, SearchFilters, SearchHit, SearchIndexState, SearchPage, SearchScope,
    SenderOption,
};
