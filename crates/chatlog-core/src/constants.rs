//! Engine-wide constants
//!
//! Centralized defaults for page sizes, thresholds and timer intervals.
//! `CoreConfig` starts from these values and may override any of them.

/// Default backend base URL
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5031";

/// Per-request timeout for backend calls
pub const REQUEST_TIMEOUT_MS: u64 = 15_000;

// Pagination
/// Records fetched per "load older" page and on full reload
pub const PAGE_SIZE: usize = 50;

/// Distance in pixels from the top/bottom edge that counts as "at the edge"
pub const EDGE_THRESHOLD_PX: f64 = 80.0;

// Context navigation
/// Records fetched before the anchor when entering a context session
pub const CONTEXT_BEFORE: usize = 35;
/// Records fetched after the anchor when entering a context session
pub const CONTEXT_AFTER: usize = 35;
/// Records fetched per before/after page inside a context session
pub const CONTEXT_PAGE_SIZE: usize = 35;

// Realtime
/// Size of the recent tail fetched on each realtime merge
pub const REALTIME_TAIL_SIZE: usize = 30;

// Search
/// Delay between the last keystroke and the search request
pub const SEARCH_DEBOUNCE_MS: u64 = 280;
/// Queries shorter than this (in chars, after trimming) never hit the backend
pub const SEARCH_MIN_QUERY_LEN: usize = 1;
/// Hits per search page
pub const SEARCH_PAGE_SIZE: usize = 20;
/// Index status poll interval while a build is running
pub const INDEX_POLL_INTERVAL_MS: u64 = 1_500;

// Export
/// Status poll interval used when the progress push channel is unavailable
pub const EXPORT_POLL_INTERVAL_MS: u64 = 1_000;

// Environment variables
pub const ENV_BASE_URL: &str = "CHATLOG_BASE_URL";
pub const ENV_LOG_FILTER: &str = "CHATLOG_LOG";
pub const ENV_LOG_FILE: &str = "CHATLOG_LOG_FILE";

/// Raw message type codes emitted by the decryption backend
pub mod raw_types {
    pub const TEXT: i64 = 1;
    pub const IMAGE: i64 = 3;
    pub const VOICE: i64 = 34;
    pub const CONTACT_CARD: i64 = 42;
    pub const VIDEO: i64 = 43;
    pub const EMOJI: i64 = 47;
    pub const LOCATION: i64 = 48;
    /// Rich "app" message; the concrete kind lives in the app sub-type
    pub const APP: i64 = 49;
    pub const VOIP: i64 = 50;
    pub const SYSTEM: i64 = 10_000;
    pub const REVOKE: i64 = 10_002;

    // App sub-types (carried in the row's `app_type`)
    pub const APP_LINK: i64 = 5;
    pub const APP_FILE: i64 = 6;
    pub const APP_QUOTE: i64 = 57;
    pub const APP_TRANSFER: i64 = 2_000;
    pub const APP_RED_PACKET: i64 = 2_001;
}
