pub mod sse;

pub use sse::{SseDecoder, SseEvent};
