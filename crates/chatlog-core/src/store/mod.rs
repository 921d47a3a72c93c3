pub mod window_store;

pub use window_store::{ConversationWindow, WindowMeta, WindowStore};
