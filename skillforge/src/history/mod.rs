//! Durable history of completed generations.

mod cache;
mod entry;

pub use cache::{HistoryCache, HISTORY_FILE};
pub use entry::{skill_name, EntryDraft, HistoryEntry};
