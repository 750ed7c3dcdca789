//! File persistence for hot moments and broadcast history.

pub mod history_store;
pub mod hot_moment_store;

pub use history_store::HistoryStore;
pub use hot_moment_store::{session_date, DailyHotMoments, HotMomentStore, SessionEntry};
