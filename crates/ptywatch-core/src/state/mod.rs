mod store;

pub use store::{StatusHistoryEntry, StatusRecord, StatusStore};
