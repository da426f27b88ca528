//! Persistent state for orchestrations and their items.

mod sqlite;
mod store;
mod types;

pub use sqlite::SqliteStateStore;
pub use store::{ItemFilter, StateStore, StoreError};
pub use types::*;
