//! Storage traits and implementations
//!
//! The sink for normalized records. Both backends implement [`RecordStore`]
//! so the pipeline and tests can swap them freely.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{RecordStore, UnsubscribeLink};
