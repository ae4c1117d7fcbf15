//! Analysis history stores implementing `insight_core::RecordSink`.
//!
//! `SqliteRecordStore` keeps history in the `image_records` table of a SQLite
//! file; `MemoryRecordStore` keeps it in process for tests and ephemeral runs.

mod memory;
mod sqlite;

pub use memory::MemoryRecordStore;
pub use sqlite::SqliteRecordStore;
