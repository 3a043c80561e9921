//! Dump Store
//!
//! Versioned, read-only repository of pre-computed answers keyed by pattern id.

pub mod loader;
pub mod record;
pub mod refresh;
pub mod store;

pub use loader::{read_dump_dir, write_dump_dir, write_record, DumpIndex};
pub use record::{row, DumpRecord, QueryPattern, RefreshCadence, Row};
pub use refresh::{refresh_once, spawn_refresh};
pub use store::{DumpPublisher, DumpSnapshot, DumpStore};
