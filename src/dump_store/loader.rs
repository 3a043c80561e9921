//! Dump Directory Loader
//!
//! Reads the regeneration job's output directory:
//! - `index.json`: `{"patterns": [QueryPattern, ...]}`
//! - `<pattern_id>.json`: the latest `DumpRecord` for that pattern (optional)

use crate::dump_store::record::{DumpRecord, QueryPattern};
use crate::dump_store::store::DumpStore;
use crate::error::{RouterError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

pub const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DumpIndex {
    pub patterns: Vec<QueryPattern>,
}

/// Everything currently on disk, not yet published
#[derive(Debug, Clone, Default)]
pub struct DumpDirectory {
    pub patterns: Vec<QueryPattern>,
    pub records: Vec<DumpRecord>,
}

/// Read the index and every pattern's record file.
///
/// A pattern without a record file is allowed (its dump has not been
/// generated yet). A record file that does not parse, or whose
/// `pattern_id` disagrees with its file name, is corruption.
pub fn read_dump_dir(dir: &Path) -> Result<DumpDirectory> {
    let index_path = dir.join(INDEX_FILE);
    let raw = std::fs::read_to_string(&index_path).map_err(|e| {
        RouterError::DumpStore(format!("Failed to read {}: {}", index_path.display(), e))
    })?;
    let index: DumpIndex = serde_json::from_str(&raw).map_err(|e| {
        RouterError::DumpStore(format!("Failed to parse {}: {}", index_path.display(), e))
    })?;

    let mut records = Vec::new();
    for pattern in &index.patterns {
        let record_path = dir.join(format!("{}.json", pattern.id));
        if !record_path.exists() {
            warn!("No dump generated yet for pattern '{}'", pattern.id);
            continue;
        }
        let raw = std::fs::read_to_string(&record_path)?;
        let record: DumpRecord = serde_json::from_str(&raw).map_err(|e| {
            RouterError::DumpStore(format!("Corrupt dump {}: {}", record_path.display(), e))
        })?;
        if record.pattern_id != pattern.id {
            return Err(RouterError::DumpStore(format!(
                "Dump {} carries pattern_id '{}'",
                record_path.display(),
                record.pattern_id
            )));
        }
        records.push(record);
    }

    Ok(DumpDirectory {
        patterns: index.patterns,
        records,
    })
}

impl DumpStore {
    /// Build a store from a dump directory
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let contents = read_dump_dir(dir)?;
        info!(
            "Loaded {} patterns / {} dumps from {}",
            contents.patterns.len(),
            contents.records.len(),
            dir.display()
        );
        DumpStore::new(contents.patterns, contents.records)
    }
}

/// Write a directory in the loader's layout. Used by the regeneration job and tests.
pub fn write_dump_dir(dir: &Path, patterns: &[QueryPattern], records: &[DumpRecord]) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let index = DumpIndex {
        patterns: patterns.to_vec(),
    };
    std::fs::write(dir.join(INDEX_FILE), serde_json::to_string_pretty(&index)?)?;
    for record in records {
        write_record(dir, record)?;
    }
    Ok(())
}

/// Write one record file. Written to a temp file and renamed so a concurrent
/// reader never sees a half-written file.
pub fn write_record(dir: &Path, record: &DumpRecord) -> Result<()> {
    let final_path = dir.join(format!("{}.json", record.pattern_id));
    let tmp_path = dir.join(format!(".{}.json.tmp", record.pattern_id));
    std::fs::write(&tmp_path, serde_json::to_string_pretty(record)?)?;
    std::fs::rename(&tmp_path, &final_path)?;
    Ok(())
}
