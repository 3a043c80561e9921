//! Versioned, copy-on-write dump store
//!
//! Readers clone an `Arc<DumpSnapshot>` under a short read lock and work on
//! that snapshot; the publisher builds a complete new snapshot off-lock and
//! swaps the pointer. A reader therefore sees either the old or the new
//! version of a record, never a mix.

use crate::dump_store::record::{DumpRecord, QueryPattern};
use crate::error::{RouterError, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info};

/// An immutable, self-consistent view of every pattern and record
#[derive(Debug, Default)]
pub struct DumpSnapshot {
    generation: u64,
    patterns: Vec<Arc<QueryPattern>>,
    records: HashMap<String, Arc<DumpRecord>>,
}

impl DumpSnapshot {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn patterns(&self) -> &[Arc<QueryPattern>] {
        &self.patterns
    }

    pub fn pattern(&self, pattern_id: &str) -> Option<&Arc<QueryPattern>> {
        self.patterns.iter().find(|p| p.id == pattern_id)
    }

    pub fn record(&self, pattern_id: &str) -> Option<&Arc<DumpRecord>> {
        self.records.get(pattern_id)
    }

    pub fn records(&self) -> impl Iterator<Item = &Arc<DumpRecord>> {
        self.records.values()
    }

    /// When the current dump for a pattern was generated, if it has one
    pub fn generated_at(&self, pattern_id: &str) -> Option<DateTime<Utc>> {
        self.records.get(pattern_id).map(|r| r.generated_at)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

type SharedSnapshot = Arc<RwLock<Arc<DumpSnapshot>>>;

/// Read side of the dump store. Cheap to clone; all clones observe the same
/// version pointer.
#[derive(Clone)]
pub struct DumpStore {
    current: SharedSnapshot,
    writer: Arc<Mutex<()>>,
}

impl fmt::Debug for DumpStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("DumpStore")
            .field("generation", &snapshot.generation())
            .field("patterns", &snapshot.patterns().len())
            .field("records", &snapshot.len())
            .finish()
    }
}

impl DumpStore {
    pub fn empty() -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(DumpSnapshot::default()))),
            writer: Arc::new(Mutex::new(())),
        }
    }

    /// Build a store from an initial set of patterns and records.
    /// Every record must belong to a known pattern and pattern ids must be unique.
    pub fn new(patterns: Vec<QueryPattern>, records: Vec<DumpRecord>) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        for pattern in &patterns {
            if !seen.insert(pattern.id.clone()) {
                return Err(RouterError::DumpStore(format!(
                    "Duplicate pattern id '{}' in index",
                    pattern.id
                )));
            }
        }

        let mut by_id: HashMap<String, Arc<DumpRecord>> = HashMap::new();
        for record in records {
            if !seen.contains(&record.pattern_id) {
                return Err(RouterError::DumpStore(format!(
                    "Dump for unknown pattern '{}'",
                    record.pattern_id
                )));
            }
            match by_id.get(&record.pattern_id) {
                Some(existing) if existing.version >= record.version => continue,
                _ => {
                    by_id.insert(record.pattern_id.clone(), Arc::new(record));
                }
            }
        }

        let snapshot = DumpSnapshot {
            generation: 1,
            patterns: patterns.into_iter().map(Arc::new).collect(),
            records: by_id,
        };
        info!(
            "Dump store initialised with {} patterns and {} records",
            snapshot.patterns.len(),
            snapshot.records.len()
        );

        Ok(Self {
            current: Arc::new(RwLock::new(Arc::new(snapshot))),
            writer: Arc::new(Mutex::new(())),
        })
    }

    /// Current snapshot. Hold on to it for the duration of one request to get
    /// a consistent view across several lookups.
    pub fn snapshot(&self) -> Arc<DumpSnapshot> {
        // The lock only guards a pointer, so a poisoned lock still holds a valid one
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    pub fn lookup(&self, pattern_id: &str) -> Option<Arc<DumpRecord>> {
        self.snapshot().record(pattern_id).cloned()
    }

    pub fn list_patterns(&self, category: Option<&str>) -> Vec<QueryPattern> {
        self.snapshot()
            .patterns()
            .iter()
            .filter(|p| category.map_or(true, |c| p.category.eq_ignore_ascii_case(c)))
            .map(|p| p.as_ref().clone())
            .collect()
    }

    /// Write handle for the regeneration side. The router never holds one.
    pub fn publisher(&self) -> DumpPublisher {
        DumpPublisher {
            current: Arc::clone(&self.current),
            writer: Arc::clone(&self.writer),
        }
    }
}

impl Default for DumpStore {
    fn default() -> Self {
        Self::empty()
    }
}

/// The only write path into the store
#[derive(Clone)]
pub struct DumpPublisher {
    current: SharedSnapshot,
    writer: Arc<Mutex<()>>,
}

impl DumpPublisher {
    /// Publish a new version of a pattern's dump. The version must be
    /// strictly greater than the one currently served.
    pub fn publish(&self, record: DumpRecord) -> Result<u64> {
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let base = self.load();

        if base.pattern(&record.pattern_id).is_none() {
            return Err(RouterError::DumpStore(format!(
                "Cannot publish dump for unknown pattern '{}'",
                record.pattern_id
            )));
        }
        if let Some(existing) = base.record(&record.pattern_id) {
            if record.version <= existing.version {
                return Err(RouterError::DumpStore(format!(
                    "Stale publish for '{}': version {} <= served version {}",
                    record.pattern_id, record.version, existing.version
                )));
            }
        }

        let mut records = base.records.clone();
        debug!(
            "Publishing '{}' version {} ({} rows)",
            record.pattern_id,
            record.version,
            record.rows.len()
        );
        records.insert(record.pattern_id.clone(), Arc::new(record));

        let next = DumpSnapshot {
            generation: base.generation + 1,
            patterns: base.patterns.clone(),
            records,
        };
        Ok(self.swap(next))
    }

    /// Apply one refresh pass as a single swap: new or changed patterns plus
    /// every record newer than the one served. Records that are not newer are
    /// skipped. Nothing is swapped if nothing changed or any record is
    /// orphaned. Returns `(pattern_id, version)` for each record published.
    pub fn publish_batch(
        &self,
        patterns: Vec<QueryPattern>,
        records: Vec<DumpRecord>,
    ) -> Result<Vec<(String, u64)>> {
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let base = self.load();

        let mut next_patterns = base.patterns.clone();
        let mut patterns_changed = false;
        for pattern in patterns {
            match next_patterns.iter().position(|p| p.id == pattern.id) {
                Some(i) if next_patterns[i].as_ref() == &pattern => {}
                Some(i) => {
                    debug!("Pattern '{}' changed", pattern.id);
                    next_patterns[i] = Arc::new(pattern);
                    patterns_changed = true;
                }
                None => {
                    debug!("Pattern '{}' added", pattern.id);
                    next_patterns.push(Arc::new(pattern));
                    patterns_changed = true;
                }
            }
        }

        let mut next_records = base.records.clone();
        let mut published = Vec::new();
        for record in records {
            if !next_patterns.iter().any(|p| p.id == record.pattern_id) {
                return Err(RouterError::DumpStore(format!(
                    "Cannot publish dump for unknown pattern '{}'",
                    record.pattern_id
                )));
            }
            let newer = next_records
                .get(&record.pattern_id)
                .map_or(true, |served| record.version > served.version);
            if newer {
                published.push((record.pattern_id.clone(), record.version));
                next_records.insert(record.pattern_id.clone(), Arc::new(record));
            }
        }

        if patterns_changed || !published.is_empty() {
            self.swap(DumpSnapshot {
                generation: base.generation + 1,
                patterns: next_patterns,
                records: next_records,
            });
        }
        Ok(published)
    }

    fn load(&self) -> Arc<DumpSnapshot> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    fn swap(&self, next: DumpSnapshot) -> u64 {
        let generation = next.generation;
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(next);
        generation
    }
}
