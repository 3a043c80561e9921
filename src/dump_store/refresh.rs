//! Dump Refresh
//!
//! Observes the regeneration job's output directory and publishes newer
//! versions into the store. The job never calls into the router; this task
//! only swaps the snapshot pointer.

use crate::dump_store::loader::read_dump_dir;
use crate::dump_store::store::DumpPublisher;
use crate::error::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Publish every pattern change and every record on disk that is newer than
/// the one being served, as one snapshot swap. Returns the number of records
/// published.
pub fn refresh_once(dir: &Path, publisher: &DumpPublisher) -> Result<usize> {
    let contents = read_dump_dir(dir)?;
    let published = publisher.publish_batch(contents.patterns, contents.records)?;
    for (id, version) in &published {
        info!("Picked up '{}' version {}", id, version);
    }
    Ok(published.len())
}

/// Poll `dir` every `interval` until the returned handle is aborted.
/// A failed pass is logged and the currently served snapshot is kept.
pub fn spawn_refresh(dir: PathBuf, publisher: DumpPublisher, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let dir = dir.clone();
            let publisher = publisher.clone();
            let pass = tokio::task::spawn_blocking(move || refresh_once(&dir, &publisher)).await;
            match pass {
                Ok(Ok(0)) => debug!("Dump refresh: nothing new"),
                Ok(Ok(n)) => info!("Dump refresh published {} records", n),
                Ok(Err(e)) => warn!("Dump refresh failed, keeping current snapshot: {}", e),
                Err(e) => warn!("Dump refresh task panicked: {}", e),
            }
        }
    })
}
