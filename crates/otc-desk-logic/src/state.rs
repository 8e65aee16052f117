//! Snapshot persistence for the order index
//!
//! The in-memory index writes a versioned JSON snapshot after every mutation
//! and reloads it on open. Writes are atomic (write to .tmp, then rename), so a
//! crash mid-write leaves the previous snapshot intact. These functions block;
//! the index calls `save_snapshot` through `spawn_blocking`.
//!
//! Unlike a cache, a snapshot that exists but cannot be read is an error: an
//! index silently starting empty would let an already-listed escrow be listed
//! a second time.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::index::Order;

/// Current snapshot format version
const SNAPSHOT_VERSION: u32 = 1;

/// Persisted index contents
#[derive(Serialize, Deserialize)]
pub struct IndexSnapshot {
    /// Format version for future migration
    pub version: u32,
    /// ISO 8601 timestamp when the snapshot was written
    pub saved_at: String,
    /// Live orders, oldest first
    pub orders: Vec<Order>,
}

impl IndexSnapshot {
    pub fn new(orders: Vec<Order>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: chrono::Utc::now().to_rfc3339(),
            orders,
        }
    }
}

/// Save a snapshot atomically
pub fn save_snapshot(path: &Path, snapshot: &IndexSnapshot) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot).context("Failed to serialize snapshot")?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &json)
        .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to move snapshot into {}", path.display()))?;
    debug!("Index snapshot saved to {} ({} orders)", path.display(), snapshot.orders.len());
    Ok(())
}

/// Load a snapshot. Returns `None` if the file does not exist.
pub fn load_snapshot(path: &Path) -> Result<Option<IndexSnapshot>> {
    if !path.exists() {
        return Ok(None);
    }

    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read index snapshot {}", path.display()))?;
    let snapshot: IndexSnapshot = serde_json::from_str(&data)
        .with_context(|| format!("Failed to parse index snapshot {}", path.display()))?;

    if snapshot.version != SNAPSHOT_VERSION {
        bail!(
            "Index snapshot version {} != expected {} in {}",
            snapshot.version,
            SNAPSHOT_VERSION,
            path.display()
        );
    }

    info!(
        "Loaded index snapshot from {} (saved at {}, {} orders)",
        path.display(),
        snapshot.saved_at,
        snapshot.orders.len()
    );
    Ok(Some(snapshot))
}
