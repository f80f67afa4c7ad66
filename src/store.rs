// =============================================================================
// Order Store — injected persistence capability for the executed-order log
// =============================================================================
//
// The risk engine never touches ambient storage directly; it goes through
// this capability. The file-backed implementation reads the whole list once
// at startup and rewrites it whole on each append, using the atomic tmp +
// rename pattern so a crash mid-write never corrupts the log.
// =============================================================================

use std::path::PathBuf;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use tracing::info;

use crate::types::ExecutedOrder;

/// Load-on-start, rewrite-whole-on-append persistence for executed orders.
pub trait OrderStore: Send + Sync {
    fn load(&self) -> Result<Vec<ExecutedOrder>>;
    fn save(&self, orders: &[ExecutedOrder]) -> Result<()>;
}

// ---------------------------------------------------------------------------
// File-backed store
// ---------------------------------------------------------------------------

pub struct JsonOrderStore {
    path: PathBuf,
}

impl JsonOrderStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl OrderStore for JsonOrderStore {
    /// A missing file is an empty log, not an error.
    fn load(&self) -> Result<Vec<ExecutedOrder>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read order log from {}", self.path.display()))?;

        let orders: Vec<ExecutedOrder> = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse order log from {}", self.path.display()))?;

        info!(
            path = %self.path.display(),
            count = orders.len(),
            "executed-order log loaded"
        );
        Ok(orders)
    }

    fn save(&self, orders: &[ExecutedOrder]) -> Result<()> {
        let content =
            serde_json::to_string_pretty(orders).context("failed to serialise order log")?;

        let tmp_path = self.path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp order log to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, &self.path).with_context(|| {
            format!("failed to rename tmp order log to {}", self.path.display())
        })?;

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory store (tests and ephemeral sessions)
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryOrderStore {
    orders: RwLock<Vec<ExecutedOrder>>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OrderStore for MemoryOrderStore {
    fn load(&self) -> Result<Vec<ExecutedOrder>> {
        Ok(self.orders.read().clone())
    }

    fn save(&self, orders: &[ExecutedOrder]) -> Result<()> {
        *self.orders.write() = orders.to_vec();
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OrderSide;

    fn sample_order(id: &str) -> ExecutedOrder {
        ExecutedOrder {
            id: id.to_string(),
            side: OrderSide::Buy,
            quantity: 0.1,
            price: 50_001.0,
            cost: 5_000.1,
            timestamp: 1_700_000_000_000,
        }
    }

    #[test]
    fn missing_file_loads_empty_log() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonOrderStore::new(dir.path().join("orders.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonOrderStore::new(dir.path().join("orders.json"));

        let orders = vec![sample_order("a"), sample_order("b")];
        store.save(&orders).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, "a");
        assert_eq!(loaded[1].id, "b");
        assert!((loaded[0].cost - 5_000.1).abs() < f64::EPSILON);
    }

    #[test]
    fn save_rewrites_whole_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonOrderStore::new(dir.path().join("orders.json"));

        store.save(&[sample_order("a"), sample_order("b")]).unwrap();
        store.save(&[sample_order("c")]).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "c");
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orders.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = JsonOrderStore::new(path);
        assert!(store.load().is_err());
    }

    #[test]
    fn memory_store_roundtrips() {
        let store = MemoryOrderStore::new();
        store.save(&[sample_order("x")]).unwrap();
        assert_eq!(store.load().unwrap().len(), 1);
    }
}
