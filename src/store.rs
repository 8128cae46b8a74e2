use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::error::QueryError;
use crate::types::AssetSnapshot;

#[derive(Default)]
struct StoreState {
    snapshots: HashMap<String, Arc<AssetSnapshot>>,
    last_update: Option<DateTime<Utc>>,
}

/// Latest published snapshot per tracked asset.
///
/// Snapshots are swapped in whole as `Arc`s, so a reader holds either the old or the new value
/// for an asset and never a half-built one. Assets are independent: a reader may observe some
/// assets from the current cycle and others from the previous one.
pub struct SnapshotStore {
    tracked: Vec<String>,
    state: RwLock<StoreState>,
}

impl SnapshotStore {
    pub fn new(tracked: Vec<String>) -> Self {
        Self {
            tracked,
            state: RwLock::new(StoreState::default()),
        }
    }

    pub fn tracked(&self) -> &[String] {
        &self.tracked
    }

    pub fn is_tracked(&self, asset: &str) -> bool {
        self.tracked.iter().any(|a| a == asset)
    }

    pub fn publish(&self, asset: &str, snapshot: AssetSnapshot) -> Result<(), QueryError> {
        if !self.is_tracked(asset) {
            return Err(QueryError::InvalidAsset(asset.to_string()));
        }
        let snapshot = Arc::new(snapshot);
        self.state.write().snapshots.insert(asset.to_string(), snapshot);
        Ok(())
    }

    pub fn publish_cycle_complete(&self, at: DateTime<Utc>) {
        self.state.write().last_update = Some(at);
    }

    pub fn get_one(&self, asset: &str) -> Option<Arc<AssetSnapshot>> {
        self.state.read().snapshots.get(asset).cloned()
    }

    /// Assets with data, in tracked order, plus the last completed cycle time.
    pub fn get_all(&self) -> (IndexMap<String, Arc<AssetSnapshot>>, Option<DateTime<Utc>>) {
        let st = self.state.read();
        let map = self
            .tracked
            .iter()
            .filter_map(|a| st.snapshots.get(a).map(|s| (a.clone(), s.clone())))
            .collect();
        (map, st.last_update)
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.state.read().last_update
    }
}
