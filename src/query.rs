use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;

use crate::aggregate::summarize;
use crate::error::QueryError;
use crate::store::SnapshotStore;
use crate::types::{AssetSnapshot, MarketSummary};

/// Body of `GET /api/data`.
#[derive(Debug, Clone, Serialize)]
pub struct DataPayload {
    pub data: IndexMap<String, Arc<AssetSnapshot>>,
    pub last_update: Option<DateTime<Utc>>,
}

/// Read-only view over the store for request handlers. Never touches the network.
#[derive(Clone)]
pub struct QueryService {
    store: Arc<SnapshotStore>,
}

impl QueryService {
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        Self { store }
    }

    pub fn tracked(&self) -> &[String] {
        self.store.tracked()
    }

    pub fn snapshot_for(&self, asset: &str) -> Result<Arc<AssetSnapshot>, QueryError> {
        let asset = asset.trim().to_ascii_uppercase();
        if !self.store.is_tracked(&asset) {
            return Err(QueryError::InvalidAsset(asset));
        }
        self.store.get_one(&asset).ok_or(QueryError::NotReady(asset))
    }

    pub fn all_snapshots(&self) -> IndexMap<String, Arc<AssetSnapshot>> {
        self.store.get_all().0
    }

    pub fn last_update_time(&self) -> Option<DateTime<Utc>> {
        self.store.last_update()
    }

    /// Snapshots and timestamp taken under one read, so they belong together.
    pub fn data(&self) -> DataPayload {
        let (data, last_update) = self.store.get_all();
        DataPayload { data, last_update }
    }

    pub fn summary(&self) -> MarketSummary {
        let all = self.all_snapshots();
        summarize(all.values().map(|s| s.as_ref()))
    }
}
