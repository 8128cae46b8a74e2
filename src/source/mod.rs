pub mod hyperliquid;
pub mod simulated;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{DataSourceKind, Settings};
use crate::error::SourceError;
use crate::types::PositionRecord;

/// Abstraction for whale position sources (Hyperliquid, simulated, etc.)
#[async_trait]
pub trait PositionSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Largest open positions on `asset`, rank ascending (1 = largest).
    async fn fetch(&self, asset: &str) -> Result<Vec<PositionRecord>, SourceError>;
}

pub use hyperliquid::{HyperliquidOptions, HyperliquidSource};
pub use simulated::SimulatedSource;

pub fn from_settings(s: &Settings) -> anyhow::Result<Arc<dyn PositionSource>> {
    let src: Arc<dyn PositionSource> = match s.source_kind()? {
        DataSourceKind::Simulated => Arc::new(SimulatedSource::new(s.top_n)),
        DataSourceKind::Hyperliquid => Arc::new(HyperliquidSource::new(HyperliquidOptions {
            host: s.hyperliquid_host.clone(),
            addresses: s.whale_addresses(),
            leaderboard_url: s.leaderboard_url.clone(),
            leaderboard_depth: s.leaderboard_depth,
            top_n: s.top_n,
            concurrency: s.fetch_concurrency,
            fetch_budget: s.fetch_timeout(),
            account_timeout: s.account_timeout(),
            state_ttl: s.account_state_ttl(),
        })?),
    };
    Ok(src)
}
