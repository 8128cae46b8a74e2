use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSourceKind {
    Simulated,
    Hyperliquid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Comma separated, in display and refresh order.
    pub assets: String,
    pub top_n: usize,

    pub refresh_interval_sec: u64,
    pub inter_asset_delay_ms: u64,
    pub fetch_timeout_ms: u64,

    pub data_source: String,
    pub hyperliquid_host: String,
    pub whale_addresses: String,
    pub leaderboard_url: String,
    pub leaderboard_depth: usize,
    pub fetch_concurrency: usize,
    pub account_timeout_ms: u64,
    pub account_state_ttl_sec: u64,

    pub listen_addr: String,
    pub log_format: String,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let c = config::Config::builder()
            .set_default("assets", "BTC,ETH,BNB,TAO,HYPE")?
            .set_default("top_n", 30)?
            .set_default("refresh_interval_sec", 300)?
            .set_default("inter_asset_delay_ms", 300)?
            .set_default("fetch_timeout_ms", 10_000)?
            .set_default("data_source", "simulated")?
            .set_default("hyperliquid_host", "https://api.hyperliquid.xyz")?
            .set_default("whale_addresses", "")?
            .set_default(
                "leaderboard_url",
                "https://stats-data.hyperliquid.xyz/Mainnet/leaderboard",
            )?
            .set_default("leaderboard_depth", 100)?
            .set_default("fetch_concurrency", 8)?
            .set_default("account_timeout_ms", 3_000)?
            .set_default("account_state_ttl_sec", 60)?
            .set_default("listen_addr", "0.0.0.0:5000")?
            .set_default("log_format", "text")?
            .add_source(config::Environment::default())
            .build()?;
        let s: Settings = c.try_deserialize()?;
        s.validate()?;
        Ok(s)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tracked_assets().is_empty() {
            anyhow::bail!("ASSETS must name at least one symbol");
        }
        if self.top_n == 0 {
            anyhow::bail!("TOP_N must be positive");
        }
        if self.refresh_interval_sec == 0 {
            anyhow::bail!("REFRESH_INTERVAL_SEC must be positive");
        }
        if self.fetch_timeout_ms == 0 || self.account_timeout_ms == 0 {
            anyhow::bail!("FETCH_TIMEOUT_MS and ACCOUNT_TIMEOUT_MS must be positive");
        }
        self.source_kind()?;
        self.socket_addr()?;
        Ok(())
    }

    /// Upper-cased, de-duplicated, order preserved.
    pub fn tracked_assets(&self) -> Vec<String> {
        let mut out: Vec<String> = vec![];
        for a in split_list(&self.assets) {
            let a = a.to_ascii_uppercase();
            if !out.contains(&a) {
                out.push(a);
            }
        }
        out
    }

    pub fn whale_addresses(&self) -> Vec<String> {
        split_list(&self.whale_addresses)
    }

    pub fn source_kind(&self) -> anyhow::Result<DataSourceKind> {
        match self.data_source.trim().to_ascii_lowercase().as_str() {
            "simulated" | "sim" => Ok(DataSourceKind::Simulated),
            "hyperliquid" | "hl" => Ok(DataSourceKind::Hyperliquid),
            other => anyhow::bail!("unknown DATA_SOURCE: {}", other),
        }
    }

    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listen_addr
            .trim()
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid LISTEN_ADDR: {}", self.listen_addr))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_sec)
    }

    pub fn inter_asset_delay(&self) -> Duration {
        Duration::from_millis(self.inter_asset_delay_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn account_timeout(&self) -> Duration {
        Duration::from_millis(self.account_timeout_ms)
    }

    pub fn account_state_ttl(&self) -> Duration {
        Duration::from_secs(self.account_state_ttl_sec)
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|x| x.trim().to_string())
        .filter(|x| !x.is_empty())
        .collect()
}
