use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tokio::time::Instant;

use crate::error::SourceError;
use crate::source::PositionSource;
use crate::types::{PositionRecord, Side};

#[derive(Debug, Clone)]
pub struct HyperliquidOptions {
    pub host: String,
    /// Explicit accounts. Empty means discover them from the leaderboard.
    pub addresses: Vec<String>,
    pub leaderboard_url: String,
    pub leaderboard_depth: usize,
    pub top_n: usize,
    pub concurrency: usize,
    /// Time allowed for one `fetch`. Accounts not answered by then are left out.
    pub fetch_budget: Duration,
    pub account_timeout: Duration,
    /// How long one account's state is reused across assets.
    pub state_ttl: Duration,
}

/// Reads open perp positions of a set of large accounts from the Hyperliquid info API.
///
/// Accounts come from an explicit list, or else from the top of the public leaderboard
/// (fetched once and cached). Each account's state holds every coin, so it is fetched once per
/// `state_ttl` and shared by all assets.
pub struct HyperliquidSource {
    host: String,
    http: reqwest::Client,
    fixed_addresses: Vec<String>,
    leaderboard_url: String,
    leaderboard_depth: usize,
    discovered: OnceCell<Vec<String>>,
    states: Mutex<HashMap<String, (Instant, ClearinghouseState)>>,
    state_ttl: Duration,
    deadline: Duration,
    top_n: usize,
    concurrency: usize,
}

impl HyperliquidSource {
    pub fn new(opts: HyperliquidOptions) -> anyhow::Result<Self> {
        // Stop gathering a little before the caller's own timeout fires.
        let deadline = opts.fetch_budget.saturating_sub(opts.fetch_budget / 5);
        let request_timeout = opts.account_timeout.min(deadline).max(Duration::from_millis(1));
        let http = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            host: opts.host,
            http,
            fixed_addresses: opts.addresses,
            leaderboard_url: opts.leaderboard_url,
            leaderboard_depth: opts.leaderboard_depth.max(1),
            discovered: OnceCell::new(),
            states: Mutex::new(HashMap::new()),
            state_ttl: opts.state_ttl,
            deadline,
            top_n: opts.top_n,
            concurrency: opts.concurrency.max(1),
        })
    }

    async fn addresses(&self) -> Result<&[String], SourceError> {
        if !self.fixed_addresses.is_empty() {
            return Ok(self.fixed_addresses.as_slice());
        }
        let found = self
            .discovered
            .get_or_try_init(|| self.fetch_leaderboard())
            .await?;
        Ok(found.as_slice())
    }

    async fn fetch_leaderboard(&self) -> Result<Vec<String>, SourceError> {
        tracing::info!(
            url = %self.leaderboard_url,
            depth = self.leaderboard_depth,
            "discovering whale addresses"
        );
        let resp: LeaderboardResp = self
            .http
            .get(&self.leaderboard_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let out = top_accounts(resp, self.leaderboard_depth);
        if out.is_empty() {
            return Err(SourceError::Provider("leaderboard returned no accounts".into()));
        }
        tracing::info!(count = out.len(), "whale addresses discovered");
        Ok(out)
    }

    async fn fetch_state(&self, user: &str) -> Result<ClearinghouseState, SourceError> {
        let url = format!("{}/info", self.host.trim_end_matches('/'));
        let body = InfoReq {
            kind: "clearinghouseState",
            user: user.to_string(),
        };
        let state: ClearinghouseState = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(state)
    }

    /// Splits `addresses` into fresh cached states and accounts that need a request.
    fn cached(&self, addresses: &[String]) -> (Vec<(String, ClearinghouseState)>, Vec<String>) {
        let cache = self.states.lock();
        let mut fresh = Vec::with_capacity(addresses.len());
        let mut missing = vec![];
        for a in addresses {
            match cache.get(a) {
                Some((at, st)) if at.elapsed() < self.state_ttl => {
                    fresh.push((a.clone(), st.clone()))
                }
                _ => missing.push(a.clone()),
            }
        }
        (fresh, missing)
    }
}

#[async_trait]
impl PositionSource for HyperliquidSource {
    fn name(&self) -> &'static str {
        "hyperliquid"
    }

    async fn fetch(&self, asset: &str) -> Result<Vec<PositionRecord>, SourceError> {
        let addresses = self.addresses().await?;
        let deadline = Instant::now() + self.deadline;

        let (mut states, missing) = self.cached(addresses);
        let requested = missing.len();
        let mut last_err: Option<SourceError> = None;
        let mut timed_out = false;

        let mut pending = stream::iter(missing.into_iter().map(|user| async move {
            let res = self.fetch_state(&user).await;
            (user, res)
        }))
        .buffer_unordered(self.concurrency);

        loop {
            match tokio::time::timeout_at(deadline, pending.next()).await {
                Ok(Some((user, Ok(st)))) => {
                    self.states.lock().insert(user.clone(), (Instant::now(), st.clone()));
                    states.push((user, st));
                }
                Ok(Some((user, Err(e)))) => {
                    tracing::debug!(user = %user, error = %e, "clearinghouseState failed");
                    last_err = Some(e);
                }
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    break;
                }
            }
        }

        if timed_out {
            tracing::warn!(
                asset,
                accounts = states.len(),
                requested,
                "account fetch deadline reached, ranking what arrived"
            );
        }

        if states.is_empty() {
            if timed_out {
                return Err(SourceError::Timeout);
            }
            if let Some(e) = last_err {
                return Err(e);
            }
        }

        Ok(rank_positions(asset, states, self.top_n))
    }
}

/// Positions on `asset` across all accounts, largest notional first, truncated to `top_n`.
pub fn rank_positions(
    asset: &str,
    states: Vec<(String, ClearinghouseState)>,
    top_n: usize,
) -> Vec<PositionRecord> {
    let mut found: Vec<PositionRecord> = vec![];
    for (user, st) in states {
        for ap in st.asset_positions {
            let p = ap.position;
            if !p.coin.eq_ignore_ascii_case(asset) {
                continue;
            }
            if let Some(r) = convert_position(&user, p) {
                found.push(r);
            }
        }
    }

    found.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.address.cmp(&b.address)));
    found.truncate(top_n);
    for (i, r) in found.iter_mut().enumerate() {
        r.rank = i as u32 + 1;
    }
    found
}

fn convert_position(user: &str, p: Position) -> Option<PositionRecord> {
    let szi = parse_dec(&p.szi)?;
    let side = if szi > Decimal::ZERO {
        Side::Long
    } else if szi < Decimal::ZERO {
        Side::Short
    } else {
        return None;
    };

    Some(PositionRecord {
        rank: 0,
        address: user.to_string(),
        side,
        size: parse_dec(&p.position_value)?.abs(),
        leverage: Decimal::from(p.leverage.value),
        pnl: parse_dec(&p.unrealized_pnl).unwrap_or(Decimal::ZERO),
        entry_price: p.entry_px.as_deref().and_then(parse_dec).unwrap_or(Decimal::ZERO),
    })
}

fn top_accounts(resp: LeaderboardResp, depth: usize) -> Vec<String> {
    let mut rows: Vec<(Decimal, String)> = resp
        .leaderboard_rows
        .into_iter()
        .filter_map(|r| Some((parse_dec(&r.account_value)?, r.eth_address)))
        .collect();
    rows.sort_by(|a, b| b.0.cmp(&a.0));
    rows.into_iter().take(depth).map(|(_, a)| a).collect()
}

fn parse_dec(s: &str) -> Option<Decimal> {
    s.parse::<Decimal>().ok()
}

#[derive(Debug, Clone, Serialize)]
struct InfoReq {
    #[serde(rename = "type")]
    kind: &'static str,
    user: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearinghouseState {
    #[serde(default)]
    asset_positions: Vec<AssetPosition>,
}

#[derive(Debug, Clone, Deserialize)]
struct AssetPosition {
    position: Position,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Position {
    coin: String,
    szi: String,
    #[serde(default)]
    entry_px: Option<String>,
    position_value: String,
    unrealized_pnl: String,
    leverage: Leverage,
}

#[derive(Debug, Clone, Deserialize)]
struct Leverage {
    value: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeaderboardResp {
    #[serde(default)]
    leaderboard_rows: Vec<LeaderboardRow>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeaderboardRow {
    eth_address: String,
    account_value: String,
}
