//! Server-rendered dashboard for `GET /`.

use std::fmt::Write;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::query::DataPayload;
use crate::types::{AssetSnapshot, MarketSummary, Side};

const STYLE: &str = r#"
* { margin: 0; padding: 0; box-sizing: border-box; }
body { font-family: Inter, system-ui, sans-serif; background: #0a0a0f; color: #e2e8f0; }
.header { display: flex; justify-content: space-between; align-items: center; padding: 12px 24px;
  background: linear-gradient(135deg, #12121a, #1a1a2e); border-bottom: 1px solid #ffffff0d; }
.logo { font-size: 18px; font-weight: 700; }
.status { font-size: 12px; color: #64748b; display: flex; gap: 12px; align-items: center; }
.timer { font-family: monospace; background: #ffffff0d; padding: 6px 12px; border-radius: 6px; }
.main { padding: 20px; max-width: 1600px; margin: 0 auto; }
.grid { display: grid; gap: 12px; margin-bottom: 20px; }
.summary { grid-template-columns: repeat(4, 1fr); }
.cards { grid-template-columns: repeat(5, 1fr); }
.card { background: #14141f; border: 1px solid #ffffff0d; border-radius: 12px; padding: 14px 16px; }
.card.asset { cursor: pointer; }
.label { font-size: 10px; color: #64748b; text-transform: uppercase; margin-bottom: 4px; }
.value { font-size: 20px; font-weight: 700; }
.head { display: flex; justify-content: space-between; align-items: center; margin-bottom: 10px; }
.badge { font-size: 10px; font-weight: 600; padding: 4px 8px; border-radius: 4px; }
.very-bullish { background: #10b98133; color: #10b981; }
.bullish { background: #22c55e33; color: #22c55e; }
.neutral { background: #94a3b833; color: #94a3b8; }
.bearish { background: #f9731633; color: #f97316; }
.very-bearish { background: #ef444433; color: #ef4444; }
.ratio { display: flex; justify-content: space-between; font-size: 11px; margin-bottom: 4px; }
.long { color: #10b981; } .short { color: #ef4444; }
.bar { height: 6px; background: #ef4444; border-radius: 3px; overflow: hidden; }
.fill { height: 100%; background: #10b981; }
.stats { display: flex; justify-content: space-between; font-size: 11px; color: #64748b; margin-top: 10px; }
.loading { color: #64748b; font-size: 12px; }
.tabs button { background: none; border: none; color: #64748b; padding: 6px 12px; cursor: pointer; }
.tabs button.active { color: #818cf8; background: #6366f133; border-radius: 6px; }
table { width: 100%; font-size: 12px; border-collapse: collapse; }
th { text-align: left; padding: 10px 16px; color: #64748b; font-size: 10px; text-transform: uppercase; }
td { padding: 10px 16px; border-bottom: 1px solid #ffffff08; }
.mono { font-family: monospace; color: #94a3b8; }
.pos { color: #10b981; } .neg { color: #ef4444; }
.hidden { display: none; }
"#;

const SCRIPT: &str = r#"
function showDetails(asset) {
  document.querySelectorAll('.tabs button').forEach(b => b.classList.toggle('active', b.dataset.asset === asset));
  document.querySelectorAll('tbody[data-asset]').forEach(t => t.classList.toggle('hidden', t.dataset.asset !== asset));
}
let seconds = REFRESH_SECS;
setInterval(() => {
  seconds = Math.max(seconds - 1, 0);
  const m = String(Math.floor(seconds / 60)).padStart(2, '0');
  const s = String(seconds % 60).padStart(2, '0');
  document.getElementById('timer').textContent = m + ':' + s;
  if (seconds === 0) location.reload();
}, 1000);
"#;

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// `1234567.891` with `dp = 0` -> `1,234,568`.
pub fn thousands(d: Decimal, dp: usize) -> String {
    let abs = format!("{:.*}", dp, d.abs().round_dp(dp as u32));
    let (int, frac) = match abs.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (abs.as_str(), None),
    };

    let mut grouped = String::with_capacity(int.len() + int.len() / 3);
    for (i, ch) in int.chars().enumerate() {
        if i > 0 && (int.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let negative = d.is_sign_negative() && !d.round_dp(dp as u32).is_zero();
    let sign = if negative { "-" } else { "" };
    match frac {
        Some(f) => format!("{}{}.{}", sign, grouped, f),
        None => format!("{}{}", sign, grouped),
    }
}

pub fn short_address(addr: &str) -> String {
    let chars: Vec<char> = addr.chars().collect();
    if addr.contains("...") || chars.len() <= 14 {
        return addr.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

fn millions(d: Decimal) -> String {
    format!("{:.1}", (d / dec!(1000000)).round_dp(1))
}

fn asset_card(out: &mut String, asset: &str, snap: Option<&AssetSnapshot>) {
    let a = escape(asset);
    let _ = write!(
        out,
        r#"<div class="card asset" data-asset="{a}" onclick="showDetails(this.dataset.asset)">
<div class="head"><span class="value">{a}</span>"#
    );
    match snap {
        Some(s) => {
            let _ = write!(
                out,
                r#"<span class="badge {cls}">{emoji} {label}</span></div>
<div class="ratio"><span class="long">Long {lr}%</span><span class="short">Short {sr}%</span></div>
<div class="bar"><div class="fill" style="width: {lr}%"></div></div>
<div class="stats"><span>🟢 {lc}</span><span>🔴 {sc}</span><span>${m}M</span></div></div>"#,
                cls = s.sentiment_class,
                emoji = s.emoji,
                label = s.sentiment.label(),
                lr = s.long_ratio,
                sr = s.short_ratio,
                lc = s.long_count,
                sc = s.short_count,
                m = millions(s.total_long_size),
            );
        }
        None => {
            out.push_str(r#"</div><div class="loading">Loading…</div></div>"#);
        }
    }
}

fn positions_body(out: &mut String, asset: &str, snap: Option<&AssetSnapshot>, visible: bool) {
    let hidden = if visible { "" } else { " class=\"hidden\"" };
    let _ = write!(out, r#"<tbody data-asset="{}"{}>"#, escape(asset), hidden);
    let Some(s) = snap else {
        out.push_str(r#"<tr><td colspan="7" class="loading">No data yet</td></tr></tbody>"#);
        return;
    };
    for p in &s.positions {
        let (side_cls, pnl_cls, pnl_sign) = (
            match p.side {
                Side::Long => "long",
                Side::Short => "short",
            },
            if p.pnl >= Decimal::ZERO { "pos" } else { "neg" },
            if p.pnl >= Decimal::ZERO { "+" } else { "-" },
        );
        let _ = write!(
            out,
            r#"<tr><td>{rank}</td><td class="mono" title="{full}">{addr}</td><td class="{side_cls}">{side}</td><td>${size}</td><td>{lev}x</td><td class="{pnl_cls}">{pnl_sign}${pnl}</td><td>${entry}</td></tr>"#,
            rank = p.rank,
            full = escape(&p.address),
            addr = escape(&short_address(&p.address)),
            side = p.side.as_str(),
            size = thousands(p.size, 0),
            lev = p.leverage.normalize(),
            pnl = thousands(p.pnl.abs(), 0),
            entry = thousands(p.entry_price, 2),
        );
    }
    out.push_str("</tbody>");
}

pub fn render_dashboard(
    tracked: &[String],
    payload: &DataPayload,
    summary: &MarketSummary,
    refresh_every: Duration,
) -> String {
    let last = payload
        .last_update
        .map(|t| t.format("%H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "N/A".to_string());
    let ratio = summary
        .global_long_ratio
        .map(|r| format!("{}%", r))
        .unwrap_or_else(|| "-".to_string());
    let bias = summary.global_bias.map(|b| b.label()).unwrap_or("-");

    let mut out = String::with_capacity(16 * 1024);
    let _ = write!(
        out,
        r#"<!DOCTYPE html><html lang="en"><head><meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>🐋 Whale Tracker</title><style>{STYLE}</style></head><body>
<header class="header"><div class="logo">🐋 Whale Tracker</div>
<div class="status"><span class="long">● Live</span><span>{n} assets</span><div class="timer" id="timer">--:--</div></div></header>
<main class="main"><div class="grid summary">
<div class="card"><div class="label">🎯 Global bias</div><div class="value">{bias}</div></div>
<div class="card"><div class="label">📊 Global long ratio</div><div class="value long">{ratio}</div></div>
<div class="card"><div class="label">🐋 Whales tracked</div><div class="value">{whales}</div></div>
<div class="card"><div class="label">🕐 Last update</div><div class="value" style="font-size: 14px">{last}</div></div>
</div><div class="grid cards">"#,
        n = tracked.len(),
        whales = summary.whales_tracked,
    );

    for asset in tracked {
        let snap = payload.data.get(asset).map(|s| s.as_ref());
        asset_card(&mut out, asset, snap);
    }

    out.push_str(r#"</div><div class="card"><div class="head"><span>📋 Whale positions</span><div class="tabs">"#);
    for (i, asset) in tracked.iter().enumerate() {
        let a = escape(asset);
        let active = if i == 0 { " class=\"active\"" } else { "" };
        let _ = write!(
            out,
            r#"<button data-asset="{a}"{active} onclick="showDetails(this.dataset.asset)">{a}</button>"#
        );
    }
    out.push_str(
        r#"</div></div><table><thead><tr><th>#</th><th>Address</th><th>Side</th><th>Size</th><th>Leverage</th><th>PnL</th><th>Entry</th></tr></thead>"#,
    );
    for (i, asset) in tracked.iter().enumerate() {
        let snap = payload.data.get(asset).map(|s| s.as_ref());
        positions_body(&mut out, asset, snap, i == 0);
    }

    let script = SCRIPT.replace("REFRESH_SECS", &refresh_every.as_secs().to_string());
    let _ = write!(out, "</table></div></main><script>{script}</script></body></html>");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{aggregate, summarize};
    use crate::types::PositionRecord;
    use indexmap::IndexMap;
    use std::sync::Arc;

    #[test]
    fn thousands_grouping() {
        assert_eq!(thousands(dec!(0), 0), "0");
        assert_eq!(thousands(dec!(999), 0), "999");
        assert_eq!(thousands(dec!(1000), 0), "1,000");
        assert_eq!(thousands(dec!(1234567.891), 0), "1,234,568");
        assert_eq!(thousands(dec!(104500.5), 2), "104,500.50");
        assert_eq!(thousands(dec!(-50000), 0), "-50,000");
        assert_eq!(thousands(dec!(-0.2), 0), "0");
    }

    #[test]
    fn shortens_full_addresses_only() {
        assert_eq!(
            short_address("0x1234567890abcdef1234567890abcdef12345678"),
            "0x1234...5678"
        );
        assert_eq!(short_address("0x00ff00ff00ff00ff...beef"), "0x00ff00ff00ff00ff...beef");
    }

    #[test]
    fn renders_cards_rows_and_loading_state() {
        let btc = aggregate(
            "BTC",
            vec![PositionRecord {
                rank: 1,
                address: "<script>".into(),
                side: Side::Long,
                size: dec!(2500000),
                leverage: dec!(10),
                pnl: dec!(-1200),
                entry_price: dec!(104000),
            }],
        );
        let mut data = IndexMap::new();
        data.insert("BTC".to_string(), Arc::new(btc));
        let payload = DataPayload { data, last_update: None };
        let summary = summarize(payload.data.values().map(|s| s.as_ref()));
        let tracked = vec!["BTC".to_string(), "ETH".to_string()];

        let html = render_dashboard(&tracked, &payload, &summary, Duration::from_secs(300));
        assert!(html.contains("VERY BULLISH"));
        assert!(html.contains("$2.5M"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<td class=\"mono\" title=\"<script>\""));
        assert!(html.contains("-$1,200"));
        assert!(html.contains("$104,000.00"));
        assert!(html.contains("Loading…"));
        assert!(html.contains("N/A"));
        assert!(html.contains("let seconds = 300;"));
    }

    #[test]
    fn handlers_read_asset_from_data_attribute() {
        let payload = DataPayload {
            data: IndexMap::new(),
            last_update: None,
        };
        let summary = summarize(std::iter::empty::<&AssetSnapshot>());
        let tracked = vec!["X');alert(1);//".to_string()];

        let html = render_dashboard(&tracked, &payload, &summary, Duration::from_secs(60));
        assert!(!html.contains("showDetails('"));
        assert!(html.contains(r#"data-asset="X&#39;);alert(1);//""#));
        assert_eq!(html.matches("showDetails(this.dataset.asset)").count(), 2);
    }
}
