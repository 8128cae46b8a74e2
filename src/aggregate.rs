//! Turns raw position lists into per-asset snapshots and a cross-asset summary.
//!
//! Everything here is pure: same input, same output.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::types::{AssetSnapshot, MarketBias, MarketSummary, PositionRecord, Sentiment, Side};

/// Percentage of `part` in `total`, rounded to one decimal place.
fn pct(part: usize, total: usize) -> Decimal {
    (Decimal::from(part) * dec!(100) / Decimal::from(total)).round_dp(1)
}

pub fn classify(long_ratio: Decimal) -> Sentiment {
    if long_ratio >= dec!(75) {
        Sentiment::VeryBullish
    } else if long_ratio >= dec!(60) {
        Sentiment::Bullish
    } else if long_ratio >= dec!(45) {
        Sentiment::Neutral
    } else if long_ratio >= dec!(30) {
        Sentiment::Bearish
    } else {
        Sentiment::VeryBearish
    }
}

pub fn aggregate(asset: &str, records: Vec<PositionRecord>) -> AssetSnapshot {
    let mut long_count = 0usize;
    let mut short_count = 0usize;
    let mut total_long_size = Decimal::ZERO;
    let mut total_short_size = Decimal::ZERO;

    for r in &records {
        match r.side {
            Side::Long => {
                long_count += 1;
                total_long_size += r.size;
            }
            Side::Short => {
                short_count += 1;
                total_short_size += r.size;
            }
        }
    }

    let total = long_count + short_count;
    let (long_ratio, short_ratio) = if total > 0 {
        let l = pct(long_count, total);
        (l, dec!(100) - l)
    } else {
        (dec!(50.0), dec!(50.0))
    };

    let sentiment = classify(long_ratio);

    AssetSnapshot {
        asset: asset.to_string(),
        positions: records,
        long_count,
        short_count,
        long_ratio,
        short_ratio,
        total_long_size,
        total_short_size,
        sentiment,
        sentiment_class: sentiment.css_class().to_string(),
        emoji: sentiment.emoji().to_string(),
    }
}

pub fn bias(global_long_ratio: Decimal) -> MarketBias {
    if global_long_ratio >= dec!(65) {
        MarketBias::StrongLong
    } else if global_long_ratio >= dec!(55) {
        MarketBias::LeaningLong
    } else if global_long_ratio <= dec!(35) {
        MarketBias::StrongShort
    } else if global_long_ratio <= dec!(45) {
        MarketBias::LeaningShort
    } else {
        MarketBias::Balanced
    }
}

pub fn summarize<'a, I>(snapshots: I) -> MarketSummary
where
    I: IntoIterator<Item = &'a AssetSnapshot>,
{
    let mut s = MarketSummary {
        assets: 0,
        whales_tracked: 0,
        long_count: 0,
        short_count: 0,
        global_long_ratio: None,
        global_bias: None,
        total_long_size: Decimal::ZERO,
        total_short_size: Decimal::ZERO,
    };

    for snap in snapshots {
        s.assets += 1;
        s.whales_tracked += snap.positions.len();
        s.long_count += snap.long_count;
        s.short_count += snap.short_count;
        s.total_long_size += snap.total_long_size;
        s.total_short_size += snap.total_short_size;
    }

    let total = s.long_count + s.short_count;
    if total > 0 {
        let ratio = pct(s.long_count, total);
        s.global_long_ratio = Some(ratio);
        s.global_bias = Some(bias(ratio));
    }
    s
}
