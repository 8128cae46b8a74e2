use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "LONG",
            Side::Short => "SHORT",
        }
    }
}

/// One trader's open position on a single asset, as reported by a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub rank: u32,
    pub address: String,
    pub side: Side,
    /// Notional size in quote currency.
    pub size: Decimal,
    pub leverage: Decimal,
    /// Unrealized PnL.
    pub pnl: Decimal,
    pub entry_price: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Sentiment {
    VeryBullish,
    Bullish,
    Neutral,
    Bearish,
    VeryBearish,
}

impl Sentiment {
    pub fn label(&self) -> &'static str {
        match self {
            Sentiment::VeryBullish => "VERY BULLISH",
            Sentiment::Bullish => "BULLISH",
            Sentiment::Neutral => "NEUTRAL",
            Sentiment::Bearish => "BEARISH",
            Sentiment::VeryBearish => "VERY BEARISH",
        }
    }

    pub fn css_class(&self) -> &'static str {
        match self {
            Sentiment::VeryBullish => "very-bullish",
            Sentiment::Bullish => "bullish",
            Sentiment::Neutral => "neutral",
            Sentiment::Bearish => "bearish",
            Sentiment::VeryBearish => "very-bearish",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Sentiment::VeryBullish => "🚀",
            Sentiment::Bullish => "📈",
            Sentiment::Neutral => "➖",
            Sentiment::Bearish => "📉",
            Sentiment::VeryBearish => "💀",
        }
    }
}

/// Aggregated whale positioning for one asset at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSnapshot {
    pub asset: String,
    /// Rank ascending, as received from the source.
    pub positions: Vec<PositionRecord>,
    pub long_count: usize,
    pub short_count: usize,
    pub long_ratio: Decimal,
    pub short_ratio: Decimal,
    pub total_long_size: Decimal,
    pub total_short_size: Decimal,
    pub sentiment: Sentiment,
    pub sentiment_class: String,
    pub emoji: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketBias {
    StrongLong,
    LeaningLong,
    Balanced,
    LeaningShort,
    StrongShort,
}

impl MarketBias {
    pub fn label(&self) -> &'static str {
        match self {
            MarketBias::StrongLong => "🚀 STRONG LONG",
            MarketBias::LeaningLong => "📈 LEANING LONG",
            MarketBias::Balanced => "➖ BALANCED",
            MarketBias::LeaningShort => "📉 LEANING SHORT",
            MarketBias::StrongShort => "💀 STRONG SHORT",
        }
    }
}

/// Cross-asset totals shown in the dashboard header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSummary {
    pub assets: usize,
    pub whales_tracked: usize,
    pub long_count: usize,
    pub short_count: usize,
    /// `None` until at least one position has been seen.
    pub global_long_ratio: Option<Decimal>,
    pub global_bias: Option<MarketBias>,
    pub total_long_size: Decimal,
    pub total_short_size: Decimal,
}
