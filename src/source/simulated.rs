use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;

use crate::error::SourceError;
use crate::source::PositionSource;
use crate::types::{PositionRecord, Side};

const LEVERAGES: [u32; 6] = [2, 3, 5, 10, 20, 25];

fn reference_price(asset: &str) -> Decimal {
    match asset {
        "BTC" => Decimal::from(104_500),
        "ETH" => Decimal::from(3_850),
        "BNB" => Decimal::from(720),
        "TAO" => Decimal::from(580),
        "HYPE" => Decimal::from(35),
        _ => Decimal::from(100),
    }
}

/// Stand-in source that invents a plausible top-N book.
///
/// Output is stable for a given asset within a UTC hour, so repeated refreshes inside the hour
/// agree with each other.
pub struct SimulatedSource {
    top_n: usize,
    fixed_seed: Option<u64>,
}

impl SimulatedSource {
    pub fn new(top_n: usize) -> Self {
        Self { top_n, fixed_seed: None }
    }

    #[cfg(test)]
    fn with_seed(top_n: usize, seed: u64) -> Self {
        Self {
            top_n,
            fixed_seed: Some(seed),
        }
    }

    fn seed_for(&self, asset: &str) -> u64 {
        let epoch = self
            .fixed_seed
            .unwrap_or_else(|| (chrono::Utc::now().timestamp() / 3600) as u64);
        let mut h = DefaultHasher::new();
        asset.hash(&mut h);
        epoch.hash(&mut h);
        h.finish()
    }
}

pub fn generate(asset: &str, top_n: usize, seed: u64) -> Vec<PositionRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    let base = reference_price(asset);

    (0..top_n)
        .map(|i| {
            let side = if rng.gen_bool(0.5) { Side::Long } else { Side::Short };
            // cents
            let size = Decimal::new(rng.gen_range(10_000_000i64..500_000_000), 2);
            let leverage = Decimal::from(*LEVERAGES.choose(&mut rng).unwrap_or(&10));
            let pnl = Decimal::new(rng.gen_range(-5_000_000i64..15_000_000), 2);
            let drift = Decimal::new(rng.gen_range(9_500i64..10_500), 4);
            let address = format!("0x{:016x}...{:04x}", rng.gen::<u64>(), rng.gen::<u16>());

            PositionRecord {
                rank: i as u32 + 1,
                address,
                side,
                size,
                leverage,
                pnl,
                entry_price: (base * drift).round_dp(2),
            }
        })
        .collect()
}

#[async_trait]
impl PositionSource for SimulatedSource {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn fetch(&self, asset: &str) -> Result<Vec<PositionRecord>, SourceError> {
        Ok(generate(asset, self.top_n, self.seed_for(asset)))
    }
}
