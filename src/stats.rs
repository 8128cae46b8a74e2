use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Default)]
pub struct Stats {
    start_ms: AtomicU64,
    last_cycle_ms: AtomicU64,

    cycles: AtomicU64,
    assets_refreshed: AtomicU64,
    fetch_failures: AtomicU64,
    fetch_timeouts: AtomicU64,

    manual_requests: AtomicU64,
}

impl Stats {
    pub fn new(now_ms: u64) -> Arc<Self> {
        let s = Arc::new(Self::default());
        s.start_ms.store(now_ms, Ordering::Relaxed);
        s
    }

    pub fn inc_cycle(&self, now_ms: u64) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.last_cycle_ms.store(now_ms, Ordering::Relaxed);
    }

    pub fn inc_refreshed(&self) {
        self.assets_refreshed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failure(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_timeout(&self) {
        self.fetch_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_manual_request(&self) {
        self.manual_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, now_ms: u64) -> StatsSnapshot {
        let start = self.start_ms.load(Ordering::Relaxed);
        let last = self.last_cycle_ms.load(Ordering::Relaxed);
        StatsSnapshot {
            now_ms,
            up_sec: now_ms.saturating_sub(start) / 1000,
            last_cycle_ms: if last == 0 { None } else { Some(last) },
            cycles: self.cycles.load(Ordering::Relaxed),
            assets_refreshed: self.assets_refreshed.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            fetch_timeouts: self.fetch_timeouts.load(Ordering::Relaxed),
            manual_requests: self.manual_requests.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub now_ms: u64,
    pub up_sec: u64,
    pub last_cycle_ms: Option<u64>,
    pub cycles: u64,
    pub assets_refreshed: u64,
    /// Includes timeouts.
    pub fetch_failures: u64,
    pub fetch_timeouts: u64,
    pub manual_requests: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_and_uptime() {
        let s = Stats::new(1_000);
        assert_eq!(s.snapshot(1_500).last_cycle_ms, None);

        s.inc_cycle(4_000);
        s.inc_refreshed();
        s.inc_refreshed();
        s.inc_failure();
        s.inc_timeout();
        s.inc_manual_request();

        let ss = s.snapshot(11_000);
        assert_eq!(ss.up_sec, 10);
        assert_eq!(ss.cycles, 1);
        assert_eq!(ss.last_cycle_ms, Some(4_000));
        assert_eq!(ss.assets_refreshed, 2);
        assert_eq!(ss.fetch_failures, 1);
        assert_eq!(ss.fetch_timeouts, 1);
        assert_eq!(ss.manual_requests, 1);
    }
}
