//! Background refresh loop.
//!
//! One task owns every refresh cycle. A cycle walks the tracked assets in order, fetches,
//! aggregates and publishes each one, then stamps `last_update`. Timer ticks and manual requests
//! both land in the same loop, so cycles never overlap. Manual requests that arrive while a cycle
//! is running are coalesced into at most one follow-up cycle.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::aggregate::aggregate;
use crate::error::SourceError;
use crate::source::PositionSource;
use crate::stats::Stats;
use crate::store::SnapshotStore;
use crate::types::PositionRecord;

#[derive(Debug, Clone)]
pub struct RefreshConfig {
    pub interval: Duration,
    pub inter_asset_delay: Duration,
    pub fetch_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Timer,
    Manual,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedAsset {
    pub asset: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub seq: u64,
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub refreshed: Vec<String>,
    pub failed: Vec<FailedAsset>,
}

/// Cycle counters. `started > completed` means a cycle is in flight.
#[derive(Debug, Clone, Default)]
pub struct CycleStatus {
    pub started: u64,
    pub completed: u64,
    pub last: Option<CycleReport>,
}

pub struct Refresher {
    source: Arc<dyn PositionSource>,
    store: Arc<SnapshotStore>,
    stats: Arc<Stats>,
    cfg: RefreshConfig,
    cycle_lock: Mutex<()>,
    status: watch::Sender<CycleStatus>,
}

impl Refresher {
    pub fn new(
        source: Arc<dyn PositionSource>,
        store: Arc<SnapshotStore>,
        stats: Arc<Stats>,
        cfg: RefreshConfig,
    ) -> Self {
        let (status, _) = watch::channel(CycleStatus::default());
        Self {
            source,
            store,
            stats,
            cfg,
            cycle_lock: Mutex::new(()),
            status,
        }
    }

    pub fn status(&self) -> watch::Receiver<CycleStatus> {
        self.status.subscribe()
    }

    async fn fetch_one(&self, asset: &str) -> Result<Vec<PositionRecord>, SourceError> {
        match tokio::time::timeout(self.cfg.fetch_timeout, self.source.fetch(asset)).await {
            Ok(res) => res,
            Err(_) => Err(SourceError::Timeout),
        }
    }

    /// Runs one full cycle. Concurrent callers are serialized.
    pub async fn run_cycle(&self, trigger: Trigger) -> CycleReport {
        let _guard = self.cycle_lock.lock().await;

        let mut seq = 0;
        self.status.send_modify(|s| {
            s.started += 1;
            seq = s.started;
        });

        let cycle_id = Uuid::new_v4();
        let started_at = Utc::now();
        let assets = self.store.tracked().to_vec();
        tracing::info!(
            %cycle_id,
            seq,
            ?trigger,
            source = self.source.name(),
            assets = assets.len(),
            "refresh cycle started"
        );

        let mut refreshed: Vec<String> = vec![];
        let mut failed: Vec<FailedAsset> = vec![];

        for (i, asset) in assets.iter().enumerate() {
            if i > 0 && !self.cfg.inter_asset_delay.is_zero() {
                tokio::time::sleep(self.cfg.inter_asset_delay).await;
            }

            match self.fetch_one(asset).await {
                Ok(records) => {
                    let snap = aggregate(asset, records);
                    tracing::debug!(
                        %cycle_id,
                        asset = %asset,
                        long = snap.long_count,
                        short = snap.short_count,
                        long_ratio = %snap.long_ratio,
                        sentiment = ?snap.sentiment,
                        "asset refreshed"
                    );
                    match self.store.publish(asset, snap) {
                        Ok(()) => {
                            self.stats.inc_refreshed();
                            refreshed.push(asset.clone());
                        }
                        Err(e) => {
                            tracing::error!(
                                %cycle_id,
                                asset = %asset,
                                error = %e,
                                "publish rejected"
                            );
                            failed.push(FailedAsset {
                                asset: asset.clone(),
                                error: e.to_string(),
                            });
                        }
                    }
                }
                Err(e) => {
                    if matches!(e, SourceError::Timeout) {
                        self.stats.inc_timeout();
                    }
                    self.stats.inc_failure();
                    tracing::warn!(
                        %cycle_id,
                        asset = %asset,
                        error = %e,
                        "fetch failed, keeping previous snapshot"
                    );
                    failed.push(FailedAsset {
                        asset: asset.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let finished_at = Utc::now();
        let finished_ms = finished_at.timestamp_millis() as u64;
        self.store.publish_cycle_complete(finished_at);
        self.stats.inc_cycle(finished_ms);

        let report = CycleReport {
            cycle_id,
            seq,
            trigger,
            started_at,
            finished_at,
            refreshed,
            failed,
        };

        tracing::info!(
            %cycle_id,
            refreshed = report.refreshed.len(),
            failed = report.failed.len(),
            elapsed_ms = (finished_at - started_at).num_milliseconds(),
            "refresh cycle finished"
        );

        let ss = self.stats.snapshot(finished_ms);
        tracing::info!(
            up_sec = ss.up_sec,
            cycles = ss.cycles,
            assets_refreshed = ss.assets_refreshed,
            fetch_failures = ss.fetch_failures,
            fetch_timeouts = ss.fetch_timeouts,
            manual_requests = ss.manual_requests,
            "stats"
        );

        self.status.send_modify(|s| {
            s.completed = seq;
            s.last = Some(report.clone());
        });
        report
    }
}

/// Cheap, cloneable way for request handlers to ask for a refresh.
#[derive(Clone)]
pub struct RefreshHandle {
    notify: Arc<Notify>,
    status: watch::Receiver<CycleStatus>,
    stats: Arc<Stats>,
}

impl RefreshHandle {
    /// Queues a cycle. Requests made while one is already queued collapse into it.
    pub fn request(&self) {
        self.stats.inc_manual_request();
        self.notify.notify_one();
    }

    /// Queues a cycle and waits for the first cycle that starts after this call.
    /// Returns `None` if the refresh loop has stopped.
    pub async fn request_and_wait(&self) -> Option<CycleReport> {
        let mut rx = self.status.clone();
        let target = {
            let s = rx.borrow_and_update();
            if s.started > s.completed {
                s.started + 1
            } else {
                s.completed + 1
            }
        };
        self.request();
        let done = rx.wait_for(|s| s.completed >= target).await.ok()?;
        done.last.clone()
    }

    pub fn status(&self) -> CycleStatus {
        self.status.borrow().clone()
    }
}

/// Spawns the refresh loop. The first timer tick fires immediately, so the store is populated
/// right after start-up. The loop exits when `shutdown` flips or its sender is dropped; a cycle
/// already running is allowed to finish.
pub fn spawn(
    refresher: Arc<Refresher>,
    mut shutdown: watch::Receiver<bool>,
) -> (RefreshHandle, JoinHandle<()>) {
    let notify = Arc::new(Notify::new());
    let handle = RefreshHandle {
        notify: notify.clone(),
        status: refresher.status(),
        stats: refresher.stats.clone(),
    };

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(refresher.cfg.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_sec = refresher.cfg.interval.as_secs(), "refresh loop started");

        loop {
            let trigger = tokio::select! {
                biased;
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => Trigger::Timer,
                _ = notify.notified() => Trigger::Manual,
            };
            refresher.run_cycle(trigger).await;
        }

        tracing::info!("refresh loop stopped");
    });

    (handle, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn book(longs: usize, shorts: usize) -> Vec<PositionRecord> {
        (0..longs + shorts)
            .map(|i| PositionRecord {
                rank: i as u32 + 1,
                address: format!("0x{:04x}", i),
                side: if i < longs { Side::Long } else { Side::Short },
                size: dec!(1000),
                leverage: dec!(5),
                pnl: dec!(0),
                entry_price: dec!(1),
            })
            .collect()
    }

    /// Returns canned books; unknown assets fail. Tracks how many fetches overlap.
    struct Scripted {
        books: parking_lot::Mutex<HashMap<String, Vec<PositionRecord>>>,
        delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(books: Vec<(&str, Vec<PositionRecord>)>, delay: Duration) -> Self {
            Self {
                books: parking_lot::Mutex::new(
                    books.into_iter().map(|(a, b)| (a.to_string(), b)).collect(),
                ),
                delay,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PositionSource for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn fetch(&self, asset: &str) -> Result<Vec<PositionRecord>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.books
                .lock()
                .get(asset)
                .cloned()
                .ok_or_else(|| SourceError::Transport(format!("no route to {}", asset)))
        }
    }

    struct Hangs;

    #[async_trait]
    impl PositionSource for Hangs {
        fn name(&self) -> &'static str {
            "hangs"
        }

        async fn fetch(&self, _asset: &str) -> Result<Vec<PositionRecord>, SourceError> {
            futures::future::pending::<()>().await;
            Ok(vec![])
        }
    }

    fn cfg() -> RefreshConfig {
        RefreshConfig {
            interval: Duration::from_secs(3600),
            inter_asset_delay: Duration::ZERO,
            fetch_timeout: Duration::from_secs(5),
        }
    }

    fn setup(
        src: Arc<dyn PositionSource>,
        assets: &[&str],
    ) -> (Arc<Refresher>, Arc<SnapshotStore>, Arc<Stats>) {
        let tracked = assets.iter().map(|a| a.to_string()).collect();
        let store = Arc::new(SnapshotStore::new(tracked));
        let stats = Stats::new(0);
        let r = Arc::new(Refresher::new(src, store.clone(), stats.clone(), cfg()));
        (r, store, stats)
    }

    /// Collects formatted log output in memory.
    #[derive(Clone, Default)]
    struct Captured(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn cycle_end_logs_running_counters() {
        let out = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(out.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let src = Arc::new(Scripted::new(vec![("BTC", book(1, 0))], Duration::ZERO));
        let (r, _, _) = setup(src, &["BTC", "ETH"]);
        r.run_cycle(Trigger::Timer).await;

        let text = String::from_utf8(out.0.lock().clone()).unwrap();
        let line = text
            .lines()
            .find(|l| l.contains("fetch_timeouts="))
            .expect("stats line");
        assert!(line.contains("cycles=1"));
        assert!(line.contains("assets_refreshed=1"));
        assert!(line.contains("fetch_failures=1"));
    }

    #[tokio::test]
    async fn failed_asset_keeps_previous_and_cycle_still_completes() {
        let src = Arc::new(Scripted::new(vec![("BTC", book(20, 10))], Duration::ZERO));
        let (r, store, stats) = setup(src.clone(), &["BTC", "ETH"]);

        let report = r.run_cycle(Trigger::Manual).await;
        assert_eq!(report.refreshed, vec!["BTC"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].asset, "ETH");

        let btc = store.get_one("BTC").unwrap();
        assert_eq!(btc.long_ratio, dec!(66.7));
        assert!(store.get_one("ETH").is_none());
        let first_update = store.last_update().unwrap();
        assert!(first_update >= report.started_at);

        // ETH appears, BTC starts failing: BTC must keep its previous snapshot.
        {
            let mut books = src.books.lock();
            books.remove("BTC");
            books.insert("ETH".into(), book(1, 3));
        }
        r.run_cycle(Trigger::Timer).await;
        assert_eq!(store.get_one("BTC").unwrap().long_ratio, dec!(66.7));
        assert_eq!(store.get_one("ETH").unwrap().long_ratio, dec!(25));
        assert!(store.last_update().unwrap() >= first_update);

        let ss = stats.snapshot(0);
        assert_eq!(ss.cycles, 2);
        assert_eq!(ss.assets_refreshed, 2);
        assert_eq!(ss.fetch_failures, 2);
    }

    #[tokio::test]
    async fn hanging_source_is_cut_off_by_timeout() {
        let store = Arc::new(SnapshotStore::new(vec!["BTC".into()]));
        let stats = Stats::new(0);
        let mut c = cfg();
        c.fetch_timeout = Duration::from_millis(20);
        let r = Refresher::new(Arc::new(Hangs), store.clone(), stats.clone(), c);

        let report = r.run_cycle(Trigger::Timer).await;
        assert_eq!(report.failed.len(), 1);
        assert!(store.get_one("BTC").is_none());
        assert!(store.last_update().is_some());
        assert_eq!(stats.snapshot(0).fetch_timeouts, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_run_cycle_calls_do_not_overlap() {
        let src = Arc::new(Scripted::new(
            vec![("BTC", book(1, 1)), ("ETH", book(1, 1))],
            Duration::from_millis(20),
        ));
        let (r, _store, _) = setup(src.clone(), &["BTC", "ETH"]);

        let a = tokio::spawn({
            let r = r.clone();
            async move { r.run_cycle(Trigger::Timer).await }
        });
        let b = tokio::spawn({
            let r = r.clone();
            async move { r.run_cycle(Trigger::Manual).await }
        });
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        assert_eq!(src.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(src.calls.load(Ordering::SeqCst), 4);
        assert_ne!(a.seq, b.seq);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn manual_requests_during_a_cycle_coalesce() {
        let src = Arc::new(Scripted::new(
            vec![("BTC", book(2, 1)), ("ETH", book(1, 2))],
            Duration::from_millis(50),
        ));
        let (r, store, stats) = setup(src.clone(), &["BTC", "ETH"]);
        let (_tx, rx) = watch::channel(false);
        let (handle, task) = spawn(r.clone(), rx);

        // First tick is immediate; wait until that cycle is in flight.
        let mut status = r.status();
        status.wait_for(|s| s.started >= 1).await.unwrap();

        for _ in 0..5 {
            handle.request();
        }
        let report = handle.request_and_wait().await.unwrap();
        assert_eq!(report.seq, 2);
        assert_eq!(report.trigger, Trigger::Manual);

        // Give a stray extra cycle a chance to show up.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(handle.status().completed, 2);
        assert_eq!(src.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(stats.snapshot(0).manual_requests, 6);
        assert!(store.get_one("ETH").is_some());

        task.abort();
    }

    #[tokio::test]
    async fn loop_stops_on_shutdown() {
        let src = Arc::new(Scripted::new(vec![("BTC", book(1, 0))], Duration::ZERO));
        let (r, store, _) = setup(src, &["BTC"]);
        let (tx, rx) = watch::channel(false);
        let (handle, task) = spawn(r, rx);

        let report = handle.request_and_wait().await.unwrap();
        assert!(report.seq >= 1);
        assert!(store.get_one("BTC").is_some());

        tx.send(true).unwrap();
        task.await.unwrap();
        assert!(handle.request_and_wait().await.is_none());
    }
}
