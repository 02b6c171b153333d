use crate::api::ChainFetcher;
use crate::detector::ChainDetector;
use crate::metrics::try_get_metrics;
use crate::store::{ChainStore, StoreError};
use crate::telegram::ChainNotifier;
use crate::types::{Chain, ScanStats};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Drives the periodic fetch → detect → notify cycle.
///
/// At most one cycle runs at a time: a tick that fires while the previous
/// cycle is still in flight is dropped, never queued. Cycle errors are
/// reported and the loop keeps going.
pub struct Scanner {
    fetcher: Arc<dyn ChainFetcher>,
    detector: ChainDetector,
    notifier: Arc<dyn ChainNotifier>,
    store: Arc<dyn ChainStore>,
    interval: Duration,
    silent: bool,
    started_at: DateTime<Utc>,
    last_scan_time: RwLock<Option<DateTime<Utc>>>,
    next_scan_time: RwLock<Option<DateTime<Utc>>>,
    scanning: AtomicBool,
    stopped: AtomicBool,
    stop: Notify,
}

impl Scanner {
    pub fn new(
        fetcher: Arc<dyn ChainFetcher>,
        detector: ChainDetector,
        notifier: Arc<dyn ChainNotifier>,
        store: Arc<dyn ChainStore>,
        interval: Duration,
        silent: bool,
    ) -> Self {
        Self {
            fetcher,
            detector,
            notifier,
            store,
            interval,
            silent,
            started_at: Utc::now(),
            last_scan_time: RwLock::new(None),
            next_scan_time: RwLock::new(None),
            scanning: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            stop: Notify::new(),
        }
    }

    pub fn polling_interval(&self) -> Duration {
        self.interval
    }

    /// One immediate scan, then one per interval until [`Scanner::shutdown`].
    pub async fn run(&self) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        self.scan_tick().await;

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of a tokio interval completes immediately; the
        // initial scan above already covered it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.stop.notified() => break,
            }

            if self.stopped.load(Ordering::SeqCst) {
                break;
            }

            self.scan_tick().await;
        }

        info!("Scan loop stopped");
    }

    /// Stops starting new cycles. A cycle already in flight finishes its
    /// writes; nothing is aborted mid-persist.
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop.notify_one();
    }

    async fn scan_tick(&self) {
        if self
            .scanning
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Previous scan still running, dropping this tick");
            return;
        }

        self.scan_cycle().await;
        self.scanning.store(false, Ordering::SeqCst);
    }

    async fn scan_cycle(&self) {
        info!("Checking for new chains...");
        *self.last_scan_time.write().await = Some(Utc::now());

        if let Some(metrics) = try_get_metrics() {
            metrics.scan_cycles.add(1, &[]);
        }

        let batch = match self.fetcher.fetch_with_retry().await {
            Ok(batch) => batch,
            Err(e) => {
                error!(error = %e, "Chain fetch failed, skipping cycle");
                self.record_failure(&e.to_string()).await;
                self.arm_next_scan().await;
                return;
            }
        };

        info!("Fetched {} chains from API", batch.len());

        match self.detector.process_chains(&batch).await {
            Ok(new_chains) => {
                self.arm_next_scan().await;
                self.announce(&new_chains.iter().map(|d| d.chain.clone()).collect::<Vec<_>>())
                    .await;

                if let Some(metrics) = try_get_metrics() {
                    metrics.chains_detected.add(new_chains.len() as u64, &[]);
                    if let Ok(total) = self.store.count().await {
                        metrics.chains_tracked.record(total, &[]);
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Error during chain check");
                self.record_failure(&e.to_string()).await;
                self.arm_next_scan().await;
            }
        }
    }

    async fn announce(&self, new_chains: &[Chain]) {
        if new_chains.is_empty() {
            info!("No new chains detected");
            return;
        }

        info!("Found {} new chain(s)!", new_chains.len());

        if self.silent {
            info!("Silent mode - skipping notifications");
            return;
        }

        if let Err(e) = self.notifier.notify_new_chains(new_chains).await {
            warn!(error = %e, "Failed to send new chain notifications");
        }
    }

    async fn record_failure(&self, error: &str) {
        if let Some(metrics) = try_get_metrics() {
            metrics.scan_failures.add(1, &[]);
        }

        if self.silent {
            return;
        }

        if let Err(e) = self.notifier.notify_error(error).await {
            warn!(error = %e, "Failed to send error notification");
        }
    }

    async fn arm_next_scan(&self) {
        let next = Utc::now()
            + chrono::Duration::from_std(self.interval).unwrap_or_else(|_| chrono::Duration::zero());
        *self.next_scan_time.write().await = Some(next);
    }

    /// Answerable at any time; reads only scan timestamps and a row count,
    /// never an in-flight network call.
    pub async fn stats(&self) -> Result<ScanStats, StoreError> {
        let total_chains = self.store.count().await?;
        let now = Utc::now();

        let next_scan_in_secs = self
            .next_scan_time
            .read()
            .await
            .map(|t| (t - now).num_seconds().max(0) as u64)
            .unwrap_or(0);

        Ok(ScanStats {
            uptime_secs: (now - self.started_at).num_seconds().max(0) as u64,
            last_scan_time: *self.last_scan_time.read().await,
            next_scan_in_secs,
            polling_interval_secs: self.interval.as_secs(),
            total_chains,
        })
    }
}
