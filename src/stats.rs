//! Per-interface relay counters and their periodic export.
//!
//! Counters are plain atomics so the receive path can bump them without
//! holding the registry lock. [`StatsTable`] maps interface names to
//! counters in a sharded map, which lets the export task read every
//! interface without touching the registry at all.
//!
//! # Counter semantics
//!
//! The four base counters count every relayed or dropped packet. The
//! `*_with_option82` counters count the subset that carried a relay agent
//! information block when it reached the relay.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Default export period.
pub const STATS_DEFAULT_INTERVAL_MS: u64 = 5000;

/// Shortest export period accepted; smaller values are raised to this.
pub const STATS_MIN_INTERVAL_MS: u64 = 5000;

/// Live counters for one interface.
#[derive(Debug, Default)]
pub struct PacketCounters {
    client_drops: AtomicU64,
    client_valids: AtomicU64,
    serv_drops: AtomicU64,
    serv_valids: AtomicU64,
    client_drops_with_option82: AtomicU64,
    client_valids_with_option82: AtomicU64,
    serv_drops_with_option82: AtomicU64,
    serv_valids_with_option82: AtomicU64,
}

impl PacketCounters {
    /// Records the fate of one client request.
    pub fn record_client(&self, valid: bool, with_option82: bool) {
        let (base, option82) = if valid {
            (&self.client_valids, &self.client_valids_with_option82)
        } else {
            (&self.client_drops, &self.client_drops_with_option82)
        };
        base.fetch_add(1, Ordering::Relaxed);
        if with_option82 {
            option82.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records the fate of one server reply.
    pub fn record_server(&self, valid: bool, with_option82: bool) {
        let (base, option82) = if valid {
            (&self.serv_valids, &self.serv_valids_with_option82)
        } else {
            (&self.serv_drops, &self.serv_drops_with_option82)
        };
        base.fetch_add(1, Ordering::Relaxed);
        if with_option82 {
            option82.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            client_drops: self.client_drops.load(Ordering::Relaxed),
            client_valids: self.client_valids.load(Ordering::Relaxed),
            serv_drops: self.serv_drops.load(Ordering::Relaxed),
            serv_valids: self.serv_valids.load(Ordering::Relaxed),
            client_drops_with_option82: self.client_drops_with_option82.load(Ordering::Relaxed),
            client_valids_with_option82: self.client_valids_with_option82.load(Ordering::Relaxed),
            serv_drops_with_option82: self.serv_drops_with_option82.load(Ordering::Relaxed),
            serv_valids_with_option82: self.serv_valids_with_option82.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`PacketCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    pub client_drops: u64,
    pub client_valids: u64,
    pub serv_drops: u64,
    pub serv_valids: u64,
    pub client_drops_with_option82: u64,
    pub client_valids_with_option82: u64,
    pub serv_drops_with_option82: u64,
    pub serv_valids_with_option82: u64,
}

/// Counters for every configured interface.
#[derive(Debug, Default)]
pub struct StatsTable {
    interfaces: DashMap<String, Arc<PacketCounters>>,
}

impl StatsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the counters for `interface`, creating them if needed.
    pub fn track(&self, interface: &str) -> Arc<PacketCounters> {
        Arc::clone(
            self.interfaces
                .entry(interface.to_string())
                .or_default()
                .value(),
        )
    }

    pub fn forget(&self, interface: &str) {
        self.interfaces.remove(interface);
    }

    pub fn get(&self, interface: &str) -> Option<Arc<PacketCounters>> {
        self.interfaces
            .get(interface)
            .map(|counters| Arc::clone(counters.value()))
    }

    pub fn snapshot_counters(&self, interface: &str) -> Option<CountersSnapshot> {
        self.interfaces
            .get(interface)
            .map(|counters| counters.snapshot())
    }

    /// Snapshots of every interface, sorted by name.
    pub fn snapshot_all(&self) -> Vec<(String, CountersSnapshot)> {
        let mut snapshots: Vec<_> = self
            .interfaces
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect();
        snapshots.sort_by(|a, b| a.0.cmp(&b.0));
        snapshots
    }
}

/// One export of all counters.
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub taken_at: DateTime<Utc>,
    pub interfaces: Vec<(String, CountersSnapshot)>,
}

/// Destination of periodic counter exports.
pub trait StatsSink: Send + Sync + 'static {
    fn publish(&self, report: &StatsReport);
}

/// Writes each export to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl StatsSink for LogSink {
    fn publish(&self, report: &StatsReport) {
        for (interface, counters) in &report.interfaces {
            debug!(
                "{} stats at {}: client valid={} drop={} server valid={} drop={}",
                interface,
                report.taken_at.to_rfc3339(),
                counters.client_valids,
                counters.client_drops,
                counters.serv_valids,
                counters.serv_drops
            );
        }
    }
}

/// Raises an interval below [`STATS_MIN_INTERVAL_MS`] to the minimum.
pub fn sync_interval(milliseconds: u64) -> Duration {
    if milliseconds < STATS_MIN_INTERVAL_MS {
        warn!(
            "Statistics interval {}ms is below the {}ms minimum, using the minimum",
            milliseconds, STATS_MIN_INTERVAL_MS
        );
        return Duration::from_millis(STATS_MIN_INTERVAL_MS);
    }
    Duration::from_millis(milliseconds)
}

/// Rate-limited export of [`StatsTable`] to a [`StatsSink`].
pub struct StatsSync<S> {
    table: Arc<StatsTable>,
    sink: S,
    interval: watch::Receiver<Duration>,
}

impl<S: StatsSink> StatsSync<S> {
    /// `interval` may change at any time; the new period applies from the
    /// next tick.
    pub fn new(table: Arc<StatsTable>, sink: S, interval: watch::Receiver<Duration>) -> Self {
        Self {
            table,
            sink,
            interval,
        }
    }

    /// Exports the current counters immediately.
    pub fn publish_now(&self) -> StatsReport {
        let report = StatsReport {
            taken_at: Utc::now(),
            interfaces: self.table.snapshot_all(),
        };
        self.sink.publish(&report);
        report
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Exports on every tick until the interval sender is dropped.
    pub async fn run(mut self) {
        let mut period = *self.interval.borrow_and_update();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Statistics export every {}ms", period.as_millis());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.publish_now();
                }
                changed = self.interval.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let next = *self.interval.borrow_and_update();
                    if next != period {
                        info!(
                            "Statistics interval changed. old: {}ms, new: {}ms",
                            period.as_millis(),
                            next.as_millis()
                        );
                        period = next;
                        ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    }
                }
            }
        }
    }
}
