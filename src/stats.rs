//! Shared run statistics.
//!
//! Every worker reports into one [`StatsAggregator`]; the display loop and the
//! final report read consistent snapshots out of it. All counters live behind a
//! single mutex so multi-field updates (total plus the success or failure
//! bucket) can never be observed half-applied.
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde_derive::Serialize;

/// Rates are trailing-window estimates, resampled at most this often.
const RATE_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Raw counters for one run. Owned exclusively by [`StatsAggregator`].
#[derive(Debug, Clone)]
struct Counters {
    total_ops: u64,
    success_ops: u64,
    failed_ops: u64,
    total_bytes: u64,
    start_time: Instant,
    last_sample_time: Instant,
    last_sample_ops: u64,
    current_rate: f64,
    peak_rate: f64,
}

impl Counters {
    fn fresh(now: Instant) -> Self {
        Self {
            total_ops: 0,
            success_ops: 0,
            failed_ops: 0,
            total_bytes: 0,
            start_time: now,
            last_sample_time: now,
            last_sample_ops: 0,
            current_rate: 0.0,
            peak_rate: 0.0,
        }
    }

    /// Applies one delta and resamples the rate once enough time has passed.
    #[allow(clippy::cast_precision_loss)]
    fn apply(&mut self, now: Instant, ops: u64, bytes: u64, success: bool) {
        self.total_ops += ops;
        self.total_bytes += bytes;
        if success {
            self.success_ops += ops;
        } else {
            self.failed_ops += ops;
        }

        let since_sample = now.saturating_duration_since(self.last_sample_time);
        if since_sample >= RATE_SAMPLE_INTERVAL {
            let ops_in_window = self.total_ops - self.last_sample_ops;
            self.current_rate = ops_in_window as f64 / since_sample.as_secs_f64();
            if self.current_rate > self.peak_rate {
                self.peak_rate = self.current_rate;
            }
            self.last_sample_time = now;
            self.last_sample_ops = self.total_ops;
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn view(&self, now: Instant) -> CountersView {
        let elapsed_secs = now.saturating_duration_since(self.start_time).as_secs_f64();
        let ops_per_second = if elapsed_secs > 0.0 {
            self.total_ops as f64 / elapsed_secs
        } else {
            0.0
        };
        let success_rate = if self.total_ops > 0 {
            self.success_ops as f64 / self.total_ops as f64 * 100.0
        } else {
            0.0
        };

        CountersView {
            total_ops: self.total_ops,
            success_ops: self.success_ops,
            failed_ops: self.failed_ops,
            total_bytes: self.total_bytes,
            current_rate: self.current_rate,
            peak_rate: self.peak_rate,
            elapsed_secs,
            ops_per_second,
            success_rate,
        }
    }
}

/// An immutable point-in-time copy of the counters plus derived figures.
///
/// Safe to hold, clone, serialize and compare after the run is gone. The
/// derived fields are guarded: `ops_per_second` is 0 while no time has elapsed
/// and `success_rate` is 0 while nothing has been counted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CountersView {
    /// Probes issued in total.
    pub total_ops: u64,
    /// Probes classified as successful.
    pub success_ops: u64,
    /// Probes classified as failed (timeouts included).
    pub failed_ops: u64,
    /// Payload bytes transferred.
    pub total_bytes: u64,
    /// Trailing-window rate from the most recent sample, ops/sec.
    pub current_rate: f64,
    /// Highest trailing-window rate seen this run. Never decreases.
    pub peak_rate: f64,
    /// Seconds since the run started.
    pub elapsed_secs: f64,
    /// Whole-run average, ops/sec.
    pub ops_per_second: f64,
    /// Percentage of successful probes, 0-100.
    pub success_rate: f64,
}

impl CountersView {
    /// Total bytes expressed in mebibytes, for human output.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn megabytes(&self) -> f64 {
        self.total_bytes as f64 / 1_048_576.0
    }
}

/// Thread-safe counters shared by all workers of one run.
///
/// One instance per engine or scan; independent runs never share counters.
#[derive(Debug)]
pub struct StatsAggregator {
    counters: Mutex<Counters>,
}

impl StatsAggregator {
    /// Creates a zeroed aggregator anchored at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(Counters::fresh(Instant::now())),
        }
    }

    /// Records `ops` probes sharing one outcome plus the bytes they moved.
    ///
    /// Holds the lock only for the few integer updates and the occasional
    /// rate resample.
    pub fn update(&self, ops: u64, bytes: u64, success: bool) {
        self.lock().apply(Instant::now(), ops, bytes, success);
    }

    /// Returns a consistent copy of the counters and derived rates.
    #[must_use]
    pub fn snapshot(&self) -> CountersView {
        self.lock().view(Instant::now())
    }

    /// Reinitializes everything for a fresh run.
    ///
    /// Callers must make sure no worker is still reporting; the engine only
    /// resets before it spawns the pool.
    pub fn reset(&self) {
        *self.lock() = Counters::fresh(Instant::now());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        // A panicking worker cannot leave the counters torn; all writes happen
        // under the guard, so a poisoned lock is still internally consistent.
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Worker-local tally, flushed into the aggregator in batches.
///
/// Keeps the hot loop off the shared mutex: a worker records outcomes locally
/// and flushes every so often plus once on exit. A flush turns into at most
/// two [`StatsAggregator::update`] calls, one per outcome bucket.
#[derive(Debug, Default)]
pub struct Tally {
    succeeded: u64,
    failed: u64,
    bytes: u64,
}

impl Tally {
    /// Records one probe outcome locally.
    pub fn record(&mut self, bytes: u64, success: bool) {
        if success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.bytes += bytes;
    }

    /// Outcomes recorded since the last flush.
    #[must_use]
    pub fn ops(&self) -> u64 {
        self.succeeded + self.failed
    }

    /// Pushes the tally into the aggregator and clears it.
    pub fn flush(&mut self, stats: &StatsAggregator) {
        if self.succeeded > 0 {
            stats.update(self.succeeded, self.bytes, true);
        }
        if self.failed > 0 {
            stats.update(self.failed, 0, false);
        }
        self.succeeded = 0;
        self.failed = 0;
        self.bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn totals_split_into_buckets() {
        let stats = StatsAggregator::new();
        stats.update(3, 30, true);
        stats.update(2, 0, false);
        stats.update(1, 10, true);

        let view = stats.snapshot();
        assert_eq!(view.total_ops, 6);
        assert_eq!(view.success_ops, 4);
        assert_eq!(view.failed_ops, 2);
        assert_eq!(view.total_bytes, 40);
        assert_eq!(view.total_ops, view.success_ops + view.failed_ops);
    }

    #[test]
    fn derived_fields_guard_against_zero() {
        let now = Instant::now();
        let counters = Counters::fresh(now);

        // Same instant as the start: no elapsed time, nothing counted.
        let view = counters.view(now);
        assert_eq!(view.ops_per_second, 0.0);
        assert_eq!(view.success_rate, 0.0);
        assert_eq!(view.elapsed_secs, 0.0);
    }

    #[test]
    fn success_rate_zero_until_first_op() {
        let stats = StatsAggregator::new();
        assert_eq!(stats.snapshot().success_rate, 0.0);

        stats.update(1, 0, false);
        assert_eq!(stats.snapshot().success_rate, 0.0);

        stats.update(1, 0, true);
        assert!((stats.snapshot().success_rate - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rate_resamples_only_after_interval() {
        let start = Instant::now();
        let mut counters = Counters::fresh(start);

        counters.apply(start + Duration::from_millis(400), 100, 0, true);
        assert_eq!(counters.current_rate, 0.0);

        // Crossing the one second mark triggers a resample over the window.
        counters.apply(start + Duration::from_millis(1600), 60, 0, true);
        assert!((counters.current_rate - 100.0).abs() < 0.01);
        assert!((counters.peak_rate - 100.0).abs() < 0.01);

        // Under a second since the last sample: the rate holds steady.
        counters.apply(start + Duration::from_millis(2100), 500, 0, true);
        assert!((counters.current_rate - 100.0).abs() < 0.01);
    }

    #[test]
    fn peak_rate_never_decreases() {
        let start = Instant::now();
        let mut counters = Counters::fresh(start);

        // Fast window then a slow one: current drops, peak holds.
        counters.apply(start + Duration::from_secs(1), 1000, 0, true);
        let first_peak = counters.peak_rate;
        counters.apply(start + Duration::from_secs(3), 10, 0, true);

        assert!(counters.current_rate < first_peak);
        assert_eq!(counters.peak_rate, first_peak);
    }

    #[test]
    fn reset_gives_a_fresh_run() {
        let stats = StatsAggregator::new();
        stats.update(10, 100, true);
        stats.reset();

        let view = stats.snapshot();
        assert_eq!(view.total_ops, 0);
        assert_eq!(view.total_bytes, 0);
        assert_eq!(view.peak_rate, 0.0);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        const WORKERS: u64 = 8;
        const UPDATES: u64 = 10_000;
        const SIZE: u64 = 64;

        let stats = Arc::new(StatsAggregator::new());
        let handles: Vec<_> = (0..WORKERS)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..UPDATES {
                        stats.update(1, SIZE, true);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let view = stats.snapshot();
        assert_eq!(view.total_ops, WORKERS * UPDATES);
        assert_eq!(view.success_ops, WORKERS * UPDATES);
        assert_eq!(view.total_bytes, WORKERS * UPDATES * SIZE);
    }

    #[test]
    fn tally_flushes_once() {
        let stats = StatsAggregator::new();
        let mut tally = Tally::default();

        tally.record(10, true);
        tally.record(10, true);
        tally.record(0, false);
        assert_eq!(tally.ops(), 3);

        tally.flush(&stats);
        let view = stats.snapshot();
        assert_eq!(view.total_ops, 3);
        assert_eq!(view.success_ops, 2);
        assert_eq!(view.total_bytes, 20);

        // A drained tally must not double-report.
        tally.flush(&stats);
        assert_eq!(stats.snapshot().total_ops, 3);
        assert_eq!(tally.ops(), 0);
    }
}
