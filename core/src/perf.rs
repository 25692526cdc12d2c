//! Rolling pipeline timing, logged once per second at debug level

use std::time::{Duration, Instant};

use tracing::debug;

/// Interval accumulators for `optimize`/`flush`
#[derive(Debug, Clone)]
pub struct PoolPerf {
    pub frames: u64,
    pub submitted: u64,
    pub accepted: u64,
    pub batches: u64,
    pub executed_draws: u64,
    pub optimize_ns: u64,
    pub flush_ns: u64,
    pub optimize_failures: u64,
    pub executor_failures: u64,
    pub last_log_time: Instant,
}

impl Default for PoolPerf {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolPerf {
    pub fn new() -> Self {
        Self {
            frames: 0,
            submitted: 0,
            accepted: 0,
            batches: 0,
            executed_draws: 0,
            optimize_ns: 0,
            flush_ns: 0,
            optimize_failures: 0,
            executor_failures: 0,
            last_log_time: Instant::now(),
        }
    }

    pub fn record_optimize(&mut self, elapsed: Duration, batches: u64, failed: bool) {
        self.optimize_ns = self
            .optimize_ns
            .wrapping_add(elapsed.as_nanos().min(u64::MAX as u128) as u64);
        self.batches = self.batches.wrapping_add(batches);
        if failed {
            self.optimize_failures = self.optimize_failures.wrapping_add(1);
        }
    }

    pub fn record_flush(&mut self, elapsed: Duration, draws: u64, failures: u64) {
        self.flush_ns = self
            .flush_ns
            .wrapping_add(elapsed.as_nanos().min(u64::MAX as u128) as u64);
        self.executed_draws = self.executed_draws.wrapping_add(draws);
        self.executor_failures = self.executor_failures.wrapping_add(failures);
    }

    pub fn record_frame(&mut self, submitted: u64, accepted: u64) {
        self.frames = self.frames.wrapping_add(1);
        self.submitted = self.submitted.wrapping_add(submitted);
        self.accepted = self.accepted.wrapping_add(accepted);
    }

    /// Log and reset if at least one second has passed since the last log
    pub fn maybe_log(&mut self) {
        let elapsed = self.last_log_time.elapsed();
        if elapsed.as_secs() < 1 {
            return;
        }

        let frames = self.frames.max(1) as f64;
        debug!(
            "DRAWPOOL PERF: frames={}, submitted/f={:.1}, accepted/f={:.1}, batches/f={:.1}, \
             draws/f={:.1}, optimize={:.1}us/f, flush={:.1}us/f, optimize_failures={}, \
             executor_failures={}",
            self.frames,
            self.submitted as f64 / frames,
            self.accepted as f64 / frames,
            self.batches as f64 / frames,
            self.executed_draws as f64 / frames,
            self.optimize_ns as f64 / frames / 1_000.0,
            self.flush_ns as f64 / frames / 1_000.0,
            self.optimize_failures,
            self.executor_failures,
        );

        *self = Self::new();
    }
}
