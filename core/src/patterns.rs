//! Recurring draw pattern tracking
//!
//! Advisory only. A pattern is keyed by [`DrawCommand::pattern_hash`] and
//! aggregates how often, how heavily and how consistently it shows up. A
//! pattern seen in [`STATIC_PATTERN_STREAK`] consecutive frames is flagged
//! static; nothing in the pipeline skips or caches it automatically.
//!
//! [`DrawCommand::pattern_hash`]: crate::command::DrawCommand::pattern_hash

use std::sync::Mutex;
use std::time::Duration;

use hashbrown::HashMap;

use crate::sync::lock;

/// Consecutive frames after which a pattern counts as static
pub const STATIC_PATTERN_STREAK: u32 = 60;

/// Aggregate for one pattern hash
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatternRecord {
    pub hash: u64,
    pub occurrences: u64,
    pub vertex_sum: u64,
    pub time_sum: Duration,
    /// Consecutive frames (ending at `last_seen_frame`) containing the pattern
    pub streak: u32,
    /// Distinct frames containing the pattern
    pub frames_seen: u64,
    pub first_seen_frame: u64,
    pub last_seen_frame: u64,
}

impl PatternRecord {
    fn new(hash: u64, frame: u64) -> Self {
        Self {
            hash,
            occurrences: 0,
            vertex_sum: 0,
            time_sum: Duration::ZERO,
            streak: 1,
            frames_seen: 1,
            first_seen_frame: frame,
            last_seen_frame: frame,
        }
    }

    pub fn is_static(&self) -> bool {
        self.streak >= STATIC_PATTERN_STREAK
    }

    pub fn average_vertices(&self) -> f64 {
        if self.occurrences == 0 {
            0.0
        } else {
            self.vertex_sum as f64 / self.occurrences as f64
        }
    }

    pub fn average_time(&self) -> Duration {
        if self.occurrences == 0 {
            Duration::ZERO
        } else {
            self.time_sum / self.occurrences.min(u32::MAX as u64) as u32
        }
    }

    pub fn occurrences_per_frame(&self) -> f64 {
        self.occurrences as f64 / self.frames_seen.max(1) as f64
    }
}

/// Thread-safe pattern table
#[derive(Debug, Default)]
pub struct PatternStats {
    patterns: Mutex<HashMap<u64, PatternRecord>>,
}

impl PatternStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one occurrence of `hash` in `frame`
    pub fn record(&self, hash: u64, vertices: u64, frame: u64, elapsed: Duration) {
        let mut patterns = lock(&self.patterns, "pattern stats");
        let record = patterns
            .entry(hash)
            .or_insert_with(|| PatternRecord::new(hash, frame));

        if frame != record.last_seen_frame {
            if frame == record.last_seen_frame + 1 {
                record.streak = record.streak.saturating_add(1);
            } else {
                record.streak = 1;
            }
            record.frames_seen += 1;
            record.last_seen_frame = frame;
        }

        record.occurrences += 1;
        record.vertex_sum += vertices;
        record.time_sum += elapsed;
    }

    /// Drop patterns unseen for more than `expiry_frames`; returns how many were dropped
    pub fn prune(&self, current_frame: u64, expiry_frames: u64) -> usize {
        let mut patterns = lock(&self.patterns, "pattern stats");
        let before = patterns.len();
        patterns.retain(|_, r| current_frame.saturating_sub(r.last_seen_frame) <= expiry_frames);
        before - patterns.len()
    }

    pub fn get(&self, hash: u64) -> Option<PatternRecord> {
        lock(&self.patterns, "pattern stats").get(&hash).copied()
    }

    /// Copy of every record, heaviest total vertex volume first
    pub fn snapshot(&self) -> Vec<PatternRecord> {
        let mut records: Vec<PatternRecord> = lock(&self.patterns, "pattern stats")
            .values()
            .copied()
            .collect();
        records.sort_by(|a, b| b.vertex_sum.cmp(&a.vertex_sum).then(a.hash.cmp(&b.hash)));
        records
    }

    pub fn len(&self) -> usize {
        lock(&self.patterns, "pattern stats").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn static_count(&self) -> usize {
        lock(&self.patterns, "pattern stats")
            .values()
            .filter(|r| r.is_static())
            .count()
    }
}
