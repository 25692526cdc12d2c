//! Frame diagnostics, lifetime statistics and the pattern report
//!
//! Everything here is computed from snapshots; nothing mutates the pool.

use std::fmt;

use crate::frame::CounterSnapshot;
use crate::patterns::PatternRecord;

// =============================================================================
// Thresholds
// =============================================================================

/// Draw calls per frame: warning, critical, emergency
pub const DRAW_COUNT_THRESHOLDS: [u64; 3] = [1000, 3000, 5000];
/// Weighted state changes per frame: warning, critical, emergency
pub const STATE_CHANGE_THRESHOLDS: [u64; 3] = [500, 1500, 3000];
/// Patterns shown in the report's top list
pub const TOP_PATTERN_COUNT: usize = 10;
/// Average occurrences per frame for a static pattern to be worth an indirect draw
pub const INDIRECT_MIN_OCCURRENCES_PER_FRAME: f64 = 2.0;

// =============================================================================
// Diagnostics
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Warning,
    Critical,
    Emergency,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Warning => "warning",
            Severity::Critical => "critical",
            Severity::Emergency => "emergency",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    DrawCount,
    StateChanges,
    DuplicateRatio,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub metric: Metric,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity, self.message)
    }
}

fn tier(value: u64, thresholds: [u64; 3]) -> Option<(Severity, u64)> {
    let [warning, critical, emergency] = thresholds;
    if value >= emergency {
        Some((Severity::Emergency, emergency))
    } else if value >= critical {
        Some((Severity::Critical, critical))
    } else if value >= warning {
        Some((Severity::Warning, warning))
    } else {
        None
    }
}

/// Health of one frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameAnalysis {
    pub frame: u64,
    /// Draw calls the frame issues: batches once optimized, accepted commands before
    pub draw_calls: u64,
    /// Weighted state changes in the order the frame would execute
    pub state_changes: u64,
    pub duplicate_ratio: f64,
    pub counters: CounterSnapshot,
    pub diagnostics: Vec<Diagnostic>,
}

impl FrameAnalysis {
    pub fn new(
        frame: u64,
        draw_calls: u64,
        state_changes: u64,
        counters: CounterSnapshot,
        duplicate_warning_ratio: f64,
    ) -> Self {
        let duplicate_ratio = counters.duplicate_ratio();
        let mut diagnostics = Vec::new();

        if let Some((severity, threshold)) = tier(draw_calls, DRAW_COUNT_THRESHOLDS) {
            diagnostics.push(Diagnostic {
                severity,
                metric: Metric::DrawCount,
                value: draw_calls as f64,
                threshold: threshold as f64,
                message: format!("{} draw calls (threshold {})", draw_calls, threshold),
            });
        }
        if let Some((severity, threshold)) = tier(state_changes, STATE_CHANGE_THRESHOLDS) {
            diagnostics.push(Diagnostic {
                severity,
                metric: Metric::StateChanges,
                value: state_changes as f64,
                threshold: threshold as f64,
                message: format!(
                    "{} weighted state changes (threshold {})",
                    state_changes, threshold
                ),
            });
        }
        if duplicate_ratio > duplicate_warning_ratio {
            diagnostics.push(Diagnostic {
                severity: Severity::Warning,
                metric: Metric::DuplicateRatio,
                value: duplicate_ratio,
                threshold: duplicate_warning_ratio,
                message: format!(
                    "{:.1}% of submissions were duplicates (threshold {:.1}%)",
                    duplicate_ratio * 100.0,
                    duplicate_warning_ratio * 100.0
                ),
            });
        }

        Self {
            frame,
            draw_calls,
            state_changes,
            duplicate_ratio,
            counters,
            diagnostics,
        }
    }

    pub fn worst_severity(&self) -> Option<Severity> {
        self.diagnostics.iter().map(|d| d.severity).max()
    }

    pub fn is_healthy(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn diagnostic(&self, metric: Metric) -> Option<&Diagnostic> {
        self.diagnostics.iter().find(|d| d.metric == metric)
    }
}

impl fmt::Display for FrameAnalysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frame {}: {} submitted, {} accepted, {} draw calls, {} state changes (-{:.0}%), {} duplicates",
            self.frame,
            self.counters.submitted,
            self.counters.accepted,
            self.draw_calls,
            self.state_changes,
            self.counters.state_change_reduction() * 100.0,
            self.counters.duplicates,
        )?;
        for diagnostic in &self.diagnostics {
            write!(f, "\n  {}", diagnostic)?;
        }
        Ok(())
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Lifetime totals plus the live frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolStatistics {
    pub current_frame: u64,
    pub frames_completed: u64,
    pub retained_frames: usize,
    pub emergency: bool,
    /// Completed frames plus the current one
    pub totals: CounterSnapshot,
    pub optimize_failures: u64,
    pub patterns_tracked: usize,
    pub static_patterns: usize,
}

impl PoolStatistics {
    /// Commands per executed batch
    pub fn average_batch_size(&self) -> f64 {
        if self.totals.batches == 0 {
            0.0
        } else {
            (self.totals.accepted - self.totals.fallback_commands.min(self.totals.accepted)) as f64
                / self.totals.batches as f64
        }
    }

    pub fn average_draws_per_frame(&self) -> f64 {
        self.totals.executed_draws as f64 / self.frames_completed.max(1) as f64
    }
}

impl fmt::Display for PoolStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = &self.totals;
        writeln!(
            f,
            "frames: {} completed (current {}, {} retained){}",
            self.frames_completed,
            self.current_frame,
            self.retained_frames,
            if self.emergency { ", emergency batching" } else { "" }
        )?;
        writeln!(
            f,
            "commands: {} submitted, {} accepted, {} duplicates, {} rejected, {} hash collisions",
            t.submitted, t.accepted, t.duplicates, t.rejected_total, t.collisions
        )?;
        writeln!(
            f,
            "batching: {} batches, {} merged, {:.1} commands/batch, state changes {} -> {}",
            t.batches,
            t.merged,
            self.average_batch_size(),
            t.state_changes_before,
            t.state_changes_after
        )?;
        write!(
            f,
            "execution: {} draws, {} executor failures, {} optimize failures, {} fallback commands",
            t.executed_draws, t.executor_failures, self.optimize_failures, t.fallback_commands
        )
    }
}

/// Field-wise sum of two counter snapshots
pub(crate) fn accumulate(total: &mut CounterSnapshot, frame: &CounterSnapshot) {
    total.submitted += frame.submitted;
    total.accepted += frame.accepted;
    total.duplicates += frame.duplicates;
    total.collisions += frame.collisions;
    total.rejected_total += frame.rejected_total;
    for (sum, n) in total.rejected.iter_mut().zip(frame.rejected) {
        *sum += n;
    }
    total.vertices += frame.vertices;
    total.indices += frame.indices;
    total.state_changes_before += frame.state_changes_before;
    total.state_changes_after += frame.state_changes_after;
    total.batches += frame.batches;
    total.merged += frame.merged;
    total.executed_draws += frame.executed_draws;
    total.executor_failures += frame.executor_failures;
    total.fallback_commands += frame.fallback_commands;
}

// =============================================================================
// Report
// =============================================================================

/// Per-draw vertex cost bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CostClass {
    /// Under 64 vertices
    Tiny,
    /// Under 1024
    Small,
    /// Under 16384
    Medium,
    Large,
}

impl CostClass {
    pub const ALL: [CostClass; 4] = [
        CostClass::Tiny,
        CostClass::Small,
        CostClass::Medium,
        CostClass::Large,
    ];

    pub fn of(average_vertices: f64) -> Self {
        if average_vertices < 64.0 {
            CostClass::Tiny
        } else if average_vertices < 1024.0 {
            CostClass::Small
        } else if average_vertices < 16384.0 {
            CostClass::Medium
        } else {
            CostClass::Large
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CostClass::Tiny => "tiny",
            CostClass::Small => "small",
            CostClass::Medium => "medium",
            CostClass::Large => "large",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostCluster {
    pub class: CostClass,
    pub patterns: usize,
    pub occurrences: u64,
    pub vertices: u64,
}

/// Pattern-level optimization report
#[derive(Debug, Clone, PartialEq)]
pub struct DrawReport {
    pub statistics: PoolStatistics,
    pub clusters: [CostCluster; 4],
    /// Heaviest patterns by total vertex volume
    pub top_patterns: Vec<PatternRecord>,
    /// Static patterns recurring often enough to draw indirectly
    pub indirect_candidates: Vec<PatternRecord>,
}

impl DrawReport {
    /// Build from a pattern snapshot sorted heaviest first
    pub fn new(statistics: PoolStatistics, patterns: &[PatternRecord]) -> Self {
        let mut clusters = CostClass::ALL.map(|class| CostCluster {
            class,
            patterns: 0,
            occurrences: 0,
            vertices: 0,
        });
        for record in patterns {
            let cluster = &mut clusters[CostClass::of(record.average_vertices()) as usize];
            cluster.patterns += 1;
            cluster.occurrences += record.occurrences;
            cluster.vertices += record.vertex_sum;
        }

        let top_patterns = patterns.iter().take(TOP_PATTERN_COUNT).copied().collect();
        let indirect_candidates = patterns
            .iter()
            .filter(|r| {
                r.is_static() && r.occurrences_per_frame() >= INDIRECT_MIN_OCCURRENCES_PER_FRAME
            })
            .copied()
            .collect();

        Self {
            statistics,
            clusters,
            top_patterns,
            indirect_candidates,
        }
    }

    pub fn cluster(&self, class: CostClass) -> &CostCluster {
        &self.clusters[class as usize]
    }
}

impl fmt::Display for DrawReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Draw pool report ===")?;
        writeln!(f, "{}", self.statistics)?;

        writeln!(f, "\n--- Cost clusters ---")?;
        for cluster in &self.clusters {
            writeln!(
                f,
                "{:>6}: {} patterns, {} draws, {} vertices",
                cluster.class.as_str(),
                cluster.patterns,
                cluster.occurrences,
                cluster.vertices
            )?;
        }

        writeln!(f, "\n--- Top patterns ---")?;
        if self.top_patterns.is_empty() {
            writeln!(f, "(none)")?;
        }
        for record in &self.top_patterns {
            writeln!(
                f,
                "{:016x}: {} draws, {} vertices, {:.1} avg, {:.1}/frame{}",
                record.hash,
                record.occurrences,
                record.vertex_sum,
                record.average_vertices(),
                record.occurrences_per_frame(),
                if record.is_static() { ", static" } else { "" }
            )?;
        }

        writeln!(f, "\n--- Indirect draw candidates ---")?;
        if self.indirect_candidates.is_empty() {
            write!(f, "(none)")?;
        }
        for (i, record) in self.indirect_candidates.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(
                f,
                "{:016x}: static for {} frames, {:.1} draws/frame",
                record.hash,
                record.streak,
                record.occurrences_per_frame()
            )?;
        }
        Ok(())
    }
}
