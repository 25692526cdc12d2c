//! The draw pool
//!
//! Per frame: any number of threads [`submit`](DrawPool::submit) draws, the
//! render thread calls [`optimize`](DrawPool::optimize) (or lets
//! [`flush`](DrawPool::flush) do it), flushes the batches to a
//! [`DrawExecutor`], then [`begin_new_frame`](DrawPool::begin_new_frame).
//!
//! The last [`RETAINED_FRAME_COUNT`] completed frames stay readable for
//! analysis; older ones are released, arena and all.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use tracing::{debug, trace, warn};

use crate::arena::FrameArena;
use crate::batch::{BatchView, DrawBatch};
use crate::command::{DrawCommand, DrawCommandBuilder, DrawFlags, IndexType, PrimitiveType};
use crate::config::PoolConfig;
use crate::error::{ConfigError, PoolError};
use crate::executor::DrawExecutor;
use crate::frame::{CounterSnapshot, DedupOutcome, FrameState, bump};
use crate::optimize::{BatchOptions, SortOutcome, build_batches, sort_commands};
use crate::patterns::PatternStats;
use crate::perf::PoolPerf;
use crate::report::{DrawReport, FrameAnalysis, PoolStatistics, accumulate};
use crate::state::{StateSignature, weighted_state_changes};
use crate::sync::{lock, read, write};
use crate::validation::{RejectReason, validate};

/// Completed frames kept for trailing analysis
pub const RETAINED_FRAME_COUNT: usize = 3;

/// Per-frame draw call optimizer
#[derive(Debug)]
pub struct DrawPool {
    config: RwLock<PoolConfig>,
    emergency: AtomicBool,
    current: RwLock<Arc<FrameState>>,
    retained: Mutex<VecDeque<Arc<FrameState>>>,
    /// Serializes frame rotation
    rotation: Mutex<()>,
    patterns: PatternStats,
    next_id: AtomicU64,
    /// Sum of every completed frame's counters
    lifetime: Mutex<CounterSnapshot>,
    frames_completed: AtomicU64,
    optimize_failures: AtomicU64,
    perf: Mutex<PoolPerf>,
}

impl Default for DrawPool {
    fn default() -> Self {
        Self::with_valid_config(PoolConfig::default())
    }
}

impl DrawPool {
    pub fn new(config: PoolConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::with_valid_config(config))
    }

    fn with_valid_config(config: PoolConfig) -> Self {
        let first = Arc::new(FrameState::new(0, config.arena_capacity_bytes));
        Self {
            config: RwLock::new(config),
            emergency: AtomicBool::new(false),
            current: RwLock::new(first),
            retained: Mutex::new(VecDeque::with_capacity(RETAINED_FRAME_COUNT + 1)),
            rotation: Mutex::new(()),
            patterns: PatternStats::new(),
            next_id: AtomicU64::new(0),
            lifetime: Mutex::new(CounterSnapshot::default()),
            frames_completed: AtomicU64::new(0),
            optimize_failures: AtomicU64::new(0),
            perf: Mutex::new(PoolPerf::new()),
        }
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Queue a draw for the current frame
    ///
    /// The pool assigns the command its id, so ids increase in submission
    /// order. Returns false if the command was rejected; see [`RejectReason`].
    ///
    /// The current frame stays read-locked until the command is admitted and
    /// counted; [`DrawPool::begin_new_frame`] cannot retire it in between.
    pub fn submit(&self, cmd: DrawCommand) -> bool {
        let started = Instant::now();
        let current = read(&self.current, "current frame");
        let frame: &FrameState = &current;
        let counters = frame.counters();
        bump(&counters.submitted, 1);

        let cmd = cmd.with_id(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Err(reason) = validate(&cmd) {
            counters.reject(reason);
            trace!(id = cmd.id(), %reason, "draw rejected");
            return false;
        }

        let id = cmd.id();
        let pattern = cmd.pattern_hash();
        let total_vertices = cmd.total_vertices();
        let instances = cmd.instance_count() as u64;
        let vertices = cmd.vertex_count() as u64 * instances;
        let indices = if cmd.is_indexed() {
            cmd.index_count() as u64 * instances
        } else {
            0
        };
        let dedup = read(&self.config, "pool config").dedup_enabled;

        let accepted = match frame.admit(cmd, dedup) {
            Ok(outcome) => {
                bump(&counters.accepted, 1);
                bump(&counters.vertices, vertices);
                bump(&counters.indices, indices);
                if outcome == DedupOutcome::Collision {
                    bump(&counters.collisions, 1);
                    debug!(id, "full hash collision with different geometry; keeping both");
                }
                true
            }
            Err(RejectReason::Duplicate) => {
                counters.reject(RejectReason::Duplicate);
                trace!(id, "duplicate draw rejected");
                false
            }
            Err(reason) => {
                counters.reject(reason);
                trace!(id, %reason, "draw rejected");
                return false;
            }
        };

        self.patterns
            .record(pattern, total_vertices, frame.number(), started.elapsed());
        accepted
    }

    /// Submit every command; returns how many were accepted
    pub fn submit_all(&self, commands: impl IntoIterator<Item = DrawCommand>) -> usize {
        commands
            .into_iter()
            .map(|cmd| self.submit(cmd))
            .filter(|&accepted| accepted)
            .count()
    }

    /// Fluent builder that submits on [`PoolDraw::submit`]
    pub fn draw(&self) -> PoolDraw<'_> {
        PoolDraw {
            pool: self,
            builder: DrawCommand::builder(),
        }
    }

    // =========================================================================
    // Optimization
    // =========================================================================

    /// Sort and batch the current frame
    ///
    /// Idempotent until another command is accepted. Returns false if the
    /// pipeline failed; the frame then executes unbatched.
    pub fn optimize(&self) -> bool {
        let frame = self.current_frame_state();
        let mut pending = frame.pending();
        self.optimize_locked(&frame, &mut pending)
    }

    fn optimize_locked(&self, frame: &FrameState, pending: &mut Vec<DrawCommand>) -> bool {
        if frame.is_optimized() {
            return !frame.optimization_failed();
        }

        let started = Instant::now();
        let config = self.config();
        let emergency = self.is_emergency();

        let result = self.run_pipeline(frame, pending, &config, emergency);
        let elapsed = started.elapsed();

        let (failed, batches) = match result {
            Ok(batches) => (false, batches),
            Err(e) => {
                warn!(
                    frame = frame.number(),
                    commands = pending.len(),
                    error = %e,
                    "draw optimization failed; frame will execute unbatched"
                );
                self.optimize_failures.fetch_add(1, Ordering::Relaxed);
                frame.batches_mut().clear();
                frame.counters().batches.store(0, Ordering::Relaxed);
                frame.counters().merged.store(0, Ordering::Relaxed);
                (true, 0)
            }
        };

        frame.mark_optimized(failed, elapsed);
        lock(&self.perf, "pool perf").record_optimize(elapsed, batches as u64, failed);
        !failed
    }

    fn run_pipeline(
        &self,
        frame: &FrameState,
        pending: &mut Vec<DrawCommand>,
        config: &PoolConfig,
        emergency: bool,
    ) -> Result<usize, PoolError> {
        let sort = if config.sort_enabled {
            sort_commands(
                pending,
                config.depth_sort_enabled,
                config.parallel_sort_threshold,
            )
        } else {
            let changes = weighted_state_changes(pending.iter().map(DrawCommand::state));
            SortOutcome {
                opaque_len: pending
                    .iter()
                    .filter(|c| c.state().blend_mode().is_opaque_like())
                    .count(),
                state_changes_before: changes,
                state_changes_after: changes,
                parallel: false,
            }
        };

        let counters = frame.counters();
        counters
            .state_changes_after
            .store(sort.state_changes_after, Ordering::Relaxed);

        let options = BatchOptions {
            merge: config.batch_enabled,
            max_batch_size: config.effective_max_batch_size(emergency),
        };
        let batches = {
            let mut arena = frame.arena();
            // Earlier batches of this frame are about to be replaced
            arena.reset();
            build_batches(pending, options, &mut arena)?
        };

        let count = batches.len();
        let merged = pending.len().saturating_sub(count);
        counters.batches.store(count as u64, Ordering::Relaxed);
        counters.merged.store(merged as u64, Ordering::Relaxed);

        debug!(
            frame = frame.number(),
            commands = pending.len(),
            opaque = sort.opaque_len,
            batches = count,
            merged,
            state_changes_before = counters.state_changes_before.load(Ordering::Relaxed),
            state_changes_after = sort.state_changes_after,
            parallel_sort = sort.parallel,
            max_batch_size = options.max_batch_size,
            "frame optimized"
        );

        *frame.batches_mut() = batches;
        Ok(count)
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Execute the current frame through `executor`
    ///
    /// Optimizes first if needed. Each batch is attempted once; a failing batch
    /// is logged and skipped. Returns the number of draws executed, or 0 if
    /// the frame was already flushed.
    pub fn flush(&self, executor: &mut dyn DrawExecutor) -> u64 {
        let frame = self.current_frame_state();
        let mut pending = frame.pending();
        if frame.is_executed() {
            return 0;
        }
        self.optimize_locked(&frame, &mut pending);
        if !frame.begin_execution() {
            return 0;
        }

        let started = Instant::now();
        let (draws, failures) = if frame.optimization_failed() {
            let (draws, failures) = execute_unbatched(&pending, executor);
            bump(&frame.counters().fallback_commands, pending.len() as u64);
            (draws, failures)
        } else {
            let min_indirect = read(&self.config, "pool config").min_indirect_batch_size;
            let arena = frame.arena();
            let batches = frame.batches();
            execute_batches(&batches, &arena, min_indirect, executor)
        };
        drop(pending);

        let counters = frame.counters();
        bump(&counters.executed_draws, draws);
        bump(&counters.executor_failures, failures);

        let elapsed = started.elapsed();
        lock(&self.perf, "pool perf").record_flush(elapsed, draws, failures);
        debug!(
            frame = frame.number(),
            draws,
            failures,
            elapsed_us = elapsed.as_micros() as u64,
            "frame flushed"
        );
        draws
    }

    // =========================================================================
    // Frame lifecycle
    // =========================================================================

    /// Retire the current frame and start the next one; returns its number
    pub fn begin_new_frame(&self) -> u64 {
        let _rotation = lock(&self.rotation, "frame rotation");
        let config = self.config();

        let retired = {
            let mut current = write(&self.current, "current frame");
            let next = Arc::new(FrameState::new(
                current.number() + 1,
                config.arena_capacity_bytes,
            ));
            std::mem::replace(&mut *current, next)
        };
        let number = retired.number() + 1;

        let snapshot = retired.counters().snapshot();
        accumulate(&mut lock(&self.lifetime, "lifetime counters"), &snapshot);
        self.frames_completed.fetch_add(1, Ordering::Relaxed);
        if !retired.is_executed() && snapshot.accepted > 0 {
            debug!(
                frame = retired.number(),
                accepted = snapshot.accepted,
                "frame retired without flush"
            );
        }

        {
            let mut perf = lock(&self.perf, "pool perf");
            perf.record_frame(snapshot.submitted, snapshot.accepted);
            perf.maybe_log();
        }

        let evicted = {
            let mut retained = lock(&self.retained, "retained frames");
            retained.push_back(retired);
            let mut evicted = Vec::new();
            while retained.len() > RETAINED_FRAME_COUNT {
                if let Some(frame) = retained.pop_front() {
                    evicted.push(frame);
                }
            }
            evicted
        };
        for frame in &evicted {
            frame.release();
        }

        let pruned = self.patterns.prune(number, config.pattern_expiry_frames);
        debug!(
            frame = number,
            evicted = evicted.len(),
            pruned_patterns = pruned,
            "new frame"
        );
        number
    }

    pub fn current_frame(&self) -> u64 {
        read(&self.current, "current frame").number()
    }

    pub fn current_frame_state(&self) -> Arc<FrameState> {
        Arc::clone(&read(&self.current, "current frame"))
    }

    /// Completed frames still held, oldest first
    pub fn retained_frames(&self) -> Vec<Arc<FrameState>> {
        lock(&self.retained, "retained frames").iter().cloned().collect()
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    pub fn config(&self) -> PoolConfig {
        read(&self.config, "pool config").clone()
    }

    pub fn set_dedup_enabled(&self, enabled: bool) {
        write(&self.config, "pool config").dedup_enabled = enabled;
    }

    pub fn set_sort_enabled(&self, enabled: bool) {
        write(&self.config, "pool config").sort_enabled = enabled;
    }

    pub fn set_batch_enabled(&self, enabled: bool) {
        write(&self.config, "pool config").batch_enabled = enabled;
    }

    pub fn set_depth_sort_enabled(&self, enabled: bool) {
        write(&self.config, "pool config").depth_sort_enabled = enabled;
    }

    /// Set the normal batch bound (at least 1); the emergency bound never drops below it
    pub fn set_max_batch_size(&self, size: usize) {
        let mut config = write(&self.config, "pool config");
        config.max_batch_size = size.max(1);
        config.emergency_max_batch_size = config.emergency_max_batch_size.max(config.max_batch_size);
    }

    /// Raise the batch bound to `emergency_max_batch_size` from the next optimize on
    pub fn emergency_batch(&self) {
        if !self.emergency.swap(true, Ordering::AcqRel) {
            warn!(
                max_batch_size = read(&self.config, "pool config").emergency_max_batch_size,
                "emergency batching enabled"
            );
        }
    }

    pub fn clear_emergency(&self) {
        if self.emergency.swap(false, Ordering::AcqRel) {
            debug!("emergency batching cleared");
        }
    }

    pub fn is_emergency(&self) -> bool {
        self.emergency.load(Ordering::Acquire)
    }

    // =========================================================================
    // Analysis
    // =========================================================================

    /// Diagnostics for the current frame
    pub fn analyze_frame(&self) -> FrameAnalysis {
        self.analyze(&self.current_frame_state())
    }

    /// Diagnostics for any frame, e.g. one of [`DrawPool::retained_frames`]
    pub fn analyze(&self, frame: &FrameState) -> FrameAnalysis {
        let counters = frame.counters().snapshot();
        let (draw_calls, state_changes) = if frame.is_optimized() && !frame.optimization_failed()
        {
            (frame.batch_count() as u64, counters.state_changes_after)
        } else {
            let pending = frame.pending();
            (
                pending.len() as u64,
                weighted_state_changes(pending.iter().map(DrawCommand::state)),
            )
        };
        FrameAnalysis::new(
            frame.number(),
            draw_calls,
            state_changes,
            counters,
            read(&self.config, "pool config").duplicate_warning_ratio,
        )
    }

    /// Totals over every completed frame plus the current one
    pub fn statistics(&self) -> PoolStatistics {
        let mut totals = *lock(&self.lifetime, "lifetime counters");
        let current = self.current_frame_state();
        accumulate(&mut totals, &current.counters().snapshot());
        PoolStatistics {
            current_frame: current.number(),
            frames_completed: self.frames_completed.load(Ordering::Relaxed),
            retained_frames: lock(&self.retained, "retained frames").len(),
            emergency: self.is_emergency(),
            totals,
            optimize_failures: self.optimize_failures.load(Ordering::Relaxed),
            patterns_tracked: self.patterns.len(),
            static_patterns: self.patterns.static_count(),
        }
    }

    pub fn generate_report(&self) -> DrawReport {
        DrawReport::new(self.statistics(), &self.patterns.snapshot())
    }

    pub fn patterns(&self) -> &PatternStats {
        &self.patterns
    }
}

fn execute_batches(
    batches: &[DrawBatch],
    arena: &FrameArena,
    min_indirect: usize,
    executor: &mut dyn DrawExecutor,
) -> (u64, u64) {
    let indirect_supported = executor.supports_indirect();
    let mut bound: Option<StateSignature> = None;
    let mut draws = 0u64;
    let mut failures = 0u64;

    for batch in batches {
        if bound.as_ref() != Some(batch.state()) {
            if let Err(e) = executor.bind_state(batch.state()) {
                warn!(batch = batch.id(), error = %e, "state bind failed; skipping batch");
                failures += 1;
                bound = None;
                continue;
            }
            bound = Some(*batch.state());
        }

        let view = match BatchView::new(batch, arena) {
            Ok(view) => view,
            Err(e) => {
                warn!(batch = batch.id(), error = %e, "batch has no indirect buffer");
                failures += 1;
                continue;
            }
        };

        let use_indirect = indirect_supported && batch.len() >= min_indirect;
        match executor.execute_batch(&view, use_indirect) {
            Ok(n) => draws += n as u64,
            Err(e) => {
                warn!(
                    batch = batch.id(),
                    commands = batch.len(),
                    error = %e,
                    "batch execution failed"
                );
                failures += 1;
            }
        }
    }
    (draws, failures)
}

fn execute_unbatched(commands: &[DrawCommand], executor: &mut dyn DrawExecutor) -> (u64, u64) {
    let mut bound: Option<StateSignature> = None;
    let mut draws = 0u64;
    let mut failures = 0u64;

    for cmd in commands {
        if bound.as_ref() != Some(cmd.state()) {
            if let Err(e) = executor.bind_state(cmd.state()) {
                warn!(id = cmd.id(), error = %e, "state bind failed; skipping draw");
                failures += 1;
                bound = None;
                continue;
            }
            bound = Some(*cmd.state());
        }
        match executor.execute_single(cmd) {
            Ok(n) => draws += n as u64,
            Err(e) => {
                warn!(id = cmd.id(), error = %e, "draw execution failed");
                failures += 1;
            }
        }
    }
    (draws, failures)
}

// =============================================================================
// Fluent submission
// =============================================================================

/// [`DrawCommandBuilder`] bound to a pool
#[must_use = "call submit() to queue the draw"]
pub struct PoolDraw<'a> {
    pool: &'a DrawPool,
    builder: DrawCommandBuilder,
}

impl PoolDraw<'_> {
    pub fn primitive(mut self, primitive: PrimitiveType) -> Self {
        self.builder = self.builder.primitive(primitive);
        self
    }

    pub fn vertices(mut self, vertex_buffer: i32, first_vertex: i32, vertex_count: i32) -> Self {
        self.builder = self.builder.vertices(vertex_buffer, first_vertex, vertex_count);
        self
    }

    pub fn indexed(
        mut self,
        index_buffer: i32,
        index_type: IndexType,
        first_index: i32,
        index_count: i32,
    ) -> Self {
        self.builder = self
            .builder
            .indexed(index_buffer, index_type, first_index, index_count);
        self
    }

    pub fn base_vertex(mut self, base_vertex: i32) -> Self {
        self.builder = self.builder.base_vertex(base_vertex);
        self
    }

    pub fn instances(mut self, instance_count: i32, base_instance: i32) -> Self {
        self.builder = self.builder.instances(instance_count, base_instance);
        self
    }

    pub fn state(mut self, state: StateSignature) -> Self {
        self.builder = self.builder.state(state);
        self
    }

    pub fn depth(mut self, depth: f32) -> Self {
        self.builder = self.builder.depth(depth);
        self
    }

    pub fn flag(mut self, flag: DrawFlags) -> Self {
        self.builder = self.builder.flag(flag);
        self
    }

    pub fn bounds(mut self, center: [f32; 3], radius: f32) -> Self {
        self.builder = self.builder.bounds(center, radius);
        self
    }

    pub fn submit(self) -> bool {
        // Id is replaced by the pool
        self.pool.submit(self.builder.build(0))
    }
}
