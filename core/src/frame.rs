//! Per-frame state
//!
//! A [`FrameState`] owns everything one frame produces: the pending command
//! list, the exact-duplicate index, the finalized batches and the arena their
//! indirect buffers live in. Dropping out of the pool's retention window
//! releases the arena in one step.
//!
//! Lock order, outermost first: `dedup`, `pending`, `last_admitted`, `arena`,
//! `batches`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::arena::FrameArena;
use crate::batch::DrawBatch;
use crate::command::DrawCommand;
use crate::state::StateSignature;
use crate::sync::{lock, read, write};
use crate::validation::RejectReason;

// =============================================================================
// Dedup index
// =============================================================================

/// Outcome of checking a command against the frame's dedup index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    /// First command with this full hash
    New,
    /// Same full hash and same geometry hash as an earlier command
    Duplicate,
    /// Same full hash but different geometry: accepted, counted as a collision
    Collision,
}

/// Full hash -> geometry hashes seen under it
#[derive(Debug, Default)]
struct DedupIndex {
    seen: HashMap<u64, SmallVec<[u64; 1]>>,
}

impl DedupIndex {
    fn check(&mut self, full_hash: u64, geometry_hash: u64) -> DedupOutcome {
        match self.seen.get_mut(&full_hash) {
            None => {
                self.seen.insert(full_hash, SmallVec::from_elem(geometry_hash, 1));
                DedupOutcome::New
            }
            Some(geometries) if geometries.contains(&geometry_hash) => DedupOutcome::Duplicate,
            Some(geometries) => {
                geometries.push(geometry_hash);
                DedupOutcome::Collision
            }
        }
    }

    fn clear(&mut self) {
        self.seen = HashMap::new();
    }
}

// =============================================================================
// Counters
// =============================================================================

/// Relaxed atomic counters for one frame
#[derive(Debug, Default)]
pub struct FrameCounters {
    pub(crate) submitted: AtomicU64,
    pub(crate) accepted: AtomicU64,
    pub(crate) collisions: AtomicU64,
    pub(crate) rejected: [AtomicU64; RejectReason::COUNT],
    pub(crate) vertices: AtomicU64,
    pub(crate) indices: AtomicU64,
    pub(crate) state_changes_before: AtomicU64,
    pub(crate) state_changes_after: AtomicU64,
    pub(crate) batches: AtomicU64,
    pub(crate) merged: AtomicU64,
    pub(crate) executed_draws: AtomicU64,
    pub(crate) executor_failures: AtomicU64,
    pub(crate) fallback_commands: AtomicU64,
}

pub(crate) fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

impl FrameCounters {
    pub(crate) fn reject(&self, reason: RejectReason) {
        bump(&self.rejected[reason as usize], 1);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let rejected: [u64; RejectReason::COUNT] = std::array::from_fn(|i| load(&self.rejected[i]));
        CounterSnapshot {
            submitted: load(&self.submitted),
            accepted: load(&self.accepted),
            duplicates: rejected[RejectReason::Duplicate as usize],
            collisions: load(&self.collisions),
            rejected_total: rejected.iter().sum(),
            rejected,
            vertices: load(&self.vertices),
            indices: load(&self.indices),
            state_changes_before: load(&self.state_changes_before),
            state_changes_after: load(&self.state_changes_after),
            batches: load(&self.batches),
            merged: load(&self.merged),
            executed_draws: load(&self.executed_draws),
            executor_failures: load(&self.executor_failures),
            fallback_commands: load(&self.fallback_commands),
        }
    }
}

/// Plain copy of [`FrameCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub submitted: u64,
    pub accepted: u64,
    pub duplicates: u64,
    pub collisions: u64,
    /// All rejections, duplicates included
    pub rejected_total: u64,
    /// Rejections indexed by `RejectReason as usize`
    pub rejected: [u64; RejectReason::COUNT],
    pub vertices: u64,
    pub indices: u64,
    /// Weighted state changes of the accepted commands in submission order
    pub state_changes_before: u64,
    /// Weighted state changes after sorting
    pub state_changes_after: u64,
    pub batches: u64,
    /// Commands folded into an existing batch (`accepted - batches` when batched)
    pub merged: u64,
    pub executed_draws: u64,
    pub executor_failures: u64,
    /// Commands executed one by one after a failed optimization
    pub fallback_commands: u64,
}

impl CounterSnapshot {
    pub fn rejected_for(&self, reason: RejectReason) -> u64 {
        self.rejected[reason as usize]
    }

    pub fn duplicate_ratio(&self) -> f64 {
        if self.submitted == 0 {
            0.0
        } else {
            self.duplicates as f64 / self.submitted as f64
        }
    }

    /// Fraction of weighted state changes removed by sorting
    pub fn state_change_reduction(&self) -> f64 {
        if self.state_changes_before == 0 {
            0.0
        } else {
            1.0 - self.state_changes_after as f64 / self.state_changes_before as f64
        }
    }
}

// =============================================================================
// FrameState
// =============================================================================

/// Everything one frame owns
#[derive(Debug)]
pub struct FrameState {
    number: u64,
    started_at: Instant,
    arena: Mutex<FrameArena>,
    pending: Mutex<Vec<DrawCommand>>,
    /// State of the most recently accepted command, in submission order
    last_admitted: Mutex<Option<StateSignature>>,
    dedup: Mutex<DedupIndex>,
    batches: RwLock<Vec<DrawBatch>>,
    counters: FrameCounters,
    optimized: AtomicBool,
    optimization_failed: AtomicBool,
    executed: AtomicBool,
    released: AtomicBool,
    optimize_time_ns: AtomicU64,
}

impl FrameState {
    pub fn new(number: u64, arena_capacity: usize) -> Self {
        Self {
            number,
            started_at: Instant::now(),
            arena: Mutex::new(FrameArena::new(arena_capacity)),
            pending: Mutex::new(Vec::new()),
            last_admitted: Mutex::new(None),
            dedup: Mutex::new(DedupIndex::default()),
            batches: RwLock::new(Vec::new()),
            counters: FrameCounters::default(),
            optimized: AtomicBool::new(false),
            optimization_failed: AtomicBool::new(false),
            executed: AtomicBool::new(false),
            released: AtomicBool::new(false),
            optimize_time_ns: AtomicU64::new(0),
        }
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn counters(&self) -> &FrameCounters {
        &self.counters
    }

    /// Queue an already validated command
    ///
    /// Returns the dedup outcome on acceptance. The command is refused when the
    /// frame has been flushed, or when `dedup` is on and it repeats an earlier
    /// command exactly. Accepting a command after `optimize` marks the frame
    /// for re-optimization.
    ///
    /// The weighted state change from the previously accepted command is added
    /// to `state_changes_before`, so the unsorted baseline survives sorting.
    pub(crate) fn admit(&self, cmd: DrawCommand, dedup: bool) -> Result<DedupOutcome, RejectReason> {
        let mut index = lock(&self.dedup, "frame dedup");
        let mut pending = lock(&self.pending, "frame pending");
        if self.executed.load(Ordering::Acquire) {
            return Err(RejectReason::FrameClosed);
        }

        let outcome = if dedup {
            index.check(cmd.full_hash(), cmd.geometry_hash())
        } else {
            DedupOutcome::New
        };
        if outcome == DedupOutcome::Duplicate {
            return Err(RejectReason::Duplicate);
        }

        let mut last = lock(&self.last_admitted, "frame submission order");
        if let Some(previous) = last.as_ref() {
            bump(
                &self.counters.state_changes_before,
                previous.state_change_count(cmd.state()) as u64,
            );
        }
        *last = Some(*cmd.state());
        drop(last);

        pending.push(cmd);
        self.optimized.store(false, Ordering::Release);
        Ok(outcome)
    }

    pub fn pending(&self) -> MutexGuard<'_, Vec<DrawCommand>> {
        lock(&self.pending, "frame pending")
    }

    pub(crate) fn arena(&self) -> MutexGuard<'_, FrameArena> {
        lock(&self.arena, "frame arena")
    }

    pub fn batches(&self) -> RwLockReadGuard<'_, Vec<DrawBatch>> {
        read(&self.batches, "frame batches")
    }

    pub(crate) fn batches_mut(&self) -> RwLockWriteGuard<'_, Vec<DrawBatch>> {
        write(&self.batches, "frame batches")
    }

    pub fn pending_len(&self) -> usize {
        self.pending().len()
    }

    pub fn batch_count(&self) -> usize {
        self.batches().len()
    }

    /// Whether batches reflect every accepted command
    pub fn is_optimized(&self) -> bool {
        self.optimized.load(Ordering::Acquire)
    }

    pub(crate) fn mark_optimized(&self, failed: bool, elapsed: Duration) {
        self.optimization_failed.store(failed, Ordering::Release);
        self.optimized.store(true, Ordering::Release);
        self.optimize_time_ns
            .store(elapsed.as_nanos().min(u64::MAX as u128) as u64, Ordering::Relaxed);
    }

    /// Whether the last `optimize` hit an internal error
    pub fn optimization_failed(&self) -> bool {
        self.optimization_failed.load(Ordering::Acquire)
    }

    pub fn is_executed(&self) -> bool {
        self.executed.load(Ordering::Acquire)
    }

    /// Claim execution; false if the frame was already flushed
    pub(crate) fn begin_execution(&self) -> bool {
        self.executed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn optimize_time(&self) -> Duration {
        Duration::from_nanos(self.optimize_time_ns.load(Ordering::Relaxed))
    }

    /// Free the arena and drop all commands and batches
    ///
    /// Counters stay readable.
    pub(crate) fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        lock(&self.dedup, "frame dedup").clear();
        *self.pending() = Vec::new();
        *lock(&self.last_admitted, "frame submission order") = None;
        self.arena().release();
        *self.batches_mut() = Vec::new();
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub fn arena_bytes_used(&self) -> usize {
        self.arena().bytes_used()
    }

    pub fn arena_high_water(&self) -> usize {
        self.arena().high_water()
    }

    pub fn summary(&self) -> FrameSummary {
        FrameSummary {
            number: self.number,
            age: self.started_at.elapsed(),
            counters: self.counters.snapshot(),
            pending: self.pending_len(),
            batches: self.batch_count(),
            arena_bytes: self.arena_high_water(),
            optimized: self.is_optimized(),
            optimization_failed: self.optimization_failed(),
            executed: self.is_executed(),
            released: self.is_released(),
        }
    }
}

/// Point-in-time view of a frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSummary {
    pub number: u64,
    pub age: Duration,
    pub counters: CounterSnapshot,
    pub pending: usize,
    pub batches: usize,
    /// Peak arena usage in bytes
    pub arena_bytes: usize,
    pub optimized: bool,
    pub optimization_failed: bool,
    pub executed: bool,
    pub released: bool,
}
