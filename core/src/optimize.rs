//! Sort and batch phases of `DrawPool::optimize`
//!
//! Both phases are pure functions over one frame's command list so they can be
//! tested without a pool.
//!
//! Sort order:
//! 1. Opaque-like draws (opaque, alpha test) before blended draws
//! 2. State sort key, ascending
//! 3. Depth: ascending (front-to-back) for opaque, descending (back-to-front) for blended
//! 4. Command id, ascending, so equal keys never shuffle between runs
//!
//! Batching groups opaque-like draws by compatibility key regardless of their
//! distance in the sorted order. Blended draws only extend the batch created
//! immediately before them: merging across an intervening blended draw would
//! change what ends up on top.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use hashbrown::HashMap;

use crate::arena::FrameArena;
use crate::batch::DrawBatch;
use crate::command::{DrawCommand, DrawFlags};
use crate::error::PoolError;
use crate::state::weighted_state_changes;

// =============================================================================
// Sort
// =============================================================================

/// Result of the sort phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SortOutcome {
    /// Commands in the opaque segment (they come first)
    pub opaque_len: usize,
    /// Weighted state changes in submission order
    pub state_changes_before: u64,
    /// Weighted state changes in final order
    pub state_changes_after: u64,
    /// Whether the two segments were sorted on separate threads
    pub parallel: bool,
}

fn compare_opaque(a: &DrawCommand, b: &DrawCommand, depth_sort: bool) -> Ordering {
    a.state()
        .sort_key()
        .cmp(&b.state().sort_key())
        .then_with(|| {
            if depth_sort {
                a.depth().total_cmp(&b.depth())
            } else {
                Ordering::Equal
            }
        })
        .then(a.id().cmp(&b.id()))
}

fn compare_blended(a: &DrawCommand, b: &DrawCommand, depth_sort: bool) -> Ordering {
    a.state()
        .sort_key()
        .cmp(&b.state().sort_key())
        .then_with(|| {
            if depth_sort {
                b.depth().total_cmp(&a.depth())
            } else {
                Ordering::Equal
            }
        })
        .then(a.id().cmp(&b.id()))
}

/// Reorder `commands` in place to minimize state changes
///
/// At `parallel_threshold` commands or more, the opaque and blended segments
/// are sorted as a fork/join pair; both finish before this returns.
pub fn sort_commands(
    commands: &mut Vec<DrawCommand>,
    depth_sort: bool,
    parallel_threshold: usize,
) -> SortOutcome {
    let state_changes_before = weighted_state_changes(commands.iter().map(DrawCommand::state));

    let (mut opaque, mut blended): (Vec<DrawCommand>, Vec<DrawCommand>) = commands
        .drain(..)
        .partition(|c| c.state().blend_mode().is_opaque_like());

    let parallel = opaque.len() + blended.len() >= parallel_threshold;
    if parallel {
        rayon::join(
            || opaque.sort_unstable_by(|a, b| compare_opaque(a, b, depth_sort)),
            || blended.sort_unstable_by(|a, b| compare_blended(a, b, depth_sort)),
        );
    } else {
        opaque.sort_unstable_by(|a, b| compare_opaque(a, b, depth_sort));
        blended.sort_unstable_by(|a, b| compare_blended(a, b, depth_sort));
    }

    let opaque_len = opaque.len();
    commands.append(&mut opaque);
    commands.append(&mut blended);

    SortOutcome {
        opaque_len,
        state_changes_before,
        state_changes_after: weighted_state_changes(commands.iter().map(DrawCommand::state)),
        parallel,
    }
}

// =============================================================================
// Batch
// =============================================================================

/// Compatibility key: state primary hash, topology, buffers
pub fn batch_key(cmd: &DrawCommand) -> u64 {
    let mut hasher = xxhash_rust::xxh3::Xxh3::new();
    cmd.state().primary_hash().hash(&mut hasher);
    cmd.primitive().hash(&mut hasher);
    cmd.is_indexed().hash(&mut hasher);
    cmd.vertex_buffer().hash(&mut hasher);
    if cmd.is_indexed() {
        cmd.index_type().hash(&mut hasher);
        cmd.index_buffer().hash(&mut hasher);
    }
    hasher.finish()
}

/// Batching parameters
#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    /// When false every command becomes its own batch
    pub merge: bool,
    /// Commands per batch
    pub max_batch_size: usize,
}

/// Bin-pack sorted commands into finalized batches
///
/// A batch that reaches `max_batch_size` is finalized at once and the group
/// continues in a fresh batch. Skip-optimization draws are singletons.
pub fn build_batches(
    commands: &[DrawCommand],
    options: BatchOptions,
    arena: &mut FrameArena,
) -> Result<Vec<DrawBatch>, PoolError> {
    let max = options.max_batch_size.max(1);
    let mut batches: Vec<DrawBatch> = Vec::new();
    // Open batch per key, opaque-like draws only
    let mut open: HashMap<u64, usize> = HashMap::new();

    for cmd in commands {
        let next_id = batches.len() as u32;

        if !options.merge || cmd.flags().contains(DrawFlags::SKIP_OPTIMIZATION) {
            let mut batch = DrawBatch::new(next_id, cmd, 1);
            batch.add(cmd.clone())?;
            batch.finalize(arena)?;
            batches.push(batch);
            continue;
        }

        let target = if cmd.state().blend_mode().is_opaque_like() {
            open.get(&batch_key(cmd))
                .copied()
                .filter(|&idx| batches[idx].accepts(cmd))
        } else {
            batches
                .len()
                .checked_sub(1)
                .filter(|&idx| batches[idx].accepts(cmd))
        };

        let idx = match target {
            Some(idx) => idx,
            None => {
                batches.push(DrawBatch::new(next_id, cmd, max));
                let idx = batches.len() - 1;
                if cmd.state().blend_mode().is_opaque_like() {
                    open.insert(batch_key(cmd), idx);
                }
                idx
            }
        };

        let batch = &mut batches[idx];
        batch.add(cmd.clone())?;
        if batch.is_full() {
            batch.finalize(arena)?;
        }
    }

    for batch in batches.iter_mut().filter(|b| !b.is_finalized()) {
        batch.finalize(arena)?;
    }

    Ok(batches)
}
