//! End-to-end tests for submit -> optimize -> flush.
//!
//! Workloads come from seeded generators in `workload`, so every run sees the
//! same commands.

mod workload;

use std::collections::HashSet;

use drawpool::{
    BatchView, BlendMode, CountingExecutor, DrawCommand, DrawExecutor, DrawFlags, DrawPool,
    IndirectRecord, PoolConfig, RejectReason, StateSignature, indirect_stride,
};

/// Executor that checks every batch's indirect buffer against its commands
#[derive(Default)]
struct VerifyingExecutor {
    batches: usize,
    records: usize,
}

impl DrawExecutor for VerifyingExecutor {
    fn bind_state(&mut self, _state: &StateSignature) -> anyhow::Result<()> {
        Ok(())
    }

    fn execute_batch(&mut self, batch: &BatchView<'_>, _use_indirect: bool) -> anyhow::Result<u32> {
        let bytes = batch.indirect_bytes();
        assert_eq!(bytes.len(), batch.len() * indirect_stride(batch.is_indexed()));
        let records = batch.records();
        assert_eq!(records.len(), batch.len());
        for (record, cmd) in records.iter().zip(batch.commands()) {
            assert_eq!(*record, IndirectRecord::from_command(cmd));
        }
        self.batches += 1;
        self.records += records.len();
        Ok(batch.len() as u32)
    }
}

#[test]
fn test_three_identical_draws_keep_one() {
    let pool = DrawPool::default();
    let cmd = workload::triangles(1, StateSignature::new(0, 1, 1)).remove(0);

    assert!(pool.submit(cmd.clone()));
    assert!(!pool.submit(cmd.clone()));
    assert!(!pool.submit(cmd));
    assert!(pool.optimize());

    let frame = pool.current_frame_state();
    let counters = frame.counters().snapshot();
    assert_eq!(counters.accepted, 1);
    assert_eq!(counters.duplicates, 2);
    let batches = frame.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 1);
}

#[test]
fn test_sorting_reduces_state_changes_for_random_workload() {
    let pool = DrawPool::default();
    let states = workload::states(50);
    let mut rng = workload::rng(0x5eed);
    let draws = workload::random_draws(&mut rng, 2000, &states);

    assert_eq!(pool.submit_all(draws), 2000);
    assert!(pool.optimize());

    let counters = pool.current_frame_state().counters().snapshot();
    assert!(counters.state_changes_before > 0);
    assert!(
        counters.state_changes_after < counters.state_changes_before,
        "after {} >= before {}",
        counters.state_changes_after,
        counters.state_changes_before
    );
}

#[test]
fn test_every_accepted_command_lands_in_exactly_one_batch() {
    let pool = DrawPool::default();
    pool.set_max_batch_size(16);
    let states = workload::states(12);
    let mut rng = workload::rng(7);
    let mut draws = workload::random_draws(&mut rng, 600, &states);
    for cmd in draws.iter_mut().step_by(37) {
        *cmd = cmd.clone().with_flags(cmd.flags() | DrawFlags::SKIP_OPTIMIZATION);
    }
    assert_eq!(pool.submit_all(draws), 600);
    assert!(pool.optimize());

    let frame = pool.current_frame_state();
    let batches = frame.batches();
    let mut seen = HashSet::new();
    for batch in batches.iter() {
        assert!(batch.is_finalized());
        assert!(batch.len() <= 16);
        for cmd in batch.commands() {
            assert!(seen.insert(cmd.id()), "command {} batched twice", cmd.id());
            assert!(cmd.state().can_merge_with(batch.state()));
            if cmd.flags().contains(DrawFlags::SKIP_OPTIMIZATION) {
                assert!(batch.is_singleton());
            }
        }
    }
    assert_eq!(seen.len(), 600);

    let counters = frame.counters().snapshot();
    assert_eq!(counters.batches, batches.len() as u64);
    assert_eq!(counters.merged, 600 - batches.len() as u64);
}

#[test]
fn test_sorted_order_properties() {
    let pool = DrawPool::default();
    let states = workload::states(20);
    let mut rng = workload::rng(99);
    pool.submit_all(workload::random_draws(&mut rng, 500, &states));
    assert!(pool.optimize());

    let frame = pool.current_frame_state();
    let sorted = frame.pending();
    let split = sorted
        .iter()
        .position(|c| !c.state().blend_mode().is_opaque_like())
        .unwrap_or(sorted.len());
    assert!(sorted[split..].iter().all(|c| !c.state().blend_mode().is_opaque_like()));

    for pair in sorted[..split].windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        assert!(a.state().sort_key() <= b.state().sort_key());
        if a.state().sort_key() == b.state().sort_key() {
            assert!(a.depth() <= b.depth());
        }
    }
    for pair in sorted[split..].windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        assert!(a.state().sort_key() <= b.state().sort_key());
        if a.state().sort_key() == b.state().sort_key() {
            assert!(a.depth() >= b.depth());
        }
    }
}

#[test]
fn test_parallel_and_sequential_sorts_agree() {
    let states = workload::states(30);
    let run = |threshold: usize| -> Vec<u64> {
        let mut config = PoolConfig::default();
        config.parallel_sort_threshold = threshold;
        let pool = DrawPool::new(config).unwrap();
        let mut rng = workload::rng(1234);
        pool.submit_all(workload::random_draws(&mut rng, 1500, &states));
        pool.optimize();
        pool.current_frame_state()
            .pending()
            .iter()
            .map(DrawCommand::id)
            .collect()
    };
    assert_eq!(run(1), run(usize::MAX));
}

#[test]
fn test_indirect_buffers_match_commands() {
    let pool = DrawPool::default();
    let states = workload::states(8);
    let mut rng = workload::rng(42);
    pool.submit_all(workload::random_draws(&mut rng, 300, &states));

    let mut exec = VerifyingExecutor::default();
    assert_eq!(pool.flush(&mut exec), 300);
    assert_eq!(exec.records, 300);
    assert_eq!(exec.batches, pool.current_frame_state().batch_count());
}

#[test]
fn test_emergency_batching_raises_cap() {
    let mut config = PoolConfig::default();
    config.max_batch_size = 8;
    config.emergency_max_batch_size = 64;
    let pool = DrawPool::new(config).unwrap();
    let state = StateSignature::new(0, 1, 1);

    pool.submit_all(workload::triangles(100, state));
    pool.optimize();
    assert_eq!(pool.current_frame_state().batch_count(), 13);

    pool.begin_new_frame();
    pool.emergency_batch();
    assert!(pool.statistics().emergency);
    pool.submit_all(workload::triangles(100, state));
    pool.optimize();
    let frame = pool.current_frame_state();
    let sizes: Vec<usize> = frame.batches().iter().map(|b| b.len()).collect();
    assert_eq!(sizes, vec![64, 36]);

    pool.begin_new_frame();
    pool.clear_emergency();
    pool.submit_all(workload::triangles(16, state));
    pool.optimize();
    assert_eq!(pool.current_frame_state().batch_count(), 2);
}

#[test]
fn test_disabled_stages() {
    let pool = DrawPool::default();
    pool.set_batch_enabled(false);
    pool.set_sort_enabled(false);
    pool.submit_all(workload::triangles(10, StateSignature::new(0, 1, 1)));
    pool.optimize();
    let frame = pool.current_frame_state();
    assert_eq!(frame.batch_count(), 10);
    let counters = frame.counters().snapshot();
    assert_eq!(counters.merged, 0);
    assert_eq!(counters.state_changes_before, counters.state_changes_after);
}

#[test]
fn test_executor_failure_does_not_abort_frame() {
    let pool = DrawPool::default();
    for shader in 0..4 {
        pool.submit_all(workload::triangles(5, StateSignature::new(0, shader, 1)));
    }
    let mut exec = workload::FlakyExecutor {
        failing_shader: 2,
        ..Default::default()
    };
    assert_eq!(pool.flush(&mut exec), 15);
    assert_eq!(exec.executed.len(), 3);

    let counters = pool.current_frame_state().counters().snapshot();
    assert_eq!(counters.executor_failures, 1);
    assert_eq!(counters.executed_draws, 15);
}

#[test]
fn test_blended_draws_keep_back_to_front_order() {
    let pool = DrawPool::default();
    let glass = StateSignature::new(0, 1, 1).with_blend_mode(BlendMode::AlphaBlend);
    let smoke = StateSignature::new(0, 2, 1).with_blend_mode(BlendMode::AlphaBlend);
    for (i, (state, depth)) in [(glass, 0.9), (smoke, 0.6), (glass, 0.3)].into_iter().enumerate() {
        pool.draw()
            .vertices(1, i as i32 * 3, 3)
            .state(state)
            .depth(depth)
            .submit();
    }

    let mut exec = CountingExecutor::recording();
    pool.flush(&mut exec);
    // Sort key separates the shaders, then each shader's draws run far to near
    assert_eq!(exec.batches, 2);
    let frame = pool.current_frame_state();
    let batches = frame.batches();
    let depths: Vec<f32> = batches[0].commands().iter().map(|c| c.depth()).collect();
    assert_eq!(depths, vec![0.9, 0.3]);
}

#[test]
fn test_concurrent_submission() {
    let pool = DrawPool::default();
    let state = StateSignature::new(0, 1, 1);
    std::thread::scope(|scope| {
        for t in 0..4 {
            let pool = &pool;
            scope.spawn(move || {
                for i in 0..500 {
                    pool.draw()
                        .vertices(1, (t * 500 + i) * 3, 3)
                        .state(state)
                        .submit();
                }
            });
        }
    });

    let frame = pool.current_frame_state();
    let counters = frame.counters().snapshot();
    assert_eq!(counters.submitted, 2000);
    assert_eq!(counters.accepted, 2000);
    let ids: HashSet<u64> = frame.pending().iter().map(DrawCommand::id).collect();
    assert_eq!(ids.len(), 2000);

    let mut exec = CountingExecutor::new();
    assert_eq!(pool.flush(&mut exec), 2000);
    assert_eq!(exec.batches, 2000 / 256 + 1);
}

#[test]
fn test_submit_after_optimize_is_batched_on_flush() {
    let pool = DrawPool::default();
    let state = StateSignature::new(0, 1, 1);
    let mut draws = workload::triangles(3, state);
    let late = draws.pop().unwrap();
    pool.submit_all(draws);
    pool.optimize();
    assert!(pool.submit(late));

    let mut exec = CountingExecutor::new();
    assert_eq!(pool.flush(&mut exec), 3);
    assert_eq!(exec.batches, 1);
}

#[test]
fn test_rejections_are_reported_in_statistics() {
    let pool = DrawPool::default();
    let state = StateSignature::new(0, 1, 1);
    pool.draw().vertices(1, 0, 3).state(state).flag(DrawFlags::CULLED).submit();
    pool.draw().vertices(-1, 0, 3).state(state).submit();
    pool.draw().vertices(1, 0, 3).state(state).submit();

    let stats = pool.statistics();
    assert_eq!(stats.totals.submitted, 3);
    assert_eq!(stats.totals.accepted, 1);
    assert_eq!(stats.totals.rejected_for(RejectReason::Culled), 1);
    assert_eq!(stats.totals.rejected_for(RejectReason::NegativeBuffer), 1);
}
