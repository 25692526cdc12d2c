//! Frame rotation, retention, diagnostics and the pattern report.

mod workload;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use drawpool::{
    CostClass, CountingExecutor, DrawPool, Metric, RETAINED_FRAME_COUNT, STATIC_PATTERN_STREAK,
    Severity, StateSignature,
};

#[test]
fn test_frame_numbers_increase() {
    let pool = DrawPool::default();
    assert_eq!(pool.current_frame(), 0);
    assert_eq!(pool.begin_new_frame(), 1);
    assert_eq!(pool.begin_new_frame(), 2);
    assert_eq!(pool.current_frame(), 2);
}

#[test]
fn test_only_three_completed_frames_are_retained() {
    let pool = DrawPool::default();
    let state = StateSignature::new(0, 1, 1);
    let mut frames = Vec::new();

    for _ in 0..6 {
        pool.submit_all(workload::triangles(10, state));
        let mut exec = CountingExecutor::new();
        pool.flush(&mut exec);
        frames.push(pool.current_frame_state());
        pool.begin_new_frame();
    }

    let retained = pool.retained_frames();
    assert_eq!(retained.len(), RETAINED_FRAME_COUNT);
    let numbers: Vec<u64> = retained.iter().map(|f| f.number()).collect();
    assert_eq!(numbers, vec![3, 4, 5]);

    for frame in &frames[..3] {
        assert!(frame.is_released(), "frame {} still holds memory", frame.number());
        assert_eq!(frame.batch_count(), 0);
        assert_eq!(frame.arena_bytes_used(), 0);
    }
    for frame in &frames[3..] {
        assert!(!frame.is_released());
        assert!(frame.arena_bytes_used() > 0);
        assert!(Arc::ptr_eq(frame, &retained[(frame.number() - 3) as usize]));
    }
}

#[test]
fn test_rotation_during_submission_loses_no_draws() {
    let pool = DrawPool::default();
    let state = StateSignature::new(0, 1, 1);
    let accepted = AtomicU64::new(0);

    std::thread::scope(|scope| {
        for t in 0..4 {
            let (pool, accepted) = (&pool, &accepted);
            scope.spawn(move || {
                for i in 0..2000 {
                    if pool.draw().vertices(1, (t * 2000 + i) * 3, 3).state(state).submit() {
                        accepted.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }
        // Stay within the retention window so every frame can be inspected
        for _ in 0..RETAINED_FRAME_COUNT {
            std::thread::yield_now();
            pool.begin_new_frame();
        }
    });

    let accepted = accepted.load(Ordering::Relaxed);
    assert_eq!(accepted, 8000);

    let mut frames = pool.retained_frames();
    frames.push(pool.current_frame_state());
    let pending: usize = frames.iter().map(|f| f.pending_len()).sum();
    assert_eq!(pending as u64, accepted);
    for frame in &frames {
        assert_eq!(frame.counters().snapshot().accepted, frame.pending_len() as u64);
    }

    // Retired frames were snapshotted after their last admit
    let stats = pool.statistics();
    assert_eq!(stats.totals.accepted, accepted);
    assert_eq!(stats.totals.submitted, 8000);
}

#[test]
fn test_dedup_does_not_cross_frames() {
    let pool = DrawPool::default();
    let cmd = workload::triangles(1, StateSignature::new(0, 1, 1)).remove(0);
    assert!(pool.submit(cmd.clone()));
    pool.begin_new_frame();
    assert!(pool.submit(cmd));
}

#[test]
fn test_statistics_accumulate_across_frames() {
    let pool = DrawPool::default();
    let state = StateSignature::new(0, 1, 1);
    for _ in 0..4 {
        pool.submit_all(workload::triangles(20, state));
        let mut exec = CountingExecutor::new();
        pool.flush(&mut exec);
        pool.begin_new_frame();
    }
    pool.submit_all(workload::triangles(5, state));

    let stats = pool.statistics();
    assert_eq!(stats.frames_completed, 4);
    assert_eq!(stats.current_frame, 4);
    assert_eq!(stats.retained_frames, 3);
    assert_eq!(stats.totals.accepted, 85);
    assert_eq!(stats.totals.executed_draws, 80);
    assert_eq!(stats.totals.batches, 4);
    assert_eq!(stats.average_draws_per_frame(), 20.0);
}

#[test]
fn test_analysis_flags_heavy_frames() {
    let pool = DrawPool::default();
    let states: Vec<StateSignature> = (0..1200)
        .map(|i| StateSignature::new(0, i, 1))
        .collect();
    for (i, state) in states.into_iter().enumerate() {
        pool.draw().vertices(1, i as i32 * 3, 3).state(state).submit();
    }
    pool.optimize();

    let analysis = pool.analyze_frame();
    assert_eq!(analysis.draw_calls, 1200);
    assert_eq!(
        analysis.diagnostic(Metric::DrawCount).map(|d| d.severity),
        Some(Severity::Warning)
    );
    // 1199 shader switches at weight 8
    assert_eq!(analysis.state_changes, 1199 * 8);
    assert_eq!(analysis.worst_severity(), Some(Severity::Emergency));
}

#[test]
fn test_analysis_before_optimize_uses_pending_commands() {
    let pool = DrawPool::default();
    pool.submit_all(workload::triangles(10, StateSignature::new(0, 1, 1)));
    let analysis = pool.analyze_frame();
    assert_eq!(analysis.draw_calls, 10);
    assert_eq!(analysis.state_changes, 0);
    assert!(analysis.is_healthy());
}

#[test]
fn test_duplicate_heavy_frame_warns() {
    let pool = DrawPool::default();
    let cmd = workload::triangles(1, StateSignature::new(0, 1, 1)).remove(0);
    for _ in 0..5 {
        pool.submit(cmd.clone());
    }
    let analysis = pool.analyze_frame();
    let diagnostic = analysis.diagnostic(Metric::DuplicateRatio).unwrap();
    assert_eq!(diagnostic.severity, Severity::Warning);
    assert!((analysis.duplicate_ratio - 0.8).abs() < 1e-9);
}

#[test]
fn test_report_recommends_static_repeated_patterns() {
    let pool = DrawPool::default();
    let hud = StateSignature::new(0, 1, 1);
    let frames = STATIC_PATTERN_STREAK as usize + 5;

    for frame in 0..frames {
        // Three HUD quads every frame, same vertex buffer
        pool.submit_all(workload::triangles(3, hud));
        // A one-off draw that only appears in the first frame
        if frame == 0 {
            pool.draw()
                .vertices(5, 0, 30_000)
                .state(StateSignature::new(0, 2, 2))
                .submit();
        }
        let mut exec = CountingExecutor::new();
        pool.flush(&mut exec);
        pool.begin_new_frame();
    }

    let report = pool.generate_report();
    assert_eq!(report.indirect_candidates.len(), 1);
    let candidate = report.indirect_candidates[0];
    assert!(candidate.is_static());
    assert_eq!(candidate.occurrences, 3 * frames as u64);
    assert_eq!(report.cluster(CostClass::Tiny).patterns, 1);
    assert_eq!(report.cluster(CostClass::Large).patterns, 1);
    assert_eq!(report.top_patterns[0].vertex_sum, 30_000);

    let text = report.to_string();
    assert!(text.contains("Cost clusters"));
    assert!(text.contains("Top patterns"));
}

#[test]
fn test_expired_patterns_are_pruned() {
    let mut config = drawpool::PoolConfig::default();
    config.pattern_expiry_frames = 2;
    let pool = DrawPool::new(config).unwrap();
    pool.submit_all(workload::triangles(1, StateSignature::new(0, 1, 1)));
    assert_eq!(pool.patterns().len(), 1);

    for _ in 0..3 {
        pool.begin_new_frame();
    }
    assert!(pool.patterns().is_empty());
}
