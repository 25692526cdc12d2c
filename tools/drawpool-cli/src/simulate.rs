//! Simulate command - run a synthetic scene through the pool
//!
//! The scene is generated once from the seed: `--draws` objects spread over
//! `--states` render states, every sixth state alpha blended. Each frame
//! submits every object in a fresh random order plus some exact repeats, then
//! optimizes, flushes to a counting executor and rotates the frame.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result, ensure};
use clap::Args;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

use drawpool::{
    BlendMode, CountingExecutor, DepthFunc, DrawCommand, DrawPool, IndexType, PoolConfig,
    StateSignature,
};

/// Arguments for the simulate command
#[derive(Args)]
pub struct SimulateArgs {
    /// Number of frames to run
    #[arg(long, default_value_t = 120)]
    pub frames: u64,

    /// Scene objects submitted per frame
    #[arg(long, default_value_t = 2000)]
    pub draws: usize,

    /// Distinct render states in the scene
    #[arg(long, default_value_t = 64)]
    pub states: usize,

    /// Workload seed
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Extra exact repeats per frame, as a fraction of --draws
    #[arg(long, default_value_t = 0.05)]
    pub duplicate_ratio: f64,

    /// Start with emergency batching enabled
    #[arg(long)]
    pub emergency: bool,

    /// Pool configuration (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

fn scene_states(rng: &mut Pcg64, count: usize) -> Vec<StateSignature> {
    (0..count)
        .map(|i| {
            let state = StateSignature::new(
                rng.random_range(0..2),
                rng.random_range(0..16),
                rng.random_range(0..32),
            )
            .with_textures(rng.random())
            .with_uniforms(i as u64);
            if i % 6 == 5 {
                state
                    .with_blend_mode(BlendMode::AlphaBlend)
                    .with_depth(true, false, DepthFunc::Less)
            } else {
                state
            }
        })
        .collect()
}

fn scene_objects(rng: &mut Pcg64, count: usize, states: &[StateSignature]) -> Vec<DrawCommand> {
    (0..count)
        .map(|i| {
            let state = states[rng.random_range(0..states.len())];
            let triangles = rng.random_range(2..2000);
            // Disjoint ranges per object, kept within i32
            let first = (i % 300_000) as i32 * 6000;
            let builder = DrawCommand::builder()
                .vertices(rng.random_range(1..8), first, triangles * 3)
                .state(state)
                .depth(rng.random::<f32>());
            if rng.random_bool(0.6) {
                builder
                    .indexed(rng.random_range(1..4), IndexType::U16, first, triangles * 3)
                    .build(0)
            } else {
                builder.build(0)
            }
        })
        .collect()
}

/// Execute the simulate command
pub fn execute(args: SimulateArgs) -> Result<()> {
    ensure!(args.states > 0, "--states must be at least 1");
    ensure!(
        (0.0..=1.0).contains(&args.duplicate_ratio),
        "--duplicate-ratio must be within 0.0-1.0"
    );

    let config = match &args.config {
        Some(path) => PoolConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PoolConfig::default(),
    };
    let pool = DrawPool::new(config)?;
    if args.emergency {
        pool.emergency_batch();
    }

    let mut rng = Pcg64::seed_from_u64(args.seed);
    let states = scene_states(&mut rng, args.states);
    let mut scene = scene_objects(&mut rng, args.draws, &states);
    let repeats = (args.draws as f64 * args.duplicate_ratio).round() as usize;

    println!(
        "Simulating {} frames: {} draws over {} states, {} repeats/frame, seed {}",
        args.frames, args.draws, args.states, repeats, args.seed
    );

    let mut executor = CountingExecutor::new();
    let started = Instant::now();
    for _ in 0..args.frames {
        scene.shuffle(&mut rng);
        pool.submit_all(scene.iter().cloned());
        for _ in 0..repeats.min(scene.len()) {
            let index = rng.random_range(0..scene.len());
            pool.submit(scene[index].clone());
        }

        pool.optimize();
        executor.reset();
        pool.flush(&mut executor);

        let analysis = pool.analyze_frame();
        println!(
            "{} | {} binds, {} batches ({} indirect)",
            analysis, executor.binds, executor.batches, executor.indirect_batches
        );
        pool.begin_new_frame();
    }
    let elapsed = started.elapsed();

    println!();
    println!(
        "Ran {} frames in {:.2?} ({:.1} us/frame)",
        args.frames,
        elapsed,
        elapsed.as_secs_f64() * 1e6 / args.frames.max(1) as f64
    );
    println!();
    println!("{}", pool.generate_report());
    Ok(())
}
