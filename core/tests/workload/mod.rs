//! Seeded synthetic draw workloads shared by the integration tests

#![allow(dead_code)]

use drawpool::{
    BatchView, BlendMode, DrawCommand, DrawExecutor, IndexType, StateSignature,
};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

pub fn rng(seed: u64) -> Pcg64 {
    Pcg64::seed_from_u64(seed)
}

/// `count` distinct signatures; every fifth one alpha blended
pub fn states(count: usize) -> Vec<StateSignature> {
    (0..count)
        .map(|i| {
            let state = StateSignature::new((i % 2) as u32, (i % 7) as u32, (i % 5) as u32)
                .with_textures(i as u64);
            if i % 5 == 4 {
                state.with_blend_mode(BlendMode::AlphaBlend)
            } else {
                state
            }
        })
        .collect()
}

/// `count` unique draws spread over `states` in random order
pub fn random_draws(rng: &mut Pcg64, count: usize, states: &[StateSignature]) -> Vec<DrawCommand> {
    (0..count)
        .map(|i| {
            let state = states[rng.random_range(0..states.len())];
            let triangles = rng.random_range(1..100);
            let builder = DrawCommand::builder()
                .vertices(rng.random_range(1..4), i as i32 * 300, triangles * 3)
                .state(state)
                .depth(rng.random::<f32>());
            if rng.random_bool(0.5) {
                builder
                    .indexed(9, IndexType::U16, i as i32 * 300, triangles * 3)
                    .build(0)
            } else {
                builder.build(0)
            }
        })
        .collect()
}

/// Compatible non-indexed triangles on one state
pub fn triangles(count: usize, state: StateSignature) -> Vec<DrawCommand> {
    (0..count)
        .map(|i| {
            DrawCommand::builder()
                .vertices(1, i as i32 * 3, 3)
                .state(state)
                .build(0)
        })
        .collect()
}

/// Executor that fails every batch drawn with `failing_shader`
#[derive(Default)]
pub struct FlakyExecutor {
    pub failing_shader: u32,
    pub bound_shader: Option<u32>,
    pub executed: Vec<u32>,
}

impl DrawExecutor for FlakyExecutor {
    fn bind_state(&mut self, state: &StateSignature) -> anyhow::Result<()> {
        self.bound_shader = Some(state.shader());
        Ok(())
    }

    fn execute_batch(&mut self, batch: &BatchView<'_>, _use_indirect: bool) -> anyhow::Result<u32> {
        if batch.state().shader() == self.failing_shader {
            anyhow::bail!("device lost while drawing batch {}", batch.id());
        }
        self.executed.push(batch.id());
        Ok(batch.len() as u32)
    }
}
