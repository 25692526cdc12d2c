//! DrawPool - per-frame draw call batching
//!
//! Collects draw commands from any number of threads, drops culled, malformed
//! and exactly repeated ones, reorders the rest to minimize render state
//! changes, and packs compatible draws into batches with GPU-ready indirect
//! argument buffers. A [`DrawExecutor`] turns the batches into real API calls.
//!
//! # Architecture
//!
//! - [`DrawPool`] - Frame lifecycle, submission, optimization and flushing
//! - [`FrameState`] - One frame's commands, batches and arena
//! - [`DrawBatch`] - Compatible commands plus their serialized indirect records
//! - [`FrameArena`] - Bump storage released in one step when a frame retires
//! - [`PatternStats`] - Advisory cross-frame tracking of recurring draws
//!
//! ```no_run
//! use drawpool::{CountingExecutor, DrawPool, StateSignature};
//!
//! let pool = DrawPool::default();
//! pool.draw()
//!     .vertices(1, 0, 36)
//!     .state(StateSignature::new(0, 3, 7))
//!     .depth(0.25)
//!     .submit();
//!
//! let mut executor = CountingExecutor::new();
//! pool.flush(&mut executor);
//! pool.begin_new_frame();
//! ```

pub mod arena;
pub mod batch;
pub mod command;
pub mod config;
pub mod error;
pub mod executor;
pub mod frame;
pub mod optimize;
pub mod patterns;
pub mod perf;
pub mod pool;
pub mod report;
pub mod state;
mod sync;
pub mod validation;

pub use arena::{ArenaHandle, FrameArena};
pub use batch::{
    BatchView, DRAW_INDEXED_INDIRECT_SIZE, DRAW_INDIRECT_SIZE, DrawBatch, DrawIndexedIndirectArgs,
    DrawIndirectArgs, IndirectRecord, decode_indirect, indirect_stride,
};
pub use command::{BoundingSphere, DrawCommand, DrawCommandBuilder, DrawFlags, IndexType, PrimitiveType};
pub use config::PoolConfig;
pub use error::{ConfigError, PoolError};
pub use executor::{CountingExecutor, DrawExecutor, ExecutorCall};
pub use frame::{CounterSnapshot, FrameState, FrameSummary};
pub use patterns::{PatternRecord, PatternStats, STATIC_PATTERN_STREAK};
pub use pool::{DrawPool, PoolDraw, RETAINED_FRAME_COUNT};
pub use report::{
    CostClass, CostCluster, Diagnostic, DrawReport, FrameAnalysis, Metric, PoolStatistics, Severity,
};
pub use state::{BlendMode, CullFace, DepthFunc, PolygonMode, StateSignature};
pub use validation::RejectReason;
