//! Error types for the draw pool
//!
//! Nothing here is fatal to the host: [`PoolError`] values are caught at the
//! top of `optimize()` and degrade the frame to unbatched execution, and
//! [`ConfigError`] only surfaces when reading configuration.

use thiserror::Error;

/// Failure inside the sort/batch pipeline
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// Frame arena cannot hold another allocation
    #[error("frame arena exhausted: requested {requested} bytes, {remaining} remaining")]
    ArenaExhausted { requested: usize, remaining: usize },

    /// Arena handle outlived the frame that issued it
    #[error("stale arena handle (index {index}, generation {generation})")]
    StaleHandle { index: u32, generation: u32 },

    /// Batch was already finalized and is immutable
    #[error("batch {0} is finalized")]
    BatchFinalized(u32),

    /// Batch reached its size bound
    #[error("batch {batch} is full ({capacity} commands)")]
    BatchFull { batch: u32, capacity: usize },

    /// Command does not share primitive/buffers/state with the batch
    #[error("command {command} is incompatible with batch {batch}")]
    IncompatibleCommand { batch: u32, command: u64 },

    /// Batch has no commands to serialize
    #[error("batch {0} is empty")]
    EmptyBatch(u32),
}

/// Configuration loading/validation failure
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}
