//! Draw pool configuration
//!
//! Every field has a serde default, so a partial TOML document (or an empty
//! one) yields a usable configuration:
//!
//! ```toml
//! max_batch_size = 128
//! depth_sort_enabled = false
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default bound on commands per batch
pub const DEFAULT_MAX_BATCH_SIZE: usize = 256;
/// Batch bound while emergency batching is active
pub const DEFAULT_EMERGENCY_MAX_BATCH_SIZE: usize = 4096;
/// Smallest batch worth an indirect submission
pub const DEFAULT_MIN_INDIRECT_BATCH_SIZE: usize = 4;
/// Frames with at least this many commands sort their groups in parallel
pub const DEFAULT_PARALLEL_SORT_THRESHOLD: usize = 1024;
/// Per-frame arena capacity (8 MiB)
pub const DEFAULT_ARENA_CAPACITY_BYTES: usize = 8 * 1024 * 1024;
/// Duplicate ratio above which `analyze_frame` warns
pub const DEFAULT_DUPLICATE_WARNING_RATIO: f64 = 0.10;
/// Patterns unseen for this many frames are forgotten
pub const DEFAULT_PATTERN_EXPIRY_FRAMES: u64 = 300;

/// Tunables of the optimization pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Reject exact duplicates within a frame (default: true)
    #[serde(default = "default_true")]
    pub dedup_enabled: bool,
    /// Sort commands by state before batching (default: true)
    #[serde(default = "default_true")]
    pub sort_enabled: bool,
    /// Merge compatible commands into batches (default: true)
    #[serde(default = "default_true")]
    pub batch_enabled: bool,
    /// Break sort ties by depth (default: true)
    #[serde(default = "default_true")]
    pub depth_sort_enabled: bool,
    /// Commands per batch (default: 256)
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Commands per batch in emergency mode (default: 4096)
    #[serde(default = "default_emergency_max_batch_size")]
    pub emergency_max_batch_size: usize,
    /// Smallest batch dispatched indirectly (default: 4)
    #[serde(default = "default_min_indirect_batch_size")]
    pub min_indirect_batch_size: usize,
    /// Command count from which opaque/blended groups sort in parallel (default: 1024)
    #[serde(default = "default_parallel_sort_threshold")]
    pub parallel_sort_threshold: usize,
    /// Bytes available to one frame's arena (default: 8 MiB)
    #[serde(default = "default_arena_capacity_bytes")]
    pub arena_capacity_bytes: usize,
    /// Duplicate ratio that triggers a warning (default: 0.10, range: 0.0-1.0)
    #[serde(default = "default_duplicate_warning_ratio")]
    pub duplicate_warning_ratio: f64,
    /// Frames after which an unseen pattern is pruned (default: 300)
    #[serde(default = "default_pattern_expiry_frames")]
    pub pattern_expiry_frames: u64,
}

fn default_true() -> bool {
    true
}
fn default_max_batch_size() -> usize {
    DEFAULT_MAX_BATCH_SIZE
}
fn default_emergency_max_batch_size() -> usize {
    DEFAULT_EMERGENCY_MAX_BATCH_SIZE
}
fn default_min_indirect_batch_size() -> usize {
    DEFAULT_MIN_INDIRECT_BATCH_SIZE
}
fn default_parallel_sort_threshold() -> usize {
    DEFAULT_PARALLEL_SORT_THRESHOLD
}
fn default_arena_capacity_bytes() -> usize {
    DEFAULT_ARENA_CAPACITY_BYTES
}
fn default_duplicate_warning_ratio() -> f64 {
    DEFAULT_DUPLICATE_WARNING_RATIO
}
fn default_pattern_expiry_frames() -> u64 {
    DEFAULT_PATTERN_EXPIRY_FRAMES
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            dedup_enabled: true,
            sort_enabled: true,
            batch_enabled: true,
            depth_sort_enabled: true,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            emergency_max_batch_size: DEFAULT_EMERGENCY_MAX_BATCH_SIZE,
            min_indirect_batch_size: DEFAULT_MIN_INDIRECT_BATCH_SIZE,
            parallel_sort_threshold: DEFAULT_PARALLEL_SORT_THRESHOLD,
            arena_capacity_bytes: DEFAULT_ARENA_CAPACITY_BYTES,
            duplicate_warning_ratio: DEFAULT_DUPLICATE_WARNING_RATIO,
            pattern_expiry_frames: DEFAULT_PATTERN_EXPIRY_FRAMES,
        }
    }
}

impl PoolConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: PoolConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&source)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "max_batch_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.emergency_max_batch_size < self.max_batch_size {
            return Err(ConfigError::Invalid {
                field: "emergency_max_batch_size",
                reason: format!(
                    "{} is below max_batch_size {}",
                    self.emergency_max_batch_size, self.max_batch_size
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.duplicate_warning_ratio) {
            return Err(ConfigError::Invalid {
                field: "duplicate_warning_ratio",
                reason: format!("{} is outside 0.0-1.0", self.duplicate_warning_ratio),
            });
        }
        if self.arena_capacity_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "arena_capacity_bytes",
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    /// Batch bound in effect
    pub fn effective_max_batch_size(&self, emergency: bool) -> usize {
        if emergency {
            self.emergency_max_batch_size
        } else {
            self.max_batch_size
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_document_yields_defaults() {
        let config = PoolConfig::from_toml_str("").unwrap();
        assert_eq!(config, PoolConfig::default());
    }

    #[test]
    fn test_partial_document_overrides_fields() {
        let config =
            PoolConfig::from_toml_str("max_batch_size = 32\ndepth_sort_enabled = false\n").unwrap();
        assert_eq!(config.max_batch_size, 32);
        assert!(!config.depth_sort_enabled);
        assert!(config.dedup_enabled);
        assert_eq!(config.emergency_max_batch_size, DEFAULT_EMERGENCY_MAX_BATCH_SIZE);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(matches!(
            PoolConfig::from_toml_str("max_batch_size = 0"),
            Err(ConfigError::Invalid {
                field: "max_batch_size",
                ..
            })
        ));
        assert!(matches!(
            PoolConfig::from_toml_str("max_batch_size = 64\nemergency_max_batch_size = 8"),
            Err(ConfigError::Invalid {
                field: "emergency_max_batch_size",
                ..
            })
        ));
        assert!(matches!(
            PoolConfig::from_toml_str("duplicate_warning_ratio = 1.5"),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            PoolConfig::from_toml_str("max_batch_size = \"big\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_round_trip_through_toml() {
        let mut config = PoolConfig::default();
        config.max_batch_size = 99;
        config.duplicate_warning_ratio = 0.25;
        let text = config.to_toml_string().unwrap();
        assert_eq!(PoolConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "batch_enabled = false").unwrap();
        let config = PoolConfig::load(file.path()).unwrap();
        assert!(!config.batch_enabled);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            PoolConfig::load(dir.path().join("missing.toml")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_effective_batch_size() {
        let config = PoolConfig::default();
        assert_eq!(config.effective_max_batch_size(false), 256);
        assert_eq!(config.effective_max_batch_size(true), 4096);
    }
}
