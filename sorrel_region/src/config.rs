//! Region subsystem configuration.
//!
//! Sizes are tunable per workload; defaults suit typical programs where
//! most regions hold a handful of objects and arenas are used for
//! bulk-allocated, drop-wholesale data.

/// Configuration for region allocation and reclamation.
///
/// # Example
///
/// ```ignore
/// use sorrel_region::RegionConfig;
///
/// // Test configuration: tiny chunks so exhaustion paths run.
/// let config = RegionConfig {
///     arena_chunk_size: 4 * 1024,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct RegionConfig {
    /// Size of each arena chunk in bytes.
    ///
    /// Objects larger than a chunk get a dedicated oversized chunk.
    /// Larger chunks mean fewer allocator round-trips; smaller chunks
    /// waste less on near-empty arenas.
    ///
    /// Default: 64KB
    pub arena_chunk_size: usize,

    /// Initial capacity of the mark phase's visited set and worklist.
    ///
    /// Purely a pre-sizing hint; both grow as needed.
    ///
    /// Default: 256
    pub mark_capacity: usize,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            arena_chunk_size: 64 * 1024,
            mark_capacity: 256,
        }
    }
}

impl RegionConfig {
    /// Configuration for memory-constrained targets.
    pub fn low_memory() -> Self {
        Self {
            arena_chunk_size: 8 * 1024,
            mark_capacity: 64,
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.arena_chunk_size < 1024 {
            return Err(ConfigError::ChunkTooSmall);
        }
        if self.arena_chunk_size % 8 != 0 {
            return Err(ConfigError::ChunkMisaligned);
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Arena chunk size is too small (minimum 1KB).
    ChunkTooSmall,
    /// Arena chunk size must be a multiple of 8.
    ChunkMisaligned,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ChunkTooSmall => write!(f, "arena chunk size must be at least 1KB"),
            ConfigError::ChunkMisaligned => {
                write!(f, "arena chunk size must be a multiple of 8")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(RegionConfig::default().validate().is_ok());
        assert!(RegionConfig::low_memory().validate().is_ok());
    }

    #[test]
    fn test_invalid_chunk_size() {
        let config = RegionConfig {
            arena_chunk_size: 100,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ChunkTooSmall));
    }
}
