//! # World Configuration
//!
//! Storage tuning knobs, loaded once when a world is built.
//!
//! ```toml
//! chunk_size = 16384
//! max_cached_chunks = 4
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EcsError, EcsResult};

/// Default chunk size in bytes (16 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// Default number of emptied chunks kept per store for reuse.
pub const DEFAULT_MAX_CACHED_CHUNKS: usize = 4;

/// Storage configuration shared by every archetype memory of a world.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorldConfig {
    /// Bytes per chunk of trivial component columns.
    pub chunk_size: usize,
    /// Upper bound on emptied chunks cached by one chunked store.
    pub max_cached_chunks: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_cached_chunks: DEFAULT_MAX_CACHED_CHUNKS,
        }
    }
}

impl WorldConfig {
    /// Parses a configuration from TOML text and validates it.
    ///
    /// Missing keys take their default values.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidConfig`] on malformed TOML, unknown keys,
    /// or values rejected by [`WorldConfig::validate`].
    pub fn from_toml_str(text: &str) -> EcsResult<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| EcsError::InvalidConfig(format!("failed to parse world config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidConfig`] if the file cannot be read or parsed.
    pub fn from_toml_file(path: impl AsRef<Path>) -> EcsResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            EcsError::InvalidConfig(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Checks the values for consistency.
    ///
    /// Whether a chunk can hold a row depends on the archetype, so that check
    /// happens when each store is built ([`EcsError::ChunkTooSmall`]).
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidConfig`] if `chunk_size` is zero.
    pub fn validate(&self) -> EcsResult<()> {
        if self.chunk_size == 0 {
            return Err(EcsError::InvalidConfig("chunk_size must be greater than zero".into()));
        }
        Ok(())
    }
}
