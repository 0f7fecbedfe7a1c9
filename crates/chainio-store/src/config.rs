//! Store configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use chainio_common::{Error, Network, Result};

/// Default segment size cap (128 MB)
pub const DEFAULT_MAX_FILE_LENGTH: u32 = 128 * 1024 * 1024;

/// Configuration shared by both store back-ends.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding segment files and the index (must be absolute)
    pub location: PathBuf,
    /// Segment size cap in bytes (file back-end only)
    pub max_file_length: u32,
    /// Network parameters; the magic tags every record header
    pub network: Network,
    /// Use the in-memory KV engine (KV back-end only)
    pub memory: bool,
}

impl StoreConfig {
    /// Create a configuration for the given location with defaults
    pub fn new(location: impl AsRef<Path>, network: Network) -> Self {
        Self {
            location: location.as_ref().to_path_buf(),
            max_file_length: DEFAULT_MAX_FILE_LENGTH,
            network,
            memory: false,
        }
    }

    /// Set the segment size cap
    #[must_use]
    pub fn with_max_file_length(mut self, max_file_length: u32) -> Self {
        self.max_file_length = max_file_length;
        self
    }

    /// Use the in-memory KV engine
    #[must_use]
    pub fn in_memory(mut self) -> Self {
        self.memory = true;
        self
    }

    /// Validate the configuration.
    ///
    /// The location must be absolute (a memory store has no on-disk
    /// footprint and skips the check) and the segment cap positive.
    pub fn validate(&self) -> Result<()> {
        if !self.memory && !self.location.is_absolute() {
            return Err(Error::LocationNotAbsolute);
        }
        if self.max_file_length == 0 {
            return Err(Error::InvalidMaxFileLength);
        }
        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            location: PathBuf::from("/var/lib/chainio/blocks"),
            max_file_length: DEFAULT_MAX_FILE_LENGTH,
            network: Network::default(),
            memory: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_ok() {
        let config = StoreConfig::new("/data/blocks", Network::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_relative_location() {
        let config = StoreConfig::new("blocks", Network::default());
        assert!(matches!(
            config.validate().unwrap_err(),
            Error::LocationNotAbsolute
        ));

        // a memory store has no on-disk footprint
        let config = StoreConfig::new("blocks", Network::default()).in_memory();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_max_file_length() {
        let config =
            StoreConfig::new("/data/blocks", Network::default()).with_max_file_length(0);
        assert!(matches!(
            config.validate().unwrap_err(),
            Error::InvalidMaxFileLength
        ));
    }
}
