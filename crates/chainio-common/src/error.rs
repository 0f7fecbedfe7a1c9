//! Error types for chainio
//!
//! One error enum covers both store back-ends. The operational failures
//! carry fixed messages because callers and tests match on the rendered
//! text as well as the variant.

use thiserror::Error;

/// Common result type for chainio operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for chainio
#[derive(Debug, Error)]
pub enum Error {
    // Configuration errors
    #[error("Location not absolute.")]
    LocationNotAbsolute,

    #[error("Invalid max file length.")]
    InvalidMaxFileLength,

    #[error("Unknown file prefix.")]
    UnknownFilePrefix,

    // Range errors
    #[error("File number too large.")]
    FileNumberTooLarge,

    #[error("record field out of range: {field}={value}")]
    RecordFieldOutOfRange { field: &'static str, value: u64 },

    #[error("record truncated: need {need} bytes, have {have}")]
    RecordTruncated { need: usize, have: usize },

    #[error("Out-of-bounds read.")]
    OutOfBoundsRead,

    // Write path errors
    #[error("Block length above max file length.")]
    BlockTooLarge,

    #[error("Already writing.")]
    AlreadyWriting,

    #[error("Could not write block magic.")]
    ShortHeaderWrite,

    #[error("Could not write block.")]
    ShortBodyWrite,

    #[error("Wrong number of bytes read.")]
    ShortRead,

    // Batch errors
    #[error("Already written.")]
    AlreadyWritten,

    // Substrate errors
    #[error("disk I/O error: {0}")]
    DiskIo(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a range error for a record field
    #[must_use]
    pub const fn field_range(field: &'static str, value: u64) -> Self {
        Self::RecordFieldOutOfRange { field, value }
    }

    /// Check if this is a configuration error
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::LocationNotAbsolute | Self::InvalidMaxFileLength | Self::UnknownFilePrefix
        )
    }

    /// Check if this is a short I/O error (fewer bytes moved than requested)
    #[must_use]
    pub fn is_short_io(&self) -> bool {
        matches!(
            self,
            Self::ShortHeaderWrite | Self::ShortBodyWrite | Self::ShortRead
        )
    }

    /// Check if this is a range violation
    #[must_use]
    pub fn is_range(&self) -> bool {
        matches!(
            self,
            Self::FileNumberTooLarge
                | Self::RecordFieldOutOfRange { .. }
                | Self::RecordTruncated { .. }
                | Self::OutOfBoundsRead
        )
    }
}
