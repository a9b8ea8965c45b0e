//! Error types for version and activation operations

use thiserror::Error;

use crate::version::VersionId;

/// Errors that can occur while tracking and activating firmware versions
#[derive(Error, Debug)]
pub enum UpdaterError {
    /// Image is missing the artifacts its purpose requires
    #[error("Image validation failed: {0}")]
    ValidationFailed(String),

    /// Staged artifact missing or the write service could not be started
    #[error("Write failed for version {version_id}: {reason}")]
    WriteFailed {
        /// Version whose write failed
        version_id: VersionId,
        /// Failure description
        reason: String,
    },

    /// Write service finished with a result other than `done`
    #[error("Write service {unit} signaled failure: {result}")]
    WriteServiceSignaledFailure {
        /// Service unit that reported the failure
        unit: String,
        /// Result string carried by the completion signal
        result: String,
    },

    /// Inventory anchor lookup failed
    #[error("Inventory lookup failed: {0}")]
    InventoryLookupFailed(String),

    /// Operation refused, e.g. clearing the field-mode latch
    #[error("Operation not allowed: {0}")]
    NotAllowed(String),

    /// Catalog does not contain what the operation expected
    #[error("Catalog inconsistency: {0}")]
    CatalogInconsistency(String),

    /// The running image of a redundant class cannot be removed
    #[error("Version {0} is currently running and cannot be removed")]
    FunctionalVersionProtected(VersionId),

    /// Persisted sidecar state could not be read or written
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Boot-loader environment operation failed
    #[error("Boot environment error: {0}")]
    BootEnvironment(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl UpdaterError {
    /// Check if the caller can retry or resubmit after this error
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::ValidationFailed(_) => false,
            Self::WriteFailed { .. } => true,
            Self::WriteServiceSignaledFailure { .. } => true,
            Self::InventoryLookupFailed(_) => true,
            Self::NotAllowed(_) => false,
            Self::CatalogInconsistency(_) => true,
            Self::FunctionalVersionProtected(_) => false,
            Self::Persistence(_) => true,
            Self::BootEnvironment(_) => true,
            Self::Io(_) => true,
            Self::Serialization(_) => false,
            Self::Config(_) => false,
        }
    }

    /// Create a write failure for a version
    pub fn write_failed(version_id: &VersionId, reason: impl Into<String>) -> Self {
        Self::WriteFailed {
            version_id: version_id.clone(),
            reason: reason.into(),
        }
    }

    /// Create a catalog inconsistency error
    pub fn catalog(reason: impl Into<String>) -> Self {
        Self::CatalogInconsistency(reason.into())
    }
}

impl From<serde_json::Error> for UpdaterError {
    fn from(e: serde_json::Error) -> Self {
        UpdaterError::Serialization(e.to_string())
    }
}

/// A specialized `Result` type for updater operations.
pub type UpdaterResult<T> = std::result::Result<T, UpdaterError>;
