//! Error types for SpMV host operations

use thiserror::Error;

/// Result type alias for SpMV host operations
pub type Result<T> = std::result::Result<T, SpmvError>;

/// Errors that can occur while driving the accelerator
#[derive(Debug, Error)]
pub enum SpmvError {
    /// A register or memory read/write through the transport failed
    #[error("Register I/O failed at {address:#x}: {reason}")]
    RegisterIo {
        /// Byte address of the failed access
        address: u64,
        /// Reason for failure
        reason: String,
    },

    /// Invalid configuration, rejected before touching hardware
    #[error("Invalid configuration: {reason}")]
    Configuration {
        /// What was wrong
        reason: String,
    },

    /// The optional poll cap was hit while waiting on hardware
    #[error("{phase} did not complete within {polls} poll iterations")]
    PollLimitExceeded {
        /// Run phase that stalled
        phase: &'static str,
        /// Iterations performed
        polls: u64,
    },

    /// Host-side file I/O error
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// Device output disagrees with the reference
    #[error("Verification failed: {reason}")]
    Verification {
        /// Reason for failure
        reason: String,
    },
}

impl SpmvError {
    /// Create a register I/O error
    pub fn register_io(address: u64, reason: impl Into<String>) -> Self {
        Self::RegisterIo {
            address,
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a verification error
    pub fn verification(reason: impl Into<String>) -> Self {
        Self::Verification {
            reason: reason.into(),
        }
    }

    /// Whether this error came from the transport
    pub const fn is_register_io(&self) -> bool {
        matches!(self, Self::RegisterIo { .. })
    }

    /// Whether this error was a configuration rejection
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}
