//! Host and boundary-call error types.

use std::path::PathBuf;

use crate::value::ValueKind;

/// Errors from discovering, locating and loading plugin units.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// The host environment could not be resolved, so nothing can be loaded.
    #[error("host precondition failed: {0}")]
    Precondition(String),

    /// Bare unit names carrying a versioned identity are not resolvable.
    #[error("unit locator '{0}' carries a strong identity, which is not supported")]
    StrongNameUnsupported(String),

    /// No unit file matched the locator.
    #[error("unit '{locator}' not found (searched {} locations)", searched.len())]
    UnitNotFound {
        /// The locator as given.
        locator: String,
        /// Every path that was searched.
        searched: Vec<PathBuf>,
    },

    /// The unit manifest could not be read or parsed.
    #[error("manifest parse error in {}: {message}", path.display())]
    ManifestParse {
        /// Path to the manifest file.
        path: PathBuf,
        /// Parse error message.
        message: String,
    },

    /// The unit was found but could not be loaded.
    #[error("unit load failed: {} - {message}", unit.display())]
    LoadFailed {
        /// The unit that failed to load.
        unit: PathBuf,
        /// Failure reason.
        message: String,
    },

    /// The unit is already owned by an isolation context.
    #[error("unit already loaded: {}", .0.display())]
    AlreadyLoaded(PathBuf),

    /// A directly-hosted provider could not be published.
    #[error("provider registration failed: {0}")]
    Registration(#[from] CallError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from a single call across the provider boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// The candidate does not implement the (optional) member.
    #[error("operation not supported: {0}")]
    Unsupported(String),

    /// The backing implementation reported a failure.
    #[error("{0}")]
    Failed(String),

    /// The backing implementation panicked.
    #[error("provider panicked in {member}: {message}")]
    Panicked {
        /// Member that was being invoked.
        member: String,
        /// Panic payload, if it was a string.
        message: String,
    },

    /// The arguments did not match the member's declared parameters.
    #[error("bad arguments for {member}: {message}")]
    BadArguments {
        /// Member that was being invoked.
        member: String,
        /// What was wrong.
        message: String,
    },

    /// The value returned did not have the kind the contract declares.
    #[error("{member} returned a value that is not {expected:?}")]
    BadReturn {
        /// Member that was invoked.
        member: String,
        /// Kind the contract declares.
        expected: ValueKind,
    },

    /// A consent check refused the operation before the provider ran. The
    /// refusal has already been reported to the caller.
    #[error("declined: {0}")]
    Declined(String),

    /// The isolation context that produced this provider has been unloaded.
    #[error("provider belongs to an unloaded unit")]
    Unloaded,
}

impl CallError {
    /// Shorthand for [`CallError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Whether this error only means "the member is absent".
    #[must_use]
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }
}

/// Result type for host operations.
pub type HostResult<T> = Result<T, HostError>;

/// Result type for boundary calls.
pub type CallResult<T> = Result<T, CallError>;
