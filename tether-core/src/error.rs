//! Error types for Tether

use thiserror::Error;

/// Tether error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Memory or table allocation failed
    #[error("Allocation failed: {what}")]
    AllocationFailure {
        /// What could not be allocated
        what: String,
    },

    /// A subsystem init hook failed; the operation was rolled back
    #[error("Subsystem {subsystem} failed to initialize: {message}")]
    InitFailure {
        /// Name of the failing subsystem
        subsystem: String,
        /// Error message
        message: String,
    },

    /// Lookup miss
    #[error("Not found: {what}")]
    NotFound {
        /// What was looked up
        what: String,
    },

    /// Entry already present
    #[error("Already exists: {what}")]
    AlreadyExists {
        /// What collided
        what: String,
    },

    /// Id requested is taken or the id space is exhausted
    #[error("No space: {what}")]
    NoSpace {
        /// What ran out
        what: String,
    },

    /// Permission denied
    #[error("Permission denied: {operation}")]
    PermissionDenied {
        /// Operation that was denied
        operation: String,
    },

    /// Invalid argument or malformed request
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Error message
        message: String,
    },

    /// A lifecycle task panicked or was aborted
    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl Error {
    /// Shorthand for [`Error::NotFound`]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Shorthand for [`Error::AlreadyExists`]
    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists { what: what.into() }
    }

    /// Shorthand for [`Error::NoSpace`]
    pub fn no_space(what: impl Into<String>) -> Self {
        Self::NoSpace { what: what.into() }
    }

    /// Shorthand for [`Error::InvalidArgument`]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Shorthand for [`Error::PermissionDenied`]
    pub fn denied(operation: impl Into<String>) -> Self {
        Self::PermissionDenied {
            operation: operation.into(),
        }
    }

    /// Wrap the error returned by a subsystem's init hook.
    ///
    /// An error that already is an [`Error::InitFailure`] is passed through
    /// so nested subsystems keep the innermost name.
    #[must_use]
    pub fn init_failure(subsystem: &str, source: Self) -> Self {
        match source {
            Self::InitFailure { .. } => source,
            other => Self::InitFailure {
                subsystem: subsystem.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Short stable name of the variant, used as a structured log field
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AllocationFailure { .. } => "allocation_failure",
            Self::InitFailure { .. } => "init_failure",
            Self::NotFound { .. } => "not_found",
            Self::AlreadyExists { .. } => "already_exists",
            Self::NoSpace { .. } => "no_space",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::InvalidArgument { .. } => "invalid_argument",
            Self::TaskJoin(_) => "task_join",
        }
    }
}


/// Result type alias for Tether operations
pub type Result<T> = std::result::Result<T, Error>;
