use thiserror::Error;

/// Errors that can occur when configuring or operating a [`Pool`][crate::Pool].
///
/// Races between threads competing for the same slot are never reported as errors - they are
/// resolved inside the pool by trying again. Only boundary conditions reach the caller.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// No slot could be obtained and the pool is not allowed to grow any further.
    ///
    /// This is recoverable - the caller may retry later, queue the work or fail the request
    /// that needed the slot.
    #[error("pool exhausted: all {capacity} slots are checked out and the pool cannot expand")]
    PoolExhausted {
        /// The capacity of the pool at the time of the failed acquisition.
        capacity: usize,
    },

    /// The pool configuration was rejected when the pool was built.
    #[error("invalid pool configuration: {problem}")]
    InvalidConfiguration {
        /// A human-readable description of the problem.
        problem: String,
    },

    /// A slot was released while it was already free.
    ///
    /// This indicates that the caller released the same raw handle more than once.
    #[error("slot {index} was released but it is not checked out")]
    DoubleRelease {
        /// The index of the slot that was already free.
        index: usize,
    },

    /// A handle was returned to a pool that did not issue it.
    #[error("slot {index} does not belong to this pool")]
    UnknownHandle {
        /// The slot index carried by the handle.
        index: usize,
    },

    /// Backing storage for additional slots could not be allocated.
    ///
    /// The pool is left exactly as it was before the expansion was attempted.
    #[error("failed to expand pool from {from} to {to} slots: {reason}")]
    ExpansionFailure {
        /// The capacity before the expansion attempt.
        from: usize,

        /// The capacity the expansion attempted to reach.
        to: usize,

        /// A human-readable description of what failed.
        reason: String,
    },
}

/// A specialized `Result` type for pool operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;

pub(crate) fn invalid_configuration(problem: impl Into<String>) -> Error {
    Error::InvalidConfiguration {
        problem: problem.into(),
    }
}
