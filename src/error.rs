use thiserror::Error;

/// Result alias for fallible core operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Error taxonomy for the translation memory core.
///
/// Conflicts between concurrent editors are intentionally absent here: a
/// conflict is a first-class state surfaced as a `ConflictDetected` event and
/// resolved by explicit user action, never an `Err`.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Invalid caller input; rejected immediately, never retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Transient storage or transport failure; safe to retry with backoff.
    #[error("transient I/O failure: {0}")]
    TransientIo(String),

    /// Failed to load previously saved unit state. The unit falls back to
    /// fresh initialization but the caller must surface this visibly.
    #[error("restoration failed: {0}")]
    RestorationFailure(String),

    /// Unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
