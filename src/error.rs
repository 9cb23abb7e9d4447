use thiserror::Error;

/// Error taxonomy shared by every component. Only `Transient` is retried;
/// the per-component retry cadences live with the clients themselves.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("config error: {0}")]
    Config(String),

    /// Timeouts, connection failures, 5xx responses. Retried per component
    /// policy, surfaced as a generic user error on exhaustion.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Unexpected response shape (e.g. embedding count mismatch). Never
    /// retried.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Unique-constraint violation. Absorbed on message capture, expected
    /// on digest upsert.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A row-targeted update matched zero rows.
    #[error("not found: {0}")]
    NotFound(String),

    /// Array-length mismatches, unknown tier names. Fatal for the operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("store error: {0}")]
    Store(String),
}

impl CoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::Transient(_))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retryable() {
        assert!(CoreError::Transient("timeout".into()).is_transient());
        assert!(!CoreError::Protocol("short batch".into()).is_transient());
        assert!(!CoreError::Conflict("duplicate key".into()).is_transient());
        assert!(!CoreError::InvalidArgument("len mismatch".into()).is_transient());
    }
}
