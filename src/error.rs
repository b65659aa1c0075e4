use thiserror::Error;

/// Errors returned by cache views.
///
/// Lookup misses are never errors; they are reported as `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("{operation} is not supported")]
    UnsupportedOperation { operation: &'static str },
}

pub type Result<T, E = CacheError> = std::result::Result<T, E>;
