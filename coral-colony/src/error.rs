//! The closed error taxonomy of the colony.
//!
//! Kinds are taxonomic, not transport: every fallible colony operation
//! returns one of these kinds with an optional textual cause. Human-readable
//! messages never participate in control flow, so tests match on [ErrorKind]
//! alone.

use std::fmt::Display;

/// Result alias used across the colony.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// The closed set of failure kinds a colony operation can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Asked for PSK/CA material before boot completed.
    NotInitialized,
    /// Admission failure: bad PSK, bad token, colony mismatch.
    Unauthorized,
    /// Referral ticket signature or claims problem.
    InvalidReferral,
    /// Structurally broken request.
    MalformedRequest,
    /// Unknown agent, unknown token, or no data for a query.
    NotFound,
    /// Uniqueness violation (serial collision, divergent re-register).
    Conflict,
    /// Store read/write failed transiently.
    StorageUnavailable,
    /// Deadline expiry or explicit cancellation.
    Cancelled,
    /// Invariant violation. Logged with full context, surfaced opaquely.
    Internal,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::NotInitialized => "not initialized",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::InvalidReferral => "invalid referral",
            ErrorKind::MalformedRequest => "malformed request",
            ErrorKind::NotFound => "not found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::StorageUnavailable => "storage unavailable",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal error",
        };
        write!(f, "{s}")
    }
}

/// An error with a taxonomic kind and an optional human cause.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    cause: Option<String>,
}

impl std::error::Error for Error {}

impl Error {
    /// An error carrying only a kind.
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, cause: None }
    }

    /// An error with a kind and a human-readable cause.
    pub fn with_cause(kind: ErrorKind, cause: impl ToString) -> Self {
        Self {
            kind,
            cause: Some(cause.to_string()),
        }
    }

    /// The taxonomic kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The optional human-readable cause.
    pub fn cause(&self) -> Option<&str> {
        self.cause.as_deref()
    }

    /// Shorthand for [ErrorKind::NotFound] with a cause.
    pub fn not_found(cause: impl ToString) -> Self {
        Self::with_cause(ErrorKind::NotFound, cause)
    }

    /// Shorthand for [ErrorKind::MalformedRequest] with a cause.
    pub fn malformed(cause: impl ToString) -> Self {
        Self::with_cause(ErrorKind::MalformedRequest, cause)
    }

    /// Shorthand for [ErrorKind::Internal] with a cause.
    ///
    /// The cause is for the colony's own logs; callers see the kind only.
    pub fn internal(cause: impl ToString) -> Self {
        Self::with_cause(ErrorKind::Internal, cause)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}: {cause}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

impl From<sqlx::Error> for Error {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => Error::new(ErrorKind::NotFound),
            other => Error::with_cause(ErrorKind::StorageUnavailable, other),
        }
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::new(ErrorKind::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_separate_from_message() {
        let a = Error::with_cause(ErrorKind::NotFound, "no such agent: agent-9");
        let b = Error::new(ErrorKind::NotFound);

        assert_eq!(a.kind(), b.kind());
        assert_ne!(a.to_string(), b.to_string());
    }

    #[test]
    fn sqlx_row_not_found_maps_to_not_found() {
        let err: Error = sqlx::Error::RowNotFound.into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn elapsed_maps_to_cancelled() {
        let elapsed =
            tokio::time::timeout(std::time::Duration::ZERO, std::future::pending::<()>())
                .await
                .unwrap_err();
        let err: Error = elapsed.into();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
