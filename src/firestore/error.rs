use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FirestoreErrorCode {
    InvalidArgument,
    MissingProjectId,
    UnsupportedPredicate,
    FailedPrecondition,
    Unimplemented,
    Internal,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    Unauthenticated,
    Unavailable,
    DeadlineExceeded,
    ResourceExhausted,
    Aborted,
    Cancelled,
}

impl FirestoreErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FirestoreErrorCode::InvalidArgument => "firestore/invalid-argument",
            FirestoreErrorCode::MissingProjectId => "firestore/missing-project-id",
            FirestoreErrorCode::UnsupportedPredicate => "firestore/unsupported-predicate",
            FirestoreErrorCode::FailedPrecondition => "firestore/failed-precondition",
            FirestoreErrorCode::Unimplemented => "firestore/unimplemented",
            FirestoreErrorCode::Internal => "firestore/internal",
            FirestoreErrorCode::NotFound => "firestore/not-found",
            FirestoreErrorCode::AlreadyExists => "firestore/already-exists",
            FirestoreErrorCode::PermissionDenied => "firestore/permission-denied",
            FirestoreErrorCode::Unauthenticated => "firestore/unauthenticated",
            FirestoreErrorCode::Unavailable => "firestore/unavailable",
            FirestoreErrorCode::DeadlineExceeded => "firestore/deadline-exceeded",
            FirestoreErrorCode::ResourceExhausted => "firestore/resource-exhausted",
            FirestoreErrorCode::Aborted => "firestore/aborted",
            FirestoreErrorCode::Cancelled => "firestore/cancelled",
        }
    }
}

/// Where an error was raised.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorOrigin {
    /// Raised by this crate before or instead of a backend call.
    Client,
    /// Reported by the backend and decoded from its response.
    Backend,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FirestoreError {
    pub code: FirestoreErrorCode,
    message: String,
    origin: ErrorOrigin,
}

impl FirestoreError {
    pub fn new(code: FirestoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            origin: ErrorOrigin::Client,
        }
    }

    /// Error decoded from a backend response.
    pub fn backend(code: FirestoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            origin: ErrorOrigin::Backend,
        }
    }

    pub fn origin(&self) -> ErrorOrigin {
        self.origin
    }

    pub fn is_backend_error(&self) -> bool {
        self.origin == ErrorOrigin::Backend
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns `true` when the error points at a bug in the calling code
    /// (malformed predicate, cursor/order mismatch, unsupported operation).
    ///
    /// These errors are raised locally before any backend round-trip and must
    /// not be retried. A backend rejection with the same code is not one.
    pub fn is_caller_error(&self) -> bool {
        self.origin == ErrorOrigin::Client
            && matches!(
                self.code,
                FirestoreErrorCode::InvalidArgument
                    | FirestoreErrorCode::MissingProjectId
                    | FirestoreErrorCode::UnsupportedPredicate
                    | FirestoreErrorCode::FailedPrecondition
                    | FirestoreErrorCode::Unimplemented
            )
    }

    /// Returns `true` when the operation stopped because its cancellation token
    /// fired. A request cancelled on the server side reports `false`.
    pub fn is_cancelled(&self) -> bool {
        self.origin == ErrorOrigin::Client && self.code == FirestoreErrorCode::Cancelled
    }
}

impl Display for FirestoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl Error for FirestoreError {}

pub type FirestoreResult<T> = Result<T, FirestoreError>;

pub fn invalid_argument(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::InvalidArgument, message)
}

pub fn missing_project_id() -> FirestoreError {
    FirestoreError::new(
        FirestoreErrorCode::MissingProjectId,
        "Firestore settings must include a project_id",
    )
}

pub fn unsupported_predicate(construct: impl Display) -> FirestoreError {
    FirestoreError::new(
        FirestoreErrorCode::UnsupportedPredicate,
        format!("Unsupported predicate construct: {construct}"),
    )
}

pub fn failed_precondition(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::FailedPrecondition, message)
}

pub fn unimplemented(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::Unimplemented, message)
}

pub fn internal_error(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::Internal, message)
}

pub fn not_found(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::NotFound, message)
}

pub fn already_exists(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::AlreadyExists, message)
}

pub fn permission_denied(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::PermissionDenied, message)
}

pub fn unauthenticated(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::Unauthenticated, message)
}

pub fn unavailable(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::Unavailable, message)
}

pub fn deadline_exceeded(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::DeadlineExceeded, message)
}

pub fn resource_exhausted(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::ResourceExhausted, message)
}

pub fn aborted(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::Aborted, message)
}

pub fn cancelled(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::Cancelled, message)
}
