use serde::Deserialize;

use crate::firestore::error::{FirestoreError, FirestoreErrorCode};

#[derive(Debug, Deserialize)]
struct GoogleErrorBody {
    error: Option<GoogleError>,
}

#[derive(Debug, Deserialize)]
struct GoogleError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// Decodes a Google-style `{"error":{"status":..,"message":..}}` body.
///
/// Bodies that cannot be parsed are reported as `firestore/internal` carrying
/// the raw payload.
pub fn map_error_payload(body: &str) -> FirestoreError {
    match extract_error_payload(body) {
        Some(GoogleError {
            status: Some(status),
            message,
        }) => {
            let message = message
                .filter(|message| !message.is_empty())
                .unwrap_or_else(|| status.clone());
            map_status_code(&status, &message)
        }
        Some(GoogleError {
            status: None,
            message: Some(message),
        }) => FirestoreError::backend(FirestoreErrorCode::Internal, message),
        _ => FirestoreError::backend(
            FirestoreErrorCode::Internal,
            format!("Unrecognised backend error payload: {body}"),
        ),
    }
}

/// Maps a canonical RPC status name onto an error code.
///
/// The result is always a backend error: it is never classified as a caller
/// error or as a client-side cancellation.
pub fn map_status_code(status: &str, message: &str) -> FirestoreError {
    let code = match status {
        "INVALID_ARGUMENT" | "OUT_OF_RANGE" => FirestoreErrorCode::InvalidArgument,
        "FAILED_PRECONDITION" => FirestoreErrorCode::FailedPrecondition,
        "UNAUTHENTICATED" => FirestoreErrorCode::Unauthenticated,
        "PERMISSION_DENIED" => FirestoreErrorCode::PermissionDenied,
        "NOT_FOUND" => FirestoreErrorCode::NotFound,
        "ALREADY_EXISTS" => FirestoreErrorCode::AlreadyExists,
        "RESOURCE_EXHAUSTED" => FirestoreErrorCode::ResourceExhausted,
        "ABORTED" => FirestoreErrorCode::Aborted,
        "CANCELLED" => FirestoreErrorCode::Cancelled,
        "UNIMPLEMENTED" => FirestoreErrorCode::Unimplemented,
        "DATA_LOSS" | "UNKNOWN" | "INTERNAL" => FirestoreErrorCode::Internal,
        "UNAVAILABLE" => FirestoreErrorCode::Unavailable,
        "DEADLINE_EXCEEDED" => FirestoreErrorCode::DeadlineExceeded,
        other => {
            return FirestoreError::backend(
                FirestoreErrorCode::Internal,
                format!("Unhandled Firestore error status {other}: {message}"),
            )
        }
    };
    FirestoreError::backend(code, message)
}

fn extract_error_payload(body: &str) -> Option<GoogleError> {
    serde_json::from_str::<GoogleErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_status_and_message() {
        let err = map_error_payload(
            r#"{"error":{"code":409,"status":"ABORTED","message":"Transaction contention"}}"#,
        );
        assert_eq!(err.code_str(), "firestore/aborted");
        assert_eq!(err.message(), "Transaction contention");
    }

    #[test]
    fn falls_back_to_internal() {
        assert_eq!(map_error_payload("<html>").code_str(), "firestore/internal");
        assert_eq!(
            map_status_code("TEAPOT", "short and stout").code_str(),
            "firestore/internal"
        );
    }

    #[test]
    fn backend_statuses_are_not_caller_faults() {
        for status in ["FAILED_PRECONDITION", "INVALID_ARGUMENT", "OUT_OF_RANGE", "UNIMPLEMENTED"] {
            let err = map_status_code(status, "The query requires an index");
            assert!(err.is_backend_error(), "{status}");
            assert!(!err.is_caller_error(), "{status}");
        }
        let cancelled = map_status_code("CANCELLED", "server cancelled the call");
        assert_eq!(cancelled.code_str(), "firestore/cancelled");
        assert!(!cancelled.is_cancelled());
    }
}
