//! Error classification for the retry policy.
//!
//! Every dispatch error maps to an [`ErrorKind`]; the retry loop only ever
//! asks "is this retryable". The rules run in priority order: cancellation,
//! deadline, connection-level failures, structured RPC codes, substring
//! heuristics, and finally a conservative Transient default (better to
//! retry unnecessarily than to give up on a recoverable error).

use std::fmt;

use crate::dispatch::{DispatchError, RpcCode};

/// Classification of a worker error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Cannot be definitively classified.
    Unknown,
    /// Temporary; may succeed on retry.
    Transient,
    /// Will not succeed even with retries.
    Permanent,
}

impl ErrorKind {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Transient)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Transient => f.write_str("Transient"),
            ErrorKind::Permanent => f.write_str("Permanent"),
            ErrorKind::Unknown => f.write_str("Unknown"),
        }
    }
}

const TRANSIENT_PATTERNS: [&str; 11] = [
    "timeout",
    "deadline exceeded",
    "connection refused",
    "connection reset",
    "temporary failure",
    "unavailable",
    "rate limit",
    "too many requests",
    "service unavailable",
    "gateway timeout",
    "network unreachable",
];

const PERMANENT_PATTERNS: [&str; 8] = [
    "invalid",
    "validation failed",
    "not found",
    "unauthorized",
    "forbidden",
    "bad request",
    "missing",
    "malformed",
];

/// Classify a dispatch error.
pub fn classify(err: &DispatchError) -> ErrorKind {
    match err {
        // Explicit cancellation must never be retried.
        DispatchError::Cancelled => ErrorKind::Permanent,
        // A timeout might work with more time.
        DispatchError::Timeout => ErrorKind::Transient,
        DispatchError::Connection { .. } => ErrorKind::Transient,
        DispatchError::Status { code, .. } => classify_code(*code),
        DispatchError::UnknownNodeType(_) => ErrorKind::Permanent,
        DispatchError::InvalidInput(_) => ErrorKind::Permanent,
        DispatchError::CircuitOpen(_) => ErrorKind::Permanent,
        DispatchError::Other { message } => classify_message(message),
    }
}

/// Classify a structured RPC status code.
#[must_use]
pub fn classify_code(code: RpcCode) -> ErrorKind {
    match code {
        RpcCode::Unavailable
        | RpcCode::DeadlineExceeded
        | RpcCode::ResourceExhausted
        | RpcCode::Aborted
        | RpcCode::Internal
        | RpcCode::Unknown => ErrorKind::Transient,

        RpcCode::InvalidArgument
        | RpcCode::NotFound
        | RpcCode::AlreadyExists
        | RpcCode::PermissionDenied
        | RpcCode::Unauthenticated
        | RpcCode::FailedPrecondition
        | RpcCode::OutOfRange
        | RpcCode::Unimplemented => ErrorKind::Permanent,

        RpcCode::Cancelled => ErrorKind::Permanent,
    }
}

/// Substring heuristics over an unstructured error message.
#[must_use]
pub fn classify_message(message: &str) -> ErrorKind {
    let lowered = message.to_lowercase();
    for pattern in TRANSIENT_PATTERNS {
        if lowered.contains(pattern) {
            return ErrorKind::Transient;
        }
    }
    for pattern in PERMANENT_PATTERNS {
        if lowered.contains(pattern) {
            return ErrorKind::Permanent;
        }
    }
    ErrorKind::Transient
}

/// `true` when the error is classified Transient.
pub fn is_retryable(err: &DispatchError) -> bool {
    classify(err).is_retryable()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_permanent() {
        assert_eq!(classify(&DispatchError::Cancelled), ErrorKind::Permanent);
    }

    #[test]
    fn timeout_is_transient() {
        assert_eq!(classify(&DispatchError::Timeout), ErrorKind::Transient);
    }

    #[test]
    fn status_codes_follow_table() {
        for code in [
            RpcCode::Unavailable,
            RpcCode::DeadlineExceeded,
            RpcCode::ResourceExhausted,
            RpcCode::Aborted,
            RpcCode::Internal,
            RpcCode::Unknown,
        ] {
            assert_eq!(classify_code(code), ErrorKind::Transient, "{code:?}");
        }
        for code in [
            RpcCode::InvalidArgument,
            RpcCode::NotFound,
            RpcCode::AlreadyExists,
            RpcCode::PermissionDenied,
            RpcCode::Unauthenticated,
            RpcCode::FailedPrecondition,
            RpcCode::OutOfRange,
            RpcCode::Unimplemented,
            RpcCode::Cancelled,
        ] {
            assert_eq!(classify_code(code), ErrorKind::Permanent, "{code:?}");
        }
    }

    #[test]
    fn message_heuristics() {
        assert_eq!(classify_message("gateway timeout from upstream"), ErrorKind::Transient);
        assert_eq!(classify_message("429 too many requests"), ErrorKind::Transient);
        assert_eq!(classify_message("field 'query' is malformed"), ErrorKind::Permanent);
        assert_eq!(classify_message("unauthorized"), ErrorKind::Permanent);
        // Unrecognized messages default to Transient.
        assert_eq!(classify_message("segfault in worker"), ErrorKind::Transient);
    }
}
