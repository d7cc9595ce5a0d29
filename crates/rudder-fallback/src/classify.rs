//! Backend error classification
//!
//! Maps heterogeneous provider failures onto a small set of kinds. The
//! structured fields (HTTP status, then POSIX-style code) win when the
//! caller supplies them; free-text message sniffing is the last resort.
//! The message table is an ordered list — first match wins, and the order
//! is load-bearing: a "rate limit ... timed out" message is a rate limit.

use serde::Serialize;
use strum::Display;

/// Classified backend error kind, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    RateLimit,
    QuotaExceeded,
    Timeout,
    Capability,
    InvalidResponse,
    Transient,
    Unknown,
}

/// A backend failure as reported by the transport layer
#[derive(Debug, Clone, Default)]
pub struct ErrorInfo {
    /// Human-readable error message
    pub message: String,
    /// POSIX/network-style error code, e.g. `ETIMEDOUT`
    pub code: Option<String>,
    /// HTTP status, when the failure came from an HTTP response
    pub status: Option<u16>,
}

impl ErrorInfo {
    /// Build from a bare message
    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            status: None,
        }
    }

    /// Attach an HTTP status
    #[must_use]
    pub const fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Attach a POSIX-style code
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// Ordered message-sniffing table; earlier kinds shadow later ones
const MESSAGE_TABLE: &[(ErrorKind, &[&str])] = &[
    (
        ErrorKind::RateLimit,
        &["rate limit", "rate-limit", "ratelimit", "429", "too many requests"],
    ),
    (
        ErrorKind::QuotaExceeded,
        &["quota", "billing", "credit", "payment required", "insufficient funds"],
    ),
    (ErrorKind::Timeout, &["timeout", "timed out", "deadline"]),
    (
        ErrorKind::Capability,
        &[
            "does not support",
            "not supported",
            "unsupported",
            "context length",
            "maximum context",
            "token limit",
            "too large",
        ],
    ),
    (
        ErrorKind::InvalidResponse,
        &[
            "invalid response",
            "malformed",
            "unexpected response",
            "failed to parse",
            "invalid json",
            "schema validation",
        ],
    ),
    (
        ErrorKind::Transient,
        &[
            "temporar",
            "unavailable",
            "overloaded",
            "connection",
            "network",
            "try again",
            "internal server error",
            "503",
            "502",
        ],
    ),
];

/// Classify a backend failure
pub fn classify_error(error: &ErrorInfo) -> ErrorKind {
    if let Some(status) = error.status
        && let Some(kind) = kind_for_status(status)
    {
        return kind;
    }

    if let Some(code) = &error.code
        && let Some(kind) = kind_for_code(code)
    {
        return kind;
    }

    let lower = error.message.to_lowercase();
    for (kind, needles) in MESSAGE_TABLE {
        if needles.iter().any(|n| lower.contains(n)) {
            return *kind;
        }
    }

    ErrorKind::Unknown
}

const fn kind_for_status(status: u16) -> Option<ErrorKind> {
    match status {
        429 => Some(ErrorKind::RateLimit),
        402 => Some(ErrorKind::QuotaExceeded),
        408 | 504 => Some(ErrorKind::Timeout),
        413 | 501 => Some(ErrorKind::Capability),
        422 => Some(ErrorKind::InvalidResponse),
        500 | 502 | 503 => Some(ErrorKind::Transient),
        _ => None,
    }
}

fn kind_for_code(code: &str) -> Option<ErrorKind> {
    match code.to_ascii_uppercase().as_str() {
        "ETIMEDOUT" | "ESOCKETTIMEDOUT" => Some(ErrorKind::Timeout),
        "ECONNRESET" | "ECONNREFUSED" | "EPIPE" | "ENETUNREACH" | "EHOSTUNREACH" | "EAI_AGAIN" => {
            Some(ErrorKind::Transient)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_sniffing_basics() {
        assert_eq!(
            classify_error(&ErrorInfo::from_message("429 Too Many Requests")),
            ErrorKind::RateLimit
        );
        assert_eq!(
            classify_error(&ErrorInfo::from_message("monthly quota exhausted")),
            ErrorKind::QuotaExceeded
        );
        assert_eq!(
            classify_error(&ErrorInfo::from_message("request timed out after 60s")),
            ErrorKind::Timeout
        );
        assert_eq!(
            classify_error(&ErrorInfo::from_message("model does not support structured output")),
            ErrorKind::Capability
        );
        assert_eq!(
            classify_error(&ErrorInfo::from_message("failed to parse completion body")),
            ErrorKind::InvalidResponse
        );
        assert_eq!(
            classify_error(&ErrorInfo::from_message("service temporarily unavailable")),
            ErrorKind::Transient
        );
        assert_eq!(
            classify_error(&ErrorInfo::from_message("something odd happened")),
            ErrorKind::Unknown
        );
    }

    #[test]
    fn priority_order_first_match_wins() {
        // Both "rate limit" and "timed out" present: rate limit outranks
        assert_eq!(
            classify_error(&ErrorInfo::from_message("rate limit check timed out")),
            ErrorKind::RateLimit
        );
        // "quota" outranks "unavailable"
        assert_eq!(
            classify_error(&ErrorInfo::from_message("quota service unavailable")),
            ErrorKind::QuotaExceeded
        );
    }

    #[test]
    fn status_beats_message() {
        let error = ErrorInfo::from_message("totally opaque").with_status(429);
        assert_eq!(classify_error(&error), ErrorKind::RateLimit);

        let error = ErrorInfo::from_message("rate limit mentioned but status says gateway timeout")
            .with_status(504);
        assert_eq!(classify_error(&error), ErrorKind::Timeout);
    }

    #[test]
    fn code_beats_message_but_not_status() {
        let error = ErrorInfo::from_message("opaque").with_code("ETIMEDOUT");
        assert_eq!(classify_error(&error), ErrorKind::Timeout);

        let error = ErrorInfo::from_message("opaque")
            .with_code("ECONNRESET")
            .with_status(429);
        assert_eq!(classify_error(&error), ErrorKind::RateLimit);
    }

    #[test]
    fn unrecognized_structured_fields_fall_through() {
        let error = ErrorInfo::from_message("overloaded").with_status(418).with_code("EWEIRD");
        assert_eq!(classify_error(&error), ErrorKind::Transient);
    }
}
