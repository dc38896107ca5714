//! Error types for the core.
//!
//! - `CoreError`: public, returned at every component boundary.
//! - `FailureCode` / `FailureCategory`: the closed two-level taxonomy attached
//!   to terminal job/sub-task/source failures.
//! - `classify`: maps a lower-level error message to a `FailureReason`.

use thiserror::Error;

use crate::domain::models::JobId;

/// Domain-specific errors returned by the core's public operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("sub-task not found: {0}")]
    SubTaskNotFound(String),

    #[error("invalid callback token")]
    InvalidCallbackToken,

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("adapter failure: {0:?}")]
    Adapter(FailureReason),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Closed set of failure categories. Ordering here is used only for display;
/// `classify` below owns the actual precedence between codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Timeout,
    Network,
    Service,
    Content,
    Processing,
    Job,
    Unknown,
}

/// Closed set of failure codes. Every variant maps to exactly one category
/// via `FailureCode::category`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    TimeoutJobOverall,
    TimeoutPerSource,
    TimeoutPerSubtask,
    TimeoutPolling,

    ConnectionRefused,
    ConnectionTimeout,
    DnsResolutionFailed,
    NetworkUnreachable,
    SslHandshakeFailed,

    ServiceUnavailable,
    ServiceOverloaded,
    ServiceError,

    EmptyContent,
    ParseError,
    InvalidUrl,
    BlockedByRobots,
    BlockedByCaptcha,
    ContentTooLarge,

    AnalysisFailed,
    ExtractionFailed,

    Cancelled,
    DuplicateCallback,
    InvalidCallbackToken,

    Unknown,
}

impl FailureCode {
    pub fn category(self) -> FailureCategory {
        use FailureCategory as C;
        use FailureCode::*;
        match self {
            TimeoutJobOverall | TimeoutPerSource | TimeoutPerSubtask | TimeoutPolling => {
                C::Timeout
            }
            ConnectionRefused
            | ConnectionTimeout
            | DnsResolutionFailed
            | NetworkUnreachable
            | SslHandshakeFailed => C::Network,
            ServiceUnavailable | ServiceOverloaded | ServiceError => C::Service,
            EmptyContent | ParseError | InvalidUrl | BlockedByRobots | BlockedByCaptcha
            | ContentTooLarge => C::Content,
            AnalysisFailed | ExtractionFailed => C::Processing,
            Cancelled | DuplicateCallback | InvalidCallbackToken => C::Job,
            Unknown => C::Unknown,
        }
    }

    /// Whether a sub-task that failed with this code is eligible for retry.
    pub fn is_retryable(self) -> bool {
        matches!(
            self.category(),
            FailureCategory::Network | FailureCategory::Timeout
        ) || matches!(self, FailureCode::ServiceOverloaded)
    }

    pub fn as_str(self) -> &'static str {
        use FailureCode::*;
        match self {
            TimeoutJobOverall => "timeout_job_overall",
            TimeoutPerSource => "timeout_per_source",
            TimeoutPerSubtask => "timeout_per_subtask",
            TimeoutPolling => "timeout_polling",
            ConnectionRefused => "connection_refused",
            ConnectionTimeout => "connection_timeout",
            DnsResolutionFailed => "dns_resolution_failed",
            NetworkUnreachable => "network_unreachable",
            SslHandshakeFailed => "ssl_handshake_failed",
            ServiceUnavailable => "service_unavailable",
            ServiceOverloaded => "service_overloaded",
            ServiceError => "service_error",
            EmptyContent => "empty_content",
            ParseError => "parse_error",
            InvalidUrl => "invalid_url",
            BlockedByRobots => "blocked_by_robots",
            BlockedByCaptcha => "blocked_by_captcha",
            ContentTooLarge => "content_too_large",
            AnalysisFailed => "analysis_failed",
            ExtractionFailed => "extraction_failed",
            Cancelled => "cancelled",
            DuplicateCallback => "duplicate_callback",
            InvalidCallbackToken => "invalid_callback_token",
            Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for FailureCode {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        use FailureCode::*;
        Ok(match s {
            "timeout_job_overall" => TimeoutJobOverall,
            "timeout_per_source" => TimeoutPerSource,
            "timeout_per_subtask" => TimeoutPerSubtask,
            "timeout_polling" => TimeoutPolling,
            "connection_refused" => ConnectionRefused,
            "connection_timeout" => ConnectionTimeout,
            "dns_resolution_failed" => DnsResolutionFailed,
            "network_unreachable" => NetworkUnreachable,
            "ssl_handshake_failed" => SslHandshakeFailed,
            "service_unavailable" => ServiceUnavailable,
            "service_overloaded" => ServiceOverloaded,
            "service_error" => ServiceError,
            "empty_content" => EmptyContent,
            "parse_error" => ParseError,
            "invalid_url" => InvalidUrl,
            "blocked_by_robots" => BlockedByRobots,
            "blocked_by_captcha" => BlockedByCaptcha,
            "content_too_large" => ContentTooLarge,
            "analysis_failed" => AnalysisFailed,
            "extraction_failed" => ExtractionFailed,
            "cancelled" => Cancelled,
            "duplicate_callback" => DuplicateCallback,
            "invalid_callback_token" => InvalidCallbackToken,
            _ => Unknown,
        })
    }
}

/// A code plus the category it belongs to, attached to terminal failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FailureReason {
    pub code: FailureCode,
    pub category: FailureCategory,
}

impl FailureReason {
    pub fn new(code: FailureCode) -> Self {
        Self {
            code,
            category: code.category(),
        }
    }
}

/// Infers a `FailureReason` from a lower-level error message. Patterns are
/// checked top-to-bottom; more specific patterns are listed before generic
/// ones so a message matching both resolves to the specific code.
pub fn classify(message: &str) -> FailureReason {
    let m = message.to_ascii_lowercase();

    let rules: &[(&str, FailureCode)] = &[
        ("connection refused", FailureCode::ConnectionRefused),
        ("connection timed out", FailureCode::ConnectionTimeout),
        ("timed out", FailureCode::ConnectionTimeout),
        ("dns", FailureCode::DnsResolutionFailed),
        ("name resolution", FailureCode::DnsResolutionFailed),
        ("network unreachable", FailureCode::NetworkUnreachable),
        ("ssl", FailureCode::SslHandshakeFailed),
        ("tls", FailureCode::SslHandshakeFailed),
        ("captcha", FailureCode::BlockedByCaptcha),
        ("robots", FailureCode::BlockedByRobots),
        ("empty content", FailureCode::EmptyContent),
        ("too large", FailureCode::ContentTooLarge),
        ("invalid url", FailureCode::InvalidUrl),
        ("parse", FailureCode::ParseError),
        ("overloaded", FailureCode::ServiceOverloaded),
        ("503", FailureCode::ServiceUnavailable),
        ("unavailable", FailureCode::ServiceUnavailable),
    ];

    for (pattern, code) in rules {
        if m.contains(pattern) {
            return FailureReason::new(*code);
        }
    }
    FailureReason::new(FailureCode::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_prefers_specific_pattern_over_generic() {
        let reason = classify("Connection refused while dialing");
        assert_eq!(reason.code, FailureCode::ConnectionRefused);
        assert_eq!(reason.category, FailureCategory::Network);
    }

    #[test]
    fn classify_falls_back_to_unknown() {
        let reason = classify("the gremlins ate the packet");
        assert_eq!(reason.code, FailureCode::Unknown);
        assert_eq!(reason.category, FailureCategory::Unknown);
    }

    #[test]
    fn retryable_codes() {
        assert!(FailureCode::ConnectionTimeout.is_retryable());
        assert!(FailureCode::ServiceOverloaded.is_retryable());
        assert!(!FailureCode::ParseError.is_retryable());
        assert!(!FailureCode::BlockedByCaptcha.is_retryable());
    }

    #[test]
    fn round_trips_through_as_str() {
        for code in [
            FailureCode::TimeoutJobOverall,
            FailureCode::ServiceOverloaded,
            FailureCode::BlockedByCaptcha,
            FailureCode::DuplicateCallback,
        ] {
            let parsed: FailureCode = code.as_str().parse().unwrap();
            assert_eq!(parsed, code);
        }
    }
}
