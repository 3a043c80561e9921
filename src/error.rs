use thiserror::Error;

#[derive(Error, Debug)]
pub enum RouterError {
    /// Dump store invariant violation (corrupt record, broken index).
    /// The only failure `route()` surfaces to callers.
    #[error("Dump store error: {0}")]
    DumpStore(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Completion(#[from] CompletionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RouterError>;

/// Why the completion service refused a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    Auth,
    Quota,
    RateLimit,
    Other,
}

impl std::fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionKind::Auth => write!(f, "authentication"),
            RejectionKind::Quota => write!(f, "quota"),
            RejectionKind::RateLimit => write!(f, "rate limit"),
            RejectionKind::Other => write!(f, "request rejected"),
        }
    }
}

/// Transport-level failures talking to the external completion service.
///
/// None of these reach the caller of `route()`; the fallback responder
/// releases its reservation and answers with placeholder rows instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompletionError {
    #[error("Completion service unavailable: {0}")]
    Unavailable(String),

    #[error("Completion service rejected request ({kind}, HTTP {status})")]
    Rejected { status: u16, kind: RejectionKind },

    #[error("Completion call timed out after {0} ms")]
    Timeout(u64),

    #[error("Malformed completion response: {0}")]
    Malformed(String),
}

impl CompletionError {
    /// Short label for metrics and logs
    pub fn class(&self) -> &'static str {
        match self {
            CompletionError::Unavailable(_) => "unavailable",
            CompletionError::Rejected { kind: RejectionKind::Auth, .. } => "auth",
            CompletionError::Rejected { kind: RejectionKind::Quota, .. } => "quota",
            CompletionError::Rejected { kind: RejectionKind::RateLimit, .. } => "rate_limit",
            CompletionError::Rejected { .. } => "rejected",
            CompletionError::Timeout(_) => "timeout",
            CompletionError::Malformed(_) => "malformed",
        }
    }
}

/// Map an HTTP status from the completion service onto the error taxonomy.
/// Returns `None` for success statuses.
pub fn classify_status(status: u16) -> Option<CompletionError> {
    match status {
        200..=299 => None,
        401 | 403 => Some(CompletionError::Rejected {
            status,
            kind: RejectionKind::Auth,
        }),
        402 => Some(CompletionError::Rejected {
            status,
            kind: RejectionKind::Quota,
        }),
        429 => Some(CompletionError::Rejected {
            status,
            kind: RejectionKind::RateLimit,
        }),
        408 | 500..=599 => Some(CompletionError::Unavailable(format!("HTTP {}", status))),
        _ => Some(CompletionError::Rejected {
            status,
            kind: RejectionKind::Other,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_payment_required_as_quota() {
        assert_eq!(
            classify_status(402),
            Some(CompletionError::Rejected {
                status: 402,
                kind: RejectionKind::Quota
            })
        );
    }

    #[test]
    fn test_classify_auth_and_rate_limit() {
        assert!(matches!(
            classify_status(401),
            Some(CompletionError::Rejected { kind: RejectionKind::Auth, .. })
        ));
        assert!(matches!(
            classify_status(429),
            Some(CompletionError::Rejected { kind: RejectionKind::RateLimit, .. })
        ));
    }

    #[test]
    fn test_classify_server_errors_as_unavailable() {
        assert!(matches!(classify_status(503), Some(CompletionError::Unavailable(_))));
        assert!(matches!(classify_status(408), Some(CompletionError::Unavailable(_))));
        assert_eq!(classify_status(200), None);
    }
}
