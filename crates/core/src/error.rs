//! Error taxonomy for exchange-bound calls.
//!
//! Errors fall into three classes that drive the engine's reaction:
//! - transient (rate limit, timeout, network, 5xx): retried with bounded backoff
//! - permanent (bad request, insufficient funds, permission denied): surfaced at once
//! - fatal (authentication): halts new trading pending operator intervention

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExchangeError {
    /// Credentials rejected.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("request timeout: {0}")]
    Timeout(String),

    #[error("network error: {0}")]
    Network(String),

    /// Non-success HTTP status from the exchange.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("failed to parse response: {0}")]
    Parse(String),
}

impl ExchangeError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Returns true if the call may succeed when retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Network(_) => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns true if the error must halt all new trading.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }

    /// Suggested minimum delay before a retry, in milliseconds.
    #[must_use]
    pub const fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }

    /// Classifies an HTTP status into the taxonomy.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => Self::Authentication(message),
            403 => Self::PermissionDenied(message),
            429 => Self::RateLimited {
                retry_after_ms: 1_000,
            },
            400 | 422 => Self::BadRequest(message),
            _ => Self::Api { status, message },
        }
    }
}

pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors() {
        assert!(ExchangeError::RateLimited { retry_after_ms: 500 }.is_transient());
        assert!(ExchangeError::Timeout("slow".to_string()).is_transient());
        assert!(ExchangeError::Network("reset".to_string()).is_transient());
        assert!(ExchangeError::api(503, "unavailable").is_transient());
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        assert!(!ExchangeError::api(400, "bad").is_transient());
        assert!(!ExchangeError::BadRequest("qty".to_string()).is_transient());
        assert!(!ExchangeError::InsufficientFunds("margin".to_string()).is_transient());
        assert!(!ExchangeError::PermissionDenied("scope".to_string()).is_transient());
    }

    #[test]
    fn authentication_is_fatal() {
        let err = ExchangeError::Authentication("invalid key".to_string());
        assert!(err.is_fatal());
        assert!(!err.is_transient());
        assert!(!ExchangeError::Timeout("x".to_string()).is_fatal());
    }

    #[test]
    fn classifies_http_status() {
        assert!(ExchangeError::from_status(401, "nope").is_fatal());
        assert!(matches!(
            ExchangeError::from_status(403, "nope"),
            ExchangeError::PermissionDenied(_)
        ));
        assert!(ExchangeError::from_status(429, "slow down").is_transient());
        assert!(ExchangeError::from_status(502, "gateway").is_transient());
        assert!(matches!(
            ExchangeError::from_status(400, "bad"),
            ExchangeError::BadRequest(_)
        ));
    }

    #[test]
    fn display_includes_context() {
        let err = ExchangeError::api(500, "internal");
        assert!(err.to_string().contains("500"));
        assert!(err.to_string().contains("internal"));
    }
}
