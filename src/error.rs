//! Error types for the Crossflow engine

use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Rate limited by upstream provider")]
    RateLimited,

    #[error("No route available for this pair")]
    NoRoute,

    #[error("Amount too small to quote")]
    AmountTooSmall,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Chain {chain_id} not found")]
    ChainNotFound { chain_id: u64 },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::RateLimited | EngineError::Network(_) | EngineError::Timeout { .. }
        )
    }

    /// Short, non-technical message for display. The full error text goes
    /// to the logs, never to the user.
    pub fn user_message(&self) -> &'static str {
        match self {
            EngineError::RateLimited => "Too many requests, retrying shortly",
            EngineError::NoRoute => "No route found for this pair",
            EngineError::AmountTooSmall => "Amount is too small for this route",
            EngineError::Network(_) | EngineError::Timeout { .. } => {
                "Network issue, please try again"
            }
            EngineError::Wallet(_) => "Transaction was not signed",
            EngineError::Transaction(_) => "Transaction failed",
            _ => "Something went wrong, please try again",
        }
    }
}

/// Classify raw provider error text into the closed engine taxonomy.
///
/// Upstream aggregators only give us free text, so this is the single
/// substring-matching seam in the codebase. Extend the table here, nowhere
/// else.
pub fn classify_provider_error(text: &str) -> EngineError {
    let lower = text.to_ascii_lowercase();

    if lower.contains("rate limit")
        || lower.contains("rate-limit")
        || lower.contains("too many requests")
        || lower.contains("429")
    {
        EngineError::RateLimited
    } else if lower.contains("no route")
        || lower.contains("no quotes")
        || lower.contains("insufficient liquidity")
    {
        EngineError::NoRoute
    } else if lower.contains("amount too small")
        || lower.contains("amount is too small")
        || lower.contains("min amount")
    {
        EngineError::AmountTooSmall
    } else if lower.contains("network")
        || lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("connection")
        || lower.contains("fetch failed")
    {
        EngineError::Network(text.to_string())
    } else {
        EngineError::Provider(text.to_string())
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_rate_limit_variants() {
        assert!(matches!(
            classify_provider_error("429 Too Many Requests"),
            EngineError::RateLimited
        ));
        assert!(matches!(
            classify_provider_error("upstream rate limit exceeded"),
            EngineError::RateLimited
        ));
    }

    #[test]
    fn classifies_terminal_categories() {
        assert!(matches!(
            classify_provider_error("No route found for pair"),
            EngineError::NoRoute
        ));
        assert!(matches!(
            classify_provider_error("amount too small for bridge"),
            EngineError::AmountTooSmall
        ));
    }

    #[test]
    fn classifies_network_and_unknown() {
        assert!(matches!(
            classify_provider_error("connection reset by peer"),
            EngineError::Network(_)
        ));
        assert!(matches!(
            classify_provider_error("weird upstream response"),
            EngineError::Provider(_)
        ));
    }

    #[test]
    fn retryable_matches_taxonomy() {
        assert!(EngineError::RateLimited.is_retryable());
        assert!(EngineError::Network("x".into()).is_retryable());
        assert!(!EngineError::NoRoute.is_retryable());
        assert!(!EngineError::AmountTooSmall.is_retryable());
    }
}
