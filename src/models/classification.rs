//! Pure error classification for retry decisions.
//!
//! The classifier maps an opaque [`SenderError`] onto a retry decision by
//! matching substrings against the rendered cause chain, in a fixed
//! precedence order. Ordering matters: the non-retryable patterns are
//! checked before the blockhash-expired patterns so that a simulation error
//! mentioning both is treated as permanent, and the blockhash patterns are
//! checked before the network error codes.

use crate::models::SenderError;

/// Distinguishable failure classes produced by [`classify_error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NonRetryable,
    BlockhashExpired,
    Network,
    RateLimited,
    ServiceUnavailable,
    NodeUnhealthy,
    Unknown,
}

/// Outcome of classifying a single error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorClassification {
    /// Whether another attempt can reasonably succeed.
    pub retryable: bool,
    /// Whether the next attempt must be re-signed with a fresh blockhash.
    pub needs_resign: bool,
    /// The matched failure class.
    pub kind: ErrorKind,
}

/// Message fragments that mark a failure as permanent.
const NON_RETRYABLE_PATTERNS: &[&str] = &[
    "insufficient funds",
    "invalid account data",
    "account not found",
    "signature verification failed",
    "transaction simulation failed at instruction",
    "program failed to complete",
    "already been processed",
];

/// Message fragments that mark an expired or unknown blockhash.
const BLOCKHASH_EXPIRED_PATTERNS: &[&str] = &[
    "blockhash not found",
    "block height exceeded",
    "transactionexpiredblockheightexceeded",
];

/// OS-level error codes surfaced by the transport layer.
const NETWORK_ERROR_CODES: &[&str] = &[
    "econnreset",
    "etimedout",
    "enotfound",
    "econnrefused",
    "eai_again",
    "epipe",
];

/// Message fragments for nodes that answer but should not be trusted.
const NODE_UNHEALTHY_PATTERNS: &[&str] = &["node is behind", "node is unhealthy", "unhealthy"];

fn matches_any(message: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|pattern| message.contains(pattern))
}

/// Classifies an error into a retry decision.
///
/// Precedence, first match wins:
/// 1. non-retryable substrings (or a typed [`SenderError::InsufficientFunds`]);
/// 2. typed or textual blockhash expiry, retryable and requiring re-signing;
/// 3. transport error codes (`ECONNRESET`, `ETIMEDOUT`, ...);
/// 4. HTTP back-pressure patterns (429 / 503);
/// 5. node behind / unhealthy;
/// 6. everything else is non-retryable with kind [`ErrorKind::Unknown`].
pub fn classify_error(error: &SenderError) -> ErrorClassification {
    let message = error.render_chain().to_lowercase();

    if matches!(error, SenderError::InsufficientFunds(_))
        || matches_any(&message, NON_RETRYABLE_PATTERNS)
    {
        return ErrorClassification {
            retryable: false,
            needs_resign: false,
            kind: ErrorKind::NonRetryable,
        };
    }

    if is_typed_blockhash_expired(error) || matches_any(&message, BLOCKHASH_EXPIRED_PATTERNS) {
        return ErrorClassification {
            retryable: true,
            needs_resign: true,
            kind: ErrorKind::BlockhashExpired,
        };
    }

    if matches_any(&message, NETWORK_ERROR_CODES) {
        return ErrorClassification {
            retryable: true,
            needs_resign: false,
            kind: ErrorKind::Network,
        };
    }

    if matches!(error, SenderError::RateLimited(_))
        || message.contains("429")
        || message.contains("too many requests")
    {
        return ErrorClassification {
            retryable: true,
            needs_resign: false,
            kind: ErrorKind::RateLimited,
        };
    }

    if message.contains("503") || message.contains("service unavailable") {
        return ErrorClassification {
            retryable: true,
            needs_resign: false,
            kind: ErrorKind::ServiceUnavailable,
        };
    }

    if matches_any(&message, NODE_UNHEALTHY_PATTERNS) {
        return ErrorClassification {
            retryable: true,
            needs_resign: matches_any(&message, BLOCKHASH_EXPIRED_PATTERNS),
            kind: ErrorKind::NodeUnhealthy,
        };
    }

    ErrorClassification {
        retryable: false,
        needs_resign: false,
        kind: ErrorKind::Unknown,
    }
}

/// Checks whether the error or any of its causes is already coded as a
/// blockhash expiry, independent of its message.
fn is_typed_blockhash_expired(error: &SenderError) -> bool {
    let mut current = Some(error);
    while let Some(err) = current {
        if matches!(err, SenderError::BlockhashExpired(_)) {
            return true;
        }
        current = err.typed_source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn classify_rpc(message: &str) -> ErrorClassification {
        classify_error(&SenderError::Rpc(message.to_string()))
    }

    #[test]
    fn test_non_retryable_patterns() {
        for message in [
            "Transfer: insufficient funds for fee",
            "failed to deserialize: invalid account data",
            "Account not found",
            "signature verification failed",
            "Program failed to complete: exceeded budget",
            "transaction has already been processed",
        ] {
            let classification = classify_rpc(message);
            assert!(!classification.retryable, "expected permanent: {message}");
            assert_eq!(classification.kind, ErrorKind::NonRetryable);
        }
    }

    #[test]
    fn test_typed_blockhash_expiry_is_retryable_and_resigns() {
        let err = SenderError::BlockhashExpired("height 1000 exceeded".to_string());
        let classification = classify_error(&err);
        assert!(classification.retryable);
        assert!(classification.needs_resign);
        assert_eq!(classification.kind, ErrorKind::BlockhashExpired);
    }

    #[test]
    fn test_textual_blockhash_expiry() {
        for message in [
            "Blockhash not found",
            "block height exceeded last valid height",
            "TransactionExpiredBlockheightExceeded: signature expired",
        ] {
            let classification = classify_rpc(message);
            assert!(classification.retryable, "expected retryable: {message}");
            assert!(classification.needs_resign);
        }
    }

    #[test]
    fn test_simulation_error_mentioning_blockhash_is_permanent() {
        // The non-retryable check runs before the blockhash check, so a
        // simulation failure that also mentions the blockhash stays fatal.
        let classification = classify_rpc(
            "Transaction simulation failed at instruction 2: blockhash not found",
        );
        assert!(!classification.retryable);
        assert_eq!(classification.kind, ErrorKind::NonRetryable);
    }

    #[test]
    fn test_network_error_codes() {
        for code in ["ECONNRESET", "ETIMEDOUT", "ENOTFOUND", "ECONNREFUSED", "EPIPE"] {
            let classification = classify_rpc(&format!("fetch failed: {code}"));
            assert!(classification.retryable, "expected retryable: {code}");
            assert_eq!(classification.kind, ErrorKind::Network);
        }
    }

    #[test]
    fn test_blockhash_beats_network_codes() {
        // Rule ordering: a message carrying both an expiry marker and a
        // transport code must re-sign, not just retry.
        let classification = classify_rpc("ETIMEDOUT while confirming: block height exceeded");
        assert_eq!(classification.kind, ErrorKind::BlockhashExpired);
        assert!(classification.needs_resign);
    }

    #[test]
    fn test_http_back_pressure() {
        let classification = classify_rpc("HTTP 429 Too Many Requests");
        assert!(classification.retryable);
        assert_eq!(classification.kind, ErrorKind::RateLimited);

        let classification = classify_rpc("HTTP 503 Service Unavailable");
        assert!(classification.retryable);
        assert_eq!(classification.kind, ErrorKind::ServiceUnavailable);

        let classification =
            classify_error(&SenderError::RateLimited("provider quota".to_string()));
        assert_eq!(classification.kind, ErrorKind::RateLimited);
    }

    #[test]
    fn test_node_unhealthy_is_retryable() {
        let classification = classify_rpc("RPC node is behind by 120 slots");
        assert!(classification.retryable);
        assert!(!classification.needs_resign);
        assert_eq!(classification.kind, ErrorKind::NodeUnhealthy);
    }

    #[test]
    fn test_unknown_defaults_to_permanent() {
        let classification = classify_rpc("some entirely novel failure");
        assert!(!classification.retryable);
        assert_eq!(classification.kind, ErrorKind::Unknown);
    }

    #[test]
    fn test_pattern_buried_in_cause_chain() {
        let leaf = SenderError::Rpc("HTTP 429 Too Many Requests".to_string());
        let top = SenderError::BlockhashFetchFailed {
            source: Arc::new(leaf),
        };
        let classification = classify_error(&top);
        assert!(classification.retryable);
        assert_eq!(classification.kind, ErrorKind::RateLimited);
    }

    #[test]
    fn test_typed_insufficient_funds() {
        let classification =
            classify_error(&SenderError::InsufficientFunds("1000 lamports".to_string()));
        assert!(!classification.retryable);
        assert_eq!(classification.kind, ErrorKind::NonRetryable);
    }
}
