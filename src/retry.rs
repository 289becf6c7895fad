//! Transient-failure classification.
//!
//! A table over structured [`ErrorKind`]s decides retryability; a pattern
//! scan over the message text recovers a kind when the transport could not
//! categorize the failure itself.

use crate::transport::ErrorKind;

/// Whether a failure of this kind is worth re-attempting.
///
/// Covers timeouts, connection resets and refusals, DNS failures, socket
/// hang-ups, rate limiting, and 5xx-class server errors. Everything else
/// is terminal.
pub fn is_retryable(kind: ErrorKind) -> bool {
    match kind {
        ErrorKind::Timeout
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionRefused
        | ErrorKind::Dns
        | ErrorKind::SocketHangUp
        | ErrorKind::RateLimited
        | ErrorKind::ServerError => true,
        ErrorKind::NotConnected | ErrorKind::Rejected | ErrorKind::Other => false,
    }
}

/// Patterns mapped to structured kinds, checked in order against the
/// lowercased message.
const MESSAGE_PATTERNS: &[(&str, ErrorKind)] = &[
    ("timed out", ErrorKind::Timeout),
    ("timeout", ErrorKind::Timeout),
    ("etimedout", ErrorKind::Timeout),
    ("econnreset", ErrorKind::ConnectionReset),
    ("connection reset", ErrorKind::ConnectionReset),
    ("econnrefused", ErrorKind::ConnectionRefused),
    ("connection refused", ErrorKind::ConnectionRefused),
    ("enotfound", ErrorKind::Dns),
    ("eai_again", ErrorKind::Dns),
    ("getaddrinfo", ErrorKind::Dns),
    ("socket hang up", ErrorKind::SocketHangUp),
    ("rate limit", ErrorKind::RateLimited),
    ("rate-limit", ErrorKind::RateLimited),
    ("too many requests", ErrorKind::RateLimited),
    ("429", ErrorKind::RateLimited),
    ("500", ErrorKind::ServerError),
    ("502", ErrorKind::ServerError),
    ("503", ErrorKind::ServerError),
];

/// Recover a structured kind from a free-form failure message.
pub fn classify_message(message: &str) -> ErrorKind {
    let lowered = message.to_lowercase();
    for (pattern, kind) in MESSAGE_PATTERNS {
        if lowered.contains(pattern) {
            return *kind;
        }
    }
    ErrorKind::Other
}

/// Convenience predicate over raw message text.
pub fn is_retryable_message(message: &str) -> bool {
    is_retryable(classify_message(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_conditions() {
        for message in [
            "Request timed out after 30s",
            "read ECONNRESET",
            "connect ECONNREFUSED 10.0.0.1:443",
            "getaddrinfo ENOTFOUND web.example.com",
            "socket hang up",
            "Rate limit exceeded, slow down",
            "HTTP 502 Bad Gateway",
            "server responded with 503",
        ] {
            assert!(is_retryable_message(message), "expected retryable: {message}");
        }
    }

    #[test]
    fn terminal_conditions() {
        for message in [
            "Invalid phone number: too short",
            "Media file not found",
            "message rejected by server",
            "unknown recipient",
            "HTTP 403 Forbidden",
        ] {
            assert!(!is_retryable_message(message), "expected terminal: {message}");
        }
    }

    #[test]
    fn classification_is_case_insensitive() {
        assert_eq!(classify_message("SOCKET HANG UP"), ErrorKind::SocketHangUp);
        assert_eq!(classify_message("Timeout waiting for ack"), ErrorKind::Timeout);
    }

    #[test]
    fn structured_kinds_bypass_message_scan() {
        assert!(is_retryable(ErrorKind::RateLimited));
        assert!(!is_retryable(ErrorKind::Rejected));
        assert!(!is_retryable(ErrorKind::NotConnected));
    }
}
