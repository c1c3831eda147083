//! Failure classification
//!
//! Maps raw failure signals from the bootstrap and channel layers onto
//! a fixed taxonomy for the aggregated report. Classification is
//! substring matching on the error's display text, checked in a fixed
//! priority order; the first match wins.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where in the session lifecycle the failure surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// During channel establishment, before any message exchange
    Handshake,
    /// The remote closed an established channel
    Closed,
    /// Anything else (send/receive/transport errors)
    Other,
}

/// Raw failure signal: the lifecycle phase plus the error's text
#[derive(Debug, Clone)]
pub struct FailureSignal {
    pub kind: FailureKind,
    pub message: String,
}

impl FailureSignal {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Terminal error taxonomy for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    #[serde(rename = "502_bad_gateway")]
    BadGateway502,
    #[serde(rename = "503_service_unavailable")]
    ServiceUnavailable503,
    #[serde(rename = "504_gateway_timeout")]
    GatewayTimeout504,
    HandshakeError,
    ConnectionClosed,
    ConnectionTimeout,
    ConnectionRefused,
    TlsError,
    SetupFailed,
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::BadGateway502 => "502_bad_gateway",
            ErrorCategory::ServiceUnavailable503 => "503_service_unavailable",
            ErrorCategory::GatewayTimeout504 => "504_gateway_timeout",
            ErrorCategory::HandshakeError => "handshake_error",
            ErrorCategory::ConnectionClosed => "connection_closed",
            ErrorCategory::ConnectionTimeout => "connection_timeout",
            ErrorCategory::ConnectionRefused => "connection_refused",
            ErrorCategory::TlsError => "tls_error",
            ErrorCategory::SetupFailed => "setup_failed",
            ErrorCategory::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Classify a raw failure signal into the taxonomy.
///
/// Gateway status codes outrank everything else so that a 502 on the
/// WebSocket handshake counts as capacity exhaustion rather than a
/// generic handshake failure.
pub fn classify(signal: &FailureSignal) -> ErrorCategory {
    let message = &signal.message;
    let lowered = message.to_lowercase();

    if message.contains("502") || message.contains("Bad Gateway") {
        return ErrorCategory::BadGateway502;
    }
    if message.contains("503") || message.contains("Service Unavailable") {
        return ErrorCategory::ServiceUnavailable503;
    }
    if message.contains("504") || message.contains("Gateway Timeout") {
        return ErrorCategory::GatewayTimeout504;
    }

    match signal.kind {
        FailureKind::Handshake => ErrorCategory::HandshakeError,
        FailureKind::Closed => ErrorCategory::ConnectionClosed,
        FailureKind::Other => {
            if lowered.contains("timeout") || lowered.contains("timed out") {
                ErrorCategory::ConnectionTimeout
            } else if lowered.contains("connection") && lowered.contains("refused") {
                ErrorCategory::ConnectionRefused
            } else if lowered.contains("ssl")
                || lowered.contains("tls")
                || lowered.contains("certificate")
            {
                ErrorCategory::TlsError
            } else {
                ErrorCategory::Unknown
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn other(message: &str) -> FailureSignal {
        FailureSignal::new(FailureKind::Other, message)
    }

    #[test]
    fn test_gateway_status_codes() {
        assert_eq!(
            classify(&other("HTTP error: 502 response")),
            ErrorCategory::BadGateway502
        );
        assert_eq!(
            classify(&other("server said Bad Gateway")),
            ErrorCategory::BadGateway502
        );
        assert_eq!(
            classify(&other("Service Unavailable right now")),
            ErrorCategory::ServiceUnavailable503
        );
        assert_eq!(classify(&other("got 503")), ErrorCategory::ServiceUnavailable503);
        assert_eq!(
            classify(&other("Gateway Timeout from upstream")),
            ErrorCategory::GatewayTimeout504
        );
    }

    #[test]
    fn test_status_code_outranks_kind() {
        // A 502 during handshake is capacity exhaustion, not a generic
        // handshake failure
        let signal = FailureSignal::new(FailureKind::Handshake, "handshake failed: 502");
        assert_eq!(classify(&signal), ErrorCategory::BadGateway502);
    }

    #[test]
    fn test_kind_based_categories() {
        let handshake = FailureSignal::new(FailureKind::Handshake, "invalid response");
        assert_eq!(classify(&handshake), ErrorCategory::HandshakeError);

        let closed = FailureSignal::new(FailureKind::Closed, "going away");
        assert_eq!(classify(&closed), ErrorCategory::ConnectionClosed);
    }

    #[test]
    fn test_message_sniffing_for_other_kind() {
        assert_eq!(
            classify(&other("operation timed out")),
            ErrorCategory::ConnectionTimeout
        );
        assert_eq!(
            classify(&other("Connection refused (os error 111)")),
            ErrorCategory::ConnectionRefused
        );
        assert_eq!(
            classify(&other("TLS handshake alert")),
            ErrorCategory::TlsError
        );
        assert_eq!(
            classify(&other("certificate verify failed")),
            ErrorCategory::TlsError
        );
        assert_eq!(classify(&other("something odd")), ErrorCategory::Unknown);
    }

    #[test]
    fn test_classification_independent_of_surrounding_text() {
        assert_eq!(
            classify(&other("wrapped: upstream returned 502 while connecting")),
            ErrorCategory::BadGateway502
        );
    }
}
