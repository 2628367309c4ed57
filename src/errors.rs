// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Tutka Error Types
 * Production error taxonomy with thiserror
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use std::time::Duration;
use thiserror::Error;

/// Main scanner error type
#[derive(Error, Debug)]
pub enum ScanError {
    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Template parse or compile errors
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    /// Host exceeded the error threshold and is skipped
    #[error("Host {host} skipped: {errors} tracked errors")]
    HostSkipped { host: String, errors: u32 },

    /// Configuration errors, surfaced at startup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Output sink errors
    #[error("Output error: {0}")]
    Output(String),

    /// Scan was cancelled
    #[error("Scan cancelled")]
    Cancelled,

    /// Operation timed out
    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// General errors
    #[error("Scanner error: {0}")]
    General(String),
}

/// Network-specific errors with detailed classification
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection refused for {target}")]
    ConnectionRefused { target: String },

    #[error("Connection reset by peer for {target}")]
    ConnectionReset { target: String },

    #[error("No route to host {target}")]
    NoRouteToHost { target: String },

    #[error("DNS resolution failed for {host}: {reason}")]
    DnsResolutionFailed { host: String, reason: String },

    #[error("Connection timeout after {timeout:?} to {target}")]
    ConnectionTimeout { target: String, timeout: Duration },

    #[error("TLS handshake failed for {host}: {reason}")]
    TlsHandshakeFailed { host: String, reason: String },

    #[error("Invalid target: {target}")]
    InvalidTarget { target: String },

    #[error("Network error: {0}")]
    Other(String),
}

/// Template parse / compile errors
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Parse failure in {id}: {reason}")]
    Parse { id: String, reason: String },

    #[error("Invalid regex in {id}: {pattern}")]
    InvalidRegex { id: String, pattern: String },

    #[error("Invalid DSL expression in {id}: {reason}")]
    InvalidDsl { id: String, reason: String },

    #[error("Unknown DSL function {function} in {id}")]
    UnknownFunction { id: String, function: String },

    #[error("Missing protocol block in {id}")]
    MissingProtocol { id: String },

    #[error("Invalid payload declaration in {id}: {reason}")]
    InvalidPayload { id: String, reason: String },
}

impl NetworkError {
    /// Whether the error counts toward the host error threshold.
    /// Application-level failures never do.
    pub fn is_trackable(&self) -> bool {
        matches!(
            self,
            NetworkError::ConnectionRefused { .. }
                | NetworkError::NoRouteToHost { .. }
                | NetworkError::DnsResolutionFailed { .. }
                | NetworkError::ConnectionTimeout { .. }
                | NetworkError::TlsHandshakeFailed { .. }
        )
    }

    /// Whether the stage may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NetworkError::ConnectionTimeout { .. }
                | NetworkError::ConnectionReset { .. }
                | NetworkError::Other(_)
        )
    }

    /// Short kind label used by the host error cache bookkeeping
    pub fn kind(&self) -> &'static str {
        match self {
            NetworkError::ConnectionRefused { .. } => "connection-refused",
            NetworkError::ConnectionReset { .. } => "connection-reset",
            NetworkError::NoRouteToHost { .. } => "no-route",
            NetworkError::DnsResolutionFailed { .. } => "dns-no-such-host",
            NetworkError::ConnectionTimeout { .. } => "io-timeout",
            NetworkError::TlsHandshakeFailed { .. } => "tls-handshake",
            NetworkError::InvalidTarget { .. } => "invalid-target",
            NetworkError::Other(_) => "other",
        }
    }
}

impl ScanError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ScanError::Network(e) => e.is_retryable(),
            ScanError::Timeout { .. } => true,
            _ => false,
        }
    }
}

/// Classify reqwest failures into the scanner taxonomy. Substring matching
/// on the source chain is used for kinds reqwest does not expose directly.
impl From<reqwest::Error> for NetworkError {
    fn from(err: reqwest::Error) -> Self {
        let target = err.url().map(|u| u.to_string()).unwrap_or_default();
        let chain = format!("{err:?}").to_lowercase();

        if err.is_timeout() {
            return NetworkError::ConnectionTimeout {
                target,
                timeout: Duration::from_secs(10),
            };
        }
        if err.is_connect() {
            if chain.contains("connection refused") {
                return NetworkError::ConnectionRefused { target };
            }
            if chain.contains("no route to host") {
                return NetworkError::NoRouteToHost { target };
            }
            if chain.contains("dns error") || chain.contains("failed to lookup") {
                let host = err
                    .url()
                    .and_then(|u| u.host_str().map(|h| h.to_string()))
                    .unwrap_or(target);
                return NetworkError::DnsResolutionFailed {
                    host,
                    reason: err.to_string(),
                };
            }
            if chain.contains("tls") || chain.contains("certificate") || chain.contains("handshake")
            {
                let host = err
                    .url()
                    .and_then(|u| u.host_str().map(|h| h.to_string()))
                    .unwrap_or(target);
                return NetworkError::TlsHandshakeFailed {
                    host,
                    reason: err.to_string(),
                };
            }
            return NetworkError::ConnectionRefused { target };
        }
        NetworkError::Other(err.to_string())
    }
}

impl From<std::io::Error> for NetworkError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::ConnectionRefused => NetworkError::ConnectionRefused {
                target: String::new(),
            },
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
                NetworkError::ConnectionReset {
                    target: String::new(),
                }
            }
            ErrorKind::HostUnreachable | ErrorKind::NetworkUnreachable => {
                NetworkError::NoRouteToHost {
                    target: String::new(),
                }
            }
            ErrorKind::TimedOut => NetworkError::ConnectionTimeout {
                target: String::new(),
                timeout: Duration::from_secs(10),
            },
            _ => NetworkError::Other(err.to_string()),
        }
    }
}

/// Result type for scanner operations
pub type ScanResult<T> = Result<T, ScanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trackable_classification() {
        let refused = NetworkError::ConnectionRefused {
            target: "10.0.0.1:80".into(),
        };
        assert!(refused.is_trackable());

        let reset = NetworkError::ConnectionReset {
            target: "10.0.0.1:80".into(),
        };
        assert!(!reset.is_trackable());

        let app = NetworkError::Other("empty response body".into());
        assert!(!app.is_trackable());
    }

    #[test]
    fn test_retryable_classification() {
        let timeout = NetworkError::ConnectionTimeout {
            target: "example.com".into(),
            timeout: Duration::from_secs(10),
        };
        assert!(timeout.is_retryable());

        let dns = NetworkError::DnsResolutionFailed {
            host: "nxdomain.example".into(),
            reason: "no such host".into(),
        };
        assert!(!dns.is_retryable());
    }

    #[test]
    fn test_io_error_mapping() {
        let err = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        let net: NetworkError = err.into();
        assert_eq!(net.kind(), "connection-refused");
        assert!(net.is_trackable());
    }
}
