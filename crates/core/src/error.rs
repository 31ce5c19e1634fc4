//! Error types for the voice orchestrator

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Which port an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortKind {
    Stt,
    Llm,
    Tts,
    Tool,
    Config,
    Transport,
}

impl PortKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortKind::Stt => "stt",
            PortKind::Llm => "llm",
            PortKind::Tts => "tts",
            PortKind::Tool => "tool",
            PortKind::Config => "config",
            PortKind::Transport => "transport",
        }
    }
}

/// Error taxonomy: kinds, not concrete types. The orchestrator's escalation
/// decisions key off these kinds plus the `retryable` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection lost, malformed envelope
    Transport,
    /// Network timeout, 5xx, rate limit
    ProviderTransient,
    /// 401, invalid config
    ProviderFatal,
    /// Provider violated its streaming contract
    ProtocolViolation,
    /// No chunk within the expected window
    Timeout,
    /// Tool returned an error or timed out
    Tool,
    /// Illegal state transition, contract violation
    Internal,
}

/// An error raised by a port, tagged with its origin and retryability.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{port:?} error ({kind:?}, retryable={retryable}): {message}")]
pub struct PortError {
    pub port: PortKind,
    pub kind: ErrorKind,
    pub retryable: bool,
    pub message: String,
}

impl PortError {
    pub fn transient(port: PortKind, message: impl Into<String>) -> Self {
        Self {
            port,
            kind: ErrorKind::ProviderTransient,
            retryable: true,
            message: message.into(),
        }
    }

    pub fn fatal(port: PortKind, message: impl Into<String>) -> Self {
        Self {
            port,
            kind: ErrorKind::ProviderFatal,
            retryable: false,
            message: message.into(),
        }
    }

    pub fn timeout(port: PortKind, message: impl Into<String>) -> Self {
        Self {
            port,
            kind: ErrorKind::Timeout,
            retryable: true,
            message: message.into(),
        }
    }

    pub fn protocol(port: PortKind, message: impl Into<String>) -> Self {
        Self {
            port,
            kind: ErrorKind::ProtocolViolation,
            retryable: false,
            message: message.into(),
        }
    }

    pub fn tool(message: impl Into<String>) -> Self {
        Self {
            port: PortKind::Tool,
            kind: ErrorKind::Tool,
            retryable: false,
            message: message.into(),
        }
    }

    pub fn internal(port: PortKind, message: impl Into<String>) -> Self {
        Self {
            port,
            kind: ErrorKind::Internal,
            retryable: false,
            message: message.into(),
        }
    }

    /// Unknown provider name requested from the registry
    pub fn unknown_provider(port: PortKind, name: &str, available: &[String]) -> Self {
        Self {
            port,
            kind: ErrorKind::ProviderFatal,
            retryable: false,
            message: format!(
                "unknown provider '{}' (available: {})",
                name,
                available.join(", ")
            ),
        }
    }
}

/// Main error type for the voice orchestrator
#[derive(Error, Debug)]
pub enum Error {
    #[error("Port error: {0}")]
    Port(#[from] PortError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn transport<S: Into<String>>(msg: S) -> Self {
        Error::Transport(msg.into())
    }

    pub fn pipeline<S: Into<String>>(msg: S) -> Self {
        Error::Pipeline(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Port(e) => e.retryable,
            Error::Transport(_) => false,
            _ => false,
        }
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_flags() {
        assert!(PortError::transient(PortKind::Llm, "503").retryable);
        assert!(PortError::timeout(PortKind::Stt, "no final").retryable);
        assert!(!PortError::fatal(PortKind::Llm, "401").retryable);
        assert!(!PortError::protocol(PortKind::Llm, "no finish_reason").retryable);
    }

    #[test]
    fn test_unknown_provider_message() {
        let err = PortError::unknown_provider(
            PortKind::Tts,
            "acme",
            &["loopback".to_string(), "scripted".to_string()],
        );
        assert!(err.message.contains("acme"));
        assert!(err.message.contains("loopback"));
        assert!(!err.retryable);
    }
}
