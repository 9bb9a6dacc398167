// ============================================================================
// ERROR HANDLING FRAMEWORK
// ============================================================================
// One error enum per subsystem, all convertible into `AgentError`.
// No condition raised here is fatal to the agent process.
// ============================================================================

use std::error::Error as StdError;
use std::path::PathBuf;

use thiserror::Error;

use crate::sampler::Subsystem;

// ----------------------------------------------------------------------------
// Core Agent Errors
// ----------------------------------------------------------------------------

/// The main error type for the agent.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Sampling error: {0}")]
    Sampler(#[from] SamplerError),

    #[error("Pattern error: {0}")]
    Pattern(#[from] PatternError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Whether the agent can keep running after this error.
    pub fn is_recoverable(&self) -> bool {
        match self {
            AgentError::Config(_) => false,
            AgentError::Sampler(_) => true,
            AgentError::Pattern(_) => false,
            AgentError::Io(_) => true,
            AgentError::Internal(_) => false,
        }
    }

    /// Error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            AgentError::Config(_) => "config",
            AgentError::Sampler(e) => e.category(),
            AgentError::Pattern(_) => "pattern",
            AgentError::Io(_) => "io",
            AgentError::Internal(_) => "internal",
        }
    }
}

// ----------------------------------------------------------------------------
// Sampling Errors
// ----------------------------------------------------------------------------

/// Failure of one subsystem's contribution to a sampling cycle.
#[derive(Error, Debug)]
pub enum SamplerError {
    #[error("{subsystem}: cannot read {path}: {source}")]
    SourceUnreadable {
        subsystem: Subsystem,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{subsystem}: malformed {file}: {message}")]
    MalformedSource {
        subsystem: Subsystem,
        file: &'static str,
        message: String,
    },

    #[error("{subsystem}: sampling exceeded {timeout_ms}ms")]
    Timeout { subsystem: Subsystem, timeout_ms: u64 },
}

impl SamplerError {
    pub fn malformed(subsystem: Subsystem, file: &'static str, message: impl Into<String>) -> Self {
        SamplerError::MalformedSource {
            subsystem,
            file,
            message: message.into(),
        }
    }

    /// The subsystem whose contribution was dropped.
    pub fn subsystem(&self) -> Subsystem {
        match self {
            SamplerError::SourceUnreadable { subsystem, .. }
            | SamplerError::MalformedSource { subsystem, .. }
            | SamplerError::Timeout { subsystem, .. } => *subsystem,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            SamplerError::SourceUnreadable { .. } => "source_unreadable",
            SamplerError::MalformedSource { .. } => "malformed_source",
            SamplerError::Timeout { .. } => "timeout",
        }
    }
}

// ----------------------------------------------------------------------------
// Configuration Errors
// ----------------------------------------------------------------------------

/// Errors related to configuration loading and validation
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to parse configuration: {message}")]
    ParseError {
        message: String,
        source: Option<Box<dyn StdError + Send + Sync>>,
    },

    #[error("Invalid configuration value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Pattern Errors
// ----------------------------------------------------------------------------

/// Rejected wildcard patterns.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("pattern is empty")]
    Empty,

    #[error("pattern '{pattern}' has an empty segment")]
    EmptySegment { pattern: String },

    #[error("pattern '{pattern}' failed to compile: {message}")]
    Invalid { pattern: String, message: String },
}

// ----------------------------------------------------------------------------
// Result Type Aliases
// ----------------------------------------------------------------------------

/// Standard result type for agent operations
pub type AgentResult<T> = Result<T, AgentError>;

/// Result type for a single subsystem's sampling
pub type SamplerResult<T> = Result<T, SamplerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampler_errors_are_recoverable() {
        let err: AgentError = SamplerError::Timeout {
            subsystem: Subsystem::Disk,
            timeout_ms: 2000,
        }
        .into();
        assert!(err.is_recoverable());
        assert_eq!(err.category(), "timeout");
        assert_eq!(err.to_string(), "Sampling error: disk: sampling exceeded 2000ms");
    }

    #[test]
    fn test_config_errors_are_fatal() {
        let err: AgentError = ConfigError::invalid_value("agent.sample_interval", "too small").into();
        assert!(!err.is_recoverable());
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_sampler_error_reports_subsystem() {
        let err = SamplerError::malformed(Subsystem::Network, "net/dev", "expected 16 columns");
        assert_eq!(err.subsystem(), Subsystem::Network);
        assert_eq!(err.to_string(), "network: malformed net/dev: expected 16 columns");
    }
}
