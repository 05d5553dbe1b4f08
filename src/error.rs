//! Error types for `packetwalk`
//!
//! The choreography core never returns errors: every edge case resolves to
//! a well-defined track state. Errors only exist at the fallible edges:
//! loading room files, parsing wire input, and running the CLI.

use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit codes for `packetwalk` CLI operations.
///
/// These codes follow Unix conventions.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution
    pub const SUCCESS: i32 = 0;

    /// General error
    pub const ERROR: i32 = 1;

    /// Configuration error (invalid YAML, validation failure)
    pub const CONFIG_ERROR: i32 = 2;

    /// I/O error (file not found, permission denied)
    pub const IO_ERROR: i32 = 3;

    /// Usage error (invalid arguments, missing required options)
    pub const USAGE_ERROR: i32 = 64;

    /// Interrupted by SIGINT (Ctrl+C)
    pub const INTERRUPTED: i32 = 130;

    /// Terminated by SIGTERM
    pub const TERMINATED: i32 = 143;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for `packetwalk` operations.
///
/// Aggregates the domain-specific errors and maps each to an exit code.
#[derive(Debug, Error)]
pub enum PacketwalkError {
    /// Room configuration loading or validation error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Built-in room lookup error
    #[error(transparent)]
    Scenario(#[from] ScenarioError),

    /// Invalid command-line usage that clap cannot express
    #[error("usage error: {0}")]
    Usage(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PacketwalkError {
    /// Returns the appropriate exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Scenario(_) => ExitCode::CONFIG_ERROR,
            Self::Json(_) => ExitCode::ERROR,
            Self::Usage(_) => ExitCode::USAGE_ERROR,
            Self::Io(_) => ExitCode::IO_ERROR,
        }
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Room configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML parsing failed
    #[error("parse error in {path}: {message}")]
    ParseError {
        /// Path to the room file
        path: PathBuf,
        /// Line number where the error occurred (if available)
        line: Option<usize>,
        /// Error message from the parser
        message: String,
    },

    /// Room validation failed
    #[error("validation failed for {path}: {}", summarize(.errors))]
    ValidationError {
        /// Path (or built-in name) of the room
        path: String,
        /// All validation errors found
        errors: Vec<ValidationIssue>,
    },

    /// Room file not found
    #[error("file not found: {path}")]
    MissingFile {
        /// Path to the missing file
        path: PathBuf,
    },

    /// Room file exceeds the configured size limit
    #[error("room file too large: {size} bytes (limit: {limit})")]
    TooLarge {
        /// Actual size in bytes
        size: usize,
        /// Configured limit in bytes
        limit: usize,
    },
}

fn summarize(errors: &[ValidationIssue]) -> String {
    match errors {
        [] => "no details".to_string(),
        [only] => only.to_string(),
        [first, rest @ ..] => format!("{first} (and {} more)", rest.len()),
    }
}

// ============================================================================
// Validation Types
// ============================================================================

/// A single validation issue found while validating a room.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ValidationIssue {
    /// Dotted path to the problematic field (e.g., "phases.dns.path[2].to")
    pub path: String,
    /// Description of the validation issue
    pub message: String,
    /// Severity level of the issue
    pub severity: Severity,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {} at {}", prefix, self.message, self.path)
    }
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Prevents the room from being used
    Error,
    /// Informational; the room still loads
    Warning,
}

// ============================================================================
// Scenario Errors
// ============================================================================

/// Built-in room lookup errors.
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// No built-in room with this name
    #[error("unknown built-in room '{name}'{}", fmt_suggestion(.suggestion))]
    Unknown {
        /// Requested name
        name: String,
        /// Closest known name, if any is close enough
        suggestion: Option<String>,
    },
}

fn fmt_suggestion(suggestion: &Option<String>) -> String {
    suggestion
        .as_ref()
        .map(|s| format!(" (did you mean '{s}'?)"))
        .unwrap_or_default()
}

// ============================================================================
// Wire Errors
// ============================================================================

/// Errors decoding NDJSON input for the live loop.
#[derive(Debug, Error)]
pub enum WireError {
    /// Line was not valid JSON for any known message
    #[error("malformed message on line {line}: {source}")]
    Malformed {
        /// 1-based input line number
        line: u64,
        /// Underlying decode error
        #[source]
        source: serde_json::Error,
    },

    /// Line exceeded the maximum accepted length
    #[error("line {line} exceeds {limit} bytes")]
    LineTooLong {
        /// 1-based input line number
        line: u64,
        /// Configured limit in bytes
        limit: usize,
    },
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Result type alias for `packetwalk` operations.
pub type Result<T> = std::result::Result<T, PacketwalkError>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitCode::SUCCESS, 0);
        assert_eq!(ExitCode::ERROR, 1);
        assert_eq!(ExitCode::CONFIG_ERROR, 2);
        assert_eq!(ExitCode::IO_ERROR, 3);
        assert_eq!(ExitCode::USAGE_ERROR, 64);
        assert_eq!(ExitCode::INTERRUPTED, 130);
        assert_eq!(ExitCode::TERMINATED, 143);
    }

    #[test]
    fn test_config_error_exit_code() {
        let err: PacketwalkError = ConfigError::MissingFile {
            path: PathBuf::from("/rooms/missing.yaml"),
        }
        .into();
        assert_eq!(err.exit_code(), ExitCode::CONFIG_ERROR);
    }

    #[test]
    fn test_scenario_error_exit_code_and_suggestion() {
        let err: PacketwalkError = ScenarioError::Unknown {
            name: "firewal".to_string(),
            suggestion: Some("firewall".to_string()),
        }
        .into();
        assert_eq!(err.exit_code(), ExitCode::CONFIG_ERROR);
        assert!(err.to_string().contains("did you mean 'firewall'"));
    }

    #[test]
    fn test_io_error_exit_code() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let err: PacketwalkError = io_err.into();
        assert_eq!(err.exit_code(), ExitCode::IO_ERROR);
    }

    #[test]
    fn test_json_error_exit_code() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: PacketwalkError = json_err.into();
        assert_eq!(err.exit_code(), ExitCode::ERROR);
    }

    #[test]
    fn test_usage_error_exit_code() {
        let err = PacketwalkError::Usage("bad step".to_string());
        assert_eq!(err.exit_code(), ExitCode::USAGE_ERROR);
    }

    #[test]
    fn test_validation_issue_display() {
        let issue = ValidationIssue {
            path: "phases.dns.path[0].to".to_string(),
            message: "unknown anchor 'fw9'".to_string(),
            severity: Severity::Error,
        };
        assert_eq!(
            issue.to_string(),
            "error: unknown anchor 'fw9' at phases.dns.path[0].to"
        );
    }

    #[test]
    fn test_validation_error_summarizes_first_issue() {
        let issue = |m: &str| ValidationIssue {
            path: "room".to_string(),
            message: m.to_string(),
            severity: Severity::Error,
        };
        let err = ConfigError::ValidationError {
            path: "lab.yaml".to_string(),
            errors: vec![issue("first"), issue("second"), issue("third")],
        };
        let text = err.to_string();
        assert!(text.contains("first"));
        assert!(text.contains("and 2 more"));
    }
}
