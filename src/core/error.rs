//! Error handling for steward
//!
//! This module provides the typed error enum used across the updater and the
//! user-facing [`ErrorContext`] wrapper used by the CLI.
//!
//! # Error Classes
//!
//! Every [`StewardError`] belongs to exactly one [`ErrorClass`], which decides
//! how an update cycle reacts to it:
//!
//! - **Transient** (network, metadata refresh, timeouts): logged and retried on
//!   the next poller tick or installer trigger.
//! - **Integrity** (hash or size mismatch, archive path traversal): hard stop.
//!   Staged artifacts are discarded, the installed version is untouched, and
//!   the message is recorded as `last_error` in the status file.
//! - **Environment** (directory creation, permissions, process spawn): fatal to
//!   the current cycle and retried on the next trigger.
//!
//! Application code returns [`anyhow::Result`] with `.context(..)` and raises a
//! [`StewardError`] wherever a caller needs to branch on the class; use
//! [`classify`] to recover the class from an [`anyhow::Error`] chain.
//!
//! # Examples
//!
//! ```rust,no_run
//! use steward::core::{ErrorClass, StewardError, classify};
//!
//! let err = anyhow::Error::from(StewardError::ChecksumMismatch {
//!     name: "general-service".to_string(),
//!     expected: "abc".to_string(),
//!     actual: "def".to_string(),
//! })
//! .context("Failed to verify staged artifact");
//!
//! assert_eq!(classify(&err), ErrorClass::Integrity);
//! ```

use colored::Colorize;
use std::fmt;
use thiserror::Error;

/// How an update cycle reacts to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retried on the next tick without operator involvement.
    Transient,
    /// Hard stop; recorded as `last_error`.
    Integrity,
    /// Fatal to the current cycle; retried on the next trigger.
    Environment,
}

impl ErrorClass {
    /// Whether failures of this class are persisted to the status file.
    #[must_use]
    pub const fn records_last_error(self) -> bool {
        matches!(self, Self::Integrity)
    }

    /// Whether a failed release is held back until a new request arrives.
    #[must_use]
    pub const fn waits_for_trigger(self) -> bool {
        matches!(self, Self::Integrity | Self::Environment)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Transient => "transient",
            Self::Integrity => "integrity",
            Self::Environment => "environment",
        };
        f.write_str(name)
    }
}

/// The main error type for steward operations
#[derive(Error, Debug)]
pub enum StewardError {
    /// Downloaded bytes do not hash to the value in the release descriptor.
    #[error("Checksum mismatch for {name}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Artifact or target name
        name: String,
        /// Hash from the descriptor
        expected: String,
        /// Hash of the bytes on disk
        actual: String,
    },

    /// Downloaded size does not match the descriptor.
    #[error("Size mismatch for {name}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Artifact or target name
        name: String,
        /// Size from the descriptor
        expected: u64,
        /// Size on disk
        actual: u64,
    },

    /// An archive entry would be written outside the extraction root.
    #[error("Archive entry '{entry}' escapes the extraction directory")]
    PathTraversal {
        /// Entry name as stored in the archive
        entry: String,
    },

    /// Network request failed before a response was received.
    #[error("Network error during {operation}: {reason}")]
    NetworkError {
        /// What was being fetched
        operation: String,
        /// Underlying failure
        reason: String,
    },

    /// The server answered with a non-success status.
    #[error("Unexpected HTTP status {status} from {url}")]
    HttpStatus {
        /// Requested URL
        url: String,
        /// Response status code
        status: u16,
    },

    /// A network step exceeded its deadline.
    #[error("Timed out after {seconds}s during {operation}")]
    Timeout {
        /// What was being done
        operation: String,
        /// Deadline that was exceeded
        seconds: u64,
    },

    /// Metadata refresh or trust bootstrap failed.
    #[error("Metadata error: {message}")]
    MetadataError {
        /// Description of the failure
        message: String,
    },

    /// The metadata feed has no target for this service.
    #[error("No release descriptor published for service '{service}'")]
    DescriptorNotFound {
        /// Service name that was resolved
        service: String,
    },

    /// Descriptor bytes could not be parsed.
    #[error("Invalid release descriptor for '{service}': {reason}")]
    DescriptorParseError {
        /// Service name
        service: String,
        /// Parse failure
        reason: String,
    },

    /// A bearer token could not be obtained.
    #[error("Failed to obtain credentials: {reason}")]
    CredentialError {
        /// What went wrong
        reason: String,
    },

    /// A filesystem operation failed.
    #[error("File system error during {operation}: {path}")]
    FileSystemError {
        /// Operation being performed
        operation: String,
        /// Path involved
        path: String,
    },

    /// Insufficient permissions.
    #[error("Permission denied: {operation} on {path}")]
    PermissionDenied {
        /// Operation being performed
        operation: String,
        /// Path involved
        path: String,
    },

    /// Configuration is missing or invalid.
    #[error("Configuration error: {message}")]
    ConfigError {
        /// What is wrong
        message: String,
    },

    /// The successor process could not be started.
    #[error("Failed to start {binary}: {reason}")]
    SpawnFailed {
        /// Binary that was launched
        binary: String,
        /// Spawn failure
        reason: String,
    },

    /// Another installer holds the install lock.
    #[error("Another install is already in progress (lock: {lock_path})")]
    InstallInProgress {
        /// Lock file path
        lock_path: String,
    },

    /// There is no previous installation to roll back to.
    #[error("No previous installation available at {path}")]
    NoBackup {
        /// Expected backup directory
        path: String,
    },

    /// A shutdown signal aborted the operation.
    #[error("Operation cancelled: {operation}")]
    Cancelled {
        /// What was interrupted
        operation: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// Anything else
    #[error("{message}")]
    Other {
        /// Message to show
        message: String,
    },
}

impl StewardError {
    /// The failure class that decides retry and reporting behavior.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::ChecksumMismatch { .. }
            | Self::SizeMismatch { .. }
            | Self::PathTraversal { .. }
            | Self::DescriptorParseError { .. } => ErrorClass::Integrity,
            Self::NetworkError { .. }
            | Self::HttpStatus { .. }
            | Self::Timeout { .. }
            | Self::MetadataError { .. }
            | Self::DescriptorNotFound { .. }
            | Self::CredentialError { .. }
            | Self::InstallInProgress { .. }
            | Self::Cancelled { .. } => ErrorClass::Transient,
            Self::FileSystemError { .. }
            | Self::PermissionDenied { .. }
            | Self::ConfigError { .. }
            | Self::SpawnFailed { .. }
            | Self::NoBackup { .. }
            | Self::IoError(_)
            | Self::JsonError(_)
            | Self::TomlError(_)
            | Self::Other { .. } => ErrorClass::Environment,
        }
    }
}

/// Find the first [`StewardError`] in an error chain.
#[must_use]
pub fn find_steward_error(error: &anyhow::Error) -> Option<&StewardError> {
    error.chain().find_map(|cause| cause.downcast_ref::<StewardError>())
}

/// Classify an arbitrary error chain.
///
/// Errors that carry no [`StewardError`] are treated as environment failures,
/// except raw `reqwest` errors which are transient.
#[must_use]
pub fn classify(error: &anyhow::Error) -> ErrorClass {
    if let Some(steward_error) = find_steward_error(error) {
        return steward_error.class();
    }
    if error.chain().any(|cause| cause.downcast_ref::<reqwest::Error>().is_some()) {
        return ErrorClass::Transient;
    }
    ErrorClass::Environment
}

/// Error wrapper that adds a suggestion and details for terminal display.
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying error
    pub error: StewardError,
    /// Actionable next step, shown in green
    pub suggestion: Option<String>,
    /// Background on the failure, shown in yellow
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context with no suggestion or details.
    #[must_use]
    pub const fn new(error: StewardError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    /// Add a suggestion for resolving the error.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add additional details explaining the error.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print the error, details, and suggestion to stderr with colors.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}
