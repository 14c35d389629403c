//! Error formatting utilities
//!
//! Converts internal errors into clear, actionable messages for the CLI.

use super::error::{ErrorContext, StewardError, find_steward_error};

/// Convert any error into a user-friendly format with contextual suggestions
///
/// The chain is searched for a [`StewardError`] first; raw IO and TOML errors
/// get generic suggestions; anything else is shown with its full cause chain.
#[must_use]
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if let Some(steward_error) = find_steward_error(&error) {
        let context = create_error_context(steward_error);
        let outer = error.to_string();
        if outer != steward_error.to_string() && context.details.is_none() {
            return context.with_details(outer);
        }
        return context;
    }

    if let Some(io_error) = error.downcast_ref::<std::io::Error>() {
        match io_error.kind() {
            std::io::ErrorKind::PermissionDenied => {
                return ErrorContext::new(StewardError::PermissionDenied {
                    operation: "file access".to_string(),
                    path: "unknown".to_string(),
                })
                .with_suggestion("Check ownership of the installation root and status file");
            }
            std::io::ErrorKind::NotFound => {
                return ErrorContext::new(StewardError::FileSystemError {
                    operation: "file access".to_string(),
                    path: "unknown".to_string(),
                })
                .with_suggestion("Check that the file or directory exists and the path is correct");
            }
            _ => {}
        }
    }

    if let Some(toml_error) = error.downcast_ref::<toml::de::Error>() {
        return ErrorContext::new(StewardError::ConfigError {
            message: toml_error.to_string(),
        })
        .with_suggestion("Check the TOML syntax in your steward configuration file");
    }

    let mut message = error.to_string();
    let chain: Vec<String> =
        error.chain().skip(1).map(std::string::ToString::to_string).collect();

    if !chain.is_empty() {
        message.push_str("\n\nCaused by:");
        for (i, cause) in chain.iter().enumerate() {
            message.push_str(&format!("\n  {}: {}", i + 1, cause));
        }
    }

    ErrorContext::new(StewardError::Other {
        message,
    })
}

/// Map a [`StewardError`] to a context with tailored suggestions.
#[must_use]
pub fn create_error_context(error: &StewardError) -> ErrorContext {
    let context = ErrorContext::new(clone_error(error));
    match error {
        StewardError::ChecksumMismatch { .. } | StewardError::SizeMismatch { .. } => context
            .with_suggestion("The staged artifact was discarded; the installed version is unchanged. Re-publish the release or retry later")
            .with_details("Downloaded bytes did not match the signed release descriptor"),
        StewardError::PathTraversal { .. } => context
            .with_suggestion("Rebuild the release archive with paths relative to its root")
            .with_details("Extraction was aborted before any file was written"),
        StewardError::NetworkError { .. }
        | StewardError::HttpStatus { .. }
        | StewardError::Timeout { .. } => context
            .with_suggestion("Check network connectivity to the metadata and artifact servers; the next check will retry"),
        StewardError::MetadataError { .. } => context
            .with_suggestion("Verify metadata_url and that the metadata directory is writable"),
        StewardError::DescriptorNotFound { service } => context.with_suggestion(format!(
            "Publish a '{service}/{service}-index.json' target or fix the service name in the configuration"
        )),
        StewardError::CredentialError { .. } => context
            .with_suggestion("Check the [credentials] section of the configuration"),
        StewardError::ConfigError { .. } | StewardError::TomlError(_) => context
            .with_suggestion("Fix the configuration file, or pass --config with the right path"),
        StewardError::InstallInProgress { .. } => context
            .with_suggestion("Wait for the running install to finish"),
        StewardError::NoBackup { .. } => context
            .with_suggestion("Rollback is only possible after at least one completed update"),
        StewardError::SpawnFailed { .. } => context
            .with_suggestion("The previous process keeps running; check the new binary's permissions"),
        StewardError::PermissionDenied { .. } => context
            .with_suggestion("Check ownership of the installation root and status file"),
        _ => context,
    }
}

// `StewardError` wraps non-Clone sources; rebuild an equivalent value for display.
fn clone_error(error: &StewardError) -> StewardError {
    match error {
        StewardError::ChecksumMismatch { name, expected, actual } => StewardError::ChecksumMismatch {
            name: name.clone(),
            expected: expected.clone(),
            actual: actual.clone(),
        },
        StewardError::SizeMismatch { name, expected, actual } => StewardError::SizeMismatch {
            name: name.clone(),
            expected: *expected,
            actual: *actual,
        },
        StewardError::PathTraversal { entry } => StewardError::PathTraversal {
            entry: entry.clone(),
        },
        StewardError::NetworkError { operation, reason } => StewardError::NetworkError {
            operation: operation.clone(),
            reason: reason.clone(),
        },
        StewardError::HttpStatus { url, status } => StewardError::HttpStatus {
            url: url.clone(),
            status: *status,
        },
        StewardError::Timeout { operation, seconds } => StewardError::Timeout {
            operation: operation.clone(),
            seconds: *seconds,
        },
        StewardError::MetadataError { message } => StewardError::MetadataError {
            message: message.clone(),
        },
        StewardError::DescriptorNotFound { service } => StewardError::DescriptorNotFound {
            service: service.clone(),
        },
        StewardError::DescriptorParseError { service, reason } => {
            StewardError::DescriptorParseError {
                service: service.clone(),
                reason: reason.clone(),
            }
        }
        StewardError::CredentialError { reason } => StewardError::CredentialError {
            reason: reason.clone(),
        },
        StewardError::FileSystemError { operation, path } => StewardError::FileSystemError {
            operation: operation.clone(),
            path: path.clone(),
        },
        StewardError::PermissionDenied { operation, path } => StewardError::PermissionDenied {
            operation: operation.clone(),
            path: path.clone(),
        },
        StewardError::ConfigError { message } => StewardError::ConfigError {
            message: message.clone(),
        },
        StewardError::SpawnFailed { binary, reason } => StewardError::SpawnFailed {
            binary: binary.clone(),
            reason: reason.clone(),
        },
        StewardError::InstallInProgress { lock_path } => StewardError::InstallInProgress {
            lock_path: lock_path.clone(),
        },
        StewardError::NoBackup { path } => StewardError::NoBackup {
            path: path.clone(),
        },
        StewardError::Cancelled { operation } => StewardError::Cancelled {
            operation: operation.clone(),
        },
        StewardError::IoError(e) => StewardError::IoError(std::io::Error::new(e.kind(), e.to_string())),
        StewardError::JsonError(e) => StewardError::Other {
            message: format!("JSON error: {e}"),
        },
        StewardError::TomlError(e) => StewardError::ConfigError {
            message: e.to_string(),
        },
        StewardError::Other { message } => StewardError::Other {
            message: message.clone(),
        },
    }
}
