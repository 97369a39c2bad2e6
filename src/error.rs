//! Error handling module for archstrap
//!
//! Every provisioning component reports failures through `ProvisionError`.
//! The variants mirror the operator-facing failure taxonomy: a missing config
//! file and an unwritable config path are distinct from a failed external
//! command, and a missing theme is the one error that never aborts anything.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Main error type for provisioning operations
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// A configuration file that must exist on the target is missing
    #[error("Config file not found: {}", path.display())]
    ConfigNotFound { path: PathBuf },

    /// A configuration file could not be read or replaced due to permissions
    #[error("Permission denied writing {}", path.display())]
    WritePermissionDenied { path: PathBuf },

    /// An external command exited unsuccessfully (or could not be spawned)
    #[error("Command `{command}` failed with exit code {}{}", exit_code_text(exit_code), stderr_suffix(stderr))]
    ExternalCommandFailed {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    /// No theme descriptor was found after installing a bootloader theme
    #[error("No theme descriptor named {marker} found under {}", search_root.display())]
    ThemeNotResolved { search_root: PathBuf, marker: String },

    /// The operator did not confirm a destructive step
    #[error("Destructive step '{step}' aborted: operator did not confirm")]
    DestructiveStepAborted { step: String },

    /// A credential required by the run is missing from the credentials store
    #[error("Missing credential: {0}")]
    MissingCredential(String),

    /// Configuration errors (loading, parsing, validation)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation errors (layout, identities, values)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Stage machine transition errors
    #[error("Stage transition error: {0}")]
    Transition(String),

    /// IO errors not covered by a more specific variant
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn exit_code_text(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => code.to_string(),
        None => "none (signal)".to_string(),
    }
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {}", trimmed)
    }
}

/// Result type alias for provisioning operations
pub type Result<T> = std::result::Result<T, ProvisionError>;

impl ProvisionError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a command failure error
    pub fn command_failed(
        command: impl Into<String>,
        exit_code: Option<i32>,
        stderr: impl Into<String>,
    ) -> Self {
        Self::ExternalCommandFailed {
            command: command.into(),
            exit_code,
            stderr: stderr.into(),
        }
    }

    /// Map an IO error on `path` to the taxonomy.
    ///
    /// `NotFound` becomes `ConfigNotFound` and `PermissionDenied` (including a
    /// read-only filesystem) becomes `WritePermissionDenied`.
    pub fn from_io(path: &Path, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::ConfigNotFound {
                path: path.to_path_buf(),
            },
            std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::ReadOnlyFilesystem => {
                Self::WritePermissionDenied {
                    path: path.to_path_buf(),
                }
            }
            _ => Self::Io(err),
        }
    }

    /// Errors that abort the whole run no matter which step raised them.
    ///
    /// The bootloader and initramfs configs are required for a bootable
    /// system, so losing them is never a degraded outcome.
    pub fn is_always_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound { .. }
                | Self::WritePermissionDenied { .. }
                | Self::DestructiveStepAborted { .. }
        )
    }
}
