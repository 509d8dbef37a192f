use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors raised by the exclusive backup entry points.
#[derive(Debug, Error)]
pub enum BackupError {
    /// The server or the backup label is in the wrong state for the call.
    #[error("{message}")]
    Precondition {
        message: String,
        hint: Option<String>,
    },

    #[error("could not {action} file \"{}\": {source}", path.display())]
    FileAccess {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Raised by the server primitives, passed through as is.
    #[error(transparent)]
    Host(#[from] anyhow::Error),
}

impl BackupError {
    pub fn precondition(message: impl Into<String>) -> Self {
        BackupError::Precondition {
            message: message.into(),
            hint: None,
        }
    }

    pub fn with_hint(self, hint: impl Into<String>) -> Self {
        match self {
            BackupError::Precondition { message, .. } => BackupError::Precondition {
                message,
                hint: Some(hint.into()),
            },
            other => other,
        }
    }

    pub fn file_access(action: &'static str, path: &Path, source: io::Error) -> Self {
        BackupError::FileAccess {
            action,
            path: path.to_owned(),
            source,
        }
    }

    pub fn invalid_data(file_name: &str) -> Self {
        BackupError::precondition(format!("invalid data in file \"{}\"", file_name))
    }

    pub fn recovery_in_progress(function: &str) -> Self {
        BackupError::precondition("recovery is in progress").with_hint(format!(
            "{}() cannot be executed during recovery.",
            function
        ))
    }

    pub fn hint(&self) -> Option<&str> {
        match self {
            BackupError::Precondition { hint, .. } => hint.as_deref(),
            _ => None,
        }
    }

    /// SQLSTATE the server would report for this error.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            BackupError::Precondition { .. } => "55000",
            BackupError::FileAccess { source, .. } => match source.kind() {
                io::ErrorKind::NotFound => "58P01",
                io::ErrorKind::PermissionDenied => "42501",
                io::ErrorKind::AlreadyExists => "42P04",
                io::ErrorKind::StorageFull => "53100",
                _ => "58030",
            },
            BackupError::Host(_) => "XX000",
        }
    }
}

pub type Result<T, E = BackupError> = std::result::Result<T, E>;
