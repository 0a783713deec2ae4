use std::{fmt, path::PathBuf};

use thiserror::Error;

/// Problems found while loading or validating the program list. Nothing is
/// launched when one of these is returned.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no config found; a sample was written to {}, edit it and run again", .path.display())]
    Missing { path: PathBuf },
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {}: {detail}", .path.display())]
    Parse { path: PathBuf, detail: String },
    #[error("no program is marked with is_main = true")]
    NoMainProgram,
    #[error("more than one program is marked with is_main = true: {}", .names.join(", "))]
    MultipleMainPrograms { names: Vec<String> },
    #[error("program at index {index} has an empty name")]
    EmptyName { index: usize },
    #[error("program '{name}' has an empty path")]
    EmptyPath { name: String },
    #[error("program '{name}' sets both systray_only and has_splash_screen")]
    ConflictingStartup { name: String },
    #[error("timing value {field} must be greater than zero")]
    InvalidTiming { field: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchFailure {
    NotFound,
    PermissionDenied,
    OsRejected,
}

impl fmt::Display for LaunchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LaunchFailure::NotFound => "executable not found",
            LaunchFailure::PermissionDenied => "permission denied",
            LaunchFailure::OsRejected => "rejected by the OS",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Error)]
#[error("{reason}: {detail}")]
pub struct LaunchError {
    pub reason: LaunchFailure,
    pub detail: String,
}

impl LaunchError {
    pub fn new(reason: LaunchFailure, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }

    pub fn from_io(err: &std::io::Error) -> Self {
        let reason = match err.kind() {
            std::io::ErrorKind::NotFound => LaunchFailure::NotFound,
            std::io::ErrorKind::PermissionDenied => LaunchFailure::PermissionDenied,
            _ => LaunchFailure::OsRejected,
        };
        Self::new(reason, err.to_string())
    }
}

/// Failures that abort a whole run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to launch main program '{name}': {source}")]
    MainLaunch {
        name: String,
        #[source]
        source: LaunchError,
    },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl RunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Internal(_) => 1,
            RunError::Config(_) => 2,
            RunError::MainLaunch { .. } => 3,
        }
    }
}
