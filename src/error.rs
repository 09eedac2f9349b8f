use std::path::PathBuf;
use thiserror::Error;

use crate::diff::DiffError;
use crate::platform::Platform;

/// Errors surfaced by the patch pipeline.
///
/// `ConfigInvalid`, `BaseVersionUnreadable`, `Provider` and `Diff` abort a run
/// before anything is written. `PlatformBuildFailed` and `ArtifactWriteFailed`
/// are collected per platform / per artifact and never abort a run.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("base version {path} is unreadable: {reason}")]
    BaseVersionUnreadable { path: PathBuf, reason: String },

    #[error("asset graph provider failed: {0}")]
    Provider(String),

    #[error(transparent)]
    Diff(#[from] DiffError),

    #[error("build for platform {platform} failed: {reason}")]
    PlatformBuildFailed { platform: Platform, reason: String },

    #[error("failed to write {path}: {reason}")]
    ArtifactWriteFailed { path: PathBuf, reason: String },
}

impl PatchError {
    /// Fail-fast errors abort the whole operation; the rest are isolated.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            PatchError::PlatformBuildFailed { .. } | PatchError::ArtifactWriteFailed { .. }
        )
    }
}
