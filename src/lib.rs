//! Content hot-patch packaging.
//!
//! Diffs the current asset set of a project against a released base version
//! and drives an external archiver to build one patch pak per platform, next
//! to the manifests that make the next patch possible.

pub mod artifacts;
pub mod build;
pub mod commands;
pub mod config;
pub mod diff;
pub mod error;
pub mod logging;
pub mod observer;
pub mod pipeline;
pub mod platform;
pub mod provider;
pub mod snapshot;
pub mod util;

pub use config::PatchExportConfig;
pub use error::PatchError;
pub use platform::Platform;
pub use snapshot::{AssetDependencyGraph, AssetRecord, VersionSnapshot};
