use anyhow::Context;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::build::PlatformBuildResult;
use crate::config::PatchExportConfig;
use crate::error::PatchError;
use crate::observer::ExportObserver;
use crate::snapshot::{to_json_document, AssetDependencyGraph, VersionSnapshot};
use crate::util::to_forward_slashes;

/// Which document an artifact is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ArtifactKind {
    DiffReport,
    ReleaseManifest,
    PakFilesInfo,
    PatchConfig,
}

impl ArtifactKind {
    pub fn file_name(self, base_version_id: &str, version_id: &str) -> String {
        match self {
            ArtifactKind::DiffReport => format!("{base_version_id}_{version_id}_Diff.json"),
            ArtifactKind::ReleaseManifest => format!("{version_id}_Release.json"),
            ArtifactKind::PakFilesInfo => format!("{version_id}_PakFilesInfo.json"),
            ArtifactKind::PatchConfig => format!("{version_id}_PatchConfig.json"),
        }
    }

    fn saved_message(self) -> &'static str {
        match self {
            ArtifactKind::DiffReport => "Succeed to export new patch diff info.",
            ArtifactKind::ReleaseManifest => "Succeed to export new release info.",
            ArtifactKind::PakFilesInfo => "Succeed to export the pak file info.",
            ArtifactKind::PatchConfig => "Succeed to export the patch config.",
        }
    }
}

/// Entry of `<version>_PakFilesInfo.json`.
#[derive(Debug, Serialize)]
pub struct PakFileInfo<'a> {
    pub path: String,
    pub size: u64,
    pub hash: &'a str,
}

/// Platform name -> archive metadata, ordered by platform name.
pub fn pak_files_info(results: &[PlatformBuildResult]) -> BTreeMap<&'static str, PakFileInfo<'_>> {
    results
        .iter()
        .map(|r| {
            (
                r.platform.name(),
                PakFileInfo {
                    path: to_forward_slashes(&r.archive_path),
                    size: r.file_size,
                    hash: &r.hash,
                },
            )
        })
        .collect()
}

/// Result of a single artifact write.
#[derive(Debug)]
pub struct ArtifactRecord {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub error: Option<PatchError>,
}

impl ArtifactRecord {
    pub fn written(&self) -> bool {
        self.error.is_none()
    }
}

/// Writes the version-level documents of a run. Every write stands alone:
/// one failing never stops the next.
pub struct ArtifactWriter<'a> {
    config: &'a PatchExportConfig,
    observer: &'a dyn ExportObserver,
}

impl<'a> ArtifactWriter<'a> {
    pub fn new(config: &'a PatchExportConfig, observer: &'a dyn ExportObserver) -> Self {
        Self { config, observer }
    }

    fn path_for(&self, kind: ArtifactKind, snapshot: &VersionSnapshot) -> PathBuf {
        self.config
            .version_dir()
            .join(kind.file_name(&snapshot.base_version_id, &snapshot.version_id))
    }

    fn write(&self, kind: ArtifactKind, path: PathBuf, document: anyhow::Result<String>) -> ArtifactRecord {
        let result = document.and_then(|body| write_document(&path, &body));
        match result {
            Ok(()) => {
                info!(artifact = ?kind, path = %path.display(), "artifact written");
                self.observer.notify(kind.saved_message(), Some(&path));
                ArtifactRecord { kind, path, error: None }
            }
            Err(e) => {
                warn!(artifact = ?kind, path = %path.display(), "artifact write failed: {e:#}");
                let error = PatchError::ArtifactWriteFailed {
                    path: path.clone(),
                    reason: format!("{e:#}"),
                };
                ArtifactRecord { kind, path, error: Some(error) }
            }
        }
    }

    /// Write every enabled artifact, reporting progress as one frame each.
    pub fn write_all(
        &self,
        changed: &AssetDependencyGraph,
        snapshot: &VersionSnapshot,
        builds: &[PlatformBuildResult],
    ) -> Vec<ArtifactRecord> {
        let version = &snapshot.version_id;
        let mut records = Vec::new();

        self.observer
            .enter_frame(1.0, &format!("Generating diff info of version {version}"));
        if self.config.save_diff_analysis {
            records.push(self.write_diff(changed, snapshot));
        }

        self.observer
            .enter_frame(1.0, &format!("Generating patch tracked asset info of version {version}"));
        if self.config.save_release_manifest {
            records.push(self.write_release(snapshot));
        }

        self.observer
            .enter_frame(1.0, &format!("Generating all platform pak info of version {version}"));
        if self.config.save_pak_files_info {
            records.push(self.write_pak_files_info(snapshot, builds));
        }

        self.observer
            .enter_frame(1.0, &format!("Generating current patch config of version {version}"));
        if self.config.save_patch_config {
            records.push(self.write_patch_config(snapshot));
        }

        records
    }

    pub fn write_diff(&self, changed: &AssetDependencyGraph, snapshot: &VersionSnapshot) -> ArtifactRecord {
        let path = self.path_for(ArtifactKind::DiffReport, snapshot);
        self.write(ArtifactKind::DiffReport, path, changed.to_json_pretty())
    }

    pub fn write_release(&self, snapshot: &VersionSnapshot) -> ArtifactRecord {
        let path = self.path_for(ArtifactKind::ReleaseManifest, snapshot);
        self.write(ArtifactKind::ReleaseManifest, path, snapshot.to_json_pretty())
    }

    pub fn write_pak_files_info(
        &self,
        snapshot: &VersionSnapshot,
        builds: &[PlatformBuildResult],
    ) -> ArtifactRecord {
        let path = self.path_for(ArtifactKind::PakFilesInfo, snapshot);
        self.write(ArtifactKind::PakFilesInfo, path, to_json_document(&pak_files_info(builds)))
    }

    pub fn write_patch_config(&self, snapshot: &VersionSnapshot) -> ArtifactRecord {
        let path = self.path_for(ArtifactKind::PatchConfig, snapshot);
        self.write(ArtifactKind::PatchConfig, path, to_json_document(self.config))
    }
}

fn write_document(path: &Path, body: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    std::fs::write(path, body).with_context(|| format!("Failed to write file: {}", path.display()))
}
