//! Diff-only, release-only and full export runs.
//!
//! Every run checks its configuration, reads the base version and computes the
//! diff before anything touches the output directory, so a run that fails
//! early leaves no trace on disk.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::{error, info};

use crate::artifacts::{ArtifactRecord, ArtifactWriter};
use crate::build::{BuildOrchestrator, BuildTarget, PlatformBuildResult, PlatformOutcome};
use crate::config::{self, PatchExportConfig};
use crate::diff::{self, DiffResult};
use crate::error::PatchError;
use crate::observer::ExportObserver;
use crate::provider::AssetGraphProvider;
use crate::snapshot::{AssetDependencyGraph, VersionSnapshot};

/// Current version, its base and what changed between them.
#[derive(Debug, Clone)]
pub struct PreparedPatch {
    pub base: VersionSnapshot,
    pub current: VersionSnapshot,
    pub diff: DiffResult,
    /// Added + modified.
    pub changed: AssetDependencyGraph,
}

/// Read a `_Release.json`. Its version id ends up in output file names, so it
/// must pass the same check as the configured one.
pub fn load_base_version(path: &Path) -> Result<VersionSnapshot, PatchError> {
    let loaded = VersionSnapshot::load(path).and_then(|base| {
        config::check_version_id(&base.version_id)
            .map_err(|reason| anyhow::anyhow!("versionId {reason}"))?;
        Ok(base)
    });
    loaded.map_err(|e| {
        error!(path = %path.display(), "deserialize base version failed: {e:#}");
        PatchError::BaseVersionUnreadable {
            path: path.to_path_buf(),
            reason: format!("{e:#}"),
        }
    })
}

fn configured_base(config: &PatchExportConfig) -> Result<&Path, PatchError> {
    config
        .base_version
        .as_deref()
        .ok_or_else(|| PatchError::ConfigInvalid("base_version is not set".into()))
}

fn prepare_with_base(
    config: &PatchExportConfig,
    provider: &dyn AssetGraphProvider,
    base: VersionSnapshot,
    created_at: DateTime<Utc>,
) -> Result<PreparedPatch, PatchError> {
    let graph = provider.current_graph(config)?;
    let current = VersionSnapshot::new(&config.version_id, &base.version_id, created_at, graph);

    let diff = diff::diff(&current.asset_dependencies, &base.asset_dependencies)?;
    let changed = diff.changed()?;
    info!(
        version = %current.version_id,
        base = %current.base_version_id,
        added = diff.added.len(),
        modified = diff.modified.len(),
        deleted = diff.deleted.len(),
        "computed version diff"
    );

    Ok(PreparedPatch {
        base,
        current,
        diff,
        changed,
    })
}

/// Validate, read the base (when exporting by base version), scan and diff.
pub fn prepare_export(
    config: &PatchExportConfig,
    provider: &dyn AssetGraphProvider,
    created_at: DateTime<Utc>,
) -> Result<PreparedPatch, PatchError> {
    config.validate_for_export()?;
    let base = if config.by_base_version {
        load_base_version(configured_base(config)?)?
    } else {
        VersionSnapshot::empty_base()
    };
    prepare_with_base(config, provider, base, created_at)
}

/// Compare the current content against the configured base without writing anything.
pub fn run_diff(
    config: &PatchExportConfig,
    provider: &dyn AssetGraphProvider,
    created_at: DateTime<Utc>,
) -> Result<PreparedPatch, PatchError> {
    config.validate_for_diff()?;
    let base = load_base_version(configured_base(config)?)?;
    prepare_with_base(config, provider, base, created_at)
}

/// Write only `<version>_Release.json`, e.g. to seed the first base version.
pub fn run_release(
    config: &PatchExportConfig,
    provider: &dyn AssetGraphProvider,
    observer: &dyn ExportObserver,
    created_at: DateTime<Utc>,
) -> Result<ArtifactRecord, PatchError> {
    let prepared = prepare_export(config, provider, created_at)?;
    let mut record = ArtifactWriter::new(config, observer).write_release(&prepared.current);
    match record.error.take() {
        Some(err) => Err(err),
        None => Ok(record),
    }
}

/// Knobs of a single export run that are not part of the saved config.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub created_at: DateTime<Utc>,
    pub cancel: Option<watch::Receiver<bool>>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            created_at: Utc::now(),
            cancel: None,
        }
    }
}

#[derive(Debug)]
pub struct ExportSummary {
    pub version_dir: PathBuf,
    pub prepared: PreparedPatch,
    pub platforms: Vec<PlatformOutcome>,
    pub artifacts: Vec<ArtifactRecord>,
}

impl ExportSummary {
    pub fn builds(&self) -> Vec<PlatformBuildResult> {
        self.platforms
            .iter()
            .filter_map(|o| o.result.clone())
            .collect()
    }

    pub fn artifact_errors(&self) -> Vec<&PatchError> {
        self.artifacts.iter().filter_map(|a| a.error.as_ref()).collect()
    }

    pub fn platform_errors(&self) -> Vec<PatchError> {
        self.platforms.iter().filter_map(PlatformOutcome::error).collect()
    }

    pub fn is_complete_success(&self) -> bool {
        self.platforms.iter().all(PlatformOutcome::succeeded) && self.artifact_errors().is_empty()
    }
}

/// Full export: diff, one pak per target platform, then the version artifacts.
///
/// Fails only before the first write. Platform and artifact failures are
/// recorded in the summary and the run carries on.
pub async fn run_export(
    config: &PatchExportConfig,
    provider: &dyn AssetGraphProvider,
    observer: &dyn ExportObserver,
    options: ExportOptions,
) -> Result<ExportSummary, PatchError> {
    let prepared = prepare_export(config, provider, options.created_at)?;
    if !prepared.current.has_base() {
        info!(version = %config.version_id, "no base version, packaging every selected asset");
    } else if prepared.changed.is_empty() {
        info!(version = %config.version_id, "no asset changes against base version");
    }

    let platform_count = config.target_platforms().len() as f32;
    observer.begin(2.0 * platform_count + 4.0);

    let version_dir = config.version_dir();
    let mut orchestrator = BuildOrchestrator::new(config);
    if let Some(cancel) = options.cancel {
        orchestrator = orchestrator.with_cancellation(cancel);
    }
    let target = BuildTarget {
        version_dir: &version_dir,
        version_id: &prepared.current.version_id,
        base_version_id: &prepared.current.base_version_id,
    };
    let platforms = orchestrator.build_all(&prepared.changed, &target, observer).await;

    let mut summary = ExportSummary {
        version_dir,
        prepared,
        platforms,
        artifacts: Vec::new(),
    };
    let builds = summary.builds();
    summary.artifacts = ArtifactWriter::new(config, observer).write_all(
        &summary.prepared.changed,
        &summary.prepared.current,
        &builds,
    );

    info!(
        built = builds.len(),
        platforms = summary.platforms.len(),
        artifacts = summary.artifacts.iter().filter(|a| a.written()).count(),
        "export finished"
    );
    Ok(summary)
}
