use anyhow::{bail, Context, Result};
use rayon::prelude::*;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::PatchExportConfig;
use crate::error::PatchError;
use crate::snapshot::{AssetDependencyGraph, AssetRecord};
use crate::util::{self, PackageFile};

/// Source of the current version's dependency graph.
pub trait AssetGraphProvider {
    /// Graph of every asset selected by the config's filters.
    fn current_graph(&self, config: &PatchExportConfig) -> Result<AssetDependencyGraph, PatchError>;
}

/// `true` when `path` is `filter` itself or lies below it.
pub fn matches_filter(path: &str, filter: &str) -> bool {
    let filter = filter.trim_end_matches('/');
    if filter.is_empty() {
        return true;
    }
    path == filter
        || path
            .strip_prefix(filter)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Apply include/ignore prefixes and the referenced-only switch to a full scan.
pub fn filter_graph(graph: &AssetDependencyGraph, config: &PatchExportConfig) -> AssetDependencyGraph {
    graph
        .records()
        .filter(|r| {
            config
                .asset_include_filters
                .iter()
                .any(|f| matches_filter(&r.path, f))
        })
        .filter(|r| {
            !config
                .asset_ignore_filters
                .iter()
                .any(|f| matches_filter(&r.path, f))
        })
        .filter(|r| !config.include_has_ref_assets_only || r.has_referencers)
        .cloned()
        .collect()
}

/// Mark every record that some other record depends on.
pub fn mark_referencers(graph: &mut [AssetRecord]) {
    let referenced: BTreeSet<String> = graph
        .iter()
        .flat_map(|r| r.dependencies.iter().filter(|d| **d != r.path).cloned())
        .collect();
    for record in graph.iter_mut() {
        record.has_referencers = referenced.contains(&record.path);
    }
}

#[derive(Debug, Default, Deserialize)]
struct DependencyEntry {
    #[serde(rename = "type", default)]
    asset_type: Option<String>,
    #[serde(default)]
    dependencies: Vec<String>,
}

fn load_dependency_manifest(path: &Path) -> Result<BTreeMap<String, DependencyEntry>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read dependency manifest: {}", path.display()))?;
    serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse dependency manifest: {}", path.display()))
}

/// Turn `Maps/Arena.umap` into `/Game/Maps/Arena`.
fn package_path(relative_path: &str) -> String {
    let stem = relative_path
        .rsplit_once('.')
        .map_or(relative_path, |(stem, _)| stem);
    format!("/Game/{stem}")
}

/// `Hero.uasset` and `Hero.umap` side by side would share one package path.
fn reject_package_collisions(files: &[PackageFile], records: &[AssetRecord]) -> Result<()> {
    let mut seen: BTreeMap<&str, &str> = BTreeMap::new();
    for (file, record) in files.iter().zip(records) {
        if let Some(first) = seen.insert(&record.path, &file.relative_path) {
            bail!(
                "{first} and {} both map to package {}",
                file.relative_path,
                record.path
            );
        }
    }
    Ok(())
}

fn default_asset_type(extension: &str) -> &'static str {
    if extension == "umap" {
        "World"
    } else {
        "Asset"
    }
}

/// Scans `<project_dir>/Content` and fingerprints each package with BLAKE3.
///
/// Dependency edges and asset types come from the dependency manifest when one
/// is configured; packages missing from it get a type derived from their
/// extension and no dependencies.
#[derive(Debug, Clone, Default)]
pub struct ContentDirProvider;

impl ContentDirProvider {
    pub fn new() -> Self {
        Self
    }

    fn scan(&self, content_dir: &Path, manifest: Option<&Path>) -> Result<Vec<AssetRecord>> {
        let files = util::walk_packages(content_dir)?;
        let deps = match manifest {
            Some(path) => load_dependency_manifest(path)?,
            None => BTreeMap::new(),
        };
        debug!(
            packages = files.len(),
            manifest_entries = deps.len(),
            "scanned content directory"
        );

        let mut records = files
            .par_iter()
            .map(|file| -> Result<AssetRecord> {
                let signature = if file.size == 0 {
                    util::hash_bytes_hex(&[])
                } else {
                    let mmap = util::mmap_file(&file.full_path)?;
                    util::hash_bytes_hex(&mmap)
                };
                let path = package_path(&file.relative_path);
                let entry = deps.get(&path);
                let asset_type = entry
                    .and_then(|e| e.asset_type.clone())
                    .unwrap_or_else(|| default_asset_type(&file.extension).to_string());
                let dependencies = entry
                    .map(|e| e.dependencies.clone())
                    .unwrap_or_default();
                Ok(AssetRecord::new(path, asset_type, signature).with_dependencies(dependencies))
            })
            .collect::<Result<Vec<_>>>()?;

        reject_package_collisions(&files, &records)?;
        mark_referencers(&mut records);
        Ok(records)
    }
}

impl AssetGraphProvider for ContentDirProvider {
    fn current_graph(&self, config: &PatchExportConfig) -> Result<AssetDependencyGraph, PatchError> {
        let content_dir: PathBuf = config.project_dir.join("Content");
        let manifest = config.resolved_dependency_manifest();

        let records = self
            .scan(&content_dir, manifest.as_deref())
            .map_err(|e| PatchError::Provider(format!("{e:#}")))?;
        let total = records.len();
        let graph = filter_graph(&records.into_iter().collect(), config);

        info!(
            scanned = total,
            selected = graph.len(),
            "collected current asset graph"
        );
        Ok(graph)
    }
}
