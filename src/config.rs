use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::PatchError;
use crate::platform::Platform;
use tracing::warn;

fn default_true() -> bool {
    true
}

fn default_archive_extension() -> String {
    "pak".to_string()
}

fn default_project_ini_files() -> Vec<String> {
    vec![
        "DefaultEngine.ini".to_string(),
        "DefaultGame.ini".to_string(),
        "DefaultInput.ini".to_string(),
    ]
}

/// Checks that `id` names exactly one directory below the output root.
/// The error is the reason, phrased to follow the field name.
pub fn check_version_id(id: &str) -> Result<(), String> {
    if id.trim().is_empty() {
        return Err("is empty".into());
    }
    if id.trim() != id {
        return Err(format!("{id:?} has leading or trailing whitespace"));
    }
    if id == "." || id == ".." {
        return Err(format!("{id:?} is not a directory name"));
    }
    if id.contains(['/', '\\']) {
        return Err(format!("{id:?} must not contain path separators"));
    }
    Ok(())
}

/// A loose file packed alongside the assets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternFile {
    pub file_path: PathBuf,
    /// Mount path inside the pak, e.g. `../../../Game/Content/Movies/Intro.mp4`.
    pub mount_path: String,
}

/// Cooked files that are not assets but ship with every patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuxiliaryFiles {
    pub include_project_ini: bool,
    /// File names under `<project_dir>/Config`.
    pub project_ini_files: Vec<String>,
    pub include_global_shader_cache: bool,
    pub include_asset_registry: bool,
}

impl Default for AuxiliaryFiles {
    fn default() -> Self {
        Self {
            include_project_ini: false,
            project_ini_files: default_project_ini_files(),
            include_global_shader_cache: false,
            include_asset_registry: false,
        }
    }
}

/// How the archiver binary is launched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiverConfig {
    pub binary: PathBuf,
    /// Arguments placed before the archive path, e.g. a script when `binary` is an interpreter.
    #[serde(default)]
    pub leading_args: Vec<String>,
    /// Extra switches appended after `-create=`, e.g. `-compress`.
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default = "default_archive_extension")]
    pub archive_extension: String,
    /// Kill the archiver after this many seconds. No limit when unset.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Also require a zero exit status, not just the archive on disk.
    #[serde(default)]
    pub require_success_exit: bool,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("UnrealPak"),
            leading_args: Vec::new(),
            options: Vec::new(),
            archive_extension: default_archive_extension(),
            timeout_secs: None,
            require_success_exit: false,
        }
    }
}

/// Everything one diff or export run needs. Read-only for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchExportConfig {
    pub version_id: String,
    #[serde(default)]
    pub by_base_version: bool,
    #[serde(default)]
    pub base_version: Option<PathBuf>,

    pub project_dir: PathBuf,
    pub project_name: String,
    /// JSON map of package path -> `{ "type", "dependencies" }`.
    /// Defaults to `<project_dir>/AssetDependencies.json` when that file exists.
    #[serde(default)]
    pub dependency_manifest: Option<PathBuf>,

    #[serde(default)]
    pub asset_include_filters: Vec<String>,
    #[serde(default)]
    pub asset_ignore_filters: Vec<String>,
    #[serde(default)]
    pub include_has_ref_assets_only: bool,

    #[serde(default)]
    pub auxiliary: AuxiliaryFiles,
    #[serde(default)]
    pub add_extern_files: Vec<ExternFile>,

    #[serde(default)]
    pub pak_target_platforms: Vec<Platform>,
    #[serde(default)]
    pub archiver: ArchiverConfig,

    pub save_path: PathBuf,
    #[serde(default)]
    pub save_pak_list: bool,
    #[serde(default)]
    pub save_diff_analysis: bool,
    #[serde(default = "default_true")]
    pub save_release_manifest: bool,
    #[serde(default = "default_true")]
    pub save_pak_files_info: bool,
    #[serde(default)]
    pub save_patch_config: bool,
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub version_id: Option<String>,
    pub base_version: Option<PathBuf>,
    pub save_path: Option<PathBuf>,
    pub platforms: Vec<Platform>,
}

impl PatchExportConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse patch config")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read patch config: {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("Invalid patch config: {}", path.display()))
    }

    pub fn apply_overrides(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(version_id) = overrides.version_id {
            self.version_id = version_id;
        }
        if let Some(base) = overrides.base_version {
            self.by_base_version = true;
            self.base_version = Some(base);
        }
        if let Some(save_path) = overrides.save_path {
            self.save_path = save_path;
        }
        if !overrides.platforms.is_empty() {
            self.pak_target_platforms = overrides.platforms;
        }
        self
    }

    /// `<save_path>/<version_id>`: the root every artifact of this run lands in.
    pub fn version_dir(&self) -> PathBuf {
        self.save_path.join(&self.version_id)
    }

    /// `pak_target_platforms` with repeats dropped, first occurrence kept.
    pub fn target_platforms(&self) -> Vec<Platform> {
        let mut platforms = Vec::with_capacity(self.pak_target_platforms.len());
        for &platform in &self.pak_target_platforms {
            if !platforms.contains(&platform) {
                platforms.push(platform);
            }
        }
        platforms
    }

    pub fn resolved_dependency_manifest(&self) -> Option<PathBuf> {
        match &self.dependency_manifest {
            Some(path) => Some(path.clone()),
            None => {
                let default = self.project_dir.join("AssetDependencies.json");
                default.is_file().then_some(default)
            }
        }
    }

    fn base_version_path(&self) -> Option<&Path> {
        self.base_version
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }

    /// Structural checks shared by diff and export. Does not touch the filesystem.
    pub fn validate_for_export(&self) -> Result<(), PatchError> {
        check_version_id(&self.version_id)
            .map_err(|reason| PatchError::ConfigInvalid(format!("version_id {reason}")))?;
        if self.by_base_version && self.base_version_path().is_none() {
            return Err(PatchError::ConfigInvalid(
                "by_base_version is set but base_version is empty".into(),
            ));
        }
        if self.asset_include_filters.is_empty() && self.add_extern_files.is_empty() {
            return Err(PatchError::ConfigInvalid(
                "no asset include filters and no extern files".into(),
            ));
        }
        if self.save_path.as_os_str().is_empty() {
            return Err(PatchError::ConfigInvalid("save_path is empty".into()));
        }
        if self.project_name.trim().is_empty() {
            return Err(PatchError::ConfigInvalid("project_name is empty".into()));
        }
        if self.archiver.archive_extension.is_empty() {
            return Err(PatchError::ConfigInvalid("archiver.archive_extension is empty".into()));
        }
        if self.target_platforms().len() != self.pak_target_platforms.len() {
            warn!(platforms = ?self.pak_target_platforms, "duplicate target platforms are built once");
        }
        Ok(())
    }

    /// Diff needs a base to compare against and an asset filter to scan with.
    pub fn validate_for_diff(&self) -> Result<(), PatchError> {
        check_version_id(&self.version_id)
            .map_err(|reason| PatchError::ConfigInvalid(format!("version_id {reason}")))?;
        if self.base_version_path().is_none() {
            return Err(PatchError::ConfigInvalid("diff requires a base_version".into()));
        }
        if self.asset_include_filters.is_empty() {
            return Err(PatchError::ConfigInvalid("no asset include filters".into()));
        }
        Ok(())
    }

    fn base_file_present(&self, required: bool) -> bool {
        match self.base_version_path() {
            Some(path) => path.is_file(),
            None => !required,
        }
    }

    /// Whether the export action should be offered for this config.
    pub fn can_export(&self) -> bool {
        self.validate_for_export().is_ok() && self.base_file_present(self.by_base_version)
    }

    /// Whether the diff action should be offered for this config.
    pub fn can_diff(&self) -> bool {
        self.validate_for_diff().is_ok() && self.base_file_present(true)
    }
}
