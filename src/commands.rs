use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::{AuxiliaryFiles, ExternFile, PatchExportConfig};
use crate::platform::Platform;
use crate::snapshot::{AssetDependencyGraph, AssetRecord};
use crate::util::to_forward_slashes;

/// Mount point prefix the engine resolves relative to its binaries.
const MOUNT_ROOT: &str = "../../../";

/// A single `"<source>" "<mount>"` line of a command file.
pub fn file_command(source: &str, mount: &str) -> String {
    format!("\"{source}\" \"{mount}\"")
}

/// Where cooked files for a project live and where they mount inside a pak.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookLayout {
    pub project_dir: PathBuf,
    pub project_name: String,
}

impl CookLayout {
    pub fn new(project_dir: impl Into<PathBuf>, project_name: impl Into<String>) -> Self {
        Self {
            project_dir: project_dir.into(),
            project_name: project_name.into(),
        }
    }

    /// `<project_dir>/Saved/Cooked/<Platform>`
    pub fn cooked_platform_dir(&self, platform: Platform) -> PathBuf {
        self.project_dir.join("Saved").join("Cooked").join(platform.name())
    }

    /// Path of `record` relative to the cooked platform dir, which is also
    /// its mount path below `../../../`.
    pub fn cooked_relative_path(&self, record: &AssetRecord) -> String {
        let ext = if record.asset_type == "World" { "umap" } else { "uasset" };
        let trimmed = record.path.trim_start_matches('/');
        let (root, rest) = trimmed.split_once('/').unwrap_or((trimmed, ""));
        match root {
            "Game" => format!("{}/Content/{rest}.{ext}", self.project_name),
            "Engine" => format!("Engine/Content/{rest}.{ext}"),
            plugin => format!("{}/Plugins/{plugin}/Content/{rest}.{ext}", self.project_name),
        }
    }

    pub fn asset_command(&self, record: &AssetRecord, platform: Platform) -> String {
        let relative = self.cooked_relative_path(record);
        let source = self.cooked_platform_dir(platform).join(&relative);
        file_command(&to_forward_slashes(&source), &format!("{MOUNT_ROOT}{relative}"))
    }

    fn cooked_command(&self, platform: Platform, relative: &str) -> String {
        let source = self.cooked_platform_dir(platform).join(relative);
        file_command(&to_forward_slashes(&source), &format!("{MOUNT_ROOT}{relative}"))
    }

    /// Project configuration, global shader cache, asset registry: in that order.
    pub fn auxiliary_commands(&self, platform: Platform, aux: &AuxiliaryFiles) -> Vec<String> {
        let mut commands = Vec::new();

        if aux.include_project_ini {
            let config_dir = self.project_dir.join("Config");
            for ini in &aux.project_ini_files {
                let source = config_dir.join(ini);
                let mount = format!("{MOUNT_ROOT}{}/Config/{ini}", self.project_name);
                commands.push(file_command(&to_forward_slashes(&source), &mount));
            }
        }

        if aux.include_global_shader_cache {
            for format in platform.shader_formats() {
                commands.push(self.cooked_command(platform, &format!("Engine/GlobalShaderCache-{format}.bin")));
            }
        }

        if aux.include_asset_registry {
            commands.push(self.cooked_command(platform, &format!("{}/AssetRegistry.bin", self.project_name)));
        }

        commands
    }
}

/// Commands for the config's loose extern files, in config order.
pub fn extern_file_commands(files: &[ExternFile]) -> Vec<String> {
    files
        .iter()
        .map(|f| file_command(&to_forward_slashes(&f.file_path), &f.mount_path))
        .collect()
}

/// Builds the per-platform command list fed to the archiver.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    layout: CookLayout,
    auxiliary: AuxiliaryFiles,
}

impl CommandGenerator {
    pub fn new(layout: CookLayout, auxiliary: AuxiliaryFiles) -> Self {
        Self { layout, auxiliary }
    }

    pub fn from_config(config: &PatchExportConfig) -> Self {
        Self::new(
            CookLayout::new(&config.project_dir, &config.project_name),
            config.auxiliary.clone(),
        )
    }

    /// One command per asset in path order, then the platform's auxiliary
    /// commands, then `extern_commands`. Exact duplicates keep their first position.
    pub fn generate(
        &self,
        graph: &AssetDependencyGraph,
        platform: Platform,
        extern_commands: &[String],
    ) -> Vec<String> {
        let assets = graph.records().map(|r| self.layout.asset_command(r, platform));
        let auxiliary = self.layout.auxiliary_commands(platform, &self.auxiliary);

        let mut seen = HashSet::new();
        assets
            .chain(auxiliary)
            .chain(extern_commands.iter().cloned())
            .filter(|c| seen.insert(c.clone()))
            .collect()
    }
}

/// Command file body: one command per line, UTF-8 without BOM.
pub fn render_command_file(commands: &[String]) -> String {
    let mut body = commands.join("\n");
    if !body.is_empty() {
        body.push('\n');
    }
    body
}

/// `PakList_<base>_<version>_<platform>_PakCommands.txt`
pub fn command_file_name(base_version_id: &str, version_id: &str, platform: Platform) -> String {
    format!("PakList_{base_version_id}_{version_id}_{platform}_PakCommands.txt")
}

/// `<version>_<platform>_P.<ext>`
pub fn archive_file_name(version_id: &str, platform: Platform, extension: &str) -> String {
    format!("{version_id}_{platform}_P.{extension}")
}

/// `<version_dir>/<platform>`
pub fn platform_dir(version_dir: &Path, platform: Platform) -> PathBuf {
    version_dir.join(platform.name())
}
