#![cfg(unix)]

use chrono::{TimeZone, Utc};
use hotpatcher::build::{BuildFailure, PlatformState};
use hotpatcher::config::{ArchiverConfig, AuxiliaryFiles, ExternFile, PatchExportConfig};
use hotpatcher::observer::{NullObserver, RecordingObserver};
use hotpatcher::pipeline::{self, ExportOptions};
use hotpatcher::provider::{AssetGraphProvider, ContentDirProvider};
use hotpatcher::{AssetDependencyGraph, AssetRecord, PatchError, Platform, VersionSnapshot};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

/// Archiver stand-in: copies the command list into the archive.
const COPY_ARCHIVER: &str = r#"
out="$1"
list="${2#-create=}"
cp "$list" "$out"
"#;

/// Hands the pipeline a fixed graph instead of scanning a project.
struct FixedProvider(AssetDependencyGraph);

impl AssetGraphProvider for FixedProvider {
    fn current_graph(&self, _config: &PatchExportConfig) -> Result<AssetDependencyGraph, PatchError> {
        Ok(self.0.clone())
    }
}

fn graph(records: &[(&str, &str)]) -> AssetDependencyGraph {
    records
        .iter()
        .map(|(path, sig)| AssetRecord::new(*path, "StaticMesh", *sig))
        .collect()
}

fn created_at() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap()
}

fn options() -> ExportOptions {
    ExportOptions {
        created_at: created_at(),
        cancel: None,
    }
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    path
}

fn write_base(dir: &Path, graph: AssetDependencyGraph) -> PathBuf {
    let base = VersionSnapshot::new("1.0", "", created_at(), graph);
    let path = dir.join("1.0_Release.json");
    fs::write(&path, base.to_json_pretty().unwrap()).unwrap();
    path
}

fn config(temp: &TempDir, script: &Path, platforms: &[Platform]) -> PatchExportConfig {
    PatchExportConfig {
        version_id: "1.1".into(),
        by_base_version: false,
        base_version: None,
        project_dir: temp.path().join("Shooter"),
        project_name: "Shooter".into(),
        dependency_manifest: None,
        asset_include_filters: vec!["/Game".into()],
        asset_ignore_filters: Vec::new(),
        include_has_ref_assets_only: false,
        auxiliary: AuxiliaryFiles::default(),
        add_extern_files: Vec::new(),
        pak_target_platforms: platforms.to_vec(),
        archiver: ArchiverConfig {
            binary: PathBuf::from("/bin/sh"),
            leading_args: vec![script.to_string_lossy().into_owned()],
            ..ArchiverConfig::default()
        },
        save_path: temp.path().join("Patches"),
        save_pak_list: false,
        save_diff_analysis: true,
        save_release_manifest: true,
        save_pak_files_info: true,
        save_patch_config: true,
    }
}

#[tokio::test]
async fn export_builds_every_platform_and_writes_manifests() {
    let temp = TempDir::new().unwrap();
    let script = write_script(temp.path(), "archiver.sh", COPY_ARCHIVER);
    let mut cfg = config(&temp, &script, &[Platform::WindowsNoEditor, Platform::AndroidAstc]);
    cfg.by_base_version = true;
    cfg.base_version = Some(write_base(temp.path(), graph(&[("/Game/foo", "v1")])));

    let provider = FixedProvider(graph(&[("/Game/foo", "v2"), ("/Game/bar", "v1")]));
    let observer = RecordingObserver::default();
    let summary = pipeline::run_export(&cfg, &provider, &observer, options()).await.unwrap();

    let diff = &summary.prepared.diff;
    assert_eq!(diff.added.paths().collect::<Vec<_>>(), vec!["/Game/bar"]);
    assert_eq!(diff.modified.paths().collect::<Vec<_>>(), vec!["/Game/foo"]);
    assert!(diff.deleted.is_empty());

    assert!(summary.is_complete_success());
    for outcome in &summary.platforms {
        assert_eq!(
            outcome.states,
            vec![
                PlatformState::Pending,
                PlatformState::CommandsWritten,
                PlatformState::ArchiveBuilding,
                PlatformState::ArchiveVerified,
            ]
        );
        let build = outcome.result.as_ref().unwrap();
        let bytes = fs::read(&build.archive_path).unwrap();
        assert_eq!(build.file_size, bytes.len() as u64);
        assert_eq!(build.hash, blake3::hash(&bytes).to_hex().to_string());
        // Command list is transient unless save_pak_list is set.
        assert!(!outcome.command_file.exists());
    }

    let version_dir = temp.path().join("Patches/1.1");
    let pak = version_dir.join("WindowsNoEditor/1.1_WindowsNoEditor_P.pak");
    let packed = fs::read_to_string(&pak).unwrap();
    let lines: Vec<_> = packed.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("/Shooter/Content/bar.uasset"));
    assert!(lines[1].contains("/Shooter/Content/foo.uasset"));

    assert!(version_dir.join("1.0_1.1_Diff.json").is_file());
    assert!(version_dir.join("1.1_PatchConfig.json").is_file());

    let release = VersionSnapshot::load(&version_dir.join("1.1_Release.json")).unwrap();
    assert_eq!(release.base_version_id, "1.0");
    assert_eq!(release.asset_dependencies.len(), 2);

    let info: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(version_dir.join("1.1_PakFilesInfo.json")).unwrap()).unwrap();
    assert_eq!(info.as_object().unwrap().len(), 2);
    assert!(info["Android_ASTC"]["hash"].is_string());

    assert_eq!(observer.events()[0], hotpatcher::observer::ObservedEvent::Begin(8.0));
    assert_eq!(observer.work_done(), 8.0);
}

#[tokio::test]
async fn missing_archive_fails_only_that_platform() {
    let temp = TempDir::new().unwrap();
    let script = write_script(
        temp.path(),
        "archiver.sh",
        &format!("case \"$1\" in *Android*) exit 0;; esac\n{COPY_ARCHIVER}"),
    );
    let cfg = config(
        &temp,
        &script,
        &[Platform::AndroidAstc, Platform::WindowsNoEditor, Platform::AndroidEtc2],
    );
    let provider = FixedProvider(graph(&[("/Game/foo", "v1")]));
    let observer = RecordingObserver::default();

    let summary = pipeline::run_export(&cfg, &provider, &observer, options()).await.unwrap();

    let states: Vec<_> = summary.platforms.iter().map(|o| (o.platform, o.state())).collect();
    assert_eq!(
        states,
        vec![
            (Platform::AndroidAstc, PlatformState::ArchiveFailed),
            (Platform::WindowsNoEditor, PlatformState::ArchiveVerified),
            (Platform::AndroidEtc2, PlatformState::ArchiveFailed),
        ]
    );
    assert!(matches!(
        summary.platforms[0].failure,
        Some(BuildFailure::ArchiveMissing { .. })
    ));
    assert_eq!(summary.platform_errors().len(), 2);
    assert!(!summary.is_complete_success());

    // Failed platforms are omitted from the pak info, not zero-filled.
    let info: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(summary.version_dir.join("1.1_PakFilesInfo.json")).unwrap(),
    )
    .unwrap();
    let keys: Vec<_> = info.as_object().unwrap().keys().cloned().collect();
    assert_eq!(keys, vec!["WindowsNoEditor".to_string()]);

    // Cleanup ran for the failed platforms too.
    assert!(summary.platforms.iter().all(|o| !o.command_file.exists()));
    assert!(summary.artifact_errors().is_empty());
    assert_eq!(observer.work_done(), 10.0);
}

#[tokio::test]
async fn missing_base_version_aborts_before_any_output() {
    let temp = TempDir::new().unwrap();
    let script = write_script(temp.path(), "archiver.sh", COPY_ARCHIVER);
    let mut cfg = config(&temp, &script, &[Platform::WindowsNoEditor]);
    cfg.by_base_version = true;
    cfg.base_version = Some(temp.path().join("0.9_Release.json"));

    let observer = RecordingObserver::default();
    let err = pipeline::run_export(&cfg, &FixedProvider(graph(&[("/Game/a", "1")])), &observer, options())
        .await
        .unwrap_err();

    assert!(matches!(err, PatchError::BaseVersionUnreadable { .. }));
    assert!(!cfg.save_path.exists());
    assert!(observer.events().is_empty());
}

#[tokio::test]
async fn unparseable_base_version_aborts_before_any_output() {
    let temp = TempDir::new().unwrap();
    let script = write_script(temp.path(), "archiver.sh", COPY_ARCHIVER);
    let base = temp.path().join("1.0_Release.json");
    fs::write(&base, "{ \"versionId\": ").unwrap();
    let mut cfg = config(&temp, &script, &[Platform::WindowsNoEditor]);
    cfg.by_base_version = true;
    cfg.base_version = Some(base);

    let err = pipeline::run_export(&cfg, &FixedProvider(graph(&[("/Game/a", "1")])), &NullObserver, options())
        .await
        .unwrap_err();
    assert!(matches!(err, PatchError::BaseVersionUnreadable { .. }));
    assert!(!cfg.save_path.exists());
}

#[tokio::test]
async fn invalid_config_aborts_before_any_output() {
    let temp = TempDir::new().unwrap();
    let script = write_script(temp.path(), "archiver.sh", COPY_ARCHIVER);
    let mut cfg = config(&temp, &script, &[Platform::WindowsNoEditor]);
    cfg.version_id.clear();

    let err = pipeline::run_export(&cfg, &FixedProvider(graph(&[("/Game/a", "1")])), &NullObserver, options())
        .await
        .unwrap_err();
    assert!(matches!(err, PatchError::ConfigInvalid(_)));
    assert!(!cfg.save_path.exists());
}

#[tokio::test]
async fn dot_version_id_never_leaves_save_path() {
    let temp = TempDir::new().unwrap();
    let script = write_script(temp.path(), "archiver.sh", COPY_ARCHIVER);
    let provider = FixedProvider(graph(&[("/Game/a", "1")]));

    for id in ["..", ".", "1.1 "] {
        let mut cfg = config(&temp, &script, &[Platform::WindowsNoEditor]);
        cfg.version_id = id.into();
        let err = pipeline::run_export(&cfg, &provider, &NullObserver, options())
            .await
            .unwrap_err();
        assert!(matches!(err, PatchError::ConfigInvalid(_)), "{id:?}: {err}");
        assert!(!cfg.save_path.exists());
    }
    let escaped: Vec<_> = fs::read_dir(temp.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .filter(|name| name.to_string_lossy().ends_with(".json"))
        .collect();
    assert!(escaped.is_empty(), "{escaped:?}");
}

#[tokio::test]
async fn base_version_id_with_separators_aborts_before_any_output() {
    let temp = TempDir::new().unwrap();
    let script = write_script(temp.path(), "archiver.sh", COPY_ARCHIVER);
    let base = VersionSnapshot::new("../../../evil", "", created_at(), graph(&[("/Game/a", "1")]));
    let base_path = temp.path().join("evil_Release.json");
    fs::write(&base_path, base.to_json_pretty().unwrap()).unwrap();

    let mut cfg = config(&temp, &script, &[Platform::WindowsNoEditor]);
    cfg.by_base_version = true;
    cfg.base_version = Some(base_path);

    let err = pipeline::run_export(&cfg, &FixedProvider(graph(&[("/Game/a", "2")])), &NullObserver, options())
        .await
        .unwrap_err();
    match err {
        PatchError::BaseVersionUnreadable { reason, .. } => assert!(reason.contains("versionId"), "{reason}"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!cfg.save_path.exists());
    assert!(!temp.path().join("evil_1.1_Diff.json").exists());
}

#[tokio::test]
async fn repeated_platform_is_built_once() {
    let temp = TempDir::new().unwrap();
    let script = write_script(temp.path(), "archiver.sh", COPY_ARCHIVER);
    let cfg = config(
        &temp,
        &script,
        &[Platform::WindowsNoEditor, Platform::Ios, Platform::WindowsNoEditor],
    );
    let observer = RecordingObserver::default();

    let summary = pipeline::run_export(&cfg, &FixedProvider(graph(&[("/Game/a", "1")])), &observer, options())
        .await
        .unwrap();

    let platforms: Vec<_> = summary.platforms.iter().map(|o| o.platform).collect();
    assert_eq!(platforms, vec![Platform::WindowsNoEditor, Platform::Ios]);
    assert!(summary.is_complete_success());
    assert_eq!(summary.builds().len(), 2);
    assert_eq!(observer.events()[0], hotpatcher::observer::ObservedEvent::Begin(8.0));
    assert_eq!(observer.work_done(), 8.0);
}

#[tokio::test]
async fn repeated_export_is_byte_identical() {
    let temp = TempDir::new().unwrap();
    let script = write_script(temp.path(), "archiver.sh", COPY_ARCHIVER);
    let mut cfg = config(&temp, &script, &[Platform::LinuxNoEditor, Platform::Ios]);
    cfg.save_pak_list = true;
    cfg.auxiliary = AuxiliaryFiles {
        include_project_ini: true,
        include_global_shader_cache: true,
        include_asset_registry: true,
        ..AuxiliaryFiles::default()
    };
    cfg.add_extern_files = vec![ExternFile {
        file_path: temp.path().join("Extras/Credits.txt"),
        mount_path: "../../../Shooter/Extras/Credits.txt".into(),
    }];
    let provider = FixedProvider(graph(&[("/Game/z", "1"), ("/Game/a", "2"), ("/Engine/m", "3")]));

    let collect = |summary: &pipeline::ExportSummary| -> Vec<(PathBuf, Vec<u8>)> {
        let mut files: Vec<PathBuf> = summary.platforms.iter().map(|o| o.command_file.clone()).collect();
        files.push(summary.version_dir.join("1.1_Release.json"));
        files.push(summary.version_dir.join("1.1_PakFilesInfo.json"));
        files.push(summary.version_dir.join("_1.1_Diff.json"));
        files.push(summary.version_dir.join("1.1_PatchConfig.json"));
        files.into_iter().map(|f| (f.clone(), fs::read(&f).unwrap())).collect()
    };

    let first = pipeline::run_export(&cfg, &provider, &NullObserver, options()).await.unwrap();
    let first_files = collect(&first);
    let second = pipeline::run_export(&cfg, &provider, &NullObserver, options()).await.unwrap();
    let second_files = collect(&second);

    assert_eq!(first_files, second_files);

    let commands = String::from_utf8(first_files[0].1.clone()).unwrap();
    let lines: Vec<_> = commands.lines().collect();
    assert!(lines[0].contains("Engine/Content/m.uasset"));
    assert!(lines[1].contains("Shooter/Content/a.uasset"));
    assert!(lines[2].contains("Shooter/Content/z.uasset"));
    assert!(lines[3].contains("Config/DefaultEngine.ini"));
    assert!(lines.iter().any(|l| l.contains("GlobalShaderCache-SF_VULKAN_SM5.bin")));
    assert!(lines[lines.len() - 2].contains("AssetRegistry.bin"));
    assert!(lines[lines.len() - 1].ends_with("\"../../../Shooter/Extras/Credits.txt\""));
    assert!(first.platforms[0]
        .command_file
        .ends_with("LinuxNoEditor/PakList__1.1_LinuxNoEditor_PakCommands.txt"));
}

#[tokio::test]
async fn exit_status_is_checked_only_when_required() {
    let temp = TempDir::new().unwrap();
    let script = write_script(temp.path(), "archiver.sh", &format!("{COPY_ARCHIVER}\nexit 2\n"));
    let mut cfg = config(&temp, &script, &[Platform::MacNoEditor]);
    let provider = FixedProvider(graph(&[("/Game/a", "1")]));

    let lenient = pipeline::run_export(&cfg, &provider, &NullObserver, options()).await.unwrap();
    assert!(lenient.platforms[0].succeeded());

    cfg.archiver.require_success_exit = true;
    let strict = pipeline::run_export(&cfg, &provider, &NullObserver, options()).await.unwrap();
    assert_eq!(strict.platforms[0].state(), PlatformState::ArchiveFailed);
    assert!(matches!(strict.platforms[0].failure, Some(BuildFailure::ExitStatus(_))));
}

#[tokio::test]
async fn stale_archive_from_previous_run_is_not_trusted() {
    let temp = TempDir::new().unwrap();
    let good = write_script(temp.path(), "good.sh", COPY_ARCHIVER);
    let silent = write_script(temp.path(), "silent.sh", "exit 0\n");
    let provider = FixedProvider(graph(&[("/Game/a", "1")]));

    let cfg = config(&temp, &good, &[Platform::WindowsNoEditor]);
    let first = pipeline::run_export(&cfg, &provider, &NullObserver, options()).await.unwrap();
    assert!(first.platforms[0].succeeded());

    let cfg = config(&temp, &silent, &[Platform::WindowsNoEditor]);
    let second = pipeline::run_export(&cfg, &provider, &NullObserver, options()).await.unwrap();
    assert_eq!(second.platforms[0].state(), PlatformState::ArchiveFailed);
    assert!(!second.platforms[0].archive_path.exists());
}

#[tokio::test]
async fn archiver_is_killed_after_timeout() {
    let temp = TempDir::new().unwrap();
    let script = write_script(temp.path(), "slow.sh", "sleep 30\n");
    let mut cfg = config(&temp, &script, &[Platform::WindowsServer]);
    cfg.archiver.timeout_secs = Some(1);

    let started = std::time::Instant::now();
    let summary = pipeline::run_export(&cfg, &FixedProvider(graph(&[("/Game/a", "1")])), &NullObserver, options())
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(20));
    assert_eq!(summary.platforms[0].failure, Some(BuildFailure::TimedOut(1)));
    assert_eq!(
        summary.platforms[0].states.last(),
        Some(&PlatformState::ArchiveFailed)
    );
}

#[tokio::test]
async fn cancelled_export_skips_remaining_platforms() {
    let temp = TempDir::new().unwrap();
    let script = write_script(temp.path(), "archiver.sh", COPY_ARCHIVER);
    let cfg = config(&temp, &script, &[Platform::WindowsNoEditor, Platform::Ios]);
    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();

    let summary = pipeline::run_export(
        &cfg,
        &FixedProvider(graph(&[("/Game/a", "1")])),
        &NullObserver,
        ExportOptions {
            created_at: created_at(),
            cancel: Some(rx),
        },
    )
    .await
    .unwrap();

    for outcome in &summary.platforms {
        assert_eq!(outcome.states, vec![PlatformState::Pending, PlatformState::ArchiveFailed]);
        assert_eq!(outcome.failure, Some(BuildFailure::Cancelled));
    }
    // Version artifacts are still written for a cancelled run.
    assert!(summary.version_dir.join("1.1_Release.json").is_file());
}

#[tokio::test]
async fn cancel_kills_running_archiver() {
    let temp = TempDir::new().unwrap();
    let script = write_script(temp.path(), "slow.sh", "touch \"$1.started\"\nsleep 30\n");
    let cfg = config(&temp, &script, &[Platform::WindowsNoEditor, Platform::Ios]);
    let started_marker = cfg
        .version_dir()
        .join("WindowsNoEditor/1.1_WindowsNoEditor_P.pak.started");
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        while !started_marker.exists() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let _ = tx.send(true);
    });

    let started = std::time::Instant::now();
    let summary = pipeline::run_export(
        &cfg,
        &FixedProvider(graph(&[("/Game/a", "1")])),
        &NullObserver,
        ExportOptions {
            created_at: created_at(),
            cancel: Some(rx),
        },
    )
    .await
    .unwrap();

    assert!(started.elapsed() < Duration::from_secs(20));
    let first = &summary.platforms[0];
    assert_eq!(
        first.states,
        vec![
            PlatformState::Pending,
            PlatformState::CommandsWritten,
            PlatformState::ArchiveBuilding,
            PlatformState::ArchiveFailed,
        ]
    );
    assert_eq!(first.failure, Some(BuildFailure::Cancelled));
    assert!(!first.command_file.exists());

    let second = &summary.platforms[1];
    assert_eq!(second.states, vec![PlatformState::Pending, PlatformState::ArchiveFailed]);
    assert_eq!(second.failure, Some(BuildFailure::Cancelled));
}

#[tokio::test]
async fn unwritable_platform_dir_fails_only_that_platform() {
    let temp = TempDir::new().unwrap();
    let script = write_script(temp.path(), "archiver.sh", COPY_ARCHIVER);
    let cfg = config(&temp, &script, &[Platform::LinuxServer, Platform::LinuxNoEditor]);
    fs::create_dir_all(cfg.version_dir()).unwrap();
    fs::write(cfg.version_dir().join("LinuxServer"), b"not a directory").unwrap();

    let summary = pipeline::run_export(&cfg, &FixedProvider(graph(&[("/Game/a", "1")])), &NullObserver, options())
        .await
        .unwrap();

    assert!(matches!(
        summary.platforms[0].failure,
        Some(BuildFailure::CommandFile { .. })
    ));
    assert_eq!(
        summary.platforms[0].states,
        vec![PlatformState::Pending, PlatformState::ArchiveFailed]
    );
    assert!(summary.platforms[1].succeeded());
}

#[tokio::test]
async fn content_directory_export_round_trips_into_next_base() {
    let temp = TempDir::new().unwrap();
    let script = write_script(temp.path(), "archiver.sh", COPY_ARCHIVER);
    let mut cfg = config(&temp, &script, &[Platform::WindowsNoEditor]);
    let content = cfg.project_dir.join("Content");
    fs::create_dir_all(content.join("Maps")).unwrap();
    fs::write(content.join("Maps/Arena.umap"), b"arena v1").unwrap();
    fs::write(content.join("Hero.uasset"), b"hero v1").unwrap();

    cfg.version_id = "1.0".into();
    let first = pipeline::run_export(&cfg, &ContentDirProvider::new(), &NullObserver, options())
        .await
        .unwrap();
    assert_eq!(first.prepared.diff.added.len(), 2);
    let release = first.version_dir.join("1.0_Release.json");

    fs::write(content.join("Hero.uasset"), b"hero v2").unwrap();
    fs::write(content.join("Villain.uasset"), b"villain").unwrap();
    fs::remove_file(content.join("Maps/Arena.umap")).unwrap();

    cfg.version_id = "1.1".into();
    cfg.by_base_version = true;
    cfg.base_version = Some(release);
    let second = pipeline::run_export(&cfg, &ContentDirProvider::new(), &NullObserver, options())
        .await
        .unwrap();

    let diff = &second.prepared.diff;
    assert_eq!(diff.added.paths().collect::<Vec<_>>(), vec!["/Game/Villain"]);
    assert_eq!(diff.modified.paths().collect::<Vec<_>>(), vec!["/Game/Hero"]);
    assert_eq!(diff.deleted.paths().collect::<Vec<_>>(), vec!["/Game/Maps/Arena"]);
    assert!(second
        .version_dir
        .join("WindowsNoEditor/1.1_WindowsNoEditor_P.pak")
        .is_file());
}
