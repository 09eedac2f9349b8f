use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::commands::{self, CommandGenerator};
use crate::config::{ArchiverConfig, PatchExportConfig};
use crate::error::PatchError;
use crate::observer::ExportObserver;
use crate::platform::Platform;
use crate::snapshot::AssetDependencyGraph;
use crate::util;

/// Per-platform build state. `ArchiveVerified` and `ArchiveFailed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformState {
    Pending,
    CommandsWritten,
    ArchiveBuilding,
    ArchiveVerified,
    ArchiveFailed,
}

impl PlatformState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PlatformState::ArchiveVerified | PlatformState::ArchiveFailed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildFailure {
    #[error("could not prepare {path}: {reason}")]
    CommandFile { path: PathBuf, reason: String },
    #[error("could not launch archiver: {0}")]
    Spawn(String),
    #[error("archiver exited ({status}) without producing {path}")]
    ArchiveMissing { path: PathBuf, status: String },
    #[error("archiver exited with {0}")]
    ExitStatus(String),
    #[error("archiver did not finish within {0}s")]
    TimedOut(u64),
    #[error("build cancelled")]
    Cancelled,
    #[error("could not read archive {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },
}

/// Metadata of a successfully built archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformBuildResult {
    pub platform: Platform,
    pub archive_path: PathBuf,
    pub file_size: u64,
    /// BLAKE3, lowercase hex.
    pub hash: String,
}

/// Everything that happened to one platform during a run.
#[derive(Debug, Clone)]
pub struct PlatformOutcome {
    pub platform: Platform,
    pub command_file: PathBuf,
    pub archive_path: PathBuf,
    /// States visited, in order, ending in a terminal state.
    pub states: Vec<PlatformState>,
    pub result: Option<PlatformBuildResult>,
    pub failure: Option<BuildFailure>,
}

impl PlatformOutcome {
    fn new(platform: Platform, command_file: PathBuf, archive_path: PathBuf) -> Self {
        Self {
            platform,
            command_file,
            archive_path,
            states: vec![PlatformState::Pending],
            result: None,
            failure: None,
        }
    }

    pub fn state(&self) -> PlatformState {
        self.states.last().copied().unwrap_or(PlatformState::Pending)
    }

    pub fn succeeded(&self) -> bool {
        self.state() == PlatformState::ArchiveVerified
    }

    pub fn error(&self) -> Option<PatchError> {
        self.failure.as_ref().map(|f| PatchError::PlatformBuildFailed {
            platform: self.platform,
            reason: f.to_string(),
        })
    }

    fn advance(&mut self, state: PlatformState) {
        debug!(platform = %self.platform, from = ?self.state(), to = ?state, "platform state");
        self.states.push(state);
    }

    fn fail(mut self, failure: BuildFailure) -> Self {
        warn!(platform = %self.platform, "{failure}");
        self.advance(PlatformState::ArchiveFailed);
        self.failure = Some(failure);
        self
    }
}

/// Identity of the version being packaged, used for output names.
#[derive(Debug, Clone)]
pub struct BuildTarget<'a> {
    pub version_dir: &'a Path,
    pub version_id: &'a str,
    pub base_version_id: &'a str,
}

enum Waited {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(t) => tokio::time::sleep(t).await,
        None => std::future::pending().await,
    }
}

async fn cancelled(rx: Option<watch::Receiver<bool>>) {
    if let Some(mut rx) = rx {
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                // Sender gone: nobody can cancel any more.
                break;
            }
        }
        if *rx.borrow() {
            return;
        }
    }
    std::future::pending().await
}

async fn kill_archiver(child: &mut Child, platform: Platform) {
    if let Err(e) = child.kill().await {
        warn!(%platform, "failed to kill archiver: {e}");
    }
}

/// Create the platform directory, clear a stale archive, write the command file.
async fn prepare_platform_dir(
    platform_dir: &Path,
    archive_path: &Path,
    command_file: &Path,
    body: String,
) -> std::io::Result<()> {
    tokio::fs::create_dir_all(platform_dir).await?;
    // A stale archive from an earlier run would pass verification.
    match tokio::fs::remove_file(archive_path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e),
        _ => {}
    }
    tokio::fs::write(command_file, body).await
}

fn forward_output<R>(platform: Platform, stream: &'static str, reader: Option<R>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    if let Some(reader) = reader {
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(%platform, stream, "{line}");
            }
        });
    }
}

/// Drives the archiver once per platform, strictly one after another.
pub struct BuildOrchestrator<'a> {
    config: &'a PatchExportConfig,
    generator: CommandGenerator,
    extern_commands: Vec<String>,
    cancel: Option<watch::Receiver<bool>>,
}

impl<'a> BuildOrchestrator<'a> {
    pub fn new(config: &'a PatchExportConfig) -> Self {
        Self {
            config,
            generator: CommandGenerator::from_config(config),
            extern_commands: commands::extern_file_commands(&config.add_extern_files),
            cancel: None,
        }
    }

    /// Once the receiver reads `true`, the running archiver is killed and no
    /// further platform is started.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn archiver(&self) -> &ArchiverConfig {
        &self.config.archiver
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    pub async fn build_all(
        &self,
        changed: &AssetDependencyGraph,
        target: &BuildTarget<'_>,
        observer: &dyn ExportObserver,
    ) -> Vec<PlatformOutcome> {
        let platforms = self.config.target_platforms();
        let mut outcomes = Vec::with_capacity(platforms.len());
        for platform in platforms {
            outcomes.push(self.build_platform(changed, target, platform, observer).await);
        }
        outcomes
    }

    /// Run one platform from `Pending` to a terminal state.
    pub async fn build_platform(
        &self,
        changed: &AssetDependencyGraph,
        target: &BuildTarget<'_>,
        platform: Platform,
        observer: &dyn ExportObserver,
    ) -> PlatformOutcome {
        let platform_dir = commands::platform_dir(target.version_dir, platform);
        let command_file = platform_dir.join(commands::command_file_name(
            target.base_version_id,
            target.version_id,
            platform,
        ));
        let archive_path = platform_dir.join(commands::archive_file_name(
            target.version_id,
            platform,
            &self.archiver().archive_extension,
        ));
        let outcome = PlatformOutcome::new(platform, command_file, archive_path);

        observer.enter_frame(
            1.0,
            &format!("Generating archiver commands of {platform} platform."),
        );
        let outcome = self.write_commands(outcome, changed, &platform_dir, observer).await;

        observer.enter_frame(1.0, &format!("Generating pak of {platform} platform."));
        let outcome = match outcome.state() {
            PlatformState::CommandsWritten => self.run_archiver(outcome, observer).await,
            _ => outcome,
        };

        self.cleanup(&outcome).await;
        outcome
    }

    async fn write_commands(
        &self,
        mut outcome: PlatformOutcome,
        changed: &AssetDependencyGraph,
        platform_dir: &Path,
        observer: &dyn ExportObserver,
    ) -> PlatformOutcome {
        if self.is_cancelled() {
            return outcome.fail(BuildFailure::Cancelled);
        }

        let commands = self
            .generator
            .generate(changed, outcome.platform, &self.extern_commands);
        let body = commands::render_command_file(&commands);

        let prepared =
            prepare_platform_dir(platform_dir, &outcome.archive_path, &outcome.command_file, body).await;

        if let Err(e) = prepared {
            let path = outcome.command_file.clone();
            return outcome.fail(BuildFailure::CommandFile {
                path,
                reason: e.to_string(),
            });
        }

        debug!(
            platform = %outcome.platform,
            commands = commands.len(),
            path = %outcome.command_file.display(),
            "wrote command file"
        );
        if self.config.save_pak_list {
            observer.notify(
                "Succeed to export the patch pak command list.",
                Some(&outcome.command_file),
            );
        }
        outcome.advance(PlatformState::CommandsWritten);
        outcome
    }

    async fn run_archiver(&self, mut outcome: PlatformOutcome, observer: &dyn ExportObserver) -> PlatformOutcome {
        let archiver = self.archiver();
        let mut command = Command::new(&archiver.binary);
        command
            .args(&archiver.leading_args)
            .arg(&outcome.archive_path)
            .arg(format!("-create={}", outcome.command_file.display()))
            .args(&archiver.options)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        debug!(platform = %outcome.platform, ?command, "launching archiver");

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => return outcome.fail(BuildFailure::Spawn(format!("{}: {e}", archiver.binary.display()))),
        };
        outcome.advance(PlatformState::ArchiveBuilding);
        forward_output(outcome.platform, "stdout", child.stdout.take());
        forward_output(outcome.platform, "stderr", child.stderr.take());

        let timeout = archiver.timeout_secs.map(Duration::from_secs);
        let waited = tokio::select! {
            status = child.wait() => Waited::Exited(status),
            _ = deadline(timeout) => Waited::TimedOut,
            _ = cancelled(self.cancel.clone()) => Waited::Cancelled,
        };

        let status = match waited {
            Waited::Exited(Ok(status)) => status,
            Waited::Exited(Err(e)) => return outcome.fail(BuildFailure::Spawn(e.to_string())),
            Waited::TimedOut => {
                kill_archiver(&mut child, outcome.platform).await;
                return outcome.fail(BuildFailure::TimedOut(archiver.timeout_secs.unwrap_or_default()));
            }
            Waited::Cancelled => {
                kill_archiver(&mut child, outcome.platform).await;
                return outcome.fail(BuildFailure::Cancelled);
            }
        };
        debug!(platform = %outcome.platform, %status, "archiver exited");

        if !outcome.archive_path.is_file() {
            let path = outcome.archive_path.clone();
            return outcome.fail(BuildFailure::ArchiveMissing {
                path,
                status: status.to_string(),
            });
        }
        if archiver.require_success_exit && !status.success() {
            return outcome.fail(BuildFailure::ExitStatus(status.to_string()));
        }

        let archive = outcome.archive_path.clone();
        let measured = tokio::task::spawn_blocking(move || -> anyhow::Result<(u64, String)> {
            let size = std::fs::metadata(&archive)?.len();
            let hash = util::hash_file_streaming(&archive)?;
            Ok((size, hash.to_hex().to_string()))
        })
        .await;

        let (file_size, hash) = match measured {
            Ok(Ok(measured)) => measured,
            Ok(Err(e)) => {
                let path = outcome.archive_path.clone();
                return outcome.fail(BuildFailure::Unreadable { path, reason: format!("{e:#}") });
            }
            Err(e) => {
                let path = outcome.archive_path.clone();
                return outcome.fail(BuildFailure::Unreadable { path, reason: e.to_string() });
            }
        };

        info!(
            platform = %outcome.platform,
            size = file_size,
            path = %outcome.archive_path.display(),
            "pak built"
        );
        observer.notify("Succeed to package the patch as pak.", Some(&outcome.archive_path));
        outcome.result = Some(PlatformBuildResult {
            platform: outcome.platform,
            archive_path: outcome.archive_path.clone(),
            file_size,
            hash,
        });
        outcome.advance(PlatformState::ArchiveVerified);
        outcome
    }

    /// Drop the command file unless it is to be kept. Runs for every terminal state.
    async fn cleanup(&self, outcome: &PlatformOutcome) {
        if self.config.save_pak_list || !outcome.command_file.is_file() {
            return;
        }
        if let Err(e) = tokio::fs::remove_file(&outcome.command_file).await {
            warn!(
                platform = %outcome.platform,
                path = %outcome.command_file.display(),
                "failed to delete command file: {e}"
            );
        }
    }
}
