use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use hotpatcher::config::{ConfigOverrides, PatchExportConfig};
use hotpatcher::logging::{self, LogFormat};
use hotpatcher::observer::TracingObserver;
use hotpatcher::pipeline::{self, ExportOptions};
use hotpatcher::platform::Platform;
use hotpatcher::provider::ContentDirProvider;
use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::watch;
use tracing::warn;

#[derive(Parser)]
#[command(name = "hotpatcher", about = "Content hot-patch differ and pak packager")]
struct Cli {
    /// Debug-level logging (RUST_LOG overrides)
    #[arg(long, short, global = true)]
    verbose: bool,
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConfigArgs {
    /// Patch config JSON
    #[arg(long, short)]
    config: PathBuf,
    /// Override the version id being built
    #[arg(long)]
    version_id: Option<String>,
    /// Override the base version manifest (implies exporting by base version)
    #[arg(long)]
    base_version: Option<PathBuf>,
    /// Override the output root
    #[arg(long)]
    save_path: Option<PathBuf>,
    /// Override target platforms (repeatable)
    #[arg(long = "platform")]
    platforms: Vec<Platform>,
}

impl ConfigArgs {
    fn load(self) -> anyhow::Result<PatchExportConfig> {
        let config = PatchExportConfig::load(&self.config)?;
        Ok(config.apply_overrides(ConfigOverrides {
            version_id: self.version_id,
            base_version: self.base_version,
            save_path: self.save_path,
            platforms: self.platforms,
        }))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the added/modified/deleted assets against the base version
    Diff(ConfigArgs),
    /// Write only the release manifest of the current content
    Release(ConfigArgs),
    /// Build patch paks for every target platform plus manifests
    Export(ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_format, cli.verbose);

    let provider = ContentDirProvider::new();
    let observer = TracingObserver;

    match cli.command {
        Commands::Diff(args) => {
            let config = args.load()?;
            let prepared = pipeline::run_diff(&config, &provider, chrono::Utc::now())?;
            print!("{}", prepared.diff.render_report()?);
        }
        Commands::Release(args) => {
            let config = args.load()?;
            let record = pipeline::run_release(&config, &provider, &observer, chrono::Utc::now())?;
            println!("Release manifest written: {}", record.path.display());
        }
        Commands::Export(args) => {
            let config = args.load()?;
            println!("Exporting patch...");
            println!("  Version: {}", config.version_id);
            println!("  Output: {}", config.version_dir().display());

            let (cancel_tx, cancel_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, cancelling export");
                    let _ = cancel_tx.send(true);
                }
            });

            let start = Instant::now();
            let summary = pipeline::run_export(
                &config,
                &provider,
                &observer,
                ExportOptions {
                    created_at: chrono::Utc::now(),
                    cancel: Some(cancel_rx),
                },
            )
            .await
            .context("Export aborted")?;
            let elapsed = start.elapsed();

            let diff = &summary.prepared.diff;
            println!("\nPatch exported.");
            println!("  Assets added: {}", diff.added.len());
            println!("  Assets modified: {}", diff.modified.len());
            println!("  Assets deleted: {}", diff.deleted.len());
            for outcome in &summary.platforms {
                match (&outcome.result, &outcome.failure) {
                    (Some(build), _) => println!(
                        "  {}: {} ({} bytes)",
                        outcome.platform,
                        build.archive_path.display(),
                        build.file_size
                    ),
                    (None, Some(failure)) => println!("  {}: FAILED ({failure})", outcome.platform),
                    (None, None) => println!("  {}: not built", outcome.platform),
                }
            }
            for error in summary.artifact_errors() {
                println!("  {error}");
            }
            println!("  Time elapsed: {:.3}s", elapsed.as_secs_f64());
        }
    }

    Ok(())
}
