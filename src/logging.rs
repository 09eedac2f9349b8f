//! Subscriber setup for the command-line tool.

use std::sync::Once;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines on stderr.
    #[default]
    Text,
    /// One JSON object per event, for build machines.
    Json,
}

static INIT_ONCE: Once = Once::new();

fn filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "hotpatcher=debug" } else { "hotpatcher=info" })
    })
}

/// Install the global subscriber. `RUST_LOG` wins over `verbose`.
/// Later calls are no-ops.
pub fn init(format: LogFormat, verbose: bool) {
    INIT_ONCE.call_once(|| {
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter(verbose))
            .with_writer(std::io::stderr);
        let installed = match format {
            LogFormat::Text => builder.finish().try_init(),
            LogFormat::Json => builder.json().finish().try_init(),
        };
        if let Err(e) = installed {
            eprintln!("logging already initialised: {e}");
        }
    });
}
