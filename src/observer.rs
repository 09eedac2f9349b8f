//! Progress and notification side channel.
//!
//! Observers are advisory: the pipeline never reads anything back from them,
//! and a run behaves the same whether anyone is listening or not.

use std::path::Path;
use std::sync::Mutex;
use tracing::info;

pub trait ExportObserver: Send + Sync {
    /// Called once before the first frame with the total amount of work.
    fn begin(&self, _total_work: f32) {}

    /// Advance the progress bar by `amount` and show `message`.
    fn enter_frame(&self, _amount: f32, _message: &str) {}

    /// Fire-and-forget toast, optionally pointing at the file just written.
    fn notify(&self, _message: &str, _path: Option<&Path>) {}
}

/// Logs frames and notifications through `tracing`.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl ExportObserver for TracingObserver {
    fn enter_frame(&self, _amount: f32, message: &str) {
        info!("{message}");
    }

    fn notify(&self, message: &str, path: Option<&Path>) {
        match path {
            Some(path) => info!(path = %path.display(), "{message}"),
            None => info!("{message}"),
        }
    }
}

/// Swallows everything.
#[derive(Debug, Default)]
pub struct NullObserver;

impl ExportObserver for NullObserver {}

#[derive(Debug, Clone, PartialEq)]
pub enum ObservedEvent {
    Begin(f32),
    Frame(f32, String),
    Notify(String, Option<std::path::PathBuf>),
}

/// Records every call, for asserting on the progress sequence.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ObservedEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<ObservedEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Paths attached to notifications, in order.
    pub fn notified_paths(&self) -> Vec<std::path::PathBuf> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ObservedEvent::Notify(_, path) => path,
                _ => None,
            })
            .collect()
    }

    /// Sum of all frame amounts.
    pub fn work_done(&self) -> f32 {
        self.events()
            .iter()
            .map(|e| match e {
                ObservedEvent::Frame(amount, _) => *amount,
                _ => 0.0,
            })
            .sum()
    }

    fn push(&self, event: ObservedEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl ExportObserver for RecordingObserver {
    fn begin(&self, total_work: f32) {
        self.push(ObservedEvent::Begin(total_work));
    }

    fn enter_frame(&self, amount: f32, message: &str) {
        self.push(ObservedEvent::Frame(amount, message.to_string()));
    }

    fn notify(&self, message: &str, path: Option<&Path>) {
        self.push(ObservedEvent::Notify(message.to_string(), path.map(Path::to_path_buf)));
    }
}
