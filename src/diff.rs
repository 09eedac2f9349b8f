use serde::Serialize;
use thiserror::Error;

use crate::snapshot::{to_json_document, AssetDependencyGraph};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiffError {
    #[error("{graph} graph holds an asset with an empty path")]
    EmptyPath { graph: &'static str },
    #[error("{graph} graph stores asset {path} under key {key}")]
    KeyMismatch {
        graph: &'static str,
        key: String,
        path: String,
    },
    #[error("asset {0} is present in both partitions being combined")]
    Overlap(String),
}

/// Added / modified / deleted partitions between two versions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffResult {
    pub added: AssetDependencyGraph,
    pub modified: AssetDependencyGraph,
    pub deleted: AssetDependencyGraph,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    /// Added + modified: the set that gets packaged.
    pub fn changed(&self) -> Result<AssetDependencyGraph, DiffError> {
        combine(&self.added, &self.modified)
    }

    /// Plain-text report shown by the diff-only flow.
    pub fn render_report(&self) -> anyhow::Result<String> {
        Ok(format!(
            "Add Assets:\n{}\nModify Assets:\n{}\nDelete Assets:\n{}",
            to_json_document(&self.added)?,
            to_json_document(&self.modified)?,
            to_json_document(&self.deleted)?,
        ))
    }
}

fn validate(graph: &AssetDependencyGraph, name: &'static str) -> Result<(), DiffError> {
    for (key, record) in graph {
        if record.path.is_empty() || key.is_empty() {
            return Err(DiffError::EmptyPath { graph: name });
        }
        if *key != record.path {
            return Err(DiffError::KeyMismatch {
                graph: name,
                key: key.clone(),
                path: record.path.clone(),
            });
        }
    }
    Ok(())
}

/// Partition `current` against `base`.
///
/// Assets present in both with the same state are left out of every partition.
/// Neither input is modified.
pub fn diff(current: &AssetDependencyGraph, base: &AssetDependencyGraph) -> Result<DiffResult, DiffError> {
    validate(current, "current")?;
    validate(base, "base")?;

    let mut result = DiffResult::default();

    for (path, record) in current.iter() {
        match base.get(path) {
            None => {
                result.added.insert(record.clone());
            }
            Some(old) if !old.same_state(record) => {
                result.modified.insert(record.clone());
            }
            Some(_) => {}
        }
    }

    for (path, record) in base.iter() {
        if !current.contains(path) {
            result.deleted.insert(record.clone());
        }
    }

    Ok(result)
}

/// Union of two disjoint graphs. Shared keys are an error, not a merge.
pub fn combine(
    added: &AssetDependencyGraph,
    modified: &AssetDependencyGraph,
) -> Result<AssetDependencyGraph, DiffError> {
    let mut combined = added.clone();
    for (path, record) in modified {
        if combined.contains(path) {
            return Err(DiffError::Overlap(path.clone()));
        }
        combined.insert_keyed(path.clone(), record.clone());
    }
    Ok(combined)
}
