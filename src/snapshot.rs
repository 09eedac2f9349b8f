use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::btree_map;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// One asset of a content version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRecord {
    /// Package path, e.g. `/Game/Maps/Arena`.
    pub path: String,
    pub asset_type: String,
    /// Content fingerprint. Two records with equal signatures hold the same bytes.
    pub signature: String,
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    /// Set when another asset of the same scan depends on this one.
    #[serde(default)]
    pub has_referencers: bool,
}

impl AssetRecord {
    pub fn new(path: impl Into<String>, asset_type: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            asset_type: asset_type.into(),
            signature: signature.into(),
            dependencies: BTreeSet::new(),
            has_referencers: false,
        }
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// True when the two records describe the same packaged state.
    /// `has_referencers` is a property of the surrounding scan, not of the asset.
    pub fn same_state(&self, other: &AssetRecord) -> bool {
        self.asset_type == other.asset_type
            && self.signature == other.signature
            && self.dependencies == other.dependencies
    }
}

/// Asset path -> record. Ordered so iteration and JSON output are stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetDependencyGraph {
    assets: BTreeMap<String, AssetRecord>,
}

impl AssetDependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record keyed by its own path. Returns the displaced record, if any.
    pub fn insert(&mut self, record: AssetRecord) -> Option<AssetRecord> {
        self.assets.insert(record.path.clone(), record)
    }

    /// Insert under an explicit key. Only deserialized or hand-built graphs
    /// can disagree between key and path; the diff engine rejects those.
    pub fn insert_keyed(&mut self, key: impl Into<String>, record: AssetRecord) -> Option<AssetRecord> {
        self.assets.insert(key.into(), record)
    }

    pub fn get(&self, path: &str) -> Option<&AssetRecord> {
        self.assets.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.assets.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Entries in lexicographic path order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, AssetRecord> {
        self.assets.iter()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.assets.keys().map(String::as_str)
    }

    pub fn records(&self) -> impl Iterator<Item = &AssetRecord> {
        self.assets.values()
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        to_json_document(self)
    }
}

impl FromIterator<AssetRecord> for AssetDependencyGraph {
    fn from_iter<T: IntoIterator<Item = AssetRecord>>(iter: T) -> Self {
        let mut graph = AssetDependencyGraph::new();
        for record in iter {
            graph.insert(record);
        }
        graph
    }
}

impl<'a> IntoIterator for &'a AssetDependencyGraph {
    type Item = (&'a String, &'a AssetRecord);
    type IntoIter = btree_map::Iter<'a, String, AssetRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// A content version as written to `<version>_Release.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionSnapshot {
    pub version_id: String,
    #[serde(default)]
    pub base_version_id: String,
    pub created_at_utc: DateTime<Utc>,
    #[serde(default)]
    pub asset_dependencies: AssetDependencyGraph,
}

impl VersionSnapshot {
    pub fn new(
        version_id: impl Into<String>,
        base_version_id: impl Into<String>,
        created_at_utc: DateTime<Utc>,
        asset_dependencies: AssetDependencyGraph,
    ) -> Self {
        Self {
            version_id: version_id.into(),
            base_version_id: base_version_id.into(),
            created_at_utc,
            asset_dependencies,
        }
    }

    /// Snapshot standing in for "no base version": empty id, empty graph.
    pub fn empty_base() -> Self {
        Self::new("", "", DateTime::<Utc>::default(), AssetDependencyGraph::new())
    }

    pub fn has_base(&self) -> bool {
        !self.base_version_id.is_empty()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse version manifest")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read version manifest: {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("Invalid version manifest: {}", path.display()))
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        to_json_document(self)
    }
}

/// Pretty JSON with a trailing newline, the form every artifact is written in.
pub fn to_json_document<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let mut json = serde_json::to_string_pretty(value).context("Failed to serialize JSON document")?;
    json.push('\n');
    Ok(json)
}
