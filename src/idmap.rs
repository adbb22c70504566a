use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Where a Redmine issue ended up in Azure DevOps.
///
/// Serialized as the two-element array `[id, url]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(u64, String)", into = "(u64, String)")]
pub struct MappedItem {
    pub id: u64,
    pub url: String,
}

impl From<(u64, String)> for MappedItem {
    fn from((id, url): (u64, String)) -> Self {
        Self { id, url }
    }
}

impl From<MappedItem> for (u64, String) {
    fn from(item: MappedItem) -> Self {
        (item.id, item.url)
    }
}

/// Redmine issue id -> created work item. Persisted as a flat JSON object keyed by
/// the stringified issue id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdMap {
    entries: BTreeMap<u64, MappedItem>,
}

impl IdMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source_id: u64, id: u64, url: impl Into<String>) {
        self.entries.insert(
            source_id,
            MappedItem {
                id,
                url: url.into(),
            },
        );
    }

    pub fn get(&self, source_id: u64) -> Option<&MappedItem> {
        self.entries.get(&source_id)
    }

    pub fn contains(&self, source_id: u64) -> bool {
        self.entries.contains_key(&source_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &MappedItem)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read id map {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse id map {}", path.display()))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write id map {}", path.display()))?;
        Ok(())
    }
}

/// `issue-mapping-YYYYMMDD_HHMMSS.json` inside `dir`, stamped with the local time.
pub fn timestamped_path(dir: &Path) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    dir.join(format!("issue-mapping-{stamp}.json"))
}
