use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Event dates already handled: scheduled (`accepted`) or rejected (`filtered`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PastEventRecord {
    #[serde(alias = "main")]
    pub accepted: BTreeSet<String>,
    #[serde(default)]
    pub filtered: BTreeSet<String>,
}

impl PastEventRecord {
    pub fn contains(&self, date: &str) -> bool {
        self.accepted.contains(date) || self.filtered.contains(date)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OnDisk {
    /// Oldest layout: a bare list of accepted dates.
    Legacy(BTreeSet<String>),
    Current(PastEventRecord),
}

pub struct PastEventStore {
    path: PathBuf,
}

impl PastEventStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<PastEventRecord> {
        if !self.path.exists() {
            return Ok(PastEventRecord::default());
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let on_disk: OnDisk = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse {}", self.path.display()))?;
        Ok(match on_disk {
            OnDisk::Current(record) => record,
            OnDisk::Legacy(accepted) => {
                tracing::info!("Upgrading legacy past events file {}", self.path.display());
                PastEventRecord {
                    accepted,
                    filtered: BTreeSet::new(),
                }
            }
        })
    }

    /// Rewrites the whole file through a temp file + rename.
    pub fn save(&self, record: &PastEventRecord) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(&tmp, &json)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }
}
