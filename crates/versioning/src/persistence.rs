/// JSON persistence for the version store
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::{info, warn};

use crate::{Branch, Result, VersionEntry, VersionError, VersionId, VersionStore, VersionStoreConfig};

/// On-disk form of a `VersionStore`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub config: VersionStoreConfig,
    pub versions: Vec<VersionEntry>,
    pub branches: Vec<Branch>,
    pub current_branch: String,
    pub next_id: u64,

    /// Pending draft parent from the last `restore`
    #[serde(default)]
    pub restored: Option<VersionId>,
}

impl From<&VersionStore> for StoreSnapshot {
    fn from(store: &VersionStore) -> Self {
        Self {
            config: store.config,
            versions: store.versions.values().cloned().collect(),
            branches: store.branches.values().cloned().collect(),
            current_branch: store.current_branch.clone(),
            next_id: store.next_id,
            restored: store.restored,
        }
    }
}

impl TryFrom<StoreSnapshot> for VersionStore {
    type Error = VersionError;

    fn try_from(snapshot: StoreSnapshot) -> Result<Self> {
        let mut store = VersionStore::new(snapshot.config);

        for entry in snapshot.versions {
            if let Some(missing) = entry.parents().find(|p| !store.versions.contains_key(p)) {
                return Err(VersionError::InvalidOp(format!(
                    "{} references unknown parent {}",
                    entry.id, missing
                )));
            }
            if !entry.verify() {
                warn!("Checksum mismatch on {}", entry.id);
            }
            store.versions.insert(entry.id, entry);
        }

        for branch in snapshot.branches {
            if !store.versions.contains_key(&branch.head_version_id) {
                return Err(VersionError::NotFound(branch.head_version_id.to_string()));
            }
            store.branches.insert(branch.name.clone(), branch);
        }

        let highest = store.versions.keys().next_back().map_or(0, |VersionId(n)| *n);
        store.next_id = snapshot.next_id.max(highest + 1);
        store.current_branch = snapshot.current_branch;
        store.restored = snapshot.restored.filter(|id| {
            let known = store.versions.contains_key(id);
            if !known {
                warn!("Dropping restore marker for unknown version {}", id);
            }
            known
        });
        Ok(store)
    }
}

impl VersionStore {
    /// Write the store as pretty JSON, creating parent directories
    pub async fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(&StoreSnapshot::from(self))?;
        fs::write(path, json).await?;

        info!("Saved {} version(s) to {}", self.len(), path.display());
        Ok(())
    }

    /// Load a store written by `save_to`
    pub async fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path.as_ref()).await?;
        let snapshot: StoreSnapshot = serde_json::from_str(&json)?;
        VersionStore::try_from(snapshot)
    }

    /// Load from `path` if it exists, otherwise start empty
    pub async fn load_or_default(path: impl AsRef<Path>, config: VersionStoreConfig) -> Result<Self> {
        match fs::try_exists(path.as_ref()).await? {
            true => Self::load_from(path).await,
            false => Ok(Self::new(config)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VersionOptions;

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history").join("resume.json");

        let mut store = VersionStore::default();
        let v1 = store
            .create_version("Summary\n", VersionOptions::new("alice", "init"))
            .unwrap();
        store.create_branch(v1.id, "tech-focus", "alice").unwrap();
        store.add_tag(v1.id, "sent").unwrap();
        store.save_to(&path).await.unwrap();

        let mut loaded = VersionStore::load_from(&path).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.version(v1.id).unwrap().tags.contains("sent"));
        assert_eq!(loaded.branches().count(), 2);

        let v2 = loaded
            .create_version("Summary\nSkills\n", VersionOptions::new("bob", "skills"))
            .unwrap();
        assert_eq!(v2.id, VersionId(2));
        assert_eq!(v2.parent_version_id, Some(v1.id));
    }

    #[tokio::test]
    async fn test_restore_marker_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resume.json");

        let mut store = VersionStore::default();
        let v1 = store
            .create_version("Summary\n", VersionOptions::new("alice", "first"))
            .unwrap();
        store
            .create_version("Summary\nSkills\n", VersionOptions::new("alice", "second"))
            .unwrap();
        store.restore(v1.id).unwrap();
        store.save_to(&path).await.unwrap();

        let mut loaded = VersionStore::load_from(&path).await.unwrap();
        let v3 = loaded
            .create_version("Summary: Rust\n", VersionOptions::new("alice", "from v1"))
            .unwrap();
        assert_eq!(v3.parent_version_id, Some(v1.id));
    }

    #[test]
    fn test_snapshot_without_restore_marker_loads() {
        let mut store = VersionStore::default();
        store.create_version("a", VersionOptions::new("a", "1")).unwrap();
        let mut json = serde_json::to_value(StoreSnapshot::from(&store)).unwrap();
        json.as_object_mut().unwrap().remove("restored");

        let snapshot: StoreSnapshot = serde_json::from_value(json).unwrap();
        assert!(VersionStore::try_from(snapshot).unwrap().restored.is_none());
    }

    #[tokio::test]
    async fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = VersionStore::load_or_default(dir.path().join("none.json"), VersionStoreConfig::default())
            .await
            .unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_load_rejects_dangling_parent() {
        let mut store = VersionStore::default();
        store.create_version("a", VersionOptions::new("a", "1")).unwrap();
        let mut snapshot = StoreSnapshot::from(&store);
        snapshot.versions[0].parent_version_id = Some(VersionId(42));
        assert!(VersionStore::try_from(snapshot).is_err());
    }
}
