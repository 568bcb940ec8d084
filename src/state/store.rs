//! Durable, atomically-written state records.
//!
//! One JSON file per (feature, kind) under the state directory. Every write
//! goes to a temp file in the same directory followed by a rename, so a crash
//! mid-write never leaves a partial record visible to a subsequent read.
//! Records are partitioned by feature id; concurrent workers never touch the
//! same file.

use crate::util::sanitize_component;
use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};

/// The three independent resumable state kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Retry,
    Phase,
    Task,
}

impl StateKind {
    const ALL: [StateKind; 3] = [StateKind::Retry, StateKind::Phase, StateKind::Task];

    fn suffix(self) -> &'static str {
        match self {
            StateKind::Retry => "retry",
            StateKind::Phase => "phase",
            StateKind::Task => "task",
        }
    }
}

/// Keyed store of per-feature state records.
#[derive(Debug)]
pub struct StateStore {
    state_dir: PathBuf,
}

impl StateStore {
    /// Open (creating if needed) a store rooted at `state_dir`.
    pub fn open(state_dir: &Path) -> Result<Self> {
        fs::create_dir_all(state_dir)
            .with_context(|| format!("Failed to create state dir {}", state_dir.display()))?;
        Ok(Self {
            state_dir: state_dir.to_path_buf(),
        })
    }

    fn record_path(&self, feature: &str, kind: StateKind) -> PathBuf {
        self.state_dir
            .join(format!("{}.{}.json", sanitize_component(feature), kind.suffix()))
    }

    /// Load a record, returning `None` when it has never been written.
    pub fn load<T: DeserializeOwned>(&self, feature: &str, kind: StateKind) -> Result<Option<T>> {
        let path = self.record_path(feature, kind);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read state record {}", path.display()))?;
        let value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state record {}", path.display()))?;
        Ok(Some(value))
    }

    /// Write a record atomically (temp file + rename).
    pub fn save<T: Serialize>(&self, feature: &str, kind: StateKind, value: &T) -> Result<()> {
        let path = self.record_path(feature, kind);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(value).context("Failed to serialize state")?;
        fs::write(&tmp, json)
            .with_context(|| format!("Failed to write state record {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace state record {}", path.display()))?;
        Ok(())
    }

    /// Remove a single record. Missing records are not an error.
    pub fn remove(&self, feature: &str, kind: StateKind) -> Result<()> {
        let path = self.record_path(feature, kind);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove state record {}", path.display()))?;
        }
        Ok(())
    }

    /// Remove every record for a feature (explicit reset).
    pub fn reset_feature(&self, feature: &str) -> Result<()> {
        for kind in StateKind::ALL {
            self.remove(feature, kind)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Blob {
        n: u32,
        tag: String,
    }

    #[test]
    fn load_missing_returns_none() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let got: Option<Blob> = store.load("feat", StateKind::Phase).unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let blob = Blob {
            n: 7,
            tag: "x".into(),
        };
        store.save("feat", StateKind::Retry, &blob).unwrap();
        let got: Blob = store.load("feat", StateKind::Retry).unwrap().unwrap();
        assert_eq!(got, blob);
    }

    #[test]
    fn kinds_are_independent() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let blob = Blob {
            n: 1,
            tag: "p".into(),
        };
        store.save("feat", StateKind::Phase, &blob).unwrap();
        let got: Option<Blob> = store.load("feat", StateKind::Task).unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn features_are_partitioned() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        store
            .save("a", StateKind::Phase, &Blob { n: 1, tag: "a".into() })
            .unwrap();
        store
            .save("b", StateKind::Phase, &Blob { n: 2, tag: "b".into() })
            .unwrap();
        let a: Blob = store.load("a", StateKind::Phase).unwrap().unwrap();
        let b: Blob = store.load("b", StateKind::Phase).unwrap().unwrap();
        assert_eq!(a.n, 1);
        assert_eq!(b.n, 2);
    }

    #[test]
    fn save_replaces_atomically() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        store
            .save("feat", StateKind::Phase, &Blob { n: 1, tag: "old".into() })
            .unwrap();
        store
            .save("feat", StateKind::Phase, &Blob { n: 2, tag: "new".into() })
            .unwrap();
        let got: Blob = store.load("feat", StateKind::Phase).unwrap().unwrap();
        assert_eq!(got.tag, "new");
        // no temp file left behind
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn reset_feature_removes_all_kinds() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let blob = Blob {
            n: 1,
            tag: "x".into(),
        };
        store.save("feat", StateKind::Retry, &blob).unwrap();
        store.save("feat", StateKind::Phase, &blob).unwrap();
        store.save("feat", StateKind::Task, &blob).unwrap();

        store.reset_feature("feat").unwrap();

        for kind in [StateKind::Retry, StateKind::Phase, StateKind::Task] {
            let got: Option<Blob> = store.load("feat", kind).unwrap();
            assert!(got.is_none());
        }
    }

    #[test]
    fn survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = StateStore::open(dir.path()).unwrap();
            store
                .save("feat", StateKind::Phase, &Blob { n: 9, tag: "kept".into() })
                .unwrap();
        }
        {
            let store = StateStore::open(dir.path()).unwrap();
            let got: Blob = store.load("feat", StateKind::Phase).unwrap().unwrap();
            assert_eq!(got.n, 9);
        }
    }

    #[test]
    fn feature_ids_with_path_characters_are_sanitized() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        store
            .save("a/b", StateKind::Phase, &Blob { n: 1, tag: "s".into() })
            .unwrap();
        let got: Option<Blob> = store.load("a/b", StateKind::Phase).unwrap();
        assert!(got.is_some());
    }
}
