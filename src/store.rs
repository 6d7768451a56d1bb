use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;

use crate::model::{Checkpoint, Item};
use crate::util::{read_json_file, utc_compact_string, write_json_pretty};
use crate::workflow::ResolutionState;

/// Derives and manages the artifacts that live beside a collection file:
/// the checkpoint, the working copy holding partially merged results, the
/// rendered prompts file, and timestamped backups.
pub struct CollectionStore {
    collection_path: PathBuf,
}

impl CollectionStore {
    pub fn new(collection_path: &Path) -> Self {
        Self {
            collection_path: collection_path.to_path_buf(),
        }
    }

    pub fn collection_path(&self) -> &Path {
        &self.collection_path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let stem = self
            .collection_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "collection".to_string());
        self.collection_path.with_file_name(format!("{stem}{suffix}"))
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.sibling("_checkpoint.json")
    }

    pub fn working_copy_path(&self) -> PathBuf {
        self.sibling("_resolving.json")
    }

    pub fn prompts_path(&self) -> PathBuf {
        self.sibling("_prompts.txt")
    }

    pub fn backup_path(&self) -> PathBuf {
        self.sibling(&format!("_backup_{}.json", utc_compact_string(Utc::now())))
    }

    pub fn load_collection(&self) -> Result<Vec<Item>> {
        read_json_file(&self.collection_path)
    }

    pub fn save_collection(&self, items: &[Item]) -> Result<()> {
        write_json_pretty(&self.collection_path, &items)
    }

    pub fn load_checkpoint(&self) -> Result<Option<Checkpoint>> {
        let path = self.checkpoint_path();
        if !path.exists() {
            return Ok(None);
        }
        read_json_file(&path).map(Some)
    }

    pub fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        write_json_pretty(&self.checkpoint_path(), checkpoint)
    }

    pub fn save_working_copy(&self, items: &[Item]) -> Result<()> {
        write_json_pretty(&self.working_copy_path(), &items)
    }

    pub fn write_backup(&self, items: &[Item]) -> Result<PathBuf> {
        let path = self.backup_path();
        write_json_pretty(&path, &items)?;
        Ok(path)
    }

    /// Removes the checkpoint and working copy once their contents have been
    /// folded back into the collection file.
    pub fn clear_session_artifacts(&self) -> Result<()> {
        for path in [self.checkpoint_path(), self.working_copy_path()] {
            if path.exists() {
                fs::remove_file(&path)
                    .with_context(|| format!("failed to remove {}", path.display()))?;
            }
        }
        Ok(())
    }

    /// Rewrites the canonical collection and drops the session artifacts.
    /// Callers only invoke this once every planned batch has been merged.
    pub fn complete_session(&self, items: &[Item]) -> Result<()> {
        self.save_collection(items)?;
        self.clear_session_artifacts()
    }

    /// Loads the items and resolution state the next session should run
    /// against. A checkpoint resumes from the working copy, which is the
    /// only place already-merged batch results live until the run
    /// completes; a checkpoint whose working copy is gone is therefore
    /// unrecoverable.
    pub fn open_session(&self) -> Result<Session> {
        match self.load_checkpoint()? {
            Some(checkpoint) => {
                let working_copy = self.working_copy_path();
                if !working_copy.exists() {
                    bail!(
                        "checkpoint {} exists but working copy {} is missing; \
                         delete the checkpoint to start over from {}",
                        self.checkpoint_path().display(),
                        working_copy.display(),
                        self.collection_path.display(),
                    );
                }
                let items: Vec<Item> = read_json_file(&working_copy)?;
                let state = ResolutionState::from_checkpoint(&checkpoint, items.len())?;
                Ok(Session {
                    items,
                    state,
                    resumed: true,
                })
            }
            None => {
                let items = self.load_collection()?;
                let state = ResolutionState::seed_from_items(&items);
                Ok(Session {
                    items,
                    state,
                    resumed: false,
                })
            }
        }
    }
}

/// One command's view of a collection mid-resolution.
#[derive(Debug)]
pub struct Session {
    pub items: Vec<Item>,
    pub state: ResolutionState,
    pub resumed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UnitLevel;

    fn sample_items() -> Vec<Item> {
        vec![
            Item {
                name: "Paracetamol 500mg".to_string(),
                category: "Drug".to_string(),
                units: vec![
                    UnitLevel::new("Pack", "Packs", 4),
                    UnitLevel::new("Tablet", "Tablets", 400),
                ],
                packaging_structure: None,
                earliest_expiry_date: "2026-03-01".to_string(),
                later_expiry_dates: Vec::new(),
            },
            Item {
                name: "Saline 0.9%".to_string(),
                category: "Infusion".to_string(),
                units: vec![UnitLevel::new("Bottle", "Bottles", 20)],
                packaging_structure: Some(Vec::new()),
                earliest_expiry_date: String::new(),
                later_expiry_dates: Vec::new(),
            },
        ]
    }

    #[test]
    fn sibling_paths_share_the_collection_stem() {
        let store = CollectionStore::new(Path::new("seeds/inventory/drugs.json"));
        assert_eq!(
            store.checkpoint_path(),
            Path::new("seeds/inventory/drugs_checkpoint.json")
        );
        assert_eq!(
            store.working_copy_path(),
            Path::new("seeds/inventory/drugs_resolving.json")
        );
        assert_eq!(
            store.prompts_path(),
            Path::new("seeds/inventory/drugs_prompts.txt")
        );
    }

    #[test]
    fn fresh_session_seeds_state_from_the_collection() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CollectionStore::new(&dir.path().join("drugs.json"));
        store.save_collection(&sample_items()).expect("save");

        let session = store.open_session().expect("open");
        assert!(!session.resumed);
        assert_eq!(session.items.len(), 2);
        assert_eq!(session.state.processed_count(), 1);
        assert_eq!(session.state.unprocessed_indices(), vec![0]);
    }

    #[test]
    fn checkpoint_resumes_from_the_working_copy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CollectionStore::new(&dir.path().join("drugs.json"));
        store.save_collection(&sample_items()).expect("save");

        let mut working = sample_items();
        working[0].packaging_structure = Some(vec![crate::model::ContainmentEdge::new(
            "Pack", 100, "Tablet",
        )]);
        store.save_working_copy(&working).expect("working copy");

        let mut state = ResolutionState::seed_from_items(&working);
        state.mark_processed(0);
        store.save_checkpoint(&state.to_checkpoint()).expect("checkpoint");

        let session = store.open_session().expect("open");
        assert!(session.resumed);
        assert!(session.state.is_complete());
        assert!(session.items[0].is_resolved());
    }

    #[test]
    fn checkpoint_without_working_copy_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CollectionStore::new(&dir.path().join("drugs.json"));
        store.save_collection(&sample_items()).expect("save");

        let state = ResolutionState::seed_from_items(&sample_items());
        store.save_checkpoint(&state.to_checkpoint()).expect("checkpoint");

        let error = store.open_session().expect_err("missing working copy");
        assert!(error.to_string().contains("working copy"));
    }

    #[test]
    fn clearing_session_artifacts_removes_checkpoint_and_working_copy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CollectionStore::new(&dir.path().join("drugs.json"));
        store.save_collection(&sample_items()).expect("save");
        store.save_working_copy(&sample_items()).expect("working copy");
        store
            .save_checkpoint(&ResolutionState::new(2).to_checkpoint())
            .expect("checkpoint");

        store.clear_session_artifacts().expect("clear");
        assert!(!store.checkpoint_path().exists());
        assert!(!store.working_copy_path().exists());
        assert!(store.collection_path().exists());
    }

    #[test]
    fn backups_land_beside_the_collection() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CollectionStore::new(&dir.path().join("drugs.json"));

        let backup = store.write_backup(&sample_items()).expect("backup");
        assert!(backup.exists());
        let name = backup.file_name().expect("name").to_string_lossy().into_owned();
        assert!(name.starts_with("drugs_backup_"));
        assert!(name.ends_with(".json"));

        let restored: Vec<Item> = read_json_file(&backup).expect("read back");
        assert_eq!(restored.len(), 2);
    }
}
