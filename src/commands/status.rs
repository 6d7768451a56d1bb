use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::model::{Checkpoint, Item};
use crate::store::CollectionStore;
use crate::util::read_json_file;
use crate::workflow::{self, ResolutionState};

pub fn run(args: StatusArgs) -> Result<()> {
    let store = CollectionStore::new(&args.collection);
    info!(path = %args.collection.display(), "status requested");

    let canonical: Vec<Item> = store.load_collection()?;
    let resolved = canonical.iter().filter(|item| item.is_resolved()).count();
    info!(
        items = canonical.len(),
        resolved,
        unresolved = canonical.len() - resolved,
        "canonical collection"
    );

    let (items, state) = match store.load_checkpoint()? {
        Some(checkpoint) => {
            report_checkpoint(&checkpoint);
            if store.working_copy_path().exists() {
                let items: Vec<Item> = read_json_file(&store.working_copy_path())?;
                let state = ResolutionState::from_checkpoint(&checkpoint, items.len())?;
                info!(
                    path = %store.working_copy_path().display(),
                    "session in progress; progress below reflects the working copy"
                );
                (items, state)
            } else {
                warn!(
                    path = %store.working_copy_path().display(),
                    "checkpoint has no working copy; resolve will refuse to resume \
                     until the checkpoint is deleted"
                );
                let state = ResolutionState::seed_from_items(&canonical);
                (canonical, state)
            }
        }
        None => {
            info!("no session in progress");
            let state = ResolutionState::seed_from_items(&canonical);
            (canonical, state)
        }
    };

    match items.iter().find(|item| !item.is_resolved()) {
        Some(item) => info!(
            name = %item.name,
            category = %item.category,
            "first unresolved item"
        ),
        None => info!("every item carries a packaging structure"),
    }

    let batches = workflow::plan_batches(&state, args.batch_size);
    info!(
        processed = state.processed_count(),
        total = state.total_items(),
        remaining = state.remaining_count(),
        batches = batches.len(),
        batch_size = args.batch_size,
        "resolution progress"
    );

    Ok(())
}

fn report_checkpoint(checkpoint: &Checkpoint) {
    match DateTime::parse_from_rfc3339(&checkpoint.timestamp) {
        Ok(ts) => {
            let age_minutes = (Utc::now() - ts.with_timezone(&Utc)).num_minutes();
            info!(
                processed = checkpoint.processed_count,
                total = checkpoint.total_items,
                age_minutes,
                "checkpoint found"
            );
        }
        Err(_) => warn!(
            timestamp = %checkpoint.timestamp,
            "checkpoint carries an unparseable timestamp"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UnitLevel;
    use std::fs;

    fn item(name: &str, resolved: bool) -> Item {
        Item {
            name: name.to_string(),
            category: "Drug".to_string(),
            units: vec![UnitLevel::new("Tablet", "Tablets", 30)],
            packaging_structure: resolved.then(Vec::new),
            earliest_expiry_date: String::new(),
            later_expiry_dates: Vec::new(),
        }
    }

    #[test]
    fn status_never_mutates_the_collection() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CollectionStore::new(&dir.path().join("drugs.json"));
        store
            .save_collection(&[item("A", true), item("B", false)])
            .expect("seed");
        let before = fs::read(store.collection_path()).expect("snapshot");

        run(StatusArgs {
            collection: store.collection_path().to_path_buf(),
            batch_size: 12,
        })
        .expect("status");

        let after = fs::read(store.collection_path()).expect("snapshot");
        assert_eq!(before, after);
    }

    #[test]
    fn status_tolerates_a_checkpoint_without_a_working_copy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CollectionStore::new(&dir.path().join("drugs.json"));
        store.save_collection(&[item("A", false)]).expect("seed");

        let state = ResolutionState::new(1);
        store.save_checkpoint(&state.to_checkpoint()).expect("checkpoint");

        run(StatusArgs {
            collection: store.collection_path().to_path_buf(),
            batch_size: 12,
        })
        .expect("status must not fail where resolve would");
    }
}
