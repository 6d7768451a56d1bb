use std::fs;

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::PromptsArgs;
use crate::model::Item;
use crate::oracle;
use crate::store::CollectionStore;
use crate::workflow;

pub fn run(args: PromptsArgs) -> Result<()> {
    let store = CollectionStore::new(&args.collection);
    let session = store.open_session()?;

    let batches = workflow::plan_batches(&session.state, args.batch_size);
    if batches.is_empty() {
        info!(
            items = session.items.len(),
            "every item already carries a packaging structure; no prompts to write"
        );
        return Ok(());
    }

    let pending: usize = batches.iter().map(|batch| batch.indices.len()).sum();
    let out_path = args.out.unwrap_or_else(|| store.prompts_path());

    let rule = "=".repeat(80);
    let mut text = String::new();
    text.push_str(&format!(
        "Generated {} prompts for manual processing\n",
        batches.len()
    ));
    text.push_str(&format!("Total items to process: {pending}\n"));
    text.push_str(&format!("{rule}\n\n"));

    for batch in &batches {
        let batch_items: Vec<&Item> = batch
            .indices
            .iter()
            .map(|&index| &session.items[index])
            .collect();

        text.push_str(&format!("BATCH {}/{}\n", batch.number, batches.len()));
        text.push_str(&format!("{rule}\n\n"));
        text.push_str(&oracle::render_prompt(&batch_items));
        text.push_str(&format!("\n\n{rule}\n\n"));
    }

    fs::write(&out_path, text)
        .with_context(|| format!("failed to write prompts to {}", out_path.display()))?;

    info!(
        batches = batches.len(),
        pending,
        path = %out_path.display(),
        "wrote oracle prompts; apply responses in header order, regenerating after each batch"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UnitLevel;

    fn item(name: &str, resolved: bool) -> Item {
        Item {
            name: name.to_string(),
            category: "Drug".to_string(),
            units: vec![
                UnitLevel::new("Pack", "Packs", 2),
                UnitLevel::new("Tablet", "Tablets", 200),
            ],
            packaging_structure: resolved.then(Vec::new),
            earliest_expiry_date: String::new(),
            later_expiry_dates: Vec::new(),
        }
    }

    #[test]
    fn prompts_cover_only_pending_items_with_batch_headers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CollectionStore::new(&dir.path().join("drugs.json"));
        store
            .save_collection(&[item("A", true), item("B", false), item("C", false)])
            .expect("seed");

        run(PromptsArgs {
            collection: store.collection_path().to_path_buf(),
            batch_size: 1,
            out: None,
        })
        .expect("prompts");

        let text = fs::read_to_string(store.prompts_path()).expect("read prompts");
        assert!(text.contains("Generated 2 prompts for manual processing"));
        assert!(text.contains("Total items to process: 2"));
        assert!(text.contains("BATCH 1/2"));
        assert!(text.contains("BATCH 2/2"));
        assert!(!text.contains("0. A"));
        assert!(text.contains("0. B"));
        assert!(text.contains("0. C"));
    }

    #[test]
    fn complete_collections_produce_no_prompts_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CollectionStore::new(&dir.path().join("drugs.json"));
        store.save_collection(&[item("A", true)]).expect("seed");

        run(PromptsArgs {
            collection: store.collection_path().to_path_buf(),
            batch_size: 12,
            out: None,
        })
        .expect("prompts");

        assert!(!store.prompts_path().exists());
    }
}
