use std::fs;
use std::io::Read;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::cli::ApplyArgs;
use crate::oracle;
use crate::store::CollectionStore;
use crate::workflow;

pub fn run(args: ApplyArgs) -> Result<()> {
    let store = CollectionStore::new(&args.collection);
    let mut session = store.open_session()?;

    if session.state.is_complete() {
        if session.resumed {
            store.complete_session(&session.items)?;
            info!(
                path = %store.collection_path().display(),
                "collection finalized; session artifacts removed"
            );
            return Ok(());
        }
        bail!("every item is already resolved; nothing to apply");
    }

    // Batches are planned from the current state, so index 1 is always the
    // next pending batch. Regenerate the prompts file between applies to
    // keep its headers aligned.
    let batches = workflow::plan_batches(&session.state, args.batch_size);
    if args.batch_index == 0 || args.batch_index > batches.len() {
        bail!(
            "batch index {} is out of range; pending batches run 1..={}",
            args.batch_index,
            batches.len()
        );
    }
    let batch = &batches[args.batch_index - 1];

    let raw = match &args.response {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read response from {}", path.display()))?,
        None => {
            info!("reading oracle response from stdin");
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read response from stdin")?;
            buffer
        }
    };
    let results = oracle::parse_response(&raw).context("response is not a usable oracle payload")?;

    let names: Vec<&str> = batch
        .indices
        .iter()
        .map(|&index| session.items[index].name.as_str())
        .collect();
    info!(
        batch = batch.number,
        of = batches.len(),
        items = %names.join(", "),
        "applying manual response"
    );

    let outcome = workflow::merge_batch(&mut session.items, &mut session.state, batch, results);
    info!(
        matched = outcome.matched(),
        by_name = outcome.matched_by_name,
        by_position = outcome.matched_by_position,
        misses = outcome.misses.len(),
        "merged batch results"
    );
    for miss in &outcome.misses {
        warn!(
            name = miss.name.as_deref().unwrap_or("<unnamed>"),
            index = ?miss.index,
            "result matched no batch item; it stays unresolved"
        );
    }

    store.save_working_copy(&session.items)?;
    store.save_checkpoint(&session.state.to_checkpoint())?;

    if session.state.is_complete() {
        store.complete_session(&session.items)?;
        info!(
            total = session.state.total_items(),
            path = %store.collection_path().display(),
            "all items resolved; collection finalized"
        );
    } else {
        info!(
            processed = session.state.processed_count(),
            total = session.state.total_items(),
            remaining = session.state.remaining_count(),
            "progress saved; apply the next batch to continue"
        );
    }

    Ok(())
}
