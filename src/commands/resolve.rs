use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::cli::ResolveArgs;
use crate::model::Item;
use crate::oracle::{self, ChatOracle, Oracle};
use crate::store::{CollectionStore, Session};
use crate::workflow::{self, ResolutionState};

pub fn run(args: ResolveArgs) -> Result<()> {
    let api_key = args
        .api_key
        .or_else(|| std::env::var("OPENAI_API_KEY").ok());
    let Some(api_key) = api_key else {
        bail!("no API key available; pass --api-key or set OPENAI_API_KEY");
    };

    let store = CollectionStore::new(&args.collection);
    let mut session = store.open_session()?;

    if args.reresolve_all {
        if session.resumed {
            bail!(
                "--reresolve-all cannot run while a checkpoint exists; \
                 finish the session or delete {} first",
                store.checkpoint_path().display()
            );
        }
        session.state = ResolutionState::new(session.items.len());
    }

    info!(
        items = session.items.len(),
        resolved = session.state.processed_count(),
        resumed = session.resumed,
        path = %args.collection.display(),
        "loaded collection"
    );

    if session.state.is_complete() {
        if session.resumed {
            finalize(&store, &session.items)?;
        } else {
            info!("every item already carries a packaging structure; nothing to resolve");
        }
        return Ok(());
    }

    if !session.resumed {
        let backup = store.write_backup(&session.items)?;
        info!(path = %backup.display(), "wrote collection backup");
    }

    let oracle = ChatOracle::new(&args.api_url, &args.model, &api_key)
        .context("failed to build the oracle client")?;

    resolve_pending(&store, &mut session, &oracle, args.batch_size)?;
    finalize(&store, &session.items)?;

    Ok(())
}

/// Runs every pending batch through the oracle, persisting the working copy
/// and checkpoint after each merge so an abort costs at most one batch.
fn resolve_pending(
    store: &CollectionStore,
    session: &mut Session,
    oracle: &dyn Oracle,
    batch_size: usize,
) -> Result<()> {
    let batches = workflow::plan_batches(&session.state, batch_size);
    let total = batches.len();

    info!(
        batches = total,
        pending = session.state.remaining_count(),
        batch_size,
        "planned resolution batches"
    );

    for batch in &batches {
        info!(
            batch = batch.number,
            of = total,
            items = batch.indices.len(),
            "requesting batch resolution"
        );

        let batch_items: Vec<&Item> = batch
            .indices
            .iter()
            .map(|&index| &session.items[index])
            .collect();
        let prompt = oracle::render_prompt(&batch_items);

        let raw = oracle.ask(&prompt).with_context(|| {
            format!(
                "batch {}/{total} request failed; re-run resolve to resume from the checkpoint",
                batch.number
            )
        })?;
        let results = oracle::parse_response(&raw).with_context(|| {
            format!(
                "batch {}/{total} returned an unusable response; re-run resolve to retry it",
                batch.number
            )
        })?;

        let outcome = workflow::merge_batch(&mut session.items, &mut session.state, batch, results);
        info!(
            batch = batch.number,
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
        info!(
            processed = session.state.processed_count(),
            total = session.state.total_items(),
            "checkpoint saved"
        );
    }

    Ok(())
}

fn finalize(store: &CollectionStore, items: &[Item]) -> Result<()> {
    store.complete_session(items)?;

    let resolved = items.iter().filter(|item| item.is_resolved()).count();
    info!(
        resolved,
        total = items.len(),
        path = %store.collection_path().display(),
        "collection finalized; session artifacts removed"
    );

    Ok(())
}
