use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::ValidateArgs;
use crate::packaging;
use crate::store::CollectionStore;
use crate::util::{now_utc_string, write_json_pretty};

pub fn run(args: ValidateArgs) -> Result<()> {
    let store = CollectionStore::new(&args.collection);
    let items = store.load_collection()?;

    info!(
        items = items.len(),
        path = %args.collection.display(),
        "validating packaging structures"
    );

    let mut findings = Vec::new();
    let mut chains = Vec::new();
    let mut items_with_findings = 0usize;
    let mut unresolved = 0usize;

    for item in &items {
        let Some(edges) = &item.packaging_structure else {
            unresolved += 1;
            continue;
        };

        let item_findings = packaging::validate_structure(&item.units, edges);
        if item_findings.is_empty() {
            if let Some(total) = packaging::base_units_per_top(edges) {
                let top = &edges[0];
                let base = &edges[edges.len() - 1];
                chains.push(ChainEntry {
                    item: item.name.clone(),
                    base_units_per_top: total,
                    summary: format!("1 {} = {} {}s", top.unit, total, base.of),
                });
            }
            continue;
        }

        items_with_findings += 1;
        for finding in item_findings {
            warn!(item = %item.name, finding = %finding, "structure finding");
            findings.push(FindingEntry {
                item: item.name.clone(),
                detail: finding.to_string(),
            });
        }
    }

    if findings.is_empty() {
        info!(
            resolved = items.len() - unresolved,
            unresolved,
            intact_chains = chains.len(),
            "no structure findings"
        );
    } else {
        warn!(
            findings = findings.len(),
            items_with_findings,
            unresolved,
            "structure findings present; re-run derive or resolve for the named items"
        );
    }

    if let Some(report_path) = args.report_path {
        let report = ValidationReport {
            generated_at: now_utc_string(),
            collection: args.collection.display().to_string(),
            item_count: items.len(),
            resolved_count: items.len() - unresolved,
            unresolved_count: unresolved,
            items_with_findings,
            findings,
            chains,
        };
        write_json_pretty(&report_path, &report)?;
        info!(path = %report_path.display(), "wrote validation report");
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct ValidationReport {
    generated_at: String,
    collection: String,
    item_count: usize,
    resolved_count: usize,
    unresolved_count: usize,
    items_with_findings: usize,
    findings: Vec<FindingEntry>,
    chains: Vec<ChainEntry>,
}

#[derive(Debug, Serialize)]
struct FindingEntry {
    item: String,
    detail: String,
}

/// Per-item fold of an intact chain, e.g. "1 Pack = 100 Tablets".
#[derive(Debug, Serialize)]
struct ChainEntry {
    item: String,
    base_units_per_top: u64,
    summary: String,
}
