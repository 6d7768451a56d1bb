use std::collections::BTreeMap;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::{DeriveArgs, DeriveStrategy};
use crate::packaging;
use crate::store::CollectionStore;
use crate::util::{now_utc_string, write_json_pretty};

pub fn run(args: DeriveArgs) -> Result<()> {
    let store = CollectionStore::new(&args.collection);
    let mut items = store.load_collection()?;

    info!(
        items = items.len(),
        strategy = args.strategy.as_str(),
        path = %args.collection.display(),
        "deriving packaging structures"
    );

    let mut patterns: BTreeMap<String, usize> = BTreeMap::new();
    let mut gaps = Vec::new();
    let mut items_with_gaps = 0usize;

    for item in &mut items {
        let edges = match args.strategy {
            DeriveStrategy::Quantity => {
                let derivation = packaging::derive_structure(&item.units);
                if derivation.is_broken() {
                    items_with_gaps += 1;
                }
                for gap in &derivation.gaps {
                    warn!(
                        item = %item.name,
                        upper = %gap.upper,
                        lower = %gap.lower,
                        reason = %gap.reason,
                        "quantity ratio gap"
                    );
                    gaps.push(GapEntry {
                        item: item.name.clone(),
                        upper: gap.upper.clone(),
                        lower: gap.lower.clone(),
                        reason: gap.reason.to_string(),
                    });
                }
                derivation.into_edges()
            }
            DeriveStrategy::Convention => packaging::convention_structure(&item.units),
        };

        *patterns.entry(packaging::pattern_key(&edges)).or_insert(0) += 1;
        item.packaging_structure = Some(edges);
    }

    store.save_collection(&items)?;
    info!(
        items = items.len(),
        path = %args.collection.display(),
        "rewrote collection with derived structures"
    );

    let mut histogram: Vec<(String, usize)> = patterns.into_iter().collect();
    histogram.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    for (pattern, count) in &histogram {
        info!(pattern = %pattern, count, "packaging pattern");
    }
    if !gaps.is_empty() {
        warn!(
            items = items_with_gaps,
            gaps = gaps.len(),
            "ratio gaps left partial structures; see the report or re-run resolve"
        );
    }

    if let Some(report_path) = args.report_path {
        let report = DeriveReport {
            generated_at: now_utc_string(),
            collection: args.collection.display().to_string(),
            strategy: args.strategy.as_str().to_string(),
            item_count: items.len(),
            items_with_gaps,
            patterns: histogram
                .into_iter()
                .map(|(pattern, count)| PatternCount { pattern, count })
                .collect(),
            gaps,
        };
        write_json_pretty(&report_path, &report)?;
        info!(path = %report_path.display(), "wrote derivation report");
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct DeriveReport {
    generated_at: String,
    collection: String,
    strategy: String,
    item_count: usize,
    items_with_gaps: usize,
    patterns: Vec<PatternCount>,
    gaps: Vec<GapEntry>,
}

#[derive(Debug, Serialize)]
struct PatternCount {
    pattern: String,
    count: usize,
}

#[derive(Debug, Serialize)]
struct GapEntry {
    item: String,
    upper: String,
    lower: String,
    reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContainmentEdge, Item, UnitLevel};

    fn collection() -> Vec<Item> {
        vec![
            Item {
                name: "Amoxicillin 500mg".to_string(),
                category: "Drug".to_string(),
                units: vec![
                    UnitLevel::new("Pack", "Packs", 2),
                    UnitLevel::new("Card", "Cards", 20),
                    UnitLevel::new("Tablet", "Tablets", 200),
                ],
                packaging_structure: Some(vec![ContainmentEdge::new("Pack", 999, "Card")]),
                earliest_expiry_date: String::new(),
                later_expiry_dates: Vec::new(),
            },
            Item {
                name: "Zinc syrup".to_string(),
                category: "Drug".to_string(),
                units: vec![UnitLevel::new("Bottle", "Bottles", 12)],
                packaging_structure: None,
                earliest_expiry_date: String::new(),
                later_expiry_dates: Vec::new(),
            },
        ]
    }

    #[test]
    fn quantity_strategy_overwrites_existing_structures() {
        let dir = tempfile::tempdir().expect("tempdir");
        let collection_path = dir.path().join("drugs.json");
        let store = CollectionStore::new(&collection_path);
        store.save_collection(&collection()).expect("seed");

        run(DeriveArgs {
            collection: collection_path.clone(),
            strategy: DeriveStrategy::Quantity,
            report_path: Some(dir.path().join("derive_report.json")),
        })
        .expect("derive");

        let items = store.load_collection().expect("reload");
        let edges = items[0].packaging_structure.as_ref().expect("structure");
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0], ContainmentEdge::new("Pack", 10, "Card"));
        assert_eq!(edges[1], ContainmentEdge::new("Card", 10, "Tablet"));

        assert_eq!(items[1].packaging_structure, Some(Vec::new()));
        assert!(dir.path().join("derive_report.json").exists());
    }

    #[test]
    fn convention_strategy_uses_the_container_exception() {
        let dir = tempfile::tempdir().expect("tempdir");
        let collection_path = dir.path().join("drugs.json");
        let store = CollectionStore::new(&collection_path);
        store
            .save_collection(&[Item {
                name: "Vitamin C 100mg".to_string(),
                category: "Drug".to_string(),
                units: vec![
                    UnitLevel::new("Container", "Containers", 1),
                    UnitLevel::new("Tablet", "Tablets", 500),
                ],
                packaging_structure: None,
                earliest_expiry_date: String::new(),
                later_expiry_dates: Vec::new(),
            }])
            .expect("seed");

        run(DeriveArgs {
            collection: collection_path,
            strategy: DeriveStrategy::Convention,
            report_path: None,
        })
        .expect("derive");

        let items = store.load_collection().expect("reload");
        let edges = items[0].packaging_structure.as_ref().expect("structure");
        assert_eq!(edges, &vec![ContainmentEdge::new("Container", 100, "Tablet")]);
    }
}
