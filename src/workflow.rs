use std::collections::BTreeSet;

use anyhow::{Result, bail};

use crate::model::{Checkpoint, Item};
use crate::oracle::{OracleResult, ResultMatch, match_result};
use crate::util::now_utc_string;

pub const DEFAULT_BATCH_SIZE: usize = 12;

/// Which collection indices a resolution run has already settled.
#[derive(Debug, Clone)]
pub struct ResolutionState {
    total_items: usize,
    processed: BTreeSet<usize>,
}

impl ResolutionState {
    pub fn new(total_items: usize) -> Self {
        Self {
            total_items,
            processed: BTreeSet::new(),
        }
    }

    /// Marks every item that already carries a `packagingStructure` key as
    /// processed. Present-but-empty counts: that is the settled shape of a
    /// single-level item.
    pub fn seed_from_items(items: &[Item]) -> Self {
        let mut state = Self::new(items.len());
        for (index, item) in items.iter().enumerate() {
            if item.is_resolved() {
                state.processed.insert(index);
            }
        }
        state
    }

    pub fn from_checkpoint(checkpoint: &Checkpoint, total_items: usize) -> Result<Self> {
        if checkpoint.total_items != total_items {
            bail!(
                "checkpoint covers {} items but the collection holds {}; \
                 delete the checkpoint to start over",
                checkpoint.total_items,
                total_items
            );
        }

        let mut state = Self::new(total_items);
        for &index in &checkpoint.processed_indices {
            if index >= total_items {
                bail!(
                    "checkpoint marks index {index} outside the collection; \
                     delete the checkpoint to start over"
                );
            }
            state.processed.insert(index);
        }
        Ok(state)
    }

    pub fn to_checkpoint(&self) -> Checkpoint {
        Checkpoint {
            processed_indices: self.processed.iter().copied().collect(),
            timestamp: now_utc_string(),
            total_items: self.total_items,
            processed_count: self.processed.len(),
        }
    }

    pub fn mark_processed(&mut self, index: usize) {
        if index < self.total_items {
            self.processed.insert(index);
        }
    }

    pub fn total_items(&self) -> usize {
        self.total_items
    }

    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    pub fn remaining_count(&self) -> usize {
        self.total_items - self.processed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.processed.len() == self.total_items
    }

    pub fn unprocessed_indices(&self) -> Vec<usize> {
        (0..self.total_items)
            .filter(|index| !self.processed.contains(index))
            .collect()
    }
}

/// One oracle request's worth of pending items. `number` is the 1-based
/// position in the current plan, which is what prompt headers show and what
/// `apply --batch-index` selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub number: usize,
    pub indices: Vec<usize>,
}

pub fn plan_batches(state: &ResolutionState, batch_size: usize) -> Vec<Batch> {
    let pending = state.unprocessed_indices();
    pending
        .chunks(batch_size.max(1))
        .enumerate()
        .map(|(offset, chunk)| Batch {
            number: offset + 1,
            indices: chunk.to_vec(),
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct MergeOutcome {
    pub matched_by_name: usize,
    pub matched_by_position: usize,
    pub misses: Vec<MatchMiss>,
}

impl MergeOutcome {
    pub fn matched(&self) -> usize {
        self.matched_by_name + self.matched_by_position
    }
}

/// An oracle result row that named no item in the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchMiss {
    pub name: Option<String>,
    pub index: Option<usize>,
}

/// Applies one batch's oracle results to the in-memory collection. Matched
/// results set `packagingStructure` (a row without the field settles as
/// resolved-empty) and mark the collection index processed; misses are
/// collected, never fatal, and leave their items pending for a later run.
pub fn merge_batch(
    items: &mut [Item],
    state: &mut ResolutionState,
    batch: &Batch,
    results: Vec<OracleResult>,
) -> MergeOutcome {
    let batch_names: Vec<String> = batch
        .indices
        .iter()
        .map(|&index| items[index].name.clone())
        .collect();

    let mut outcome = MergeOutcome::default();

    for result in results {
        let slot = match match_result(&batch_names, &result) {
            ResultMatch::MatchedByName { slot } => {
                outcome.matched_by_name += 1;
                slot
            }
            ResultMatch::MatchedByPosition { slot } => {
                outcome.matched_by_position += 1;
                slot
            }
            ResultMatch::Unmatched => {
                outcome.misses.push(MatchMiss {
                    name: result.name.clone(),
                    index: result.index,
                });
                continue;
            }
        };

        let collection_index = batch.indices[slot];
        items[collection_index].packaging_structure =
            Some(result.packaging_structure.unwrap_or_default());
        state.mark_processed(collection_index);
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContainmentEdge, UnitLevel};

    fn item(name: &str) -> Item {
        Item {
            name: name.to_string(),
            category: "Drug".to_string(),
            units: vec![
                UnitLevel::new("Pack", "Packs", 2),
                UnitLevel::new("Tablet", "Tablets", 20),
            ],
            packaging_structure: None,
            earliest_expiry_date: String::new(),
            later_expiry_dates: Vec::new(),
        }
    }

    fn items(count: usize) -> Vec<Item> {
        (0..count).map(|index| item(&format!("Item {index}"))).collect()
    }

    #[test]
    fn twenty_six_items_plan_into_three_batches_of_twelve() {
        let mut state = ResolutionState::new(26);
        let batches = plan_batches(&state, 12);

        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].number, 1);
        assert_eq!(batches[0].indices.len(), 12);
        assert_eq!(batches[1].indices.len(), 12);
        assert_eq!(batches[2].indices.len(), 2);
        assert_eq!(batches[2].indices, vec![24, 25]);

        for &index in &batches[0].indices {
            state.mark_processed(index);
        }
        let reloaded = ResolutionState::from_checkpoint(&state.to_checkpoint(), 26)
            .expect("checkpoint restores");
        let remaining = plan_batches(&reloaded, 12);
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].indices.len(), 12);
        assert_eq!(remaining[1].indices, vec![24, 25]);
    }

    #[test]
    fn planning_skips_processed_indices_in_order() {
        let mut state = ResolutionState::new(6);
        state.mark_processed(0);
        state.mark_processed(3);

        let batches = plan_batches(&state, 3);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].indices, vec![1, 2, 4]);
        assert_eq!(batches[1].indices, vec![5]);
    }

    #[test]
    fn seeding_counts_empty_structures_as_resolved() {
        let mut collection = items(3);
        collection[1].packaging_structure = Some(Vec::new());

        let state = ResolutionState::seed_from_items(&collection);
        assert_eq!(state.processed_count(), 1);
        assert_eq!(state.unprocessed_indices(), vec![0, 2]);
    }

    #[test]
    fn checkpoint_round_trip_preserves_progress() {
        let mut state = ResolutionState::new(5);
        state.mark_processed(4);
        state.mark_processed(1);

        let checkpoint = state.to_checkpoint();
        assert_eq!(checkpoint.processed_indices, vec![1, 4]);
        assert_eq!(checkpoint.total_items, 5);
        assert_eq!(checkpoint.processed_count, 2);

        let restored =
            ResolutionState::from_checkpoint(&checkpoint, 5).expect("checkpoint restores");
        assert_eq!(restored.unprocessed_indices(), vec![0, 2, 3]);
        assert_eq!(restored.remaining_count(), 3);
    }

    #[test]
    fn checkpoint_with_wrong_total_is_rejected() {
        let checkpoint = Checkpoint {
            processed_indices: vec![0],
            timestamp: String::new(),
            total_items: 10,
            processed_count: 1,
        };

        let error = ResolutionState::from_checkpoint(&checkpoint, 8)
            .expect_err("mismatched totals must fail");
        assert!(error.to_string().contains("delete the checkpoint"));
    }

    #[test]
    fn checkpoint_with_out_of_range_index_is_rejected() {
        let checkpoint = Checkpoint {
            processed_indices: vec![9],
            timestamp: String::new(),
            total_items: 5,
            processed_count: 1,
        };

        assert!(ResolutionState::from_checkpoint(&checkpoint, 5).is_err());
    }

    #[test]
    fn merging_matches_by_name_before_position() {
        let mut collection = items(3);
        let mut state = ResolutionState::new(3);
        let batch = Batch {
            number: 1,
            indices: vec![0, 1, 2],
        };

        let edges = vec![ContainmentEdge::new("Pack", 10, "Tablet")];
        let results = vec![
            OracleResult {
                index: Some(2), // wrong position, name wins
                name: Some("Item 0".to_string()),
                packaging_structure: Some(edges.clone()),
            },
            OracleResult {
                index: Some(1),
                name: Some("No Such Item".to_string()),
                packaging_structure: Some(Vec::new()),
            },
        ];

        let outcome = merge_batch(&mut collection, &mut state, &batch, results);

        assert_eq!(outcome.matched_by_name, 1);
        assert_eq!(outcome.matched_by_position, 1);
        assert!(outcome.misses.is_empty());
        assert_eq!(collection[0].packaging_structure, Some(edges));
        assert_eq!(collection[1].packaging_structure, Some(Vec::new()));
        assert_eq!(state.unprocessed_indices(), vec![2]);
    }

    #[test]
    fn unmatched_results_are_counted_not_fatal() {
        let mut collection = items(2);
        let mut state = ResolutionState::new(2);
        let batch = Batch {
            number: 1,
            indices: vec![0, 1],
        };

        let results = vec![OracleResult {
            index: Some(7),
            name: Some("Stranger".to_string()),
            packaging_structure: None,
        }];

        let outcome = merge_batch(&mut collection, &mut state, &batch, results);

        assert_eq!(outcome.matched(), 0);
        assert_eq!(
            outcome.misses,
            vec![MatchMiss {
                name: Some("Stranger".to_string()),
                index: Some(7),
            }]
        );
        assert!(!collection[0].is_resolved());
        assert_eq!(state.processed_count(), 0);
    }

    #[test]
    fn result_without_structure_field_settles_as_resolved_empty() {
        let mut collection = items(1);
        let mut state = ResolutionState::new(1);
        let batch = Batch {
            number: 1,
            indices: vec![0],
        };

        let results = vec![OracleResult {
            index: Some(0),
            name: Some("Item 0".to_string()),
            packaging_structure: None,
        }];

        merge_batch(&mut collection, &mut state, &batch, results);

        assert_eq!(collection[0].packaging_structure, Some(Vec::new()));
        assert!(state.is_complete());
    }
}
