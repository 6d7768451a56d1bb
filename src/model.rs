use serde::{Deserialize, Serialize};

/// One inventory item in a seed collection file.
///
/// `packaging_structure` stays absent until some resolution pass has settled
/// the item. An empty list is a settled single-level item, so absent and
/// empty must stay distinguishable on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub name: String,
    pub category: String,
    pub units: Vec<UnitLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packaging_structure: Option<Vec<ContainmentEdge>>,
    #[serde(default)]
    pub earliest_expiry_date: String,
    #[serde(default)]
    pub later_expiry_dates: Vec<String>,
}

impl Item {
    pub fn is_resolved(&self) -> bool {
        self.packaging_structure.is_some()
    }
}

/// One packaging level, ordered largest container first in `Item::units`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitLevel {
    pub name: String,
    pub plural: String,
    pub quantity: u64,
}

impl UnitLevel {
    pub fn new(name: &str, plural: &str, quantity: u64) -> Self {
        Self {
            name: name.to_string(),
            plural: plural.to_string(),
            quantity,
        }
    }
}

/// "Each `unit` contains `contains` of `of`."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainmentEdge {
    pub unit: String,
    pub contains: u64,
    pub of: String,
}

impl ContainmentEdge {
    pub fn new(unit: &str, contains: u64, of: &str) -> Self {
        Self {
            unit: unit.to_string(),
            contains,
            of: of.to_string(),
        }
    }
}

/// Resume bookkeeping persisted beside the collection after every merged
/// batch. `processed_indices` is kept sorted for stable on-disk diffs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub processed_indices: Vec<usize>,
    pub timestamp: String,
    pub total_items: usize,
    pub processed_count: usize,
}
