use std::fmt;

use crate::model::{ContainmentEdge, UnitLevel};

pub const CONVENTION_DEFAULT_RATIO: u64 = 10;
pub const CONVENTION_CONTAINER_TABLET_RATIO: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapReason {
    ZeroBaseQuantity,
    RatioRoundedToZero,
}

impl fmt::Display for GapReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GapReason::ZeroBaseQuantity => write!(f, "zero base quantity"),
            GapReason::RatioRoundedToZero => write!(f, "ratio rounded to zero"),
        }
    }
}

/// An adjacent unit pair whose containment ratio could not be formed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatioGap {
    pub upper: String,
    pub lower: String,
    pub reason: GapReason,
}

#[derive(Debug, Clone, Default)]
pub struct StructureDerivation {
    pub edges: Vec<ContainmentEdge>,
    pub gaps: Vec<RatioGap>,
}

impl StructureDerivation {
    pub fn is_broken(&self) -> bool {
        !self.gaps.is_empty()
    }

    pub fn into_edges(self) -> Vec<ContainmentEdge> {
        self.edges
    }
}

/// Derives containment edges from the on-hand quantities of adjacent unit
/// levels. Each pair's ratio is `lower.quantity / upper.quantity` rounded to
/// the nearest integer, ties away from zero. Pairs with a zero upper
/// quantity, or whose ratio rounds to zero, yield a gap instead of an edge;
/// the remaining pairs still contribute their edges.
pub fn derive_structure(units: &[UnitLevel]) -> StructureDerivation {
    let mut derivation = StructureDerivation::default();
    if units.len() <= 1 {
        return derivation;
    }

    for pair in units.windows(2) {
        let upper = &pair[0];
        let lower = &pair[1];

        if upper.quantity == 0 {
            derivation.gaps.push(RatioGap {
                upper: upper.name.clone(),
                lower: lower.name.clone(),
                reason: GapReason::ZeroBaseQuantity,
            });
            continue;
        }

        let ratio = (lower.quantity as f64 / upper.quantity as f64).round();
        if ratio >= 1.0 {
            derivation.edges.push(ContainmentEdge {
                unit: upper.name.clone(),
                contains: ratio as u64,
                of: lower.name.clone(),
            });
        } else {
            derivation.gaps.push(RatioGap {
                upper: upper.name.clone(),
                lower: lower.name.clone(),
                reason: GapReason::RatioRoundedToZero,
            });
        }
    }

    derivation
}

/// Standard pharmaceutical packaging ratios for when no quantities are
/// trustworthy: containers of tablets hold 100, every other adjacent pair
/// holds 10.
pub fn convention_structure(units: &[UnitLevel]) -> Vec<ContainmentEdge> {
    if units.len() <= 1 {
        return Vec::new();
    }

    if units.len() == 2 && units[0].name == "Container" && units[1].name == "Tablet" {
        return vec![ContainmentEdge::new(
            "Container",
            CONVENTION_CONTAINER_TABLET_RATIO,
            "Tablet",
        )];
    }

    units
        .windows(2)
        .map(|pair| ContainmentEdge::new(&pair[0].name, CONVENTION_DEFAULT_RATIO, &pair[1].name))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructureFinding {
    UnknownUnit { referenced: String },
    BrokenChain { from: String, to: String },
    ZeroContains { unit: String, of: String },
}

impl fmt::Display for StructureFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructureFinding::UnknownUnit { referenced } => {
                write!(f, "structure references unknown unit '{referenced}'")
            }
            StructureFinding::BrokenChain { from, to } => {
                write!(f, "broken hierarchy chain: {from} -> {to}")
            }
            StructureFinding::ZeroContains { unit, of } => {
                write!(f, "edge {unit} -> {of} contains zero")
            }
        }
    }
}

pub fn validate_structure(
    units: &[UnitLevel],
    edges: &[ContainmentEdge],
) -> Vec<StructureFinding> {
    let mut findings = Vec::new();
    let known: Vec<&str> = units.iter().map(|unit| unit.name.as_str()).collect();

    for edge in edges {
        if !known.contains(&edge.unit.as_str()) {
            findings.push(StructureFinding::UnknownUnit {
                referenced: edge.unit.clone(),
            });
        }
        if !known.contains(&edge.of.as_str()) {
            findings.push(StructureFinding::UnknownUnit {
                referenced: edge.of.clone(),
            });
        }
        if edge.contains == 0 {
            findings.push(StructureFinding::ZeroContains {
                unit: edge.unit.clone(),
                of: edge.of.clone(),
            });
        }
    }

    for pair in edges.windows(2) {
        if pair[0].of != pair[1].unit {
            findings.push(StructureFinding::BrokenChain {
                from: pair[0].of.clone(),
                to: pair[1].unit.clone(),
            });
        }
    }

    findings
}

/// How many of the smallest unit fit in one top-level unit, when the chain
/// is intact. `None` for empty structures or on overflow.
pub fn base_units_per_top(edges: &[ContainmentEdge]) -> Option<u64> {
    if edges.is_empty() {
        return None;
    }

    let mut total: u64 = 1;
    for edge in edges {
        total = total.checked_mul(edge.contains)?;
    }
    Some(total)
}

pub fn pattern_key(edges: &[ContainmentEdge]) -> String {
    if edges.is_empty() {
        return "single-unit".to_string();
    }

    edges
        .iter()
        .map(|edge| format!("{}({})", edge.unit, edge.contains))
        .collect::<Vec<String>>()
        .join(" -> ")
}
