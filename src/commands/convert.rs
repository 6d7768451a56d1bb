use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use csv::ReaderBuilder;
use serde::Serialize;
use tracing::info;

use crate::cli::{Category, ConvertArgs};
use crate::expiry::{self, ExpiryParser, iso_date_string};
use crate::model::{Item, UnitLevel};
use crate::util::{now_utc_string, sha256_file, write_json_pretty};

pub fn run(args: ConvertArgs) -> Result<()> {
    let parser = ExpiryParser::new()?;
    let table = read_table(&args.csv)?;
    let row_count = table.rows.len();

    let items = convert_rows(&table, args.category, &parser);
    let skipped_rows = row_count - items.len();

    let out_path = args
        .out
        .unwrap_or_else(|| args.csv.with_file_name(args.category.default_output_name()));

    write_json_pretty(&out_path, &items)?;
    info!(
        category = args.category.label(),
        items = items.len(),
        skipped = skipped_rows,
        path = %out_path.display(),
        "wrote seed collection"
    );

    if let Some(manifest_path) = args.manifest_path {
        let manifest = ConvertRunManifest {
            manifest_version: 1,
            generated_at: now_utc_string(),
            category: args.category.label().to_string(),
            source_csv: args.csv.display().to_string(),
            source_sha256: sha256_file(&args.csv)?,
            output_path: out_path.display().to_string(),
            item_count: items.len(),
            skipped_rows,
        };
        write_json_pretty(&manifest_path, &manifest)?;
        info!(path = %manifest_path.display(), "wrote conversion manifest");
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct ConvertRunManifest {
    manifest_version: u32,
    generated_at: String,
    category: String,
    source_csv: String,
    source_sha256: String,
    output_path: String,
    item_count: usize,
    skipped_rows: usize,
}

struct Table {
    columns: HashMap<String, usize>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Cell lookup is total: a missing column or short row reads as empty,
    /// the same way the spreadsheets hand us ragged exports.
    fn cell<'a>(&self, row: &'a [String], column: &str) -> &'a str {
        self.columns
            .get(column)
            .and_then(|&index| row.get(index))
            .map(String::as_str)
            .unwrap_or("")
    }
}

fn read_table(path: &Path) -> Result<Table> {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let mut columns = HashMap::new();
    let headers = reader
        .headers()
        .with_context(|| format!("failed to read CSV headers from {}", path.display()))?;
    for (index, header) in headers.iter().enumerate() {
        let header = header.trim_matches('\u{feff}').trim().to_string();
        columns.entry(header).or_insert(index);
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record
            .with_context(|| format!("failed to read CSV record from {}", path.display()))?;
        rows.push(record.iter().map(ToOwned::to_owned).collect());
    }

    Ok(Table { columns, rows })
}

fn convert_rows(table: &Table, category: Category, parser: &ExpiryParser) -> Vec<Item> {
    table
        .rows
        .iter()
        .filter_map(|row| match category {
            Category::Drug => map_drug(table, row, parser),
            Category::Consumable => map_consumable(table, row, parser),
            Category::Infusion => map_infusion(table, row, parser),
            Category::Injection => map_injection(table, row, parser),
            Category::Ointment => map_ointment(table, row, parser),
            Category::SuspensionSyrup => map_suspension_syrup(table, row, parser),
        })
        .collect()
}

fn build_item(
    name: &str,
    category: &str,
    units: Vec<UnitLevel>,
    earliest: Option<NaiveDate>,
    later: Vec<NaiveDate>,
) -> Item {
    Item {
        name: name.to_string(),
        category: category.to_string(),
        units,
        packaging_structure: None,
        earliest_expiry_date: earliest.map(iso_date_string).unwrap_or_default(),
        later_expiry_dates: later.into_iter().map(iso_date_string).collect(),
    }
}

fn clean_name(raw: &str) -> Option<&str> {
    let name = raw.trim();
    (!name.is_empty()).then_some(name)
}

/// Drug sheets use `n/a` and `-` as explicit blanks, in the name column too.
fn drug_cell(raw: &str) -> Option<&str> {
    let value = raw.trim();
    if value.is_empty() || value == "-" || value.eq_ignore_ascii_case("n/a") {
        return None;
    }
    Some(value)
}

fn positive_quantity(raw: &str) -> Option<u64> {
    drug_cell(raw)?.parse::<u64>().ok().filter(|&quantity| quantity > 0)
}

fn optional_quantity(raw: &str) -> Option<u64> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }
    value.parse::<u64>().ok()
}

fn quantity_or_zero(raw: &str) -> u64 {
    raw.trim().parse::<u64>().unwrap_or(0)
}

/// Injection sheets mark hand-counted cells with asterisks (`*13*`) and
/// out-of-stock cells with `-`.
fn injection_quantity(raw: &str) -> u64 {
    let value = raw.trim();
    if value.is_empty() || value == "-" {
        return 0;
    }
    value.replace('*', "").parse::<u64>().unwrap_or(0)
}

fn map_drug(table: &Table, row: &[String], parser: &ExpiryParser) -> Option<Item> {
    let name = drug_cell(table.cell(row, "Pills"))?;
    let pack_container = positive_quantity(table.cell(row, "Pack/Container"));
    let card = positive_quantity(table.cell(row, "Card"));
    let tablets = positive_quantity(table.cell(row, "Tablets"));

    let mut units = Vec::new();
    match (pack_container, card) {
        // A pack figure with no card figure means the sheet counted loose
        // containers, not blister packs.
        (Some(containers), None) => {
            units.push(UnitLevel::new("Container", "Containers", containers));
            if let Some(tablets) = tablets {
                units.push(UnitLevel::new("Tablet", "Tablets", tablets));
            }
        }
        (pack_container, card) => {
            if let Some(packs) = pack_container {
                units.push(UnitLevel::new("Pack", "Packs", packs));
            }
            if let Some(cards) = card {
                units.push(UnitLevel::new("Card", "Cards", cards));
            }
            if let Some(tablets) = tablets {
                units.push(UnitLevel::new("Tablet", "Tablets", tablets));
            }
        }
    }

    if units.is_empty() {
        return None;
    }

    let first = parser.parse(table.cell(row, "Exp. Date"));
    let second = parser.parse(table.cell(row, "Exp. Date 2"));
    let (earliest, later) = expiry::earliest_and_later(first, second);

    Some(build_item(name, "Drug", units, earliest, later))
}

fn map_consumable(table: &Table, row: &[String], parser: &ExpiryParser) -> Option<Item> {
    let name = clean_name(table.cell(row, "Item"))?;
    let packs = optional_quantity(table.cell(row, "Pack"));
    let loose = optional_quantity(table.cell(row, "Units"));

    let units = match (packs, loose) {
        (Some(packs), Some(loose)) if packs != loose => vec![
            UnitLevel::new("Pack", "Packs", packs),
            UnitLevel::new("Unit", "Units", loose),
        ],
        (Some(_), Some(loose)) => vec![UnitLevel::new("Unit", "Units", loose)],
        (Some(packs), None) => vec![UnitLevel::new("Unit", "Units", packs)],
        (None, Some(loose)) => vec![UnitLevel::new("Unit", "Units", loose)],
        (None, None) => vec![UnitLevel::new("Unit", "Units", 0)],
    };

    let earliest = parser.parse(table.cell(row, "Expiry Date"));
    Some(build_item(name, "Consumable", units, earliest, Vec::new()))
}

fn map_infusion(table: &Table, row: &[String], parser: &ExpiryParser) -> Option<Item> {
    let name = clean_name(table.cell(row, "Intravenous Fluids"))?;
    let cartons = quantity_or_zero(table.cell(row, "Carton"));
    let pieces = quantity_or_zero(table.cell(row, "Pieces"));

    let units = vec![
        UnitLevel::new("Carton", "Cartons", cartons),
        UnitLevel::new("Unit", "Units", pieces),
    ];

    let earliest = parser.parse(table.cell(row, "Expiry Date"));
    Some(build_item(name, "Infusion", units, earliest, Vec::new()))
}

fn map_injection(table: &Table, row: &[String], parser: &ExpiryParser) -> Option<Item> {
    let name = clean_name(table.cell(row, "Name"))?;
    let packs = injection_quantity(table.cell(row, "pack"));
    let ampoules = injection_quantity(table.cell(row, "Ampoule/Vial"));

    let mut units = Vec::new();
    if packs > 0 && ampoules > 0 {
        units.push(UnitLevel::new("Pack", "Packs", packs));
        units.push(UnitLevel::new("Ampoule/Vial", "Ampoules/Vials", ampoules));
    } else if ampoules > 0 {
        units.push(UnitLevel::new("Ampoule/Vial", "Ampoules/Vials", ampoules));
    } else if packs > 0 {
        units.push(UnitLevel::new("Pack", "Packs", packs));
    }

    let first = parser.parse(table.cell(row, "Expiry date"));
    let second = parser.parse(table.cell(row, "Exp. date 2"));
    let (earliest, later) = match (first, second) {
        (Some(first), Some(second)) if second > first => (Some(first), vec![second]),
        (Some(first), Some(second)) => (Some(second), vec![first]),
        (Some(first), None) => (Some(first), Vec::new()),
        (None, second) => (second, Vec::new()),
    };

    Some(build_item(name, "Injection", units, earliest, later))
}

fn map_ointment(table: &Table, row: &[String], parser: &ExpiryParser) -> Option<Item> {
    let name = clean_name(table.cell(row, "Ointments"))?;
    let quantity = quantity_or_zero(table.cell(row, "units"));
    let units = vec![UnitLevel::new("Unit", "Units", quantity)];

    let earliest = parser.parse(table.cell(row, "Expiry date"));
    Some(build_item(name, "Ointment", units, earliest, Vec::new()))
}

fn map_suspension_syrup(table: &Table, row: &[String], parser: &ExpiryParser) -> Option<Item> {
    let name = clean_name(table.cell(row, "Name"))?;
    let quantity = quantity_or_zero(table.cell(row, "Qty (Sachet or Bottle)"));
    let units = vec![UnitLevel::new(
        "Sachet or Bottle",
        "Sachets or Bottles",
        quantity,
    )];

    let earliest = parser.parse(table.cell(row, "Expiry Date"));
    Some(build_item(
        name,
        "Suspension or Syrup",
        units,
        earliest,
        Vec::new(),
    ))
}
