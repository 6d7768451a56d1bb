use anyhow::{Context, Result};
use chrono::NaiveDate;
use regex::Regex;

/// Parses the expiry tokens found in supplier CSV exports.
pub struct ExpiryParser {
    token: Regex,
}

impl ExpiryParser {
    pub fn new() -> Result<Self> {
        let token = Regex::new(r"^(\d{1,2})/(\d{2}|\d{4})$")
            .context("failed to compile expiry token regex")?;
        Ok(Self { token })
    }

    /// `M/YY`, `MM/YY` or `MM/YYYY` become the first day of that month;
    /// two-digit years are 2000s. Blank cells and the `-` / `n/a` markers
    /// read as unknown, as does any other shape.
    pub fn parse(&self, cell: &str) -> Option<NaiveDate> {
        let cell = cell.trim();
        if cell.is_empty() || cell == "-" || cell.eq_ignore_ascii_case("n/a") {
            return None;
        }

        let captures = self.token.captures(cell)?;
        let month = captures.get(1)?.as_str().parse::<u32>().ok()?;
        let year_raw = captures.get(2)?.as_str();
        let mut year = year_raw.parse::<i32>().ok()?;
        if year_raw.len() == 2 {
            year += 2000;
        }

        NaiveDate::from_ymd_opt(year, month, 1)
    }
}

/// Orders a pair of expiry dates into earliest plus the strictly-later rest.
/// Equal dates collapse into the earliest alone.
pub fn earliest_and_later(
    first: Option<NaiveDate>,
    second: Option<NaiveDate>,
) -> (Option<NaiveDate>, Vec<NaiveDate>) {
    match (first, second) {
        (None, None) => (None, Vec::new()),
        (Some(date), None) | (None, Some(date)) => (Some(date), Vec::new()),
        (Some(first), Some(second)) => {
            if first < second {
                (Some(first), vec![second])
            } else if second < first {
                (Some(second), vec![first])
            } else {
                (Some(first), Vec::new())
            }
        }
    }
}

pub fn iso_date_string(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
