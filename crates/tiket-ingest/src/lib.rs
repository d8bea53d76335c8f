//! Ingestion & cleaning: turn an arbitrary raw tabular snapshot into a
//! priority-filtered, date-sliced candidate set with the canonical derived
//! columns present.

use std::collections::HashMap;

use chrono::NaiveDate;
use thiserror::Error;
use tiket_core::{normalize_column_name, parse_flexible_date, yyyymmdd, Table};
use tracing::{info, warn};

pub const CRATE_NAME: &str = "tiket-ingest";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("required columns missing: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
}

/// Normalized header lookup built once per table. All fuzzy column access
/// goes through here; nothing else normalizes names inline.
#[derive(Debug, Clone)]
pub struct ColumnIndex {
    positions: HashMap<String, usize>,
}

impl ColumnIndex {
    /// First occurrence wins when two headers normalize identically.
    pub fn new(table: &Table) -> Self {
        let mut positions = HashMap::new();
        for (i, name) in table.header.iter().enumerate() {
            positions.entry(normalize_column_name(name)).or_insert(i);
        }
        Self { positions }
    }

    pub fn get(&self, name: &str) -> Option<usize> {
        self.positions.get(&normalize_column_name(name)).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Cell accessor tolerant of short rows.
    pub fn cell<'a>(&self, row: &'a [String], name: &str) -> &'a str {
        self.get(name)
            .and_then(|i| row.get(i))
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Validate that every named column resolves through the normalized index,
/// reporting the exact missing names.
pub fn require_columns(table: &Table, names: &[&str]) -> Result<(), IngestError> {
    let index = ColumnIndex::new(table);
    let missing: Vec<String> = names
        .iter()
        .filter(|name| !index.contains(name))
        .map(|name| name.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(IngestError::MissingColumns(missing))
    }
}

/// Clean a raw snapshot:
/// 1. drop rows whose ticket-identity cell is blank or the literal `N/A`
///    (skipped when the snapshot has no identity column);
/// 2. drop rows whose transport type is blank or `FO TSEL`;
/// 3. keep only rows whose priority cell is literally `P1` or `P2`;
/// 4. synthesize the missing canonical columns.
///
/// Date slicing is deliberately separate (see [`select_date_slice`]) so the
/// H-1 → H-2 fallback can re-slice without re-cleaning.
pub fn clean(table: &Table) -> Table {
    if table.is_empty() {
        return ensure_derived_columns(table);
    }

    let index = ColumnIndex::new(table);
    let mut rows: Vec<Vec<String>> = table.rows.clone();

    if let Some(id_col) = index.get("TiketID") {
        rows.retain(|row| {
            let cell = row.get(id_col).map(String::as_str).unwrap_or("").trim();
            !cell.is_empty() && cell != "N/A"
        });
        info!(rows = rows.len(), "after ticket-identity filter");
    }

    if let Some(transport_col) = index.get("transporttype") {
        rows.retain(|row| {
            let cell = row
                .get(transport_col)
                .map(String::as_str)
                .unwrap_or("")
                .trim()
                .to_ascii_uppercase();
            !cell.is_empty() && cell != "FO TSEL"
        });
        info!(rows = rows.len(), "after transport-type filter");
    }

    if let Some(prio_col) = index.get("Prio").or_else(|| index.get("Priority")) {
        rows.retain(|row| {
            matches!(
                row.get(prio_col).map(String::as_str).unwrap_or(""),
                "P1" | "P2"
            )
        });
        info!(rows = rows.len(), "after priority filter");
    }

    let cleaned = Table {
        header: table.header.clone(),
        rows,
    };
    ensure_derived_columns(&cleaned)
}

/// Synthesize missing canonical columns from their upstream aliases:
/// `Prio` from `Priority`, `Aging` from `Count of >0.9`, `TrafMax` from
/// `Max Ethernet Port Daily`, `NeedClose` from `Suspect`, `Status`
/// defaulting to `Open`, and `TiketID` from `SITEID` + parsed `DATE`.
pub fn ensure_derived_columns(table: &Table) -> Table {
    if table.header.is_empty() {
        return table.clone();
    }

    let mut out = table.clone();

    let aliases: [(&str, &str); 4] = [
        ("Prio", "Priority"),
        ("Aging", "Count of >0.9"),
        ("TrafMax", "Max Ethernet Port Daily"),
        ("NeedClose", "Suspect"),
    ];
    for (derived, source) in aliases {
        let index = ColumnIndex::new(&out);
        if index.contains(derived) {
            continue;
        }
        if let Some(src) = index.get(source) {
            let values: Vec<String> = out
                .rows
                .iter()
                .map(|row| row.get(src).cloned().unwrap_or_default())
                .collect();
            push_column(&mut out, derived, values);
        }
    }

    let index = ColumnIndex::new(&out);
    if !index.contains("Status") {
        let values = vec!["Open".to_string(); out.rows.len()];
        push_column(&mut out, "Status", values);
    }

    let index = ColumnIndex::new(&out);
    if !index.contains("TiketID") {
        if let (Some(site), Some(date)) = (index.get("SITEID"), index.get("DATE")) {
            let values: Vec<String> = out
                .rows
                .iter()
                .map(|row| {
                    let site_id = row.get(site).map(String::as_str).unwrap_or("").trim();
                    let stamp = row
                        .get(date)
                        .map(String::as_str)
                        .and_then(parse_flexible_date)
                        .map(yyyymmdd)
                        .unwrap_or_default();
                    if site_id.is_empty() || stamp.is_empty() {
                        String::new()
                    } else {
                        format!("{site_id}{stamp}")
                    }
                })
                .collect();
            push_column(&mut out, "TiketID", values);
        }
    }

    out
}

fn push_column(table: &mut Table, name: &str, values: Vec<String>) {
    table.header.push(name.to_string());
    for (row, value) in table.rows.iter_mut().zip(values) {
        row.push(value);
    }
}

/// How a date-slice attempt resolved. `NoDateColumn` ("filter not
/// applicable") passes the rows through; `NoMatch` is a genuine empty
/// outcome callers may respond to by retrying with an older window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateSliceOutcome {
    NoDateColumn,
    NoMatch { column: String },
    Matched { column: String, matches: usize },
}

#[derive(Debug, Clone)]
pub struct DateSlice {
    pub table: Table,
    pub outcome: DateSliceOutcome,
    pub target: NaiveDate,
}

impl DateSlice {
    pub fn is_no_match(&self) -> bool {
        matches!(self.outcome, DateSliceOutcome::NoMatch { .. })
    }
}

const DATE_NAME_HINTS: [&str; 4] = ["date", "tanggal", "created", "update"];

/// Restrict rows to those dated `today − days_ago`. Every column whose name
/// suggests a date semantic is scored by how many of its cells parse to the
/// target date; the best-scoring column (first encountered wins ties) does
/// the filtering. Unparseable cells never count as matches.
pub fn select_date_slice(table: &Table, days_ago: i64, today: NaiveDate) -> DateSlice {
    let target = today - chrono::Duration::days(days_ago);

    let candidates: Vec<usize> = table
        .header
        .iter()
        .enumerate()
        .filter(|(_, name)| {
            let lower = name.to_ascii_lowercase();
            DATE_NAME_HINTS.iter().any(|hint| lower.contains(hint))
        })
        .map(|(i, _)| i)
        .collect();

    if candidates.is_empty() {
        warn!("no date-like column found; slice not applicable");
        return DateSlice {
            table: table.clone(),
            outcome: DateSliceOutcome::NoDateColumn,
            target,
        };
    }

    let mut best_col = candidates[0];
    let mut best_count = -1i64;
    for col in candidates {
        let count = table
            .rows
            .iter()
            .filter(|row| {
                row.get(col)
                    .map(String::as_str)
                    .and_then(parse_flexible_date)
                    == Some(target)
            })
            .count() as i64;
        if count > best_count {
            best_count = count;
            best_col = col;
        }
    }

    let column = table.header[best_col].clone();
    if best_count <= 0 {
        warn!(%target, column, "no rows match the target date");
        return DateSlice {
            table: Table::new(table.header.clone()),
            outcome: DateSliceOutcome::NoMatch { column },
            target,
        };
    }

    let rows: Vec<Vec<String>> = table
        .rows
        .iter()
        .filter(|row| {
            row.get(best_col)
                .map(String::as_str)
                .and_then(parse_flexible_date)
                == Some(target)
        })
        .cloned()
        .collect();
    info!(%target, column, rows = rows.len(), "date slice selected");

    DateSlice {
        table: Table {
            header: table.header.clone(),
            rows,
        },
        outcome: DateSliceOutcome::Matched {
            column,
            matches: best_count as usize,
        },
        target,
    }
}
