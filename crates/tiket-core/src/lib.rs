//! Core domain model for the ticket tracker: canonical columns, lifecycle
//! enums, date handling and the typed ticket record.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "tiket-core";

/// Canonical column set of the database and history tables, in write order.
pub const GLOBAL_COLUMNS: [&str; 23] = [
    "VENDOR",
    "DATE",
    "SITEID",
    "Transport Type",
    "NOP",
    "Count of >0.9",
    "Util FEGE %",
    "Max Ethernet Port Daily",
    "BW",
    "Priority",
    "Suspect",
    "TiketID",
    "Update12feb",
    "StatusUpdate",
    "DateOpen",
    "Aging",
    "Status",
    "Updatetanggal",
    "closedby",
    "Note",
    "CapSiteSimpul",
    "CapIntermediateLink",
    "OtherPelurusanDataBW",
];

/// Canonicalize a column name for fuzzy lookup: lowercase, alphanumerics only.
///
/// Upstream data entry is inconsistent ("Transport Type", "transporttype",
/// "TRANSPORT_TYPE" all name the same column), so every header lookup goes
/// through this normalization exactly once, at index-build time.
pub fn normalize_column_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

const DATE_FORMATS: [&str; 5] = ["%m/%d/%Y", "%m/%d/%y", "%Y-%m-%d", "%d/%m/%Y", "%d/%m/%y"];

/// Parse a semi-structured date cell against a fixed, ordered format list,
/// falling back to digit extraction when exactly 8 digits remain.
pub fn parse_flexible_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Some(date);
        }
    }
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 8 {
        return NaiveDate::parse_from_str(&digits, "%Y%m%d").ok();
    }
    None
}

/// Render a date in the `YYYYMMDD` form the tables store.
pub fn yyyymmdd(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// Days elapsed since a `YYYYMMDD` open stamp, floored at zero.
/// Empty or malformed stamps count as zero days.
pub fn aging_days(date_open: &str, today: NaiveDate) -> i64 {
    match NaiveDate::parse_from_str(date_open.trim(), "%Y%m%d") {
        Ok(open) => (today - open).num_days().max(0),
        Err(_) => 0,
    }
}

/// Signed day distance from a `YYYYMMDD` stamp to `today`; `None` when the
/// stamp does not parse.
pub fn days_between_yyyymmdd(stamp: &str, today: NaiveDate) -> Option<i64> {
    NaiveDate::parse_from_str(stamp.trim(), "%Y%m%d")
        .ok()
        .map(|from| (today - from).num_days())
}

/// Ticket priority. Matching is strict: the literal cells `P1`/`P2` only,
/// case-sensitive — `p2` or `P3` are not priorities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    P1,
    P2,
}

impl Priority {
    pub fn parse_strict(cell: &str) -> Option<Self> {
        match cell {
            "P1" => Some(Priority::P1),
            "P2" => Some(Priority::P2),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::P1 => "P1",
            Priority::P2 => "P2",
        }
    }
}

/// Authoritative lifecycle state. `Clear` is not a status of its own: a
/// cleared ticket stays `Closed` and carries the advisory label in
/// [`StatusUpdate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Status {
    #[default]
    Open,
    Closed,
}

impl Status {
    /// Tolerant cell parse: `closed`/`clear` in any case mean closed,
    /// everything else (blank included) means open.
    pub fn parse_cell(cell: &str) -> Self {
        match cell.trim().to_ascii_lowercase().as_str() {
            "closed" | "clear" => Status::Closed,
            _ => Status::Open,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Open => "Open",
            Status::Closed => "Closed",
        }
    }
}

/// Derived display label riding on top of [`Status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StatusUpdate {
    #[default]
    Open,
    NeedClose,
    ReOpen,
    Clear,
    Closed,
}

impl StatusUpdate {
    pub fn parse_cell(cell: &str) -> Self {
        match cell.trim().to_ascii_lowercase().as_str() {
            "needclose" => StatusUpdate::NeedClose,
            "reopen" => StatusUpdate::ReOpen,
            "clear" => StatusUpdate::Clear,
            "closed" => StatusUpdate::Closed,
            _ => StatusUpdate::Open,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusUpdate::Open => "Open",
            StatusUpdate::NeedClose => "NeedClose",
            StatusUpdate::ReOpen => "ReOpen",
            StatusUpdate::Clear => "Clear",
            StatusUpdate::Closed => "Closed",
        }
    }
}

/// The single status-label derivation used by every reconciliation path:
/// new arrivals, reappearances, the passive aging refresh and the clear
/// check all go through here.
///
/// Open tickets: P1 always needs closing; P2 needs closing once aging
/// exceeds two days. Closed tickets flip to the advisory `Clear` label once
/// more than two days have passed since the closing stamp.
///
/// `ReOpen` is an event, not a derivation — reappearance call sites assign
/// it directly.
pub fn derive_status_update(
    priority: Option<Priority>,
    aging: i64,
    status: Status,
    days_since_close: i64,
) -> StatusUpdate {
    match status {
        Status::Open => match priority {
            Some(Priority::P1) => StatusUpdate::NeedClose,
            Some(Priority::P2) => {
                if aging > 2 {
                    StatusUpdate::NeedClose
                } else {
                    StatusUpdate::Open
                }
            }
            None => StatusUpdate::Open,
        },
        Status::Closed => {
            if days_since_close > 2 {
                StatusUpdate::Clear
            } else {
                StatusUpdate::Closed
            }
        }
    }
}

/// An ordered tabular snapshot: one header row plus data rows.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(header: Vec<String>) -> Self {
        Self {
            header,
            rows: Vec::new(),
        }
    }

    /// Build from raw sheet values: first row is the header (trimmed);
    /// short data rows pad with empty cells, long rows truncate.
    pub fn from_values(values: Vec<Vec<String>>) -> Self {
        let mut iter = values.into_iter();
        let header: Vec<String> = match iter.next() {
            Some(h) => h.into_iter().map(|c| c.trim().to_string()).collect(),
            None => return Table::default(),
        };
        let width = header.len();
        let rows = iter
            .map(|mut row| {
                row.truncate(width);
                while row.len() < width {
                    row.push(String::new());
                }
                row
            })
            .collect();
        Self { header, rows }
    }

    /// Header plus data rows, as written back to a store.
    pub fn to_values(&self) -> Vec<Vec<String>> {
        let mut out = Vec::with_capacity(self.rows.len() + 1);
        out.push(self.header.clone());
        out.extend(self.rows.iter().cloned());
        out
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Exact (trimmed) header position lookup. Fuzzy lookups live in the
    /// ingestion crate's column index.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h.trim() == name)
    }

    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// One typed row of the canonical database table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TicketRecord {
    pub vendor: String,
    pub date: String,
    pub site_id: String,
    pub transport_type: String,
    pub nop: String,
    pub count_over_threshold: String,
    pub util_fege_pct: String,
    pub max_ethernet_port_daily: String,
    pub bw: String,
    pub priority: String,
    pub suspect: String,
    pub tiket_id: String,
    pub update_stamp: String,
    pub status_update: StatusUpdate,
    pub date_open: String,
    pub aging: i64,
    pub status: Status,
    pub update_tanggal: String,
    pub closed_by: String,
    pub note: String,
    pub cap_site_simpul: String,
    pub cap_intermediate_link: String,
    pub other_pelurusan_data_bw: String,
}

impl TicketRecord {
    /// Strict priority view of the raw cell.
    pub fn priority(&self) -> Option<Priority> {
        Priority::parse_strict(self.priority.trim())
    }

    /// Parse a row laid out in [`GLOBAL_COLUMNS`] order. Short rows read as
    /// empty cells; lifecycle cells parse tolerantly.
    pub fn from_row(row: &[String]) -> Self {
        let cell = |i: usize| row.get(i).map(String::as_str).unwrap_or("").to_string();
        Self {
            vendor: cell(0),
            date: cell(1),
            site_id: cell(2),
            transport_type: cell(3),
            nop: cell(4),
            count_over_threshold: cell(5),
            util_fege_pct: cell(6),
            max_ethernet_port_daily: cell(7),
            bw: cell(8),
            priority: cell(9),
            suspect: cell(10),
            tiket_id: cell(11),
            update_stamp: cell(12),
            status_update: StatusUpdate::parse_cell(&cell(13)),
            date_open: cell(14),
            aging: cell(15).trim().parse().unwrap_or(0),
            status: Status::parse_cell(&cell(16)),
            update_tanggal: cell(17),
            closed_by: cell(18),
            note: cell(19),
            cap_site_simpul: cell(20),
            cap_intermediate_link: cell(21),
            other_pelurusan_data_bw: cell(22),
        }
    }

    /// Serialize back into [`GLOBAL_COLUMNS`] order.
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.vendor.clone(),
            self.date.clone(),
            self.site_id.clone(),
            self.transport_type.clone(),
            self.nop.clone(),
            self.count_over_threshold.clone(),
            self.util_fege_pct.clone(),
            self.max_ethernet_port_daily.clone(),
            self.bw.clone(),
            self.priority.clone(),
            self.suspect.clone(),
            self.tiket_id.clone(),
            self.update_stamp.clone(),
            self.status_update.as_str().to_string(),
            self.date_open.clone(),
            self.aging.to_string(),
            self.status.as_str().to_string(),
            self.update_tanggal.clone(),
            self.closed_by.clone(),
            self.note.clone(),
            self.cap_site_simpul.clone(),
            self.cap_intermediate_link.clone(),
            self.other_pelurusan_data_bw.clone(),
        ]
    }
}

/// Reshape an arbitrary table onto the canonical column set: columns are
/// matched by exact trimmed name, missing canonical columns read as empty.
pub fn canonicalize_table(table: &Table) -> Table {
    let positions: Vec<Option<usize>> = GLOBAL_COLUMNS
        .iter()
        .map(|name| table.position(name))
        .collect();
    let header = GLOBAL_COLUMNS.iter().map(|c| c.to_string()).collect();
    let rows = table
        .rows
        .iter()
        .map(|row| {
            positions
                .iter()
                .map(|pos| {
                    pos.and_then(|i| row.get(i))
                        .map(String::as_str)
                        .unwrap_or("")
                        .to_string()
                })
                .collect()
        })
        .collect();
    Table { header, rows }
}

/// Parse a (canonicalized) table into typed records.
pub fn records_from_table(table: &Table) -> Vec<TicketRecord> {
    canonicalize_table(table)
        .rows
        .iter()
        .map(|row| TicketRecord::from_row(row))
        .collect()
}

/// Render typed records as a canonical table, header included.
pub fn records_to_table(records: &[TicketRecord]) -> Table {
    Table {
        header: GLOBAL_COLUMNS.iter().map(|c| c.to_string()).collect(),
        rows: records.iter().map(TicketRecord::to_row).collect(),
    }
}
