//! Read-only query views over the current database table, served through a
//! TTL-cached loader with explicit invalidation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tiket_core::{Priority, Table};
use tiket_ingest::ColumnIndex;
use tiket_store::{RowStore, StoreError};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info};

pub const CRATE_NAME: &str = "tiket-query";

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Cached snapshot of the display table: the data plus when it was fetched
/// and for how long it may be served.
#[derive(Debug, Clone)]
pub struct CachedTable {
    pub table: Table,
    pub fetched_at: Instant,
    pub fetched_wall: DateTime<Utc>,
    pub ttl: Duration,
}

impl CachedTable {
    pub fn is_valid(&self) -> bool {
        self.fetched_at.elapsed() < self.ttl
    }

    pub fn expires_in(&self) -> Duration {
        self.ttl.saturating_sub(self.fetched_at.elapsed())
    }
}

/// Point-in-time facts about the cache, for the info view.
#[derive(Debug, Clone)]
pub struct DataInfo {
    pub total_rows: usize,
    pub last_update: Option<DateTime<Utc>>,
    pub cache_valid: bool,
    pub cache_expires_in: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    Reloaded,
    Cancelled,
}

/// TTL-cached reader over one database tab. Reads inside the TTL serve the
/// cache; reconciliation and manual closure call sites invalidate so the
/// next read refetches.
pub struct QueryService {
    store: Arc<dyn RowStore>,
    tab: String,
    ttl: Duration,
    cache: Mutex<Option<CachedTable>>,
}

impl QueryService {
    pub fn new(store: Arc<dyn RowStore>, tab: impl Into<String>) -> Self {
        Self {
            store,
            tab: tab.into(),
            ttl: DEFAULT_CACHE_TTL,
            cache: Mutex::new(None),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// The current table, from cache when still valid.
    pub async fn current(&self) -> Result<Table, QueryError> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.is_valid() {
                debug!(expires_in = ?cached.expires_in(), "serving cached table");
                return Ok(cached.table.clone());
            }
        }
        let table = self.store.read_table(&self.tab).await?;
        info!(rows = table.rows.len(), tab = %self.tab, "table loaded");
        *cache = Some(CachedTable {
            table: table.clone(),
            fetched_at: Instant::now(),
            fetched_wall: Utc::now(),
            ttl: self.ttl,
        });
        Ok(table)
    }

    /// Unconditional refetch, replacing the cache.
    pub async fn reload(&self) -> Result<Table, QueryError> {
        self.invalidate().await;
        self.current().await
    }

    pub async fn invalidate(&self) {
        let mut cache = self.cache.lock().await;
        *cache = None;
    }

    /// Reload after a short cancellation window. If `cancel` fires before
    /// the grace period elapses, no store access happens and the prior
    /// cache state is restored from the saved backup reference.
    pub async fn reload_with_grace(
        &self,
        grace: Duration,
        cancel: &Notify,
    ) -> Result<ReloadOutcome, QueryError> {
        let backup = self.cache.lock().await.clone();
        tokio::select! {
            _ = tokio::time::sleep(grace) => {
                self.reload().await?;
                Ok(ReloadOutcome::Reloaded)
            }
            _ = cancel.notified() => {
                let mut cache = self.cache.lock().await;
                *cache = backup;
                info!("reload cancelled; previous table kept");
                Ok(ReloadOutcome::Cancelled)
            }
        }
    }

    pub async fn data_info(&self) -> DataInfo {
        let cache = self.cache.lock().await;
        match cache.as_ref() {
            Some(cached) => DataInfo {
                total_rows: cached.table.rows.len(),
                last_update: Some(cached.fetched_wall),
                cache_valid: cached.is_valid(),
                cache_expires_in: cached.expires_in(),
            },
            None => DataInfo {
                total_rows: 0,
                last_update: None,
                cache_valid: false,
                cache_expires_in: Duration::ZERO,
            },
        }
    }
}

/// A row keyed by its header names.
pub type TicketView = BTreeMap<String, String>;

fn row_view(table: &Table, row: &[String]) -> TicketView {
    table
        .header
        .iter()
        .zip(row.iter())
        .map(|(name, cell)| (name.clone(), cell.clone()))
        .collect()
}

fn priority_column(index: &ColumnIndex) -> Option<usize> {
    index.get("Prio").or_else(|| index.get("Priority"))
}

/// All rows whose priority cell is exactly the given priority.
pub fn tickets_by_priority(table: &Table, priority: Priority) -> Vec<TicketView> {
    let index = ColumnIndex::new(table);
    let Some(col) = priority_column(&index) else {
        return Vec::new();
    };
    table
        .rows
        .iter()
        .filter(|row| row.get(col).map(String::as_str) == Some(priority.as_str()))
        .map(|row| row_view(table, row))
        .collect()
}

/// Exact identity lookup, falling back to any column whose name contains
/// `id` when the canonical column is absent.
pub fn ticket_by_id(table: &Table, id: &str) -> Option<TicketView> {
    let index = ColumnIndex::new(table);
    if let Some(col) = index.get("TiketID") {
        if let Some(row) = table
            .rows
            .iter()
            .find(|row| row.get(col).map(String::as_str) == Some(id))
        {
            return Some(row_view(table, row));
        }
        return None;
    }

    for (col, name) in table.header.iter().enumerate() {
        if !name.to_ascii_lowercase().contains("id") {
            continue;
        }
        if let Some(row) = table
            .rows
            .iter()
            .find(|row| row.get(col).map(String::as_str) == Some(id))
        {
            return Some(row_view(table, row));
        }
    }
    None
}

/// Group rows by region code; blank or missing regions bucket under
/// `"Unknown"`.
pub fn tickets_by_nop(table: &Table) -> BTreeMap<String, Vec<TicketView>> {
    let index = ColumnIndex::new(table);
    let col = index.get("NOP");
    let mut grouped: BTreeMap<String, Vec<TicketView>> = BTreeMap::new();
    for row in &table.rows {
        let raw = col.and_then(|c| row.get(c)).map(String::as_str).unwrap_or("");
        let nop = if raw.trim().is_empty() {
            "Unknown".to_string()
        } else {
            raw.trim().to_string()
        };
        grouped.entry(nop).or_default().push(row_view(table, row));
    }
    grouped
}

/// `(open_count, need_close_count)` over the current view: every row counts
/// as open, P1 rows count as needing closure.
pub fn summary_stats(table: &Table) -> (usize, usize) {
    let index = ColumnIndex::new(table);
    let need_close = match priority_column(&index) {
        Some(col) => table
            .rows
            .iter()
            .filter(|row| row.get(col).map(String::as_str) == Some("P1"))
            .count(),
        None => 0,
    };
    (table.rows.len(), need_close)
}

/// Per-region `"{region} : {total} Site / {p1} Site"` lines, sorted by
/// region name case-insensitively.
pub fn region_summary_text(table: &Table) -> String {
    let grouped = tickets_by_nop(table);
    let mut regions: Vec<&String> = grouped.keys().collect();
    regions.sort_by_key(|name| name.to_lowercase());

    regions
        .iter()
        .map(|region| {
            let tickets = &grouped[*region];
            let p1 = tickets
                .iter()
                .filter(|t| {
                    t.get("Prio")
                        .or_else(|| t.get("Priority"))
                        .map(|v| v.to_ascii_uppercase() == "P1")
                        .unwrap_or(false)
                })
                .count();
            format!("{region} : {} Site / {p1} Site", tickets.len())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Stored header order.
pub fn column_names(table: &Table) -> Vec<String> {
    table.header.clone()
}
