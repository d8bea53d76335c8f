//! Reconciliation engine and sync pipeline: merges a cleaned daily snapshot
//! into the persistent database table, maintains per-ticket lifecycle state
//! and emits the append-only history trail.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tiket_core::{
    aging_days, days_between_yyyymmdd, derive_status_update, records_from_table,
    records_to_table, yyyymmdd, Status, StatusUpdate, Table, TicketRecord, GLOBAL_COLUMNS,
};
use tiket_ingest::{clean, require_columns, select_date_slice, ColumnIndex, IngestError};
use tiket_store::{write_csv_file, RowStore, StoreError};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "tiket-sync";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync configuration incomplete: {0}")]
    Config(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error("ticket {0} not found")]
    NotFound(String),
}

impl SyncError {
    /// Short operator-facing message; full detail stays in the log.
    pub fn user_message(&self) -> String {
        match self {
            SyncError::Config(_) => "Sync configuration is incomplete.".to_string(),
            SyncError::Store(StoreError::Format(_)) => {
                "The source did not return tabular data.".to_string()
            }
            SyncError::Store(_) => "Could not reach the data store.".to_string(),
            SyncError::Ingest(IngestError::MissingColumns(names)) => {
                format!("Data is missing required columns: {}.", names.join(", "))
            }
            SyncError::NotFound(id) => format!("Ticket {id} was not found."),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub tab_source: String,
    pub tab_database: String,
    pub tab_history: String,
    pub tab_update_log: String,
    pub source_url: Option<String>,
    pub store_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub scheduler_enabled: bool,
    pub sync_cron: String,
    pub http_timeout_secs: u64,
    pub user_agent: String,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            tab_source: std::env::var("TIKET_TAB_SOURCE").unwrap_or_else(|_| "SOURCE".to_string()),
            tab_database: std::env::var("TIKET_TAB_DATABASE")
                .unwrap_or_else(|_| "DATABASE".to_string()),
            tab_history: std::env::var("TIKET_TAB_HISTORY")
                .unwrap_or_else(|_| "HISTORY".to_string()),
            tab_update_log: std::env::var("TIKET_TAB_UPDATELOG")
                .unwrap_or_else(|_| "UPDATELOG".to_string()),
            source_url: std::env::var("TIKET_SOURCE_SHEET_URL").ok().filter(|v| !v.is_empty()),
            store_dir: std::env::var("TIKET_STORE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./store")),
            backup_dir: std::env::var("TIKET_BACKUP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./backup")),
            scheduler_enabled: std::env::var("TIKET_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            sync_cron: std::env::var("TIKET_SYNC_CRON").unwrap_or_else(|_| "0 8 * * *".to_string()),
            http_timeout_secs: std::env::var("TIKET_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            user_agent: std::env::var("TIKET_USER_AGENT")
                .unwrap_or_else(|_| "tiket-bot/0.1".to_string()),
        }
    }

    /// Fail before any I/O when the store targets are not configured.
    pub fn validate(&self) -> Result<(), SyncError> {
        let mut missing = Vec::new();
        if self.tab_database.trim().is_empty() {
            missing.push("TIKET_TAB_DATABASE");
        }
        if self.tab_history.trim().is_empty() {
            missing.push("TIKET_TAB_HISTORY");
        }
        if self.store_dir.as_os_str().is_empty() {
            missing.push("TIKET_STORE_DIR");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SyncError::Config(missing.join(", ")))
        }
    }
}

/// Build candidate records from a cleaned, sliced snapshot. Identity is the
/// explicit `TiketID` cell, else `SITEID` + the row date as `YYYYMMDD`;
/// `DateOpen` is the normalized row date; both touch stamps are `today`.
pub fn build_daily_records(slice: &Table, today: NaiveDate) -> Vec<TicketRecord> {
    let index = ColumnIndex::new(slice);
    let stamp_today = yyyymmdd(today);

    slice
        .rows
        .iter()
        .map(|row| {
            let date_raw = index.cell(row, "DATE").trim().to_string();
            let date_open = tiket_core::parse_flexible_date(&date_raw)
                .map(yyyymmdd)
                .unwrap_or_default();
            let site_id = index.cell(row, "SITEID").trim().to_string();
            let explicit_id = index.cell(row, "TiketID").trim().to_string();
            let tiket_id = if !explicit_id.is_empty() {
                explicit_id
            } else if !site_id.is_empty() && !date_open.is_empty() {
                format!("{site_id}{date_open}")
            } else {
                String::new()
            };

            let priority_col = if index.contains("Prio") { "Prio" } else { "Priority" };
            let priority = index.cell(row, priority_col).trim().to_string();

            let aging = aging_days(&date_open, today);
            let mut record = TicketRecord {
                vendor: index.cell(row, "VENDOR").trim().to_string(),
                date: date_raw,
                site_id,
                transport_type: index.cell(row, "Transport Type").trim().to_string(),
                nop: index.cell(row, "NOP").trim().to_string(),
                count_over_threshold: index.cell(row, "Count of >0.9").trim().to_string(),
                util_fege_pct: index.cell(row, "Util FEGE %").trim().to_string(),
                max_ethernet_port_daily: index
                    .cell(row, "Max Ethernet Port Daily")
                    .trim()
                    .to_string(),
                bw: index.cell(row, "BW").trim().to_string(),
                priority,
                suspect: index.cell(row, "Suspect").trim().to_string(),
                tiket_id,
                update_stamp: stamp_today.clone(),
                date_open,
                aging,
                status: Status::Open,
                update_tanggal: stamp_today.clone(),
                ..TicketRecord::default()
            };
            record.status_update =
                derive_status_update(record.priority(), record.aging, Status::Open, 0);
            record
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub created: usize,
    pub updated: usize,
    pub reopened: usize,
    pub cleared: usize,
}

#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub records: Vec<TicketRecord>,
    pub history: Vec<TicketRecord>,
    pub stats: ReconcileStats,
}

#[derive(Debug, Clone)]
struct ClosedSiteEntry {
    position: usize,
    tiket_id: String,
    date_open: String,
    update_tanggal: String,
}

fn within_reopen_window(close_stamp: &str, today: NaiveDate) -> bool {
    days_between_yyyymmdd(close_stamp, today)
        .map(|days| (0..=2).contains(&days))
        .unwrap_or(false)
}

/// Merge one daily snapshot into the database records.
///
/// Untouched open rows get their aging and label refreshed; closed rows past
/// the clear window pick up the advisory `Clear` label; snapshot rows either
/// overwrite their existing identity, re-open a recently closed site under
/// the original identity, or append as brand-new tickets. Every touched row
/// is copied verbatim onto the history output.
pub fn reconcile(
    existing: Vec<TicketRecord>,
    daily: Vec<TicketRecord>,
    today: NaiveDate,
) -> ReconcileOutcome {
    let mut records = existing;
    let mut history = Vec::new();
    let mut stats = ReconcileStats::default();

    for record in &mut records {
        match record.status {
            Status::Open => {
                record.aging = aging_days(&record.date_open, today);
                record.status_update =
                    derive_status_update(record.priority(), record.aging, Status::Open, 0);
            }
            Status::Closed => {
                if record.status_update != StatusUpdate::Clear {
                    let days = days_between_yyyymmdd(&record.update_tanggal, today).unwrap_or(0);
                    let label =
                        derive_status_update(record.priority(), record.aging, Status::Closed, days);
                    if label == StatusUpdate::Clear {
                        stats.cleared += 1;
                    }
                    record.status_update = label;
                }
            }
        }
    }

    let mut index: HashMap<String, usize> = HashMap::new();
    for (i, record) in records.iter().enumerate() {
        let id = record.tiket_id.trim();
        if !id.is_empty() {
            index.insert(id.to_string(), i);
        }
    }

    let mut closed_sites: HashMap<String, ClosedSiteEntry> = HashMap::new();
    for (i, record) in records.iter().enumerate() {
        if record.status != Status::Closed {
            continue;
        }
        let site = record.site_id.trim();
        if site.is_empty() || record.tiket_id.trim().is_empty() {
            continue;
        }
        let entry = ClosedSiteEntry {
            position: i,
            tiket_id: record.tiket_id.clone(),
            date_open: record.date_open.clone(),
            update_tanggal: record.update_tanggal.clone(),
        };
        let replace = match closed_sites.get(site) {
            Some(current) => entry.update_tanggal > current.update_tanggal,
            None => true,
        };
        if replace {
            closed_sites.insert(site.to_string(), entry);
        }
    }

    for mut record in daily {
        let id = record.tiket_id.trim().to_string();
        if id.is_empty() {
            continue;
        }

        if let Some(&position) = index.get(&id) {
            // Identity match beats the closed-site window.
            let was_closed = records[position].status == Status::Closed;
            let existing_open = records[position].date_open.trim().to_string();
            if !existing_open.is_empty() {
                record.date_open = existing_open;
            }
            record.aging = aging_days(&record.date_open, today);
            record.status = Status::Open;
            if was_closed {
                record.status_update = StatusUpdate::ReOpen;
                stats.reopened += 1;
            } else {
                record.status_update =
                    derive_status_update(record.priority(), record.aging, Status::Open, 0);
                stats.updated += 1;
            }
            let site = record.site_id.trim().to_string();
            if closed_sites
                .get(&site)
                .is_some_and(|entry| entry.tiket_id == id)
            {
                closed_sites.remove(&site);
            }
            records[position] = record.clone();
            history.push(record);
            continue;
        }

        let site = record.site_id.trim().to_string();
        let reopen_entry = closed_sites
            .get(&site)
            .filter(|entry| within_reopen_window(&entry.update_tanggal, today))
            .cloned();
        if let Some(entry) = reopen_entry {
            record.tiket_id = entry.tiket_id.clone();
            if !entry.date_open.trim().is_empty() {
                record.date_open = entry.date_open.clone();
            }
            record.aging = aging_days(&record.date_open, today);
            record.status = Status::Open;
            record.status_update = StatusUpdate::ReOpen;
            stats.reopened += 1;
            records[entry.position] = record.clone();
            closed_sites.remove(&site);
            history.push(record);
            continue;
        }

        record.aging = aging_days(&record.date_open, today);
        record.status = Status::Open;
        record.status_update =
            derive_status_update(record.priority(), record.aging, Status::Open, 0);
        index.insert(id, records.len());
        records.push(record.clone());
        history.push(record);
        stats.created += 1;
    }

    ReconcileOutcome {
        records,
        history,
        stats,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub raw_rows: usize,
    pub candidate_rows: usize,
    pub window_days_ago: i64,
    pub stats: ReconcileStats,
    pub history_appended: usize,
    pub backup_path: Option<String>,
    pub backup_sha256: Option<String>,
}

/// Outcome of a pass: either a completed run or a (non-error) empty window.
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    Synced(SyncRunSummary),
    NoData,
}

pub struct SyncPipeline {
    config: SyncConfig,
    source: Arc<dyn RowStore>,
    store: Arc<dyn RowStore>,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig, source: Arc<dyn RowStore>, store: Arc<dyn RowStore>) -> Self {
        Self {
            config,
            source,
            store,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// One full reconciliation pass for `today`: read the source snapshot,
    /// clean it, slice H-1 (falling back to H-2 on a genuine no-match),
    /// merge into the database table, overwrite it whole, append the
    /// touched rows to the history tab and drop a per-date CSV backup.
    pub async fn run_once(&self, today: NaiveDate) -> Result<SyncOutcome, SyncError> {
        self.config.validate()?;
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();

        let raw = self.source.read_table(&self.config.tab_source).await?;
        let raw_rows = raw.rows.len();
        let base = clean(&raw);

        let mut window_days_ago = 1;
        let mut slice = select_date_slice(&base, 1, today);
        if slice.table.is_empty() && slice.is_no_match() {
            window_days_ago = 2;
            slice = select_date_slice(&base, 2, today);
        }
        if slice.table.is_empty() {
            info!(run_id = %run_id, "no candidate rows for H-1/H-2");
            return Ok(SyncOutcome::NoData);
        }

        require_columns(&slice.table, &["SITEID", "DATE", "Priority"])?;
        let daily = build_daily_records(&slice.table, today);

        let db_table = self.store.read_table(&self.config.tab_database).await?;
        let existing = records_from_table(&db_table);
        let outcome = reconcile(existing, daily, today);

        self.store
            .overwrite_table(&self.config.tab_database, &records_to_table(&outcome.records))
            .await?;

        let header: Vec<String> = GLOBAL_COLUMNS.iter().map(|c| c.to_string()).collect();
        if !outcome.history.is_empty() {
            let rows: Vec<Vec<String>> =
                outcome.history.iter().map(TicketRecord::to_row).collect();
            self.store
                .append_rows(&self.config.tab_history, &header, &rows)
                .await?;
        }

        let (backup_path, backup_sha256) = match self.write_backup(&slice.table, today) {
            Ok((path, digest)) => (Some(path), Some(digest)),
            Err(err) => {
                warn!(error = %err, "backup write failed; sync result already committed");
                (None, None)
            }
        };

        let summary = SyncRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            raw_rows,
            candidate_rows: slice.table.rows.len(),
            window_days_ago,
            stats: outcome.stats,
            history_appended: outcome.history.len(),
            backup_path,
            backup_sha256,
        };
        info!(
            run_id = %summary.run_id,
            candidates = summary.candidate_rows,
            created = summary.stats.created,
            updated = summary.stats.updated,
            reopened = summary.stats.reopened,
            "sync pass finished"
        );
        self.write_summary_report(&summary, today);
        Ok(SyncOutcome::Synced(summary))
    }

    fn write_backup(&self, slice: &Table, today: NaiveDate) -> Result<(String, String), StoreError> {
        let path = self
            .config
            .backup_dir
            .join(format!("backup_{}.csv", yyyymmdd(today)));
        write_csv_file(&path, slice)?;
        let bytes = std::fs::read(&path)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let digest = hex::encode(hasher.finalize());
        Ok((path.display().to_string(), digest))
    }

    fn write_summary_report(&self, summary: &SyncRunSummary, today: NaiveDate) {
        let path = self
            .config
            .backup_dir
            .join(format!("summary_{}.json", yyyymmdd(today)));
        let result = serde_json::to_vec_pretty(summary)
            .map_err(|e| std::io::Error::other(e.to_string()))
            .and_then(|bytes| std::fs::write(&path, bytes));
        if let Err(err) = result {
            warn!(error = %err, path = %path.display(), "run summary not written");
        }
    }

    /// Manually close a ticket: stamp the closing fields, overwrite the
    /// database table and append the updated row to the update-log tab.
    pub async fn close_ticket(
        &self,
        tiket_id: &str,
        closed_by: &str,
        note: &str,
        today: NaiveDate,
    ) -> Result<TicketRecord, SyncError> {
        self.config.validate()?;
        let db_table = self.store.read_table(&self.config.tab_database).await?;
        let mut records = records_from_table(&db_table);

        let position = records
            .iter()
            .position(|r| r.tiket_id.trim() == tiket_id.trim())
            .ok_or_else(|| SyncError::NotFound(tiket_id.trim().to_string()))?;

        {
            let record = &mut records[position];
            record.status = Status::Closed;
            record.status_update = StatusUpdate::Closed;
            record.update_tanggal = yyyymmdd(today);
            record.closed_by = closed_by.trim().to_string();
            record.note = note.trim().to_string();
        }
        let closed = records[position].clone();

        self.store
            .overwrite_table(&self.config.tab_database, &records_to_table(&records))
            .await?;
        let header: Vec<String> = GLOBAL_COLUMNS.iter().map(|c| c.to_string()).collect();
        self.store
            .append_rows(&self.config.tab_update_log, &header, &[closed.to_row()])
            .await?;

        info!(tiket_id = %closed.tiket_id, closed_by, "ticket closed");
        Ok(closed)
    }
}

/// Register the daily sync on the configured cron expression. Returns
/// `None` when the scheduler is disabled; the caller starts the returned
/// scheduler and owns its lifetime.
pub async fn maybe_build_scheduler(
    pipeline: Arc<SyncPipeline>,
) -> anyhow::Result<Option<JobScheduler>> {
    if !pipeline.config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let cron = pipeline.config.sync_cron.clone();
    let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
        let pipeline = pipeline.clone();
        Box::pin(async move {
            let today = Utc::now().date_naive();
            match pipeline.run_once(today).await {
                Ok(SyncOutcome::Synced(summary)) => {
                    info!(run_id = %summary.run_id, "scheduled sync finished");
                }
                Ok(SyncOutcome::NoData) => {
                    warn!("scheduled sync found no candidate rows");
                }
                Err(err) => {
                    error!(error = %err, "scheduled sync failed");
                }
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiket_core::Priority;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn open_ticket(id: &str, site: &str, priority: &str, date_open: &str) -> TicketRecord {
        TicketRecord {
            tiket_id: id.to_string(),
            site_id: site.to_string(),
            priority: priority.to_string(),
            date_open: date_open.to_string(),
            status: Status::Open,
            status_update: StatusUpdate::Open,
            update_tanggal: date_open.to_string(),
            ..TicketRecord::default()
        }
    }

    fn closed_ticket(
        id: &str,
        site: &str,
        priority: &str,
        date_open: &str,
        closed_on: &str,
    ) -> TicketRecord {
        TicketRecord {
            status: Status::Closed,
            status_update: StatusUpdate::Closed,
            update_tanggal: closed_on.to_string(),
            ..open_ticket(id, site, priority, date_open)
        }
    }

    fn daily_row(site: &str, priority: &str, date_open: &str, today: NaiveDate) -> TicketRecord {
        let mut record = TicketRecord {
            tiket_id: format!("{site}{date_open}"),
            site_id: site.to_string(),
            priority: priority.to_string(),
            date_open: date_open.to_string(),
            aging: aging_days(date_open, today),
            status: Status::Open,
            update_stamp: yyyymmdd(today),
            update_tanggal: yyyymmdd(today),
            ..TicketRecord::default()
        };
        record.status_update =
            derive_status_update(record.priority(), record.aging, Status::Open, 0);
        record
    }

    #[test]
    fn empty_snapshot_only_refreshes_open_rows() {
        let today = d(2025, 1, 5);
        let existing = vec![
            open_ticket("RAP001", "SITE9", "P1", "20250101"),
            closed_ticket("MDN002", "SITE2", "P2", "20241220", "20250104"),
        ];
        let outcome = reconcile(existing.clone(), Vec::new(), today);

        assert!(outcome.history.is_empty());
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.records[0].tiket_id, existing[0].tiket_id);
        assert_eq!(outcome.records[0].date_open, existing[0].date_open);
        assert_eq!(outcome.records[0].status, Status::Open);
        assert_eq!(outcome.records[0].aging, 4);
        assert_eq!(outcome.records[0].status_update, StatusUpdate::NeedClose);
        // Closed a day ago: stays Closed, not yet Clear.
        assert_eq!(outcome.records[1].status, Status::Closed);
        assert_eq!(outcome.records[1].status_update, StatusUpdate::Closed);
    }

    #[test]
    fn closed_ticket_clears_after_the_window() {
        let today = d(2025, 1, 8);
        let existing = vec![closed_ticket("RAP001", "SITE9", "P1", "20250101", "20250105")];
        let outcome = reconcile(existing, Vec::new(), today);

        assert_eq!(outcome.records[0].status, Status::Closed);
        assert_eq!(outcome.records[0].status_update, StatusUpdate::Clear);
        assert_eq!(outcome.stats.cleared, 1);
        assert!(outcome.history.is_empty());
    }

    #[test]
    fn reappearing_identity_reopens_and_preserves_date_open() {
        let today = d(2025, 1, 6);
        let existing = vec![closed_ticket("SITE920250101", "SITE9", "P1", "20250101", "20250105")];
        let mut daily = daily_row("SITE9", "P1", "20250101", today);
        daily.tiket_id = "SITE920250101".to_string();
        let outcome = reconcile(existing, vec![daily], today);

        assert_eq!(outcome.records.len(), 1);
        let reopened = &outcome.records[0];
        assert_eq!(reopened.status, Status::Open);
        assert_eq!(reopened.status_update, StatusUpdate::ReOpen);
        assert_eq!(reopened.date_open, "20250101");
        assert_eq!(reopened.aging, 5);
        assert_eq!(outcome.stats.reopened, 1);
        assert_eq!(outcome.history.len(), 1);
    }

    #[test]
    fn recently_closed_site_reclaims_its_identity_for_a_new_id() {
        let today = d(2025, 1, 6);
        let existing = vec![closed_ticket("RAP001", "SITE9", "P1", "20250101", "20250105")];
        // New id for the same site, one day after closing.
        let daily = daily_row("SITE9", "P1", "20250106", today);
        assert_eq!(daily.tiket_id, "SITE920250106");

        let outcome = reconcile(existing, vec![daily], today);
        assert_eq!(outcome.records.len(), 1);
        let reopened = &outcome.records[0];
        assert_eq!(reopened.tiket_id, "RAP001");
        assert_eq!(reopened.status, Status::Open);
        assert_eq!(reopened.status_update, StatusUpdate::ReOpen);
        assert_eq!(reopened.date_open, "20250101");
        assert_eq!(outcome.history[0].tiket_id, "RAP001");
    }

    #[test]
    fn stale_closed_site_yields_a_brand_new_ticket() {
        let today = d(2025, 1, 9);
        let existing = vec![closed_ticket("RAP001", "SITE9", "P1", "20250101", "20250105")];
        let daily = daily_row("SITE9", "P1", "20250108", today);
        let outcome = reconcile(existing, vec![daily], today);

        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.records[0].tiket_id, "RAP001");
        assert_eq!(outcome.records[0].status, Status::Closed);
        assert_eq!(outcome.records[1].tiket_id, "SITE920250108");
        assert_eq!(outcome.records[1].status, Status::Open);
        assert_eq!(outcome.stats.created, 1);
        assert_eq!(outcome.stats.reopened, 0);
    }

    #[test]
    fn one_pass_reuses_a_closed_site_at_most_once() {
        let today = d(2025, 1, 6);
        let existing = vec![closed_ticket("RAP001", "SITE9", "P2", "20250101", "20250105")];
        let first = daily_row("SITE9", "P2", "20250106", today);
        let mut second = daily_row("SITE9", "P2", "20250105", today);
        second.tiket_id = "SITE920250105".to_string();

        let outcome = reconcile(existing, vec![first, second], today);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.records[0].tiket_id, "RAP001");
        assert_eq!(outcome.records[1].tiket_id, "SITE920250105");
        assert_eq!(outcome.stats.reopened, 1);
        assert_eq!(outcome.stats.created, 1);
    }

    #[test]
    fn identities_stay_unique_across_duplicate_daily_rows() {
        let today = d(2025, 1, 5);
        let daily = vec![
            daily_row("SITE1", "P1", "20250104", today),
            daily_row("SITE1", "P1", "20250104", today),
        ];
        let outcome = reconcile(Vec::new(), daily, today);

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.history.len(), 2);
        let mut ids: Vec<&str> = outcome.records.iter().map(|r| r.tiket_id.as_str()).collect();
        ids.dedup();
        assert_eq!(ids.len(), outcome.records.len());
    }

    #[test]
    fn history_gets_exactly_one_row_per_touch() {
        let today = d(2025, 1, 5);
        let existing = vec![open_ticket("T1", "S1", "P2", "20250103")];
        let daily = vec![
            daily_row("S1", "P2", "20250103", today),
            daily_row("S2", "P1", "20250104", today),
            daily_row("S3", "P2", "20250104", today),
        ];
        let mut touched = daily.clone();
        touched[0].tiket_id = "T1".to_string();
        let outcome = reconcile(existing, touched, today);
        assert_eq!(outcome.history.len(), 3);
        assert_eq!(outcome.stats.updated, 1);
        assert_eq!(outcome.stats.created, 2);
    }

    #[test]
    fn p2_update_label_follows_the_aging_threshold() {
        let today = d(2025, 1, 5);
        let existing = vec![
            open_ticket("A", "S1", "P2", "20250103"), // aging 2
            open_ticket("B", "S2", "P2", "20250101"), // aging 4
        ];
        let outcome = reconcile(existing, Vec::new(), today);
        assert_eq!(outcome.records[0].status_update, StatusUpdate::Open);
        assert_eq!(outcome.records[1].status_update, StatusUpdate::NeedClose);
    }

    #[test]
    fn daily_records_derive_identity_and_labels() {
        let today = d(2025, 1, 5);
        let slice = Table {
            header: vec![
                "VENDOR".into(),
                "DATE".into(),
                "SITEID".into(),
                "NOP".into(),
                "Priority".into(),
            ],
            rows: vec![
                vec![
                    "HW".into(),
                    "01/04/2025".into(),
                    "RAP395".into(),
                    "RANTAU PRAPAT".into(),
                    "P1".into(),
                ],
                vec![
                    "ZTE".into(),
                    "01/04/2025".into(),
                    "MDN120".into(),
                    "MEDAN".into(),
                    "P2".into(),
                ],
            ],
        };
        let records = build_daily_records(&slice, today);
        assert_eq!(records[0].tiket_id, "RAP39520250104");
        assert_eq!(records[0].date_open, "20250104");
        assert_eq!(records[0].aging, 1);
        assert_eq!(records[0].status_update, StatusUpdate::NeedClose);
        assert_eq!(records[0].update_tanggal, "20250105");
        assert_eq!(records[1].status_update, StatusUpdate::Open);
        assert_eq!(records[1].priority(), Some(Priority::P2));
    }

    #[test]
    fn user_messages_stay_short() {
        let err = SyncError::NotFound("RAP001".to_string());
        assert_eq!(err.user_message(), "Ticket RAP001 was not found.");
        let err = SyncError::Ingest(IngestError::MissingColumns(vec!["SITEID".into()]));
        assert!(err.user_message().contains("SITEID"));
    }
}
