//! End-to-end pipeline tests over the in-memory row store.

use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use tiket_core::{records_from_table, Status, StatusUpdate, Table};
use tiket_store::{MemoryStore, RowStore};
use tiket_sync::{SyncConfig, SyncError, SyncOutcome, SyncPipeline};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn test_config(dir: &Path) -> SyncConfig {
    SyncConfig {
        tab_source: "SOURCE".into(),
        tab_database: "DATABASE".into(),
        tab_history: "HISTORY".into(),
        tab_update_log: "UPDATELOG".into(),
        source_url: None,
        store_dir: dir.join("store"),
        backup_dir: dir.join("backup"),
        scheduler_enabled: false,
        sync_cron: "0 8 * * *".into(),
        http_timeout_secs: 5,
        user_agent: "tiket-test/0".into(),
    }
}

fn source_table(rows: &[(&str, &str, &str)]) -> Table {
    Table {
        header: vec![
            "VENDOR".into(),
            "DATE".into(),
            "SITEID".into(),
            "Transport Type".into(),
            "NOP".into(),
            "Priority".into(),
        ],
        rows: rows
            .iter()
            .map(|(date, site, priority)| {
                vec![
                    "HW".to_string(),
                    date.to_string(),
                    site.to_string(),
                    "MW".to_string(),
                    "MEDAN".to_string(),
                    priority.to_string(),
                ]
            })
            .collect(),
    }
}

async fn pipeline_with_source(
    dir: &Path,
    source_rows: &[(&str, &str, &str)],
) -> (SyncPipeline, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    store
        .overwrite_table("SOURCE", &source_table(source_rows))
        .await
        .unwrap();
    let pipeline = SyncPipeline::new(test_config(dir), store.clone(), store.clone());
    (pipeline, store)
}

#[tokio::test]
async fn full_pass_writes_database_history_and_backup() {
    let dir = tempfile::tempdir().unwrap();
    let rows = [
        ("01/04/2025", "RAP395", "P1"),
        ("01/04/2025", "MDN120", "P2"),
        ("01/01/2025", "BJI007", "P2"), // outside the H-1 window
    ];
    let (pipeline, store) = pipeline_with_source(dir.path(), &rows).await;

    let today = d(2025, 1, 5);
    let summary = match pipeline.run_once(today).await.unwrap() {
        SyncOutcome::Synced(summary) => summary,
        SyncOutcome::NoData => panic!("expected a synced pass"),
    };
    assert_eq!(summary.window_days_ago, 1);
    assert_eq!(summary.candidate_rows, 2);
    assert_eq!(summary.stats.created, 2);
    assert_eq!(summary.history_appended, 2);
    let backup_path = summary.backup_path.expect("backup written");
    assert!(Path::new(&backup_path).exists());
    assert_eq!(summary.backup_sha256.expect("digest").len(), 64);

    let records = records_from_table(&store.read_table("DATABASE").await.unwrap());
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].tiket_id, "RAP39520250104");
    assert_eq!(records[0].status, Status::Open);
    assert_eq!(records[0].status_update, StatusUpdate::NeedClose);
    assert_eq!(records[1].status_update, StatusUpdate::Open);

    // A second pass over the same snapshot overwrites in place and appends
    // another batch of touched rows to the trail.
    let summary = match pipeline.run_once(today).await.unwrap() {
        SyncOutcome::Synced(summary) => summary,
        SyncOutcome::NoData => panic!("expected a synced pass"),
    };
    assert_eq!(summary.stats.created, 0);
    assert_eq!(summary.stats.updated, 2);

    let records = records_from_table(&store.read_table("DATABASE").await.unwrap());
    assert_eq!(records.len(), 2);
    let history = store.read_table("HISTORY").await.unwrap();
    assert_eq!(history.rows.len(), 4);
}

#[tokio::test]
async fn empty_windows_report_no_data_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    let rows = [("01/04/2020", "RAP395", "P1")];
    let (pipeline, store) = pipeline_with_source(dir.path(), &rows).await;

    match pipeline.run_once(d(2025, 1, 5)).await.unwrap() {
        SyncOutcome::NoData => {}
        SyncOutcome::Synced(_) => panic!("expected no data"),
    }
    assert!(store.read_table("DATABASE").await.unwrap().is_empty());
    assert!(store.read_table("HISTORY").await.unwrap().is_empty());
}

#[tokio::test]
async fn h2_fallback_kicks_in_when_h1_is_a_genuine_no_match() {
    let dir = tempfile::tempdir().unwrap();
    let rows = [("01/03/2025", "RAP395", "P1")];
    let (pipeline, _store) = pipeline_with_source(dir.path(), &rows).await;

    let summary = match pipeline.run_once(d(2025, 1, 5)).await.unwrap() {
        SyncOutcome::Synced(summary) => summary,
        SyncOutcome::NoData => panic!("expected the H-2 window to match"),
    };
    assert_eq!(summary.window_days_ago, 2);
    assert_eq!(summary.candidate_rows, 1);
}

#[tokio::test]
async fn close_then_reopen_reclaims_the_original_identity() {
    let dir = tempfile::tempdir().unwrap();
    let rows = [("01/04/2025", "RAP395", "P1")];
    let (pipeline, store) = pipeline_with_source(dir.path(), &rows).await;
    pipeline.run_once(d(2025, 1, 5)).await.unwrap();

    let closed = pipeline
        .close_ticket("RAP39520250104", "ops team", "link restored", d(2025, 1, 5))
        .await
        .unwrap();
    assert_eq!(closed.status, Status::Closed);
    assert_eq!(closed.status_update, StatusUpdate::Closed);
    assert_eq!(closed.closed_by, "ops team");
    assert_eq!(closed.update_tanggal, "20250105");
    let update_log = store.read_table("UPDATELOG").await.unwrap();
    assert_eq!(update_log.rows.len(), 1);

    // The same site trips again two days later under a fresh identity.
    store
        .overwrite_table("SOURCE", &source_table(&[("01/06/2025", "RAP395", "P1")]))
        .await
        .unwrap();
    pipeline.run_once(d(2025, 1, 7)).await.unwrap();

    let records = records_from_table(&store.read_table("DATABASE").await.unwrap());
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].tiket_id, "RAP39520250104");
    assert_eq!(records[0].status, Status::Open);
    assert_eq!(records[0].status_update, StatusUpdate::ReOpen);
    assert_eq!(records[0].date_open, "20250104");
}

#[tokio::test]
async fn closing_an_unknown_ticket_reports_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, _store) = pipeline_with_source(dir.path(), &[]).await;
    let err = pipeline
        .close_ticket("NOPE123", "ops", "", d(2025, 1, 5))
        .await
        .unwrap_err();
    match err {
        SyncError::NotFound(id) => assert_eq!(id, "NOPE123"),
        other => panic!("expected not-found, got {other}"),
    }
}
