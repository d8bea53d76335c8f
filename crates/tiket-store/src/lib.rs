//! Row-store adapters: the table read/overwrite/append seam plus the CSV
//! transport implementations behind it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tiket_core::Table;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub const CRATE_NAME: &str = "tiket-store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store configuration incomplete: {0}")]
    Config(String),
    #[error("fetching {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("content is not tabular: {0}")]
    Format(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error("operation not supported by this store: {0}")]
    Unsupported(&'static str),
}

/// Abstract named-table store. Reading an absent table yields an empty
/// table; `overwrite_table` replaces the whole table, header included;
/// `append_rows` creates the table when absent and writes the header first
/// when appending to an empty one.
#[async_trait]
pub trait RowStore: Send + Sync {
    async fn read_table(&self, tab: &str) -> Result<Table, StoreError>;
    async fn overwrite_table(&self, tab: &str, table: &Table) -> Result<(), StoreError>;
    async fn append_rows(
        &self,
        tab: &str,
        header: &[String],
        rows: &[Vec<String>],
    ) -> Result<(), StoreError>;
}

/// In-memory store keyed by tab name. Used in tests and as a scratch
/// backend; keeps raw values so padding semantics match a real sheet read.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tabs: RwLock<HashMap<String, Vec<Vec<String>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RowStore for MemoryStore {
    async fn read_table(&self, tab: &str) -> Result<Table, StoreError> {
        let tabs = self.tabs.read().await;
        Ok(tabs
            .get(tab)
            .map(|values| Table::from_values(values.clone()))
            .unwrap_or_default())
    }

    async fn overwrite_table(&self, tab: &str, table: &Table) -> Result<(), StoreError> {
        let mut tabs = self.tabs.write().await;
        tabs.insert(tab.to_string(), table.to_values());
        Ok(())
    }

    async fn append_rows(
        &self,
        tab: &str,
        header: &[String],
        rows: &[Vec<String>],
    ) -> Result<(), StoreError> {
        let mut tabs = self.tabs.write().await;
        let values = tabs.entry(tab.to_string()).or_default();
        if values.is_empty() {
            values.push(header.to_vec());
        }
        values.extend(rows.iter().cloned());
        Ok(())
    }
}

/// File-backed store: one CSV file per tab under a root directory.
/// Writes go through a temp file and an atomic rename.
#[derive(Debug, Clone)]
pub struct CsvFileStore {
    root: PathBuf,
}

impl CsvFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tab_path(&self, tab: &str) -> PathBuf {
        self.root.join(format!("{tab}.csv"))
    }

    fn read_values(&self, tab: &str) -> Result<Vec<Vec<String>>, StoreError> {
        let path = self.tab_path(tab);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&path)?;
        let mut values = Vec::new();
        for row in reader.records() {
            let row = row?;
            values.push(row.iter().map(|c| c.to_string()).collect());
        }
        Ok(values)
    }

    fn write_values(&self, tab: &str, values: &[Vec<String>]) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.root)?;
        let path = self.tab_path(tab);
        let temp = self.root.join(format!(".{tab}.tmp"));
        {
            let mut writer = csv::WriterBuilder::new()
                .flexible(true)
                .from_path(&temp)?;
            for row in values {
                writer.write_record(row)?;
            }
            writer.flush()?;
        }
        std::fs::rename(&temp, &path)?;
        debug!(tab, rows = values.len().saturating_sub(1), "table written");
        Ok(())
    }
}

#[async_trait]
impl RowStore for CsvFileStore {
    async fn read_table(&self, tab: &str) -> Result<Table, StoreError> {
        Ok(Table::from_values(self.read_values(tab)?))
    }

    async fn overwrite_table(&self, tab: &str, table: &Table) -> Result<(), StoreError> {
        self.write_values(tab, &table.to_values())
    }

    async fn append_rows(
        &self,
        tab: &str,
        header: &[String],
        rows: &[Vec<String>],
    ) -> Result<(), StoreError> {
        let mut values = self.read_values(tab)?;
        if values.is_empty() {
            values.push(header.to_vec());
        }
        values.extend(rows.iter().cloned());
        self.write_values(tab, &values)
    }
}

/// Normalize a spreadsheet share link into its CSV export form. Non-sheet
/// URLs and already-normalized ones pass through unchanged.
pub fn build_csv_export_url(url: &str) -> String {
    if !url.contains("docs.google.com/spreadsheets/d/") || url.contains("export?format=csv") {
        return url.to_string();
    }

    let path = url.split('?').next().unwrap_or(url);
    let parts: Vec<&str> = path.split('/').collect();
    let sheet_id = match parts.iter().position(|p| *p == "d") {
        Some(i) => match parts.get(i + 1) {
            Some(id) if !id.is_empty() => *id,
            _ => return url.to_string(),
        },
        None => return url.to_string(),
    };

    let gid = extract_query_param(url, "gid");
    let mut csv_url =
        format!("https://docs.google.com/spreadsheets/d/{sheet_id}/export?format=csv");
    if let Some(gid) = gid {
        csv_url.push_str(&format!("&gid={gid}"));
    }
    csv_url
}

fn extract_query_param(url: &str, key: &str) -> Option<String> {
    // gid can appear in the query string or in the fragment.
    url.split(['?', '#'])
        .skip(1)
        .flat_map(|segment| segment.split('&'))
        .find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            (k == key && !v.is_empty()).then(|| v.to_string())
        })
}

/// True when a body that was supposed to be CSV looks like an HTML page
/// (a login or error interstitial instead of data).
pub fn looks_like_html(body: &str) -> bool {
    let head = body
        .get(..body.len().min(200))
        .unwrap_or("")
        .to_ascii_lowercase();
    head.contains("<!doctype html") || head.contains("<html")
}

/// Parse a CSV body into a table, tolerating ragged rows.
pub fn parse_csv_text(text: &str) -> Result<Table, StoreError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());
    let mut values = Vec::new();
    for row in reader.records() {
        let row = row?;
        values.push(row.iter().map(|c| c.to_string()).collect());
    }
    Ok(Table::from_values(values))
}

/// Read-only source backed by a CSV export URL. The single published sheet
/// is the whole store, so the tab argument is ignored on read and the write
/// operations are rejected.
#[derive(Debug)]
pub struct CsvUrlSource {
    client: reqwest::Client,
    url: String,
}

impl CsvUrlSource {
    pub fn new(
        url: impl Into<String>,
        timeout: Duration,
        user_agent: Option<&str>,
    ) -> Result<Self, StoreError> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(timeout);
        if let Some(agent) = user_agent {
            builder = builder.user_agent(agent);
        }
        let client = builder.build().map_err(|source| StoreError::Fetch {
            url: "<client build>".to_string(),
            source,
        })?;
        Ok(Self {
            client,
            url: build_csv_export_url(&url.into()),
        })
    }

    /// Export URLs cache aggressively on the serving side; a throwaway query
    /// parameter forces a fresh body.
    fn busted_url(&self) -> String {
        if self.url.contains("docs.google.com/spreadsheets/d/")
            && self.url.contains("export?format=csv")
        {
            let joiner = if self.url.contains('?') { '&' } else { '?' };
            format!("{}{}cachebust={}", self.url, joiner, Utc::now().timestamp())
        } else {
            self.url.clone()
        }
    }

    pub async fn fetch(&self) -> Result<Table, StoreError> {
        let url = self.busted_url();
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|source| StoreError::Fetch {
                url: url.clone(),
                source,
            })?;
        let body = response.text().await.map_err(|source| StoreError::Fetch {
            url: url.clone(),
            source,
        })?;
        if looks_like_html(&body) {
            return Err(StoreError::Format(
                "URL returned an HTML page, not CSV; use an export?format=csv link \
                 or publish the sheet to the web"
                    .to_string(),
            ));
        }
        let table = parse_csv_text(&body)?;
        info!(rows = table.rows.len(), "source sheet fetched");
        Ok(table)
    }
}

#[async_trait]
impl RowStore for CsvUrlSource {
    async fn read_table(&self, _tab: &str) -> Result<Table, StoreError> {
        self.fetch().await
    }

    async fn overwrite_table(&self, _tab: &str, _table: &Table) -> Result<(), StoreError> {
        Err(StoreError::Unsupported("overwrite on a CSV export source"))
    }

    async fn append_rows(
        &self,
        _tab: &str,
        _header: &[String],
        _rows: &[Vec<String>],
    ) -> Result<(), StoreError> {
        Err(StoreError::Unsupported("append on a CSV export source"))
    }
}

/// Write rows to a standalone CSV file (the per-run backup artifact),
/// creating parent directories as needed.
pub fn write_csv_file(path: &Path, table: &Table) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::WriterBuilder::new().flexible(true).from_path(path)?;
    for row in table.to_values() {
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> Table {
        Table {
            header: vec!["SITEID".into(), "Priority".into()],
            rows: vec![
                vec!["S1".into(), "P1".into()],
                vec!["S2".into(), "P2".into()],
            ],
        }
    }

    #[tokio::test]
    async fn memory_store_reads_absent_tab_as_empty() {
        let store = MemoryStore::new();
        let table = store.read_table("DATABASE").await.unwrap();
        assert!(table.is_empty());
        assert!(table.header.is_empty());
    }

    #[tokio::test]
    async fn memory_store_append_writes_header_on_empty_tab() {
        let store = MemoryStore::new();
        let header: Vec<String> = vec!["A".into(), "B".into()];
        store
            .append_rows("HISTORY", &header, &[vec!["1".into(), "2".into()]])
            .await
            .unwrap();
        store
            .append_rows("HISTORY", &header, &[vec!["3".into(), "4".into()]])
            .await
            .unwrap();
        let table = store.read_table("HISTORY").await.unwrap();
        assert_eq!(table.header, header);
        assert_eq!(table.rows.len(), 2);
    }

    #[tokio::test]
    async fn memory_store_overwrite_replaces_everything() {
        let store = MemoryStore::new();
        store.overwrite_table("DATABASE", &sample_table()).await.unwrap();
        let smaller = Table {
            header: vec!["SITEID".into()],
            rows: vec![vec!["S9".into()]],
        };
        store.overwrite_table("DATABASE", &smaller).await.unwrap();
        let table = store.read_table("DATABASE").await.unwrap();
        assert_eq!(table, smaller);
    }

    #[tokio::test]
    async fn csv_file_store_round_trips_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvFileStore::new(dir.path());

        store.overwrite_table("DATABASE", &sample_table()).await.unwrap();
        let read = store.read_table("DATABASE").await.unwrap();
        assert_eq!(read, sample_table());

        let header: Vec<String> = vec!["SITEID".into(), "Priority".into()];
        store
            .append_rows("HISTORY", &header, &[vec!["S3".into(), "P1".into()]])
            .await
            .unwrap();
        let history = store.read_table("HISTORY").await.unwrap();
        assert_eq!(history.header, header);
        assert_eq!(history.rows, vec![vec!["S3".to_string(), "P1".to_string()]]);
    }

    #[test]
    fn export_url_is_normalized_from_share_links() {
        let url = "https://docs.google.com/spreadsheets/d/abc123/edit?gid=42#gid=42";
        assert_eq!(
            build_csv_export_url(url),
            "https://docs.google.com/spreadsheets/d/abc123/export?format=csv&gid=42"
        );

        let plain = "https://docs.google.com/spreadsheets/d/abc123/edit";
        assert_eq!(
            build_csv_export_url(plain),
            "https://docs.google.com/spreadsheets/d/abc123/export?format=csv"
        );

        let already = "https://docs.google.com/spreadsheets/d/abc123/export?format=csv&gid=7";
        assert_eq!(build_csv_export_url(already), already);

        let foreign = "https://example.com/data.csv";
        assert_eq!(build_csv_export_url(foreign), foreign);
    }

    #[test]
    fn html_bodies_are_sniffed_out() {
        assert!(looks_like_html("<!DOCTYPE html><html><body>login</body>"));
        assert!(looks_like_html("\n  <HTML><head>error</head>"));
        assert!(!looks_like_html("SITEID,Priority\nS1,P1\n"));
    }

    #[test]
    fn csv_text_parses_with_ragged_rows() {
        let table = parse_csv_text("A,B,C\n1,2\n4,5,6,7\n").unwrap();
        assert_eq!(table.header, vec!["A", "B", "C"]);
        assert_eq!(table.rows[0], vec!["1", "2", ""]);
        assert_eq!(table.rows[1], vec!["4", "5", "6"]);
    }
}
