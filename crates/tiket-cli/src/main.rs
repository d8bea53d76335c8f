use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tiket_query::QueryService;
use tiket_store::{CsvFileStore, CsvUrlSource, RowStore};
use tiket_sync::{maybe_build_scheduler, SyncConfig, SyncOutcome, SyncPipeline};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "tiket-cli")]
#[command(about = "Ticket tracker command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one reconciliation pass now.
    Sync,
    /// Keep running, triggering the daily sync on its cron schedule.
    Serve,
    /// Ticket counts and the per-region breakdown.
    Summary,
    /// List tickets, optionally restricted to one region.
    List {
        /// Region code or full NOP name (see regions.yaml).
        #[arg(long)]
        nop: Option<String>,
    },
    /// P1 tickets.
    P1,
    /// P2 tickets.
    P2,
    /// Show one ticket by its id.
    Ticket { id: String },
    /// Manually close a ticket.
    Close {
        id: String,
        #[arg(long = "by")]
        closed_by: String,
        #[arg(long, default_value = "")]
        note: String,
    },
    /// Column names of the database table.
    Columns,
    /// Data and cache statistics.
    Info,
}

#[derive(Debug, Clone, Deserialize)]
struct RegionEntry {
    code: String,
    name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RegionRegistry {
    #[serde(default)]
    regions: Vec<RegionEntry>,
}

impl RegionRegistry {
    fn load_or_default() -> Self {
        let path = std::env::var("TIKET_REGIONS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("regions.yaml"));
        match std::fs::read_to_string(&path) {
            Ok(text) => match serde_yaml::from_str(&text) {
                Ok(registry) => registry,
                Err(err) => {
                    warn!(error = %err, path = %path.display(), "regions file unreadable");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    fn resolve(&self, code_or_name: &str) -> String {
        self.regions
            .iter()
            .find(|entry| entry.code.eq_ignore_ascii_case(code_or_name))
            .map(|entry| entry.name.clone())
            .unwrap_or_else(|| code_or_name.to_string())
    }
}

fn build_pipeline(config: &SyncConfig) -> Result<SyncPipeline> {
    let store: Arc<dyn RowStore> = Arc::new(CsvFileStore::new(&config.store_dir));
    let source: Arc<dyn RowStore> = match &config.source_url {
        Some(url) => Arc::new(
            CsvUrlSource::new(
                url.clone(),
                Duration::from_secs(config.http_timeout_secs),
                Some(&config.user_agent),
            )
            .context("building source fetcher")?,
        ),
        None => Arc::new(CsvFileStore::new(&config.store_dir)),
    };
    Ok(SyncPipeline::new(config.clone(), source, store))
}

fn query_service(config: &SyncConfig) -> QueryService {
    let store: Arc<dyn RowStore> = Arc::new(CsvFileStore::new(&config.store_dir));
    QueryService::new(store, config.tab_database.clone())
}

fn print_ticket_lines(tickets: &[tiket_query::TicketView]) {
    for ticket in tickets {
        let get = |key: &str| ticket.get(key).map(String::as_str).unwrap_or("-");
        let priority = ticket
            .get("Prio")
            .or_else(|| ticket.get("Priority"))
            .map(String::as_str)
            .unwrap_or("-");
        println!(
            "{:<20} {:<12} {:<4} {:<18} {}",
            get("TiketID"),
            get("SITEID"),
            priority,
            get("NOP"),
            get("StatusUpdate"),
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();
    let today = Utc::now().date_naive();

    match cli.command {
        Commands::Sync => {
            let pipeline = build_pipeline(&config)?;
            match pipeline.run_once(today).await {
                Ok(SyncOutcome::Synced(summary)) => {
                    println!(
                        "sync complete: run_id={} window=H-{} candidates={} created={} updated={} reopened={}",
                        summary.run_id,
                        summary.window_days_ago,
                        summary.candidate_rows,
                        summary.stats.created,
                        summary.stats.updated,
                        summary.stats.reopened,
                    );
                }
                Ok(SyncOutcome::NoData) => {
                    println!("no data found for H-1/H-2");
                }
                Err(err) => {
                    error!(error = %err, "sync failed");
                    bail!("{}", err.user_message());
                }
            }
        }
        Commands::Serve => {
            let pipeline = Arc::new(build_pipeline(&config)?);
            match maybe_build_scheduler(pipeline).await? {
                Some(scheduler) => {
                    scheduler.start().await.context("starting scheduler")?;
                    println!("scheduler running (cron: {}); ctrl-c to stop", config.sync_cron);
                    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
                }
                None => {
                    println!("scheduler disabled; set TIKET_SCHEDULER_ENABLED=1 to enable");
                }
            }
        }
        Commands::Summary => {
            let table = query_service(&config).current().await?;
            let p1 = tiket_query::tickets_by_priority(&table, tiket_core::Priority::P1).len();
            let p2 = tiket_query::tickets_by_priority(&table, tiket_core::Priority::P2).len();
            let (open, need_close) = tiket_query::summary_stats(&table);
            println!("tickets: {open} total ({p1} P1 / {p2} P2), {need_close} need close");
            let breakdown = tiket_query::region_summary_text(&table);
            if !breakdown.is_empty() {
                println!("\nper NOP (total / need close):\n{breakdown}");
            }
        }
        Commands::List { nop } => {
            let table = query_service(&config).current().await?;
            match nop {
                Some(code) => {
                    let registry = RegionRegistry::load_or_default();
                    let name = registry.resolve(&code);
                    let grouped = tiket_query::tickets_by_nop(&table);
                    match grouped.get(&name) {
                        Some(tickets) => {
                            println!("tickets for NOP {name}: {}", tickets.len());
                            print_ticket_lines(tickets);
                        }
                        None => println!("no tickets for NOP {name}"),
                    }
                }
                None => {
                    let tickets: Vec<tiket_query::TicketView> = table
                        .rows
                        .iter()
                        .map(|row| {
                            table
                                .header
                                .iter()
                                .cloned()
                                .zip(row.iter().cloned())
                                .collect()
                        })
                        .collect();
                    println!("tickets: {}", tickets.len());
                    print_ticket_lines(&tickets);
                }
            }
        }
        Commands::P1 => {
            let table = query_service(&config).current().await?;
            let tickets = tiket_query::tickets_by_priority(&table, tiket_core::Priority::P1);
            println!("P1 tickets: {}", tickets.len());
            print_ticket_lines(&tickets);
        }
        Commands::P2 => {
            let table = query_service(&config).current().await?;
            let tickets = tiket_query::tickets_by_priority(&table, tiket_core::Priority::P2);
            println!("P2 tickets: {}", tickets.len());
            print_ticket_lines(&tickets);
        }
        Commands::Ticket { id } => {
            let table = query_service(&config).current().await?;
            match tiket_query::ticket_by_id(&table, &id) {
                Some(ticket) => {
                    for (name, value) in &ticket {
                        if !value.trim().is_empty() {
                            println!("{name}: {value}");
                        }
                    }
                }
                None => bail!("ticket {id} not found"),
            }
        }
        Commands::Close { id, closed_by, note } => {
            let pipeline = build_pipeline(&config)?;
            match pipeline.close_ticket(&id, &closed_by, &note, today).await {
                Ok(closed) => {
                    println!(
                        "closed {} (site {}) by {} on {}",
                        closed.tiket_id, closed.site_id, closed.closed_by, closed.update_tanggal
                    );
                }
                Err(err) => {
                    error!(error = %err, "close failed");
                    bail!("{}", err.user_message());
                }
            }
        }
        Commands::Columns => {
            let table = query_service(&config).current().await?;
            for (i, name) in tiket_query::column_names(&table).iter().enumerate() {
                println!("{}. {name}", i + 1);
            }
        }
        Commands::Info => {
            let service = query_service(&config);
            let table = service.current().await?;
            let info = service.data_info().await;
            let (open, need_close) = tiket_query::summary_stats(&table);
            println!("rows: {}", info.total_rows);
            println!("open: {open}, need close: {need_close}");
            println!(
                "last update: {}",
                info.last_update
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "never".to_string())
            );
            println!("cache valid: {}", info.cache_valid);
            println!("cache expires in: {}s", info.cache_expires_in.as_secs());
        }
    }

    Ok(())
}
