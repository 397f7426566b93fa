//! Offline and store-maintenance commands behind the `jharvest` CLI.
//!
//! `assess` and `extract` work on a saved HTML file and never touch the
//! database; `fetch` and `clear` operate on the configured store.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::info;

use jira_harvest_core::events::NoEvents;
use jira_harvest_core::models::{PageType, ProjectData, TicketData};
use jira_harvest_core::normalize::normalize_api_ticket;
use jira_harvest_core::store::Storage;
use jira_harvest_core::HtmlExtractor;

use crate::config::{Config, ExtractionConfig};
use crate::db;
use crate::ingest::{normalize_records, Collector};
use crate::jira_api::JiraClient;
use crate::sqlite_store::SqliteStorage;

fn read_page(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read page file: {}", path.display()))
}

/// Classify a saved page and print the verdict as JSON.
pub fn run_assess(extraction: &ExtractionConfig, path: &Path, url: &str) -> Result<()> {
    let html = read_page(path)?;
    let verdict = extraction.classifier().assess(&html, url);
    println!("{}", serde_json::to_string_pretty(&verdict)?);
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExtractOutput {
    page_type: PageType,
    tickets: Vec<TicketData>,
    projects: Vec<ProjectData>,
    skipped: usize,
}

/// Extract and normalize a saved page, printing the entities as JSON.
///
/// Without `page_type` the classifier decides, but extraction runs even when
/// it would not have been collected.
pub fn run_extract(
    extraction: &ExtractionConfig,
    path: &Path,
    url: &str,
    page_type: Option<&str>,
) -> Result<()> {
    let html = read_page(path)?;
    let page_type = match page_type {
        Some(raw) => raw.parse::<PageType>().map_err(anyhow::Error::msg)?,
        None => extraction.classifier().assess(&html, url).page_type,
    };

    let records = HtmlExtractor::new(extraction.options()).parse_html(&html, page_type, url)?;
    let normalized = normalize_records(&records);
    let output = ExtractOutput {
        page_type,
        tickets: normalized.tickets,
        projects: normalized.projects,
        skipped: normalized.skipped,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn open_storage(config: &Config) -> Result<Arc<SqliteStorage>> {
    let pool = db::connect(config).await?;
    crate::migrate::apply(&pool).await?;
    Ok(Arc::new(SqliteStorage::new(pool)))
}

/// Pull issues matching `jql` from the REST API into the store.
pub async fn run_fetch(config: &Config, jql: &str) -> Result<()> {
    let Some(jira) = &config.jira else {
        bail!("fetch requires a [jira] section in the config file");
    };
    let client = JiraClient::from_config(jira)?;
    let issues = client.search(jql).await?;

    let mut tickets = Vec::with_capacity(issues.len());
    let mut skipped = 0usize;
    for issue in &issues {
        match normalize_api_ticket(issue) {
            Ok(t) => tickets.push(t),
            Err(e) => {
                tracing::warn!(error = %e, "issue skipped");
                skipped += 1;
            }
        }
    }

    let storage = open_storage(config).await?;
    let collector = Collector::new(storage, &config.extraction, Arc::new(NoEvents));
    let stats = collector.store(tickets, Vec::new()).await?;
    info!(?stats, "fetch merged");

    println!("fetch {}", jql);
    println!("  issues received: {}", issues.len());
    println!("  skipped:         {}", skipped);
    println!("  added:           {}", stats.tickets_added);
    println!("  updated:         {}", stats.tickets_updated);
    println!("  tickets total:   {}", stats.tickets_total);
    Ok(())
}

/// Operator clear of `tickets`, `projects`, or `all`.
pub async fn run_clear(config: &Config, what: &str) -> Result<()> {
    let (tickets, projects) = match what {
        "tickets" => (true, false),
        "projects" => (false, true),
        "all" => (true, true),
        other => bail!("Unknown target: '{}'. Available: tickets, projects, all", other),
    };

    let storage = open_storage(config).await?;
    if tickets {
        let n = storage.ticket_count().await?;
        storage.clear_all_tickets().await?;
        println!("Cleared {} tickets.", n);
    }
    if projects {
        let n = storage.project_count().await?;
        storage.clear_all_projects().await?;
        println!("Cleared {} projects.", n);
    }
    storage.pool().close().await;
    Ok(())
}
