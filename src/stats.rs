//! Store statistics.
//!
//! Summarizes what has been collected: ticket and project totals, how many
//! are still unsent, and a per-project breakdown with the newest update.
//! Used by `jharvest stats`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::config::Config;
use crate::db;

struct ProjectStats {
    project_key: String,
    ticket_count: i64,
    unsent_count: i64,
    max_version: i64,
    last_update: Option<String>,
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let total_tickets: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tickets")
        .fetch_one(&pool)
        .await?;
    let unsent_tickets: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tickets WHERE sent = 0")
        .fetch_one(&pool)
        .await?;
    let total_projects: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM projects")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Jira Harvest: Store Stats");
    println!("=========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Projects:    {}", total_projects);
    println!("  Tickets:     {}", total_tickets);
    println!("  Unsent:      {} / {}", unsent_tickets, total_tickets);

    let rows = sqlx::query(
        r#"
        SELECT
            project_key,
            COUNT(*) AS ticket_count,
            SUM(CASE WHEN sent = 0 THEN 1 ELSE 0 END) AS unsent_count,
            MAX(version) AS max_version,
            MAX(updated_at) AS last_update
        FROM tickets
        GROUP BY project_key
        ORDER BY ticket_count DESC, project_key
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let projects: Vec<ProjectStats> = rows
        .iter()
        .map(|row| ProjectStats {
            project_key: row.get("project_key"),
            ticket_count: row.get("ticket_count"),
            unsent_count: row.get("unsent_count"),
            max_version: row.get("max_version"),
            last_update: row.get("last_update"),
        })
        .collect();

    if !projects.is_empty() {
        println!();
        println!("  By project:");
        println!(
            "  {:<16} {:>8} {:>8} {:>8}   {}",
            "PROJECT", "TICKETS", "UNSENT", "MAX VER", "LAST UPDATE"
        );
        println!("  {}", "-".repeat(64));

        let now = Utc::now();
        for p in &projects {
            let updated = p
                .last_update
                .as_deref()
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|ts| format_relative(ts.with_timezone(&Utc), now))
                .unwrap_or_else(|| "never".to_string());
            println!(
                "  {:<16} {:>8} {:>8} {:>8}   {}",
                p.project_key, p.ticket_count, p.unsent_count, p.max_version, updated
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// "3 hours ago" style rendering; absolute date past 30 days or in the future.
fn format_relative(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = (now - ts).num_seconds();
    if delta < 0 || delta >= 86400 * 30 {
        return ts.format("%Y-%m-%d %H:%M").to_string();
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    }
}
