//! SQLite-backed [`Storage`] implementation.
//!
//! Entities are stored as JSON in `data_json`; merge bookkeeping lives in
//! plain columns so `last_update` and the totals stay cheap. Timestamps are
//! RFC 3339 UTC with microseconds, which sorts correctly as text.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use jira_harvest_core::models::{StoredProject, StoredTicket, Versioned};
use jira_harvest_core::store::Storage;

/// SQLite implementation of the [`Storage`] trait.
///
/// Every `save_*` call runs in a single transaction and returns after
/// commit.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("bad timestamp in store: {}", raw))?
        .with_timezone(&Utc))
}

fn versioned<T: DeserializeOwned>(row: &SqliteRow) -> Result<Versioned<T>> {
    let key: String = row.get("key");
    let data_json: String = row.get("data_json");
    let data: T = serde_json::from_str(&data_json)
        .with_context(|| format!("corrupt stored record: {}", key))?;
    let collected_at: String = row.get("collected_at");
    let updated_at: String = row.get("updated_at");
    let version: i64 = row.get("version");
    let sent: bool = row.get("sent");
    let sent_at: Option<String> = row.get("sent_at");

    Ok(Versioned {
        data,
        collected_at: parse_ts(&collected_at)?,
        updated_at: parse_ts(&updated_at)?,
        version: u64::try_from(version).unwrap_or_default(),
        sent,
        sent_at: sent_at.as_deref().map(parse_ts).transpose()?,
    })
}

const ENTITY_COLUMNS: &str =
    "key, data_json, collected_at, updated_at, version, sent, sent_at";

#[async_trait]
impl Storage for SqliteStorage {
    async fn save_tickets(
        &self,
        project_key: &str,
        tickets: &BTreeMap<String, StoredTicket>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for (key, ticket) in tickets {
            let data_json = serde_json::to_string(&ticket.data)?;
            sqlx::query(
                r#"
                INSERT INTO tickets (key, project_key, data_json, hash, collected_at,
                                     updated_at, version, sent, sent_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET
                    project_key = excluded.project_key,
                    data_json = excluded.data_json,
                    hash = excluded.hash,
                    collected_at = excluded.collected_at,
                    updated_at = excluded.updated_at,
                    version = excluded.version,
                    sent = excluded.sent,
                    sent_at = excluded.sent_at
                "#,
            )
            .bind(key)
            .bind(project_key)
            .bind(&data_json)
            .bind(&ticket.data.hash)
            .bind(format_ts(ticket.collected_at))
            .bind(format_ts(ticket.updated_at))
            .bind(ticket.version as i64)
            .bind(ticket.sent)
            .bind(ticket.sent_at.map(format_ts))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load_tickets(&self, project_key: &str) -> Result<BTreeMap<String, StoredTicket>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM tickets WHERE project_key = ? ORDER BY key",
            ENTITY_COLUMNS
        ))
        .bind(project_key)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| versioned(row).map(|t: StoredTicket| (t.data.key.clone(), t)))
            .collect()
    }

    async fn load_all_tickets(&self) -> Result<BTreeMap<String, StoredTicket>> {
        let rows = sqlx::query(&format!("SELECT {} FROM tickets ORDER BY key", ENTITY_COLUMNS))
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| versioned(row).map(|t: StoredTicket| (t.data.key.clone(), t)))
            .collect()
    }

    async fn clear_all_tickets(&self) -> Result<()> {
        sqlx::query("DELETE FROM tickets").execute(&self.pool).await?;
        Ok(())
    }

    async fn save_projects(&self, projects: &[StoredProject]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for project in projects {
            let data_json = serde_json::to_string(&project.data)?;
            sqlx::query(
                r#"
                INSERT INTO projects (key, data_json, collected_at, updated_at, version,
                                      sent, sent_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET
                    data_json = excluded.data_json,
                    collected_at = excluded.collected_at,
                    updated_at = excluded.updated_at,
                    version = excluded.version,
                    sent = excluded.sent,
                    sent_at = excluded.sent_at
                "#,
            )
            .bind(&project.data.key)
            .bind(&data_json)
            .bind(format_ts(project.collected_at))
            .bind(format_ts(project.updated_at))
            .bind(project.version as i64)
            .bind(project.sent)
            .bind(project.sent_at.map(format_ts))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load_projects(&self) -> Result<Vec<StoredProject>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM projects ORDER BY key",
            ENTITY_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(versioned).collect()
    }

    async fn clear_all_projects(&self) -> Result<()> {
        sqlx::query("DELETE FROM projects").execute(&self.pool).await?;
        Ok(())
    }

    async fn last_update(&self, project_key: &str) -> Result<Option<String>> {
        let newest: Option<String> =
            sqlx::query_scalar("SELECT MAX(updated_at) FROM tickets WHERE project_key = ?")
                .bind(project_key)
                .fetch_one(&self.pool)
                .await?;
        Ok(newest)
    }

    async fn ticket_count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tickets")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn project_count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM projects")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use jira_harvest_core::models::{ProjectData, TicketData};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn storage() -> SqliteStorage {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::migrate::apply(&pool).await.unwrap();
        SqliteStorage::new(pool)
    }

    fn ticket(key: &str, at: DateTime<Utc>) -> StoredTicket {
        Versioned {
            data: TicketData {
                key: key.to_string(),
                project_id: "ABC".into(),
                summary: Some(format!("summary of {}", key)),
                labels: vec!["backend".into()],
                hash: "h".into(),
                ..Default::default()
            },
            collected_at: at,
            updated_at: at,
            version: 1,
            sent: false,
            sent_at: None,
        }
    }

    #[tokio::test]
    async fn tickets_survive_a_round_trip() {
        let store = storage().await;
        let now = Utc::now();
        let mut batch = BTreeMap::new();
        batch.insert("ABC-1".to_string(), ticket("ABC-1", now - Duration::minutes(3)));
        batch.insert("ABC-2".to_string(), ticket("ABC-2", now));
        store.save_tickets("ABC", &batch).await.unwrap();

        let loaded = store.load_tickets("ABC").await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded["ABC-1"].data, batch["ABC-1"].data);
        assert_eq!(
            format_ts(loaded["ABC-2"].updated_at),
            format_ts(batch["ABC-2"].updated_at)
        );
        assert_eq!(
            store.last_update("ABC").await.unwrap(),
            Some(format_ts(now))
        );
        assert_eq!(store.last_update("OPS").await.unwrap(), None);
        assert_eq!(store.ticket_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn upsert_replaces_bookkeeping() {
        let store = storage().await;
        let now = Utc::now();
        let mut first = ticket("ABC-1", now);
        let mut batch = BTreeMap::new();
        batch.insert("ABC-1".to_string(), first.clone());
        store.save_tickets("ABC", &batch).await.unwrap();

        first.version = 2;
        first.sent = true;
        first.sent_at = Some(now);
        batch.insert("ABC-1".to_string(), first);
        store.save_tickets("ABC", &batch).await.unwrap();

        let all = store.load_all_tickets().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all["ABC-1"].version, 2);
        assert!(all["ABC-1"].sent);
        assert!(all["ABC-1"].sent_at.is_some());

        store.clear_all_tickets().await.unwrap();
        assert_eq!(store.ticket_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn projects_upsert_by_key() {
        let store = storage().await;
        let now = Utc::now();
        let project = |name: &str| Versioned {
            data: ProjectData {
                key: "ABC".into(),
                name: Some(name.into()),
                project_type: Some("software".into()),
                ..Default::default()
            },
            collected_at: now,
            updated_at: now,
            version: 1,
            sent: false,
            sent_at: None,
        };
        store.save_projects(&[project("Alpha")]).await.unwrap();
        store.save_projects(&[project("Alpha v2")]).await.unwrap();

        let projects = store.load_projects().await.unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].data.name.as_deref(), Some("Alpha v2"));
        assert_eq!(store.project_count().await.unwrap(), 1);

        store.clear_all_projects().await.unwrap();
        assert_eq!(store.project_count().await.unwrap(), 0);
    }
}
