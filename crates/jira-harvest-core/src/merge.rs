//! Ingestion merge layer.
//!
//! Folds freshly normalized tickets and projects into versioned storage:
//!
//! - new key: `version = 1`, `collectedAt = updatedAt = now`
//! - existing key: `version + 1`, `collectedAt` and `sent`/`sentAt` kept,
//!   `updatedAt` advanced
//!
//! `updatedAt` never goes backwards or repeats for a record, even when the
//! wall clock has not moved past the stored value.
//!
//! Add/update counts are tracked per key during the merge. Concurrent merges
//! of the same key are last-write-wins; no optimistic check is made.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::models::{project_key_of, ProjectData, StoredProject, StoredTicket, TicketData, Versioned};
use crate::store::Storage;

/// Per-call merge outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeStats {
    pub added: usize,
    /// Existing keys whose content changed.
    pub updated: usize,
    /// Existing keys merged with identical content (still version-bumped).
    pub unchanged: usize,
    /// Incoming entries rejected before reaching storage.
    pub skipped: usize,
}

impl MergeStats {
    /// Existing keys that received a new version.
    pub fn replaced(&self) -> usize {
        self.updated + self.unchanged
    }
}

/// `now`, unless that would not move past `previous`.
pub fn next_timestamp(previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match previous {
        Some(prev) if now <= prev => prev + Duration::microseconds(1),
        _ => now,
    }
}

fn bump<T>(data: T, existing: Option<&Versioned<T>>, now: DateTime<Utc>) -> Versioned<T> {
    match existing {
        Some(prev) => Versioned {
            data,
            collected_at: prev.collected_at,
            updated_at: next_timestamp(Some(prev.updated_at), now),
            version: prev.version + 1,
            sent: prev.sent,
            sent_at: prev.sent_at,
        },
        None => Versioned {
            data,
            collected_at: now,
            updated_at: now,
            version: 1,
            sent: false,
            sent_at: None,
        },
    }
}

pub struct Merger {
    storage: Arc<dyn Storage>,
}

impl Merger {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Merge `incoming` tickets of one project. Storage errors propagate
    /// unchanged and nothing is retried.
    #[tracing::instrument(skip(self, incoming), fields(count = incoming.len()))]
    pub async fn merge_tickets(
        &self,
        project_key: &str,
        incoming: BTreeMap<String, TicketData>,
    ) -> Result<MergeStats> {
        let mut stats = MergeStats::default();
        if incoming.is_empty() {
            return Ok(stats);
        }

        let existing = self.storage.load_tickets(project_key).await?;
        let now = Utc::now();
        let mut merged: BTreeMap<String, StoredTicket> = BTreeMap::new();

        for ticket in incoming.into_values() {
            if project_key_of(&ticket.key) != project_key {
                warn!(key = %ticket.key, project_key, "ticket belongs to another project, skipped");
                stats.skipped += 1;
                continue;
            }
            let previous = existing.get(&ticket.key);
            match previous {
                None => stats.added += 1,
                Some(prev) if prev.data.hash == ticket.hash => stats.unchanged += 1,
                Some(_) => stats.updated += 1,
            }
            merged.insert(ticket.key.clone(), bump(ticket, previous, now));
        }

        if !merged.is_empty() {
            self.storage.save_tickets(project_key, &merged).await?;
        }
        debug!(?stats, "tickets merged");
        Ok(stats)
    }

    /// Merge projects. A key repeated in `incoming` keeps its last entry.
    #[tracing::instrument(skip(self, incoming), fields(count = incoming.len()))]
    pub async fn merge_projects(&self, incoming: Vec<ProjectData>) -> Result<MergeStats> {
        let mut stats = MergeStats::default();
        let mut latest: BTreeMap<String, ProjectData> = BTreeMap::new();
        for project in incoming {
            latest.insert(project.key.clone(), project);
        }
        if latest.is_empty() {
            return Ok(stats);
        }

        let existing: BTreeMap<String, StoredProject> = self
            .storage
            .load_projects()
            .await?
            .into_iter()
            .map(|p| (p.data.key.clone(), p))
            .collect();
        let now = Utc::now();

        let merged: Vec<StoredProject> = latest
            .into_values()
            .map(|project| {
                let previous = existing.get(&project.key);
                match previous {
                    None => stats.added += 1,
                    Some(prev) if prev.data == project => stats.unchanged += 1,
                    Some(_) => stats.updated += 1,
                }
                bump(project, previous, now)
            })
            .collect();

        self.storage.save_projects(&merged).await?;
        debug!(?stats, "projects merged");
        Ok(stats)
    }
}
