//! In-memory [`Storage`] implementation for tests and embedding.
//!
//! Uses `BTreeMap`s behind `std::sync::RwLock`. A poisoned lock surfaces
//! as a storage error instead of a panic.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::SecondsFormat;

use crate::models::{StoredProject, StoredTicket};

use super::Storage;

#[derive(Default)]
pub struct InMemoryStorage {
    tickets: RwLock<BTreeMap<String, StoredTicket>>,
    projects: RwLock<BTreeMap<String, StoredProject>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory storage lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory storage lock poisoned"))
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn save_tickets(
        &self,
        _project_key: &str,
        tickets: &BTreeMap<String, StoredTicket>,
    ) -> Result<()> {
        let mut stored = write(&self.tickets)?;
        for (key, ticket) in tickets {
            stored.insert(key.clone(), ticket.clone());
        }
        Ok(())
    }

    async fn load_tickets(&self, project_key: &str) -> Result<BTreeMap<String, StoredTicket>> {
        Ok(read(&self.tickets)?
            .iter()
            .filter(|(_, t)| t.data.project_key() == project_key)
            .map(|(k, t)| (k.clone(), t.clone()))
            .collect())
    }

    async fn load_all_tickets(&self) -> Result<BTreeMap<String, StoredTicket>> {
        Ok(read(&self.tickets)?.clone())
    }

    async fn clear_all_tickets(&self) -> Result<()> {
        write(&self.tickets)?.clear();
        Ok(())
    }

    async fn save_projects(&self, projects: &[StoredProject]) -> Result<()> {
        let mut stored = write(&self.projects)?;
        for p in projects {
            stored.insert(p.data.key.clone(), p.clone());
        }
        Ok(())
    }

    async fn load_projects(&self) -> Result<Vec<StoredProject>> {
        Ok(read(&self.projects)?.values().cloned().collect())
    }

    async fn clear_all_projects(&self) -> Result<()> {
        write(&self.projects)?.clear();
        Ok(())
    }

    async fn last_update(&self, project_key: &str) -> Result<Option<String>> {
        Ok(read(&self.tickets)?
            .values()
            .filter(|t| t.data.project_key() == project_key)
            .map(|t| t.updated_at)
            .max()
            .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Micros, true)))
    }

    async fn ticket_count(&self) -> Result<usize> {
        Ok(read(&self.tickets)?.len())
    }

    async fn project_count(&self) -> Result<usize> {
        Ok(read(&self.projects)?.len())
    }
}
