//! Storage abstraction for Jira Harvest.
//!
//! The [`Storage`] trait is the only shared mutable resource the core
//! touches. The merge layer holds no locks of its own; implementations
//! serialize their own writers and must not return from a `save_*` call
//! before the write is durable.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`save_tickets`](Storage::save_tickets) | Upsert a project's tickets |
//! | [`load_tickets`](Storage::load_tickets) | Tickets of one project |
//! | [`load_all_tickets`](Storage::load_all_tickets) | Every stored ticket |
//! | [`clear_all_tickets`](Storage::clear_all_tickets) | Operator clear |
//! | [`save_projects`](Storage::save_projects) | Upsert projects |
//! | [`load_projects`](Storage::load_projects) | Every stored project |
//! | [`clear_all_projects`](Storage::clear_all_projects) | Operator clear |
//! | [`last_update`](Storage::last_update) | Newest `updatedAt` of a project's tickets |
//! | [`ticket_count`](Storage::ticket_count) / [`project_count`](Storage::project_count) | Totals for statistics |

pub mod memory;

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{StoredProject, StoredTicket};

#[async_trait]
pub trait Storage: Send + Sync {
    /// Upsert `tickets` (keyed by issue key) under `project_key`.
    async fn save_tickets(
        &self,
        project_key: &str,
        tickets: &BTreeMap<String, StoredTicket>,
    ) -> Result<()>;

    async fn load_tickets(&self, project_key: &str) -> Result<BTreeMap<String, StoredTicket>>;

    async fn load_all_tickets(&self) -> Result<BTreeMap<String, StoredTicket>>;

    async fn clear_all_tickets(&self) -> Result<()>;

    /// Upsert projects keyed by project key.
    async fn save_projects(&self, projects: &[StoredProject]) -> Result<()>;

    async fn load_projects(&self) -> Result<Vec<StoredProject>>;

    async fn clear_all_projects(&self) -> Result<()>;

    /// RFC 3339 timestamp of the newest ticket update in `project_key`.
    async fn last_update(&self, project_key: &str) -> Result<Option<String>>;

    async fn ticket_count(&self) -> Result<usize>;

    async fn project_count(&self) -> Result<usize>;
}
