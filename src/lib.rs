//! # Jira Harvest
//!
//! Collects Jira tickets and projects from pages a browser extension
//! captures, plus an optional REST search path, into a versioned SQLite
//! store. The heuristics live in [`jira_harvest_core`]; this crate wires
//! them to configuration, storage, HTTP, and the CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────────────┐   ┌──────────┐
//! │  Browser    │──▶│ Collector                 │──▶│  SQLite   │
//! │  capture    │   │ classify → extract →      │   │ versioned │
//! └─────────────┘   │ normalize → merge         │   └────┬─────┘
//! ┌─────────────┐   │                           │        │
//! │ REST search │──▶│                           │        ▼
//! └─────────────┘   └────────────┬─────────────┘   ┌──────────┐
//!                                ▼                 │ CLI/HTTP │
//!                          EventHub (SSE)          └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite [`Storage`](jira_harvest_core::store::Storage) |
//! | [`ingest`] | Collection pipeline |
//! | [`events`] | Broadcast event hub |
//! | [`server`] | HTTP server |
//! | [`jira_api`] | REST issue search |
//! | [`commands`] | CLI command handlers |
//! | [`stats`] | Store statistics |

pub mod commands;
pub mod config;
pub mod db;
pub mod events;
pub mod ingest;
pub mod jira_api;
pub mod migrate;
pub mod server;
pub mod sqlite_store;
pub mod stats;
