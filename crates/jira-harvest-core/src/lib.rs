//! # Jira Harvest Core
//!
//! The heuristic engine behind Jira Harvest: page classification, DOM
//! extraction, record normalization, and the versioned merge layer.
//!
//! ```text
//! classify ──▶ extract ──▶ normalize ──▶ merge ──▶ Storage
//! ```
//!
//! Classification and extraction are synchronous and side-effect free; each
//! call owns its parsed document, so they are safe to run from many request
//! handlers at once. The only blocking operation is the storage write
//! behind [`merge::Merger`].
//!
//! This crate contains no tokio, sqlx, or network I/O.

pub mod classify;
pub mod dom;
pub mod events;
pub mod extract;
pub mod merge;
pub mod models;
pub mod normalize;
pub mod record;
pub mod store;

pub use classify::{assess_page, PageClassifier};
pub use extract::{parse_html, ExtractOptions, HtmlExtractor, ParseError};
pub use merge::{MergeStats, Merger};
pub use normalize::NormalizeError;
