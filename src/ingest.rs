//! Ingestion pipeline orchestration.
//!
//! Coordinates one collection: envelope → classification → extraction →
//! normalization → merge → events. Two envelope forms are accepted:
//!
//! - `data.html`: a captured page, classified and then extracted
//! - `data.tickets[]` / `data.projects[]`: API-style field bags
//!
//! Per-record normalization failures are logged and skipped; the rest of
//! the batch still lands. Extraction and storage failures fail the whole
//! collection and publish `collection_failed`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use jira_harvest_core::events::{CollectStats, CollectionEvent, EventKind, EventSink};
use jira_harvest_core::models::{Confidence, PageAssessment, PageType, ProjectData, TicketData};
use jira_harvest_core::normalize::{
    normalize_api_project, normalize_api_ticket, normalize_project, normalize_ticket,
};
use jira_harvest_core::record::{Record, RecordKind};
use jira_harvest_core::store::Storage;
use jira_harvest_core::{HtmlExtractor, Merger, ParseError, PageClassifier};

use crate::config::ExtractionConfig;

/// Inbound collection request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectEnvelope {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub data: CollectData,
    #[serde(default)]
    pub collector: Option<CollectorInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectData {
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub tickets: Option<Vec<Json>>,
    #[serde(default)]
    pub projects: Option<Vec<Json>>,
    /// Caller's page type hint; overrides the classifier when it parses.
    #[serde(default)]
    pub page_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectorInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_type: Option<PageType>,
    pub transaction_id: String,
    pub stats: CollectStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("envelope carries neither data.html nor data.tickets")]
    EmptyEnvelope,

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("storage failure: {0:#}")]
    Storage(#[from] anyhow::Error),

    #[error("page scan task failed: {0}")]
    Task(String),
}

/// Records normalized from one page, split by entity.
#[derive(Debug, Default)]
pub struct Normalized {
    pub tickets: Vec<TicketData>,
    pub projects: Vec<ProjectData>,
    pub skipped: usize,
}

/// Normalize extracted records, skipping the ones that fail.
pub fn normalize_records(records: &[Record]) -> Normalized {
    let mut out = Normalized::default();
    for record in records {
        let result = match record.kind {
            RecordKind::Issue => normalize_ticket(record).map(|t| out.tickets.push(t)),
            RecordKind::Project => normalize_project(record).map(|p| out.projects.push(p)),
        };
        if let Err(e) = result {
            warn!(error = %e, "record skipped");
            out.skipped += 1;
        }
    }
    out
}

fn normalize_bags(tickets: &[Json], projects: &[Json]) -> Normalized {
    let mut out = Normalized::default();
    for bag in tickets {
        match normalize_api_ticket(bag) {
            Ok(t) => out.tickets.push(t),
            Err(e) => {
                warn!(error = %e, "api ticket skipped");
                out.skipped += 1;
            }
        }
    }
    for bag in projects {
        match normalize_api_project(bag) {
            Ok(p) => out.projects.push(p),
            Err(e) => {
                warn!(error = %e, "api project skipped");
                out.skipped += 1;
            }
        }
    }
    out
}

/// Outcome of classifying and extracting one page.
enum PageScan {
    Skipped {
        page_type: PageType,
        confidence: Confidence,
    },
    Extracted {
        page_type: PageType,
        normalized: Normalized,
    },
    Failed {
        page_type: PageType,
        error: ParseError,
    },
}

/// Classify, extract, and normalize one page. Synchronous and CPU bound;
/// `collect` runs it on the blocking pool.
fn scan_page(
    classifier: &PageClassifier,
    extractor: &HtmlExtractor,
    html: &str,
    url: &str,
    hint: Option<PageType>,
) -> PageScan {
    let verdict = classifier.assess(html, url);
    let page_type = hint.unwrap_or(verdict.page_type);
    let collectable = match hint {
        Some(t) => t.is_harvestable(),
        None => verdict.collectable,
    };
    if !collectable {
        return PageScan::Skipped {
            page_type,
            confidence: verdict.confidence,
        };
    }
    match extractor.parse_html(html, page_type, url) {
        Ok(records) => PageScan::Extracted {
            page_type,
            normalized: normalize_records(&records),
        },
        Err(error) => PageScan::Failed { page_type, error },
    }
}

pub struct Collector {
    classifier: PageClassifier,
    extractor: HtmlExtractor,
    merger: Merger,
    events: Arc<dyn EventSink>,
}

impl Collector {
    pub fn new(
        storage: Arc<dyn Storage>,
        extraction: &ExtractionConfig,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            classifier: extraction.classifier(),
            extractor: HtmlExtractor::new(extraction.options()),
            merger: Merger::new(storage),
            events,
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        self.merger.storage()
    }

    pub fn assess(&self, html: &str, url: &str) -> PageAssessment {
        self.classifier.assess(html, url)
    }

    /// Run one collection end to end.
    #[tracing::instrument(skip_all, fields(url = %envelope.url))]
    pub async fn collect(&self, envelope: CollectEnvelope) -> Result<CollectResponse, CollectError> {
        let tx = Uuid::new_v4().to_string();
        let url = envelope.url.as_str();
        if let Some(c) = &envelope.collector {
            debug!(collector = %c.name, version = %c.version, "collection received");
        }

        let data = envelope.data;
        if data.html.is_none() && data.tickets.is_none() && data.projects.is_none() {
            return Err(CollectError::EmptyEnvelope);
        }

        self.events
            .publish(CollectionEvent::new(EventKind::CollectionStarted, &tx).url(Some(url)));

        let hint = data.page_type.as_deref().and_then(|raw| match raw.parse::<PageType>() {
            Ok(t) => Some(t),
            Err(e) => {
                debug!(error = %e, "ignoring page type hint");
                None
            }
        });

        let (page_type, normalized) = if data.tickets.is_some() || data.projects.is_some() {
            let tickets = data.tickets.unwrap_or_default();
            let projects = data.projects.unwrap_or_default();
            (hint, normalize_bags(&tickets, &projects))
        } else {
            let html = data.html.unwrap_or_default();
            let classifier = self.classifier.clone();
            let extractor = self.extractor.clone();
            let page_url = url.to_string();
            let scan = tokio::task::spawn_blocking(move || {
                scan_page(&classifier, &extractor, &html, &page_url, hint)
            })
            .await
            .map_err(|e| {
                self.fail(&tx, url, hint, &e.to_string());
                CollectError::Task(e.to_string())
            })?;

            match scan {
                PageScan::Skipped {
                    page_type,
                    confidence,
                } => {
                    let message = format!(
                        "page classified as {} ({} confidence); nothing collected",
                        page_type, confidence
                    );
                    info!(%page_type, "collection skipped");
                    self.events.publish(
                        CollectionEvent::new(EventKind::CollectionSkipped, &tx)
                            .url(Some(url))
                            .page_type(page_type)
                            .message(message.clone()),
                    );
                    return Ok(CollectResponse {
                        success: true,
                        page_type: Some(page_type),
                        transaction_id: tx,
                        stats: CollectStats::default(),
                        message: Some(message),
                    });
                }
                PageScan::Failed { page_type, error } => {
                    self.fail(&tx, url, Some(page_type), &error.to_string());
                    return Err(error.into());
                }
                PageScan::Extracted {
                    page_type,
                    normalized,
                } => (Some(page_type), normalized),
            }
        };

        let stats = match self.store(normalized.tickets, normalized.projects).await {
            Ok(stats) => stats,
            Err(e) => {
                self.fail(&tx, url, page_type, &format!("{:#}", e));
                return Err(e.into());
            }
        };

        let stored = stats.tickets_added
            + stats.tickets_updated
            + stats.projects_added
            + stats.projects_updated;
        let message = if stored == 0 {
            info!(skipped = normalized.skipped, "extraction empty");
            Some("no records extracted".to_string())
        } else {
            None
        };

        let mut event = CollectionEvent::new(EventKind::CollectionSuccess, &tx)
            .url(Some(url))
            .stats(stats);
        if let Some(t) = page_type {
            event = event.page_type(t);
        }
        self.events.publish(event);

        Ok(CollectResponse {
            success: true,
            page_type,
            transaction_id: tx,
            stats,
            message,
        })
    }

    /// Merge normalized entities and report per-key counts plus store totals.
    pub async fn store(
        &self,
        tickets: Vec<TicketData>,
        projects: Vec<ProjectData>,
    ) -> anyhow::Result<CollectStats> {
        let mut by_project: BTreeMap<String, BTreeMap<String, TicketData>> = BTreeMap::new();
        for ticket in tickets {
            by_project
                .entry(ticket.project_key().to_string())
                .or_default()
                .insert(ticket.key.clone(), ticket);
        }

        let mut stats = CollectStats::default();
        for (project_key, batch) in by_project {
            let merged = self.merger.merge_tickets(&project_key, batch).await?;
            stats.tickets_added += merged.added;
            stats.tickets_updated += merged.replaced();
        }

        if !projects.is_empty() {
            let merged = self.merger.merge_projects(projects).await?;
            stats.projects_added = merged.added;
            stats.projects_updated = merged.replaced();
        }

        let storage = self.merger.storage();
        stats.tickets_total = storage.ticket_count().await?;
        stats.projects_total = storage.project_count().await?;
        Ok(stats)
    }

    fn fail(&self, tx: &str, url: &str, page_type: Option<PageType>, message: &str) {
        warn!(error = message, "collection failed");
        let mut event = CollectionEvent::new(EventKind::CollectionFailed, tx)
            .url(Some(url))
            .message(message);
        if let Some(t) = page_type {
            event = event.page_type(t);
        }
        self.events.publish(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jira_harvest_core::store::memory::InMemoryStorage;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<CollectionEvent>>);

    impl Recorder {
        fn kinds(&self) -> Vec<EventKind> {
            self.0.lock().unwrap().iter().map(|e| e.kind).collect()
        }
    }

    impl EventSink for Recorder {
        fn publish(&self, event: CollectionEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn collector() -> (Collector, Arc<InMemoryStorage>, Arc<Recorder>) {
        let storage = Arc::new(InMemoryStorage::new());
        let events = Arc::new(Recorder::default());
        let collector = Collector::new(
            storage.clone(),
            &ExtractionConfig::default(),
            events.clone(),
        );
        (collector, storage, events)
    }

    const ISSUES_URL: &str = "https://x.atlassian.net/jira/software/projects/ABC/issues";

    fn issue_list() -> String {
        let rows: String = (1..=3)
            .map(|n| {
                format!(
                    r#"<tr data-issue-key="ABC-{n}"><td><a href="/browse/ABC-{n}">Task {n}</a></td><td>To Do</td></tr>"#
                )
            })
            .collect();
        format!("<html><body><table><tbody>{rows}</tbody></table></body></html>")
    }

    fn html_envelope(url: &str, html: String) -> CollectEnvelope {
        CollectEnvelope {
            url: url.to_string(),
            data: CollectData {
                html: Some(html),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn list_page_is_collected_and_versioned() {
        let (collector, storage, events) = collector();

        let resp = collector
            .collect(html_envelope(ISSUES_URL, issue_list()))
            .await
            .unwrap();
        assert!(resp.success);
        assert_eq!(resp.page_type, Some(PageType::IssueList));
        assert_eq!(resp.stats.tickets_added, 3);
        assert_eq!(resp.stats.tickets_total, 3);
        assert!(Uuid::parse_str(&resp.transaction_id).is_ok());
        assert_eq!(
            events.kinds(),
            vec![EventKind::CollectionStarted, EventKind::CollectionSuccess]
        );

        let resp = collector
            .collect(html_envelope(ISSUES_URL, issue_list()))
            .await
            .unwrap();
        assert_eq!(resp.stats.tickets_added, 0);
        assert_eq!(resp.stats.tickets_updated, 3);
        let stored = storage.load_tickets("ABC").await.unwrap();
        assert!(stored.values().all(|t| t.version == 2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_page_scans_complete_off_the_async_workers() {
        let (collector, storage, _) = collector();
        let other = issue_list().replace("ABC-", "DEF-");
        let (first, second) = tokio::join!(
            collector.collect(html_envelope(ISSUES_URL, issue_list())),
            collector.collect(html_envelope(
                "https://x.atlassian.net/jira/software/projects/DEF/issues",
                other,
            )),
        );
        assert_eq!(first.unwrap().stats.tickets_added, 3);
        assert_eq!(second.unwrap().stats.tickets_added, 3);
        assert_eq!(storage.ticket_count().await.unwrap(), 6);
        assert_eq!(storage.load_tickets("DEF").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn unknown_page_is_skipped_with_a_message() {
        let (collector, storage, events) = collector();
        let resp = collector
            .collect(html_envelope(
                "https://example.com",
                "<html><body><p>hello</p></body></html>".into(),
            ))
            .await
            .unwrap();
        assert!(resp.success);
        assert_eq!(resp.page_type, Some(PageType::Unknown));
        assert!(resp.message.unwrap().contains("nothing collected"));
        assert_eq!(storage.ticket_count().await.unwrap(), 0);
        assert_eq!(
            events.kinds(),
            vec![EventKind::CollectionStarted, EventKind::CollectionSkipped]
        );
    }

    #[tokio::test]
    async fn page_type_hint_overrides_classifier() {
        let (collector, storage, _) = collector();
        let html = r#"<html><body><table><tbody>
            <tr><td>OPS</td><td><a href="/jira/projects/OPS">Operations</a></td></tr>
        </tbody></table></body></html>"#;
        let mut envelope = html_envelope("https://example.com/somewhere", html.into());
        envelope.data.page_type = Some("projectsList".into());

        let resp = collector.collect(envelope).await.unwrap();
        assert_eq!(resp.page_type, Some(PageType::ProjectsList));
        assert_eq!(resp.stats.projects_added, 1);
        let projects = storage.load_projects().await.unwrap();
        assert_eq!(projects[0].data.key, "OPS");
        assert_eq!(projects[0].data.name.as_deref(), Some("Operations"));
    }

    #[tokio::test]
    async fn unparseable_document_fails_the_collection() {
        let (collector, _, events) = collector();
        let mut envelope = html_envelope(ISSUES_URL, "   ".into());
        envelope.data.page_type = Some("issueList".into());

        let err = collector.collect(envelope).await.unwrap_err();
        assert!(matches!(err, CollectError::Parse(ParseError::Empty)));
        assert_eq!(
            events.kinds(),
            vec![EventKind::CollectionStarted, EventKind::CollectionFailed]
        );
    }

    #[tokio::test]
    async fn api_tickets_skip_bad_entries() {
        let (collector, storage, _) = collector();
        let envelope = CollectEnvelope {
            url: "https://x.atlassian.net/rest/api/2/search".into(),
            data: CollectData {
                tickets: Some(vec![
                    json!({"key": "ABC-1", "fields": {"summary": "One", "status": {"name": "Done"}}}),
                    json!({"key": "OPS-9", "summary": "Other project"}),
                    json!({"summary": "no key"}),
                    json!("not an object"),
                ]),
                ..Default::default()
            },
            ..Default::default()
        };

        let resp = collector.collect(envelope).await.unwrap();
        assert_eq!(resp.stats.tickets_added, 2);
        assert_eq!(resp.page_type, None);
        let abc = storage.load_tickets("ABC").await.unwrap();
        assert_eq!(abc["ABC-1"].data.status.as_deref(), Some("Done"));
        assert_eq!(storage.load_tickets("OPS").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_envelope_is_rejected() {
        let (collector, _, events) = collector();
        let err = collector.collect(CollectEnvelope::default()).await.unwrap_err();
        assert!(matches!(err, CollectError::EmptyEnvelope));
        assert!(events.kinds().is_empty());
    }
}
