//! Collection notifications.
//!
//! The pipeline reports each collection through an injected [`EventSink`].
//! Sinks must return immediately: publication is best-effort and never
//! applies backpressure to ingestion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::PageType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    CollectionStarted,
    CollectionSkipped,
    CollectionFailed,
    CollectionSuccess,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CollectionStarted => "collection_started",
            Self::CollectionSkipped => "collection_skipped",
            Self::CollectionFailed => "collection_failed",
            Self::CollectionSuccess => "collection_success",
        }
    }
}

/// Add/update counters for one collection, plus store totals afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectStats {
    pub projects_added: usize,
    pub projects_updated: usize,
    pub projects_total: usize,
    pub tickets_added: usize,
    pub tickets_updated: usize,
    pub tickets_total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub transaction_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_type: Option<PageType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<CollectStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl CollectionEvent {
    pub fn new(kind: EventKind, transaction_id: &str) -> Self {
        Self {
            kind,
            transaction_id: transaction_id.to_string(),
            url: None,
            page_type: None,
            stats: None,
            message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn url(mut self, url: Option<&str>) -> Self {
        self.url = url.filter(|u| !u.is_empty()).map(str::to_string);
        self
    }

    pub fn page_type(mut self, page_type: PageType) -> Self {
        self.page_type = Some(page_type);
        self
    }

    pub fn stats(mut self, stats: CollectStats) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Observer for collection outcomes.
pub trait EventSink: Send + Sync {
    /// Deliver an event. Must not block; drop the event rather than wait.
    fn publish(&self, event: CollectionEvent);
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEvents;

impl EventSink for NoEvents {
    fn publish(&self, _event: CollectionEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_wire_shape() {
        let event = CollectionEvent::new(EventKind::CollectionSuccess, "tx-1")
            .url(Some("https://x.atlassian.net/browse/ABC-1"))
            .page_type(PageType::Issue)
            .stats(CollectStats {
                tickets_added: 1,
                tickets_total: 1,
                ..Default::default()
            });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "collection_success");
        assert_eq!(json["transactionId"], "tx-1");
        assert_eq!(json["pageType"], "issue");
        assert_eq!(json["stats"]["ticketsAdded"], 1);
        assert!(json.get("message").is_none());
        assert_eq!(json["type"], event.kind.as_str());
    }

    #[test]
    fn empty_url_is_omitted() {
        let event = CollectionEvent::new(EventKind::CollectionStarted, "tx").url(Some(""));
        assert_eq!(event.url, None);
    }
}
