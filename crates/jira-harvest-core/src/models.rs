//! Core data models used throughout Jira Harvest.
//!
//! These types represent the page verdicts, tickets, projects, and versioned
//! store records that flow through the collection pipeline.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Semantic type of a captured Jira page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PageType {
    ProjectsList,
    Issue,
    IssueList,
    Board,
    Search,
    Generic,
    Unknown,
}

impl PageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProjectsList => "projectsList",
            Self::Issue => "issue",
            Self::IssueList => "issueList",
            Self::Board => "board",
            Self::Search => "search",
            Self::Generic => "generic",
            Self::Unknown => "unknown",
        }
    }

    /// Page types the extraction engine knows how to harvest.
    pub fn is_harvestable(&self) -> bool {
        matches!(
            self,
            Self::ProjectsList | Self::Issue | Self::IssueList | Self::Board | Self::Search
        )
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "projectsList" | "projects" | "projects_list" => Ok(Self::ProjectsList),
            "issue" => Ok(Self::Issue),
            "issueList" | "issues" | "issue_list" => Ok(Self::IssueList),
            "board" => Ok(Self::Board),
            "search" => Ok(Self::Search),
            "generic" => Ok(Self::Generic),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown page type: '{}'", other)),
        }
    }
}

/// How strongly the collected indicators support a page type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    None,
    Low,
    Medium,
    High,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Classifier verdict for one captured page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageAssessment {
    pub page_type: PageType,
    pub confidence: Confidence,
    pub collectable: bool,
    /// Diagnostic tags explaining the verdict.
    pub indicators: BTreeSet<String>,
}

impl PageAssessment {
    pub fn unknown() -> Self {
        Self {
            page_type: PageType::Unknown,
            confidence: Confidence::None,
            collectable: false,
            indicators: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subtask {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueLink {
    /// e.g. "blocks", "is blocked by", "relates to".
    pub link_type: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorklogEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_spent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<String>,
}

/// Canonical ticket entity.
///
/// `key` is the business identifier (`PROJ-123`) and is unique within the
/// store. `hash` is derived from every other normalized field except
/// `raw_html` (see [`crate::normalize::ticket_hash`]).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketData {
    pub key: String,
    #[serde(default, rename = "projectID", alias = "projectId")]
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reporter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(default)]
    pub custom_fields: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<Comment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subtasks: Vec<Subtask>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<IssueLink>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub worklog: Vec<WorklogEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_html: Option<String>,
    #[serde(default)]
    pub hash: String,
}

impl TicketData {
    /// Project key: everything before the first hyphen of the ticket key.
    pub fn project_key(&self) -> &str {
        project_key_of(&self.key)
    }
}

/// Returns the substring of an issue key before its first hyphen.
pub fn project_key_of(issue_key: &str) -> &str {
    issue_key
        .split_once('-')
        .map(|(project, _)| project)
        .unwrap_or(issue_key)
}

/// Canonical project entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub project_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
}

/// Store record wrapping an entity with merge bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Versioned<T> {
    #[serde(flatten)]
    pub data: T,
    pub collected_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
    #[serde(default)]
    pub sent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

pub type StoredTicket = Versioned<TicketData>;
pub type StoredProject = Versioned<ProjectData>;
