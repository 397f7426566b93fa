//! Record normalizer.
//!
//! Converts extracted [`Record`]s and API field bags into canonical
//! [`TicketData`] / [`ProjectData`]. Normalization is deterministic: the
//! same input always yields byte-identical output, including
//! [`TicketData::hash`], which downstream code uses as its only cheap
//! equality check.
//!
//! Field names the normalizer does not know are kept in `customFields`.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value as Json};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::extract::key::{ISSUE_KEY_EXACT, PROJECT_KEY};
use crate::models::{
    project_key_of, Attachment, Comment, IssueLink, ProjectData, Subtask, TicketData, WorklogEntry,
};
use crate::record::{Field, Record, RecordKind, Value};

/// Jira's own timestamp shape, e.g. `2024-03-01T10:00:00.000+0000`.
const JIRA_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f%z";

/// Link relation used when the page or payload does not name one.
pub const DEFAULT_LINK_TYPE: &str = "relates to";

/// Errors scoped to a single record. The surrounding batch continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("record has no key")]
    MissingKey,

    #[error("invalid issue key '{0}'")]
    InvalidKey(String),

    #[error("invalid project key '{0}'")]
    InvalidProjectKey(String),

    #[error("expected a {expected} record")]
    KindMismatch { expected: &'static str },

    #[error("API payload is not a JSON object")]
    NotAnObject,
}

fn clean(text: &str) -> Option<String> {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}

fn text(record: &Record, field: Field) -> Option<String> {
    record.text(field).and_then(clean)
}

/// Rewrite RFC 3339 and Jira timestamps as RFC 3339 UTC; keep anything
/// else as trimmed text.
pub fn normalize_date(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let parsed = DateTime::parse_from_rfc3339(trimmed)
        .or_else(|_| DateTime::parse_from_str(trimmed, JIRA_DATE_FORMAT));
    Some(match parsed {
        Ok(dt) => dt
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::AutoSi, true),
        Err(_) => trimmed.to_string(),
    })
}

fn date(record: &Record, field: Field) -> Option<String> {
    record.text(field).and_then(normalize_date)
}

/// Trim, drop empties, and de-duplicate keeping first occurrence order.
pub fn clean_list<'a>(items: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if let Some(c) = clean(item) {
            if !out.contains(&c) {
                out.push(c);
            }
        }
    }
    out
}

fn list(record: &Record, field: Field) -> Vec<String> {
    match record.get(field) {
        Some(Value::List(items)) => clean_list(items.iter().map(String::as_str)),
        Some(Value::Text(s)) => clean_list(s.split(',')),
        _ => Vec::new(),
    }
}

fn entries(record: &Record, field: Field) -> &[BTreeMap<String, Value>] {
    match record.get(field) {
        Some(Value::Entries(items)) => items,
        _ => &[],
    }
}

fn entry_text(entry: &BTreeMap<String, Value>, name: &str) -> Option<String> {
    entry.get(name).and_then(Value::as_text).and_then(clean)
}

fn comments(record: &Record) -> Vec<Comment> {
    entries(record, Field::Comments)
        .iter()
        .filter_map(|e| {
            Some(Comment {
                body: entry_text(e, "body")?,
                author: entry_text(e, "author"),
                created: e
                    .get("created")
                    .and_then(Value::as_text)
                    .and_then(normalize_date),
            })
        })
        .collect()
}

fn subtasks(record: &Record) -> Vec<Subtask> {
    entries(record, Field::Subtasks)
        .iter()
        .filter_map(|e| {
            let key = entry_text(e, "key")?.to_ascii_uppercase();
            ISSUE_KEY_EXACT.is_match(&key).then(|| Subtask {
                key,
                summary: entry_text(e, "summary"),
                status: entry_text(e, "status"),
            })
        })
        .collect()
}

fn attachments(record: &Record) -> Vec<Attachment> {
    entries(record, Field::Attachments)
        .iter()
        .filter_map(|e| {
            Some(Attachment {
                name: entry_text(e, "name")?,
                url: entry_text(e, "url"),
            })
        })
        .collect()
}

fn links(record: &Record) -> Vec<IssueLink> {
    entries(record, Field::Links)
        .iter()
        .filter_map(|e| {
            let key = entry_text(e, "key")?.to_ascii_uppercase();
            ISSUE_KEY_EXACT.is_match(&key).then(|| IssueLink {
                link_type: entry_text(e, "linkType")
                    .map(|t| t.to_lowercase())
                    .unwrap_or_else(|| DEFAULT_LINK_TYPE.to_string()),
                key,
                summary: entry_text(e, "summary"),
            })
        })
        .collect()
}

fn worklog(record: &Record) -> Vec<WorklogEntry> {
    entries(record, Field::Worklog)
        .iter()
        .map(|e| WorklogEntry {
            author: entry_text(e, "author"),
            time_spent: entry_text(e, "timeSpent"),
            started: e
                .get("started")
                .and_then(Value::as_text)
                .and_then(normalize_date),
        })
        .filter(|w| w.author.is_some() || w.time_spent.is_some())
        .collect()
}

/// Hex SHA-256 of the ticket's canonical JSON with `hash` and `rawHtml`
/// cleared. Store bookkeeping never enters the digest.
pub fn ticket_hash(ticket: &TicketData) -> String {
    let mut canonical = ticket.clone();
    canonical.hash = String::new();
    canonical.raw_html = None;
    let mut hasher = Sha256::new();
    // Serializing plain structs and string-keyed maps cannot fail.
    if let Ok(bytes) = serde_json::to_vec(&canonical) {
        hasher.update(&bytes);
    }
    format!("{:x}", hasher.finalize())
}

/// Fields with a typed slot on tickets; everything else is custom.
const TICKET_SLOTS: &[Field] = &[
    Field::Key,
    Field::ProjectId,
    Field::Url,
    Field::Summary,
    Field::Description,
    Field::IssueType,
    Field::Status,
    Field::Priority,
    Field::Created,
    Field::Updated,
    Field::Reporter,
    Field::Assignee,
    Field::Labels,
    Field::Components,
    Field::Comments,
    Field::Subtasks,
    Field::Attachments,
    Field::Links,
    Field::Worklog,
    Field::RawHtml,
];

/// Normalize an issue record.
pub fn normalize_ticket(record: &Record) -> Result<TicketData, NormalizeError> {
    if record.kind != RecordKind::Issue {
        return Err(NormalizeError::KindMismatch { expected: "issue" });
    }
    let key = text(record, Field::Key)
        .ok_or(NormalizeError::MissingKey)?
        .to_ascii_uppercase();
    if !ISSUE_KEY_EXACT.is_match(&key) {
        return Err(NormalizeError::InvalidKey(key));
    }
    // The key prefix is authoritative; a disagreeing source value is kept
    // as a custom field.
    let project_id = project_key_of(&key).to_string();
    let stray_project =
        text(record, Field::ProjectId).filter(|p| !p.eq_ignore_ascii_case(&project_id));

    let mut custom_fields: BTreeMap<String, Json> = record
        .fields()
        .filter(|(f, _)| !TICKET_SLOTS.contains(f))
        .map(|(f, v)| (f.as_str().to_string(), v.to_json()))
        .collect();
    for (name, value) in record.extra() {
        custom_fields.insert(name.clone(), value.to_json());
    }
    if let Some(stray) = stray_project {
        custom_fields.insert(Field::ProjectId.as_str().to_string(), Json::String(stray));
    }

    let mut ticket = TicketData {
        project_id,
        url: text(record, Field::Url),
        summary: text(record, Field::Summary),
        description: record
            .text(Field::Description)
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string),
        issue_type: text(record, Field::IssueType),
        status: text(record, Field::Status),
        priority: text(record, Field::Priority),
        created: date(record, Field::Created),
        updated: date(record, Field::Updated),
        reporter: text(record, Field::Reporter),
        assignee: text(record, Field::Assignee),
        labels: list(record, Field::Labels),
        components: list(record, Field::Components),
        custom_fields,
        comments: comments(record),
        subtasks: subtasks(record),
        attachments: attachments(record),
        links: links(record),
        worklog: worklog(record),
        raw_html: record.text(Field::RawHtml).map(str::to_string),
        key,
        hash: String::new(),
    };
    ticket.hash = ticket_hash(&ticket);
    Ok(ticket)
}

/// Normalize a project record.
pub fn normalize_project(record: &Record) -> Result<ProjectData, NormalizeError> {
    if record.kind != RecordKind::Project {
        return Err(NormalizeError::KindMismatch { expected: "project" });
    }
    let key = text(record, Field::Key)
        .ok_or(NormalizeError::MissingKey)?
        .to_ascii_uppercase();
    if !PROJECT_KEY.is_match(&key) {
        return Err(NormalizeError::InvalidProjectKey(key));
    }
    Ok(ProjectData {
        id: text(record, Field::Id),
        name: text(record, Field::Name),
        project_type: text(record, Field::ProjectType).or_else(|| text(record, Field::IssueType)),
        url: text(record, Field::Url),
        description: text(record, Field::Description),
        updated: date(record, Field::Updated),
        key,
    })
}

// ============ API field bags ============

/// Flatten an Atlassian Document Format node into plain text.
fn adf_text(node: &Json) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut stack = vec![node];
    while let Some(n) = stack.pop() {
        if let Some(t) = n.get("text").and_then(Json::as_str) {
            parts.push(t.to_string());
        }
        if let Some(children) = n.get("content").and_then(Json::as_array) {
            stack.extend(children.iter().rev());
        }
    }
    parts.join(" ")
}

/// Text of a scalar JSON value. Objects collapse through the first
/// present of `prefer`, then `name`, `displayName`, `value`, `key`.
fn json_text(value: &Json, prefer: &[&str]) -> Option<String> {
    match value {
        Json::String(s) => clean(s),
        Json::Number(n) => Some(n.to_string()),
        Json::Bool(b) => Some(b.to_string()),
        Json::Object(map) => {
            if map.get("type").and_then(Json::as_str) == Some("doc") {
                return clean(&adf_text(value));
            }
            prefer
                .iter()
                .chain(["name", "displayName", "value", "key"].iter())
                .find_map(|k| map.get(*k).and_then(|v| json_text(v, &[])))
        }
        Json::Array(_) | Json::Null => None,
    }
}

fn json_list(value: &Json) -> Vec<String> {
    match value {
        Json::Array(items) => items.iter().filter_map(|v| json_text(v, &[])).collect(),
        other => json_text(other, &[]).into_iter().collect(),
    }
}

/// Items of a collection that may arrive bare or wrapped
/// (`{"comments": [...]}`, `{"worklogs": [...]}`).
fn json_items<'a>(value: &'a Json, wrapper: &str) -> &'a [Json] {
    value
        .as_array()
        .or_else(|| value.get(wrapper).and_then(Json::as_array))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn json_entry(pairs: Vec<(&str, Option<String>)>) -> BTreeMap<String, Value> {
    pairs
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k.to_string(), Value::Text(v))))
        .collect()
}

fn field_of<'a>(item: &'a Json, name: &str) -> Option<&'a Json> {
    item.get(name)
        .or_else(|| item.get("fields").and_then(|f| f.get(name)))
}

fn text_of_field(item: &Json, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|n| field_of(item, n).and_then(|v| json_text(v, &[])))
}

fn json_comments(value: &Json) -> Value {
    Value::Entries(
        json_items(value, "comments")
            .iter()
            .map(|c| {
                json_entry(vec![
                    ("author", text_of_field(c, &["author"])),
                    ("body", text_of_field(c, &["body"])),
                    ("created", text_of_field(c, &["created"])),
                ])
            })
            .collect(),
    )
}

fn json_subtasks(value: &Json) -> Value {
    Value::Entries(
        json_items(value, "subtasks")
            .iter()
            .map(|s| {
                json_entry(vec![
                    ("key", text_of_field(s, &["key"])),
                    ("summary", text_of_field(s, &["summary"])),
                    ("status", text_of_field(s, &["status"])),
                ])
            })
            .collect(),
    )
}

fn json_attachments(value: &Json) -> Value {
    Value::Entries(
        json_items(value, "attachments")
            .iter()
            .map(|a| {
                json_entry(vec![
                    ("name", text_of_field(a, &["filename", "name"])),
                    ("url", text_of_field(a, &["content", "url"])),
                ])
            })
            .collect(),
    )
}

/// REST `issuelinks` carry the relation on `type.outward`/`type.inward`
/// depending on which side the other issue sits.
fn json_links(value: &Json) -> Value {
    Value::Entries(
        json_items(value, "issuelinks")
            .iter()
            .map(|l| {
                let (other, side) = match (l.get("outwardIssue"), l.get("inwardIssue")) {
                    (Some(o), _) => (o, "outward"),
                    (None, Some(i)) => (i, "inward"),
                    (None, None) => (l, ""),
                };
                let link_type = l
                    .get("type")
                    .and_then(|t| match t {
                        Json::Object(_) if !side.is_empty() => t.get(side).and_then(|v| json_text(v, &[])),
                        other => json_text(other, &[]),
                    })
                    .or_else(|| text_of_field(l, &["linkType"]));
                json_entry(vec![
                    ("linkType", link_type),
                    ("key", text_of_field(other, &["key"])),
                    ("summary", text_of_field(other, &["summary"])),
                ])
            })
            .collect(),
    )
}

fn json_worklog(value: &Json) -> Value {
    Value::Entries(
        json_items(value, "worklogs")
            .iter()
            .map(|w| {
                json_entry(vec![
                    ("author", text_of_field(w, &["author"])),
                    ("timeSpent", text_of_field(w, &["timeSpent"])),
                    ("started", text_of_field(w, &["started"])),
                ])
            })
            .collect(),
    )
}

fn json_field_value(field: Field, value: &Json) -> Value {
    match field {
        Field::Labels | Field::Components => Value::List(json_list(value)),
        Field::Comments => json_comments(value),
        Field::Subtasks => json_subtasks(value),
        Field::Attachments => json_attachments(value),
        Field::Links => json_links(value),
        Field::Worklog => json_worklog(value),
        Field::ProjectId => json_text(value, &["key"])
            .map(Value::Text)
            .unwrap_or_else(|| Value::Json(value.clone())),
        _ => json_text(value, &[])
            .map(Value::Text)
            .unwrap_or_else(|| Value::Json(value.clone())),
    }
}

/// Build a record from an API field bag. Both flat bags
/// (`{"key", "summary", "status": "Done"}`) and REST issues
/// (`{"key", "fields": {"status": {"name": ...}}}`) are accepted.
pub fn record_from_field_bag(bag: &Map<String, Json>, kind: RecordKind) -> Record {
    let mut record = Record::new(kind);
    let nested = bag.get("fields").and_then(Json::as_object);
    let pairs = nested
        .into_iter()
        .flat_map(|f| f.iter())
        .chain(bag.iter().filter(|(k, _)| !matches!(k.as_str(), "fields" | "expand")));

    // Top-level entries come last so they win over nested ones.
    for (name, value) in pairs {
        match Field::from_name(name) {
            Some(field) => record.set(field, json_field_value(field, value)),
            None => record.set_named(name, Value::Json(value.clone())),
        }
    }
    record
}

/// Normalize one API-sourced issue.
pub fn normalize_api_ticket(bag: &Json) -> Result<TicketData, NormalizeError> {
    let map = bag.as_object().ok_or(NormalizeError::NotAnObject)?;
    normalize_ticket(&record_from_field_bag(map, RecordKind::Issue))
}

/// Normalize one API-sourced project.
pub fn normalize_api_project(bag: &Json) -> Result<ProjectData, NormalizeError> {
    let map = bag.as_object().ok_or(NormalizeError::NotAnObject)?;
    normalize_project(&record_from_field_bag(map, RecordKind::Project))
}
