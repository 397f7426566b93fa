//! Transient extraction records.
//!
//! A [`Record`] is the bag of fields recovered for one issue or project
//! before normalization. Known field names are a closed [`Field`] enum;
//! anything else goes into an `extra` bag that the normalizer passes through
//! as custom fields.

use std::collections::BTreeMap;

/// Loosely typed field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Text(String),
    List(Vec<String>),
    Map(BTreeMap<String, Value>),
    /// Ordered nested items (comments, subtasks, links, ...).
    Entries(Vec<BTreeMap<String, Value>>),
    /// Untouched JSON from an API payload.
    Json(serde_json::Value),
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Convert to JSON for the custom-field passthrough bag.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(|s| serde_json::Value::String(s.clone()))
                    .collect(),
            ),
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Entries(entries) => serde_json::Value::Array(
                entries
                    .iter()
                    .map(|entry| {
                        serde_json::Value::Object(
                            entry.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
                        )
                    })
                    .collect(),
            ),
            Value::Json(json) => json.clone(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<String>> for Value {
    fn from(items: Vec<String>) -> Self {
        Value::List(items)
    }
}

/// Field names the normalizer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Key,
    Id,
    ProjectId,
    Url,
    Name,
    Summary,
    Description,
    IssueType,
    ProjectType,
    Status,
    Priority,
    Created,
    Updated,
    Reporter,
    Assignee,
    Labels,
    Components,
    Comments,
    Subtasks,
    Attachments,
    Links,
    Worklog,
    RawHtml,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Key => "key",
            Field::Id => "id",
            Field::ProjectId => "projectID",
            Field::Url => "url",
            Field::Name => "name",
            Field::Summary => "summary",
            Field::Description => "description",
            Field::IssueType => "issueType",
            Field::ProjectType => "projectType",
            Field::Status => "status",
            Field::Priority => "priority",
            Field::Created => "created",
            Field::Updated => "updated",
            Field::Reporter => "reporter",
            Field::Assignee => "assignee",
            Field::Labels => "labels",
            Field::Components => "components",
            Field::Comments => "comments",
            Field::Subtasks => "subtasks",
            Field::Attachments => "attachments",
            Field::Links => "links",
            Field::Worklog => "worklog",
            Field::RawHtml => "rawHtml",
        }
    }

    /// Resolve a field name, accepting the spellings seen in extension
    /// payloads and the REST API.
    pub fn from_name(name: &str) -> Option<Field> {
        let lowered: String = name
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        let field = match lowered.as_str() {
            "key" | "issuekey" => Field::Key,
            "id" => Field::Id,
            "projectid" | "project" | "projectkey" => Field::ProjectId,
            "url" | "link" | "href" | "browseurl" => Field::Url,
            "name" | "title" => Field::Name,
            "summary" => Field::Summary,
            "description" => Field::Description,
            "issuetype" | "type" => Field::IssueType,
            "projecttype" | "projecttypekey" => Field::ProjectType,
            "status" => Field::Status,
            "priority" => Field::Priority,
            "created" | "createdat" => Field::Created,
            "updated" | "updatedat" => Field::Updated,
            "reporter" => Field::Reporter,
            "assignee" => Field::Assignee,
            "labels" => Field::Labels,
            "components" => Field::Components,
            "comments" | "comment" => Field::Comments,
            "subtasks" => Field::Subtasks,
            "attachments" | "attachment" => Field::Attachments,
            "links" | "issuelinks" => Field::Links,
            "worklog" | "worklogs" => Field::Worklog,
            "rawhtml" | "html" => Field::RawHtml,
            _ => return None,
        };
        Some(field)
    }
}

/// What a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Issue,
    Project,
}

/// Extracted fields for one issue or project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub kind: RecordKind,
    fields: BTreeMap<Field, Value>,
    extra: BTreeMap<String, Value>,
}

impl Record {
    pub fn new(kind: RecordKind) -> Self {
        Self {
            kind,
            fields: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }

    pub fn issue() -> Self {
        Self::new(RecordKind::Issue)
    }

    pub fn project() -> Self {
        Self::new(RecordKind::Project)
    }

    /// Set a known field. Empty text and empty lists are ignored so an
    /// absent field stays absent.
    pub fn set(&mut self, field: Field, value: impl Into<Value>) {
        let value = value.into();
        if is_blank(&value) {
            return;
        }
        self.fields.insert(field, value);
    }

    /// Set a field only if it has no value yet.
    pub fn set_if_absent(&mut self, field: Field, value: impl Into<Value>) {
        if !self.fields.contains_key(&field) {
            self.set(field, value);
        }
    }

    pub fn set_opt(&mut self, field: Field, value: Option<String>) {
        if let Some(v) = value {
            self.set(field, v);
        }
    }

    /// Set a field by name: known names land in typed slots, everything
    /// else in the passthrough bag.
    pub fn set_named(&mut self, name: &str, value: impl Into<Value>) {
        match Field::from_name(name) {
            Some(field) => self.set(field, value),
            None => {
                let value = value.into();
                if !is_blank(&value) {
                    self.extra.insert(name.to_string(), value);
                }
            }
        }
    }

    pub fn get(&self, field: Field) -> Option<&Value> {
        self.fields.get(&field)
    }

    pub fn text(&self, field: Field) -> Option<&str> {
        self.fields.get(&field).and_then(Value::as_text)
    }

    pub fn has(&self, field: Field) -> bool {
        self.fields.contains_key(&field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (Field, &Value)> {
        self.fields.iter().map(|(f, v)| (*f, v))
    }

    pub fn extra(&self) -> &BTreeMap<String, Value> {
        &self.extra
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.extra.is_empty()
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Text(s) => s.trim().is_empty(),
        Value::List(items) => items.is_empty(),
        Value::Map(map) => map.is_empty(),
        Value::Entries(entries) => entries.is_empty(),
        Value::Json(json) => match json {
            serde_json::Value::Null => true,
            serde_json::Value::String(s) => s.trim().is_empty(),
            serde_json::Value::Array(items) => items.is_empty(),
            serde_json::Value::Object(map) => map.is_empty(),
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_aliases_resolve() {
        assert_eq!(Field::from_name("projectID"), Some(Field::ProjectId));
        assert_eq!(Field::from_name("project_id"), Some(Field::ProjectId));
        assert_eq!(Field::from_name("issuetype"), Some(Field::IssueType));
        assert_eq!(Field::from_name("issue-type"), Some(Field::IssueType));
        assert_eq!(Field::from_name("customfield_10010"), None);
    }

    #[test]
    fn unknown_names_go_to_extra() {
        let mut r = Record::issue();
        r.set_named("status", "Done");
        r.set_named("storyPoints", "5");
        assert_eq!(r.text(Field::Status), Some("Done"));
        assert_eq!(r.extra().get("storyPoints"), Some(&Value::from("5")));
    }

    #[test]
    fn blank_values_are_ignored() {
        let mut r = Record::issue();
        r.set(Field::Summary, "   ");
        r.set(Field::Labels, Vec::<String>::new());
        assert!(r.is_empty());
    }

    #[test]
    fn set_if_absent_keeps_first() {
        let mut r = Record::issue();
        r.set_if_absent(Field::Status, "Open");
        r.set_if_absent(Field::Status, "Done");
        assert_eq!(r.text(Field::Status), Some("Open"));
    }
}
