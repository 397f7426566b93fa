//! Scalar and collection field cascades.
//!
//! Every scalar field has its own ordered marker allow-list (ids used by
//! server-rendered pages, `data-testid` fragments used by the cloud SPA,
//! legacy class names) and, where it makes sense, a free-text keyword scan.
//! Text is trimmed, collapsed and length-bounded; anything implausibly long
//! is treated as "not found".

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use scraper::ElementRef;

use super::key::{browse_key, ISSUE_KEY, ISSUE_KEY_EXACT};
use super::{first_match, Probe, Strategy};
use crate::dom::{self, Marker, Visit};
use crate::record::Value;

pub const SUMMARY_MAX: usize = 500;
pub const STATUS_MAX: usize = 40;
pub const PRIORITY_MAX: usize = 20;
pub const ISSUE_TYPE_MAX: usize = 30;
pub const PERSON_MAX: usize = 80;
pub const DESCRIPTION_MAX: usize = 20_000;
const DATE_MAX: usize = 60;
const COLLECTION_ITEM_MAX: usize = 120;

pub const SUMMARY_MARKERS: &[Marker] = &[
    Marker::Id("summary-val"),
    Marker::TestId("summary.heading"),
    Marker::FieldId("summary"),
    Marker::TestId("summary"),
    Marker::Class("summary"),
];

pub const STATUS_MARKERS: &[Marker] = &[
    Marker::Id("status-val"),
    Marker::TestId("status-field"),
    Marker::FieldId("status"),
    Marker::TestId("status"),
    Marker::Class("status"),
];

const LOZENGE_MARKERS: &[Marker] = &[Marker::Class("lozenge"), Marker::TestId("lozenge")];

pub const PRIORITY_MARKERS: &[Marker] = &[
    Marker::Id("priority-val"),
    Marker::FieldId("priority"),
    Marker::TestId("priority"),
    Marker::Class("priority"),
];

pub const ISSUE_TYPE_MARKERS: &[Marker] = &[
    Marker::Id("type-val"),
    Marker::FieldId("issuetype"),
    Marker::TestId("issue-type"),
    Marker::TestId("issuetype"),
    Marker::Class("issuetype"),
    Marker::Class("issue-type"),
];

pub const ASSIGNEE_MARKERS: &[Marker] = &[
    Marker::Id("assignee-val"),
    Marker::FieldId("assignee"),
    Marker::TestId("assignee"),
    Marker::Class("assignee"),
];

pub const REPORTER_MARKERS: &[Marker] = &[
    Marker::Id("reporter-val"),
    Marker::FieldId("reporter"),
    Marker::TestId("reporter"),
    Marker::Class("reporter"),
];

pub const DESCRIPTION_MARKERS: &[Marker] = &[
    Marker::Id("description-val"),
    Marker::FieldId("description"),
    Marker::TestId("description"),
    Marker::Class("user-content-block"),
];

pub const CREATED_MARKERS: &[Marker] = &[
    Marker::Id("created-val"),
    Marker::FieldId("created"),
    Marker::TestId("created"),
];

pub const UPDATED_MARKERS: &[Marker] = &[
    Marker::Id("updated-val"),
    Marker::FieldId("updated"),
    Marker::TestId("updated"),
];

/// Workflow states seen across default Jira workflows.
pub const STATUS_KEYWORDS: &[&str] = &[
    "To Do",
    "In Progress",
    "In Review",
    "Code Review",
    "Done",
    "Open",
    "Closed",
    "Resolved",
    "Reopened",
    "Backlog",
    "Selected for Development",
    "Blocked",
    "In Testing",
    "Ready for QA",
];

pub const PRIORITY_KEYWORDS: &[&str] = &[
    "Highest", "High", "Medium", "Low", "Lowest", "Blocker", "Critical", "Major", "Minor",
    "Trivial",
];

pub const ISSUE_TYPE_KEYWORDS: &[&str] = &[
    "Bug",
    "Story",
    "Task",
    "Epic",
    "Sub-task",
    "Subtask",
    "Improvement",
    "New Feature",
    "Spike",
];

static LABEL_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(assignee|reporter|priority|issue type|type|status)\s*:\s*")
        .expect("valid regex")
});

/// Strip a "Priority: " style prefix from an attribute label.
pub fn strip_label(text: &str) -> String {
    LABEL_PREFIX.replace(text.trim(), "").trim().to_string()
}

/// Text of the first marked element, or its image/aria label when the
/// element carries only an icon.
pub fn marked_text(probe: &Probe<'_>, markers: &[Marker], max_chars: usize) -> Option<String> {
    let el = dom::find_marked(probe.el, markers, probe.ctx.options.row_walk_depth)?;
    element_value(el, max_chars)
}

/// Visible text of `el`, else the first icon label inside it.
pub fn element_value(el: ElementRef<'_>, max_chars: usize) -> Option<String> {
    let text = dom::text_of(el);
    if !text.is_empty() {
        return dom::bounded(&strip_label(&text), max_chars);
    }
    icon_labels(el, 3)
        .into_iter()
        .find_map(|label| dom::bounded(&label, max_chars))
}

/// `alt`, `title`, and `aria-label` values on `el` and its descendants.
pub fn icon_labels(el: ElementRef<'_>, max_depth: usize) -> Vec<String> {
    let mut out = Vec::new();
    dom::walk(el, max_depth, |node, _| {
        for name in ["alt", "title", "aria-label"] {
            if let Some(v) = dom::attr(node, name) {
                let cleaned = strip_label(v);
                if !cleaned.is_empty() {
                    out.push(cleaned);
                }
            }
        }
        Visit::Descend
    });
    out
}

/// First leaf text equal (ignoring case) to one of `keywords`.
pub fn keyword_text(probe: &Probe<'_>, keywords: &[&str]) -> Option<String> {
    dom::leaf_texts(probe.el, probe.ctx.options.row_walk_depth)
        .into_iter()
        .find(|t| keywords.iter().any(|k| k.eq_ignore_ascii_case(t)))
}

/// First icon label equal (ignoring case) to one of `keywords`.
pub fn keyword_icon(probe: &Probe<'_>, keywords: &[&str]) -> Option<String> {
    icon_labels(probe.el, probe.ctx.options.row_walk_depth)
        .into_iter()
        .find(|t| keywords.iter().any(|k| k.eq_ignore_ascii_case(t)))
}

pub(crate) fn summary_from_marker(p: &Probe<'_>) -> Option<String> {
    marked_text(p, SUMMARY_MARKERS, SUMMARY_MAX).filter(|s| !ISSUE_KEY_EXACT.is_match(s))
}

/// Anchor text of a `/browse/` link that is not just the key itself.
pub(crate) fn summary_from_browse_link(p: &Probe<'_>) -> Option<String> {
    dom::anchors(p.el, p.ctx.options.link_depth)
        .into_iter()
        .filter(|a| browse_key(*a).is_some())
        .map(dom::text_of)
        .find(|t| !t.is_empty() && !ISSUE_KEY_EXACT.is_match(t) && t.chars().count() <= SUMMARY_MAX)
}

pub(crate) fn summary_from_heading(p: &Probe<'_>) -> Option<String> {
    let h1 = dom::descendants(p.el, p.ctx.options.row_walk_depth)
        .into_iter()
        .find(|e| dom::tag(*e) == "h1")?;
    dom::bounded(&dom::text_of(h1), SUMMARY_MAX)
}

pub const SUMMARY_STRATEGIES: &[Strategy<String>] = &[
    Strategy {
        name: "summary-marker",
        run: summary_from_marker,
    },
    Strategy {
        name: "summary-browse-link",
        run: summary_from_browse_link,
    },
    Strategy {
        name: "summary-heading",
        run: summary_from_heading,
    },
];

fn status_from_marker(p: &Probe<'_>) -> Option<String> {
    marked_text(p, STATUS_MARKERS, STATUS_MAX)
}

fn status_from_lozenge(p: &Probe<'_>) -> Option<String> {
    marked_text(p, LOZENGE_MARKERS, STATUS_MAX)
}

fn status_from_keywords(p: &Probe<'_>) -> Option<String> {
    keyword_text(p, STATUS_KEYWORDS)
}

pub const STATUS_STRATEGIES: &[Strategy<String>] = &[
    Strategy {
        name: "status-marker",
        run: status_from_marker,
    },
    Strategy {
        name: "status-lozenge",
        run: status_from_lozenge,
    },
    Strategy {
        name: "status-keyword",
        run: status_from_keywords,
    },
];

fn priority_from_marker(p: &Probe<'_>) -> Option<String> {
    marked_text(p, PRIORITY_MARKERS, PRIORITY_MAX)
}

fn priority_from_icon(p: &Probe<'_>) -> Option<String> {
    keyword_icon(p, PRIORITY_KEYWORDS)
}

fn priority_from_keywords(p: &Probe<'_>) -> Option<String> {
    keyword_text(p, PRIORITY_KEYWORDS)
}

pub const PRIORITY_STRATEGIES: &[Strategy<String>] = &[
    Strategy {
        name: "priority-marker",
        run: priority_from_marker,
    },
    Strategy {
        name: "priority-icon",
        run: priority_from_icon,
    },
    Strategy {
        name: "priority-keyword",
        run: priority_from_keywords,
    },
];

fn issue_type_from_marker(p: &Probe<'_>) -> Option<String> {
    marked_text(p, ISSUE_TYPE_MARKERS, ISSUE_TYPE_MAX)
}

fn issue_type_from_icon(p: &Probe<'_>) -> Option<String> {
    keyword_icon(p, ISSUE_TYPE_KEYWORDS)
}

fn issue_type_from_keywords(p: &Probe<'_>) -> Option<String> {
    keyword_text(p, ISSUE_TYPE_KEYWORDS)
}

pub const ISSUE_TYPE_STRATEGIES: &[Strategy<String>] = &[
    Strategy {
        name: "issue-type-marker",
        run: issue_type_from_marker,
    },
    Strategy {
        name: "issue-type-icon",
        run: issue_type_from_icon,
    },
    Strategy {
        name: "issue-type-keyword",
        run: issue_type_from_keywords,
    },
];

static ASSIGNEE_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^assignee\s*:\s*(.+)$").expect("valid regex"));

fn assignee_from_marker(p: &Probe<'_>) -> Option<String> {
    marked_text(p, ASSIGNEE_MARKERS, PERSON_MAX).filter(|s| !s.eq_ignore_ascii_case("assignee"))
}

/// Avatar labelled "Assignee: Jane Doe".
fn assignee_from_avatar(p: &Probe<'_>) -> Option<String> {
    let mut found = None;
    dom::walk(p.el, p.ctx.options.row_walk_depth, |el, _| {
        for name in ["alt", "title", "aria-label"] {
            if let Some(caps) = dom::attr(el, name).and_then(|v| ASSIGNEE_LABEL.captures(v.trim())) {
                found = dom::bounded(&caps[1], PERSON_MAX);
                if found.is_some() {
                    return Visit::Stop;
                }
            }
        }
        Visit::Descend
    });
    found
}

pub const ASSIGNEE_STRATEGIES: &[Strategy<String>] = &[
    Strategy {
        name: "assignee-marker",
        run: assignee_from_marker,
    },
    Strategy {
        name: "assignee-avatar",
        run: assignee_from_avatar,
    },
];

fn reporter_from_marker(p: &Probe<'_>) -> Option<String> {
    marked_text(p, REPORTER_MARKERS, PERSON_MAX).filter(|s| !s.eq_ignore_ascii_case("reporter"))
}

pub const REPORTER_STRATEGIES: &[Strategy<String>] = &[Strategy {
    name: "reporter-marker",
    run: reporter_from_marker,
}];

fn description_from_marker(p: &Probe<'_>) -> Option<String> {
    let el = dom::find_marked(p.el, DESCRIPTION_MARKERS, p.ctx.options.row_walk_depth)?;
    dom::bounded(&dom::text_of(el), DESCRIPTION_MAX)
}

pub const DESCRIPTION_STRATEGIES: &[Strategy<String>] = &[Strategy {
    name: "description-marker",
    run: description_from_marker,
}];

/// Timestamp inside a marked element: `<time datetime>`, then a `title`
/// attribute (legacy date tooltips), then the text.
pub fn marked_date(probe: &Probe<'_>, markers: &[Marker]) -> Option<String> {
    let el = dom::find_marked(probe.el, markers, probe.ctx.options.row_walk_depth)?;
    date_value(el)
}

/// Best timestamp representation found at or under `el`.
pub fn date_value(el: ElementRef<'_>) -> Option<String> {
    let mut stamp = None;
    dom::walk(el, 4, |node, _| {
        if let Some(dt) = dom::attr(node, "datetime") {
            stamp = dom::bounded(dt, DATE_MAX);
            if stamp.is_some() {
                return Visit::Stop;
            }
        }
        Visit::Descend
    });
    stamp
        .or_else(|| dom::attr(el, "title").and_then(|t| dom::bounded(t, DATE_MAX)))
        .or_else(|| dom::bounded(&dom::text_of(el), DATE_MAX))
}

fn created_from_marker(p: &Probe<'_>) -> Option<String> {
    marked_date(p, CREATED_MARKERS)
}

fn updated_from_marker(p: &Probe<'_>) -> Option<String> {
    marked_date(p, UPDATED_MARKERS)
}

pub const CREATED_STRATEGIES: &[Strategy<String>] = &[Strategy {
    name: "created-marker",
    run: created_from_marker,
}];

pub const UPDATED_STRATEGIES: &[Strategy<String>] = &[Strategy {
    name: "updated-marker",
    run: updated_from_marker,
}];

/// Convenience wrapper so callers read as `field(STATUS_STRATEGIES, &probe)`.
pub fn field(strategies: &[Strategy<String>], probe: &Probe<'_>) -> Option<String> {
    first_match(strategies, probe)
}

// ============ Collections ============

pub const LABEL_CONTAINERS: &[Marker] = &[
    Marker::Id("wrap-labels"),
    Marker::Id("labels-val"),
    Marker::FieldId("labels"),
    Marker::TestId("labels"),
    Marker::Class("labels-wrap"),
];

pub const COMPONENT_CONTAINERS: &[Marker] = &[
    Marker::Id("components-val"),
    Marker::Id("components-field"),
    Marker::FieldId("components"),
    Marker::TestId("components"),
];

pub const COMMENT_CONTAINERS: &[Marker] = &[
    Marker::Id("issue_actions_container"),
    Marker::TestId("comments-list"),
    Marker::TestId("activity.comments"),
    Marker::Class("comments-container"),
];

const COMMENT_ITEMS: &[Marker] = &[
    Marker::Class("activity-comment"),
    Marker::TestId("comment-base-item"),
    Marker::TestId("ak-comment"),
    Marker::Class("comment"),
];

const COMMENT_BODY: &[Marker] = &[
    Marker::Class("action-body"),
    Marker::TestId("comment-base-item-body"),
    Marker::TestId("body"),
    Marker::Class("comment-body"),
];

const AUTHOR_MARKERS: &[Marker] = &[
    Marker::Class("user-hover"),
    Marker::TestId("author"),
    Marker::Class("author"),
];

const DATE_MARKERS: &[Marker] = &[
    Marker::Class("livestamp"),
    Marker::TestId("date"),
    Marker::Class("date"),
];

pub const SUBTASK_CONTAINERS: &[Marker] = &[
    Marker::Id("view-subtasks"),
    Marker::Id("subtasks"),
    Marker::TestId("child-issues"),
    Marker::TestId("subtasks"),
];

pub const ATTACHMENT_CONTAINERS: &[Marker] = &[
    Marker::Id("attachmentmodule"),
    Marker::TestId("attachment"),
    Marker::Class("attachments"),
];

pub const LINK_CONTAINERS: &[Marker] = &[
    Marker::Id("linkingmodule"),
    Marker::TestId("issue-links"),
    Marker::TestId("relationships"),
    Marker::Class("links-container"),
];

pub const WORKLOG_CONTAINERS: &[Marker] = &[
    Marker::Id("worklog-tabpanel"),
    Marker::TestId("worklog"),
    Marker::Class("worklog-container"),
];

const WORKLOG_ITEMS: &[Marker] = &[
    Marker::Class("worklog-entry"),
    Marker::TestId("worklog-item"),
    Marker::Class("issue-data-block"),
];

const WORKLOG_DURATION: &[Marker] = &[
    Marker::Class("worklog-duration"),
    Marker::TestId("time-spent"),
    Marker::Class("time-spent"),
];

/// Link relations, most specific first so "is blocked by" wins over "blocks".
pub const LINK_TYPES: &[&str] = &[
    "is blocked by",
    "blocks",
    "is cloned by",
    "clones",
    "is duplicated by",
    "duplicates",
    "is caused by",
    "causes",
    "is child of",
    "is parent of",
    "relates to",
];

const COLLECTION_HEADERS: &[&str] = &["labels", "labels:", "components", "components:", "none"];

/// Elements under `container` matching `markers`, without descending into
/// a matched item.
pub fn collection_items<'a>(
    container: ElementRef<'a>,
    markers: &[Marker],
    max_depth: usize,
) -> Vec<ElementRef<'a>> {
    let mut items = Vec::new();
    dom::walk(container, max_depth, |el, depth| {
        if depth > 0 && markers.iter().any(|m| m.matches(el)) {
            items.push(el);
            return Visit::Skip;
        }
        Visit::Descend
    });
    items
}

/// Short texts inside a tag-like container (labels, components), in order,
/// without duplicates or header words.
pub fn tag_texts(container: ElementRef<'_>) -> Vec<String> {
    let anchors: Vec<String> = dom::anchors(container, 6)
        .into_iter()
        .filter_map(|a| dom::bounded(&dom::text_of(a), COLLECTION_ITEM_MAX))
        .collect();
    let source = if anchors.is_empty() {
        dom::leaf_texts(container, 6)
    } else {
        anchors
    };

    let mut out: Vec<String> = Vec::new();
    for text in source {
        let Some(text) = dom::bounded(&text, COLLECTION_ITEM_MAX) else {
            continue;
        };
        let lowered = text.to_ascii_lowercase();
        if COLLECTION_HEADERS.contains(&lowered.as_str()) || out.contains(&text) {
            continue;
        }
        out.push(text);
    }
    out
}

fn container<'a>(probe: &Probe<'a>, markers: &[Marker]) -> Option<ElementRef<'a>> {
    dom::find_marked(probe.el, markers, probe.ctx.options.row_walk_depth)
}

pub fn labels(probe: &Probe<'_>) -> Vec<String> {
    container(probe, LABEL_CONTAINERS)
        .map(tag_texts)
        .unwrap_or_default()
}

pub fn components(probe: &Probe<'_>) -> Vec<String> {
    container(probe, COMPONENT_CONTAINERS)
        .map(tag_texts)
        .unwrap_or_default()
}

fn entry(pairs: &[(&str, Option<String>)]) -> BTreeMap<String, Value> {
    pairs
        .iter()
        .filter_map(|(k, v)| v.as_ref().map(|v| (k.to_string(), Value::Text(v.clone()))))
        .collect()
}

fn marked_in(el: ElementRef<'_>, markers: &[Marker], max_chars: usize) -> Option<String> {
    dom::find_marked(el, markers, 8).and_then(|m| element_value(m, max_chars))
}

pub fn comments(probe: &Probe<'_>) -> Vec<BTreeMap<String, Value>> {
    let Some(list) = container(probe, COMMENT_CONTAINERS) else {
        return Vec::new();
    };
    collection_items(list, COMMENT_ITEMS, 6)
        .into_iter()
        .filter_map(|item| {
            let body = dom::find_marked(item, COMMENT_BODY, 8)
                .and_then(|b| dom::bounded(&dom::text_of(b), DESCRIPTION_MAX))?;
            let created = dom::find_marked(item, DATE_MARKERS, 8)
                .and_then(date_value)
                .or_else(|| date_value_in_time(item));
            Some(entry(&[
                ("author", marked_in(item, AUTHOR_MARKERS, PERSON_MAX)),
                ("body", Some(body)),
                ("created", created),
            ]))
        })
        .collect()
}

fn date_value_in_time(el: ElementRef<'_>) -> Option<String> {
    dom::descendants(el, 8)
        .into_iter()
        .find(|e| dom::tag(*e) == "time")
        .and_then(date_value)
}

pub fn attachments(probe: &Probe<'_>) -> Vec<BTreeMap<String, Value>> {
    let Some(module) = container(probe, ATTACHMENT_CONTAINERS) else {
        return Vec::new();
    };
    let mut seen: Vec<String> = Vec::new();
    let mut out = Vec::new();
    for a in dom::anchors(module, 10) {
        let href = dom::attr(a, "href").unwrap_or_default();
        let is_file = href.contains("/attachment/")
            || href.contains("/attachments/")
            || dom::attr(a, "download").is_some();
        if !is_file {
            continue;
        }
        let name = dom::bounded(&dom::text_of(a), 255)
            .or_else(|| dom::attr(a, "title").and_then(|t| dom::bounded(t, 255)))
            .or_else(|| {
                href.rsplit('/')
                    .next()
                    .and_then(|n| dom::bounded(n.split('?').next().unwrap_or_default(), 255))
            });
        let Some(name) = name else { continue };
        if seen.contains(&name) {
            continue;
        }
        seen.push(name.clone());
        out.push(entry(&[
            ("name", Some(name)),
            ("url", probe.ctx.absolute_url(href)),
        ]));
    }
    out
}

/// Issue links grouped under relation headings. The walk runs in document
/// order; each heading sets the relation for the links that follow it.
pub fn issue_links(probe: &Probe<'_>, own_key: Option<&str>) -> Vec<BTreeMap<String, Value>> {
    let Some(module) = container(probe, LINK_CONTAINERS) else {
        return Vec::new();
    };
    let mut current = "relates to".to_string();
    let mut seen: Vec<String> = Vec::new();
    let mut out = Vec::new();

    dom::walk(module, 20, |el, _| {
        if dom::tag(el) == "a" {
            if let Some(key) = browse_key(el) {
                if Some(key.as_str()) != own_key && !seen.contains(&key) {
                    let text = dom::text_of(el);
                    let summary = (!text.is_empty() && !ISSUE_KEY_EXACT.is_match(&text))
                        .then(|| ISSUE_KEY.replace(&text, "").trim().to_string())
                        .filter(|s| !s.is_empty());
                    seen.push(key.clone());
                    out.push(entry(&[
                        ("linkType", Some(current.clone())),
                        ("key", Some(key)),
                        ("summary", summary),
                    ]));
                }
            }
            return Visit::Skip;
        }
        if let Some(t) = dom::attr(el, "title").and_then(link_type_of) {
            current = t.to_string();
        }
        if dom::element_child_count(el) == 0 {
            let text = dom::text_of(el);
            if text.chars().count() <= 40 {
                if let Some(t) = link_type_of(&text) {
                    current = t.to_string();
                }
            }
        }
        Visit::Descend
    });
    out
}

/// Relation named at the start of `text`, if any.
pub fn link_type_of(text: &str) -> Option<&'static str> {
    let lowered = text.trim().to_ascii_lowercase();
    LINK_TYPES.iter().copied().find(|t| lowered.starts_with(t))
}

pub fn worklog(probe: &Probe<'_>) -> Vec<BTreeMap<String, Value>> {
    let Some(panel) = container(probe, WORKLOG_CONTAINERS) else {
        return Vec::new();
    };
    collection_items(panel, WORKLOG_ITEMS, 6)
        .into_iter()
        .filter_map(|item| {
            let time_spent = marked_in(item, WORKLOG_DURATION, 40);
            let author = marked_in(item, AUTHOR_MARKERS, PERSON_MAX);
            if time_spent.is_none() && author.is_none() {
                return None;
            }
            let started = dom::find_marked(item, DATE_MARKERS, 8)
                .and_then(date_value)
                .or_else(|| date_value_in_time(item));
            Some(entry(&[
                ("author", author),
                ("timeSpent", time_spent),
                ("started", started),
            ]))
        })
        .collect()
}
