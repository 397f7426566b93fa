//! Issue-detail pages: one record with scalar fields and the nested
//! collections shown on the page.

use std::sync::LazyLock;

use regex::Regex;
use scraper::ElementRef;

use super::fields;
use super::key::{self, BROWSE_KEY, ISSUE_KEY, ISSUE_KEY_EXACT};
use super::rows;
use super::{first_match, ExtractContext, Probe, Strategy};
use crate::dom::{self, Marker, Visit};
use crate::record::{Field, Record, Value};

static TITLE_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[([A-Z][A-Z0-9_]+-\d+)\]\s*(.*)$").expect("valid regex")
});

const BREADCRUMB_MARKERS: &[Marker] = &[
    Marker::TestId("current-issue"),
    Marker::Id("key-val"),
    Marker::Class("issue-link"),
];

fn document_title(root: ElementRef<'_>) -> Option<String> {
    dom::descendants(root, 3)
        .into_iter()
        .find(|e| dom::tag(*e) == "title")
        .map(dom::text_of)
}

/// `[ABC-1] Fix login - Jira` → (`ABC-1`, `Fix login`).
pub fn parse_title(title: &str) -> Option<(String, Option<String>)> {
    let caps = TITLE_KEY.captures(title.trim())?;
    let mut rest = caps[2].trim().to_string();
    if let Some((head, tail)) = rest.rsplit_once(" - ") {
        if tail.to_ascii_lowercase().contains("jira") {
            rest = head.trim().to_string();
        }
    }
    Some((caps[1].to_string(), (!rest.is_empty()).then_some(rest)))
}

fn key_from_page_url(p: &Probe<'_>) -> Option<String> {
    let url = p.ctx.page_url.as_ref()?;
    BROWSE_KEY
        .captures(url.path())
        .map(|caps| caps[1].to_string())
        .filter(|k| p.ctx.filter.accepts(k))
}

fn key_from_first_attribute(p: &Probe<'_>) -> Option<String> {
    let mut found = None;
    dom::walk(p.el, p.ctx.options.row_walk_depth, |el, _| {
        if let Some(k) = key::key_attr(el) {
            let k = k.trim().to_ascii_uppercase();
            if ISSUE_KEY_EXACT.is_match(&k) && p.ctx.filter.accepts(&k) {
                found = Some(k);
                return Visit::Stop;
            }
        }
        Visit::Descend
    });
    found
}

fn key_from_breadcrumb(p: &Probe<'_>) -> Option<String> {
    let crumb = dom::find_marked(p.el, BREADCRUMB_MARKERS, p.ctx.options.row_walk_depth)?;
    ISSUE_KEY
        .captures(&dom::text_of(crumb))
        .map(|caps| caps[1].to_string())
        .filter(|k| p.ctx.filter.accepts(k))
}

fn key_from_title(p: &Probe<'_>) -> Option<String> {
    let (k, _) = parse_title(&document_title(p.el)?)?;
    p.ctx.filter.accepts(&k).then_some(k)
}

pub const DETAIL_KEY_STRATEGIES: &[Strategy<String>] = &[
    Strategy {
        name: "detail-key-url",
        run: key_from_page_url,
    },
    Strategy {
        name: "detail-key-attribute",
        run: key_from_first_attribute,
    },
    Strategy {
        name: "detail-key-breadcrumb",
        run: key_from_breadcrumb,
    },
    Strategy {
        name: "detail-key-title",
        run: key_from_title,
    },
];

fn summary_from_title(p: &Probe<'_>) -> Option<String> {
    parse_title(&document_title(p.el)?)?.1
}

/// Detail pages link to many other issues, so link text is never a summary
/// source here.
pub const DETAIL_SUMMARY_STRATEGIES: &[Strategy<String>] = &[
    Strategy {
        name: "summary-marker",
        run: fields::summary_from_marker,
    },
    Strategy {
        name: "summary-heading",
        run: fields::summary_from_heading,
    },
    Strategy {
        name: "summary-title",
        run: summary_from_title,
    },
];

fn subtasks(probe: &Probe<'_>, own_key: &str) -> Vec<std::collections::BTreeMap<String, Value>> {
    let Some(container) = dom::find_marked(
        probe.el,
        fields::SUBTASK_CONTAINERS,
        probe.ctx.options.row_walk_depth,
    ) else {
        return Vec::new();
    };
    rows::extract_rows(container, probe.ctx)
        .into_iter()
        .filter(|r| r.text(Field::Key) != Some(own_key))
        .map(|r| {
            [Field::Key, Field::Summary, Field::Status]
                .into_iter()
                .filter_map(|f| r.get(f).map(|v| (f.as_str().to_string(), v.clone())))
                .collect()
        })
        .collect()
}

/// Extract the single issue shown on a detail page.
pub fn extract_issue(root: ElementRef<'_>, html: &str, ctx: &ExtractContext) -> Option<Record> {
    let probe = Probe::new(root, ctx);
    let issue_key = first_match(DETAIL_KEY_STRATEGIES, &probe)?;

    let mut record = Record::issue();
    record.set(Field::Key, issue_key.clone());
    record.set_opt(Field::Url, ctx.browse_url(&issue_key));
    record.set_opt(Field::Summary, first_match(DETAIL_SUMMARY_STRATEGIES, &probe));

    let scalars: [(Field, &[Strategy<String>]); 8] = [
        (Field::Status, fields::STATUS_STRATEGIES),
        (Field::Priority, fields::PRIORITY_STRATEGIES),
        (Field::IssueType, fields::ISSUE_TYPE_STRATEGIES),
        (Field::Assignee, fields::ASSIGNEE_STRATEGIES),
        (Field::Reporter, fields::REPORTER_STRATEGIES),
        (Field::Description, fields::DESCRIPTION_STRATEGIES),
        (Field::Created, fields::CREATED_STRATEGIES),
        (Field::Updated, fields::UPDATED_STRATEGIES),
    ];
    for (field, strategies) in scalars {
        record.set_opt(field, fields::field(strategies, &probe));
    }

    record.set(Field::Labels, fields::labels(&probe));
    record.set(Field::Components, fields::components(&probe));
    record.set(Field::Comments, Value::Entries(fields::comments(&probe)));
    record.set(Field::Subtasks, Value::Entries(subtasks(&probe, &issue_key)));
    record.set(Field::Attachments, Value::Entries(fields::attachments(&probe)));
    record.set(
        Field::Links,
        Value::Entries(fields::issue_links(&probe, Some(&issue_key))),
    );
    record.set(Field::Worklog, Value::Entries(fields::worklog(&probe)));

    if ctx.options.capture_raw_html {
        record.set(Field::RawHtml, html);
    }
    Some(record)
}
