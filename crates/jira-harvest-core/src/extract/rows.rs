//! Row discovery for issue lists, search results, and boards.
//!
//! One bounded walk classifies each element as a row candidate. Rules are
//! tried strictly in order:
//!
//! | Rule | Matches |
//! |------|---------|
//! | `legacy-marker` | `data-issue-key` / `data-issuekey`, or an `issuerow` class |
//! | `test-id` | `data-testid` naming an issue row, card, or list item |
//! | `browse-link` | a linked issue key and at least two element children |
//! | `role-text` | row-like role, tag, or class with a key in its text |
//!
//! The structural rules reject an element that wraps other rows, so extra
//! links to a parent epic or a blocking issue do not disqualify a row. A
//! matched candidate is not descended into, so nested markup never
//! produces a second record for the same row. Board columns are tracked on
//! the way down so a card without its own status can inherit the column
//! title.

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::sync::LazyLock;

use regex::Regex;
use scraper::ElementRef;
use tracing::debug;

use super::fields::{self, SUMMARY_MAX};
use super::key::{self, browse_key, ISSUE_KEY_EXACT};
use super::{first_match, ExtractContext, Probe, Strategy};
use crate::dom::{self, Marker, Visit};
use crate::record::{Field, Record};

/// An element accepted as one issue row or card.
#[derive(Debug, Clone)]
pub struct RowCandidate<'a> {
    pub el: ElementRef<'a>,
    /// Name of the rule that accepted the element.
    pub rule: &'static str,
    /// Title of the enclosing board column, if any.
    pub column: Option<Rc<str>>,
}

/// Elements that wrap whole lists and are never a row themselves.
const LIST_CONTAINERS: &[&str] = &["html", "body", "main", "table", "thead", "tbody", "ul", "ol"];

const COLUMN_TITLE_MARKERS: &[Marker] = &[
    Marker::TestId("column-header"),
    Marker::TestId("column-title"),
    Marker::TestId("column-name"),
    Marker::Class("column-title"),
    Marker::Class("column-header"),
];

static COLUMN_COUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*(?:\(\d+\)|\d+(?:\s*/\s*\d+)?(?:\s+issues?)?)\s*$").expect("valid regex")
});

fn legacy_marker(p: &Probe<'_>) -> Option<()> {
    (key::key_attr(p.el).is_some() || dom::has_class_containing(p.el, "issuerow")).then_some(())
}

fn row_test_id(p: &Probe<'_>) -> Option<()> {
    let id = dom::test_id(p.el)?.to_ascii_lowercase();
    let issue_row = id.contains("issue")
        && ["row", "card", "list-item"].iter().any(|n| id.contains(n));
    (issue_row || id.contains("ui.card.card")).then_some(())
}

/// True when a more specific row marker or a board column sits inside the
/// element, so it must not be taken as a row by the structural rules.
fn wraps_marked_row(p: &Probe<'_>) -> bool {
    let mut found = false;
    dom::walk(p.el, p.ctx.options.link_depth, |el, depth| {
        if depth == 0 {
            return Visit::Descend;
        }
        let inner = Probe::new(el, p.ctx);
        if is_column(el) || legacy_marker(&inner).is_some() || row_test_id(&inner).is_some() {
            found = true;
            return Visit::Stop;
        }
        Visit::Descend
    });
    found
}

/// Elements that are a row by their own semantics: table rows and list
/// items, by tag or ARIA role.
fn is_row_tag(el: ElementRef<'_>) -> bool {
    matches!(dom::tag(el), "tr" | "li")
        || matches!(dom::attr(el, "role"), Some("row") | Some("listitem"))
}

fn links_issue(p: &Probe<'_>) -> bool {
    !LIST_CONTAINERS.contains(&dom::tag(p.el))
        && dom::tag(p.el) != "a"
        && dom::element_child_count(p.el) >= 2
        && !key::linked_keys(p).is_empty()
}

fn names_issue(p: &Probe<'_>) -> bool {
    if LIST_CONTAINERS.contains(&dom::tag(p.el)) {
        return false;
    }
    let row_like = is_row_tag(p.el)
        || ["issue", "row", "card"]
            .iter()
            .any(|c| dom::has_class_containing(p.el, c));
    row_like && !key::text_keys(p).is_empty()
}

/// True when shallow descendants would pass `qualifies` as rows of their
/// own: any nested row-tag element, or (below a non-row-tag element) two
/// descendants owning different keys. A row linking its parent epic or a
/// blocking issue owns one key and is not a wrapper.
fn wraps_rows(p: &Probe<'_>, qualifies: fn(&Probe<'_>) -> bool) -> bool {
    let row_tag = is_row_tag(p.el);
    let mut owners = BTreeSet::new();
    let mut nested_row = false;
    dom::walk(p.el, p.ctx.options.link_depth, |el, depth| {
        if depth == 0 {
            return Visit::Descend;
        }
        let inner = Probe::new(el, p.ctx);
        if !qualifies(&inner) {
            return Visit::Descend;
        }
        if is_row_tag(el) {
            nested_row = true;
            return Visit::Stop;
        }
        if row_tag {
            return Visit::Descend;
        }
        if let Some(owned) = key::issue_key(&inner) {
            owners.insert(owned);
        }
        if owners.len() > 1 {
            return Visit::Stop;
        }
        Visit::Descend
    });
    nested_row || owners.len() > 1
}

fn browse_link_row(p: &Probe<'_>) -> Option<()> {
    (links_issue(p) && !wraps_marked_row(p) && !wraps_rows(p, links_issue)).then_some(())
}

fn role_with_text_key(p: &Probe<'_>) -> Option<()> {
    (names_issue(p) && !wraps_marked_row(p) && !wraps_rows(p, names_issue)).then_some(())
}

pub const ROW_RULES: &[Strategy<()>] = &[
    Strategy {
        name: "legacy-marker",
        run: legacy_marker,
    },
    Strategy {
        name: "test-id",
        run: row_test_id,
    },
    Strategy {
        name: "browse-link",
        run: browse_link_row,
    },
    Strategy {
        name: "role-text",
        run: role_with_text_key,
    },
];

/// Name of the first row rule matching the probed element.
pub fn row_rule(probe: &Probe<'_>) -> Option<&'static str> {
    ROW_RULES
        .iter()
        .find(|rule| (rule.run)(probe).is_some())
        .map(|rule| rule.name)
}

/// Legacy boards render column headers apart from the column bodies and
/// join them by id.
fn legacy_column_headers(root: ElementRef<'_>, max_depth: usize) -> BTreeMap<String, String> {
    dom::descendants(root, max_depth)
        .into_iter()
        .filter(|el| dom::has_class_containing(*el, "ghx-column"))
        .filter_map(|el| {
            let id = dom::attr(el, "data-id")?;
            let title = column_heading(el)?;
            Some((id.to_string(), title))
        })
        .collect()
}

fn column_heading(el: ElementRef<'_>) -> Option<String> {
    let heading = dom::find_marked(el, COLUMN_TITLE_MARKERS, 6).or_else(|| {
        dom::descendants(el, 6)
            .into_iter()
            .find(|e| matches!(dom::tag(*e), "h2" | "h3"))
    })?;
    clean_column_title(&dom::text_of(heading))
}

/// Drop issue counts such as "In Progress 3" or "Done (12)".
pub fn clean_column_title(text: &str) -> Option<String> {
    let stripped = COLUMN_COUNT.replace(text.trim(), "");
    dom::bounded(&stripped, 60)
}

fn is_column(el: ElementRef<'_>) -> bool {
    if dom::attr(el, "data-column-id").is_some() {
        return true;
    }
    dom::test_id(el)
        .map(|t| t.to_ascii_lowercase())
        .map(|t| {
            t.contains("board")
                && t.contains("column")
                && !["header", "title", "name"].iter().any(|n| t.contains(n))
        })
        .unwrap_or(false)
}

fn column_title(el: ElementRef<'_>, headers: &BTreeMap<String, String>) -> Option<String> {
    dom::attr(el, "data-column-name")
        .or_else(|| dom::attr(el, "aria-label"))
        .and_then(clean_column_title)
        .or_else(|| column_heading(el))
        .or_else(|| {
            dom::attr(el, "data-column-id")
                .and_then(|id| headers.get(id))
                .cloned()
        })
}

/// Walk `root` once and return row candidates in document order.
pub fn discover_rows<'a>(root: ElementRef<'a>, ctx: &ExtractContext) -> Vec<RowCandidate<'a>> {
    let max_depth = ctx.options.row_walk_depth;
    let headers = legacy_column_headers(root, max_depth);
    let mut rows = Vec::new();
    let mut stack: Vec<(ElementRef<'a>, usize, Option<Rc<str>>)> = vec![(root, 0, None)];

    while let Some((el, depth, mut column)) = stack.pop() {
        if matches!(dom::tag(el), "script" | "style" | "template") {
            continue;
        }
        if is_column(el) {
            if let Some(title) = column_title(el, &headers) {
                column = Some(Rc::from(title));
            }
        } else if let Some(rule) = row_rule(&Probe::new(el, ctx)) {
            rows.push(RowCandidate { el, rule, column });
            continue;
        }
        if depth >= max_depth {
            continue;
        }
        let children: Vec<ElementRef<'a>> = dom::element_children(el).collect();
        for child in children.into_iter().rev() {
            stack.push((child, depth + 1, column.clone()));
        }
    }
    rows
}

fn is_field_keyword(text: &str) -> bool {
    [
        fields::STATUS_KEYWORDS,
        fields::PRIORITY_KEYWORDS,
        fields::ISSUE_TYPE_KEYWORDS,
    ]
    .iter()
    .any(|list| list.iter().any(|k| k.eq_ignore_ascii_case(text)))
}

fn plausible_summary(text: &str) -> bool {
    !text.is_empty()
        && !ISSUE_KEY_EXACT.is_match(text)
        && !is_field_keyword(text)
        && text.chars().count() <= SUMMARY_MAX
}

/// Text of any shallow link that is neither a key nor a field keyword.
fn summary_from_any_link(p: &Probe<'_>) -> Option<String> {
    dom::anchors(p.el, p.ctx.options.link_depth)
        .into_iter()
        .map(dom::text_of)
        .find(|t| plausible_summary(t))
}

/// Longest leaf text left after ruling out keys and keywords.
fn summary_from_longest_text(p: &Probe<'_>) -> Option<String> {
    dom::leaf_texts(p.el, p.ctx.options.row_walk_depth)
        .into_iter()
        .filter(|t| plausible_summary(t))
        .max_by_key(|t| t.chars().count())
}

pub const ROW_SUMMARY_STRATEGIES: &[Strategy<String>] = &[
    Strategy {
        name: "summary-marker",
        run: fields::summary_from_marker,
    },
    Strategy {
        name: "summary-browse-link",
        run: fields::summary_from_browse_link,
    },
    Strategy {
        name: "summary-any-link",
        run: summary_from_any_link,
    },
    Strategy {
        name: "summary-longest-text",
        run: summary_from_longest_text,
    },
];

fn row_url(probe: &Probe<'_>, issue_key: &str) -> Option<String> {
    probe.ctx.browse_url(issue_key).or_else(|| {
        dom::anchors(probe.el, probe.ctx.options.link_depth)
            .into_iter()
            .find(|a| browse_key(*a).as_deref() == Some(issue_key))
            .and_then(|a| dom::attr(a, "href"))
            .and_then(|href| probe.ctx.absolute_url(href))
    })
}

/// Build the record for one candidate. Rows without an accepted key yield
/// nothing.
pub fn row_record(row: &RowCandidate<'_>, ctx: &ExtractContext) -> Option<Record> {
    let probe = Probe::new(row.el, ctx);
    let issue_key = key::issue_key(&probe)?;

    let mut record = Record::issue();
    record.set_opt(Field::Url, row_url(&probe, &issue_key));
    record.set_opt(Field::Summary, first_match(ROW_SUMMARY_STRATEGIES, &probe));
    record.set_opt(Field::Status, fields::field(fields::STATUS_STRATEGIES, &probe));
    record.set_opt(
        Field::Priority,
        fields::field(fields::PRIORITY_STRATEGIES, &probe),
    );
    record.set_opt(
        Field::IssueType,
        fields::field(fields::ISSUE_TYPE_STRATEGIES, &probe),
    );
    record.set_opt(
        Field::Assignee,
        fields::field(fields::ASSIGNEE_STRATEGIES, &probe),
    );
    if let Some(column) = &row.column {
        record.set_if_absent(Field::Status, column.to_string());
    }
    record.set(Field::Key, issue_key);
    Some(record)
}

/// Extract one record per distinct issue key, in document order.
pub fn extract_rows(root: ElementRef<'_>, ctx: &ExtractContext) -> Vec<Record> {
    let candidates = discover_rows(root, ctx);
    let mut seen = BTreeSet::new();
    let mut records = Vec::new();
    for row in &candidates {
        let Some(record) = row_record(row, ctx) else {
            continue;
        };
        let Some(issue_key) = record.text(Field::Key).map(str::to_string) else {
            continue;
        };
        if seen.insert(issue_key) {
            records.push(record);
        }
    }
    debug!(
        candidates = candidates.len(),
        records = records.len(),
        "row discovery finished"
    );
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ExtractOptions;
    use scraper::Html;

    fn extract(html: &str, url: &str) -> Vec<Record> {
        let doc = Html::parse_document(html);
        let ctx = ExtractContext::new(url, ExtractOptions::default());
        extract_rows(doc.root_element(), &ctx)
    }

    fn keys(records: &[Record]) -> Vec<&str> {
        records.iter().filter_map(|r| r.text(Field::Key)).collect()
    }

    #[test]
    fn legacy_row_with_status_and_link_summary() {
        let html = r#"<html><body><table><tbody>
            <tr data-issue-key="PROJ-7">
                <td><a href="/browse/PROJ-7">Fix bug</a></td>
                <td>In Progress</td>
            </tr>
        </tbody></table></body></html>"#;
        let records = extract(html, "https://x.atlassian.net/jira/software/projects/PROJ/issues");
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.text(Field::Key), Some("PROJ-7"));
        assert_eq!(r.text(Field::Status), Some("In Progress"));
        assert_eq!(r.text(Field::Summary), Some("Fix bug"));
        assert_eq!(r.text(Field::Url), Some("https://x.atlassian.net/browse/PROJ-7"));
    }

    #[test]
    fn rows_for_other_projects_are_dropped() {
        let html = r#"<table><tbody>
            <tr><td><a href="/browse/OTHER-1">OTHER-1</a></td><td>Other work</td></tr>
            <tr><td><a href="/browse/ABC-5">ABC-5</a></td><td>Our work</td></tr>
        </tbody></table>"#;
        let records = extract(html, "https://x.atlassian.net/jira/software/projects/ABC/issues");
        assert_eq!(keys(&records), vec!["ABC-5"]);
        assert_eq!(records[0].text(Field::Summary), Some("Our work"));
    }

    #[test]
    fn legacy_issuekey_alias_and_priority_icon() {
        let html = r#"<table id="issuetable"><tbody>
            <tr class="issuerow" data-issuekey="WEB-12">
                <td class="issuetype"><img alt="Bug"></td>
                <td class="summary"><a class="issue-link" href="/browse/WEB-12">Broken header</a></td>
                <td class="priority"><img alt="Major"></td>
                <td class="status"><span>Open</span></td>
                <td class="assignee"><a class="user-hover">Jane Doe</a></td>
            </tr>
        </tbody></table>"#;
        let records = extract(html, "https://jira.example.com/issues/?jql=project%20%3D%20WEB");
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.text(Field::Key), Some("WEB-12"));
        assert_eq!(r.text(Field::Summary), Some("Broken header"));
        assert_eq!(r.text(Field::IssueType), Some("Bug"));
        assert_eq!(r.text(Field::Priority), Some("Major"));
        assert_eq!(r.text(Field::Status), Some("Open"));
        assert_eq!(r.text(Field::Assignee), Some("Jane Doe"));
    }

    #[test]
    fn nested_candidates_and_repeats_yield_one_record() {
        let html = r#"<ul>
            <li data-issue-key="ABC-1"><div data-issue-key="ABC-1"><a href="/browse/ABC-1">One</a></div></li>
            <li data-issue-key="ABC-1"><a href="/browse/ABC-1">One again</a></li>
            <li data-issue-key="ABC-2"><a href="/browse/ABC-2">Two</a></li>
        </ul>"#;
        let records = extract(html, "");
        assert_eq!(keys(&records), vec!["ABC-1", "ABC-2"]);
        assert_eq!(records[0].text(Field::Summary), Some("One"));
    }

    #[test]
    fn thin_wrapper_is_not_a_row() {
        let doc = Html::parse_document(
            r#"<div class="wrap"><span><a href="/browse/ABC-3">Only link</a></span></div>"#,
        );
        let ctx = ExtractContext::new("", ExtractOptions::default());
        assert!(discover_rows(doc.root_element(), &ctx).is_empty());
    }

    #[test]
    fn structural_rule_matches_two_child_cards() {
        let html = r#"<div class="list">
            <div class="item"><a href="/browse/ABC-3">ABC-3</a><span>First thing</span></div>
            <div class="item"><a href="/browse/ABC-4">ABC-4</a><span>Second thing</span></div>
        </div>"#;
        let doc = Html::parse_document(html);
        let ctx = ExtractContext::new("", ExtractOptions::default());
        let rows = discover_rows(doc.root_element(), &ctx);
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.rule == "browse-link"));
        let records = extract_rows(doc.root_element(), &ctx);
        assert_eq!(records[1].text(Field::Summary), Some("Second thing"));
    }

    #[test]
    fn board_cards_inherit_column_status() {
        let html = r#"<div data-testid="software-board.board-container.board">
            <div data-testid="platform-board-kit.ui.column.draggable-column">
                <div data-testid="platform-board-kit.common.ui.column-header.header"><h2>In Progress 2</h2></div>
                <div data-testid="platform-board-kit.ui.card.card"><a href="/browse/ABC-1">ABC-1</a><span>Card one</span></div>
                <div data-testid="platform-board-kit.ui.card.card"><a href="/browse/ABC-2">ABC-2</a><span>Card two</span><span class="lozenge">Blocked</span></div>
            </div>
            <div data-testid="platform-board-kit.ui.column.draggable-column">
                <div data-testid="platform-board-kit.common.ui.column-header.header"><h2>Done (1)</h2></div>
                <div data-testid="platform-board-kit.ui.card.card"><a href="/browse/ABC-3">ABC-3</a><span>Card three</span></div>
            </div>
        </div>"#;
        let records = extract(html, "https://x.atlassian.net/jira/software/projects/ABC/boards/1");
        assert_eq!(keys(&records), vec!["ABC-1", "ABC-2", "ABC-3"]);
        assert_eq!(records[0].text(Field::Status), Some("In Progress"));
        assert_eq!(records[0].text(Field::Summary), Some("Card one"));
        assert_eq!(records[1].text(Field::Status), Some("Blocked"));
        assert_eq!(records[2].text(Field::Status), Some("Done"));
    }

    #[test]
    fn legacy_board_joins_headers_by_column_id() {
        let html = r#"<div id="ghx-pool">
            <ul class="ghx-column-headers"><li class="ghx-column" data-id="11"><h2>Selected for Development</h2></li></ul>
            <ul class="ghx-columns"><li class="ghx-column" data-column-id="11">
                <div class="ghx-issue" data-issue-key="OPS-9"><a href="/browse/OPS-9">OPS-9</a><div class="ghx-summary">Rotate keys</div></div>
            </li></ul>
        </div>"#;
        let records = extract(html, "https://jira.example.com/secure/RapidBoard.jspa?rapidView=3");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].text(Field::Status), Some("Selected for Development"));
        assert_eq!(records[0].text(Field::Summary), Some("Rotate keys"));
    }

    #[test]
    fn rows_linking_a_parent_epic_are_kept() {
        let mut html = String::from("<table><tbody>");
        for n in 2..=4 {
            html.push_str(&format!(
                r#"<tr>
                    <td><a href="/browse/ABC-{n}">ABC-{n}</a></td>
                    <td><a href="/browse/ABC-{n}">Task number {n}</a></td>
                    <td><a href="/browse/ABC-1">ABC-1 Parent epic</a></td>
                    <td>To Do</td>
                </tr>"#
            ));
        }
        html.push_str("</tbody></table>");

        let records = extract(&html, "https://x.atlassian.net/jira/software/projects/ABC/issues");
        assert_eq!(keys(&records), vec!["ABC-2", "ABC-3", "ABC-4"]);
        assert_eq!(records[0].text(Field::Summary), Some("Task number 2"));
        assert_eq!(records[2].text(Field::Status), Some("To Do"));
    }

    #[test]
    fn rows_with_keys_from_two_projects_without_a_filter() {
        let mut html = String::from("<table><tbody>");
        for n in 1..=3 {
            html.push_str(&format!(
                r#"<tr>
                    <td><a href="/browse/ABC-{n}">ABC-{n}</a></td>
                    <td>Migrate billing service {n}</td>
                    <td>Blocked by <a href="/browse/OPS-{n}">OPS-{n}</a></td>
                </tr>"#
            ));
        }
        html.push_str("</tbody></table>");

        let records = extract(&html, "https://x.atlassian.net/issues/?jql=status%20%3D%20Open");
        assert_eq!(keys(&records), vec!["ABC-1", "ABC-2", "ABC-3"]);
        assert_eq!(records[1].text(Field::Summary), Some("Migrate billing service 2"));
    }

    #[test]
    fn two_project_row_yields_only_the_filtered_key() {
        let html = r#"<table><tbody><tr>
            <td><a href="/browse/OTHER-1">OTHER-1</a></td>
            <td><a href="/browse/ABC-5">ABC-5</a></td>
            <td>Shared fix</td>
        </tr></tbody></table>"#;

        let records = extract(html, "https://x.atlassian.net/jira/software/projects/ABC/issues");
        assert_eq!(keys(&records), vec!["ABC-5"]);

        let records = extract(html, "https://x.atlassian.net/jira/software/projects/ZZZ/issues");
        assert!(records.is_empty());
    }

    #[test]
    fn wrapper_around_rows_is_not_a_row() {
        let html = r#"<div id="app">
            <header><a href="/browse/ABC-9">Recently viewed ABC-9</a><span>Menu</span></header>
            <div class="results">
                <div class="entry"><a href="/browse/ABC-1">ABC-1</a><span>Alpha</span></div>
                <div class="entry"><a href="/browse/ABC-2">ABC-2</a><span>Beta</span></div>
            </div>
        </div>"#;
        let doc = Html::parse_document(html);
        let ctx = ExtractContext::new("", ExtractOptions::default());
        let rows = discover_rows(doc.root_element(), &ctx);
        assert!(rows.iter().all(|r| dom::attr(r.el, "id") != Some("app")));
        let records = extract_rows(doc.root_element(), &ctx);
        let found = keys(&records);
        assert!(found.contains(&"ABC-1") && found.contains(&"ABC-2"));
        let beta = records
            .iter()
            .find(|r| r.text(Field::Key) == Some("ABC-2"))
            .unwrap();
        assert_eq!(beta.text(Field::Summary), Some("Beta"));
    }

    #[test]
    fn column_counts_are_stripped() {
        assert_eq!(clean_column_title("In Progress 3").as_deref(), Some("In Progress"));
        assert_eq!(clean_column_title("Done (12)").as_deref(), Some("Done"));
        assert_eq!(clean_column_title("To Do 4 issues").as_deref(), Some("To Do"));
        assert_eq!(clean_column_title("Review").as_deref(), Some("Review"));
    }
}
