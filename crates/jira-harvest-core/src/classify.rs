//! Page classifier.
//!
//! [`PageClassifier::assess`] turns a captured page (raw HTML plus source URL)
//! into a [`PageAssessment`]. It never fails: a document that cannot be
//! parsed degrades to `unknown` with no confidence.
//!
//! # Indicators
//!
//! | Indicator | Source |
//! |-----------|--------|
//! | `url_projects_list` | `/projects` path (not `/projects/<id>`), `BrowseProjects.jspa` |
//! | `url_issue_detail` | `/browse/<KEY>-<n>` |
//! | `url_project_issues` | `/projects/<KEY>/issues`, `/browse/<KEY>` |
//! | `url_board` | `/boards/<n>`, `RapidBoard.jspa` |
//! | `url_search` | `/issues` outside a project, `IssueNavigator.jspa` |
//! | `url_jql` | `jql=` query parameter |
//! | `url_jira_cloud` | `*.atlassian.net` host |
//! | `html_legacy_issue_key` / `multiple_legacy_issue_keys` | `data-issue-key` attributes |
//! | `html_issue_testid` / `multiple_issue_testids` | test ids naming issue rows, containers, views |
//! | `html_issue_row` / `multiple_issue_rows` | issue row and card markers |
//! | `html_issue_link` / `multiple_issue_links` | distinct `/browse/<KEY>-<n>` link targets |
//! | `html_project_link` / `multiple_project_links` | `/projects/` and `/browse/<KEY>` links |
//! | `html_project_table` | project directory table markers |
//! | `html_board_columns` | board column containers |
//! | `html_issue_detail_layout` | issue view layout containers |
//!
//! Counted indicators only become `multiple_*` at [`REPEAT_THRESHOLD`], so a
//! single stray link never turns a page into a list.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::Html;
use tracing::debug;
use url::Url;

use crate::dom::{self, Visit};
use crate::extract::key::{BROWSE_KEY, ISSUE_KEY_EXACT};
use crate::extract::{check_document, DEFAULT_MAX_HTML_BYTES};
use crate::models::{Confidence, PageAssessment, PageType};

/// Default depth cap for the indicator walk.
pub const DEFAULT_MAX_DEPTH: usize = 20;

/// Count at which a repeated HTML signal is promoted to `multiple_*`.
pub const REPEAT_THRESHOLD: usize = 3;

static PROJECTS_LIST_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)/projects/?$|BrowseProjects\.jspa").expect("valid regex"));
static PROJECT_ISSUES_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/projects/[A-Z][A-Z0-9_]+/issues|/browse/[A-Z][A-Z0-9_]+/?$").expect("valid regex")
});
static BOARD_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)/boards/\d+|RapidBoard\.jspa").expect("valid regex"));
static SEARCH_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:/jira)?/issues/?$|IssueNavigator\.jspa").expect("valid regex"));
static PROJECT_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/projects/[A-Za-z0-9_]+|/browse/[A-Z][A-Z0-9_]+/?(?:[?#]|$)").expect("valid regex")
});

const DETAIL_LAYOUT_IDS: &[&str] = &["issue-content", "jira-issue-header", "details-module"];
const DETAIL_LAYOUT_TEST_IDS: &[&str] = &["issue.views.issue-base", "issue-view-layout", "issue-view"];
const PROJECT_TABLE_TEST_IDS: &[&str] = &["project-list", "projects-table", "projects-directory"];

/// Pure, stateless page classifier.
#[derive(Debug, Clone)]
pub struct PageClassifier {
    max_depth: usize,
    max_html_bytes: usize,
}

impl Default for PageClassifier {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_html_bytes: DEFAULT_MAX_HTML_BYTES,
        }
    }
}

#[derive(Debug, Default)]
struct Signals {
    url: BTreeSet<&'static str>,
    html: BTreeSet<&'static str>,
}

impl Signals {
    fn has(&self, name: &str) -> bool {
        self.url.contains(name) || self.html.contains(name)
    }

    fn any(&self, names: &[&str]) -> bool {
        names.iter().any(|n| self.has(n))
    }

    fn count(&mut self, single: &'static str, multiple: &'static str, n: usize) {
        if n >= 1 {
            self.html.insert(single);
        }
        if n >= REPEAT_THRESHOLD {
            self.html.insert(multiple);
        }
    }

    /// Content that can only come from a rendered list of issues.
    fn list_content(&self) -> bool {
        self.any(&["multiple_issue_links", "multiple_issue_rows", "multiple_legacy_issue_keys"])
    }
}

impl PageClassifier {
    pub fn new(max_depth: usize, max_html_bytes: usize) -> Self {
        Self {
            max_depth,
            max_html_bytes,
        }
    }

    /// Classify a captured page.
    #[tracing::instrument(skip(self, html), fields(html_len = html.len()))]
    pub fn assess(&self, html: &str, url: &str) -> PageAssessment {
        if let Err(e) = check_document(html, self.max_html_bytes) {
            debug!(error = %e, "document rejected");
            let mut verdict = PageAssessment::unknown();
            verdict.indicators.insert("document_unparseable".to_string());
            return verdict;
        }

        let mut signals = Signals::default();
        url_signals(url, &mut signals);
        self.html_signals(html, &mut signals);

        let page_type = resolve(&signals);
        let confidence = confidence(page_type, &signals);
        let collectable = page_type.is_harvestable() && confidence > Confidence::None;

        let indicators = signals
            .url
            .iter()
            .chain(signals.html.iter())
            .map(|s| s.to_string())
            .collect();
        debug!(%page_type, %confidence, collectable, "page assessed");
        PageAssessment {
            page_type,
            confidence,
            collectable,
            indicators,
        }
    }

    fn html_signals(&self, html: &str, signals: &mut Signals) {
        let document = Html::parse_document(html);
        let mut legacy_keys = 0;
        let mut issue_testids = 0;
        let mut issue_rows = 0;
        let mut board_columns = 0;
        let mut issue_links = BTreeSet::new();
        let mut project_links = BTreeSet::new();

        dom::walk(document.root_element(), self.max_depth, |el, _| {
            if matches!(dom::tag(el), "script" | "style" | "template") {
                return Visit::Skip;
            }
            if dom::attr(el, "data-issue-key").is_some() || dom::attr(el, "data-issuekey").is_some() {
                legacy_keys += 1;
            }
            if dom::has_class_containing(el, "issuerow") {
                issue_rows += 1;
            }
            if let Some(id) = dom::test_id(el).map(str::to_ascii_lowercase) {
                if id.contains("issue") {
                    if ["row", "container", "issue."].iter().any(|n| id.contains(n)) {
                        issue_testids += 1;
                    }
                    if ["row", "card", "list-item"].iter().any(|n| id.contains(n)) {
                        issue_rows += 1;
                    }
                }
                if id.contains("ui.card.card") {
                    issue_rows += 1;
                }
                if id.contains("board") && id.contains("column") && !id.contains("header") {
                    board_columns += 1;
                }
                if DETAIL_LAYOUT_TEST_IDS.iter().any(|t| id.contains(t)) {
                    signals.html.insert("html_issue_detail_layout");
                }
                if PROJECT_TABLE_TEST_IDS.iter().any(|t| id.contains(t)) {
                    signals.html.insert("html_project_table");
                }
            }
            if dom::attr(el, "data-column-id").is_some() {
                board_columns += 1;
            }
            if let Some(id) = dom::attr(el, "id") {
                if DETAIL_LAYOUT_IDS.contains(&id) {
                    signals.html.insert("html_issue_detail_layout");
                }
                if id == "project-list" || id == "projects-table" {
                    signals.html.insert("html_project_table");
                }
            }
            if dom::tag(el) == "a" {
                if let Some(href) = dom::attr(el, "href") {
                    if let Some(caps) = BROWSE_KEY.captures(href) {
                        issue_links.insert(caps[1].to_string());
                    } else if PROJECT_LINK.is_match(href) {
                        project_links.insert(href.to_string());
                    }
                }
            }
            Visit::Descend
        });

        signals.count("html_legacy_issue_key", "multiple_legacy_issue_keys", legacy_keys);
        signals.count("html_issue_testid", "multiple_issue_testids", issue_testids);
        signals.count("html_issue_row", "multiple_issue_rows", issue_rows);
        signals.count("html_issue_link", "multiple_issue_links", issue_links.len());
        signals.count("html_project_link", "multiple_project_links", project_links.len());
        if board_columns > 0 {
            signals.html.insert("html_board_columns");
        }
    }
}

fn url_signals(url: &str, signals: &mut Signals) {
    let Ok(parsed) = Url::parse(url) else {
        return;
    };
    let path = parsed.path();

    if let Some(caps) = BROWSE_KEY.captures(path) {
        if ISSUE_KEY_EXACT.is_match(&caps[1]) {
            signals.url.insert("url_issue_detail");
        }
    }
    if PROJECTS_LIST_PATH.is_match(path) {
        signals.url.insert("url_projects_list");
    }
    if PROJECT_ISSUES_PATH.is_match(path) {
        signals.url.insert("url_project_issues");
    }
    if BOARD_PATH.is_match(path) {
        signals.url.insert("url_board");
    }
    if SEARCH_PATH.is_match(path) {
        signals.url.insert("url_search");
    }
    if parsed.query_pairs().any(|(k, _)| k == "jql") {
        signals.url.insert("url_jql");
    }
    if parsed
        .host_str()
        .map(|h| h.ends_with(".atlassian.net"))
        .unwrap_or(false)
    {
        signals.url.insert("url_jira_cloud");
    }
}

/// Priority cascade over the collected signals.
fn resolve(s: &Signals) -> PageType {
    let list = s.list_content();

    if s.has("url_issue_detail") || (s.has("html_issue_detail_layout") && !list) {
        return PageType::Issue;
    }
    let projects = s.any(&["url_projects_list", "html_project_table", "multiple_project_links"]);
    if projects && !list {
        return PageType::ProjectsList;
    }
    if list {
        return if s.any(&["url_board", "html_board_columns"]) {
            PageType::Board
        } else if s.any(&["url_jql", "url_search"]) {
            PageType::Search
        } else {
            PageType::IssueList
        };
    }
    if s.has("url_board") {
        return PageType::Board;
    }
    if s.any(&["url_search", "url_jql"]) {
        return PageType::Search;
    }
    if s.has("url_project_issues") {
        return PageType::IssueList;
    }
    if s.has("url_jira_cloud") || !s.html.is_empty() {
        return PageType::Generic;
    }
    PageType::Unknown
}

/// URL-category and HTML-category support for a resolved type.
fn support(page_type: PageType, s: &Signals) -> (bool, bool) {
    let list = s.list_content();
    match page_type {
        PageType::Issue => (
            s.has("url_issue_detail"),
            s.any(&["html_issue_detail_layout", "html_issue_testid", "html_legacy_issue_key"]),
        ),
        PageType::ProjectsList => (
            s.has("url_projects_list"),
            s.any(&["html_project_table", "multiple_project_links"]),
        ),
        PageType::Board => (s.has("url_board"), list || s.has("html_board_columns")),
        PageType::Search => (s.any(&["url_search", "url_jql"]), list),
        PageType::IssueList => (
            s.any(&["url_project_issues", "url_search", "url_jql"]),
            list,
        ),
        PageType::Generic | PageType::Unknown => (false, false),
    }
}

fn confidence(page_type: PageType, s: &Signals) -> Confidence {
    match page_type {
        PageType::Unknown => Confidence::None,
        PageType::Generic => Confidence::Low,
        _ => match support(page_type, s) {
            (true, true) => Confidence::High,
            (true, false) | (false, true) => Confidence::Medium,
            (false, false) => Confidence::Low,
        },
    }
}

/// Classify with default limits.
pub fn assess_page(html: &str, url: &str) -> PageAssessment {
    PageClassifier::default().assess(html, url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn links(n: usize, project: &str) -> String {
        (1..=n)
            .map(|i| format!(r#"<li><a href="/browse/{project}-{i}">Issue {i}</a></li>"#))
            .collect::<Vec<_>>()
            .join("")
    }

    fn page(body: &str) -> String {
        format!("<html><head><title>t</title></head><body>{body}</body></html>")
    }

    #[test]
    fn projects_directory_is_high_confidence() {
        let html = page(r#"<table data-testid="project-list-table"><tr><td>ABC</td></tr></table>"#);
        let verdict = assess_page(&html, "https://x.atlassian.net/jira/projects");
        assert_eq!(verdict.page_type, PageType::ProjectsList);
        assert_eq!(verdict.confidence, Confidence::High);
        assert!(verdict.collectable);
        assert!(verdict.indicators.contains("url_projects_list"));
        assert!(verdict.indicators.contains("html_project_table"));
    }

    #[test]
    fn page_without_markers_is_unknown() {
        let html = page("<h1>Welcome</h1><p>Nothing to see.</p>");
        let verdict = assess_page(&html, "https://example.com");
        assert_eq!(verdict.page_type, PageType::Unknown);
        assert_eq!(verdict.confidence, Confidence::None);
        assert!(!verdict.collectable);
        assert!(verdict.indicators.is_empty());
    }

    #[test]
    fn unparseable_document_degrades_to_unknown() {
        for html in ["", "   ", "plain text"] {
            let verdict = assess_page(html, "https://x.atlassian.net/browse/ABC-1");
            assert_eq!(verdict.page_type, PageType::Unknown);
            assert!(!verdict.collectable);
            assert!(verdict.indicators.contains("document_unparseable"));
        }
    }

    #[test]
    fn repeated_browse_links_resolve_to_a_list_type() {
        let html = page(&format!("<ul>{}</ul>", links(3, "ABC")));
        let cases = [
            ("", PageType::IssueList),
            ("https://example.com/", PageType::IssueList),
            ("https://x.atlassian.net/jira/software/projects/ABC/boards/4", PageType::Board),
            ("https://x.atlassian.net/issues/?jql=project%3DABC", PageType::Search),
            ("https://x.atlassian.net/jira/projects", PageType::IssueList),
        ];
        for (url, expected) in cases {
            let verdict = assess_page(&html, url);
            assert_eq!(verdict.page_type, expected, "url {url}");
            assert!(verdict.collectable);
        }
    }

    #[test]
    fn list_content_beats_detail_layout_without_browse_url() {
        let html = page(&format!(
            r#"<div id="issue-content"><ul>{}</ul></div>"#,
            links(4, "ABC")
        ));
        let verdict = assess_page(&html, "https://jira.example.com/secure/Dashboard.jspa");
        assert_eq!(verdict.page_type, PageType::IssueList);
        assert_eq!(verdict.confidence, Confidence::Medium);
    }

    #[test]
    fn browse_url_is_an_issue() {
        let html = page(r#"<div data-testid="issue.views.issue-base.foundation.summary.heading">Fix</div>"#);
        let verdict = assess_page(&html, "https://x.atlassian.net/browse/ABC-1");
        assert_eq!(verdict.page_type, PageType::Issue);
        assert_eq!(verdict.confidence, Confidence::High);
        assert!(verdict.collectable);
    }

    #[test]
    fn single_stray_link_is_not_list_content() {
        let html = page(&links(1, "ABC"));
        let verdict = assess_page(&html, "https://example.com/wiki/page");
        assert!(verdict.indicators.contains("html_issue_link"));
        assert!(!verdict.indicators.contains("multiple_issue_links"));
        assert_eq!(verdict.page_type, PageType::Generic);
        assert!(!verdict.collectable);
    }

    #[test]
    fn url_only_board_is_still_collectable() {
        let html = page("<div id=\"root\"></div>");
        let verdict = assess_page(&html, "https://x.atlassian.net/jira/software/projects/ABC/boards/7");
        assert_eq!(verdict.page_type, PageType::Board);
        assert_eq!(verdict.confidence, Confidence::Medium);
        assert!(verdict.collectable);
    }

    #[test]
    fn bare_cloud_domain_is_generic() {
        let html = page("<div>loading</div>");
        let verdict = assess_page(&html, "https://x.atlassian.net/wiki/home");
        assert_eq!(verdict.page_type, PageType::Generic);
        assert_eq!(verdict.confidence, Confidence::Low);
        assert!(!verdict.collectable);
    }

    #[test]
    fn walk_depth_cap_hides_deep_markers() {
        let mut body = String::new();
        for _ in 0..30 {
            body.push_str("<div>");
        }
        body.push_str(&links(5, "ABC"));
        for _ in 0..30 {
            body.push_str("</div>");
        }
        let html = page(&body);
        let shallow = PageClassifier::new(20, DEFAULT_MAX_HTML_BYTES).assess(&html, "");
        assert_eq!(shallow.page_type, PageType::Unknown);
        let deep = PageClassifier::new(64, DEFAULT_MAX_HTML_BYTES).assess(&html, "");
        assert_eq!(deep.page_type, PageType::IssueList);
    }
}
