//! Issue-key recovery and project filtering.
//!
//! Keys are recovered with a three-step cascade: an explicit
//! `data-issue-key` attribute, then `/browse/<KEY>` link targets within a
//! shallow subtree, then a regex over the element's visible text. The
//! project filter derived from the page URL is applied at every step.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::ElementRef;
use url::Url;

use super::{first_match, Probe, Strategy};
use crate::dom::{self, Visit};
use crate::models::project_key_of;

/// An issue key anywhere in free text.
pub static ISSUE_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z][A-Z0-9_]+-\d+)\b").expect("valid regex"));

/// An issue key as a whole string.
pub static ISSUE_KEY_EXACT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Z0-9_]+-\d+$").expect("valid regex"));

/// An issue key in a `/browse/` link target.
pub static BROWSE_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/browse/([A-Z][A-Z0-9_]+-\d+)").expect("valid regex"));

/// A project key: 2–10 uppercase alphanumerics starting with a letter.
pub static PROJECT_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Z0-9]{1,9}$").expect("valid regex"));

static PROJECT_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/projects/([A-Z][A-Z0-9_]+)(?:/|$)").expect("valid regex"));

static BROWSE_PROJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/browse/([A-Z][A-Z0-9_]+)/?$").expect("valid regex"));

/// `project = KEY` or `project in (A, B)`; both may repeat across `OR`.
static JQL_PROJECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bproject\s*(?:=\s*("?[^\s"()]+"?)|in\s*\(([^)]*)\))"#).expect("valid regex")
});

static JQL_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]+$").expect("valid regex"));

/// Restricts extracted keys to the projects the page URL names. An empty
/// set accepts every project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectFilter {
    projects: BTreeSet<String>,
}

impl ProjectFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn project(key: impl Into<String>) -> Self {
        Self {
            projects: BTreeSet::from([key.into()]),
        }
    }

    /// Derive the filter from `/browse/KEY-1`, `/browse/KEY`,
    /// `/projects/KEY/...`, or the project clauses of a `jql=` query.
    pub fn from_url(url: &str) -> Self {
        let parsed = Url::parse(url).ok();
        let path = parsed
            .as_ref()
            .map(|u| u.path().to_string())
            .unwrap_or_else(|| url.split('?').next().unwrap_or_default().to_string());

        if let Some(caps) = BROWSE_KEY.captures(&path) {
            return Self::project(project_key_of(&caps[1]));
        }
        if let Some(caps) = BROWSE_PROJECT.captures(&path) {
            return Self::project(&caps[1]);
        }
        if let Some(caps) = PROJECT_PATH.captures(&path) {
            return Self::project(&caps[1]);
        }
        parsed
            .and_then(|u| {
                u.query_pairs()
                    .find(|(name, _)| name == "jql")
                    .map(|(_, jql)| Self::from_jql(&jql))
            })
            .unwrap_or_default()
    }

    /// Projects named by `project =` / `project in (...)` clauses. Any
    /// value that is not a project key (numeric ids, functions) widens the
    /// filter to every project rather than dropping that project's rows.
    pub fn from_jql(jql: &str) -> Self {
        let mut projects = BTreeSet::new();
        for caps in JQL_PROJECT.captures_iter(jql) {
            let values: Vec<&str> = match (caps.get(1), caps.get(2)) {
                (Some(single), _) => vec![single.as_str()],
                (None, Some(list)) => list.as_str().split(',').collect(),
                (None, None) => continue,
            };
            for value in values {
                let value = value.trim().trim_matches('"').trim();
                if !JQL_KEY.is_match(value) {
                    return Self::any();
                }
                projects.insert(value.to_ascii_uppercase());
            }
        }
        Self { projects }
    }

    /// Accepted project keys; empty when every project is accepted.
    pub fn projects(&self) -> &BTreeSet<String> {
        &self.projects
    }

    pub fn accepts(&self, issue_key: &str) -> bool {
        self.projects.is_empty() || self.projects.contains(project_key_of(issue_key))
    }
}

/// Key attribute on `el` itself, spelled either way Jira renders it.
pub fn key_attr(el: ElementRef<'_>) -> Option<&str> {
    dom::attr(el, "data-issue-key").or_else(|| dom::attr(el, "data-issuekey"))
}

/// Issue key in an anchor's `href`, if it points at `/browse/<KEY>`.
pub fn browse_key(el: ElementRef<'_>) -> Option<String> {
    dom::attr(el, "href")
        .and_then(|href| BROWSE_KEY.captures(href))
        .map(|caps| caps[1].to_string())
}

fn accepted(candidate: &str, probe: &Probe<'_>) -> Option<String> {
    let key = candidate.trim().to_ascii_uppercase();
    (ISSUE_KEY_EXACT.is_match(&key) && probe.ctx.filter.accepts(&key)).then_some(key)
}

/// Strategy 1: explicit `data-issue-key` on the element or a shallow descendant.
pub fn key_from_attribute(probe: &Probe<'_>) -> Option<String> {
    let mut found = None;
    dom::walk(probe.el, probe.ctx.options.link_depth, |el, _| {
        if let Some(key) = key_attr(el).and_then(|k| accepted(k, probe)) {
            found = Some(key);
            return Visit::Stop;
        }
        Visit::Descend
    });
    found
}

/// Strategy 2: `/browse/<KEY>` link targets within the subtree.
pub fn key_from_browse_links(probe: &Probe<'_>) -> Option<String> {
    dom::anchors(probe.el, probe.ctx.options.link_depth)
        .into_iter()
        .filter_map(browse_key)
        .find_map(|k| accepted(&k, probe))
}

/// Strategy 3: any key-shaped token in the visible text.
pub fn key_from_text(probe: &Probe<'_>) -> Option<String> {
    let text = dom::text_of(probe.el);
    ISSUE_KEY
        .captures_iter(&text)
        .find_map(|caps| accepted(&caps[1], probe))
}

pub const ISSUE_KEY_STRATEGIES: &[Strategy<String>] = &[
    Strategy {
        name: "key-attribute",
        run: key_from_attribute,
    },
    Strategy {
        name: "key-browse-link",
        run: key_from_browse_links,
    },
    Strategy {
        name: "key-text",
        run: key_from_text,
    },
];

/// Recover the issue key for a candidate element.
pub fn issue_key(probe: &Probe<'_>) -> Option<String> {
    first_match(ISSUE_KEY_STRATEGIES, probe)
}

/// Distinct accepted keys linked from the subtree via `/browse/` anchors.
pub fn linked_keys(probe: &Probe<'_>) -> BTreeSet<String> {
    dom::anchors(probe.el, probe.ctx.options.link_depth)
        .into_iter()
        .filter_map(browse_key)
        .filter(|k| probe.ctx.filter.accepts(k))
        .collect()
}

/// Distinct accepted keys in the subtree's visible text.
pub fn text_keys(probe: &Probe<'_>) -> BTreeSet<String> {
    let text = dom::text_of(probe.el);
    ISSUE_KEY
        .captures_iter(&text)
        .map(|caps| caps[1].to_string())
        .filter(|k| probe.ctx.filter.accepts(k))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{ExtractContext, ExtractOptions};
    use scraper::Html;

    fn ctx(url: &str) -> ExtractContext {
        ExtractContext::new(url, ExtractOptions::default())
    }

    fn first_tr(doc: &Html) -> ElementRef<'_> {
        dom::descendants(doc.root_element(), 30)
            .into_iter()
            .find(|e| dom::tag(*e) == "tr")
            .unwrap()
    }

    fn projects(url: &str) -> Vec<String> {
        ProjectFilter::from_url(url).projects().iter().cloned().collect()
    }

    #[test]
    fn filter_from_urls() {
        assert_eq!(projects("https://x.atlassian.net/browse/ABC-12"), vec!["ABC"]);
        assert_eq!(projects("https://x.atlassian.net/browse/ABC"), vec!["ABC"]);
        assert_eq!(
            projects("https://x.atlassian.net/jira/software/projects/OPS/issues"),
            vec!["OPS"]
        );
        assert_eq!(
            projects("https://x.atlassian.net/issues/?jql=project%20%3D%20web"),
            vec!["WEB"]
        );
        assert!(projects("https://x.atlassian.net/jira/projects").is_empty());
    }

    #[test]
    fn jql_project_lists_accept_every_listed_project() {
        let filter =
            ProjectFilter::from_url("https://x.atlassian.net/issues/?jql=project%20in%20(ABC,%20def)");
        assert_eq!(
            filter.projects().iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["ABC", "DEF"]
        );
        assert!(filter.accepts("ABC-1"));
        assert!(filter.accepts("DEF-2"));
        assert!(!filter.accepts("OPS-3"));

        let filter = ProjectFilter::from_jql(r#"project = "ABC" OR project = OPS ORDER BY key"#);
        assert!(filter.accepts("ABC-1"));
        assert!(filter.accepts("OPS-1"));
        assert!(!filter.accepts("DEF-1"));
    }

    #[test]
    fn jql_without_plain_project_keys_accepts_everything() {
        assert_eq!(ProjectFilter::from_jql("project in (10000, ABC)"), ProjectFilter::any());
        assert_eq!(ProjectFilter::from_jql("project != ABC"), ProjectFilter::any());
        assert_eq!(ProjectFilter::from_jql("status = Open"), ProjectFilter::any());
    }

    #[test]
    fn listed_projects_survive_row_extraction() {
        let html = r#"<table><tbody>
            <tr data-issue-key="ABC-1"><td><a href="/browse/ABC-1">First</a></td></tr>
            <tr data-issue-key="DEF-1"><td><a href="/browse/DEF-1">Second</a></td></tr>
            <tr data-issue-key="DEF-2"><td><a href="/browse/DEF-2">Third</a></td></tr>
        </tbody></table>"#;
        let doc = Html::parse_document(html);
        let c = ctx("https://x.atlassian.net/issues/?jql=project%20in%20(ABC%2C%20DEF)");
        let records = crate::extract::rows::extract_rows(doc.root_element(), &c);
        let keys: Vec<&str> = records
            .iter()
            .filter_map(|r| r.text(crate::record::Field::Key))
            .collect();
        assert_eq!(keys, vec!["ABC-1", "DEF-1", "DEF-2"]);
    }

    #[test]
    fn attribute_wins_over_links() {
        let doc = Html::parse_document(
            r#"<table><tr data-issue-key="ABC-7"><td><a href="/browse/ABC-9">x</a></td></tr></table>"#,
        );
        let c = ctx("");
        let probe = Probe::new(first_tr(&doc), &c);
        assert_eq!(issue_key(&probe).as_deref(), Some("ABC-7"));
    }

    #[test]
    fn falls_back_to_links_then_text() {
        let c = ctx("");
        let doc = Html::parse_document(
            r#"<table><tr><td><a href="https://x/browse/OPS-3">Open</a></td></tr></table>"#,
        );
        assert_eq!(issue_key(&Probe::new(first_tr(&doc), &c)).as_deref(), Some("OPS-3"));

        let doc = Html::parse_document(r#"<table><tr><td>See OPS-44 for details</td></tr></table>"#);
        assert_eq!(issue_key(&Probe::new(first_tr(&doc), &c)).as_deref(), Some("OPS-44"));
    }

    #[test]
    fn filter_keeps_only_active_project() {
        let html = r#"<table><tr>
            <td><a href="/browse/OTHER-1">OTHER-1</a></td>
            <td><a href="/browse/ABC-5">ABC-5</a></td>
        </tr></table>"#;
        let doc = Html::parse_document(html);

        let c = ctx("https://x.atlassian.net/jira/software/projects/ABC/issues");
        assert_eq!(issue_key(&Probe::new(first_tr(&doc), &c)).as_deref(), Some("ABC-5"));

        let c = ctx("https://x.atlassian.net/jira/software/projects/ZZZ/issues");
        assert_eq!(issue_key(&Probe::new(first_tr(&doc), &c)), None);
    }

    #[test]
    fn link_search_is_depth_bounded() {
        let doc = Html::parse_document(
            r#"<table><tr><td><div><div><div><div><div><a href="/browse/ABC-1">deep</a></div></div></div></div></div></td></tr></table>"#,
        );
        let c = ctx("");
        let probe = Probe::new(first_tr(&doc), &c);
        assert_eq!(key_from_browse_links(&probe), None);
        assert_eq!(key_from_text(&probe), None);
    }
}
