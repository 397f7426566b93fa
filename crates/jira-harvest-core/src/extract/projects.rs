//! Projects directory pages.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::ElementRef;

use super::key::PROJECT_KEY;
use super::ExtractContext;
use crate::dom::{self, Visit};
use crate::record::{Field, Record};

static PROJECT_ID_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/projects/(\d+)(?:[/?#]|$)").expect("valid regex"));

static PROJECT_ID_QUERY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?&]pid=(\d+)").expect("valid regex"));

const PROJECT_TYPES: &[&str] = &["software", "business", "service", "product discovery"];

fn is_project_row(el: ElementRef<'_>) -> bool {
    dom::tag(el) == "tr"
        || dom::attr(el, "role") == Some("row")
        || dom::test_id(el)
            .map(|t| t.to_ascii_lowercase().contains("project-row"))
            .unwrap_or(false)
}

fn cells<'a>(row: ElementRef<'a>) -> Vec<ElementRef<'a>> {
    let cells: Vec<ElementRef<'a>> = dom::descendants(row, 3)
        .into_iter()
        .filter(|el| {
            matches!(dom::tag(*el), "td" | "th")
                || matches!(dom::attr(*el, "role"), Some("cell" | "gridcell"))
        })
        .collect();
    if cells.is_empty() {
        dom::element_children(row).collect()
    } else {
        cells
    }
}

fn project_link(row: ElementRef<'_>) -> impl Iterator<Item = ElementRef<'_>> {
    dom::anchors(row, 6).into_iter().filter(|a| {
        dom::attr(*a, "href")
            .map(|h| h.contains("/projects/") || h.contains("/browse/"))
            .unwrap_or(false)
    })
}

fn project_id(row: ElementRef<'_>) -> Option<String> {
    let mut id = None;
    dom::walk(row, 6, |el, _| {
        if let Some(v) = dom::attr(el, "data-project-id") {
            id = Some(v.trim().to_string());
            return Visit::Stop;
        }
        if let Some(href) = dom::attr(el, "href") {
            let caps = PROJECT_ID_PATH
                .captures(href)
                .or_else(|| PROJECT_ID_QUERY.captures(href));
            if let Some(caps) = caps {
                id = Some(caps[1].to_string());
                return Visit::Stop;
            }
        }
        Visit::Descend
    });
    id.filter(|v| !v.is_empty())
}

/// Build the record for one directory row, or `None` when no cell holds a
/// project key (header rows, spacer rows).
pub fn project_record(row: ElementRef<'_>, ctx: &ExtractContext) -> Option<Record> {
    let texts: Vec<String> = cells(row).into_iter().map(dom::text_of).collect();
    let project_key = texts.iter().find(|t| PROJECT_KEY.is_match(t))?.clone();

    let link = project_link(row).find(|a| {
        let text = dom::text_of(*a);
        !text.is_empty() && text != project_key
    });
    let name = link.map(dom::text_of).or_else(|| {
        texts
            .iter()
            .find(|t| !t.is_empty() && **t != project_key)
            .cloned()
    });
    let url = link
        .and_then(|a| dom::attr(a, "href"))
        .and_then(|href| ctx.absolute_url(href))
        .or_else(|| ctx.browse_url(&project_key));
    let project_type = texts
        .iter()
        .find(|t| {
            let lowered = t.to_ascii_lowercase();
            t.chars().count() <= 40 && PROJECT_TYPES.iter().any(|p| lowered.contains(p))
        })
        .cloned();

    let mut record = Record::project();
    record.set(Field::Key, project_key);
    record.set_opt(Field::Id, project_id(row));
    record.set_opt(Field::Name, name);
    record.set_opt(Field::Url, url);
    record.set_opt(Field::ProjectType, project_type);
    Some(record)
}

/// One record per distinct project key, in document order.
pub fn extract_projects(root: ElementRef<'_>, ctx: &ExtractContext) -> Vec<Record> {
    let mut rows = Vec::new();
    dom::walk(root, ctx.options.row_walk_depth, |el, _| {
        if is_project_row(el) {
            rows.push(el);
            return Visit::Skip;
        }
        Visit::Descend
    });

    let mut seen = BTreeSet::new();
    rows.into_iter()
        .filter_map(|row| project_record(row, ctx))
        .filter(|r| {
            r.text(Field::Key)
                .map(|k| seen.insert(k.to_string()))
                .unwrap_or(false)
        })
        .collect()
}
