//! DOM extraction engine.
//!
//! [`HtmlExtractor::parse_html`] dispatches on the classified [`PageType`]
//! and walks the parsed document with page-specific cascades of
//! [`Strategy`] functions. Each field is recovered by trying strategies in
//! priority order until one yields a plausible value; a field nobody finds
//! is simply left out of the [`Record`].
//!
//! | Page type | Module |
//! |-----------|--------|
//! | `issue` | [`issue`] |
//! | `issueList`, `search`, `board` | [`rows`] |
//! | `projectsList` | [`projects`] |

pub mod fields;
pub mod issue;
pub mod key;
pub mod projects;
pub mod rows;

use scraper::{ElementRef, Html};
use thiserror::Error;
use tracing::{debug, info, trace};
use url::Url;

use crate::models::PageType;
use crate::record::Record;

pub use key::ProjectFilter;

/// Default cap on input size accepted by the extractor.
pub const DEFAULT_MAX_HTML_BYTES: usize = 10 * 1024 * 1024;

/// Errors that make a whole page unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("document is empty")]
    Empty,

    #[error("document too large ({len} bytes, max {max})")]
    TooLarge { len: usize, max: usize },

    #[error("document contains no markup")]
    NotMarkup,
}

/// Reject input that cannot be a captured page.
pub fn check_document(html: &str, max_bytes: usize) -> Result<(), ParseError> {
    if html.trim().is_empty() {
        return Err(ParseError::Empty);
    }
    if html.len() > max_bytes {
        return Err(ParseError::TooLarge {
            len: html.len(),
            max: max_bytes,
        });
    }
    if !html.contains('<') {
        return Err(ParseError::NotMarkup);
    }
    Ok(())
}

/// Tuning knobs for the extraction walks.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Depth cap for row discovery and detail-page field searches.
    pub row_walk_depth: usize,
    /// Depth cap when looking for `/browse/` links under a candidate.
    pub link_depth: usize,
    pub max_html_bytes: usize,
    /// Keep the page HTML on issue-detail tickets.
    pub capture_raw_html: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            row_walk_depth: 60,
            link_depth: 5,
            max_html_bytes: DEFAULT_MAX_HTML_BYTES,
            capture_raw_html: false,
        }
    }
}

/// Per-page state shared by every strategy.
#[derive(Debug, Clone)]
pub struct ExtractContext {
    pub page_url: Option<Url>,
    pub filter: ProjectFilter,
    pub options: ExtractOptions,
}

impl ExtractContext {
    pub fn new(url: &str, options: ExtractOptions) -> Self {
        Self {
            page_url: Url::parse(url).ok(),
            filter: ProjectFilter::from_url(url),
            options,
        }
    }

    /// Resolve `href` against the page URL.
    pub fn absolute_url(&self, href: &str) -> Option<String> {
        match &self.page_url {
            Some(base) => base.join(href).ok().map(|u| u.to_string()),
            None => Url::parse(href).ok().map(|u| u.to_string()),
        }
    }

    /// Browse URL for an issue key on the page's host.
    pub fn browse_url(&self, issue_key: &str) -> Option<String> {
        self.absolute_url(&format!("/browse/{}", issue_key))
    }
}

/// What a strategy looks at: one element plus the page context.
pub struct Probe<'a> {
    pub el: ElementRef<'a>,
    pub ctx: &'a ExtractContext,
}

impl<'a> Probe<'a> {
    pub fn new(el: ElementRef<'a>, ctx: &'a ExtractContext) -> Self {
        Self { el, ctx }
    }
}

/// One way of recovering a value. `None` means "not found here, try the
/// next one".
pub struct Strategy<T> {
    pub name: &'static str,
    pub run: fn(&Probe<'_>) -> Option<T>,
}

/// Run strategies in order and return the first value found.
pub fn first_match<T>(strategies: &[Strategy<T>], probe: &Probe<'_>) -> Option<T> {
    strategies.iter().find_map(|s| {
        let found = (s.run)(probe);
        if found.is_some() {
            trace!(strategy = s.name, "strategy matched");
        }
        found
    })
}

/// Page-type dispatching extractor.
#[derive(Debug, Clone, Default)]
pub struct HtmlExtractor {
    options: ExtractOptions,
}

impl HtmlExtractor {
    pub fn new(options: ExtractOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ExtractOptions {
        &self.options
    }

    /// Extract records from a captured page.
    ///
    /// Unrecognized or non-harvestable page types yield an empty vector.
    /// Only a document that cannot be a page at all is an error.
    #[tracing::instrument(skip(self, html, page_type), fields(html_len = html.len(), page_type = %page_type))]
    pub fn parse_html(
        &self,
        html: &str,
        page_type: PageType,
        url: &str,
    ) -> Result<Vec<Record>, ParseError> {
        check_document(html, self.options.max_html_bytes)?;
        if !page_type.is_harvestable() {
            debug!("page type has no extractor");
            return Ok(Vec::new());
        }

        let document = Html::parse_document(html);
        let ctx = ExtractContext::new(url, self.options.clone());
        let root = document.root_element();

        let records = match page_type {
            PageType::Issue => issue::extract_issue(root, html, &ctx).into_iter().collect(),
            PageType::IssueList | PageType::Search | PageType::Board => {
                rows::extract_rows(root, &ctx)
            }
            PageType::ProjectsList => projects::extract_projects(root, &ctx),
            PageType::Generic | PageType::Unknown => Vec::new(),
        };

        if records.is_empty() {
            info!(%page_type, url, "no records extracted");
        } else {
            debug!(count = records.len(), "records extracted");
        }
        Ok(records)
    }
}

/// Extract with default options.
pub fn parse_html(html: &str, page_type: PageType, url: &str) -> Result<Vec<Record>, ParseError> {
    HtmlExtractor::default().parse_html(html, page_type, url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_a_parse_error() {
        assert_eq!(
            parse_html("   ", PageType::IssueList, "https://x.atlassian.net"),
            Err(ParseError::Empty)
        );
    }

    #[test]
    fn plain_text_is_not_markup() {
        assert_eq!(
            parse_html("just words", PageType::Issue, ""),
            Err(ParseError::NotMarkup)
        );
    }

    #[test]
    fn oversized_document_is_rejected() {
        let extractor = HtmlExtractor::new(ExtractOptions {
            max_html_bytes: 10,
            ..Default::default()
        });
        let err = extractor
            .parse_html("<html><body>too long</body></html>", PageType::Issue, "")
            .unwrap_err();
        assert!(matches!(err, ParseError::TooLarge { max: 10, .. }));
    }

    #[test]
    fn unknown_page_type_yields_nothing() {
        let html = r#"<html><body><a href="/browse/ABC-1">ABC-1</a></body></html>"#;
        assert!(parse_html(html, PageType::Unknown, "").unwrap().is_empty());
        assert!(parse_html(html, PageType::Generic, "").unwrap().is_empty());
    }

    #[test]
    fn first_match_stops_at_first_hit() {
        fn never(_: &Probe<'_>) -> Option<String> {
            None
        }
        fn tag_name(p: &Probe<'_>) -> Option<String> {
            Some(p.el.value().name().to_string())
        }
        fn unreachable_strategy(_: &Probe<'_>) -> Option<String> {
            panic!("later strategies must not run")
        }
        let strategies = [
            Strategy { name: "never", run: never },
            Strategy { name: "tag", run: tag_name },
            Strategy { name: "unreachable", run: unreachable_strategy },
        ];
        let doc = Html::parse_fragment("<p>x</p>");
        let ctx = ExtractContext::new("", ExtractOptions::default());
        let probe = Probe::new(doc.root_element(), &ctx);
        assert_eq!(first_match(&strategies, &probe).as_deref(), Some("html"));
    }

    #[test]
    fn browse_url_uses_page_host() {
        let ctx = ExtractContext::new(
            "https://acme.atlassian.net/jira/software/projects/ABC/issues",
            ExtractOptions::default(),
        );
        assert_eq!(
            ctx.browse_url("ABC-9").as_deref(),
            Some("https://acme.atlassian.net/browse/ABC-9")
        );
    }
}
