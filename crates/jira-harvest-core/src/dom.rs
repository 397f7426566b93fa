//! Bounded DOM traversal helpers shared by the classifier and extractors.
//!
//! Every walk is an explicit stack of `(element, depth)` pairs so the cost
//! on deep single-page-application trees is capped by `max_depth` and no
//! recursion is involved.

use scraper::ElementRef;

/// Result of visiting an element during a [`walk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// Keep going into this element's children.
    Descend,
    /// Do not look inside this element.
    Skip,
    /// Abort the whole walk.
    Stop,
}

/// Depth-first, pre-order walk over `root` and its element descendants.
///
/// `root` has depth 0. Elements deeper than `max_depth` are never visited.
/// Children are visited in document order.
pub fn walk<'a, F>(root: ElementRef<'a>, max_depth: usize, mut visit: F)
where
    F: FnMut(ElementRef<'a>, usize) -> Visit,
{
    let mut stack: Vec<(ElementRef<'a>, usize)> = vec![(root, 0)];
    while let Some((el, depth)) = stack.pop() {
        match visit(el, depth) {
            Visit::Stop => return,
            Visit::Skip => continue,
            Visit::Descend => {}
        }
        if depth >= max_depth {
            continue;
        }
        let children: Vec<ElementRef<'a>> = element_children(el).collect();
        for child in children.into_iter().rev() {
            stack.push((child, depth + 1));
        }
    }
}

/// Descendants of `root` (excluding `root`) within `max_depth`, in document order.
pub fn descendants<'a>(root: ElementRef<'a>, max_depth: usize) -> Vec<ElementRef<'a>> {
    let mut out = Vec::new();
    walk(root, max_depth, |el, depth| {
        if depth > 0 {
            out.push(el);
        }
        Visit::Descend
    });
    out
}

/// Direct element children.
pub fn element_children<'a>(el: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    el.children().filter_map(ElementRef::wrap)
}

pub fn element_child_count(el: ElementRef<'_>) -> usize {
    element_children(el).count()
}

/// Visible text with whitespace collapsed. Script and style bodies are skipped.
pub fn text_of(el: ElementRef<'_>) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for node in el.descendants() {
        if let Some(text) = node.value().as_text() {
            let hidden = node
                .parent()
                .and_then(ElementRef::wrap)
                .map(|p| matches!(p.value().name(), "script" | "style" | "template"))
                .unwrap_or(false);
            if !hidden {
                parts.push(text);
            }
        }
    }
    collapse_whitespace(&parts.join(" "))
}

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn tag(el: ElementRef<'_>) -> &str {
    el.value().name()
}

pub fn attr<'a>(el: ElementRef<'a>, name: &str) -> Option<&'a str> {
    el.value().attr(name)
}

/// `data-testid` or `data-test-id`, whichever is present.
pub fn test_id<'a>(el: ElementRef<'a>) -> Option<&'a str> {
    el.value()
        .attr("data-testid")
        .or_else(|| el.value().attr("data-test-id"))
}

pub fn has_class_containing(el: ElementRef<'_>, needle: &str) -> bool {
    el.value()
        .classes()
        .any(|c| c.to_ascii_lowercase().contains(needle))
}

/// Structural marker used to locate a field or container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// `id` attribute equals the value.
    Id(&'static str),
    /// Some class contains the value (case-insensitive).
    Class(&'static str),
    /// `data-testid` / `data-test-id` contains the value.
    TestId(&'static str),
    /// `data-field-id` or `data-field` equals the value.
    FieldId(&'static str),
    /// Named attribute contains the value.
    Attr(&'static str, &'static str),
}

impl Marker {
    pub fn matches(&self, el: ElementRef<'_>) -> bool {
        match *self {
            Marker::Id(id) => attr(el, "id") == Some(id),
            Marker::Class(needle) => has_class_containing(el, needle),
            Marker::TestId(needle) => test_id(el)
                .map(|t| t.to_ascii_lowercase().contains(needle))
                .unwrap_or(false),
            Marker::FieldId(name) => {
                attr(el, "data-field-id") == Some(name) || attr(el, "data-field") == Some(name)
            }
            Marker::Attr(name, needle) => attr(el, name)
                .map(|v| v.to_ascii_lowercase().contains(needle))
                .unwrap_or(false),
        }
    }
}

/// First descendant of `root` (excluding `root`) matching any marker,
/// trying markers in priority order.
pub fn find_marked<'a>(
    root: ElementRef<'a>,
    markers: &[Marker],
    max_depth: usize,
) -> Option<ElementRef<'a>> {
    let nodes = descendants(root, max_depth);
    markers
        .iter()
        .find_map(|m| nodes.iter().copied().find(|el| m.matches(*el)))
}

/// Elements within `max_depth` with no element children and non-empty text.
pub fn leaf_texts(root: ElementRef<'_>, max_depth: usize) -> Vec<String> {
    let mut out = Vec::new();
    walk(root, max_depth, |el, _| {
        if matches!(tag(el), "script" | "style" | "template") {
            return Visit::Skip;
        }
        if element_child_count(el) == 0 {
            let text = text_of(el);
            if !text.is_empty() {
                out.push(text);
            }
        }
        Visit::Descend
    });
    out
}

/// Anchors within `max_depth` of `root`, including `root` itself.
pub fn anchors<'a>(root: ElementRef<'a>, max_depth: usize) -> Vec<ElementRef<'a>> {
    let mut out = Vec::new();
    walk(root, max_depth, |el, _| {
        if tag(el) == "a" && attr(el, "href").is_some() {
            out.push(el);
        }
        Visit::Descend
    });
    out
}

/// Trim, collapse, and reject text longer than `max_chars`.
pub fn bounded(text: &str, max_chars: usize) -> Option<String> {
    let cleaned = collapse_whitespace(text);
    if cleaned.is_empty() || cleaned.chars().count() > max_chars {
        None
    } else {
        Some(cleaned)
    }
}
