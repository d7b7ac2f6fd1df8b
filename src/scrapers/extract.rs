//! HTML to article text, shared by every strategy.
//!
//! All three strategies end with an HTML document, so they share one
//! extraction rule and the oracle sees comparable text whatever the source.

use crate::config::ExtractionConfig;
use crate::utils::{char_count, collapse_whitespace};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Node, Selector};
use tracing::warn;

static H1: Lazy<Selector> = Lazy::new(|| Selector::parse("h1").unwrap());
static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());
static OG_TITLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("meta[property='og:title']").unwrap());

/// Elements whose text never counts as article content.
const SKIPPED_ELEMENTS: &[&str] = &[
    "script", "style", "noscript", "nav", "footer", "header", "aside", "head", "template",
    "iframe", "svg", "form",
];

pub struct ContentExtractor {
    /// `article`, the configured content containers, `main`, `body`.
    regions: Vec<Selector>,
    min_region_chars: usize,
}

impl ContentExtractor {
    pub fn new(config: &ExtractionConfig) -> Self {
        let mut regions = vec!["article".to_string()];
        regions.extend(config.content_selectors.iter().cloned());
        regions.push("main".to_string());
        regions.push("body".to_string());

        let regions = regions
            .iter()
            .filter_map(|s| match Selector::parse(s) {
                Ok(sel) => Some(sel),
                Err(e) => {
                    warn!(selector = %s, error = ?e, "Ignoring invalid content selector");
                    None
                }
            })
            .collect();

        Self {
            regions,
            min_region_chars: config.min_region_chars,
        }
    }

    /// Extract `(title, body_text)` from an HTML document.
    pub fn extract(&self, html: &str) -> (Option<String>, String) {
        let document = Html::parse_document(html);
        (extract_title(&document), self.extract_body(&document))
    }

    /// Text of the first non-empty region, or of the whole page when that
    /// region is too small to be the article.
    fn extract_body(&self, document: &Html) -> String {
        let region = self.regions.iter().find_map(|selector| {
            document
                .select(selector)
                .map(visible_text)
                .find(|text| !text.is_empty())
        });
        match region {
            Some(text) if char_count(&text) >= self.min_region_chars => text,
            _ => visible_text(document.root_element()),
        }
    }
}

fn extract_title(document: &Html) -> Option<String> {
    let text_of =
        |el: ElementRef<'_>| collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "));
    let heading = document
        .select(&H1)
        .filter(|el| !inside_skipped(*el))
        .map(text_of)
        .find(|t| !t.is_empty());
    let title = || document.select(&TITLE).map(text_of).find(|t| !t.is_empty());
    heading.or_else(title).or_else(|| {
        document
            .select(&OG_TITLE)
            .filter_map(|el| el.value().attr("content"))
            .map(collapse_whitespace)
            .find(|t| !t.is_empty())
    })
}

/// Whether `el` sits under a header, nav, aside or other skipped element.
fn inside_skipped(el: ElementRef<'_>) -> bool {
    el.ancestors().any(|node| {
        node.value()
            .as_element()
            .is_some_and(|a| SKIPPED_ELEMENTS.contains(&a.name()))
    })
}

/// Whitespace-collapsed text of `root`, skipping non-content elements.
fn visible_text(root: ElementRef<'_>) -> String {
    let mut out = String::new();
    collect_text(root, &mut out);
    collapse_whitespace(&out)
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                out.push_str(text);
                out.push(' ');
            }
            Node::Element(el) if SKIPPED_ELEMENTS.contains(&el.name()) => {}
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_text(child_el, out);
                }
            }
            _ => {}
        }
    }
}
