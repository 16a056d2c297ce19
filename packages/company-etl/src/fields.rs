//! Company field extraction from captured HTML.
//!
//! The company name comes from the first signal that yields a non-empty value:
//! site-name meta tag, then the first `<h1>`, then `<title>`. Signals are an
//! ordered list of plain functions so other fallbacks can reuse the chain.

use scraper::{ElementRef, Html, Selector};

use crate::types::CompanyRecord;

/// Names that identify a page, not a company.
pub const RESERVED_NAMES: [&str; 3] = ["home", "welcome", "index"];

/// One step of a fallback chain.
pub type Strategy<T> = fn(&T) -> Option<String>;

/// Run `chain` in order and return the first cleaned, non-empty value.
pub fn first_non_empty<T>(input: &T, chain: &[Strategy<T>]) -> Option<String> {
    chain
        .iter()
        .filter_map(|strategy| strategy(input))
        .map(|value| clean(&value))
        .find(|value| !value.is_empty())
}

/// Company-name signals, most specific first.
pub const NAME_STRATEGIES: [Strategy<Html>; 3] = [site_name_meta, first_h1_text, title_text];

/// Replace newline, carriage return and tab with spaces, then trim.
pub fn clean(value: &str) -> String {
    value
        .replace(['\n', '\r', '\t'], " ")
        .trim()
        .to_string()
}

pub fn is_reserved_name(name: &str) -> bool {
    RESERVED_NAMES
        .iter()
        .any(|reserved| name.eq_ignore_ascii_case(reserved))
}

/// Name and industry pulled from one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanyFields {
    pub company_name: String,
    pub industry: String,
}

/// Extract fields from a page body.
///
/// Returns `None` when no usable company name is found.
pub fn extract_fields(html: &str) -> Option<CompanyFields> {
    let document = Html::parse_document(html);

    let company_name = first_non_empty(&document, &NAME_STRATEGIES)?;
    if is_reserved_name(&company_name) {
        return None;
    }

    let industry = keywords_meta(&document)
        .map(|k| clean(&k))
        .unwrap_or_default();

    Some(CompanyFields {
        company_name,
        industry,
    })
}

/// Build a crawl record for `root_url` from a page body.
pub fn company_record(root_url: &str, html: &str) -> Option<CompanyRecord> {
    let root_url = clean(root_url);
    if root_url.is_empty() {
        return None;
    }

    extract_fields(html).map(|fields| CompanyRecord {
        root_url,
        company_name: fields.company_name,
        industry: fields.industry,
    })
}

fn site_name_meta(document: &Html) -> Option<String> {
    meta_content(document, "property", "og:site_name")
}

fn keywords_meta(document: &Html) -> Option<String> {
    meta_content(document, "name", "keywords")
}

fn first_h1_text(document: &Html) -> Option<String> {
    first_element_text(document, "h1")
}

fn title_text(document: &Html) -> Option<String> {
    first_element_text(document, "title")
}

/// `content` of the first `<meta>` whose `attr` equals `value` (ASCII case-insensitive).
fn meta_content(document: &Html, attr: &str, value: &str) -> Option<String> {
    let selector = Selector::parse("meta").ok()?;
    document
        .select(&selector)
        .find(|el| {
            el.value()
                .attr(attr)
                .map(|v| v.trim().eq_ignore_ascii_case(value))
                .unwrap_or(false)
        })
        .and_then(|el| el.value().attr("content"))
        .map(str::to_string)
}

fn first_element_text(document: &Html, tag: &str) -> Option<String> {
    let selector = Selector::parse(tag).ok()?;
    document.select(&selector).next().map(element_text)
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>()
}
