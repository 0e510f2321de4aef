//! Site-agnostic product field extraction.
//!
//! Each field has an ordered list of rules; the first rule that yields a
//! non-empty value wins. Structured data (JSON-LD, Open Graph, microdata) is
//! preferred over class-name guesses, which are preferred over scanning text.

use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use url::Url;

use super::price::{find_marked_price, normalize_currency, parse_price, ParsedPrice};
use super::ScrapeError;
use crate::models::{Availability, ExtractedProduct};

const UNKNOWN_NAME: &str = "Unknown Product";
const DEFAULT_CURRENCY: &str = "USD";
const MAX_DESCRIPTION_CHARS: usize = 500;

const NAME_SELECTORS: &[&str] = &[
    "[itemprop=\"name\"]",
    "h1",
    ".product-title",
    "#product-title",
    ".product-name",
];
const PRICE_META_SELECTORS: &[&str] = &[
    "meta[property=\"product:price:amount\"]",
    "meta[property=\"og:price:amount\"]",
];
const PRICE_ELEMENT_SELECTORS: &[&str] = &[
    ".price",
    "#price",
    ".product-price",
    ".a-price .a-offscreen",
];
const CURRENCY_META_SELECTORS: &[&str] = &[
    "meta[property=\"product:price:currency\"]",
    "meta[property=\"og:price:currency\"]",
];
const IMAGE_ELEMENT_SELECTORS: &[&str] = &[
    ".product-image img",
    "#product-image",
    ".main-image",
];
const DESCRIPTION_META_SELECTORS: &[&str] = &[
    "meta[name=\"description\"]",
    "meta[property=\"og:description\"]",
];
const DESCRIPTION_ELEMENT_SELECTORS: &[&str] = &[
    "[itemprop=\"description\"]",
    ".product-description",
    "#product-description",
];

const OUT_OF_STOCK_PHRASES: &[&str] = &[
    "out of stock",
    "sold out",
    "currently unavailable",
    "no longer available",
];
const PREORDER_PHRASES: &[&str] = &["pre-order", "preorder"];
const IN_STOCK_PHRASES: &[&str] = &["in stock", "add to cart", "add to basket", "buy now"];

/// Compiled selectors for every field rule.
pub struct Extractor {
    jsonld: Vec<Selector>,
    og_title: Vec<Selector>,
    title: Vec<Selector>,
    names: Vec<Selector>,
    price_meta: Vec<Selector>,
    itemprop_price: Vec<Selector>,
    price_elements: Vec<Selector>,
    currency_meta: Vec<Selector>,
    itemprop_currency: Vec<Selector>,
    og_image: Vec<Selector>,
    itemprop_image: Vec<Selector>,
    image_elements: Vec<Selector>,
    description_meta: Vec<Selector>,
    description_elements: Vec<Selector>,
    itemprop_availability: Vec<Selector>,
    availability_meta: Vec<Selector>,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor {
    pub fn new() -> Self {
        Self {
            jsonld: compile_selectors(&["script[type=\"application/ld+json\"]"]),
            og_title: compile_selectors(&["meta[property=\"og:title\"]"]),
            title: compile_selectors(&["title"]),
            names: compile_selectors(NAME_SELECTORS),
            price_meta: compile_selectors(PRICE_META_SELECTORS),
            itemprop_price: compile_selectors(&["[itemprop=\"price\"]"]),
            price_elements: compile_selectors(PRICE_ELEMENT_SELECTORS),
            currency_meta: compile_selectors(CURRENCY_META_SELECTORS),
            itemprop_currency: compile_selectors(&["[itemprop=\"priceCurrency\"]"]),
            og_image: compile_selectors(&["meta[property=\"og:image\"]"]),
            itemprop_image: compile_selectors(&["[itemprop=\"image\"]"]),
            image_elements: compile_selectors(IMAGE_ELEMENT_SELECTORS),
            description_meta: compile_selectors(DESCRIPTION_META_SELECTORS),
            description_elements: compile_selectors(DESCRIPTION_ELEMENT_SELECTORS),
            itemprop_availability: compile_selectors(&["[itemprop=\"availability\"]"]),
            availability_meta: compile_selectors(&["meta[property=\"product:availability\"]"]),
        }
    }

    /// Extract a product record from `html` fetched from `source_url`.
    ///
    /// Fails with [`ScrapeError::Extraction`] when no positive price is found.
    pub fn extract(&self, html: &str, source_url: &Url) -> Result<ExtractedProduct, ScrapeError> {
        let document = Html::parse_document(html);
        let ld = self.json_ld_product(&document);

        let parsed = self.extract_price(&document, ld.as_ref()).ok_or_else(|| {
            ScrapeError::Extraction(format!(
                "Could not find a price on {}",
                source_url.as_str()
            ))
        })?;

        let currency = self
            .extract_currency(&document, ld.as_ref())
            .or(parsed.currency)
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());

        let name = self
            .extract_name(&document, ld.as_ref())
            .unwrap_or_else(|| UNKNOWN_NAME.to_string());

        let product = ExtractedProduct {
            url: source_url.to_string(),
            name,
            price: parsed.amount,
            currency,
            image_url: self.extract_image(&document, ld.as_ref(), source_url),
            description: self.extract_description(&document, ld.as_ref()),
            retailer: retailer_from_url(source_url),
            category: None,
            availability: self.extract_availability(&document, ld.as_ref()),
        };

        tracing::debug!(
            url = %source_url,
            name = %product.name,
            price = %product.price,
            currency = %product.currency,
            "Extracted product fields"
        );

        Ok(product)
    }

    fn extract_name(&self, doc: &Html, ld: Option<&Value>) -> Option<String> {
        ld.and_then(|p| json_str(p, "name"))
            .or_else(|| meta_content(doc, &self.og_title))
            .or_else(|| first_text(doc, &self.names))
            .or_else(|| first_text(doc, &self.title))
    }

    fn extract_price(&self, doc: &Html, ld: Option<&Value>) -> Option<ParsedPrice> {
        let from_ld = ld.and_then(json_ld_offer_price);
        let from_meta = || {
            self.price_meta.iter().find_map(|sel| {
                meta_content(doc, std::slice::from_ref(sel)).and_then(|c| parse_machine_price(&c))
            })
        };
        let from_itemprop = || {
            select_all(doc, &self.itemprop_price).find_map(|el| {
                match el.value().attr("content") {
                    Some(content) => parse_machine_price(content),
                    None => parse_price(&element_text(&el)),
                }
            })
        };
        let from_elements = || {
            self.price_elements.iter().find_map(|sel| {
                doc.select(sel)
                    .find_map(|el| parse_price(&element_text(&el)).filter(is_positive))
            })
        };
        let from_text = || find_marked_price(&visible_text(doc));

        from_ld
            .filter(is_positive)
            .or_else(|| from_meta().filter(is_positive))
            .or_else(|| from_itemprop().filter(is_positive))
            .or_else(from_elements)
            .or_else(from_text)
    }

    fn extract_currency(&self, doc: &Html, ld: Option<&Value>) -> Option<String> {
        ld.and_then(|p| {
            offers(p)
                .into_iter()
                .find_map(|o| json_str(o, "priceCurrency"))
        })
        .and_then(|c| normalize_currency(&c))
        .or_else(|| {
            self.currency_meta.iter().find_map(|sel| {
                meta_content(doc, std::slice::from_ref(sel)).and_then(|c| normalize_currency(&c))
            })
        })
        .or_else(|| {
            select_all(doc, &self.itemprop_currency).find_map(|el| {
                let raw = el
                    .value()
                    .attr("content")
                    .map(str::to_string)
                    .unwrap_or_else(|| element_text(&el));
                normalize_currency(&raw)
            })
        })
    }

    fn extract_image(&self, doc: &Html, ld: Option<&Value>, base: &Url) -> Option<String> {
        let candidates = ld
            .and_then(json_ld_image)
            .into_iter()
            .chain(meta_content(doc, &self.og_image))
            .chain(select_all(doc, &self.itemprop_image).find_map(|el| {
                let v = el.value();
                v.attr("content").or(v.attr("src")).or(v.attr("href")).map(str::to_string)
            }))
            .chain(self.image_elements.iter().find_map(|sel| {
                doc.select(sel).find_map(|el| {
                    let v = el.value();
                    v.attr("src").or(v.attr("data-src")).map(str::to_string)
                })
            }));

        candidates
            .filter_map(|src| resolve_http_url(base, &src))
            .next()
    }

    fn extract_description(&self, doc: &Html, ld: Option<&Value>) -> Option<String> {
        meta_content(doc, &self.description_meta)
            .or_else(|| ld.and_then(|p| json_str(p, "description")))
            .or_else(|| first_text(doc, &self.description_elements))
            .map(|d| truncate_chars(&collapse_whitespace(&d), MAX_DESCRIPTION_CHARS))
            .filter(|d| !d.is_empty())
    }

    fn extract_availability(&self, doc: &Html, ld: Option<&Value>) -> Availability {
        let structured = ld
            .and_then(|p| {
                offers(p)
                    .into_iter()
                    .find_map(|o| json_str(o, "availability"))
            })
            .or_else(|| {
                select_all(doc, &self.itemprop_availability).find_map(|el| {
                    let v = el.value();
                    v.attr("href")
                        .or(v.attr("content"))
                        .map(str::to_string)
                        .or_else(|| Some(element_text(&el)))
                })
            })
            .or_else(|| meta_content(doc, &self.availability_meta))
            .map(|raw| availability_from_schema(&raw))
            .filter(|a| *a != Availability::Unknown);

        structured.unwrap_or_else(|| availability_from_text(&visible_text(doc)))
    }

    /// Find the first schema.org `Product` node across all JSON-LD blocks.
    fn json_ld_product(&self, doc: &Html) -> Option<Value> {
        select_all(doc, &self.jsonld).find_map(|script| {
            let raw: String = script.text().collect();
            match serde_json::from_str::<Value>(raw.trim()) {
                Ok(value) => find_product_node(&value).cloned(),
                Err(e) => {
                    tracing::debug!("Skipping malformed JSON-LD block: {}", e);
                    None
                }
            }
        })
    }
}

/// Compile selector strings, skipping any that fail to parse.
fn compile_selectors(css: &[&str]) -> Vec<Selector> {
    css.iter()
        .filter_map(|s| match Selector::parse(s) {
            Ok(sel) => Some(sel),
            Err(e) => {
                tracing::warn!("Failed to compile selector '{}': {}", s, e);
                None
            }
        })
        .collect()
}

fn is_positive(p: &ParsedPrice) -> bool {
    p.amount > Decimal::ZERO
}

/// Parse a machine-formatted amount (`"1299.00"`, `19.5`), falling back to the heuristic parser.
fn parse_machine_price(raw: &str) -> Option<ParsedPrice> {
    let trimmed = raw.trim();
    match Decimal::from_str(trimmed) {
        Ok(amount) => Some(ParsedPrice {
            amount: amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
            currency: None,
        }),
        Err(_) => parse_price(trimmed),
    }
}

/// Elements matching any of `selectors`, grouped in selector order.
fn select_all<'a>(
    doc: &'a Html,
    selectors: &'a [Selector],
) -> impl Iterator<Item = ElementRef<'a>> + 'a {
    selectors.iter().flat_map(move |sel| doc.select(sel))
}

/// First non-empty `content` attribute across `selectors`, in selector order.
fn meta_content(doc: &Html, selectors: &[Selector]) -> Option<String> {
    select_all(doc, selectors)
        .filter_map(|el| el.value().attr("content"))
        .map(collapse_whitespace)
        .find(|c| !c.is_empty())
}

fn first_text(doc: &Html, selectors: &[Selector]) -> Option<String> {
    selectors.iter().find_map(|sel| {
        doc.select(sel)
            .map(|el| element_text(&el))
            .find(|t| !t.is_empty())
    })
}

fn element_text(el: &ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<String>())
}

/// Concatenated text of the document outside script, style and template elements.
fn visible_text(doc: &Html) -> String {
    let mut out = String::new();
    for node in doc.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| matches!(e.name(), "script" | "style" | "noscript" | "template"))
        });
        if !hidden {
            out.push_str(text);
            out.push(' ');
        }
    }
    out
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn resolve_http_url(base: &Url, src: &str) -> Option<String> {
    let src = src.trim();
    if src.is_empty() || src.starts_with("data:") {
        return None;
    }
    let resolved = base.join(src).ok()?;
    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}

/// Derive a display retailer name from the host: `www.amazon.co.uk` → `Amazon`.
pub fn retailer_from_url(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    if host.parse::<std::net::IpAddr>().is_ok() || host.starts_with('[') {
        return None;
    }
    let host = host
        .strip_prefix("www.")
        .or_else(|| host.strip_prefix("m."))
        .unwrap_or(host);
    let label = host.split('.').next().filter(|l| !l.is_empty())?;

    let mut chars = label.chars();
    let first = chars.next()?;
    Some(first.to_uppercase().chain(chars).collect())
}

fn availability_from_schema(raw: &str) -> Availability {
    let lower = raw.to_ascii_lowercase();
    if lower.contains("outofstock") || lower.contains("soldout") || lower.contains("discontinued")
    {
        Availability::OutOfStock
    } else if lower.contains("preorder") || lower.contains("presale") || lower.contains("backorder")
    {
        Availability::Preorder
    } else if lower.contains("instock")
        || lower.contains("limitedavailability")
        || lower.contains("onlineonly")
        || lower.contains("instoreonly")
    {
        Availability::InStock
    } else {
        availability_from_text(raw)
    }
}

fn availability_from_text(text: &str) -> Availability {
    let lower = text.to_lowercase();
    if OUT_OF_STOCK_PHRASES.iter().any(|p| lower.contains(p)) {
        Availability::OutOfStock
    } else if PREORDER_PHRASES.iter().any(|p| lower.contains(p)) {
        Availability::Preorder
    } else if IN_STOCK_PHRASES.iter().any(|p| lower.contains(p)) {
        Availability::InStock
    } else {
        Availability::Unknown
    }
}

// ==================== JSON-LD HELPERS ====================

fn is_product_type(node: &Value) -> bool {
    match node.get("@type") {
        Some(Value::String(t)) => t == "Product" || t.ends_with("/Product"),
        Some(Value::Array(types)) => types
            .iter()
            .any(|t| t.as_str().is_some_and(|t| t == "Product")),
        _ => false,
    }
}

fn find_product_node(value: &Value) -> Option<&Value> {
    match value {
        Value::Object(map) => {
            if is_product_type(value) {
                return Some(value);
            }
            if let Some(graph) = map.get("@graph") {
                return find_product_node(graph);
            }
            map.get("mainEntity").and_then(find_product_node)
        }
        Value::Array(items) => items.iter().find_map(find_product_node),
        _ => None,
    }
}

fn json_str(node: &Value, key: &str) -> Option<String> {
    let value = match node.get(key)? {
        Value::String(s) => collapse_whitespace(s),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!value.is_empty()).then_some(value)
}

fn offers(product: &Value) -> Vec<&Value> {
    match product.get("offers") {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(obj @ Value::Object(_)) => {
            // AggregateOffer may nest the individual offers.
            let mut all = vec![obj];
            if let Some(Value::Array(inner)) = obj.get("offers") {
                all.extend(inner.iter());
            }
            all
        }
        _ => Vec::new(),
    }
}

fn json_ld_offer_price(product: &Value) -> Option<ParsedPrice> {
    offers(product).into_iter().find_map(|offer| {
        ["price", "lowPrice"]
            .iter()
            .find_map(|key| json_str(offer, key))
            .and_then(|raw| parse_machine_price(&raw))
            .or_else(|| {
                offer
                    .get("priceSpecification")
                    .and_then(|spec| json_str(spec, "price"))
                    .and_then(|raw| parse_machine_price(&raw))
            })
    })
}

fn json_ld_image(product: &Value) -> Option<String> {
    match product.get("image")? {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.iter().find_map(|item| match item {
            Value::String(s) => Some(s.clone()),
            other => other.get("url").and_then(Value::as_str).map(str::to_string),
        }),
        other => other.get("url").and_then(Value::as_str).map(str::to_string),
    }
}
