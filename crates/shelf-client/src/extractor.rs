//! HTML extraction with `scraper` and `regex`.
//!
//! Each page kind runs a cascade: embedded JSON-LD first, then page-specific
//! selectors and hydration state, then a plain-text scan. Tiers are merged
//! field by field, so the first tier that yields a field wins it.

use std::collections::HashSet;
use std::sync::Arc;

use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use serde_json::{Value, json};

use shelf_core::error::AppError;
use shelf_core::fields::{collect_strs, first_array, first_f64, first_present, first_str, lookup};
use shelf_core::models::ProductFields;
use shelf_core::traits::HtmlExtractor;
use shelf_core::util::normalize_sku;

const BESTSELLER_TITLES: &[&str] = &[
    "Hity sprzedaży",
    "Najpopularniejsze produkty",
    "Bestsellers",
    "Popular products",
    "Хиты продаж",
    "Hity",
];

const MATERIAL_KEYWORDS: &[&str] = &[
    "lite drewno",
    "drewno",
    "sklejka",
    "płyta wiórowa",
    "płyta pilśniowa",
    "bambus",
    "stal nierdzewna",
    "stal",
    "aluminium",
    "metal",
    "szkło hartowane",
    "szkło",
    "ceramika",
    "kamionka",
    "porcelana",
    "polipropylen",
    "poliester",
    "plastik",
    "bawełna",
    "len",
    "wełna",
    "skóra",
];

const MAX_MATERIALS: usize = 5;
const POPULAR_LINK_SCAN: usize = 30;
const FALLBACK_PRODUCT_LINKS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModalSection {
    Materials,
    Care,
    Safety,
    GoodToKnow,
}

impl ModalSection {
    fn classify(label: &str) -> Option<Self> {
        let label = label.to_lowercase();
        if label.contains("dobrze wiedzieć") || label.contains("good to know") {
            Some(Self::GoodToKnow)
        } else if label.contains("bezpieczeństw") || label.contains("safety") {
            Some(Self::Safety)
        } else if label.starts_with("materia") {
            Some(Self::Materials)
        } else if label.contains("pielęgnac")
            || label.contains("konserwac")
            || label.starts_with("care")
        {
            Some(Self::Care)
        } else {
            None
        }
    }
}

struct Patterns {
    weight: Regex,
    dimensions: Regex,
    materials: Regex,
    product_link: Regex,
    category_link: Regex,
}

/// Best-effort extractor over server-rendered (or browser-rendered) HTML.
#[derive(Clone)]
pub struct ScraperExtractor {
    patterns: Arc<Patterns>,
    base_url: String,
}

impl ScraperExtractor {
    /// `base_url` absolutizes relative category links, e.g. `https://www.ikea.com`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, AppError> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| AppError::Generic(format!("Invalid extractor pattern: {e}")))
        };

        let patterns = Patterns {
            weight: compile(r"(?i)(\d+[.,]?\d*)\s*kg\b")?,
            dimensions: compile(concat!(
                r"(\d+(?:[.,]\d+)?)\s*[×xX]\s*(\d+(?:[.,]\d+)?)",
                r"\s*[×xX]\s*(\d+(?:[.,]\d+)?)(?:\s*(cm|mm)\b)?",
            ))?,
            materials: compile(&format!(r"(?i)\b({})\b", MATERIAL_KEYWORDS.join("|")))?,
            product_link: compile(r"/p/(?:[^/?#]*-)?(s?\d{8})(?:[/?#]|$)")?,
            category_link: compile(r"/cat/([^/?#]+)")?,
        };

        Ok(Self {
            patterns: Arc::new(patterns),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn absolute(&self, href: &str) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            href.to_string()
        } else {
            format!("{}/{}", self.base_url, href.trim_start_matches('/'))
        }
    }

    fn text_scan(&self, text: &str) -> ProductFields {
        let weight = self
            .patterns
            .weight
            .captures(text)
            .and_then(|c| shelf_core::fields::parse_decimal(&c[1]));

        let dimensions = self.patterns.dimensions.captures(text).map(|c| {
            let triple = format!("{} × {} × {}", &c[1], &c[2], &c[3]);
            match c.get(4) {
                Some(unit) => format!("{triple} {}", unit.as_str()),
                None => triple,
            }
        });

        let mut seen = Vec::new();
        for m in self.patterns.materials.find_iter(text) {
            let word = m.as_str().to_lowercase();
            if !seen.contains(&word) {
                seen.push(word);
            }
            if seen.len() == MAX_MATERIALS {
                break;
            }
        }
        let materials = (!seen.is_empty()).then(|| seen.join(", "));

        ProductFields {
            weight,
            dimensions,
            materials,
            ..ProductFields::default()
        }
    }

    fn skus_in(&self, scope: ElementRef<'_>, link_limit: usize, out: &mut Vec<String>) {
        for el in select_all(scope, "[data-product-id], [data-sku], [data-item-no]") {
            let value = el.value();
            if let Some(raw) = value
                .attr("data-product-id")
                .or_else(|| value.attr("data-sku"))
                .or_else(|| value.attr("data-item-no"))
            {
                push_unique(out, normalize_sku(raw));
            }
        }

        for link in select_all(scope, r#"a[href*="/p/"]"#).into_iter().take(link_limit) {
            let href = link.value().attr("href");
            if let Some(caps) = href.and_then(|h| self.patterns.product_link.captures(h)) {
                push_unique(out, caps[1].to_string());
            }
        }
    }
}

impl HtmlExtractor for ScraperExtractor {
    fn product_fields(&self, html: &str) -> ProductFields {
        let doc = Html::parse_document(html);
        let mut fields = ProductFields::default();

        // Tier 1: structured data.
        let mut products = Vec::new();
        for block in json_ld_blocks(&doc) {
            ld_products(&block, &mut products);
        }
        if let Some(product) = products.first() {
            fields.merge(fields_from_ld(product));
        }

        // Tier 2: selectors and hydration state.
        for props in hydration_props(&doc) {
            fields.merge(fields_from_hydration(&props));
        }
        fields.merge(fields_from_selectors(&doc));
        fields.merge(modal_sections(&doc));

        // Tier 3: free text.
        fields.merge(self.text_scan(&visible_text(&doc)));

        fields
    }

    fn category_products(&self, html: &str) -> Vec<Value> {
        let doc = Html::parse_document(html);

        let mut found = Vec::new();
        for block in json_ld_blocks(&doc) {
            ld_products(&block, &mut found);
        }
        let mut items: Vec<Value> = found.iter().filter_map(summary_from_ld).collect();

        if items.is_empty() {
            let mut nodes = Vec::new();
            for state in page_state(&doc).into_iter().chain(hydration_props(&doc)) {
                product_nodes(&state, &mut nodes);
            }
            items = nodes;
        }

        if items.is_empty() {
            items = product_tiles(&doc);
        }

        let mut seen = HashSet::new();
        items.retain(|item| match first_str(item, &[&["sku"], &["id"], &["itemNo"]]) {
            Some(key) => seen.insert(key),
            None => false,
        });
        items
    }

    fn bestseller_skus(&self, html: &str) -> Vec<String> {
        let doc = Html::parse_document(html);
        let mut skus = Vec::new();

        if let Some(section) = find_section(&doc, BESTSELLER_TITLES) {
            self.skus_in(section, usize::MAX, &mut skus);

            for script in select_all(section, r#"script[type="application/ld+json"]"#) {
                let text = script.text().collect::<String>();
                if let Ok(data) = serde_json::from_str::<Value>(&text) {
                    let mut products = Vec::new();
                    ld_products(&data, &mut products);
                    for product in products {
                        let sku = first_str(&product, &[&["mpn"], &["sku"], &["productID"]]);
                        if let Some(sku) = sku {
                            push_unique(&mut skus, normalize_sku(&sku));
                        }
                    }
                }
            }
        }

        if skus.is_empty() {
            tracing::debug!("No bestseller section, scanning the whole page");
            self.skus_in(doc.root_element(), FALLBACK_PRODUCT_LINKS, &mut skus);
        }

        skus.retain(|s| !s.is_empty());
        skus
    }

    fn popular_category_ids(&self, html: &str) -> Vec<String> {
        let doc = Html::parse_document(html);
        let mut ids = Vec::new();

        let links = select_all(doc.root_element(), r#"a[href*="/cat/"]"#);
        for link in links.into_iter().take(POPULAR_LINK_SCAN) {
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            let Some(caps) = self.patterns.category_link.captures(href) else {
                continue;
            };
            let slug = &caps[1];
            if slug.chars().all(|c| c.is_ascii_digit()) {
                push_unique(&mut ids, slug.to_string());
            } else {
                push_unique(&mut ids, self.absolute(href));
            }
        }

        // UUID ids never match a stored category, only numeric ones are kept.
        for el in select_all(doc.root_element(), "[data-category-id], [data-categoryid]") {
            let value = el.value();
            let id = value
                .attr("data-category-id")
                .or_else(|| value.attr("data-categoryid"));
            if let Some(id) = id {
                let id = id.trim();
                if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) {
                    push_unique(&mut ids, id.to_string());
                }
            }
        }

        ids
    }
}

// ---------------------------------------------------------------------------
// DOM helpers
// ---------------------------------------------------------------------------

fn select_all<'a>(scope: ElementRef<'a>, css: &str) -> Vec<ElementRef<'a>> {
    match Selector::parse(css) {
        Ok(selector) => scope.select(&selector).collect(),
        Err(e) => {
            tracing::warn!(css, error = ?e, "Invalid selector");
            Vec::new()
        }
    }
}

fn first_match<'a>(scope: ElementRef<'a>, css: &str) -> Option<ElementRef<'a>> {
    select_all(scope, css).into_iter().next()
}

fn clean_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn non_empty(text: String) -> Option<String> {
    (!text.is_empty()).then_some(text)
}

fn push_unique(out: &mut Vec<String>, value: String) {
    if !value.is_empty() && !out.contains(&value) {
        out.push(value);
    }
}

/// Text nodes outside `script`, `style` and `noscript`.
fn visible_text(doc: &Html) -> String {
    let mut out = String::new();
    for node in doc.root_element().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element())
            .is_some_and(|e| matches!(e.name(), "script" | "style" | "noscript"));
        if !hidden {
            out.push_str(text);
            out.push(' ');
        }
    }
    out
}

/// Parent container of the first `h2`/`h3` whose text contains one of `titles`.
fn find_section<'a>(doc: &'a Html, titles: &[&str]) -> Option<ElementRef<'a>> {
    let headings = select_all(doc.root_element(), "h2, h3");
    titles.iter().find_map(|title| {
        headings
            .iter()
            .find(|h| clean_text(**h).contains(title))
            .and_then(|h| h.parent())
            .and_then(ElementRef::wrap)
    })
}

// ---------------------------------------------------------------------------
// Tier 1: JSON-LD
// ---------------------------------------------------------------------------

fn json_ld_blocks(doc: &Html) -> Vec<Value> {
    select_all(doc.root_element(), r#"script[type="application/ld+json"]"#)
        .into_iter()
        .filter_map(|script| {
            let raw: String = script.text().collect();
            serde_json::from_str(raw.trim()).ok()
        })
        .collect()
}

fn has_type(value: &Value, wanted: &str) -> bool {
    match value.get("@type") {
        Some(Value::String(t)) => t == wanted,
        Some(Value::Array(types)) => types.iter().any(|t| t.as_str() == Some(wanted)),
        _ => false,
    }
}

/// Collects `Product` nodes from plain objects, arrays, `@graph` and `ItemList`.
fn ld_products(value: &Value, out: &mut Vec<Value>) {
    match value {
        Value::Array(items) => items.iter().for_each(|v| ld_products(v, out)),
        Value::Object(map) => {
            if has_type(value, "Product") {
                out.push(value.clone());
                return;
            }
            if let Some(graph) = map.get("@graph") {
                ld_products(graph, out);
            }
            if let Some(Value::Array(elements)) = map.get("itemListElement") {
                for element in elements {
                    ld_products(element.get("item").unwrap_or(element), out);
                }
            }
        }
        _ => {}
    }
}

fn ld_images(product: &Value) -> Vec<String> {
    match product.get("image") {
        Some(Value::String(url)) => vec![url.clone()],
        Some(Value::Array(items)) => collect_strs(items, &[&["url"], &["contentUrl"]]),
        Some(other) => first_str(other, &[&["url"], &["contentUrl"]]).into_iter().collect(),
        None => Vec::new(),
    }
}

fn ld_price(product: &Value) -> Option<f64> {
    first_f64(
        product,
        &[
            &["offers", "price"],
            &["offers", "0", "price"],
            &["offers", "lowPrice"],
        ],
    )
}

fn fields_from_ld(product: &Value) -> ProductFields {
    ProductFields {
        name: first_str(product, &[&["name"]]),
        sku: first_str(product, &[&["mpn"], &["sku"], &["productID"]]),
        price: ld_price(product),
        images: ld_images(product),
        description: first_str(product, &[&["description"]]),
        ..ProductFields::default()
    }
}

/// Category tile in the search API's product shape.
fn summary_from_ld(product: &Value) -> Option<Value> {
    let sku = first_str(product, &[&["mpn"], &["sku"], &["productID"]])?;
    let images = ld_images(product);
    let name = first_str(product, &[&["name"]]);
    Some(json!({
        "id": sku,
        "sku": sku,
        "itemNo": sku,
        "name": name,
        "typeName": name,
        "pipUrl": first_str(product, &[&["url"], &["offers", "url"], &["offers", "0", "url"]]),
        "salesPrice": { "numeral": ld_price(product) },
        "imageUrl": images.first(),
        "images": images,
    }))
}

// ---------------------------------------------------------------------------
// Tier 2: hydration state and selectors
// ---------------------------------------------------------------------------

fn hydration_props(doc: &Html) -> Vec<Value> {
    select_all(doc.root_element(), "[data-hydration-props]")
        .into_iter()
        .filter_map(|el| el.value().attr("data-hydration-props"))
        .filter_map(|raw| serde_json::from_str(raw).ok())
        .collect()
}

/// `window.__INITIAL_STATE__ = {...}` assignments in inline scripts.
fn page_state(doc: &Html) -> Vec<Value> {
    select_all(doc.root_element(), "script:not([src])")
        .into_iter()
        .filter_map(|script| {
            let text: String = script.text().collect();
            let start = text.find("__INITIAL_STATE__")?;
            let rest = &text[start..];
            let open = rest.find('{')?;
            let close = rest.rfind('}')?;
            (close > open)
                .then(|| serde_json::from_str::<Value>(&rest[open..=close]).ok())
                .flatten()
        })
        .collect()
}

/// Depth-first search for product payloads in a state tree.
fn product_nodes(value: &Value, out: &mut Vec<Value>) {
    match value {
        Value::Array(items) => items.iter().for_each(|v| product_nodes(v, out)),
        Value::Object(map) => {
            if map.get("type").and_then(Value::as_str) == Some("PRODUCT") {
                out.push(map.get("product").cloned().unwrap_or_else(|| value.clone()));
            } else if has_type(value, "Product") {
                out.extend(summary_from_ld(value));
            } else {
                map.values().for_each(|v| product_nodes(v, out));
            }
        }
        _ => {}
    }
}

fn is_item_number(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric())
}

fn item_numbers(data: &Value, paths: &[&[&str]]) -> Vec<String> {
    let Some(items) = first_array(data, paths) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for item in collect_strs(items, &[&["itemNo"], &["itemNoGlobal"]]) {
        let item = normalize_sku(&item);
        if is_item_number(&item) {
            push_unique(&mut out, item);
        }
    }
    out
}

fn related_products(data: &Value) -> Vec<String> {
    let Some(Value::Array(addons)) = lookup(data, &["addOns", "addOns"]) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for item in addons
        .iter()
        .filter_map(|addon| addon.get("items").and_then(Value::as_array))
        .flatten()
        .filter(|item| item.get("itemType").and_then(Value::as_str) == Some("ART"))
    {
        if let Some(no) = first_str(item, &[&["itemNo"]]) {
            push_unique(&mut out, no);
        }
    }
    out
}

fn triple(value: &Value) -> Option<String> {
    let part = |key: &str| first_str(value, &[&[key]]);
    let (w, h, l) = (part("width")?, part("height"), part("length"));
    Some(format!(
        "{w} × {} × {}",
        h.unwrap_or_else(|| "?".into()),
        l.unwrap_or_else(|| "?".into())
    ))
}

fn urls_at(data: &Value, paths: &[&[&str]]) -> Vec<String> {
    match first_present(data, paths) {
        Some(Value::Array(items)) => collect_strs(items, &[&["url"], &["src"]]),
        Some(other) => first_str(other, &[&["url"], &["src"]]).into_iter().collect(),
        None => Vec::new(),
    }
}

fn fields_from_hydration(data: &Value) -> ProductFields {
    let mut fields = ProductFields {
        set_items: item_numbers(
            data,
            &[
                &["productSetSection", "items"],
                &["setSection", "items"],
                &["setItems"],
                &["productSet", "items"],
            ],
        ),
        bundle_items: item_numbers(
            data,
            &[&["bundleSection", "items"], &["bundleItems"], &["productBundle", "items"]],
        ),
        related_products: related_products(data),
        videos: urls_at(data, &[&["videoSection"], &["mediaSection"]]),
        manuals: urls_at(data, &[&["productInformationSection", "attachments", "manual"]]),
        ..ProductFields::default()
    };

    let packages = first_array(data, &[&["stockcheckSection", "packagingProps", "packages"]]);
    if let Some(packages) = packages {
        let total: f64 = packages
            .iter()
            .filter_map(|pkg| first_f64(pkg, &[&["weight"], &["weight", "value"]]))
            .sum();
        fields.weight = (total > 0.0).then_some(total);

        if let Some(first) = packages.first() {
            fields.net_weight = first_f64(first, &[&["netWeight"], &["netWeight", "value"]]);
            fields.package_volume = first_f64(first, &[&["volume"], &["volume", "value"]]);
            fields.package_dimensions = first.get("measurements").and_then(triple);
            fields.dimensions = first.get("dimensions").and_then(triple);
        }
    }

    fields
}

fn fields_from_selectors(doc: &Html) -> ProductFields {
    let root = doc.root_element();
    let text_at = |css: &str| first_match(root, css).map(clean_text).and_then(non_empty);
    let attr_at = |css: &str, attr: &str| {
        first_match(root, css)
            .and_then(|el| el.value().attr(attr))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let set_selector = ".pip-product-set-section [data-item-no], .pip-set-items [data-item-no]";
    let set_items = select_all(root, set_selector)
        .into_iter()
        .filter_map(|el| el.value().attr("data-item-no").map(normalize_sku))
        .filter(|n| is_item_number(n))
        .fold(Vec::new(), |mut acc, n| {
            push_unique(&mut acc, n);
            acc
        });

    let mut videos = Vec::new();
    for el in select_all(root, r#"iframe[src*="youtube"], iframe[src*="vimeo"], video source"#) {
        let value = el.value();
        if let Some(src) = value.attr("src").or_else(|| value.attr("data-src")) {
            push_unique(&mut videos, src.to_string());
        }
    }

    let mut manuals = Vec::new();
    for el in select_all(root, r#"a[href*="manual"], a[href*="instruction"]"#) {
        if let Some(href) = el.value().attr("href") {
            push_unique(&mut manuals, href.to_string());
        }
    }

    let mut images = Vec::new();
    for el in select_all(root, ".pip-media-grid img, .pip-product-gallery img") {
        let value = el.value();
        if let Some(src) = value.attr("src").or_else(|| value.attr("data-src")) {
            push_unique(&mut images, src.to_string());
        }
    }

    ProductFields {
        name: text_at("h1"),
        price: attr_at(r#"meta[property="product:price:amount"]"#, "content")
            .and_then(|p| shelf_core::fields::parse_decimal(&p)),
        images,
        collection: text_at(".pip-header-section__title--big"),
        description: text_at(".pip-header-section__description-text")
            .or_else(|| attr_at(r#"meta[name="description"]"#, "content")),
        set_items,
        videos,
        manuals,
        ..ProductFields::default()
    }
}

/// Materials, care, safety and good-to-know panels.
///
/// Each panel is a heading followed by sibling content; the text runs until
/// the next heading.
fn modal_sections(doc: &Html) -> ProductFields {
    let mut fields = ProductFields::default();

    for heading in select_all(doc.root_element(), "h2, h3, h4, dt, [role=\"heading\"]") {
        let Some(section) = ModalSection::classify(&clean_text(heading)) else {
            continue;
        };

        let mut parts = Vec::new();
        for sibling in heading.next_siblings().filter_map(ElementRef::wrap) {
            if matches!(sibling.value().name(), "h2" | "h3" | "h4" | "dt") {
                break;
            }
            let text = clean_text(sibling);
            if !text.is_empty() {
                parts.push(text);
            }
        }
        let Some(text) = non_empty(parts.join("\n")) else {
            continue;
        };

        let slot = match section {
            ModalSection::Materials => &mut fields.materials,
            ModalSection::Care => &mut fields.care,
            ModalSection::Safety => &mut fields.safety,
            ModalSection::GoodToKnow => &mut fields.good_to_know,
        };
        if slot.is_none() {
            *slot = Some(text);
        }
    }

    fields
}

fn product_tiles(doc: &Html) -> Vec<Value> {
    select_all(
        doc.root_element(),
        "[data-product-id], [data-item-no], .pip-product-compact, .product-compact",
    )
    .into_iter()
    .filter_map(|tile| {
        let value = tile.value();
        let id = value
            .attr("data-product-id")
            .or_else(|| value.attr("data-item-no"))
            .or_else(|| value.attr("data-sku"))
            .map(str::trim)
            .filter(|id| !id.is_empty())?;

        let name = first_match(tile, ".pip-product-compact__title, .product-title, h2, h3")
            .map(clean_text)
            .and_then(non_empty);
        let price = first_match(tile, ".pip-price, .product-price, [data-price]")
            .map(clean_text)
            .map(|t| {
                t.chars()
                    .filter(|c| c.is_ascii_digit() || matches!(c, ',' | '.'))
                    .collect::<String>()
            })
            .and_then(|t| shelf_core::fields::parse_decimal(&t));
        let url = first_match(tile, "a").and_then(|a| a.value().attr("href"));
        let image = first_match(tile, "img").and_then(|img| {
            img.value().attr("src").or_else(|| img.value().attr("data-src"))
        });

        Some(json!({
            "id": id,
            "sku": id,
            "name": name,
            "typeName": name,
            "salesPrice": { "numeral": price },
            "pipUrl": url,
            "imageUrl": image,
            "images": image.into_iter().collect::<Vec<_>>(),
        }))
    })
    .collect()
}
