use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fields::{collect_strs, first_array, first_bool, first_f64, first_str};

/// One node of the origin category tree, as upserted by category sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryUpsert {
    pub id: String,
    pub name: Option<String>,
    /// `None` keeps whatever translation is already stored.
    pub translated_name: Option<String>,
    pub url: Option<String>,
    pub remote_image_url: Option<String>,
    pub parent_ids: Vec<String>,
    pub is_important: bool,
    pub is_popular: bool,
}

impl CategoryUpsert {
    /// Builds a category row from a tree node. Returns `None` without an id.
    pub fn from_node(node: &Value, parent_ids: &[String]) -> Option<Self> {
        let id = first_str(node, &[&["id"], &["categoryId"]])?;
        Some(Self {
            id,
            name: first_str(node, &[&["name"], &["categoryName"], &["title"]]),
            translated_name: None,
            url: first_str(node, &[&["url"], &["categoryUrl"]]),
            remote_image_url: first_str(node, &[&["imageUrl"], &["remoteImageUrl"], &["im"]]),
            parent_ids: parent_ids.to_vec(),
            is_important: first_bool(node, &[&["isImportant"]]).unwrap_or(false),
            is_popular: first_bool(node, &[&["isPopular"], &["is_popular"], &["popular"]])
                .unwrap_or(false),
        })
    }
}

/// Children of a category tree node.
pub fn category_children(node: &Value) -> &[Value] {
    first_array(node, &[&["children"], &["subs"], &["subCategories"]])
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Top-level nodes of a category tree payload (bare array or wrapped).
pub fn category_roots(payload: &Value) -> &[Value] {
    match payload {
        Value::Array(items) => items.as_slice(),
        other => first_array(other, &[&["categories"], &["children"], &["subs"]])
            .map(Vec::as_slice)
            .unwrap_or(&[]),
    }
}

/// Catalog category reference used by product and image sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRef {
    pub id: String,
    pub url: Option<String>,
}

/// Result of an insert-or-update against the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Product as listed in a category page or search result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductSummary {
    pub sku: String,
    pub item_no: Option<String>,
    pub name: Option<String>,
    pub url: Option<String>,
    pub price: Option<f64>,
    pub images: Vec<String>,
    pub home_delivery: Option<Value>,
    pub is_bestseller: bool,
}

impl ProductSummary {
    /// Reads the API search shape and the HTML tile shape alike.
    pub fn from_value(item: &Value) -> Option<Self> {
        let sku = first_str(item, &[&["id"], &["sku"], &["itemNo"], &["productId"]])?;

        let mut images = first_array(item, &[&["gprDescription", "variants"]])
            .map(|variants| collect_strs(variants, &[&["imageUrl"]]))
            .unwrap_or_default();
        if images.is_empty() {
            images = first_array(item, &[&["images"], &["image"]])
                .map(|items| collect_strs(items, &[&["url"], &["src"]]))
                .unwrap_or_default();
        }
        if images.is_empty() {
            images.extend(first_str(item, &[&["mainImageUrl"], &["imageUrl"], &["image"]]));
        }

        Some(Self {
            item_no: first_str(item, &[&["itemNoGlobal"], &["itemNo"]]),
            name: first_str(item, &[&["typeName"], &["name"], &["title"]]),
            url: first_str(item, &[&["pipUrl"], &["url"], &["href"]]),
            price: first_f64(
                item,
                &[&["salesPrice", "numeral"], &["price", "numeral"], &["price"]],
            ),
            images,
            home_delivery: item.get("homeDelivery").cloned(),
            is_bestseller: first_bool(
                item,
                &[&["isBestseller"], &["is_bestseller"], &["bestseller"]],
            )
            .unwrap_or(false),
            sku,
        })
    }
}

/// Normalized product fields gathered across extraction stages.
///
/// Merging keeps the first non-empty value per field, so earlier (cheaper)
/// sources win and later ones only fill gaps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductFields {
    pub name: Option<String>,
    pub sku: Option<String>,
    pub price: Option<f64>,
    pub images: Vec<String>,
    pub collection: Option<String>,
    pub description: Option<String>,
    pub weight: Option<f64>,
    pub net_weight: Option<f64>,
    pub package_volume: Option<f64>,
    pub package_dimensions: Option<String>,
    pub dimensions: Option<String>,
    pub set_items: Vec<String>,
    pub bundle_items: Vec<String>,
    pub related_products: Vec<String>,
    pub videos: Vec<String>,
    pub manuals: Vec<String>,
    pub materials: Option<String>,
    pub care: Option<String>,
    pub safety: Option<String>,
    pub good_to_know: Option<String>,
}

fn fill<T>(slot: &mut Option<T>, other: Option<T>) {
    if slot.is_none() {
        *slot = other;
    }
}

fn fill_vec<T>(slot: &mut Vec<T>, other: Vec<T>) {
    if slot.is_empty() {
        *slot = other;
    }
}

impl ProductFields {
    pub fn merge(&mut self, other: ProductFields) {
        fill(&mut self.name, other.name);
        fill(&mut self.sku, other.sku);
        fill(&mut self.price, other.price);
        fill_vec(&mut self.images, other.images);
        fill(&mut self.collection, other.collection);
        fill(&mut self.description, other.description);
        fill(&mut self.weight, other.weight);
        fill(&mut self.net_weight, other.net_weight);
        fill(&mut self.package_volume, other.package_volume);
        fill(&mut self.package_dimensions, other.package_dimensions);
        fill(&mut self.dimensions, other.dimensions);
        fill_vec(&mut self.set_items, other.set_items);
        fill_vec(&mut self.bundle_items, other.bundle_items);
        fill_vec(&mut self.related_products, other.related_products);
        fill_vec(&mut self.videos, other.videos);
        fill_vec(&mut self.manuals, other.manuals);
        fill(&mut self.materials, other.materials);
        fill(&mut self.care, other.care);
        fill(&mut self.safety, other.safety);
        fill(&mut self.good_to_know, other.good_to_know);
    }

    pub fn is_empty(&self) -> bool {
        *self == ProductFields::default()
    }

    /// Weight or dimensions known: the page-level data we need is in.
    pub fn has_logistics(&self) -> bool {
        self.weight.is_some() || self.dimensions.is_some() || self.package_dimensions.is_some()
    }

    /// How many modal-only panels (materials, care, safety, good to know)
    /// have content.
    pub fn modal_sections(&self) -> usize {
        [&self.materials, &self.care, &self.safety, &self.good_to_know]
            .iter()
            .filter(|s| s.as_deref().is_some_and(|t| !t.trim().is_empty()))
            .count()
    }

    /// Parcel shipping applies up to 30 kg.
    pub fn is_parcel(&self) -> Option<bool> {
        self.weight.map(|w| w <= 30.0)
    }
}

/// Everything product sync writes for one article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductUpsert {
    pub sku: String,
    pub item_no: Option<String>,
    pub name: Option<String>,
    pub translated_name: Option<String>,
    pub url: String,
    pub price: Option<f64>,
    pub category_id: String,
    pub images: Vec<String>,
    pub home_delivery: Option<Value>,
    pub details: ProductFields,
    pub is_parcel: Option<bool>,
}

/// Category whose remote image has no local copy yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryImageJob {
    pub id: String,
    pub remote_image_url: String,
}

/// Product whose remote images should be mirrored locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductImageJob {
    pub sku: String,
    pub images: Vec<String>,
}

/// Local image state persisted on a product after a download pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSet {
    pub local_paths: Vec<String>,
    pub total: u32,
    pub stored: u32,
    pub incomplete: bool,
}
