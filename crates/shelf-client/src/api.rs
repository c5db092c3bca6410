use serde_json::{Value, json};

use shelf_core::config::OriginConfig;
use shelf_core::error::AppError;
use shelf_core::fetch::ProxiedFetcher;
use shelf_core::fields::{first_array, first_str};
use shelf_core::proxy::ProxySource;
use shelf_core::traits::{CatalogApi, HttpTransport};
use shelf_core::util::normalize_sku;

/// Breakout tiles the listing endpoint mixes into product results.
const BREAKOUTS: &[&str] = &["PLANNER", "LOGIN_REMINDER", "MATTRESS_WARRANTY"];
const LOOKUP_WINDOW: usize = 24;

/// Client for the origin's search and navigation endpoints.
///
/// Every request goes through the proxy rotation policy.
#[derive(Clone)]
pub struct OriginApiClient<T: HttpTransport, P: ProxySource> {
    fetcher: ProxiedFetcher<T, P>,
    origin: OriginConfig,
}

impl<T: HttpTransport, P: ProxySource> OriginApiClient<T, P> {
    pub fn new(fetcher: ProxiedFetcher<T, P>, origin: OriginConfig) -> Self {
        Self { fetcher, origin }
    }

    fn search_body(&self, input: &str, kind: &str, offset: usize, size: usize) -> Value {
        json!({
            "searchParameters": { "input": input, "type": kind },
            "zip": self.origin.zip,
            "store": self.origin.store,
            "isUserLoggedIn": false,
            "components": [{
                "component": "PRIMARY_AREA",
                "columns": 4,
                "types": { "main": "PRODUCT", "breakouts": BREAKOUTS },
                "filterConfig": { "max-num-filters": 6 },
                "sort": "RELEVANCE",
                "window": { "offset": offset, "size": size }
            }]
        })
    }

    async fn search(
        &self,
        input: &str,
        kind: &str,
        offset: usize,
        size: usize,
    ) -> Result<Vec<Value>, AppError> {
        let body = self.search_body(input, kind, offset, size);
        let response = self.fetcher.post_json(&self.origin.search_url, &body).await?;
        Ok(search_products(&response))
    }
}

/// Product payloads from a search response, breakout tiles dropped.
fn search_products(response: &Value) -> Vec<Value> {
    let Some(items) = first_array(response, &[&["results", "0", "items"], &["items"]]) else {
        return Vec::new();
    };

    items
        .iter()
        .filter(|item| item.get("type").and_then(Value::as_str) == Some("PRODUCT"))
        .filter_map(|item| item.get("product").cloned())
        .collect()
}

impl<T: HttpTransport, P: ProxySource> CatalogApi for OriginApiClient<T, P> {
    async fn fetch_categories(&self) -> Result<Value, AppError> {
        let body = self.fetcher.get_text(&self.origin.categories_url).await?;
        let tree: Value = serde_json::from_str(&body)?;
        tracing::debug!(
            url = %self.origin.categories_url,
            bytes = body.len(),
            "Fetched category tree"
        );
        Ok(tree)
    }

    async fn search_category(
        &self,
        category_id: &str,
        offset: usize,
        size: usize,
    ) -> Result<Vec<Value>, AppError> {
        let products = self.search(category_id, "CATEGORY", offset, size).await?;
        tracing::debug!(category_id, offset, found = products.len(), "Category search page");
        Ok(products)
    }

    async fn lookup_product(&self, item_no: &str) -> Result<Option<Value>, AppError> {
        let wanted = normalize_sku(item_no);
        let products = self.search(item_no, "PRODUCT", 0, LOOKUP_WINDOW).await?;

        Ok(products.into_iter().find(|product| {
            first_str(product, &[&["itemNo"], &["itemNoGlobal"], &["id"]])
                .map(|id| normalize_sku(&id) == wanted)
                .unwrap_or(false)
        }))
    }
}
