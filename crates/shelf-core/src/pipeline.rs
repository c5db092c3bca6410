use serde_json::Value;

use crate::error::AppError;
use crate::fetch::ProxiedFetcher;
use crate::fields::{collect_strs, first_array, first_f64, first_str};
use crate::models::{CategoryRef, ProductFields};
use crate::proxy::ProxySource;
use crate::traits::{CatalogApi, HtmlExtractor, HttpTransport, PageRenderer};
use crate::util::{is_uuid_like, normalize_url};

/// Tunables for the headless-render stage.
#[derive(Debug, Clone)]
pub struct RenderPolicy {
    /// Render only when fewer modal panels than this were found in plain HTML.
    pub min_modal_sections: usize,
    /// Visible labels of the control that opens the product-details modal.
    pub trigger_keywords: Vec<String>,
    /// CSS selector tried when no control matches the keywords.
    pub fallback_selector: String,
    /// CSS selector of the opened modal.
    pub modal_selector: String,
    pub idle_wait: std::time::Duration,
    pub antibot_wait: std::time::Duration,
    pub antibot_rechecks: u32,
    pub modal_polls: u32,
    pub modal_poll_interval: std::time::Duration,
}

impl Default for RenderPolicy {
    fn default() -> Self {
        use std::time::Duration;
        Self {
            min_modal_sections: 1,
            trigger_keywords: [
                "Szczegóły produktu",
                "Informacje o produkcie",
                "Materiały i pielęgnacja",
                "Product details",
                "Materials and care",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            fallback_selector: "button.pip-product-information-section__button, \
                                [data-testid=\"product-information-button\"]"
                .into(),
            modal_selector: ".pip-modal, [role=\"dialog\"]".into(),
            idle_wait: Duration::from_secs(3),
            antibot_wait: Duration::from_secs(5),
            antibot_rechecks: 3,
            modal_polls: 10,
            modal_poll_interval: Duration::from_millis(500),
        }
    }
}

/// Which stage produced data for a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Api,
    Html,
    Rendered,
}

/// Product fields plus the stages that contributed to them.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub fields: ProductFields,
    pub stages: Vec<Stage>,
}

/// Cheapest-first extraction: structured API, page HTML, headless render.
///
/// Stage failures are logged and treated as "no data". An error is returned
/// only when nothing was extracted and the last stage that ran failed at the
/// transport level.
#[derive(Clone)]
pub struct ExtractionPipeline<A, T, P, R, X>
where
    A: CatalogApi,
    T: HttpTransport,
    P: ProxySource,
    R: PageRenderer,
    X: HtmlExtractor,
{
    api: A,
    fetcher: ProxiedFetcher<T, P>,
    renderer: R,
    extractor: X,
    policy: RenderPolicy,
    base_url: String,
}

impl<A, T, P, R, X> ExtractionPipeline<A, T, P, R, X>
where
    A: CatalogApi,
    T: HttpTransport,
    P: ProxySource,
    R: PageRenderer,
    X: HtmlExtractor,
{
    pub fn new(
        api: A,
        fetcher: ProxiedFetcher<T, P>,
        renderer: R,
        extractor: X,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            api,
            fetcher,
            renderer,
            extractor,
            policy: RenderPolicy::default(),
            base_url: base_url.into(),
        }
    }

    pub fn with_policy(mut self, policy: RenderPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn extractor(&self) -> &X {
        &self.extractor
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetches a page's HTML through the proxy policy.
    pub async fn page(&self, url: &str) -> Result<String, AppError> {
        let url = normalize_url(url, &self.base_url)?;
        self.fetcher.get_text(&url).await
    }

    /// One page of product summaries for a category.
    ///
    /// The HTML fallback has no paging, so it only runs for `offset == 0`.
    pub async fn category_products(
        &self,
        category: &CategoryRef,
        offset: usize,
        size: usize,
    ) -> Result<Vec<Value>, AppError> {
        if is_uuid_like(&category.id) {
            tracing::debug!(category_id = %category.id, "UUID category id, skipping search API");
        } else {
            match self.api.search_category(&category.id, offset, size).await {
                Ok(items) if !items.is_empty() => return Ok(items),
                Ok(_) => {
                    tracing::debug!(
                        category_id = %category.id,
                        offset,
                        "Search API returned no products"
                    )
                }
                Err(e) => {
                    tracing::warn!(category_id = %category.id, error = %e, "Search API failed")
                }
            }
        }

        if offset > 0 {
            return Ok(Vec::new());
        }
        let Some(url) = category.url.as_deref() else {
            return Ok(Vec::new());
        };

        let html = self.page(url).await?;
        let items = self.extractor.category_products(&html);
        tracing::debug!(category_id = %category.id, found = items.len(), "Category page parsed");
        Ok(items)
    }

    /// Detail record for one product.
    pub async fn product_details(
        &self,
        url: &str,
        item_no: Option<&str>,
    ) -> Result<Extraction, AppError> {
        let mut out = Extraction::default();

        // Stage 1: structured API.
        if let Some(item_no) = item_no.filter(|n| n.chars().all(|c| c.is_ascii_digit())) {
            match self.api.lookup_product(item_no).await {
                Ok(Some(item)) => {
                    let fields = fields_from_api(&item);
                    if !fields.is_empty() {
                        out.fields.merge(fields);
                        out.stages.push(Stage::Api);
                    }
                }
                Ok(None) => tracing::debug!(%item_no, "Product not found via API"),
                Err(e) => tracing::warn!(%item_no, error = %e, "Product API lookup failed"),
            }
        }

        if out.fields.has_logistics()
            && out.fields.modal_sections() >= self.policy.min_modal_sections
        {
            return Ok(out);
        }

        // Stage 2: server-rendered HTML.
        let mut transport_error = None;
        match self.page(url).await {
            Ok(html) => {
                let fields = self.extractor.product_fields(&html);
                if !fields.is_empty() {
                    out.fields.merge(fields);
                    out.stages.push(Stage::Html);
                }
            }
            Err(e) => {
                tracing::warn!(%url, error = %e, "Product page fetch failed");
                transport_error = Some(e).filter(AppError::is_transport);
            }
        }

        // Stage 3: modal-only panels need a real browser.
        if out.fields.modal_sections() < self.policy.min_modal_sections {
            let absolute = normalize_url(url, &self.base_url)?;
            match self.renderer.render_interactive(&absolute, &self.policy).await {
                Ok(Some(html)) => {
                    let fields = self.extractor.product_fields(&html);
                    if !fields.is_empty() {
                        out.fields.merge(fields);
                        out.stages.push(Stage::Rendered);
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(%url, error = %e, "Headless render failed"),
            }
        }

        if out.fields.is_empty() {
            if let Some(e) = transport_error {
                return Err(e);
            }
        }
        Ok(out)
    }
}

/// Maps a search API product item onto detail fields.
fn fields_from_api(item: &Value) -> ProductFields {
    let mut images = first_array(item, &[&["gprDescription", "variants"]])
        .map(|variants| collect_strs(variants, &[&["imageUrl"]]))
        .unwrap_or_default();
    if let Some(main) = first_str(item, &[&["mainImageUrl"]]) {
        if !images.contains(&main) {
            images.push(main);
        }
    }

    ProductFields {
        name: first_str(item, &[&["typeName"], &["name"]]),
        sku: first_str(item, &[&["id"], &["itemNo"]]),
        price: first_f64(item, &[&["salesPrice", "numeral"], &["price"]]),
        images,
        collection: first_str(item, &[&["name"]]).filter(|_| item.get("typeName").is_some()),
        description: first_str(item, &[&["mainImageAlt"], &["description"]]),
        ..ProductFields::default()
    }
}
