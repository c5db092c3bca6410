use std::future::Future;
use std::time::Duration;

use serde_json::Value;

use crate::error::AppError;
use crate::models::{
    CategoryImageJob, CategoryRef, CategoryUpsert, ImageSet, ProductFields, ProductImageJob,
    ProductUpsert, UpsertOutcome,
};
use crate::pipeline::RenderPolicy;
use crate::proxy::ProxyEndpoint;
use crate::task::{TaskStats, TaskType};

/// HTTP client usable with or without a forward proxy.
///
/// Implementations apply their own fixed socket timeout and report non-2xx
/// responses as `HTTP {status} for {url}` so the proxy policy can classify them.
pub trait HttpTransport: Send + Sync + Clone {
    fn get_text(
        &self,
        url: &str,
        proxy: Option<&ProxyEndpoint>,
    ) -> impl Future<Output = Result<String, AppError>> + Send;

    fn get_bytes(
        &self,
        url: &str,
        proxy: Option<&ProxyEndpoint>,
    ) -> impl Future<Output = Result<Vec<u8>, AppError>> + Send;

    fn post_json(
        &self,
        url: &str,
        body: &Value,
        proxy: Option<&ProxyEndpoint>,
    ) -> impl Future<Output = Result<Value, AppError>> + Send;
}

/// The origin's internal structured API.
pub trait CatalogApi: Send + Sync + Clone {
    /// Full category tree.
    fn fetch_categories(&self) -> impl Future<Output = Result<Value, AppError>> + Send;

    /// One page of products listed under a category.
    fn search_category(
        &self,
        category_id: &str,
        offset: usize,
        size: usize,
    ) -> impl Future<Output = Result<Vec<Value>, AppError>> + Send;

    /// Product lookup by numeric article number.
    fn lookup_product(
        &self,
        item_no: &str,
    ) -> impl Future<Output = Result<Option<Value>, AppError>> + Send;
}

/// Headless browser that can open client-side-only panels before reading the DOM.
pub trait PageRenderer: Send + Sync + Clone {
    /// Returns the post-interaction HTML, or `None` when rendering is unavailable.
    fn render_interactive(
        &self,
        url: &str,
        policy: &RenderPolicy,
    ) -> impl Future<Output = Result<Option<String>, AppError>> + Send;
}

/// Renderer used when no browser is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledRenderer;

impl PageRenderer for DisabledRenderer {
    async fn render_interactive(
        &self,
        _url: &str,
        _policy: &RenderPolicy,
    ) -> Result<Option<String>, AppError> {
        Ok(None)
    }
}

/// Best-effort HTML extraction. Misses yield empty results, never errors.
pub trait HtmlExtractor: Send + Sync + Clone {
    fn product_fields(&self, html: &str) -> ProductFields;

    /// Product tiles on a category page, in the summary JSON shape.
    fn category_products(&self, html: &str) -> Vec<Value>;

    fn bestseller_skus(&self, html: &str) -> Vec<String>;

    /// Category ids (or category page URLs) promoted on the homepage.
    fn popular_category_ids(&self, html: &str) -> Vec<String>;
}

/// Catalog tables the acquisition units read and write.
pub trait CatalogStore: Send + Sync + Clone {
    fn upsert_category(
        &self,
        category: &CategoryUpsert,
    ) -> impl Future<Output = Result<UpsertOutcome, AppError>> + Send;

    /// Non-deleted categories, optionally narrowed to one id.
    fn active_categories(
        &self,
        only: Option<&str>,
        limit: Option<usize>,
    ) -> impl Future<Output = Result<Vec<CategoryRef>, AppError>> + Send;

    fn upsert_product(
        &self,
        product: &ProductUpsert,
    ) -> impl Future<Output = Result<UpsertOutcome, AppError>> + Send;

    fn reset_bestsellers(&self) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Returns false when no product matches any of `sku_variants`.
    fn mark_bestseller(
        &self,
        sku_variants: &[String],
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    fn reset_popular_categories(&self) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Matches by category id or category URL.
    fn mark_popular_category(
        &self,
        id_or_url: &str,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    fn categories_missing_images(
        &self,
        limit: Option<usize>,
    ) -> impl Future<Output = Result<Vec<CategoryImageJob>, AppError>> + Send;

    fn set_category_image(
        &self,
        category_id: &str,
        local_path: &str,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn products_with_images(
        &self,
        only_sku: Option<&str>,
        limit: Option<usize>,
    ) -> impl Future<Output = Result<Vec<ProductImageJob>, AppError>> + Send;

    fn record_product_images(
        &self,
        sku: &str,
        images: &ImageSet,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Text translation collaborator.
pub trait Translator: Send + Sync + Clone {
    fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Returns the input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughTranslator;

impl Translator for PassthroughTranslator {
    async fn translate(
        &self,
        text: &str,
        _source: &str,
        _target: &str,
    ) -> Result<String, AppError> {
        Ok(text.to_string())
    }
}

/// Lifecycle event delivered to the notification sink.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    Started {
        task_id: i64,
        task_type: TaskType,
        limit: Option<u32>,
    },
    Completed {
        task_id: i64,
        task_type: TaskType,
        stats: TaskStats,
        duration: Duration,
    },
    Failed {
        task_id: i64,
        task_type: TaskType,
        error: String,
    },
}

/// Best-effort notification sink. Delivery failures are the sink's problem.
pub trait Notifier: Send + Sync + Clone {
    fn notify(&self, event: TaskEvent) -> impl Future<Output = ()> + Send;
}

impl<N: Notifier> Notifier for Option<N> {
    async fn notify(&self, event: TaskEvent) {
        if let Some(inner) = self {
            inner.notify(event).await;
        }
    }
}
