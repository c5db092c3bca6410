//! The six acquisition units: category tree, products, bestsellers, popular
//! categories and the two image mirrors.

use serde_json::Value;

use crate::cancellation::TaskContext;
use crate::downloader::ContentDownloader;
use crate::error::AppError;
use crate::fields::first_str;
use crate::job::UnitArgs;
use crate::models::{
    CategoryRef, CategoryUpsert, ProductSummary, ProductUpsert, UpsertOutcome, category_children,
    category_roots,
};
use crate::pipeline::ExtractionPipeline;
use crate::proxy::ProxySource;
use crate::runner::{UnitExecutor, UnitOutcome};
use crate::task::{Counter, TaskType};
use crate::task_store::TaskStore;
use crate::traits::{
    CatalogApi, CatalogStore, HtmlExtractor, HttpTransport, PageRenderer, Translator,
};
use crate::util::{normalize_url, sku_variants};

/// Products requested per listing page.
pub const PAGE_SIZE: usize = 50;
/// Upper bound for product-image sync without an explicit limit.
pub const DEFAULT_IMAGE_BATCH: usize = 1000;

/// Tunables shared by the units.
#[derive(Debug, Clone)]
pub struct UnitSettings {
    pub homepage_url: String,
    pub page_size: usize,
    pub source_lang: String,
    pub target_lang: String,
    /// Categories scanned for `isBestseller` when the homepage yields nothing.
    pub bestseller_fallback_categories: usize,
}

impl Default for UnitSettings {
    fn default() -> Self {
        Self {
            homepage_url: "https://www.ikea.com/pl/pl/".into(),
            page_size: PAGE_SIZE,
            source_lang: "pl".into(),
            target_lang: "ru".into(),
            bestseller_fallback_categories: 5,
        }
    }
}

/// Unit bodies over the extraction pipeline, downloader and catalog store.
#[derive(Clone)]
pub struct CatalogUnits<A, T, P, R, X, C, L>
where
    A: CatalogApi,
    T: HttpTransport,
    P: ProxySource,
    R: PageRenderer,
    X: HtmlExtractor,
    C: CatalogStore,
    L: Translator,
{
    pipeline: ExtractionPipeline<A, T, P, R, X>,
    downloader: ContentDownloader<T, P>,
    catalog: C,
    translator: L,
    settings: UnitSettings,
}

impl<A, T, P, R, X, C, L> CatalogUnits<A, T, P, R, X, C, L>
where
    A: CatalogApi,
    T: HttpTransport,
    P: ProxySource,
    R: PageRenderer,
    X: HtmlExtractor,
    C: CatalogStore,
    L: Translator,
{
    pub fn new(
        pipeline: ExtractionPipeline<A, T, P, R, X>,
        downloader: ContentDownloader<T, P>,
        catalog: C,
        translator: L,
        settings: UnitSettings,
    ) -> Self {
        Self {
            pipeline,
            downloader,
            catalog,
            translator,
            settings,
        }
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    async fn translate(&self, text: Option<&str>) -> Option<String> {
        let text = text.filter(|t| !t.trim().is_empty())?;
        match self
            .translator
            .translate(text, &self.settings.source_lang, &self.settings.target_lang)
            .await
        {
            Ok(translated) if !translated.trim().is_empty() => Some(translated),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(%text, error = %e, "Translation failed");
                None
            }
        }
    }

    /// Homepage HTML, or `None` when it cannot be fetched.
    async fn homepage(&self) -> Option<String> {
        match self.pipeline.page(&self.settings.homepage_url).await {
            Ok(html) => Some(html),
            Err(e) => {
                tracing::warn!(
                    url = %self.settings.homepage_url,
                    error = %e,
                    "Homepage fetch failed"
                );
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // categories
    // -----------------------------------------------------------------------

    async fn sync_categories<S: TaskStore>(
        &self,
        ctx: &mut TaskContext<S>,
    ) -> Result<UnitOutcome, AppError> {
        let tree = self.pipeline.api().fetch_categories().await?;

        // Explicit stack, pre-order: a node is upserted before its children.
        let mut stack: Vec<(&Value, Vec<String>)> = category_roots(&tree)
            .iter()
            .rev()
            .map(|node| (node, Vec::new()))
            .collect();

        while let Some((node, parent_ids)) = stack.pop() {
            if ctx.limit_reached() {
                break;
            }
            ctx.check_not_cancelled().await?;

            let Some(mut category) = CategoryUpsert::from_node(node, &parent_ids) else {
                tracing::warn!(task_id = ctx.task_id(), "Category node without id");
                ctx.bump(Counter::Errors).await?;
                continue;
            };

            category.translated_name = match self.translate(category.name.as_deref()).await {
                Some(translated) => Some(translated),
                None => first_str(node, &[&["translatedName"]]),
            };

            match self.catalog.upsert_category(&category).await {
                Ok(outcome) => {
                    record_outcome(ctx, outcome).await?;
                    ctx.bump(Counter::Processed).await?;
                }
                Err(e) => {
                    tracing::error!(
                        category_id = %category.id,
                        error = %e,
                        "Category upsert failed"
                    );
                    ctx.bump(Counter::Errors).await?;
                }
            }

            let mut chain = parent_ids;
            chain.push(category.id);
            for child in category_children(node).iter().rev() {
                stack.push((child, chain.clone()));
            }
        }

        Ok(UnitOutcome::done())
    }

    // -----------------------------------------------------------------------
    // products
    // -----------------------------------------------------------------------

    async fn sync_products<S: TaskStore>(
        &self,
        ctx: &mut TaskContext<S>,
        args: &UnitArgs,
    ) -> Result<UnitOutcome, AppError> {
        let categories = self
            .catalog
            .active_categories(args.category_id.as_deref(), None)
            .await?;
        tracing::info!(task_id = ctx.task_id(), categories = categories.len(), "Syncing products");

        for category in &categories {
            if ctx.limit_reached() {
                break;
            }
            ctx.check_not_cancelled().await?;
            self.sync_category_products(ctx, category).await?;
        }

        let follow_ups = if ctx.stats().processed > 0 {
            vec![
                (TaskType::CategoryImages, UnitArgs::default()),
                (TaskType::ProductImages, UnitArgs::default()),
            ]
        } else {
            Vec::new()
        };
        Ok(UnitOutcome { follow_ups })
    }

    async fn sync_category_products<S: TaskStore>(
        &self,
        ctx: &mut TaskContext<S>,
        category: &CategoryRef,
    ) -> Result<(), AppError> {
        let page_size = self.settings.page_size;
        let mut offset = 0;

        loop {
            if ctx.limit_reached() {
                break;
            }
            ctx.check_not_cancelled().await?;

            let page = match self.pipeline.category_products(category, offset, page_size).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::error!(
                        category_id = %category.id,
                        offset,
                        error = %e,
                        "Category listing failed"
                    );
                    ctx.bump(Counter::Errors).await?;
                    break;
                }
            };
            if page.is_empty() {
                break;
            }

            for item in &page {
                if ctx.limit_reached() {
                    break;
                }
                ctx.check_not_cancelled().await?;

                match self.sync_product(item, category).await {
                    Ok(outcome) => {
                        record_outcome(ctx, outcome).await?;
                        ctx.bump(Counter::Processed).await?;
                    }
                    Err(e) => {
                        tracing::error!(
                            category_id = %category.id,
                            error = %e,
                            "Product sync failed"
                        );
                        ctx.bump(Counter::Errors).await?;
                    }
                }
            }

            offset += page_size;
            if page.len() < page_size {
                break;
            }
        }
        Ok(())
    }

    async fn sync_product(
        &self,
        item: &Value,
        category: &CategoryRef,
    ) -> Result<UpsertOutcome, AppError> {
        let summary = ProductSummary::from_value(item)
            .ok_or_else(|| AppError::InvalidInput("product listing without id".into()))?;

        let url = match summary.url.as_deref() {
            Some(raw) => normalize_url(raw, self.pipeline.base_url())?,
            None => String::new(),
        };

        let details = if url.is_empty() {
            Default::default()
        } else {
            match self
                .pipeline
                .product_details(&url, summary.item_no.as_deref())
                .await
            {
                Ok(extraction) => extraction.fields,
                Err(e) => {
                    tracing::warn!(sku = %summary.sku, error = %e, "Product details unavailable");
                    Default::default()
                }
            }
        };

        let name = summary.name.clone().or_else(|| details.name.clone());
        let images = if summary.images.is_empty() {
            details.images.clone()
        } else {
            summary.images.clone()
        };

        let product = ProductUpsert {
            translated_name: self.translate(name.as_deref()).await,
            sku: summary.sku,
            item_no: summary.item_no,
            name,
            url,
            price: summary.price.or(details.price),
            category_id: category.id.clone(),
            images,
            home_delivery: summary.home_delivery,
            is_parcel: details.is_parcel(),
            details,
        };
        self.catalog.upsert_product(&product).await
    }

    // -----------------------------------------------------------------------
    // bestsellers
    // -----------------------------------------------------------------------

    async fn sync_bestsellers<S: TaskStore>(
        &self,
        ctx: &mut TaskContext<S>,
    ) -> Result<UnitOutcome, AppError> {
        let mut skus = match self.homepage().await {
            Some(html) => self.pipeline.extractor().bestseller_skus(&html),
            None => Vec::new(),
        };
        if skus.is_empty() {
            tracing::info!(
                task_id = ctx.task_id(),
                "No bestsellers on homepage, scanning category listings"
            );
            skus = self.bestsellers_from_listings(ctx).await?;
        }

        ctx.check_not_cancelled().await?;
        let reset = self.catalog.reset_bestsellers().await?;
        tracing::info!(
            task_id = ctx.task_id(),
            reset,
            found = skus.len(),
            "Bestseller flags reset"
        );

        for sku in &skus {
            if ctx.limit_reached() {
                break;
            }
            ctx.check_not_cancelled().await?;

            match self.catalog.mark_bestseller(&sku_variants(sku)).await {
                Ok(true) => ctx.bump(Counter::Updated).await?,
                Ok(false) => tracing::debug!(%sku, "Bestseller not in catalog"),
                Err(e) => {
                    tracing::error!(%sku, error = %e, "Failed to mark bestseller");
                    ctx.bump(Counter::Errors).await?;
                    continue;
                }
            }
            ctx.bump(Counter::Processed).await?;
        }

        Ok(UnitOutcome::done())
    }

    async fn bestsellers_from_listings<S: TaskStore>(
        &self,
        ctx: &TaskContext<S>,
    ) -> Result<Vec<String>, AppError> {
        let categories = self
            .catalog
            .active_categories(None, Some(self.settings.bestseller_fallback_categories))
            .await?;

        let mut skus = Vec::new();
        for category in &categories {
            ctx.check_not_cancelled().await?;
            match self
                .pipeline
                .category_products(category, 0, self.settings.page_size)
                .await
            {
                Ok(items) => skus.extend(
                    items
                        .iter()
                        .filter_map(ProductSummary::from_value)
                        .filter(|p| p.is_bestseller)
                        .map(|p| p.sku),
                ),
                Err(e) => tracing::warn!(
                    category_id = %category.id,
                    error = %e,
                    "Listing unavailable"
                ),
            }
        }
        skus.dedup();
        Ok(skus)
    }

    // -----------------------------------------------------------------------
    // popular categories
    // -----------------------------------------------------------------------

    async fn sync_popular_categories<S: TaskStore>(
        &self,
        ctx: &mut TaskContext<S>,
    ) -> Result<UnitOutcome, AppError> {
        let mut ids = match self.homepage().await {
            Some(html) => self.pipeline.extractor().popular_category_ids(&html),
            None => Vec::new(),
        };
        if ids.is_empty() {
            tracing::info!(
                task_id = ctx.task_id(),
                "No popular categories on homepage, reading tree flags"
            );
            let tree = self.pipeline.api().fetch_categories().await?;
            ids = popular_in_tree(&tree);
        }

        ctx.check_not_cancelled().await?;
        let reset = self.catalog.reset_popular_categories().await?;
        tracing::info!(task_id = ctx.task_id(), reset, found = ids.len(), "Popular flags reset");

        for id in &ids {
            if ctx.limit_reached() {
                break;
            }
            ctx.check_not_cancelled().await?;

            match self.catalog.mark_popular_category(id).await {
                Ok(true) => ctx.bump(Counter::Updated).await?,
                Ok(false) => tracing::debug!(category = %id, "Popular category not in catalog"),
                Err(e) => {
                    tracing::error!(category = %id, error = %e, "Failed to mark popular category");
                    ctx.bump(Counter::Errors).await?;
                    continue;
                }
            }
            ctx.bump(Counter::Processed).await?;
        }

        Ok(UnitOutcome::done())
    }

    // -----------------------------------------------------------------------
    // images
    // -----------------------------------------------------------------------

    async fn sync_category_images<S: TaskStore>(
        &self,
        ctx: &mut TaskContext<S>,
    ) -> Result<UnitOutcome, AppError> {
        let jobs = self
            .catalog
            .categories_missing_images(ctx.remaining())
            .await?;

        for job in &jobs {
            if ctx.limit_reached() {
                break;
            }
            ctx.check_not_cancelled().await?;

            let report = self
                .downloader
                .fetch_all(std::slice::from_ref(&job.remote_image_url), "categories")
                .await;
            match report.paths.first() {
                Some(path) => match self.catalog.set_category_image(&job.id, path).await {
                    Ok(()) => ctx.bump(Counter::Updated).await?,
                    Err(e) => {
                        tracing::error!(
                            category_id = %job.id,
                            error = %e,
                            "Failed to store category image"
                        );
                        ctx.bump(Counter::Errors).await?;
                    }
                },
                None => ctx.bump(Counter::Errors).await?,
            }
            ctx.bump(Counter::Processed).await?;
        }

        Ok(UnitOutcome::done())
    }

    async fn sync_product_images<S: TaskStore>(
        &self,
        ctx: &mut TaskContext<S>,
        args: &UnitArgs,
    ) -> Result<UnitOutcome, AppError> {
        let batch = ctx.remaining().unwrap_or(DEFAULT_IMAGE_BATCH);
        let jobs = self
            .catalog
            .products_with_images(args.sku.as_deref(), Some(batch))
            .await?;

        for job in &jobs {
            if ctx.limit_reached() {
                break;
            }
            ctx.check_not_cancelled().await?;
            if job.images.is_empty() {
                continue;
            }

            let report = self.downloader.fetch_all(&job.images, "products").await;
            let images = report.image_set();
            if images.incomplete {
                tracing::warn!(
                    sku = %job.sku,
                    stored = images.stored,
                    total = images.total,
                    "Product images incomplete"
                );
            }

            match self.catalog.record_product_images(&job.sku, &images).await {
                Ok(()) => {
                    if images.stored > 0 {
                        ctx.bump(Counter::Updated).await?;
                    }
                    ctx.bump(Counter::Processed).await?;
                }
                Err(e) => {
                    tracing::error!(sku = %job.sku, error = %e, "Failed to record product images");
                    ctx.bump(Counter::Errors).await?;
                }
            }
        }

        Ok(UnitOutcome::done())
    }
}

async fn record_outcome<S: TaskStore>(
    ctx: &mut TaskContext<S>,
    outcome: UpsertOutcome,
) -> Result<(), AppError> {
    match outcome {
        UpsertOutcome::Created => ctx.bump(Counter::Created).await,
        UpsertOutcome::Updated => ctx.bump(Counter::Updated).await,
        UpsertOutcome::Unchanged => Ok(()),
    }
}

/// Ids of every node flagged popular, depth-first.
fn popular_in_tree(tree: &Value) -> Vec<String> {
    let mut ids = Vec::new();
    let mut stack: Vec<&Value> = category_roots(tree).iter().rev().collect();
    while let Some(node) = stack.pop() {
        if let Some(category) = CategoryUpsert::from_node(node, &[]) {
            if category.is_popular {
                ids.push(category.id);
            }
        }
        stack.extend(category_children(node).iter().rev());
    }
    ids
}

impl<A, T, P, R, X, C, L> UnitExecutor for CatalogUnits<A, T, P, R, X, C, L>
where
    A: CatalogApi,
    T: HttpTransport,
    P: ProxySource,
    R: PageRenderer,
    X: HtmlExtractor,
    C: CatalogStore,
    L: Translator,
{
    async fn execute<S: TaskStore>(
        &self,
        ctx: &mut TaskContext<S>,
        args: &UnitArgs,
    ) -> Result<UnitOutcome, AppError> {
        match ctx.task_type() {
            TaskType::Categories => self.sync_categories(ctx).await,
            TaskType::Products => self.sync_products(ctx, args).await,
            TaskType::Bestsellers => self.sync_bestsellers(ctx).await,
            TaskType::PopularCategories => self.sync_popular_categories(ctx).await,
            TaskType::CategoryImages => self.sync_category_images(ctx).await,
            TaskType::ProductImages => self.sync_product_images(ctx, args).await,
        }
    }
}
