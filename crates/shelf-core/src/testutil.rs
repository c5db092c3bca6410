//! Test utilities: in-memory stores and mock collaborators for every core trait.
//!
//! Handwritten mocks (no mockall) that record calls behind `Arc<Mutex<_>>`
//! and enforce the same guards the database layer does, so unit tests can
//! assert on lifecycle behavior without Postgres.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::Value;
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{EntryState, QueueEntry, QueueSet, RecurringJob, UNIT_QUEUE};
use crate::job_queue::WorkQueue;
use crate::models::{
    CategoryImageJob, CategoryRef, CategoryUpsert, ImageSet, ProductFields, ProductImageJob,
    ProductUpsert, UpsertOutcome,
};
use crate::pipeline::RenderPolicy;
use crate::proxy::ProxyEndpoint;
use crate::schedule::{CronDefinition, ScheduleStore};
use crate::task::{Counter, NewTask, TaskRecord, TaskStats, TaskStatus, TaskType};
use crate::task_store::TaskStore;
use crate::traits::{
    CatalogApi, CatalogStore, HtmlExtractor, HttpTransport, Notifier, PageRenderer, TaskEvent,
};
use crate::worker::{WorkerEvent, WorkerReporter};

// ---------------------------------------------------------------------------
// InMemoryTaskStore
// ---------------------------------------------------------------------------

/// Task table held in memory. Transition guards match the SQL ones.
#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    records: Arc<Mutex<Vec<TaskRecord>>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `error_message` directly, bypassing any transition.
    pub fn set_error_message(&self, id: i64, message: &str) {
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records.iter_mut().find(|r| r.id == id) {
            record.error_message = Some(message.to_string());
        }
    }

    /// Snapshot in insertion order.
    pub fn all(&self) -> Vec<TaskRecord> {
        self.records.lock().unwrap().clone()
    }

    fn update<F>(&self, id: i64, apply: F) -> bool
    where
        F: FnOnce(&mut TaskRecord) -> bool,
    {
        let mut records = self.records.lock().unwrap();
        match records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                let changed = apply(record);
                if changed {
                    record.updated_at = Utc::now();
                }
                changed
            }
            None => false,
        }
    }
}

fn is_open(status: TaskStatus) -> bool {
    matches!(status, TaskStatus::Pending | TaskStatus::Running)
}

impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: NewTask) -> Result<TaskRecord, AppError> {
        let mut records = self.records.lock().unwrap();
        let now = Utc::now();
        let record = TaskRecord {
            id: records.len() as i64 + 1,
            task_type: task.task_type,
            status: TaskStatus::Pending,
            item_limit: task.item_limit,
            processed: 0,
            created: 0,
            updated: 0,
            error_count: 0,
            started_at: None,
            completed_at: None,
            error_message: None,
            queue_correlation_id: None,
            created_at: now,
            updated_at: now,
        };
        records.push(record.clone());
        Ok(record)
    }

    async fn get(&self, id: i64) -> Result<Option<TaskRecord>, AppError> {
        Ok(self.records.lock().unwrap().iter().find(|r| r.id == id).cloned())
    }

    async fn mark_running(&self, id: i64) -> Result<bool, AppError> {
        Ok(self.update(id, |r| {
            if r.status != TaskStatus::Pending {
                return false;
            }
            r.status = TaskStatus::Running;
            r.started_at = Some(Utc::now());
            r.error_message = None;
            true
        }))
    }

    async fn mark_completed(&self, id: i64, stats: &TaskStats) -> Result<bool, AppError> {
        Ok(self.update(id, |r| {
            if !is_open(r.status) {
                return false;
            }
            r.status = TaskStatus::Completed;
            r.completed_at = Some(Utc::now());
            r.processed = r.processed.max(stats.processed);
            r.created = r.created.max(stats.created);
            r.updated = r.updated.max(stats.updated);
            r.error_count = r.error_count.max(stats.errors);
            true
        }))
    }

    async fn mark_failed(&self, id: i64, message: &str) -> Result<bool, AppError> {
        Ok(self.update(id, |r| {
            if !is_open(r.status) {
                return false;
            }
            r.status = TaskStatus::Failed;
            r.completed_at = Some(Utc::now());
            r.error_message = Some(message.to_string());
            true
        }))
    }

    async fn increment(&self, id: i64, counter: Counter) -> Result<(), AppError> {
        let found = self.update(id, |r| {
            let slot = match counter {
                Counter::Processed => &mut r.processed,
                Counter::Created => &mut r.created,
                Counter::Updated => &mut r.updated,
                Counter::Errors => &mut r.error_count,
            };
            *slot += 1;
            true
        });
        if found {
            Ok(())
        } else {
            Err(AppError::NotFound(format!("task {id}")))
        }
    }

    async fn set_correlation_id(&self, id: i64, correlation_id: &str) -> Result<bool, AppError> {
        Ok(self.update(id, |r| {
            if r.queue_correlation_id.is_some() {
                return false;
            }
            r.queue_correlation_id = Some(correlation_id.to_string());
            true
        }))
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<TaskRecord>, AppError> {
        let mut records = self.all();
        records.sort_by(|a, b| b.id.cmp(&a.id));
        records.truncate(limit);
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// InMemoryWorkQueue
// ---------------------------------------------------------------------------

/// Work queue with the claim, retry and recurring semantics of the Postgres one.
#[derive(Clone, Default)]
pub struct InMemoryWorkQueue {
    entries: Arc<Mutex<Vec<QueueEntry>>>,
    recurring: Arc<Mutex<BTreeMap<String, RecurringJob>>>,
    dispatch_error: Arc<Mutex<Option<String>>>,
}

impl InMemoryWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `dispatch` call fails with `message`.
    pub fn fail_next_dispatch(&self, message: &str) {
        *self.dispatch_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn entries_in(&self, state: EntryState) -> Vec<QueueEntry> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.state == state)
            .cloned()
            .collect()
    }

    fn with_entry<F>(&self, id: Uuid, apply: F) -> Result<(), AppError>
    where
        F: FnOnce(&mut QueueEntry),
    {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| AppError::NotFound(format!("queue entry {id}")))?;
        apply(entry);
        entry.updated_at = Utc::now();
        Ok(())
    }
}

impl WorkQueue for InMemoryWorkQueue {
    async fn dispatch(
        &self,
        payload: &Value,
        run_at: Option<DateTime<Utc>>,
    ) -> Result<Uuid, AppError> {
        if let Some(message) = self.dispatch_error.lock().unwrap().take() {
            return Err(AppError::DatabaseError(message));
        }
        let now = Utc::now();
        let (state, run_at) = match run_at {
            Some(at) if at > now => (EntryState::Scheduled, at),
            _ => (EntryState::Pending, now),
        };
        let entry = QueueEntry {
            id: Uuid::new_v4(),
            queue: UNIT_QUEUE.to_string(),
            payload: payload.clone(),
            state,
            run_at,
            attempts: 0,
            max_attempts: 3,
            last_error: None,
            worker_id: None,
            created_at: now,
            updated_at: now,
        };
        let id = entry.id;
        self.entries.lock().unwrap().push(entry);
        Ok(id)
    }

    async fn claim(&self, worker_id: &str) -> Result<Option<QueueEntry>, AppError> {
        let now = Utc::now();
        let mut entries = self.entries.lock().unwrap();
        let position = entries
            .iter()
            .position(|e| e.state == EntryState::Pending)
            .or_else(|| {
                entries.iter().position(|e| {
                    matches!(e.state, EntryState::Scheduled | EntryState::Retry) && e.run_at <= now
                })
            });
        Ok(position.map(|i| {
            let entry = &mut entries[i];
            entry.state = EntryState::Running;
            entry.worker_id = Some(worker_id.to_string());
            entry.updated_at = now;
            entry.clone()
        }))
    }

    async fn complete(&self, id: Uuid) -> Result<(), AppError> {
        self.with_entry(id, |e| {
            e.state = EntryState::Done;
            e.worker_id = None;
        })
    }

    async fn fail(
        &self,
        id: Uuid,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), AppError> {
        self.with_entry(id, |e| {
            e.attempts += 1;
            e.last_error = Some(error.to_string());
            e.worker_id = None;
            match retry_at {
                Some(at) => {
                    e.state = EntryState::Retry;
                    e.run_at = at;
                }
                None => e.state = EntryState::Dead,
            }
        })
    }

    async fn entries(&self, set: QueueSet) -> Result<Vec<QueueEntry>, AppError> {
        Ok(self.entries_in(set.state()))
    }

    async fn remove(&self, id: Uuid) -> Result<bool, AppError> {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|e| e.id != id || e.state == EntryState::Running);
        Ok(entries.len() < before)
    }

    async fn release_worker_entries(&self, worker_id: &str) -> Result<u64, AppError> {
        let mut entries = self.entries.lock().unwrap();
        let mut released = 0;
        for entry in entries
            .iter_mut()
            .filter(|e| e.state == EntryState::Running && e.worker_id.as_deref() == Some(worker_id))
        {
            entry.state = EntryState::Pending;
            entry.worker_id = None;
            released += 1;
        }
        Ok(released)
    }

    async fn register_recurring(&self, job: &RecurringJob) -> Result<(), AppError> {
        self.recurring
            .lock()
            .unwrap()
            .insert(job.name.clone(), job.clone());
        Ok(())
    }

    async fn remove_recurring(&self, name: &str) -> Result<bool, AppError> {
        Ok(self.recurring.lock().unwrap().remove(name).is_some())
    }

    async fn list_recurring(&self) -> Result<Vec<RecurringJob>, AppError> {
        Ok(self.recurring.lock().unwrap().values().cloned().collect())
    }

    async fn due_recurring(&self, now: DateTime<Utc>) -> Result<Vec<RecurringJob>, AppError> {
        Ok(self
            .recurring
            .lock()
            .unwrap()
            .values()
            .filter(|job| job.next_fire_at.is_some_and(|at| at <= now))
            .cloned()
            .collect())
    }

    async fn advance_recurring(
        &self,
        name: &str,
        expected: DateTime<Utc>,
        next: Option<DateTime<Utc>>,
    ) -> Result<bool, AppError> {
        let mut recurring = self.recurring.lock().unwrap();
        match recurring.get_mut(name) {
            Some(job) if job.next_fire_at == Some(expected) => {
                job.next_fire_at = next;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// ---------------------------------------------------------------------------
// InMemoryScheduleStore
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct InMemoryScheduleStore {
    definitions: Arc<Mutex<Vec<CronDefinition>>>,
}

impl InMemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScheduleStore for InMemoryScheduleStore {
    async fn list(&self) -> Result<Vec<CronDefinition>, AppError> {
        Ok(self.definitions.lock().unwrap().clone())
    }

    async fn get(&self, task_type: TaskType) -> Result<Option<CronDefinition>, AppError> {
        Ok(self
            .definitions
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.task_type == task_type)
            .cloned())
    }

    async fn save(&self, definition: &CronDefinition) -> Result<(), AppError> {
        let mut definitions = self.definitions.lock().unwrap();
        match definitions.iter_mut().find(|d| d.task_type == definition.task_type) {
            Some(existing) => *existing = definition.clone(),
            None => definitions.push(definition.clone()),
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockTransport
// ---------------------------------------------------------------------------

/// Canned pages keyed by URL. Unknown text URLs are a 404, unknown byte URLs
/// return a small placeholder body.
#[derive(Clone, Default)]
pub struct MockTransport {
    pages: Arc<Mutex<HashMap<String, String>>>,
    failures: Arc<Mutex<HashMap<String, String>>>,
    delay: Option<Duration>,
    text_calls: Arc<AtomicUsize>,
    byte_calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: &str, body: &str) -> Self {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), body.to_string());
        self
    }

    /// Every request to `url` fails with `HttpError(message)`.
    pub fn fail_url(self, url: &str, message: &str) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(url.to_string(), message.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn text_calls(&self) -> usize {
        self.text_calls.load(Ordering::SeqCst)
    }

    pub fn byte_calls(&self) -> usize {
        self.byte_calls.load(Ordering::SeqCst)
    }

    /// Highest number of overlapping requests observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn enter(&self, url: &str) -> Result<(), AppError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.failures.lock().unwrap().get(url) {
            Some(message) => Err(AppError::HttpError(message.clone())),
            None => Ok(()),
        }
    }
}

impl HttpTransport for MockTransport {
    async fn get_text(
        &self,
        url: &str,
        _proxy: Option<&ProxyEndpoint>,
    ) -> Result<String, AppError> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        self.enter(url).await?;
        self.pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| AppError::HttpError(format!("HTTP 404 for {url}")))
    }

    async fn get_bytes(
        &self,
        url: &str,
        _proxy: Option<&ProxyEndpoint>,
    ) -> Result<Vec<u8>, AppError> {
        self.byte_calls.fetch_add(1, Ordering::SeqCst);
        self.enter(url).await?;
        Ok(self
            .pages
            .lock()
            .unwrap()
            .get(url)
            .map(|body| body.as_bytes().to_vec())
            .unwrap_or_else(|| b"\x89PNG mock image".to_vec()))
    }

    async fn post_json(
        &self,
        url: &str,
        _body: &Value,
        _proxy: Option<&ProxyEndpoint>,
    ) -> Result<Value, AppError> {
        let text = self.get_text(url, None).await?;
        Ok(serde_json::from_str(&text)?)
    }
}

// ---------------------------------------------------------------------------
// MockApi
// ---------------------------------------------------------------------------

/// Structured API with a canned category tree, search pages and products.
#[derive(Clone, Default)]
pub struct MockApi {
    categories: Option<Value>,
    search: HashMap<String, Vec<Value>>,
    products: HashMap<String, Value>,
    search_calls: Arc<AtomicUsize>,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_categories(mut self, tree: Value) -> Self {
        self.categories = Some(tree);
        self
    }

    /// Listing for `category_id`, paged by the caller's offset and size.
    pub fn with_search(mut self, category_id: &str, items: Vec<Value>) -> Self {
        self.search.insert(category_id.to_string(), items);
        self
    }

    pub fn with_product(mut self, item_no: &str, product: Value) -> Self {
        self.products.insert(item_no.to_string(), product);
        self
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }
}

impl CatalogApi for MockApi {
    async fn fetch_categories(&self) -> Result<Value, AppError> {
        self.categories
            .clone()
            .ok_or_else(|| AppError::NetworkError("category endpoint unreachable".into()))
    }

    async fn search_category(
        &self,
        category_id: &str,
        offset: usize,
        size: usize,
    ) -> Result<Vec<Value>, AppError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .search
            .get(category_id)
            .map(|items| items.iter().skip(offset).take(size).cloned().collect())
            .unwrap_or_default())
    }

    async fn lookup_product(&self, item_no: &str) -> Result<Option<Value>, AppError> {
        Ok(self.products.get(item_no).cloned())
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

/// Extractor keyed by exact HTML body. Unknown bodies extract nothing.
#[derive(Clone, Default)]
pub struct MockExtractor {
    products: HashMap<String, ProductFields>,
    category_products: Vec<Value>,
    bestsellers: Vec<String>,
    popular: Vec<String>,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_product(mut self, html: &str, fields: ProductFields) -> Self {
        self.products.insert(html.to_string(), fields);
        self
    }

    /// Tiles returned for any category page.
    pub fn with_category_products(mut self, tiles: Vec<Value>) -> Self {
        self.category_products = tiles;
        self
    }

    pub fn with_bestsellers(mut self, skus: Vec<String>) -> Self {
        self.bestsellers = skus;
        self
    }

    pub fn with_popular_categories(mut self, ids: Vec<String>) -> Self {
        self.popular = ids;
        self
    }
}

impl HtmlExtractor for MockExtractor {
    fn product_fields(&self, html: &str) -> ProductFields {
        self.products.get(html).cloned().unwrap_or_default()
    }

    fn category_products(&self, _html: &str) -> Vec<Value> {
        self.category_products.clone()
    }

    fn bestseller_skus(&self, _html: &str) -> Vec<String> {
        self.bestsellers.clone()
    }

    fn popular_category_ids(&self, _html: &str) -> Vec<String> {
        self.popular.clone()
    }
}

// ---------------------------------------------------------------------------
// MockRenderer
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct MockRenderer {
    html: Option<String>,
    calls: Arc<AtomicUsize>,
}

impl MockRenderer {
    /// Renderer that is never available.
    pub fn disabled() -> Self {
        Self {
            html: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn returning(html: &str) -> Self {
        Self {
            html: Some(html.to_string()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PageRenderer for MockRenderer {
    async fn render_interactive(
        &self,
        _url: &str,
        _policy: &RenderPolicy,
    ) -> Result<Option<String>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.html.clone())
    }
}

// ---------------------------------------------------------------------------
// InMemoryCatalog
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct CategoryRow {
    category: CategoryUpsert,
    local_image: Option<String>,
}

#[derive(Clone)]
struct ProductRow {
    product: ProductUpsert,
    images: Option<ImageSet>,
    bestseller: bool,
}

type ProductHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Catalog tables in memory, ordered by id.
#[derive(Clone, Default)]
pub struct InMemoryCatalog {
    categories: Arc<Mutex<BTreeMap<String, CategoryRow>>>,
    products: Arc<Mutex<BTreeMap<String, ProductRow>>>,
    product_upserts: Arc<AtomicUsize>,
    hook: Arc<Mutex<Option<(usize, ProductHook)>>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_category(&self, id: &str, url: Option<&str>) {
        let category = CategoryUpsert {
            id: id.to_string(),
            name: Some(id.to_string()),
            translated_name: None,
            url: url.map(str::to_string),
            remote_image_url: None,
            parent_ids: Vec::new(),
            is_important: false,
            is_popular: false,
        };
        self.categories.lock().unwrap().insert(
            id.to_string(),
            CategoryRow {
                category,
                local_image: None,
            },
        );
    }

    pub fn set_remote_image(&self, id: &str, url: &str) {
        if let Some(row) = self.categories.lock().unwrap().get_mut(id) {
            row.category.remote_image_url = Some(url.to_string());
        }
    }

    pub fn add_product(&self, sku: &str, images: Vec<String>) {
        let product = ProductUpsert {
            sku: sku.to_string(),
            item_no: Some(sku.to_string()),
            name: None,
            translated_name: None,
            url: format!("/p/{sku}/"),
            price: None,
            category_id: String::new(),
            images,
            home_delivery: None,
            details: ProductFields::default(),
            is_parcel: None,
        };
        self.products.lock().unwrap().insert(
            sku.to_string(),
            ProductRow {
                product,
                images: None,
                bestseller: false,
            },
        );
    }

    pub fn flag_bestseller(&self, sku: &str) {
        if let Some(row) = self.products.lock().unwrap().get_mut(sku) {
            row.bestseller = true;
        }
    }

    pub fn category(&self, id: &str) -> Option<CategoryUpsert> {
        self.categories
            .lock()
            .unwrap()
            .get(id)
            .map(|row| row.category.clone())
    }

    pub fn product(&self, sku: &str) -> Option<ProductUpsert> {
        self.products
            .lock()
            .unwrap()
            .get(sku)
            .map(|row| row.product.clone())
    }

    pub fn images_of(&self, sku: &str) -> Option<ImageSet> {
        self.products
            .lock()
            .unwrap()
            .get(sku)
            .and_then(|row| row.images.clone())
    }

    pub fn local_image_of(&self, id: &str) -> Option<String> {
        self.categories
            .lock()
            .unwrap()
            .get(id)
            .and_then(|row| row.local_image.clone())
    }

    pub fn bestsellers(&self) -> Vec<String> {
        self.products
            .lock()
            .unwrap()
            .values()
            .filter(|row| row.bestseller)
            .map(|row| row.product.sku.clone())
            .collect()
    }

    pub fn popular_categories(&self) -> Vec<String> {
        self.categories
            .lock()
            .unwrap()
            .values()
            .filter(|row| row.category.is_popular)
            .map(|row| row.category.id.clone())
            .collect()
    }

    /// Awaits `hook` inside the `n`-th product upsert, after the row is stored.
    pub fn on_product_count<F, Fut>(&self, n: usize, hook: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let boxed: ProductHook = Arc::new(move || -> BoxFuture<'static, ()> { Box::pin(hook()) });
        *self.hook.lock().unwrap() = Some((n, boxed));
    }
}

impl CatalogStore for InMemoryCatalog {
    async fn upsert_category(&self, category: &CategoryUpsert) -> Result<UpsertOutcome, AppError> {
        let mut categories = self.categories.lock().unwrap();
        match categories.get_mut(&category.id) {
            Some(row) => {
                let kept = row.category.translated_name.take();
                row.category = category.clone();
                if row.category.translated_name.is_none() {
                    row.category.translated_name = kept;
                }
                Ok(UpsertOutcome::Updated)
            }
            None => {
                categories.insert(
                    category.id.clone(),
                    CategoryRow {
                        category: category.clone(),
                        local_image: None,
                    },
                );
                Ok(UpsertOutcome::Created)
            }
        }
    }

    async fn active_categories(
        &self,
        only: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<CategoryRef>, AppError> {
        Ok(self
            .categories
            .lock()
            .unwrap()
            .values()
            .filter(|row| only.is_none_or(|id| row.category.id == id))
            .take(limit.unwrap_or(usize::MAX))
            .map(|row| CategoryRef {
                id: row.category.id.clone(),
                url: row.category.url.clone(),
            })
            .collect())
    }

    async fn upsert_product(&self, product: &ProductUpsert) -> Result<UpsertOutcome, AppError> {
        let outcome = {
            let mut products = self.products.lock().unwrap();
            match products.get_mut(&product.sku) {
                Some(row) => {
                    row.product = product.clone();
                    UpsertOutcome::Updated
                }
                None => {
                    products.insert(
                        product.sku.clone(),
                        ProductRow {
                            product: product.clone(),
                            images: None,
                            bestseller: false,
                        },
                    );
                    UpsertOutcome::Created
                }
            }
        };

        let count = self.product_upserts.fetch_add(1, Ordering::SeqCst) + 1;
        let hook = match self.hook.lock().unwrap().as_ref() {
            Some((n, hook)) if *n == count => Some(hook.clone()),
            _ => None,
        };
        if let Some(hook) = hook {
            hook().await;
        }
        Ok(outcome)
    }

    async fn reset_bestsellers(&self) -> Result<u64, AppError> {
        let mut reset = 0;
        for row in self.products.lock().unwrap().values_mut() {
            if row.bestseller {
                row.bestseller = false;
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn mark_bestseller(&self, sku_variants: &[String]) -> Result<bool, AppError> {
        let mut matched = false;
        for row in self.products.lock().unwrap().values_mut() {
            let hit = sku_variants.iter().any(|v| {
                *v == row.product.sku || row.product.item_no.as_deref() == Some(v.as_str())
            });
            if hit {
                row.bestseller = true;
                matched = true;
            }
        }
        Ok(matched)
    }

    async fn reset_popular_categories(&self) -> Result<u64, AppError> {
        let mut reset = 0;
        for row in self.categories.lock().unwrap().values_mut() {
            if row.category.is_popular {
                row.category.is_popular = false;
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn mark_popular_category(&self, id_or_url: &str) -> Result<bool, AppError> {
        let mut matched = false;
        for row in self.categories.lock().unwrap().values_mut() {
            if row.category.id == id_or_url || row.category.url.as_deref() == Some(id_or_url) {
                row.category.is_popular = true;
                matched = true;
            }
        }
        Ok(matched)
    }

    async fn categories_missing_images(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<CategoryImageJob>, AppError> {
        Ok(self
            .categories
            .lock()
            .unwrap()
            .values()
            .filter(|row| row.local_image.is_none())
            .filter_map(|row| {
                row.category
                    .remote_image_url
                    .clone()
                    .map(|remote_image_url| CategoryImageJob {
                        id: row.category.id.clone(),
                        remote_image_url,
                    })
            })
            .take(limit.unwrap_or(usize::MAX))
            .collect())
    }

    async fn set_category_image(
        &self,
        category_id: &str,
        local_path: &str,
    ) -> Result<(), AppError> {
        match self.categories.lock().unwrap().get_mut(category_id) {
            Some(row) => {
                row.local_image = Some(local_path.to_string());
                Ok(())
            }
            None => Err(AppError::NotFound(format!("category {category_id}"))),
        }
    }

    async fn products_with_images(
        &self,
        only_sku: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<ProductImageJob>, AppError> {
        Ok(self
            .products
            .lock()
            .unwrap()
            .values()
            .filter(|row| !row.product.images.is_empty())
            .filter(|row| only_sku.is_none_or(|sku| row.product.sku == sku))
            .take(limit.unwrap_or(usize::MAX))
            .map(|row| ProductImageJob {
                sku: row.product.sku.clone(),
                images: row.product.images.clone(),
            })
            .collect())
    }

    async fn record_product_images(&self, sku: &str, images: &ImageSet) -> Result<(), AppError> {
        match self.products.lock().unwrap().get_mut(sku) {
            Some(row) => {
                row.images = Some(images.clone());
                Ok(())
            }
            None => Err(AppError::NotFound(format!("product {sku}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingNotifier / RecordingReporter
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct RecordingNotifier {
    events: Arc<Mutex<Vec<TaskEvent>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TaskEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    async fn notify(&self, event: TaskEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Records worker events by name, e.g. `entry_claimed`.
#[derive(Clone, Default)]
pub struct RecordingReporter {
    names: Arc<Mutex<Vec<String>>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_names(&self) -> Vec<String> {
        self.names.lock().unwrap().clone()
    }
}

impl WorkerReporter for RecordingReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        let name = match event {
            WorkerEvent::Started { .. } => "started",
            WorkerEvent::Polling => "polling",
            WorkerEvent::RecurringFired { .. } => "recurring_fired",
            WorkerEvent::EntryClaimed { .. } => "entry_claimed",
            WorkerEvent::UnitStarted { .. } => "unit_started",
            WorkerEvent::UnitFinished { .. } => "unit_finished",
            WorkerEvent::EntryFailed { .. } => "entry_failed",
            WorkerEvent::ShuttingDown { .. } => "shutting_down",
            WorkerEvent::Stopped { .. } => "stopped",
        };
        self.names.lock().unwrap().push(name.to_string());
    }
}
