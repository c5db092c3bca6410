use sqlx::{PgPool, Pool, Postgres};

use shelf_core::error::AppError;
use shelf_core::models::{
    CategoryImageJob, CategoryRef, CategoryUpsert, ImageSet, ProductImageJob, ProductUpsert,
    UpsertOutcome,
};
use shelf_core::traits::CatalogStore;

/// Catalog tables (`categories`, `products`) written by the acquisition units.
#[derive(Clone)]
pub struct CatalogRepository {
    pool: Pool<Postgres>,
}

impl CatalogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn outcome(inserted: bool) -> UpsertOutcome {
    if inserted {
        UpsertOutcome::Created
    } else {
        UpsertOutcome::Updated
    }
}

fn limit_param(limit: Option<usize>) -> Option<i64> {
    limit.map(|l| l as i64)
}

impl CatalogStore for CatalogRepository {
    async fn upsert_category(&self, category: &CategoryUpsert) -> Result<UpsertOutcome, AppError> {
        // `xmax = 0` only holds for a freshly inserted tuple.
        let (inserted,): (bool,) = sqlx::query_as(
            r#"
            INSERT INTO categories
                (id, name, translated_name, url, remote_image_url, parent_ids,
                 is_important, is_popular)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name,
                translated_name = COALESCE(EXCLUDED.translated_name, categories.translated_name),
                url = EXCLUDED.url,
                remote_image_url = EXCLUDED.remote_image_url,
                parent_ids = EXCLUDED.parent_ids,
                is_important = EXCLUDED.is_important,
                is_popular = EXCLUDED.is_popular,
                is_deleted = FALSE,
                updated_at = NOW()
            RETURNING (xmax = 0)
            "#,
        )
        .bind(&category.id)
        .bind(&category.name)
        .bind(&category.translated_name)
        .bind(&category.url)
        .bind(&category.remote_image_url)
        .bind(&category.parent_ids)
        .bind(category.is_important)
        .bind(category.is_popular)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(outcome(inserted))
    }

    async fn active_categories(
        &self,
        only: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<CategoryRef>, AppError> {
        let rows: Vec<(String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT id, url FROM categories
            WHERE NOT is_deleted AND ($1::text IS NULL OR id = $1)
            ORDER BY id
            LIMIT $2
            "#,
        )
        .bind(only)
        .bind(limit_param(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(id, url)| CategoryRef { id, url })
            .collect())
    }

    async fn upsert_product(&self, product: &ProductUpsert) -> Result<UpsertOutcome, AppError> {
        let details = serde_json::to_value(&product.details)?;
        let (inserted,): (bool,) = sqlx::query_as(
            r#"
            INSERT INTO products
                (sku, item_no, name, translated_name, url, price, category_id, images,
                 home_delivery, details, is_parcel)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (sku) DO UPDATE
            SET item_no = COALESCE(EXCLUDED.item_no, products.item_no),
                name = COALESCE(EXCLUDED.name, products.name),
                translated_name = COALESCE(EXCLUDED.translated_name, products.translated_name),
                url = EXCLUDED.url,
                price = COALESCE(EXCLUDED.price, products.price),
                category_id = EXCLUDED.category_id,
                images = EXCLUDED.images,
                home_delivery = COALESCE(EXCLUDED.home_delivery, products.home_delivery),
                details = EXCLUDED.details,
                is_parcel = COALESCE(EXCLUDED.is_parcel, products.is_parcel),
                updated_at = NOW()
            RETURNING (xmax = 0)
            "#,
        )
        .bind(&product.sku)
        .bind(&product.item_no)
        .bind(&product.name)
        .bind(&product.translated_name)
        .bind(&product.url)
        .bind(product.price)
        .bind(&product.category_id)
        .bind(&product.images)
        .bind(&product.home_delivery)
        .bind(details)
        .bind(product.is_parcel)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(outcome(inserted))
    }

    async fn reset_bestsellers(&self) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"UPDATE products SET is_bestseller = FALSE, updated_at = NOW() WHERE is_bestseller"#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn mark_bestseller(&self, sku_variants: &[String]) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE products
            SET is_bestseller = TRUE, updated_at = NOW()
            WHERE sku = ANY($1) OR item_no = ANY($1)
            "#,
        )
        .bind(sku_variants)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn reset_popular_categories(&self) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"UPDATE categories SET is_popular = FALSE, updated_at = NOW() WHERE is_popular"#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn mark_popular_category(&self, id_or_url: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE categories
            SET is_popular = TRUE, updated_at = NOW()
            WHERE NOT is_deleted AND (id = $1 OR url = $1)
            "#,
        )
        .bind(id_or_url)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn categories_missing_images(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<CategoryImageJob>, AppError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT id, remote_image_url FROM categories
            WHERE local_image IS NULL AND remote_image_url IS NOT NULL AND NOT is_deleted
            ORDER BY id
            LIMIT $1
            "#,
        )
        .bind(limit_param(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(id, remote_image_url)| CategoryImageJob { id, remote_image_url })
            .collect())
    }

    async fn set_category_image(
        &self,
        category_id: &str,
        local_path: &str,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"UPDATE categories SET local_image = $2, updated_at = NOW() WHERE id = $1"#,
        )
        .bind(category_id)
        .bind(local_path)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("category {category_id}")));
        }
        Ok(())
    }

    async fn products_with_images(
        &self,
        only_sku: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<ProductImageJob>, AppError> {
        let rows: Vec<(String, Vec<String>)> = sqlx::query_as(
            r#"
            SELECT sku, images FROM products
            WHERE cardinality(images) > 0 AND ($1::text IS NULL OR sku = $1)
            ORDER BY sku
            LIMIT $2
            "#,
        )
        .bind(only_sku)
        .bind(limit_param(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(sku, images)| ProductImageJob { sku, images })
            .collect())
    }

    async fn record_product_images(&self, sku: &str, images: &ImageSet) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE products
            SET local_images = $2,
                images_total = $3,
                images_stored = $4,
                images_incomplete = $5,
                updated_at = NOW()
            WHERE sku = $1
            "#,
        )
        .bind(sku)
        .bind(&images.local_paths)
        .bind(images.total as i32)
        .bind(images.stored as i32)
        .bind(images.incomplete)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("product {sku}")));
        }
        Ok(())
    }
}
