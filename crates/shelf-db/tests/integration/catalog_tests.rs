use serde_json::json;
use shelf_core::models::{CategoryUpsert, ImageSet, ProductFields, ProductUpsert, UpsertOutcome};
use shelf_core::traits::CatalogStore;
use shelf_db::CatalogRepository;

use crate::integration::common::setup_test_db;

fn category(id: &str, translated: Option<&str>) -> CategoryUpsert {
    CategoryUpsert {
        id: id.into(),
        name: Some(format!("Kategoria {id}")),
        translated_name: translated.map(str::to_string),
        url: Some(format!("https://www.ikea.com/pl/pl/cat/{id}/")),
        remote_image_url: Some(format!("https://cdn.test/{id}.jpg")),
        parent_ids: vec!["root".into()],
        is_important: false,
        is_popular: false,
    }
}

fn product(sku: &str, images: Vec<String>) -> ProductUpsert {
    ProductUpsert {
        sku: sku.into(),
        item_no: Some(sku.trim_start_matches('s').into()),
        name: Some("Sofa".into()),
        translated_name: None,
        url: format!("https://www.ikea.com/pl/pl/p/sofa-{sku}/"),
        price: Some(1299.0),
        category_id: "10".into(),
        images,
        home_delivery: Some(json!({"available": true})),
        details: ProductFields {
            weight: Some(42.0),
            ..ProductFields::default()
        },
        is_parcel: Some(false),
    }
}

#[tokio::test]
async fn category_upsert_reports_outcome_and_keeps_translation() {
    let (pool, _container) = setup_test_db().await;
    let repo = CatalogRepository::new(pool.clone());

    assert_eq!(
        repo.upsert_category(&category("10", Some("Диваны"))).await.unwrap(),
        UpsertOutcome::Created
    );
    assert_eq!(
        repo.upsert_category(&category("10", None)).await.unwrap(),
        UpsertOutcome::Updated
    );

    let (translated,): (Option<String>,) =
        sqlx::query_as("SELECT translated_name FROM categories WHERE id = '10'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(translated.as_deref(), Some("Диваны"));
}

#[tokio::test]
async fn active_categories_filter_and_limit() {
    let (pool, _container) = setup_test_db().await;
    let repo = CatalogRepository::new(pool.clone());
    for id in ["10", "20", "30"] {
        repo.upsert_category(&category(id, None)).await.unwrap();
    }
    sqlx::query("UPDATE categories SET is_deleted = TRUE WHERE id = '30'")
        .execute(&pool)
        .await
        .unwrap();

    let all = repo.active_categories(None, None).await.unwrap();
    assert_eq!(all.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(), vec!["10", "20"]);

    let one = repo.active_categories(Some("20"), None).await.unwrap();
    assert_eq!(one.len(), 1);
    assert!(one[0].url.as_deref().unwrap().ends_with("/cat/20/"));

    assert_eq!(repo.active_categories(None, Some(1)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn product_upsert_then_bestseller_marking() {
    let (pool, _container) = setup_test_db().await;
    let repo = CatalogRepository::new(pool);

    assert_eq!(
        repo.upsert_product(&product("s49442906", vec![])).await.unwrap(),
        UpsertOutcome::Created
    );
    assert_eq!(
        repo.upsert_product(&product("s49442906", vec![])).await.unwrap(),
        UpsertOutcome::Updated
    );
    repo.upsert_product(&product("10382", vec![])).await.unwrap();

    assert!(repo.mark_bestseller(&["10382".to_string()]).await.unwrap());
    // Matched through item_no.
    assert!(repo.mark_bestseller(&["49442906".to_string()]).await.unwrap());
    assert!(!repo.mark_bestseller(&["00000000".to_string()]).await.unwrap());

    assert_eq!(repo.reset_bestsellers().await.unwrap(), 2);
    assert_eq!(repo.reset_bestsellers().await.unwrap(), 0);
}

#[tokio::test]
async fn popular_categories_match_id_or_url() {
    let (pool, _container) = setup_test_db().await;
    let repo = CatalogRepository::new(pool);
    repo.upsert_category(&category("10", None)).await.unwrap();
    repo.upsert_category(&category("20", None)).await.unwrap();

    assert!(repo.mark_popular_category("10").await.unwrap());
    assert!(
        repo.mark_popular_category("https://www.ikea.com/pl/pl/cat/20/")
            .await
            .unwrap()
    );
    assert!(!repo.mark_popular_category("missing").await.unwrap());
    assert_eq!(repo.reset_popular_categories().await.unwrap(), 2);
}

#[tokio::test]
async fn category_images_leave_the_backlog_once_set() {
    let (pool, _container) = setup_test_db().await;
    let repo = CatalogRepository::new(pool);
    repo.upsert_category(&category("10", None)).await.unwrap();
    repo.upsert_category(&category("20", None)).await.unwrap();

    let missing = repo.categories_missing_images(None).await.unwrap();
    assert_eq!(missing.len(), 2);
    assert_eq!(missing[0].remote_image_url, "https://cdn.test/10.jpg");

    repo.set_category_image("10", "categories/ab/cd/ef/abcdef.jpg")
        .await
        .unwrap();
    let missing = repo.categories_missing_images(Some(5)).await.unwrap();
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].id, "20");

    assert!(repo.set_category_image("nope", "x.jpg").await.is_err());
}

#[tokio::test]
async fn product_images_are_recorded() {
    let (pool, _container) = setup_test_db().await;
    let repo = CatalogRepository::new(pool.clone());
    let urls = vec!["https://cdn.test/1.jpg".to_string(), "https://cdn.test/2.jpg".to_string()];
    repo.upsert_product(&product("101", urls.clone())).await.unwrap();
    repo.upsert_product(&product("102", vec![])).await.unwrap();

    let jobs = repo.products_with_images(None, None).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].images, urls);
    assert!(repo.products_with_images(Some("102"), None).await.unwrap().is_empty());

    let set = ImageSet {
        local_paths: vec!["products/aa/bb/cc/hash.jpg".into()],
        total: 2,
        stored: 1,
        incomplete: true,
    };
    repo.record_product_images("101", &set).await.unwrap();

    let (stored, incomplete): (i32, bool) =
        sqlx::query_as("SELECT images_stored, images_incomplete FROM products WHERE sku = '101'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(stored, 1);
    assert!(incomplete);
}
