use super::*;
use std::sync::Arc;

use barcode_harvester::image_fetcher::ImageFetcher;
use barcode_harvester::maintenance::{duplicate_images, empty_images, CacheMaintenance};
use barcode_harvester::models::{CacheEntry, ProductName};
use barcode_harvester::Pipeline;

#[tokio::test]
async fn test_legacy_marks_suppress_fetching() -> anyhow::Result<()> {
    let dir = temp_dir();
    let config = get_test_config(dir.path());
    create_input_workbook(&config.spreadsheet.path, 12, &[Some("1"), Some("2"), Some("3")])?;

    let store = create_test_store(&config.cache).await?;
    // Rows as written by older tooling, straight into the table.
    let pool = sqlx::SqlitePool::connect(&config.cache.database_url).await?;
    for (barcode, name) in [("1", "Not Found"), ("2", "N/A"), ("3", "Not Found And No Search")] {
        sqlx::query("INSERT INTO products (barcode, product_name) VALUES (?, ?)")
            .bind(barcode)
            .bind(name)
            .execute(&pool)
            .await?;
    }
    pool.close().await;

    let (site, fetcher) = FakeSite::new().into_fetcher();
    let images = Arc::new(ImageFetcher::new(&config.images)?);
    let summary = Pipeline::new(config.clone(), store.clone(), fetcher, images).run().await?;

    assert_eq!(summary.crawl.skipped_known, 3);
    assert_eq!(site.opened(), 0);

    let failures = CacheMaintenance::new(store).failures().await?;
    assert_eq!(failures.not_found, vec!["1"]);
    assert_eq!(failures.malformed, vec!["2"]);
    assert_eq!(failures.excluded, vec![("3".to_string(), "Not Found".to_string())]);

    Ok(())
}

#[tokio::test]
async fn test_reset_makes_barcode_fetchable_again() -> anyhow::Result<()> {
    let dir = temp_dir();
    let config = get_test_config(dir.path());
    create_input_workbook(&config.spreadsheet.path, 12, &[Some("3346130022886")])?;

    let store = create_test_store(&config.cache).await?;
    let (site, fetcher) = FakeSite::new().page("3346130022886", SitePage::NotFound).into_fetcher();
    let images = Arc::new(ImageFetcher::new(&config.images)?);
    let pipeline = Pipeline::new(config.clone(), store.clone(), fetcher, images);
    let tools = CacheMaintenance::new(store.clone());

    pipeline.run().await?;
    pipeline.run().await?;
    assert_eq!(site.renders_of("3346130022886"), 1);

    // Reset list: first column, below the header.
    let reset_list = dir.path().join("reset.xlsx");
    let mut workbook = Workbook::create(&reset_list);
    workbook.set_text(1, 1, "barcode")?;
    workbook.set_text(1, 2, "3346130022886")?;
    workbook.save()?;

    assert_eq!(tools.reset_from_workbook(&reset_list).await?, 1);
    pipeline.run().await?;
    assert_eq!(site.renders_of("3346130022886"), 2);

    Ok(())
}

#[tokio::test]
async fn test_exclude_keeps_image_fields_and_exports() -> anyhow::Result<()> {
    let dir = temp_dir();
    let config = get_test_config(dir.path());
    let store = create_test_store(&config.cache).await?;
    let tools = CacheMaintenance::new(store.clone());

    store
        .put(&CacheEntry::new(
            "768614143925",
            Some(ProductName::Found("Acme Serum".into())),
            Some("https://example.com/a.jpg".into()),
            Some("images/768614143925.jpg".into()),
        ))
        .await;

    assert_eq!(tools.exclude(&["768614143925".into()], "not cosmetic").await?, 1);
    let entry = tools.show("768614143925").await?.expect("still cached");
    assert_eq!(entry.product_name, Some(ProductName::Excluded("not cosmetic".into())));
    assert_eq!(entry.image_filepath.as_deref(), Some("images/768614143925.jpg"));
    // Not a plain failure mark, so there is nothing to restore.
    assert_eq!(tools.restore_marks(&["768614143925".into()]).await?, 0);

    let export = dir.path().join("exports").join("cache.xlsx");
    assert_eq!(tools.export(&export).await?, 1);
    let workbook = Workbook::open(&export)?;
    assert_eq!(workbook.text(1, 2).as_deref(), Some("768614143925"));
    assert_eq!(workbook.text(2, 2).as_deref(), Some("not cosmetic And No Search"));
    assert_eq!(workbook.text(3, 2).as_deref(), Some("https://example.com/a.jpg"));

    Ok(())
}

#[test]
fn test_image_directory_reports() -> anyhow::Result<()> {
    let dir = temp_dir();
    let images = dir.path().join("images");
    std::fs::create_dir_all(&images)?;
    std::fs::write(images.join("1.png"), png_bytes(4, 4))?;
    std::fs::write(images.join("2.png"), png_bytes(4, 4))?;
    std::fs::write(images.join("3.png"), png_bytes(8, 4))?;
    std::fs::write(images.join("4.jpg"), b"")?;

    assert_eq!(empty_images(&images)?, vec![images.join("4.jpg")]);
    assert_eq!(duplicate_images(&images)?, vec![vec![images.join("1.png"), images.join("2.png")]]);

    Ok(())
}
