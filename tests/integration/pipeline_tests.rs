use super::*;
use std::sync::Arc;

use barcode_harvester::image_fetcher::ImageFetcher;
use barcode_harvester::models::{CacheEntry, ProductName};
use barcode_harvester::spreadsheet::IMAGE_DOWNLOAD_FAILED;
use barcode_harvester::Pipeline;

#[tokio::test]
async fn test_full_run_writes_back_and_caches() -> anyhow::Result<()> {
    let dir = temp_dir();
    let config = get_test_config(dir.path());
    let server = MockServer::start().await;
    let acme_image = serve_png(&server, "768614143925.png", 300, 200).await;

    create_input_workbook(
        &config.spreadsheet.path,
        12,
        &[
            Some("768614143925"),
            Some("3346130022886"),
            None,
            Some("111"),
            Some("222"),
            Some("333"),
        ],
    )?;

    // Row 15 is already known from an earlier run.
    let store = create_test_store(&config.cache).await?;
    std::fs::create_dir_all(&config.images.directory)?;
    let cached_image = config.images.directory.join("111.png");
    std::fs::write(&cached_image, png_bytes(64, 64))?;
    store
        .put(&CacheEntry::new(
            "111",
            Some(ProductName::Found("Cached Cream".into())),
            Some("https://example.com/111.png".into()),
            Some(cached_image.display().to_string()),
        ))
        .await;

    let (site, fetcher) = FakeSite::new()
        .product("768614143925", "Acme Serum 50ml", Some(acme_image))
        .page("3346130022886", SitePage::NotFound)
        .product("222", "Plain Balm", None)
        .page("333", SitePage::Challenge)
        .into_fetcher();
    let images = Arc::new(ImageFetcher::new(&config.images)?);

    let pipeline = Pipeline::new(config.clone(), store.clone(), fetcher, images);
    let summary = pipeline.run().await?;

    assert_eq!(summary.barcodes, 5);
    assert_eq!(summary.crawl.succeeded, 3);
    assert_eq!(summary.crawl.cache_hits, 1);
    assert_eq!(summary.crawl.crawled, 2);
    assert_eq!(summary.crawl.not_found, 1);
    assert_eq!(summary.crawl.exhausted, 1);
    assert_eq!(summary.crawl.blocked_attempts, 3);
    assert_eq!(summary.write_back.names_written, 3);
    assert_eq!(summary.write_back.images_embedded, 2);
    assert_eq!(summary.write_back.placeholders, 1);
    assert!(summary.translation.is_none());
    println!("✓ Run summary: {}", serde_json::to_string(&summary)?);

    // Cached barcode never reached the site; every session was released.
    assert_eq!(site.renders_of("111"), 0);
    assert_eq!(site.renders_of("333"), 3);
    assert_eq!(site.released.load(Ordering::SeqCst), site.opened());

    let workbook = Workbook::open(&config.spreadsheet.path)?;
    assert_eq!(workbook.text(15, 12).as_deref(), Some("Acme Serum 50ml"));
    assert_eq!(workbook.text(15, 15).as_deref(), Some("Cached Cream"));
    assert_eq!(workbook.text(15, 16).as_deref(), Some("Plain Balm"));
    assert_eq!(workbook.text(14, 16).as_deref(), Some(IMAGE_DOWNLOAD_FAILED));
    // NotFound and exhausted rows are left untouched.
    assert_eq!(workbook.text(15, 13), None);
    assert_eq!(workbook.text(14, 13), None);
    assert_eq!(workbook.text(15, 17), None);
    assert_eq!(workbook.text(14, 17), None);
    assert_eq!(workbook.row_height(12), Some(config.spreadsheet.row_height));

    assert_eq!(
        files_in(&config.images.thumbnail_directory),
        vec![
            config.images.thumbnail_directory.join("111.png"),
            config.images.thumbnail_directory.join("768614143925.png"),
        ]
    );

    let downloaded = store.get("768614143925").await.expect("cached");
    assert_eq!(
        downloaded.image_filepath,
        Some(config.images.directory.join("768614143925.png").display().to_string())
    );
    assert_eq!(
        store.get("3346130022886").await.and_then(|e| e.product_name),
        Some(ProductName::NotFound)
    );
    assert!(store.get("333").await.is_none());

    Ok(())
}

#[tokio::test]
async fn test_second_run_uses_cache() -> anyhow::Result<()> {
    let dir = temp_dir();
    let config = get_test_config(dir.path());
    let server = MockServer::start().await;
    let image = serve_png(&server, "768614143925.jpg", 40, 40).await;

    create_input_workbook(
        &config.spreadsheet.path,
        12,
        &[Some("768614143925"), Some("3346130022886"), Some("222")],
    )?;

    let store = create_test_store(&config.cache).await?;
    let (site, fetcher) = FakeSite::new()
        .product("768614143925", "Acme Serum 50ml", Some(image))
        .page("3346130022886", SitePage::NotFound)
        .product("222", "Plain Balm", None)
        .into_fetcher();
    let images = Arc::new(ImageFetcher::new(&config.images)?);
    let pipeline = Pipeline::new(config.clone(), store.clone(), fetcher, images);

    let first = pipeline.run().await?;
    assert_eq!(first.crawl.crawled, 2);
    assert_eq!(first.crawl.not_found, 1);

    let second = pipeline.run().await?;
    assert_eq!(second.crawl.cache_hits, 1);
    assert_eq!(second.crawl.skipped_known, 1);
    // A name without an image is not a complete hit, so it is fetched again.
    assert_eq!(second.crawl.crawled, 1);

    assert_eq!(site.renders_of("768614143925"), 1);
    assert_eq!(site.renders_of("3346130022886"), 1);
    assert_eq!(site.renders_of("222"), 2);
    assert_eq!(files_in(&config.images.directory).len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_not_found_leaves_row_untouched() -> anyhow::Result<()> {
    let dir = temp_dir();
    let config = get_test_config(dir.path());
    create_input_workbook(&config.spreadsheet.path, 12, &[Some("3346130022886")])?;

    let store = create_test_store(&config.cache).await?;
    let (_site, fetcher) = FakeSite::new().page("3346130022886", SitePage::NotFound).into_fetcher();
    let images = Arc::new(ImageFetcher::new(&config.images)?);

    let summary = Pipeline::new(config.clone(), store.clone(), fetcher, images).run().await?;
    assert_eq!(summary.crawl.succeeded, 0);
    assert_eq!(summary.write_back.names_written, 0);

    let entry = store.get("3346130022886").await.expect("sentinel stored");
    assert_eq!(entry.product_name, Some(ProductName::NotFound));
    assert_eq!(entry.image_url, None);

    let workbook = Workbook::open(&config.spreadsheet.path)?;
    assert_eq!(workbook.text(2, 12).as_deref(), Some("3346130022886"));
    assert_eq!(workbook.text(14, 12), None);
    assert_eq!(workbook.text(15, 12), None);

    Ok(())
}

#[tokio::test]
async fn test_malformed_page_is_cached_without_image() -> anyhow::Result<()> {
    let dir = temp_dir();
    let config = get_test_config(dir.path());
    create_input_workbook(&config.spreadsheet.path, 12, &[Some("4005900036728")])?;

    let store = create_test_store(&config.cache).await?;
    let (site, fetcher) = FakeSite::new().page("4005900036728", SitePage::NoName).into_fetcher();
    let images = Arc::new(ImageFetcher::new(&config.images)?);
    let pipeline = Pipeline::new(config.clone(), store.clone(), fetcher, images);

    let summary = pipeline.run().await?;
    assert_eq!(summary.crawl.malformed, 1);
    assert_eq!(
        store.get("4005900036728").await.and_then(|e| e.product_name),
        Some(ProductName::Malformed)
    );

    pipeline.run().await?;
    assert_eq!(site.renders_of("4005900036728"), 1);
    assert!(files_in(&config.images.directory).is_empty());

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_repeated_barcode_rows_share_one_lookup() -> anyhow::Result<()> {
    let dir = temp_dir();
    let config = get_test_config(dir.path());
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/img/777.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(png_bytes(600, 600))
                .set_delay(Duration::from_millis(30)),
        )
        .expect(1)
        .mount(&server)
        .await;
    let image_url = format!("{}/img/777.png", server.uri());

    create_input_workbook(
        &config.spreadsheet.path,
        12,
        &[Some("777"), Some("777"), Some("222"), Some("777"), Some("777")],
    )?;

    let store = create_test_store(&config.cache).await?;
    let (site, fetcher) = FakeSite::with_latency(Duration::from_millis(10))
        .product("777", "Acme Serum 50ml", Some(image_url))
        .product("222", "Plain Balm", None)
        .into_fetcher();
    let images = Arc::new(ImageFetcher::new(&config.images)?);

    let summary = Pipeline::new(config.clone(), store.clone(), fetcher, images).run().await?;

    assert_eq!(summary.barcodes, 5);
    assert_eq!(summary.crawl.crawled, 2);
    assert_eq!(summary.write_back.names_written, 5);
    assert_eq!(summary.write_back.images_embedded, 4);
    assert_eq!(summary.write_back.placeholders, 1);
    assert_eq!(site.renders_of("777"), 1);

    let expected = config.images.directory.join("777.png");
    assert_eq!(files_in(&config.images.directory), vec![expected.clone()]);
    assert_eq!(
        store.get("777").await.and_then(|e| e.image_filepath),
        Some(expected.display().to_string())
    );

    let workbook = Workbook::open(&config.spreadsheet.path)?;
    for row in [12, 13, 15, 16] {
        assert_eq!(workbook.text(15, row).as_deref(), Some("Acme Serum 50ml"));
        assert_eq!(workbook.text(14, row), None, "row {} got a placeholder", row);
    }
    assert_eq!(workbook.text(14, 14).as_deref(), Some(IMAGE_DOWNLOAD_FAILED));

    server.verify().await;
    Ok(())
}
