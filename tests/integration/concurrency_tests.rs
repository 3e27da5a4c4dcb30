use super::*;
use std::sync::Arc;

use barcode_harvester::crawler::Crawler;
use barcode_harvester::image_fetcher::ImageFetcher;
use barcode_harvester::models::BarcodeRowPair;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_crawl_respects_concurrency_bound() -> anyhow::Result<()> {
    let dir = temp_dir();
    let mut config = get_test_config(dir.path());
    config.crawler.max_concurrent = 3;

    let mut site = FakeSite::with_latency(Duration::from_millis(30));
    let mut pairs = Vec::new();
    for i in 0..12u32 {
        let barcode = format!("40000000000{:02}", i);
        site = site.product(&barcode, &format!("Product {}", i), None);
        pairs.push(BarcodeRowPair::new(barcode, 12 + i));
    }
    let (site, fetcher) = site.into_fetcher();

    let store = create_test_store(&config.cache).await?;
    let images = Arc::new(ImageFetcher::new(&config.images)?);
    let crawler = Arc::new(Crawler::new(store, fetcher, images, config.crawler.clone()));

    let report = crawler.crawl_all(pairs).await;

    assert_eq!(report.results.len(), 12);
    assert_eq!(report.summary.crawled, 12);
    assert!(report.peak_concurrency <= 3, "gate peak {}", report.peak_concurrency);
    assert!(site.peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(site.active.load(Ordering::SeqCst), 0);

    let mut rows: Vec<u32> = report.results.iter().map(|r| r.row_index).collect();
    rows.sort();
    assert_eq!(rows, (12..24).collect::<Vec<_>>());

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_run_stats_are_per_run() -> anyhow::Result<()> {
    let dir = temp_dir();
    let config = get_test_config(dir.path());
    let (_site, fetcher) = FakeSite::new()
        .product("1", "One", None)
        .page("2", SitePage::NotFound)
        .into_fetcher();

    let store = create_test_store(&config.cache).await?;
    let images = Arc::new(ImageFetcher::new(&config.images)?);
    let crawler = Arc::new(Crawler::new(store, fetcher, images, config.crawler.clone()));
    let pairs = vec![BarcodeRowPair::new("1", 12), BarcodeRowPair::new("2", 13)];

    let first = crawler.crawl_all(pairs.clone()).await;
    assert_eq!(first.summary.crawled, 1);
    assert_eq!(first.summary.not_found, 1);

    let second = crawler.crawl_all(pairs).await;
    assert_eq!(second.summary.not_found, 0);
    assert_eq!(second.summary.skipped_known, 1);
    assert_eq!(second.summary.crawled, 1);

    Ok(())
}
