use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache_store::CacheStore;
use crate::config::AppConfig;
use crate::coordinator::CrawlSummary;
use crate::crawler::Crawler;
use crate::image_fetcher::{ImageDownloader, ImageFetcher};
use crate::scraper::{ChromeFetcher, PageFetcher};
use crate::spreadsheet::{read_keys, write_results, WriteBackLayout, WriteBackSummary};
use crate::translation::{TranslationPass, TranslationSummary};
use crate::Result;

/// End-of-run report, logged once and handed back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub workbook: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub barcodes: usize,
    pub crawl: CrawlSummary,
    pub peak_concurrency: usize,
    pub crawl_elapsed_ms: u64,
    pub write_back: WriteBackSummary,
    pub translation: Option<TranslationSummary>,
}

/// read -> crawl -> write back -> translate, over one workbook.
pub struct Pipeline {
    config: AppConfig,
    crawler: Arc<Crawler>,
    translation: Option<Arc<TranslationPass>>,
}

impl Pipeline {
    pub fn new(
        config: AppConfig,
        cache: CacheStore,
        fetcher: Arc<dyn PageFetcher>,
        images: Arc<dyn ImageDownloader>,
    ) -> Self {
        let crawler = Arc::new(Crawler::new(cache, fetcher, images, config.crawler.clone()));
        Self {
            config,
            crawler,
            translation: None,
        }
    }

    /// Wires the headless Chrome fetcher, the HTTP image fetcher and, when
    /// enabled, the translation pass.
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        let cache = CacheStore::connect(&config.cache).await?;
        let fetcher = Arc::new(ChromeFetcher::new(config.crawler.clone()));
        let images = Arc::new(ImageFetcher::new(&config.images)?);

        let translation = if config.translation.enabled {
            Some(Arc::new(TranslationPass::from_config(&config.translation)?))
        } else {
            None
        };

        let mut pipeline = Self::new(config, cache, fetcher, images);
        pipeline.translation = translation;
        Ok(pipeline)
    }

    pub fn with_translation(mut self, pass: Arc<TranslationPass>) -> Self {
        self.translation = Some(pass);
        self
    }

    pub fn without_translation(mut self) -> Self {
        self.translation = None;
        self
    }

    pub async fn run(&self) -> Result<RunSummary> {
        let started_at = Utc::now();
        let sheet = &self.config.spreadsheet;
        let layout = WriteBackLayout::from_config(sheet, &self.config.images)?;

        info!(
            workbook = %sheet.path.display(),
            start_row = sheet.start_row,
            end_row = sheet.end_row,
            "Run started"
        );

        let pairs = read_keys(&sheet.path, &sheet.barcode_column, sheet.start_row, sheet.end_row)?;
        let barcodes = pairs.len();
        if barcodes == 0 {
            warn!(column = %sheet.barcode_column, "No barcodes in the configured row range");
        }

        let report = self.crawler.crawl_all(pairs).await;

        let path = sheet.path.clone();
        let results = report.results;
        let write_back = tokio::task::spawn_blocking(move || write_results(&path, &results, &layout)).await??;

        let translation = match &self.translation {
            Some(pass) => Some(pass.run_on_file(&sheet.path, sheet).await?),
            None => None,
        };

        let summary = RunSummary {
            workbook: sheet.path.clone(),
            started_at,
            finished_at: Utc::now(),
            barcodes,
            crawl: report.summary,
            peak_concurrency: report.peak_concurrency,
            crawl_elapsed_ms: report.elapsed.as_millis() as u64,
            write_back,
            translation,
        };

        info!(
            barcodes = summary.barcodes,
            succeeded = summary.crawl.succeeded,
            cache_hits = summary.crawl.cache_hits,
            crawled = summary.crawl.crawled,
            not_found = summary.crawl.not_found,
            malformed = summary.crawl.malformed,
            untrusted = summary.crawl.untrusted,
            exhausted = summary.crawl.exhausted,
            aborted = summary.crawl.aborted,
            images_embedded = summary.write_back.images_embedded,
            placeholders = summary.write_back.placeholders,
            translated = summary.translation.map(|t| t.transformed + t.curated),
            duration_ms = (summary.finished_at - summary.started_at).num_milliseconds(),
            "Run finished"
        );
        Ok(summary)
    }
}
