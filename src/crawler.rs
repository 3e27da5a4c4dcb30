use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::cache_store::CacheStore;
use crate::config::CrawlerConfig;
use crate::coordinator::{run_bounded, AdmissionGate, Counter, CrawlStats, CrawlSummary};
use crate::identity::IdentityPool;
use crate::image_fetcher::ImageDownloader;
use crate::models::{is_corrupted_name, BarcodeRowPair, CacheEntry, CacheVerdict, CrawlResult, ProductName};
use crate::scraper::{FetchError, PageClassifier, PageField, PageFetcher, PageKind, PageSession};

/// Why a single crawl attempt did not produce a product.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CrawlError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("blocked by a bot challenge page")]
    Blocked,

    #[error("lookup site has no product for this barcode")]
    NotFound,

    #[error("product page did not contain a readable name")]
    Malformed,

    #[error("unexpected failure: {0}")]
    Unknown(String),
}

impl From<FetchError> for CrawlError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Transport(msg) => CrawlError::Transport(msg),
            FetchError::Unknown(msg) => CrawlError::Unknown(msg),
        }
    }
}

/// Fields pulled from a product page.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Extracted {
    Found { name: String, image_url: Option<String> },
    /// The name matched the corruption pattern and cannot be trusted.
    Untrusted { image_url: Option<String> },
}

#[derive(Debug, Clone)]
pub struct CrawlReport {
    /// Completion order; `row_index` on each result decides placement.
    pub results: Vec<CrawlResult>,
    pub summary: CrawlSummary,
    pub peak_concurrency: usize,
    pub elapsed: Duration,
}

pub struct Crawler {
    cache: CacheStore,
    fetcher: Arc<dyn PageFetcher>,
    images: Arc<dyn ImageDownloader>,
    identities: IdentityPool,
    classifier: PageClassifier,
    config: CrawlerConfig,
}

impl Crawler {
    pub fn new(
        cache: CacheStore,
        fetcher: Arc<dyn PageFetcher>,
        images: Arc<dyn ImageDownloader>,
        config: CrawlerConfig,
    ) -> Self {
        Self {
            cache,
            fetcher,
            images,
            identities: IdentityPool::new(&config.user_agents),
            classifier: PageClassifier::new(&config),
            config,
        }
    }

    /// Crawls every distinct barcode once, with at most `max_concurrent` in
    /// flight, and emits one result per row that holds it.
    pub async fn crawl_all(self: &Arc<Self>, pairs: Vec<BarcodeRowPair>) -> CrawlReport {
        let started = Instant::now();
        let stats = Arc::new(CrawlStats::new());
        let gate = AdmissionGate::new(self.config.max_concurrent);
        let total = pairs.len();
        let units = group_by_barcode(pairs);

        if units.len() < total {
            info!(rows = total, distinct = units.len(), "Barcodes repeated across rows, crawling each once");
        }
        info!(barcodes = total, max_concurrent = gate.bound(), "Starting crawl");

        let outputs = run_bounded(&gate, units, |(pair, rows)| {
            let crawler = self.clone();
            let stats = stats.clone();
            async move { crawler.crawl_one(pair, &stats).await.map(|result| fan_out(result, &rows)) }
        })
        .await;

        let results: Vec<CrawlResult> = outputs.into_iter().flatten().flatten().collect();
        let summary = stats.snapshot();
        let elapsed = started.elapsed();

        info!(
            barcodes = total,
            succeeded = summary.succeeded,
            cache_hits = summary.cache_hits,
            crawled = summary.crawled,
            elapsed_ms = elapsed.as_millis() as u64,
            "Crawl finished"
        );

        CrawlReport {
            results,
            summary,
            peak_concurrency: gate.peak(),
            elapsed,
        }
    }

    /// Resolves one barcode. `None` means nothing should be written back for its row.
    pub async fn crawl_one(&self, pair: BarcodeRowPair, stats: &CrawlStats) -> Option<CrawlResult> {
        let barcode = pair.barcode.as_str();

        if let Some(entry) = self.cache.get(barcode).await {
            match entry.verdict() {
                CacheVerdict::Valid { name, image_filepath } => {
                    info!(barcode, row = pair.row_index, "Found in cache");
                    stats.incr(Counter::CacheHits);
                    stats.incr(Counter::Succeeded);
                    return Some(CrawlResult {
                        barcode: pair.barcode,
                        product_name: ProductName::Found(name),
                        image_filepath: Some(image_filepath),
                        row_index: pair.row_index,
                    });
                }
                CacheVerdict::Known(mark) => {
                    debug!(barcode, mark = %mark, "Known failure in cache, skipping");
                    stats.incr(Counter::SkippedKnown);
                    return None;
                }
                CacheVerdict::Miss => {}
            }
        }

        let max_attempts = self.config.max_attempts;
        for attempt in 1..=max_attempts {
            let identity = self.identities.pick();
            debug!(barcode, attempt, user_agent = %identity.user_agent, "Opening session");

            let mut session = match self.fetcher.open_session(&identity).await {
                Ok(session) => session,
                Err(FetchError::Transport(msg)) => {
                    warn!(barcode, attempt, max_attempts, error = %msg, "Could not open session");
                    continue;
                }
                Err(FetchError::Unknown(msg)) => {
                    error!(barcode, attempt, error = %msg, "Aborting barcode");
                    stats.incr(Counter::Aborted);
                    return None;
                }
            };

            let outcome = self.attempt(session.as_mut(), barcode).await;
            session.release().await;

            match outcome {
                Ok(Extracted::Found { name, image_url }) => {
                    return Some(self.store_found(pair, name, image_url, stats).await);
                }
                Ok(Extracted::Untrusted { image_url }) => {
                    warn!(barcode, "Extracted name matches the corruption pattern, not trusting it");
                    self.cache.put(&CacheEntry::new(barcode, None, image_url, None)).await;
                    stats.incr(Counter::Untrusted);
                    return None;
                }
                Err(CrawlError::Blocked) => {
                    stats.incr(Counter::BlockedAttempts);
                    if attempt < max_attempts {
                        let delay = backoff_delay(self.config.backoff_base(), attempt);
                        warn!(barcode, attempt, max_attempts, delay_ms = delay.as_millis() as u64, "Blocked, backing off");
                        tokio::time::sleep(delay).await;
                    } else {
                        warn!(barcode, attempt, max_attempts, "Blocked");
                    }
                }
                Err(CrawlError::NotFound) => {
                    info!(barcode, "Barcode not found on lookup site");
                    self.cache.put(&CacheEntry::sentinel(barcode, ProductName::NotFound)).await;
                    stats.incr(Counter::NotFound);
                    return None;
                }
                Err(CrawlError::Malformed) => {
                    warn!(barcode, "Product name missing from page, marking malformed");
                    self.cache.put(&CacheEntry::sentinel(barcode, ProductName::Malformed)).await;
                    stats.incr(Counter::Malformed);
                    return None;
                }
                Err(CrawlError::Transport(msg)) => {
                    warn!(barcode, attempt, max_attempts, error = %msg, "Attempt failed");
                }
                Err(CrawlError::Unknown(msg)) => {
                    error!(barcode, attempt, error = %msg, "Aborting barcode");
                    stats.incr(Counter::Aborted);
                    return None;
                }
            }
        }

        error!(barcode, max_attempts, "Retries exhausted");
        stats.incr(Counter::Exhausted);
        None
    }

    async fn attempt(&self, session: &mut dyn PageSession, barcode: &str) -> Result<Extracted, CrawlError> {
        let page = session.render(barcode).await?;

        match self.classifier.classify(&page) {
            PageKind::Blocked => return Err(CrawlError::Blocked),
            PageKind::NotFound => return Err(CrawlError::NotFound),
            PageKind::Candidate => {}
        }

        let name = match session.extract(PageField::ProductName).await {
            Ok(Some(name)) => name,
            Ok(None) => return Err(CrawlError::Malformed),
            Err(e) => {
                debug!(barcode, error = %e, "Name extraction failed");
                return Err(CrawlError::Malformed);
            }
        };

        let image_url = match session.extract(PageField::ImageSource).await {
            Ok(url) => url,
            Err(e) => {
                debug!(barcode, error = %e, "Image extraction failed");
                None
            }
        };

        if is_corrupted_name(&name) {
            return Ok(Extracted::Untrusted { image_url });
        }
        Ok(Extracted::Found { name, image_url })
    }

    async fn store_found(
        &self,
        pair: BarcodeRowPair,
        name: String,
        image_url: Option<String>,
        stats: &CrawlStats,
    ) -> CrawlResult {
        let image_filepath = match image_url.as_deref() {
            Some(url) => self.images.fetch(url, &pair.barcode).await,
            None => None,
        };

        let product_name = ProductName::Found(name);
        self.cache
            .put(&CacheEntry::new(
                pair.barcode.clone(),
                Some(product_name.clone()),
                image_url,
                image_filepath.clone(),
            ))
            .await;

        info!(
            barcode = %pair.barcode,
            row = pair.row_index,
            name = %product_name,
            has_image = image_filepath.is_some(),
            "Crawled product"
        );
        stats.incr(Counter::Crawled);
        stats.incr(Counter::Succeeded);

        CrawlResult {
            barcode: pair.barcode,
            product_name,
            image_filepath,
            row_index: pair.row_index,
        }
    }
}

/// First pair of each barcode in input order, with every row it appears on.
fn group_by_barcode(pairs: Vec<BarcodeRowPair>) -> Vec<(BarcodeRowPair, Vec<u32>)> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut units: Vec<(BarcodeRowPair, Vec<u32>)> = Vec::new();

    for pair in pairs {
        match index.get(&pair.barcode) {
            Some(&i) => units[i].1.push(pair.row_index),
            None => {
                index.insert(pair.barcode.clone(), units.len());
                let row = pair.row_index;
                units.push((pair, vec![row]));
            }
        }
    }
    units
}

fn fan_out(result: CrawlResult, rows: &[u32]) -> Vec<CrawlResult> {
    rows.iter()
        .map(|&row_index| CrawlResult {
            row_index,
            ..result.clone()
        })
        .collect()
}

/// Jittered exponential delay: `e = attempt mod 5 + 1`, drawn from
/// `[base * 2^e / 4, base * 2^e]`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt % 5 + 1;
    let high = base.as_millis() as u64 * (1u64 << exponent);
    let low = high / 4;
    Duration::from_millis(rand::thread_rng().gen_range(low..=high))
}
