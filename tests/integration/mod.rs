// Shared fixtures for the integration tests: a scripted page fetcher standing
// in for Chrome, a wiremock image host and throwaway workbooks/caches.

pub mod cache_maintenance_tests;
pub mod concurrency_tests;
pub mod pipeline_tests;
pub mod translation_tests;

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use barcode_harvester::cache_store::CacheStore;
use barcode_harvester::config::CacheConfig;
use barcode_harvester::identity::ClientIdentity;
use barcode_harvester::scraper::{FetchError, PageField, PageFetcher, PageSession, PageSnapshot};
use barcode_harvester::workbook::Workbook;
use barcode_harvester::AppConfig;

pub const NOT_FOUND_TITLE: &str = "Barcode Not Found | Barcode Lookup";
pub const PRODUCT_TITLE: &str = "Product | Barcode Lookup";

/// What the lookup site shows for a barcode.
#[derive(Debug, Clone)]
pub enum SitePage {
    Product { name: String, image_url: Option<String> },
    NotFound,
    Challenge,
    NoName,
}

/// In-memory lookup site. Unknown barcodes fail with a transport error.
#[derive(Default)]
pub struct FakeSite {
    pages: Mutex<HashMap<String, SitePage>>,
    renders: Mutex<Vec<String>>,
    pub opened: AtomicUsize,
    pub released: AtomicUsize,
    pub active: AtomicUsize,
    pub peak: AtomicUsize,
    pub latency: Duration,
}

impl FakeSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub fn page(self, barcode: &str, page: SitePage) -> Self {
        self.pages.lock().unwrap().insert(barcode.to_string(), page);
        self
    }

    pub fn product(self, barcode: &str, name: &str, image_url: Option<String>) -> Self {
        self.page(
            barcode,
            SitePage::Product {
                name: name.to_string(),
                image_url,
            },
        )
    }

    pub fn renders(&self) -> Vec<String> {
        self.renders.lock().unwrap().clone()
    }

    pub fn renders_of(&self, barcode: &str) -> usize {
        self.renders().iter().filter(|b| b.as_str() == barcode).count()
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn into_fetcher(self) -> (Arc<FakeSite>, Arc<FakeFetcher>) {
        let site = Arc::new(self);
        (site.clone(), Arc::new(FakeFetcher { site }))
    }
}

/// `PageFetcher` over a shared [`FakeSite`].
pub struct FakeFetcher {
    pub site: Arc<FakeSite>,
}

pub struct FakeSession {
    site: Arc<FakeSite>,
    current: Option<SitePage>,
    released: bool,
}

#[async_trait]
impl PageFetcher for FakeFetcher {
    async fn open_session(&self, _identity: &ClientIdentity) -> Result<Box<dyn PageSession>, FetchError> {
        self.site.opened.fetch_add(1, Ordering::SeqCst);
        let now = self.site.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.site.peak.fetch_max(now, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            site: self.site.clone(),
            current: None,
            released: false,
        }))
    }
}

#[async_trait]
impl PageSession for FakeSession {
    async fn render(&mut self, barcode: &str) -> Result<PageSnapshot, FetchError> {
        if !self.site.latency.is_zero() {
            tokio::time::sleep(self.site.latency).await;
        }
        self.site.renders.lock().unwrap().push(barcode.to_string());

        let page = self.site.pages.lock().unwrap().get(barcode).cloned();
        let snapshot = match &page {
            Some(SitePage::Product { .. }) | Some(SitePage::NoName) => {
                PageSnapshot::new(PRODUCT_TITLE, "<html><body>product</body></html>")
            }
            Some(SitePage::NotFound) => PageSnapshot::new(NOT_FOUND_TITLE, "<html><body>no match</body></html>"),
            Some(SitePage::Challenge) => PageSnapshot::new("Just a moment...", "<html></html>"),
            None => return Err(FetchError::Transport(format!("no route to {}", barcode))),
        };
        self.current = page;
        Ok(snapshot)
    }

    async fn extract(&mut self, field: PageField) -> Result<Option<String>, FetchError> {
        Ok(match (&self.current, field) {
            (Some(SitePage::Product { name, .. }), PageField::ProductName) => Some(name.clone()),
            (Some(SitePage::Product { image_url, .. }), PageField::ImageSource) => image_url.clone(),
            _ => None,
        })
    }

    async fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.site.released.fetch_add(1, Ordering::SeqCst);
            self.site.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Config rooted in `dir`: workbook, cache and image directories all live there.
pub fn get_test_config(dir: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.crawler.max_attempts = 3;
    config.crawler.backoff_base_ms = 1;
    config.cache.database_url = format!("sqlite://{}", dir.join("cache.db").display());
    config.cache.max_connections = 2;
    config.images.directory = dir.join("images");
    config.images.thumbnail_directory = dir.join("thumbs");
    config.images.download_timeout_secs = 5;
    config.spreadsheet.path = dir.join("input.xlsx");
    config.translation.enabled = false;
    config
}

pub async fn create_test_store(config: &CacheConfig) -> anyhow::Result<CacheStore> {
    Ok(CacheStore::connect(config).await?)
}

/// Writes a workbook with `barcodes` in column B starting at `first_row`.
/// `None` leaves that row blank.
pub fn create_input_workbook(path: &Path, first_row: u32, barcodes: &[Option<&str>]) -> anyhow::Result<()> {
    let mut workbook = Workbook::create(path);
    workbook.set_text(2, 1, "条码")?;
    for (row, barcode) in (first_row..).zip(barcodes) {
        if let Some(barcode) = barcode {
            workbook.set_text(2, row, barcode)?;
        }
    }
    workbook.save()?;
    Ok(())
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbImage::from_pixel(width, height, image::Rgb([200, 40, 90]));
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
        .unwrap();
    bytes
}

/// Serves a PNG at `/img/{name}` and returns its URL.
pub async fn serve_png(server: &MockServer, name: &str, width: u32, height: u32) -> String {
    let route = format!("/img/{}", name);
    Mock::given(method("GET"))
        .and(path(route.clone()))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(png_bytes(width, height)),
        )
        .mount(server)
        .await;
    format!("{}{}", server.uri(), route)
}

pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(_) => Vec::new(),
    };
    files.sort();
    files
}

pub fn temp_dir() -> TempDir {
    tempfile::tempdir().unwrap()
}
