use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::CrawlerConfig;
use crate::identity::ClientIdentity;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Timeouts, navigation failures, a crashed browser. Worth another attempt.
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("unexpected failure: {0}")]
    Unknown(String),
}

impl From<tokio::task::JoinError> for FetchError {
    fn from(err: tokio::task::JoinError) -> Self {
        FetchError::Unknown(format!("browser task failed: {}", err))
    }
}

fn transport(err: impl std::fmt::Display) -> FetchError {
    FetchError::Transport(err.to_string())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub title: String,
    pub content: String,
}

impl PageSnapshot {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
        }
    }
}

/// Fixed locations on a product page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageField {
    ProductName,
    ImageSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Blocked,
    NotFound,
    Candidate,
}

/// Opens one browsing session per crawl attempt.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn open_session(&self, identity: &ClientIdentity) -> Result<Box<dyn PageSession>, FetchError>;
}

#[async_trait]
pub trait PageSession: Send {
    /// Loads the lookup page for `barcode` and waits (bounded) for it to settle.
    async fn render(&mut self, barcode: &str) -> Result<PageSnapshot, FetchError>;

    /// Reads a field from the last rendered page. `Ok(None)` when the field is absent.
    async fn extract(&mut self, field: PageField) -> Result<Option<String>, FetchError>;

    /// Frees the session's browser. Safe to call more than once.
    async fn release(&mut self);
}

/// Tells challenge pages and "not found" pages apart from product pages.
#[derive(Debug, Clone)]
pub struct PageClassifier {
    not_found_title: String,
    blocked_title_markers: Vec<String>,
    blocked_body_markers: Vec<String>,
}

impl PageClassifier {
    pub fn new(config: &CrawlerConfig) -> Self {
        Self {
            not_found_title: config.not_found_title.clone(),
            blocked_title_markers: config.blocked_title_markers.clone(),
            blocked_body_markers: config.blocked_body_markers.clone(),
        }
    }

    pub fn classify(&self, page: &PageSnapshot) -> PageKind {
        let blocked = self.blocked_title_markers.iter().any(|m| page.title.contains(m.as_str()))
            || self.blocked_body_markers.iter().any(|m| page.content.contains(m.as_str()));

        if blocked {
            PageKind::Blocked
        } else if !self.not_found_title.is_empty() && page.title.contains(&self.not_found_title) {
            PageKind::NotFound
        } else {
            PageKind::Candidate
        }
    }
}

/// Headless Chrome, one browser process per session so every attempt gets a clean profile.
pub struct ChromeFetcher {
    config: Arc<CrawlerConfig>,
}

impl ChromeFetcher {
    pub fn new(config: CrawlerConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    fn launch(config: &CrawlerConfig, identity: &ClientIdentity) -> Result<(Browser, Arc<Tab>), FetchError> {
        let mut launch_options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(false) // Often needed in containerized environments
            .window_size(Some((1920, 1080)))
            .args(vec![
                OsStr::new("--disable-dev-shm-usage"),
                OsStr::new("--disable-gpu"),
                OsStr::new("--disable-extensions"),
                OsStr::new("--disable-blink-features=AutomationControlled"),
            ])
            .build()
            .map_err(|e| FetchError::Unknown(format!("Failed to create launch options: {}", e)))?;

        if let Some(chrome_path) = &config.chrome_path {
            launch_options.path = Some(PathBuf::from(chrome_path));
        }

        let browser = Browser::new(launch_options).map_err(transport)?;
        let tab = browser.new_tab().map_err(transport)?;
        tab.set_default_timeout(config.page_load_timeout());
        tab.set_user_agent(
            &identity.user_agent,
            Some(&identity.accept_language),
            Some(&identity.platform),
        )
        .map_err(transport)?;

        Ok((browser, tab))
    }
}

#[async_trait]
impl PageFetcher for ChromeFetcher {
    async fn open_session(&self, identity: &ClientIdentity) -> Result<Box<dyn PageSession>, FetchError> {
        let config = self.config.clone();
        let identity = identity.clone();
        let (browser, tab) = tokio::task::spawn_blocking(move || Self::launch(&config, &identity)).await??;

        Ok(Box::new(ChromeSession {
            config: self.config.clone(),
            browser: Some(browser),
            tab: Some(tab),
        }))
    }
}

pub struct ChromeSession {
    config: Arc<CrawlerConfig>,
    browser: Option<Browser>,
    tab: Option<Arc<Tab>>,
}

impl ChromeSession {
    fn tab(&self) -> Result<Arc<Tab>, FetchError> {
        self.tab
            .clone()
            .ok_or_else(|| FetchError::Unknown("session already released".to_string()))
    }
}

#[async_trait]
impl PageSession for ChromeSession {
    async fn render(&mut self, barcode: &str) -> Result<PageSnapshot, FetchError> {
        let tab = self.tab()?;
        let url = self.config.page_url(barcode);
        let ready_wait = self.config.ready_wait();

        tokio::task::spawn_blocking(move || {
            tab.navigate_to(&url)
                .map_err(transport)?
                .wait_until_navigated()
                .map_err(transport)?;

            // A page that never shows a body is still classified on what it has.
            if let Err(e) = tab.wait_for_element_with_custom_timeout("body", ready_wait) {
                debug!(url = %url, error = %e, "Page did not reach ready state in time");
            }

            let title = tab.get_title().map_err(transport)?;
            let content = tab.get_content().map_err(transport)?;
            Ok(PageSnapshot { title, content })
        })
        .await?
    }

    async fn extract(&mut self, field: PageField) -> Result<Option<String>, FetchError> {
        let tab = self.tab()?;
        let element_wait = self.config.element_wait();
        let xpath = match field {
            PageField::ProductName => self.config.name_xpath.clone(),
            PageField::ImageSource => self.config.image_xpath.clone(),
        };

        tokio::task::spawn_blocking(move || {
            let element = match tab.wait_for_xpath_with_custom_timeout(&xpath, element_wait) {
                Ok(element) => element,
                Err(_) => return Ok(None),
            };

            let value = match field {
                PageField::ProductName => Some(element.get_inner_text().map_err(transport)?),
                PageField::ImageSource => element.get_attribute_value("src").map_err(transport)?,
            };

            Ok(value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()))
        })
        .await?
    }

    async fn release(&mut self) {
        let tab = self.tab.take();
        let browser = self.browser.take();
        if tab.is_none() && browser.is_none() {
            return;
        }

        let closed = tokio::task::spawn_blocking(move || {
            if let Some(tab) = tab {
                if let Err(e) = tab.close(true) {
                    debug!(error = %e, "Tab close failed");
                }
            }
            // Dropping the browser terminates its process.
            drop(browser);
        })
        .await;

        if let Err(e) = closed {
            warn!(error = %e, "Browser shutdown task failed");
        }
    }
}
