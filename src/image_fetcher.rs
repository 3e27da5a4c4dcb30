use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ImageConfig;
use crate::{AppError, Result};

/// Downloads a product image for a barcode. `None` means no usable image.
#[async_trait]
pub trait ImageDownloader: Send + Sync {
    async fn fetch(&self, url: &str, barcode: &str) -> Option<String>;
}

pub struct ImageFetcher {
    client: Client,
    directory: PathBuf,
    default_extension: String,
    /// One lock per target path; a download and its `.part` file belong to one holder.
    key_locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl ImageFetcher {
    pub fn new(config: &ImageConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.download_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            directory: config.directory.clone(),
            default_extension: config.default_extension.clone(),
            key_locks: Mutex::new(HashMap::new()),
        })
    }

    fn key_lock(&self, target: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.key_locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(target.to_path_buf()).or_default().clone()
    }

    pub fn target_path(&self, url: &str, barcode: &str) -> PathBuf {
        let extension = infer_extension(url).unwrap_or_else(|| self.default_extension.clone());
        self.directory.join(format!("{}{}", barcode, extension))
    }

    /// Streams `url` into `target` through a `.part` file that only becomes
    /// `target` once it decodes as an image.
    async fn download(&self, url: &str, target: &Path) -> Result<()> {
        fs::create_dir_all(&self.directory).await?;

        let mut partial = target.as_os_str().to_owned();
        partial.push(".part");
        let partial = PathBuf::from(partial);

        let result = self.stream_to(url, &partial).await;
        let result = match result {
            Ok(()) => validate_image(&partial).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                fs::rename(&partial, target).await?;
                Ok(())
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&partial).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %partial.display(), error = %cleanup, "Failed to remove partial download");
                    }
                }
                Err(e)
            }
        }
    }

    async fn stream_to(&self, url: &str, partial: &Path) -> Result<()> {
        let mut response = self.client.get(url).send().await?.error_for_status()?;
        let mut file = fs::File::create(partial).await?;

        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl ImageDownloader for ImageFetcher {
    async fn fetch(&self, url: &str, barcode: &str) -> Option<String> {
        if url.trim().is_empty() {
            debug!(barcode, "No image URL, skipping download");
            return None;
        }

        let target = self.target_path(url, barcode);
        let path = target.to_string_lossy().to_string();

        let lock = self.key_lock(&target);
        let _held = lock.lock().await;

        if fs::try_exists(&target).await.unwrap_or(false) {
            debug!(barcode, path = %path, "Image already on disk, skipping download");
            return Some(path);
        }

        match self.download(url, &target).await {
            Ok(()) => {
                info!(barcode, path = %path, "Image downloaded");
                Some(path)
            }
            Err(e) => {
                warn!(barcode, url, error = %e, "Image download failed");
                None
            }
        }
    }
}

async fn validate_image(path: &Path) -> Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let bytes = std::fs::read(&path)?;
        image::load_from_memory(&bytes)?;
        Ok(())
    })
    .await
    .map_err(AppError::from)?
}

/// Extension (with the dot, lowercased) of the URL's last path segment,
/// ignoring the query. `None` when there is no plausible extension.
pub fn infer_extension(url: &str) -> Option<String> {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
    };

    let file_name = path.rsplit('/').next()?;
    let (stem, extension) = file_name.rsplit_once('.')?;
    let plausible = !stem.is_empty()
        && (1..=5).contains(&extension.len())
        && extension.chars().all(|c| c.is_ascii_alphanumeric());

    plausible.then(|| format!(".{}", extension.to_ascii_lowercase()))
}
