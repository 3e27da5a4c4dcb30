use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::cache_store::CacheStore;
use crate::models::{is_corrupted_name, is_invalid_barcode, CacheEntry, ProductName};
use crate::workbook::Workbook;
use crate::Result;

const EXPORT_HEADERS: [&str; 4] = ["barcode", "product_name", "image_url", "image_filepath"];

/// Cached failures grouped by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    pub not_found: Vec<String>,
    pub malformed: Vec<String>,
    /// (barcode, reason)
    pub excluded: Vec<(String, String)>,
}

impl FailureReport {
    pub fn total(&self) -> usize {
        self.not_found.len() + self.malformed.len() + self.excluded.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidBarcode {
    pub barcode: String,
    /// Digits-only form, `None` when nothing is left.
    pub cleaned: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InvalidReport {
    pub found: Vec<InvalidBarcode>,
    pub rewritten: usize,
    pub dropped: usize,
}

/// Explicit, operator-driven edits of the cache. Errors are surfaced, not swallowed.
pub struct CacheMaintenance {
    store: CacheStore,
}

impl CacheMaintenance {
    pub fn new(store: CacheStore) -> Self {
        Self { store }
    }

    pub async fn show(&self, barcode: &str) -> Result<Option<CacheEntry>> {
        self.store.try_get(barcode.trim()).await
    }

    pub async fn failures(&self) -> Result<FailureReport> {
        let mut report = FailureReport::default();
        for entry in self.store.sentinels().await? {
            match entry.product_name {
                Some(ProductName::NotFound) => report.not_found.push(entry.barcode),
                Some(ProductName::Malformed) => report.malformed.push(entry.barcode),
                Some(ProductName::Excluded(reason)) => report.excluded.push((entry.barcode, reason)),
                _ => {}
            }
        }
        Ok(report)
    }

    /// Deletes entries so the next run fetches them again.
    pub async fn reset(&self, barcodes: &[String]) -> Result<u64> {
        let barcodes: Vec<String> = barcodes.iter().map(|b| b.trim().to_string()).filter(|b| !b.is_empty()).collect();
        let deleted = self.store.delete(&barcodes).await?;
        info!(requested = barcodes.len(), deleted, "Cache entries reset");
        Ok(deleted)
    }

    pub async fn reset_from_workbook(&self, path: &Path) -> Result<u64> {
        let barcodes = barcodes_in_first_column(path)?;
        self.reset(&barcodes).await
    }

    /// Turns `Excluded(reason)` back into the plain sentinel named by `reason`.
    pub async fn restore_marks(&self, barcodes: &[String]) -> Result<usize> {
        let mut restored = 0;
        for barcode in barcodes {
            let Some(mut entry) = self.store.try_get(barcode.trim()).await? else {
                warn!(barcode = %barcode, "Not in cache");
                continue;
            };
            match entry.product_name.as_ref().and_then(ProductName::restored) {
                Some(mark) => {
                    entry.product_name = Some(mark);
                    self.store.try_put(&entry).await?;
                    restored += 1;
                }
                None => warn!(barcode = %barcode, "Entry is not an excluded failure mark"),
            }
        }
        Ok(restored)
    }

    /// Marks entries as excluded so they are never fetched again.
    pub async fn exclude(&self, barcodes: &[String], reason: &str) -> Result<usize> {
        let mut excluded = 0;
        for barcode in barcodes.iter().map(|b| b.trim()).filter(|b| !b.is_empty()) {
            let mut entry = self
                .store
                .try_get(barcode)
                .await?
                .unwrap_or_else(|| CacheEntry::new(barcode, None, None, None));
            entry.product_name = Some(ProductName::Excluded(reason.to_string()));
            self.store.try_put(&entry).await?;
            excluded += 1;
        }
        Ok(excluded)
    }

    /// Deletes entries whose stored name matches the corruption pattern.
    pub async fn purge_corrupt(&self) -> Result<Vec<String>> {
        let corrupt: Vec<String> = self
            .store
            .all()
            .await?
            .into_iter()
            .filter(|e| e.product_name.as_ref().and_then(ProductName::as_found).is_some_and(is_corrupted_name))
            .map(|e| e.barcode)
            .collect();

        self.store.delete(&corrupt).await?;
        info!(purged = corrupt.len(), "Corrupt names purged");
        Ok(corrupt)
    }

    /// Lists entries whose barcode has non-digit characters. With `apply`,
    /// rewrites them to the digit-only form, dropping those that would be
    /// empty or collide with an existing entry.
    pub async fn invalid_barcodes(&self, apply: bool) -> Result<InvalidReport> {
        let entries = self.store.all().await?;
        let mut taken: HashSet<String> = entries.iter().map(|e| e.barcode.clone()).collect();

        let mut report = InvalidReport::default();
        for entry in entries.iter().filter(|e| is_invalid_barcode(&e.barcode)) {
            let digits: String = entry.barcode.chars().filter(char::is_ascii_digit).collect();
            let cleaned = (!digits.is_empty()).then_some(digits);
            report.found.push(InvalidBarcode {
                barcode: entry.barcode.clone(),
                cleaned: cleaned.clone(),
            });

            if !apply {
                continue;
            }
            match cleaned {
                Some(target) if !taken.contains(&target) => {
                    self.store.rekey(&entry.barcode, &target).await?;
                    taken.remove(&entry.barcode);
                    taken.insert(target);
                    report.rewritten += 1;
                }
                _ => {
                    self.store.delete(std::slice::from_ref(&entry.barcode)).await?;
                    taken.remove(&entry.barcode);
                    report.dropped += 1;
                }
            }
        }
        Ok(report)
    }

    /// Writes every entry to a new workbook at `path`. Returns the row count.
    pub async fn export(&self, path: &Path) -> Result<usize> {
        let entries = self.store.all().await?;
        let mut workbook = Workbook::create(path);

        for (col, header) in (1u32..).zip(EXPORT_HEADERS) {
            workbook.set_text(col, 1, header)?;
        }
        for (row, entry) in (2u32..).zip(&entries) {
            let name = entry.product_name.as_ref().map(ProductName::to_stored);
            let values = [Some(entry.barcode.clone()), name, entry.image_url.clone(), entry.image_filepath.clone()];
            for (col, value) in (1u32..).zip(values) {
                if let Some(value) = value {
                    workbook.set_text(col, row, &value)?;
                }
            }
        }

        workbook.save()?;
        info!(path = %path.display(), rows = entries.len(), "Cache exported");
        Ok(entries.len())
    }
}

/// Barcodes in column A below the header row.
pub fn barcodes_in_first_column(path: &Path) -> Result<Vec<String>> {
    let workbook = Workbook::open(path)?;
    Ok((2..=workbook.highest_row()).filter_map(|row| workbook.text(1, row)).collect())
}

fn image_files(directory: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(directory)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Zero-byte files in the image directory.
pub fn empty_images(directory: &Path) -> Result<Vec<PathBuf>> {
    let mut empty = Vec::new();
    for path in image_files(directory)? {
        if std::fs::metadata(&path)?.len() == 0 {
            empty.push(path);
        }
    }
    Ok(empty)
}

/// Groups of files with identical content (SHA-256), largest groups first.
pub fn duplicate_images(directory: &Path) -> Result<Vec<Vec<PathBuf>>> {
    let mut by_hash: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    for path in image_files(directory)? {
        let digest = Sha256::digest(std::fs::read(&path)?);
        by_hash.entry(hex::encode(digest)).or_default().push(path);
    }

    let mut groups: Vec<Vec<PathBuf>> = by_hash.into_values().filter(|g| g.len() > 1).collect();
    groups.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    Ok(groups)
}
