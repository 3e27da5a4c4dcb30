use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::ProductName;

/// Last known lookup result for one barcode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    pub barcode: String,
    /// `None` when the page gave no trustworthy name; such entries are re-fetched.
    pub product_name: Option<ProductName>,
    pub image_url: Option<String>,
    pub image_filepath: Option<String>,
}

/// Row shape of the `products` table.
#[derive(Debug, Clone, FromRow)]
pub struct CacheRow {
    pub barcode: String,
    pub product_name: Option<String>,
    pub image_url: Option<String>,
    pub image_filepath: Option<String>,
}

/// How the orchestrator should treat a cached entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheVerdict {
    /// Name and image both known; reuse without touching the network.
    Valid { name: String, image_filepath: String },
    /// A sentinel is stored; never fetch again, never write back.
    Known(ProductName),
    /// Nothing usable stored.
    Miss,
}

impl CacheEntry {
    pub fn new(
        barcode: impl Into<String>,
        product_name: Option<ProductName>,
        image_url: Option<String>,
        image_filepath: Option<String>,
    ) -> Self {
        Self {
            barcode: barcode.into(),
            product_name,
            image_url,
            image_filepath,
        }
    }

    pub fn sentinel(barcode: impl Into<String>, mark: ProductName) -> Self {
        Self::new(barcode, Some(mark), None, None)
    }

    pub fn verdict(&self) -> CacheVerdict {
        match (&self.product_name, &self.image_filepath) {
            (Some(ProductName::Found(name)), Some(path)) => CacheVerdict::Valid {
                name: name.clone(),
                image_filepath: path.clone(),
            },
            (Some(ProductName::Found(_)), None) | (None, _) => CacheVerdict::Miss,
            (Some(mark), _) => CacheVerdict::Known(mark.clone()),
        }
    }
}

impl From<CacheRow> for CacheEntry {
    fn from(row: CacheRow) -> Self {
        Self {
            barcode: row.barcode,
            product_name: row.product_name.as_deref().map(ProductName::from_stored),
            image_url: row.image_url,
            image_filepath: row.image_filepath,
        }
    }
}
