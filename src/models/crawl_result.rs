use serde::{Deserialize, Serialize};

use crate::models::ProductName;

/// A barcode read from the spreadsheet and the row it came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BarcodeRowPair {
    pub barcode: String,
    pub row_index: u32,
}

impl BarcodeRowPair {
    pub fn new(barcode: impl Into<String>, row_index: u32) -> Self {
        Self {
            barcode: barcode.into(),
            row_index,
        }
    }
}

/// One row to write back, produced during a single orchestration run.
///
/// `row_index` decides placement; the order of results carries no meaning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CrawlResult {
    pub barcode: String,
    pub product_name: ProductName,
    pub image_filepath: Option<String>,
    pub row_index: u32,
}
