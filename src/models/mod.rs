use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

pub mod cache_entry;
pub mod crawl_result;

// Re-exports for convenience
pub use cache_entry::*;
pub use crawl_result::*;

pub const NOT_FOUND_MARK: &str = "Not Found";
pub const MALFORMED_MARK: &str = "N/A";
const EXCLUDED_SUFFIX: &str = " And No Search";

// Six digits and a period: the lookup site sometimes puts an internal id here.
static CORRUPTED_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{6}\.").expect("static regex"));

/// What the lookup site told us about a barcode's product name.
///
/// Everything except `Found` is a sentinel that suppresses re-fetching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ProductName {
    Found(String),
    NotFound,
    Malformed,
    /// Taken out of the crawl by a maintenance tool; keeps the mark it replaced.
    Excluded(String),
}

impl ProductName {
    /// Parses the text stored in the cache's `product_name` column,
    /// including the marks written by older tooling.
    pub fn from_stored(value: &str) -> Self {
        match value {
            NOT_FOUND_MARK => ProductName::NotFound,
            MALFORMED_MARK => ProductName::Malformed,
            other => match other.strip_suffix(EXCLUDED_SUFFIX) {
                Some(reason) => ProductName::Excluded(reason.to_string()),
                None => ProductName::Found(other.to_string()),
            },
        }
    }

    pub fn to_stored(&self) -> String {
        match self {
            ProductName::Found(name) => name.clone(),
            ProductName::NotFound => NOT_FOUND_MARK.to_string(),
            ProductName::Malformed => MALFORMED_MARK.to_string(),
            ProductName::Excluded(reason) => format!("{}{}", reason, EXCLUDED_SUFFIX),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        !matches!(self, ProductName::Found(_))
    }

    pub fn as_found(&self) -> Option<&str> {
        match self {
            ProductName::Found(name) => Some(name),
            _ => None,
        }
    }

    /// The plain sentinel an `Excluded` mark was derived from.
    pub fn restored(&self) -> Option<ProductName> {
        match self {
            ProductName::Excluded(reason) => match ProductName::from_stored(reason) {
                restored @ (ProductName::NotFound | ProductName::Malformed) => Some(restored),
                _ => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for ProductName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_stored())
    }
}

/// True when an extracted name looks like the site's internal id rather than a product name.
pub fn is_corrupted_name(name: &str) -> bool {
    CORRUPTED_NAME.is_match(name)
}

/// True when a barcode contains anything other than ASCII digits.
pub fn is_invalid_barcode(barcode: &str) -> bool {
    barcode.is_empty() || !barcode.chars().all(|c| c.is_ascii_digit())
}
