use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::workbook::Workbook;
use crate::{AppError, Result};

/// Trusted barcode -> translated name pairs. A hit bypasses the text transform.
#[derive(Debug, Clone, Default)]
pub struct CuratedTable {
    names: HashMap<String, String>,
}

impl CuratedTable {
    /// Reads the first sheet, locating both columns by their header text in row 1.
    pub fn load(path: &Path, barcode_header: &str, name_header: &str) -> Result<Self> {
        let workbook = Workbook::open(path)?;
        let header = |wanted: &str| {
            (1..=workbook.highest_column())
                .find(|&col| workbook.text(col, 1).as_deref() == Some(wanted))
                .ok_or_else(|| {
                    AppError::Validation(format!("{} has no {:?} header column", path.display(), wanted))
                })
        };
        let barcode_col = header(barcode_header)?;
        let name_col = header(name_header)?;

        let table = Self::from_pairs((2..=workbook.highest_row()).filter_map(|row| {
            Some((workbook.text(barcode_col, row)?, workbook.text(name_col, row)?))
        }));

        info!(path = %path.display(), entries = table.len(), "Loaded curated name table");
        Ok(table)
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let names = pairs
            .into_iter()
            .map(|(k, v)| (k.into().trim().to_string(), v.into()))
            .filter(|(k, _)| !k.is_empty())
            .collect();
        Self { names }
    }

    pub fn lookup(&self, barcode: &str) -> Option<&str> {
        self.names.get(barcode.trim()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ReferenceTerm {
    full_name: String,
    key: String,
}

/// Fuzzy lookup of known product names to give the text transform some context.
#[derive(Debug, Clone, Default)]
pub struct ReferenceMatcher {
    terms: Vec<ReferenceTerm>,
}

impl ReferenceMatcher {
    /// Terms come from the first column of the first sheet, header row skipped.
    pub fn load(path: &Path) -> Result<Self> {
        let workbook = Workbook::open(path)?;
        let matcher = Self::from_terms((2..=workbook.highest_row()).filter_map(|row| workbook.text(1, row)));
        info!(path = %path.display(), terms = matcher.terms.len(), "Loaded reference terms");
        Ok(matcher)
    }

    pub fn from_terms<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let terms = terms
            .into_iter()
            .map(|t| normalise_term(t.as_ref()))
            .filter(|full_name| !full_name.is_empty())
            .map(|full_name| ReferenceTerm {
                key: ascii_key(&full_name),
                full_name,
            })
            .collect();
        Self { terms }
    }

    /// Up to `limit` terms scoring at least `threshold`, best first.
    pub fn top_names(&self, text: &str, threshold: f64, limit: usize) -> Vec<String> {
        let query = text.trim().to_lowercase();
        let mut scored: Vec<(f64, &ReferenceTerm)> = self
            .terms
            .iter()
            .map(|term| (strsim::normalized_levenshtein(&query, &term.key), term))
            .filter(|(score, _)| *score >= threshold)
            .collect();

        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored
            .into_iter()
            .take(limit)
            .map(|(_, term)| term.full_name.clone())
            .collect()
    }
}

/// Commas become spaces and a trailing four-digit year is dropped.
fn normalise_term(raw: &str) -> String {
    let spaced = raw.replace([',', '，'], " ");
    let trimmed = spaced.trim();

    let chars: Vec<char> = trimmed.chars().collect();
    if chars.len() >= 4 && chars[chars.len() - 4..].iter().all(|c| c.is_ascii_digit()) {
        chars[..chars.len() - 4].iter().collect::<String>().trim().to_string()
    } else {
        trimmed.to_string()
    }
}

/// The ASCII words of a term, lowercased; this is what queries are compared against.
fn ascii_key(full_name: &str) -> String {
    full_name
        .split_whitespace()
        .filter(|word| word.is_ascii())
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
