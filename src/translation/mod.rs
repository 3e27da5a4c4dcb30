//! Post-crawl pass that fills the translation column from the name column.
//!
//! Curated names win over everything else; empty cells get the no-data
//! marker; everything else goes through the text transform, retried once.

pub mod client;
pub mod reference;

pub use client::{ChatCompletionClient, TextTransform, TransformError};
pub use reference::{CuratedTable, ReferenceMatcher};

use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::Retry;
use tracing::{debug, info, warn};

use crate::config::{SpreadsheetConfig, TranslationConfig};
use crate::coordinator::{run_bounded, AdmissionGate};
use crate::spreadsheet::column_index;
use crate::workbook::Workbook;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Translation {
    Curated(String),
    NoData,
    Transformed(String),
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TranslationSummary {
    pub rows: u64,
    pub curated: u64,
    pub no_data: u64,
    pub transformed: u64,
    pub failed: u64,
    pub api_calls: u64,
}

/// Columns involved in a pass, as 1-based indices.
#[derive(Debug, Clone, Copy)]
pub struct TranslationColumns {
    pub source: u32,
    pub destination: u32,
    /// Only consulted when a curated table is loaded.
    pub barcode: Option<u32>,
}

impl TranslationColumns {
    pub fn from_config(sheet: &SpreadsheetConfig, lookup_by_barcode: bool) -> Result<Self> {
        Ok(Self {
            source: column_index(&sheet.name_column)?,
            destination: column_index(&sheet.translation_column)?,
            barcode: if lookup_by_barcode {
                Some(column_index(&sheet.barcode_column)?)
            } else {
                None
            },
        })
    }
}

pub struct TranslationPass {
    transform: Arc<dyn TextTransform>,
    curated: Option<CuratedTable>,
    references: Option<ReferenceMatcher>,
    config: TranslationConfig,
}

impl TranslationPass {
    pub fn new(transform: Arc<dyn TextTransform>, config: TranslationConfig) -> Self {
        Self {
            transform,
            curated: None,
            references: None,
            config,
        }
    }

    /// Builds the pass with the chat client and whatever reference data the config names.
    pub fn from_config(config: &TranslationConfig) -> Result<Self> {
        let client = ChatCompletionClient::new(config)?;
        let mut pass = Self::new(Arc::new(client), config.clone());

        if let Some(path) = &config.curated_table_path {
            pass = pass.with_curated(CuratedTable::load(
                path,
                &config.curated_barcode_header,
                &config.curated_name_header,
            )?);
        }
        if let Some(path) = &config.reference_terms_path {
            pass = pass.with_references(ReferenceMatcher::load(path)?);
        }
        Ok(pass)
    }

    pub fn with_curated(mut self, table: CuratedTable) -> Self {
        self.curated = Some(table);
        self
    }

    pub fn with_references(mut self, matcher: ReferenceMatcher) -> Self {
        self.references = Some(matcher);
        self
    }

    /// Translates one cell. `api_calls` counts every transform request made.
    pub async fn translate_one(&self, text: Option<&str>, barcode: Option<&str>, api_calls: &AtomicU64) -> Translation {
        if let (Some(table), Some(barcode)) = (&self.curated, barcode) {
            if let Some(name) = table.lookup(barcode) {
                debug!(barcode, "Curated name used");
                return Translation::Curated(name.to_string());
            }
        }

        let text = match text.map(str::trim) {
            Some(t) if !t.is_empty() && !t.eq_ignore_ascii_case("nan") => t,
            _ => return Translation::NoData,
        };

        let references = self
            .references
            .as_ref()
            .map(|m| m.top_names(text, self.config.reference_threshold, self.config.reference_limit))
            .unwrap_or_default();

        // One immediate retry, never more.
        let retry_once = std::iter::once(Duration::ZERO);
        let outcome = Retry::spawn(retry_once, || {
            api_calls.fetch_add(1, Ordering::Relaxed);
            self.transform.transform(text, &references)
        })
        .await;

        match outcome {
            Ok(translated) => Translation::Transformed(translated),
            Err(e) => {
                warn!(text, error = %e, "Translation failed after retry");
                Translation::Failed
            }
        }
    }

    pub fn cell_text(&self, translation: &Translation) -> String {
        match translation {
            Translation::Curated(name) | Translation::Transformed(name) => name.clone(),
            Translation::NoData => self.config.no_data_marker.clone(),
            Translation::Failed => self.config.failed_marker.clone(),
        }
    }

    /// Translates `start_row..=end_row` (clamped to the sheet) and writes the
    /// results once every unit has finished.
    pub async fn run_on_workbook(
        self: &Arc<Self>,
        workbook: &mut Workbook,
        columns: TranslationColumns,
        start_row: u32,
        end_row: u32,
    ) -> Result<TranslationSummary> {
        let end_row = end_row.min(workbook.highest_row());
        let inputs: Vec<(u32, Option<String>, Option<String>)> = (start_row..=end_row)
            .map(|row| {
                let barcode = columns.barcode.and_then(|col| workbook.text(col, row));
                (row, workbook.text(columns.source, row), barcode)
            })
            .collect();

        info!(rows = inputs.len(), max_concurrent = self.config.max_concurrent, "Starting translation");

        let api_calls = Arc::new(AtomicU64::new(0));
        let gate = AdmissionGate::new(self.config.max_concurrent);
        let outputs = run_bounded(&gate, inputs, |(row, text, barcode)| {
            let pass = self.clone();
            let api_calls = api_calls.clone();
            async move {
                let translation = pass
                    .translate_one(text.as_deref(), barcode.as_deref(), &api_calls)
                    .await;
                (row, translation)
            }
        })
        .await;

        let mut summary = TranslationSummary {
            rows: outputs.len() as u64,
            api_calls: api_calls.load(Ordering::Relaxed),
            ..TranslationSummary::default()
        };
        for (row, translation) in &outputs {
            match translation {
                Translation::Curated(_) => summary.curated += 1,
                Translation::NoData => summary.no_data += 1,
                Translation::Transformed(_) => summary.transformed += 1,
                Translation::Failed => summary.failed += 1,
            }
            workbook.set_text(columns.destination, *row, &self.cell_text(translation))?;
        }

        info!(
            rows = summary.rows,
            curated = summary.curated,
            no_data = summary.no_data,
            transformed = summary.transformed,
            failed = summary.failed,
            api_calls = summary.api_calls,
            "Translation finished"
        );
        Ok(summary)
    }

    /// Opens `path`, translates the configured rows and saves to
    /// `output_path` when set, otherwise in place.
    pub async fn run_on_file(
        self: &Arc<Self>,
        path: &Path,
        sheet: &SpreadsheetConfig,
    ) -> Result<TranslationSummary> {
        let mut workbook = Workbook::open(path)?;
        let columns = TranslationColumns::from_config(sheet, self.config.lookup_by_barcode && self.curated.is_some())?;

        let summary = self
            .run_on_workbook(&mut workbook, columns, sheet.start_row, sheet.end_row)
            .await?;

        match &self.config.output_path {
            Some(output) => workbook.save_as(output)?,
            None => workbook.save()?,
        }
        Ok(summary)
    }
}
