use image::imageops::FilterType;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::config::{ImageConfig, SpreadsheetConfig};
use crate::models::{BarcodeRowPair, CrawlResult, ProductName};
use crate::workbook::Workbook;
use crate::{AppError, Result};

/// Written for a `NotFound` result. The crawler never emits those, so this
/// only shows up when callers hand in results they assembled themselves.
pub const IMAGE_NOT_FOUND: &str = "Image Not Found";
pub const IMAGE_DOWNLOAD_FAILED: &str = "Image Download Failed";
pub const INVALID_IMAGE_SIZE: &str = "Invalid Image Size";

// Approximate pixels per character of column width and per point of row height.
const PX_PER_CHAR: f64 = 7.0;
const PX_PER_POINT: f64 = 1.33;

// Excel's last column is XFD.
const MAX_COLUMN: u32 = 16_384;

/// `A` -> 1, `Z` -> 26, `AA` -> 27. Case-insensitive.
pub fn column_index(letters: &str) -> Result<u32> {
    let letters = letters.trim();
    if letters.is_empty() || letters.len() > 3 || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(AppError::InvalidColumn(letters.to_string()));
    }

    let index = letters
        .chars()
        .fold(0u32, |acc, c| acc * 26 + (c.to_ascii_uppercase() as u32 - 'A' as u32 + 1));

    if index > MAX_COLUMN {
        return Err(AppError::InvalidColumn(letters.to_string()));
    }
    Ok(index)
}

pub fn column_letters(mut index: u32) -> String {
    let mut letters = Vec::new();
    while index > 0 {
        let rem = (index - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        index = (index - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// Where results go and how big the image cells are.
#[derive(Debug, Clone)]
pub struct WriteBackLayout {
    pub name_column: u32,
    pub image_column: u32,
    pub image_column_width: f64,
    pub row_height: f64,
    pub thumbnail_directory: PathBuf,
}

impl WriteBackLayout {
    pub fn from_config(sheet: &SpreadsheetConfig, images: &ImageConfig) -> Result<Self> {
        Ok(Self {
            name_column: column_index(&sheet.name_column)?,
            image_column: column_index(&sheet.image_column)?,
            image_column_width: sheet.image_column_width,
            row_height: sheet.row_height,
            thumbnail_directory: images.thumbnail_directory.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteBackSummary {
    pub names_written: usize,
    pub images_embedded: usize,
    pub placeholders: usize,
}

pub fn read_keys(path: &Path, column: &str, start_row: u32, end_row: u32) -> Result<Vec<BarcodeRowPair>> {
    let workbook = Workbook::open(path)?;
    let pairs = read_keys_from(&workbook, column_index(column)?, start_row, end_row);
    info!(path = %path.display(), column, start_row, end_row, barcodes = pairs.len(), "Read barcodes");
    Ok(pairs)
}

/// Non-blank cells of `column` in `start_row..=end_row`, keeping their row numbers.
pub fn read_keys_from(workbook: &Workbook, column: u32, start_row: u32, end_row: u32) -> Vec<BarcodeRowPair> {
    (start_row..=end_row)
        .filter_map(|row| match workbook.text(column, row) {
            Some(barcode) => Some(BarcodeRowPair::new(barcode, row)),
            None => {
                debug!(row, "Skipping empty barcode cell");
                None
            }
        })
        .collect()
}

/// Writes names and thumbnails into the workbook at `path` and saves it in place.
pub fn write_results(path: &Path, results: &[CrawlResult], layout: &WriteBackLayout) -> Result<WriteBackSummary> {
    let mut workbook = Workbook::open(path)?;
    let summary = write_results_to(&mut workbook, results, layout)?;
    workbook.save()?;

    info!(
        path = %path.display(),
        names = summary.names_written,
        images = summary.images_embedded,
        placeholders = summary.placeholders,
        "Workbook updated"
    );
    Ok(summary)
}

/// Writes every result onto its row. Results need not come from the crawler:
/// a `NotFound` result gets its sentinel name and the image-not-found text.
pub fn write_results_to(
    workbook: &mut Workbook,
    results: &[CrawlResult],
    layout: &WriteBackLayout,
) -> Result<WriteBackSummary> {
    let mut summary = WriteBackSummary::default();

    // Cells must be sized before any image is placed; the box is read back from them.
    workbook.set_column_width(layout.image_column, layout.image_column_width)?;
    for result in results {
        workbook.set_row_height(result.row_index, layout.row_height)?;
    }
    let box_width = workbook.column_width(layout.image_column).unwrap_or(layout.image_column_width) * PX_PER_CHAR;

    for result in results {
        let row = result.row_index;
        workbook.set_text(layout.name_column, row, &result.product_name.to_stored())?;
        summary.names_written += 1;

        let box_height = workbook.row_height(row).unwrap_or(layout.row_height) * PX_PER_POINT;
        let image = result
            .image_filepath
            .as_deref()
            .map(Path::new)
            .filter(|p| p.is_file());

        let placeholder = match image {
            Some(source) => match place_thumbnail(workbook, layout, result, source, (box_width, box_height)) {
                Ok(Placement::Embedded) => {
                    summary.images_embedded += 1;
                    None
                }
                Ok(Placement::ZeroSized) => {
                    warn!(barcode = %result.barcode, path = %source.display(), "Image has zero size");
                    Some(INVALID_IMAGE_SIZE)
                }
                Err(e) => {
                    error!(barcode = %result.barcode, row, error = %e, "Failed to embed image");
                    None
                }
            },
            None if result.product_name == ProductName::NotFound => Some(IMAGE_NOT_FOUND),
            None => Some(IMAGE_DOWNLOAD_FAILED),
        };

        if let Some(text) = placeholder {
            workbook.set_text(layout.image_column, row, text)?;
            summary.placeholders += 1;
        }
    }

    Ok(summary)
}

enum Placement {
    Embedded,
    ZeroSized,
}

fn place_thumbnail(
    workbook: &mut Workbook,
    layout: &WriteBackLayout,
    result: &CrawlResult,
    source: &Path,
    (box_width, box_height): (f64, f64),
) -> Result<Placement> {
    let original = image::open(source)?;
    let Some((width, height)) = thumbnail_size(original.width(), original.height(), box_width, box_height) else {
        return Ok(Placement::ZeroSized);
    };

    std::fs::create_dir_all(&layout.thumbnail_directory)?;
    let thumbnail_path = layout.thumbnail_directory.join(format!("{}.png", result.barcode));
    original
        .resize_exact(width, height, FilterType::Lanczos3)
        .to_rgb8()
        .save_with_format(&thumbnail_path, image::ImageFormat::Png)?;

    workbook.embed_image(layout.image_column, result.row_index, &thumbnail_path)?;
    debug!(barcode = %result.barcode, width, height, "Embedded thumbnail");
    Ok(Placement::Embedded)
}

/// Largest size with the original aspect ratio that fits the box.
/// `None` for a zero-sized original.
pub fn thumbnail_size(width: u32, height: u32, box_width: f64, box_height: f64) -> Option<(u32, u32)> {
    if width == 0 || height == 0 {
        return None;
    }
    let scale = (box_width / f64::from(width)).min(box_height / f64::from(height));
    let scaled = |side: u32| ((f64::from(side) * scale) as u32).max(1);
    Some((scaled(width), scaled(height)))
}
