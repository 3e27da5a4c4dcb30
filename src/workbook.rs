use std::path::{Path, PathBuf};
use umya_spreadsheet::structs::drawing::spreadsheet::MarkerType;
use umya_spreadsheet::structs::{Image, Spreadsheet, Worksheet};
use umya_spreadsheet::{reader, writer};

use crate::spreadsheet::column_letters;
use crate::{AppError, Result};

/// The first sheet of an xlsx file, addressed by 1-based (column, row).
pub struct Workbook {
    book: Spreadsheet,
    path: PathBuf,
}

impl Workbook {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let book = reader::xlsx::read(path)
            .map_err(|e| AppError::Spreadsheet(format!("failed to read {}: {}", path.display(), e)))?;

        let workbook = Self {
            book,
            path: path.to_path_buf(),
        };
        workbook.sheet()?;
        Ok(workbook)
    }

    /// A blank single-sheet workbook that will be saved to `path`.
    pub fn create(path: impl AsRef<Path>) -> Self {
        Self {
            book: umya_spreadsheet::new_file(),
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sheet(&self) -> Result<&Worksheet> {
        self.book
            .get_sheet(&0)
            .ok_or_else(|| AppError::Spreadsheet(format!("{} has no worksheet", self.path.display())))
    }

    fn sheet_mut(&mut self) -> Result<&mut Worksheet> {
        let path = self.path.display().to_string();
        self.book
            .get_sheet_mut(&0)
            .ok_or_else(|| AppError::Spreadsheet(format!("{} has no worksheet", path)))
    }

    /// Trimmed cell text; `None` for missing or blank cells.
    pub fn text(&self, column: u32, row: u32) -> Option<String> {
        let cell = self.sheet().ok()?.get_cell((column, row))?;
        let value = cell.get_value().trim().to_string();
        (!value.is_empty()).then_some(value)
    }

    pub fn set_text(&mut self, column: u32, row: u32, value: &str) -> Result<()> {
        self.sheet_mut()?.get_cell_mut((column, row)).set_value(value);
        Ok(())
    }

    pub fn highest_row(&self) -> u32 {
        self.sheet().map(|s| s.get_highest_row()).unwrap_or(0)
    }

    pub fn highest_column(&self) -> u32 {
        self.sheet().map(|s| s.get_highest_column()).unwrap_or(0)
    }

    pub fn set_row_height(&mut self, row: u32, points: f64) -> Result<()> {
        self.sheet_mut()?
            .get_row_dimension_mut(&row)
            .set_height(points)
            .set_custom_height(true);
        Ok(())
    }

    pub fn set_column_width(&mut self, column: u32, chars: f64) -> Result<()> {
        let letters = column_letters(column);
        self.sheet_mut()?.get_column_dimension_mut(&letters).set_width(chars);
        Ok(())
    }

    pub fn row_height(&self, row: u32) -> Option<f64> {
        self.sheet().ok()?.get_row_dimension(&row).map(|r| *r.get_height())
    }

    pub fn column_width(&self, column: u32) -> Option<f64> {
        let letters = column_letters(column);
        self.sheet().ok()?.get_column_dimension(&letters).map(|c| *c.get_width())
    }

    /// Anchors the image file at `path` to the top-left corner of the cell,
    /// at the image's own pixel size.
    pub fn embed_image(&mut self, column: u32, row: u32, path: &Path) -> Result<()> {
        if !path.is_file() {
            return Err(AppError::NotFound {
                resource: path.display().to_string(),
            });
        }
        let source = path
            .to_str()
            .ok_or_else(|| AppError::Spreadsheet(format!("image path is not UTF-8: {}", path.display())))?;

        let mut marker = MarkerType::default();
        marker.set_coordinate(format!("{}{}", column_letters(column), row));
        let mut image = Image::default();
        image.new_image(source, marker);

        self.sheet_mut()?.add_image(image);
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        self.save_as(&self.path)
    }

    pub fn save_as(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        writer::xlsx::write(&self.book, path)
            .map_err(|e| AppError::Spreadsheet(format!("failed to write {}: {}", path.display(), e)))
    }
}
