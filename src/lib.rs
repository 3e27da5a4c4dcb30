pub mod cache_store;
pub mod config;
pub mod coordinator;
pub mod crawler;
pub mod identity;
pub mod image_fetcher;
pub mod maintenance;
pub mod models;
pub mod pipeline;
pub mod scraper;
pub mod spreadsheet;
pub mod translation;
pub mod utils;
pub mod workbook;

// Re-export commonly used types
pub use config::AppConfig;
pub use pipeline::{Pipeline, RunSummary};
pub use utils::error::AppError;

pub type Result<T> = std::result::Result<T, AppError>;
