use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::spreadsheet::column_index;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub crawler: CrawlerConfig,
    pub cache: CacheConfig,
    pub images: ImageConfig,
    pub spreadsheet: SpreadsheetConfig,
    pub translation: TranslationConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Lookup page template, `{}` is replaced by the barcode.
    pub base_url: String,
    pub max_attempts: u32,
    pub max_concurrent: usize,
    pub page_load_timeout_secs: u64,
    pub ready_wait_secs: u64,
    pub element_wait_secs: u64,
    pub backoff_base_ms: u64,
    pub chrome_path: Option<String>,
    pub name_xpath: String,
    pub image_xpath: String,
    pub not_found_title: String,
    pub blocked_title_markers: Vec<String>,
    pub blocked_body_markers: Vec<String>,
    pub user_agents: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub database_url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub directory: PathBuf,
    pub thumbnail_directory: PathBuf,
    pub default_extension: String,
    pub download_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpreadsheetConfig {
    pub path: PathBuf,
    pub barcode_column: String,
    pub start_row: u32,
    pub end_row: u32,
    pub image_column: String,
    pub name_column: String,
    pub translation_column: String,
    /// Character units, as stored in the workbook.
    pub image_column_width: f64,
    /// Points, as stored in the workbook.
    pub row_height: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    pub enabled: bool,
    pub api_base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_concurrent: usize,
    pub request_timeout_secs: u64,
    pub instruction: String,
    pub curated_table_path: Option<PathBuf>,
    pub curated_barcode_header: String,
    pub curated_name_header: String,
    pub reference_terms_path: Option<PathBuf>,
    pub reference_threshold: f64,
    pub reference_limit: usize,
    pub no_data_marker: String,
    pub failed_marker: String,
    pub lookup_by_barcode: bool,
    pub output_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
    pub directory: Option<PathBuf>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.barcodelookup.com/{}".to_string(),
            max_attempts: 5,
            max_concurrent: 5,
            page_load_timeout_secs: 30,
            ready_wait_secs: 10,
            element_wait_secs: 5,
            backoff_base_ms: 500,
            chrome_path: None,
            name_xpath: "/html/body/section[2]/div[1]/div/div/div[2]/h4".to_string(),
            image_xpath: "/html/body/section[2]/div[1]/div/div/div[1]/div[1]/img".to_string(),
            not_found_title: "Barcode Not Found | Barcode Lookup".to_string(),
            blocked_title_markers: vec!["Just a moment...".to_string(), "Cloudflare".to_string()],
            blocked_body_markers: vec!["Enable JavaScript and cookies to continue".to_string()],
            user_agents: Vec::new(),
        }
    }
}

impl CrawlerConfig {
    pub fn page_url(&self, barcode: &str) -> String {
        self.base_url.replace("{}", barcode)
    }

    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_secs(self.page_load_timeout_secs)
    }

    pub fn ready_wait(&self) -> Duration {
        Duration::from_secs(self.ready_wait_secs)
    }

    pub fn element_wait(&self) -> Duration {
        Duration::from_secs(self.element_wait_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://barcode_cache.db".to_string(),
            max_connections: 5,
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("downloaded_images"),
            thumbnail_directory: PathBuf::from("downloaded_images_thumbs"),
            default_extension: ".png".to_string(),
            download_timeout_secs: 10,
        }
    }
}

impl Default for SpreadsheetConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("input.xlsx"),
            barcode_column: "B".to_string(),
            start_row: 12,
            end_row: 20,
            image_column: "N".to_string(),
            name_column: "O".to_string(),
            translation_column: "P".to_string(),
            image_column_width: 12.0,
            row_height: 40.0,
        }
    }
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_base_url: "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string(),
            api_key: None,
            model: "deepseek-v3".to_string(),
            temperature: 0.1,
            max_concurrent: 15,
            request_timeout_secs: 60,
            instruction: DEFAULT_INSTRUCTION.to_string(),
            curated_table_path: None,
            curated_barcode_header: "条码".to_string(),
            curated_name_header: "中文品名".to_string(),
            reference_terms_path: None,
            reference_threshold: 0.3,
            reference_limit: 5,
            no_data_marker: "NAN".to_string(),
            failed_marker: "翻译失败".to_string(),
            lookup_by_barcode: true,
            output_path: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "barcode_harvester=info".to_string(),
            directory: None,
        }
    }
}

const DEFAULT_INSTRUCTION: &str = "任务背景：将提供给你一段美妆产品描述和参考内容（参考内容可能与美妆产品描述不太相关，如果不相关请当做不存在。如果参考内容可能与美妆产品描述相关，请参考参考内容进行处理）。\n任务目标：将美妆产品描述进行整理，格式要求：【品牌名（如有）】 【产品名（如有）】 【规格/毫升数（如有）】其中产品名和规格翻译成中文，要求贴合美妆产品的实际名称（信达雅）{产品名必须翻译为中文}【如果原来的顺序错乱，请调换】【例如：【感官之水】【淡香水】【50毫升】】，不要输出多余的东西";

impl AppConfig {
    /// Loads `default`, `{RUN_MODE}` and `local` files from `config_dir`
    /// (all optional), then `BARCODE__*` environment variables.
    pub fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());
        let file = |name: &str| File::from(config_dir.join(name)).required(false);

        let s = Config::builder()
            .add_source(file("default"))
            .add_source(file(&run_mode))
            // Local overrides (ignored by git)
            .add_source(file("local"))
            .add_source(
                Environment::with_prefix("BARCODE")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("crawler.user_agents")
                    .with_list_parse_key("crawler.blocked_title_markers")
                    .with_list_parse_key("crawler.blocked_body_markers")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: AppConfig = s.try_deserialize()?;

        if config.crawler.chrome_path.is_none() {
            config.crawler.chrome_path = env::var("CHROME_PATH").ok();
        }
        if config.translation.api_key.is_none() {
            config.translation.api_key = env::var("TRANSLATION_API_KEY")
                .or_else(|_| env::var("OPENAI_API_KEY"))
                .ok();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let crawler = &self.crawler;
        if crawler.max_attempts == 0 {
            return Err(ConfigError::Message("crawler.max_attempts must be greater than 0".into()));
        }
        if crawler.max_concurrent == 0 {
            return Err(ConfigError::Message("crawler.max_concurrent must be greater than 0".into()));
        }
        if !crawler.base_url.contains("{}") {
            return Err(ConfigError::Message("crawler.base_url must contain a {} barcode placeholder".into()));
        }

        if self.cache.max_connections == 0 {
            return Err(ConfigError::Message("cache.max_connections must be greater than 0".into()));
        }

        let sheet = &self.spreadsheet;
        if sheet.start_row == 0 {
            return Err(ConfigError::Message("spreadsheet.start_row is 1-based and must be at least 1".into()));
        }
        if sheet.start_row > sheet.end_row {
            return Err(ConfigError::Message("spreadsheet.start_row cannot exceed spreadsheet.end_row".into()));
        }
        for (key, letters) in [
            ("barcode_column", &sheet.barcode_column),
            ("image_column", &sheet.image_column),
            ("name_column", &sheet.name_column),
            ("translation_column", &sheet.translation_column),
        ] {
            if column_index(letters).is_err() {
                return Err(ConfigError::Message(format!("spreadsheet.{} is not a column letter: {:?}", key, letters)));
            }
        }
        if sheet.image_column_width <= 0.0 || sheet.row_height <= 0.0 {
            return Err(ConfigError::Message("Image box dimensions must be positive".into()));
        }

        let translation = &self.translation;
        if translation.max_concurrent == 0 {
            return Err(ConfigError::Message("translation.max_concurrent must be greater than 0".into()));
        }
        if !(0.0..=1.0).contains(&translation.reference_threshold) {
            return Err(ConfigError::Message("translation.reference_threshold must be between 0 and 1".into()));
        }

        Ok(())
    }
}
