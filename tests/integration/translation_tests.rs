use super::*;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::body_string_contains;

use barcode_harvester::image_fetcher::ImageFetcher;
use barcode_harvester::translation::{TextTransform, TransformError, TranslationPass};
use barcode_harvester::Pipeline;

/// Wraps the subject so tests can see which rows went through the transform.
struct Bracketed;

#[async_trait]
impl TextTransform for Bracketed {
    async fn transform(&self, subject: &str, _references: &[String]) -> Result<String, TransformError> {
        Ok(format!("【{}】", subject))
    }
}

#[tokio::test]
async fn test_run_translates_after_write_back() -> anyhow::Result<()> {
    let dir = temp_dir();
    let config = get_test_config(dir.path());
    create_input_workbook(&config.spreadsheet.path, 12, &[Some("768614143925"), Some("3346130022886")])?;

    let store = create_test_store(&config.cache).await?;
    let (_site, fetcher) = FakeSite::new()
        .product("768614143925", "Acme Serum 50ml", None)
        .page("3346130022886", SitePage::NotFound)
        .into_fetcher();
    let images = Arc::new(ImageFetcher::new(&config.images)?);
    let pass = Arc::new(TranslationPass::new(Arc::new(Bracketed), config.translation.clone()));

    let summary = Pipeline::new(config.clone(), store, fetcher, images)
        .with_translation(pass)
        .run()
        .await?;

    let translation = summary.translation.expect("translation ran");
    assert_eq!(translation.transformed, 1);
    assert_eq!(translation.api_calls, 1);
    // The not-found row has no name to translate.
    assert_eq!(translation.no_data, translation.rows - 1);

    let workbook = Workbook::open(&config.spreadsheet.path)?;
    assert_eq!(workbook.text(16, 12).as_deref(), Some("【Acme Serum 50ml】"));
    assert_eq!(workbook.text(16, 13).as_deref(), Some("NAN"));

    Ok(())
}

#[tokio::test]
async fn test_translate_file_against_chat_endpoint() -> anyhow::Result<()> {
    let dir = temp_dir();
    let mut config = get_test_config(dir.path());
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("Lancome Genifique"))
        .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("Acme Serum"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "【Acme】【精华】【50毫升】"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let curated = dir.path().join("curated.xlsx");
    let mut table = Workbook::create(&curated);
    table.set_text(1, 1, "条码")?;
    table.set_text(2, 1, "中文品名")?;
    table.set_text(1, 2, "4005900036728")?;
    table.set_text(2, 2, "妮维雅润肤霜")?;
    table.save()?;

    config.translation.enabled = true;
    config.translation.api_base_url = format!("{}/v1", server.uri());
    config.translation.curated_table_path = Some(curated);
    config.translation.output_path = Some(dir.path().join("translated.xlsx"));
    config.spreadsheet.end_row = 14;

    let mut input = Workbook::create(&config.spreadsheet.path);
    for (row, barcode, name) in [
        (12, "768614143925", "Acme Serum 50ml"),
        (13, "3605532612690", "Lancome Genifique"),
        (14, "4005900036728", "Nivea Creme"),
    ] {
        input.set_text(2, row, barcode)?;
        input.set_text(15, row, name)?;
    }
    input.save()?;

    let pass = Arc::new(TranslationPass::from_config(&config.translation)?);
    let summary = pass.run_on_file(&config.spreadsheet.path, &config.spreadsheet).await?;

    assert_eq!(summary.rows, 3);
    assert_eq!(summary.curated, 1);
    assert_eq!(summary.transformed, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.api_calls, 3);

    let output = Workbook::open(dir.path().join("translated.xlsx"))?;
    assert_eq!(output.text(16, 12).as_deref(), Some("【Acme】【精华】【50毫升】"));
    assert_eq!(output.text(16, 13).as_deref(), Some("翻译失败"));
    assert_eq!(output.text(16, 14).as_deref(), Some("妮维雅润肤霜"));

    // The source workbook is left as it was.
    assert_eq!(Workbook::open(&config.spreadsheet.path)?.text(16, 12), None);

    Ok(())
}
