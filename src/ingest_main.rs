use std::sync::Arc;

use anyhow::Context;

use faqbot_backend::config::Settings;
use faqbot_backend::ingest;
use faqbot_backend::llm::OpenAiProvider;
use faqbot_backend::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Arc::new(Settings::from_env());
    settings.validate().context("Invalid configuration")?;
    logging::init(&settings.log_dir);

    let provider = OpenAiProvider::new(
        settings.openai_base_url.clone(),
        settings.openai_api_key.clone(),
    );
    let chunks = ingest::build_index(&settings, &provider)
        .await
        .context("Index rebuild failed")?;

    println!(
        "Indexed {} chunks into {}",
        chunks,
        settings.index_dir.display()
    );
    Ok(())
}
