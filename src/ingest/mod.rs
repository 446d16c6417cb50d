//! Knowledge-base ingestion: walk the KB directory, split documents into
//! overlapping chunks, embed them, and publish the index artifacts.

pub mod splitter;

pub use splitter::Splitter;

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::Settings;
use crate::core::errors::ApiError;
use crate::llm::LlmProvider;
use crate::retriever::{self, ChunkRecord};

const TEXT_EXTENSIONS: [&str; 2] = ["md", "txt"];

/// One raw knowledge-base document, read at ingestion time.
pub struct KbDocument {
    pub text: String,
    pub source: String,
}

/// Reads every `.md`/`.txt` file under `kb_dir`, recursively.
/// Unreadable files are skipped with a warning.
pub fn load_kb_docs(kb_dir: &Path) -> Vec<KbDocument> {
    let mut docs = Vec::new();

    for entry in WalkDir::new(kb_dir).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Skipping unreadable path: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());
        if !matches!(ext.as_deref(), Some(ext) if TEXT_EXTENSIONS.contains(&ext)) {
            continue;
        }

        match fs::read_to_string(path) {
            Ok(text) => {
                let source = path
                    .strip_prefix(kb_dir)
                    .unwrap_or(path)
                    .to_string_lossy()
                    .to_string();
                docs.push(KbDocument { text, source });
            }
            Err(e) => {
                tracing::warn!("Skipping {}: {}", path.display(), e);
            }
        }
    }

    docs
}

/// Rebuilds the index from scratch: read, split, embed, publish.
///
/// The new artifacts are written to a staging directory and swapped into
/// place with renames, so a crash mid-rebuild leaves the previous index
/// (or none) rather than a torn one. Returns the number of chunks written.
pub async fn build_index(
    settings: &Settings,
    provider: &dyn LlmProvider,
) -> Result<usize, ApiError> {
    if settings.openai_api_key.is_empty() {
        return Err(ApiError::Config(
            "OPENAI_API_KEY is not set. Fill in your environment before rebuilding the index."
                .to_string(),
        ));
    }
    let splitter = Splitter::new(settings.chunk_size, settings.chunk_overlap)?;

    tracing::info!("Using embeddings model: {}", settings.embed_model);
    tracing::info!("Loading documents from {}", settings.kb_dir.display());
    let docs = load_kb_docs(&settings.kb_dir);
    if docs.is_empty() {
        return Err(ApiError::Config(format!(
            "Knowledge base is empty: add .md/.txt files under {}",
            settings.kb_dir.display()
        )));
    }

    let mut records = Vec::new();
    for doc in &docs {
        for piece in splitter.split(&doc.text) {
            records.push(ChunkRecord::new(piece, &doc.source));
        }
    }
    tracing::info!("Chunks: {}. Computing embeddings...", records.len());

    let texts: Vec<String> = records.iter().map(|r| r.page_content.clone()).collect();
    let vectors = provider.embed(&texts, &settings.embed_model).await?;
    if vectors.len() != records.len() {
        return Err(ApiError::Upstream(format!(
            "embedding count mismatch: {} vectors for {} chunks",
            vectors.len(),
            records.len()
        )));
    }
    let dims = vectors.first().map(|v| v.len()).unwrap_or(0);
    if dims == 0 || vectors.iter().any(|v| v.len() != dims) {
        return Err(ApiError::Upstream(
            "embedding dimensionality is not uniform".to_string(),
        ));
    }

    publish_index(&settings.index_dir, &vectors, &records)?;
    tracing::info!("Saved index to {}", settings.index_dir.display());
    Ok(records.len())
}

/// Stage-then-swap publication of the index artifacts.
fn publish_index(
    index_dir: &Path,
    vectors: &[Vec<f32>],
    records: &[ChunkRecord],
) -> Result<(), ApiError> {
    if let Some(parent) = index_dir.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(ApiError::internal)?;
    }

    let staging = sibling(index_dir, "staging");
    if staging.exists() {
        fs::remove_dir_all(&staging).map_err(ApiError::internal)?;
    }
    fs::create_dir_all(&staging).map_err(ApiError::internal)?;
    retriever::write_artifacts(&staging, vectors, records)?;

    let retired = sibling(index_dir, "old");
    if retired.exists() {
        fs::remove_dir_all(&retired).map_err(ApiError::internal)?;
    }
    if index_dir.exists() {
        fs::rename(index_dir, &retired).map_err(ApiError::internal)?;
    }
    fs::rename(&staging, index_dir).map_err(ApiError::internal)?;
    if retired.exists() {
        let _ = fs::remove_dir_all(&retired);
    }

    Ok(())
}

fn sibling(index_dir: &Path, suffix: &str) -> PathBuf {
    let name = index_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "index".to_string());
    index_dir.with_file_name(format!("{}.{}", name, suffix))
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::llm::types::ChatRequest;
    use crate::retriever::Retriever;

    struct StubEmbedder;

    #[async_trait]
    impl LlmProvider for StubEmbedder {
        fn name(&self) -> &str {
            "stub"
        }

        async fn chat(&self, _request: ChatRequest, _model_id: &str) -> Result<String, ApiError> {
            Err(ApiError::Upstream("chat is not stubbed".to_string()))
        }

        async fn embed(
            &self,
            inputs: &[String],
            _model_id: &str,
        ) -> Result<Vec<Vec<f32>>, ApiError> {
            Ok(inputs.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
        }
    }

    fn test_settings(tmp: &TempDir) -> Settings {
        Settings {
            openai_api_key: "test-key".to_string(),
            kb_dir: tmp.path().join("kb"),
            index_dir: tmp.path().join("data").join("index"),
            ..Settings::default()
        }
    }

    fn write_kb_file(kb_dir: &Path, name: &str, text: &str) {
        fs::create_dir_all(kb_dir).expect("kb dir");
        fs::write(kb_dir.join(name), text).expect("kb file");
    }

    #[test]
    fn kb_walk_filters_to_text_extensions() {
        let tmp = TempDir::new().expect("tempdir");
        let kb = tmp.path().join("kb");
        write_kb_file(&kb, "faq.md", "Refunds take 5 business days.");
        write_kb_file(&kb, "notes.txt", "Shipping is free over $50.");
        write_kb_file(&kb, "image.png", "not text");
        write_kb_file(&kb.join("nested"), "deep.md", "Nested content.");

        let docs = load_kb_docs(&kb);
        let mut sources: Vec<&str> = docs.iter().map(|d| d.source.as_str()).collect();
        sources.sort();
        assert_eq!(
            sources,
            vec!["faq.md", "nested/deep.md", "notes.txt"]
        );
    }

    #[tokio::test]
    async fn build_index_writes_aligned_artifacts() {
        let tmp = TempDir::new().expect("tempdir");
        let settings = test_settings(&tmp);
        write_kb_file(&settings.kb_dir, "faq.md", "Refunds take 5 business days.");
        write_kb_file(&settings.kb_dir, "shipping.md", "Shipping is free over $50.");

        let chunks = build_index(&settings, &StubEmbedder)
            .await
            .expect("build index");
        assert_eq!(chunks, 2);

        let retriever = Retriever::load(&settings.index_dir).expect("load");
        assert_eq!(retriever.len(), chunks);
        assert_eq!(retriever.dims(), 3);
    }

    #[tokio::test]
    async fn empty_kb_is_a_config_error() {
        let tmp = TempDir::new().expect("tempdir");
        let settings = test_settings(&tmp);
        fs::create_dir_all(&settings.kb_dir).expect("kb dir");

        let err = build_index(&settings, &StubEmbedder)
            .await
            .expect_err("must fail");
        assert!(matches!(err, ApiError::Config(_)));
    }

    #[tokio::test]
    async fn missing_credential_is_a_config_error() {
        let tmp = TempDir::new().expect("tempdir");
        let settings = Settings {
            openai_api_key: String::new(),
            ..test_settings(&tmp)
        };

        let err = build_index(&settings, &StubEmbedder)
            .await
            .expect_err("must fail");
        assert!(matches!(err, ApiError::Config(_)));
    }

    #[tokio::test]
    async fn rebuild_replaces_the_previous_index() {
        let tmp = TempDir::new().expect("tempdir");
        let settings = test_settings(&tmp);
        write_kb_file(&settings.kb_dir, "faq.md", "Refunds take 5 business days.");

        let first = build_index(&settings, &StubEmbedder)
            .await
            .expect("first build");
        assert_eq!(first, 1);

        write_kb_file(&settings.kb_dir, "returns.md", "Returns are accepted for 30 days.");
        let second = build_index(&settings, &StubEmbedder)
            .await
            .expect("second build");
        assert_eq!(second, 2);

        let retriever = Retriever::load(&settings.index_dir).expect("load");
        assert_eq!(retriever.len(), 2);

        // No staging or retired directories left behind.
        assert!(!sibling(&settings.index_dir, "staging").exists());
        assert!(!sibling(&settings.index_dir, "old").exists());
    }
}
