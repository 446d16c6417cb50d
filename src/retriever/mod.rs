//! In-memory vector store over the persisted index artifacts.
//!
//! The index is two row-aligned files: a binary matrix of f32 embeddings
//! (`embeddings.bin`) and line-delimited JSON chunk records (`docs.jsonl`).
//! Vectors are L2-normalized once at load, so similarity search is a plain
//! dot-product scan. Brute force on purpose: the knowledge base is small
//! enough to re-embed wholesale on every rebuild.

use std::cmp::Ordering;
use std::fs;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::core::errors::ApiError;

pub const EMBEDDINGS_FILE: &str = "embeddings.bin";
pub const DOCS_FILE: &str = "docs.jsonl";

const NORM_EPSILON: f32 = 1e-12;

/// One retrievable chunk, as persisted in `docs.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub page_content: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl ChunkRecord {
    pub fn new(page_content: impl Into<String>, source: &str) -> Self {
        Self {
            page_content: page_content.into(),
            metadata: json!({ "source": source }),
        }
    }

    pub fn source(&self) -> &str {
        self.metadata
            .get("source")
            .and_then(|v| v.as_str())
            .unwrap_or("kb")
    }
}

#[derive(Debug)]
pub struct Retriever {
    vectors: Vec<Vec<f32>>,
    records: Vec<ChunkRecord>,
    dims: usize,
}

impl Retriever {
    /// Loads both index artifacts and normalizes the stored vectors.
    ///
    /// A missing artifact or a row-count mismatch means the index is
    /// unusable and the caller should rebuild it.
    pub fn load(index_dir: &Path) -> Result<Self, ApiError> {
        let emb_path = index_dir.join(EMBEDDINGS_FILE);
        let docs_path = index_dir.join(DOCS_FILE);
        if !emb_path.exists() || !docs_path.exists() {
            return Err(ApiError::IndexUnavailable(
                "Index not found. Rebuild it first (run faqbot-ingest or POST /api/index/rebuild)."
                    .to_string(),
            ));
        }

        let (mut vectors, dims) = read_matrix(&emb_path)?;
        let records = read_records(&docs_path)?;
        if vectors.len() != records.len() {
            return Err(ApiError::IndexUnavailable(format!(
                "Index artifacts are misaligned: {} vectors vs {} records. Rebuild the index.",
                vectors.len(),
                records.len()
            )));
        }

        for vector in &mut vectors {
            normalize(vector);
        }

        tracing::info!("Loaded index: docs={} dims={}", records.len(), dims);
        Ok(Self {
            vectors,
            records,
            dims,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Returns the top `max(1, k)` chunks by cosine similarity, highest
    /// first. Ties keep document order (the sort is stable).
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(&ChunkRecord, f32)>, ApiError> {
        if query.len() != self.dims {
            return Err(ApiError::BadRequest(format!(
                "query vector length mismatch: {} != {}",
                query.len(),
                self.dims
            )));
        }

        let mut q = query.to_vec();
        normalize(&mut q);

        let mut scores: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .map(|vector| dot(&q, vector))
            .enumerate()
            .collect();
        scores.sort_by(|left, right| right.1.partial_cmp(&left.1).unwrap_or(Ordering::Equal));
        scores.truncate(k.max(1));

        Ok(scores
            .into_iter()
            .map(|(idx, score)| (&self.records[idx], score))
            .collect())
    }
}

/// Scales `vec` to unit length in place. The epsilon keeps degenerate
/// zero vectors finite instead of dividing by zero.
pub fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt() + NORM_EPSILON;
    for x in vec.iter_mut() {
        *x /= norm;
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Writes both artifacts into `dir`, which must already exist.
/// Row `i` of the matrix is the embedding of record `i`.
pub fn write_artifacts(
    dir: &Path,
    vectors: &[Vec<f32>],
    records: &[ChunkRecord],
) -> Result<(), ApiError> {
    let dims = vectors.first().map(|v| v.len()).unwrap_or(0);

    let mut matrix =
        BufWriter::new(File::create(dir.join(EMBEDDINGS_FILE)).map_err(ApiError::internal)?);
    matrix
        .write_all(&(vectors.len() as u32).to_le_bytes())
        .map_err(ApiError::internal)?;
    matrix
        .write_all(&(dims as u32).to_le_bytes())
        .map_err(ApiError::internal)?;
    for row in vectors {
        for value in row {
            matrix
                .write_all(&value.to_le_bytes())
                .map_err(ApiError::internal)?;
        }
    }
    matrix.flush().map_err(ApiError::internal)?;

    let mut docs = BufWriter::new(File::create(dir.join(DOCS_FILE)).map_err(ApiError::internal)?);
    for record in records {
        let line = serde_json::to_string(record).map_err(ApiError::internal)?;
        docs.write_all(line.as_bytes()).map_err(ApiError::internal)?;
        docs.write_all(b"\n").map_err(ApiError::internal)?;
    }
    docs.flush().map_err(ApiError::internal)?;

    Ok(())
}

fn read_matrix(path: &Path) -> Result<(Vec<Vec<f32>>, usize), ApiError> {
    let bytes = fs::read(path).map_err(ApiError::internal)?;
    if bytes.len() < 8 {
        return Err(ApiError::IndexUnavailable(
            "Embeddings file is truncated. Rebuild the index.".to_string(),
        ));
    }

    let rows = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let dims = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let expected = 8 + rows * dims * 4;
    if bytes.len() != expected {
        return Err(ApiError::IndexUnavailable(format!(
            "Embeddings file is truncated: {} bytes, expected {}. Rebuild the index.",
            bytes.len(),
            expected
        )));
    }

    let mut vectors = Vec::with_capacity(rows);
    let mut offset = 8;
    for _ in 0..rows {
        let mut row = Vec::with_capacity(dims);
        for _ in 0..dims {
            row.push(f32::from_le_bytes([
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
            ]));
            offset += 4;
        }
        vectors.push(row);
    }

    Ok((vectors, dims))
}

fn read_records(path: &Path) -> Result<Vec<ChunkRecord>, ApiError> {
    let file = File::open(path).map_err(ApiError::internal)?;
    let mut records = Vec::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(ApiError::internal)?;
        if line.trim().is_empty() {
            continue;
        }
        let record: ChunkRecord = serde_json::from_str(&line).map_err(|e| {
            ApiError::IndexUnavailable(format!(
                "Corrupt chunk record on line {}: {}. Rebuild the index.",
                line_no + 1,
                e
            ))
        })?;
        records.push(record);
    }
    Ok(records)
}
