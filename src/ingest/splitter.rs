use crate::core::errors::ApiError;

/// Splits document text into fixed-size character windows with overlap,
/// so context survives chunk boundaries.
pub struct Splitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Splitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ApiError> {
        if chunk_overlap >= chunk_size {
            return Err(ApiError::Config(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let mut chunks = Vec::new();
        if total == 0 {
            return chunks;
        }

        let step = self.chunk_size.saturating_sub(self.chunk_overlap).max(1);
        let mut start = 0;

        while start < total {
            // Everything past this point already sits inside the previous
            // chunk's overlap; emitting it would duplicate content.
            if start > 0 && total - start <= self.chunk_overlap {
                break;
            }

            let end = (start + self.chunk_size).min(total);
            let piece: String = chars[start..end].iter().collect();
            let piece = piece.trim();
            if !piece.is_empty() {
                chunks.push(piece.to_string());
            }

            start += step;
        }

        chunks
    }
}
