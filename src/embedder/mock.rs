/// Offline embedder for tests and local runs.
///
/// Produces feature-hashed bag-of-words vectors: every lowercase word adds
/// ±1 to one bucket chosen by a SHA-256 of the word. Texts sharing words end
/// up close in cosine distance, identical texts map to identical vectors.
use sha2::{Digest, Sha256};

use super::{Embedder, EmbedderError};

pub struct MockEmbedder {
    pub dimensions: usize,
}

impl MockEmbedder {
    /// Create a new `MockEmbedder` with the given dimensionality.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self { dimensions: 384 }
    }
}

fn bucket(word: &str, dimensions: usize) -> (usize, f32) {
    let digest = Sha256::digest(word.as_bytes());
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&digest[..8]);
    let n = u64::from_le_bytes(raw);
    let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
    ((n % dimensions as u64) as usize, sign)
}

impl Embedder for MockEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let mut embedding = vec![0.0f32; self.dimensions];

        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let (idx, sign) = bucket(&word.to_lowercase(), self.dimensions);
            embedding[idx] += sign;
        }

        let norm_sq: f32 = embedding.iter().map(|v| v * v).sum();
        if norm_sq > 0.0 {
            let inv = 1.0 / norm_sq.sqrt();
            for v in &mut embedding {
                *v *= inv;
            }
        } else {
            // Keep the vector unit length so cosine distance stays defined.
            embedding[0] = 1.0;
        }

        Ok(embedding)
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
