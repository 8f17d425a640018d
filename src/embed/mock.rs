use anyhow::Result;

use super::{Embedder, Embedding, l2_normalize};

pub const DEFAULT_DIMENSIONS: usize = 384;

/// Deterministic stand-in for a neural model: the trimmed, lower-cased text
/// seeds a BLAKE3 output stream and each byte becomes one component.
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Embedding> {
        let key = text.trim().to_lowercase();
        let mut bytes = vec![0u8; self.dimensions];
        blake3::Hasher::new()
            .update(key.as_bytes())
            .finalize_xof()
            .fill(&mut bytes);

        let mut v: Embedding = bytes.iter().map(|&b| b as f32 / 255.0 - 0.5).collect();
        l2_normalize(&mut v);
        Ok(v)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "mock-blake3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::{cosine_similarity, norm};

    #[test]
    fn same_text_same_vector() {
        let e = HashEmbedder::default();
        let a = e.embed("Act without attachment.").unwrap();
        let b = e.embed("  act without ATTACHMENT.  ").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), DEFAULT_DIMENSIONS);
    }

    #[test]
    fn vectors_are_unit_length() {
        let e = HashEmbedder::new(64);
        let v = e.embed("steady mind").unwrap();
        assert!((norm(&v) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn different_texts_are_not_near_duplicates() {
        let e = HashEmbedder::default();
        let a = e.embed("duty before reward").unwrap();
        let b = e.embed("the self is eternal").unwrap();
        assert!(cosine_similarity(&a, &b) < 0.5);
    }
}
