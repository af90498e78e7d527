//! Text → vector encoding (component B).
//!
//! `Encoder` is the seam the engine calls through; concrete embedding
//! backends live in application code. This module also ships
//! [`HashingEncoder`], a deterministic, dependency-free implementation good
//! enough to drive this crate's own tests and examples — real deployments
//! plug in a dense-embedding backend instead.

use async_trait::async_trait;

use crate::errors::EncodingError;
use crate::vector::{normalize, Vector};

/// Text → vector encoding, with batch and bundle operations. Implementations
/// must be safe for concurrent invocation — the engine calls `encode`
/// concurrently across participants during matching.
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Encode a single text into a normalized vector.
    async fn encode(&self, text: &str) -> Result<Vector, EncodingError>;

    /// Encode multiple texts. The default implementation calls [`Self::encode`]
    /// per text; implementations backed by a batching model may override this
    /// for throughput.
    async fn batch_encode(&self, texts: &[String]) -> Result<Vec<Vector>, EncodingError> {
        let mut out = Vec::with_capacity(texts.len());
        for t in texts {
            out.push(self.encode(t).await?);
        }
        Ok(out)
    }

    /// Bundle multiple vectors into one by averaging then L2-normalizing.
    async fn bundle(&self, vectors: &[Vector]) -> Result<Vector, EncodingError> {
        if vectors.is_empty() {
            return Err(EncodingError::EmptyInput);
        }
        let dim = vectors[0].len();
        let mut avg = vec![0.0f32; dim];
        for v in vectors {
            for (a, x) in avg.iter_mut().zip(v.iter()) {
                *a += x;
            }
        }
        let n = vectors.len() as f32;
        for a in avg.iter_mut() {
            *a /= n;
        }
        if !normalize(&mut avg) {
            return Err(EncodingError::ZeroNorm);
        }
        Ok(avg)
    }
}

/// A deterministic, dependency-free `Encoder`: hashes whitespace tokens into
/// a fixed-dimension bag-of-words vector, then L2-normalizes. Not intended
/// for production semantic matching — useful for tests, examples, and as a
/// drop-in default so `EngineBuilder` never requires a network call to run.
pub struct HashingEncoder {
    dim: usize,
}

impl HashingEncoder {
    pub fn new(dim: usize) -> Self {
        assert!(dim > 0, "HashingEncoder dimension must be positive");
        Self { dim }
    }
}

impl Default for HashingEncoder {
    fn default() -> Self {
        Self::new(256)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[async_trait]
impl Encoder for HashingEncoder {
    async fn encode(&self, text: &str) -> Result<Vector, EncodingError> {
        if text.trim().is_empty() {
            return Err(EncodingError::EmptyInput);
        }
        let mut v = vec![0.0f32; self.dim];
        for token in text.split_whitespace() {
            let token = token.to_lowercase();
            let slot = (fnv1a(token.as_bytes()) as usize) % self.dim;
            v[slot] += 1.0;
        }
        if !normalize(&mut v) {
            return Err(EncodingError::ZeroNorm);
        }
        Ok(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn encode_rejects_empty_text() {
        let enc = HashingEncoder::default();
        assert!(matches!(enc.encode("").await, Err(EncodingError::EmptyInput)));
        assert!(matches!(enc.encode("   ").await, Err(EncodingError::EmptyInput)));
    }

    #[tokio::test]
    async fn encode_is_deterministic() {
        let enc = HashingEncoder::default();
        let a = enc.encode("I need a technical co-founder").await.unwrap();
        let b = enc.encode("I need a technical co-founder").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn batch_encode_preserves_per_element_errors() {
        let enc = HashingEncoder::default();
        let texts = vec!["hello".to_string(), "".to_string()];
        assert!(enc.batch_encode(&texts).await.is_err());
    }

    #[tokio::test]
    async fn bundle_averages_and_normalizes() {
        let enc = HashingEncoder::default();
        let a = enc.encode("alpha beta").await.unwrap();
        let b = enc.encode("alpha gamma").await.unwrap();
        let bundled = enc.bundle(&[a, b]).await.unwrap();
        let n: f32 = bundled.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((n - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn bundle_rejects_empty_list() {
        let enc = HashingEncoder::default();
        assert!(matches!(enc.bundle(&[]).await, Err(EncodingError::EmptyInput)));
    }
}
