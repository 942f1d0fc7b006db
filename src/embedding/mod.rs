//! Embedding provider abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and two concrete backends:
//! - **[`local_onnx::LocalEmbedder`]** — on-device transformer inference via
//!   tract-onnx with an in-crate WordPiece tokenizer; no network calls.
//! - **[`azure::AzureEmbedder`]** — the Azure OpenAI embeddings API with
//!   batching, retry, and backoff.
//!
//! Also provides vector utilities shared by the stores:
//! - [`vec_to_blob`] / [`blob_to_vec`] — little-endian f32 BLOB codecs for
//!   SQLite storage
//! - [`cosine_similarity`] — dot product up to the shorter dimension
//!   (equal to cosine for unit-length vectors)
//! - [`normalize_l2`] — scale to unit length, leaving zero vectors alone

pub mod azure;
pub mod local_onnx;
pub mod wordpiece;

use anyhow::Result;
use async_trait::async_trait;

/// Maps text to fixed-dimension L2-normalized vectors.
///
/// Implementations share one underlying session across callers; the batch
/// call preserves input order in its output.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier for status reporting.
    fn model_name(&self) -> &str;

    /// Embedding vector dimensionality.
    fn dims(&self) -> usize;

    /// Embed a batch of texts; the result has one vector per input, in
    /// matching order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text (e.g. a search query).
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;
        vectors
            .pop()
            .ok_or_else(|| anyhow::anyhow!("empty embedding response"))
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing a
/// BLOB of `vec.len() × 4` bytes, portable across architectures.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector. Reverses [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Similarity between two embedding vectors: the dot product over the
/// shorter of the two lengths. For unit-length vectors this equals cosine
/// similarity.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Scale a vector to unit L2 norm. A zero vector stays zero.
pub fn normalize_l2(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-9 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob.len(), 20);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn test_blob_is_little_endian() {
        let blob = vec_to_blob(&[1.0f32]);
        assert_eq!(blob, 1.0f32.to_le_bytes().to_vec());
    }

    #[test]
    fn test_cosine_identical_unit_vectors() {
        let v = normalize_l2(vec![1.0, 2.0, 3.0]);
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_shorter_dimension() {
        let a = vec![1.0, 1.0, 5.0];
        let b = vec![1.0, 1.0];
        assert!((cosine_similarity(&a, &b) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_l2_unit_norm() {
        let v = normalize_l2(vec![3.0, 4.0]);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_l2_zero_stays_zero() {
        let v = normalize_l2(vec![0.0, 0.0, 0.0]);
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
