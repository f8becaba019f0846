//! Text embedding clients.
//!
//! Every vector leaving this module has the configured dimensionality and
//! unit L2 norm, so cosine similarity downstream reduces to a dot product.

mod ollama;

pub use ollama::OllamaEmbedder;

use async_trait::async_trait;
use thiserror::Error;

/// Why an embedding could not be produced.
#[derive(Error, Debug)]
pub enum EmbeddingFailure {
    #[error("cannot embed empty text")]
    EmptyInput,

    #[error("embedding request failed: {0}")]
    Request(String),

    #[error("embedding request timed out")]
    Timeout,

    #[error("embedding server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("embedding response unreadable: {0}")]
    MalformedResponse(String),

    #[error("expected {expected}-dimensional embedding, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding has zero norm and cannot be normalized")]
    ZeroNorm,

    #[error("embedding contains non-finite values")]
    NonFinite,
}

/// A service turning text into fixed-size unit vectors.
#[async_trait]
pub trait EmbedderClient: Send + Sync {
    /// Embed one non-empty text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingFailure>;

    /// Embed several texts concurrently.
    ///
    /// Results line up with `texts`; a failed item does not affect the others.
    async fn embed_batch(&self, texts: &[String]) -> Vec<Result<Vec<f32>, EmbeddingFailure>> {
        futures::future::join_all(texts.iter().map(|t| self.embed(t))).await
    }

    /// Configured vector length.
    fn dimensions(&self) -> usize;

    /// Model identifier for status reporting.
    fn model(&self) -> &str;
}

/// Validate length and scale `vector` to unit length.
pub fn normalize(mut vector: Vec<f32>, expected: usize) -> Result<Vec<f32>, EmbeddingFailure> {
    if vector.len() != expected {
        return Err(EmbeddingFailure::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    if vector.iter().any(|x| !x.is_finite()) {
        return Err(EmbeddingFailure::NonFinite);
    }

    // Accumulate in f64 so large dimensions keep precision.
    let norm = vector
        .iter()
        .map(|&x| f64::from(x) * f64::from(x))
        .sum::<f64>()
        .sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return Err(EmbeddingFailure::ZeroNorm);
    }

    for x in &mut vector {
        *x = (f64::from(*x) / norm) as f32;
    }
    Ok(vector)
}

/// Cosine similarity; 0.0 when either side is degenerate or lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na.sqrt() * nb.sqrt())) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn l2(v: &[f32]) -> f64 {
        v.iter().map(|&x| f64::from(x).powi(2)).sum::<f64>().sqrt()
    }

    #[test]
    fn test_normalize_unit_length() {
        let v = normalize(vec![3.0, 4.0, 0.0], 3).unwrap();
        assert!((l2(&v) - 1.0).abs() < 1e-6);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_many_shapes() {
        let inputs = [
            vec![1e-8, 2e-8, -3e-8, 4e-8],
            vec![1000.0, -2000.0, 3000.0, 0.5],
            vec![0.0, 0.0, 0.0, 7.0],
        ];
        for input in inputs {
            let v = normalize(input, 4).unwrap();
            assert!((l2(&v) - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_normalize_rejects_wrong_dimension() {
        let err = normalize(vec![1.0, 2.0], 3).unwrap_err();
        assert!(matches!(
            err,
            EmbeddingFailure::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_normalize_rejects_zero_vector() {
        let err = normalize(vec![0.0; 4], 4).unwrap_err();
        assert!(matches!(err, EmbeddingFailure::ZeroNorm));
    }

    #[test]
    fn test_normalize_rejects_nan() {
        let err = normalize(vec![f32::NAN, 1.0], 2).unwrap_err();
        assert!(matches!(err, EmbeddingFailure::NonFinite));
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }
}
