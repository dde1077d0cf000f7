//! The embedding model contract and shared vector math.
//!
//! Network-bound embedding providers live outside this crate; chunkers
//! consume them through these traits. Implementations must be safe for
//! concurrent reads — they are shared by reference across a pipeline run.

use crate::Result;

/// An embedding model: text in, dense vector out.
///
/// Failures should be reported as
/// [`Error::Embed`](crate::Error::Embed) carrying the model's name, so
/// pipeline errors identify the collaborator that failed.
pub trait Embedder: Send + Sync {
    /// A short name used in diagnostics and error messages.
    fn name(&self) -> &str;

    /// The dimensionality of produced vectors.
    fn dimension(&self) -> usize;

    /// Embed a single text.
    ///
    /// # Errors
    ///
    /// Provider-specific failures, surfaced as [`crate::Error::Embed`].
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts. The default maps [`Embedder::embed`];
    /// providers with a batch endpoint should override it.
    ///
    /// # Errors
    ///
    /// Provider-specific failures, surfaced as [`crate::Error::Embed`].
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Count tokens the way this model's own tokenizer would, when the
    /// provider exposes that.
    fn count_tokens(&self, text: &str) -> Option<usize> {
        let _ = text;
        None
    }
}

/// An embedding model that can return one contextualized vector per token
/// of the input, as produced by a long-context transformer before pooling.
///
/// Required by the late chunker, which pools token vectors per chunk.
pub trait TokenEmbedder: Embedder {
    /// Embed `text` and return one vector per token, in token order.
    ///
    /// # Errors
    ///
    /// Provider-specific failures, surfaced as [`crate::Error::Embed`].
    fn embed_tokens(&self, text: &str) -> Result<Vec<Vec<f32>>>;
}

/// Cosine similarity between two vectors. Zero-norm inputs yield 0.0.
pub(crate) fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a > 0.0 && norm_b > 0.0 {
        dot / (norm_a * norm_b)
    } else {
        0.0
    }
}

/// Mean-pool a selection of vectors and L2-normalize the result.
pub(crate) fn mean_pool(vectors: &[&[f32]], dim: usize) -> Vec<f32> {
    if vectors.is_empty() {
        return vec![0.0; dim];
    }

    let mut result = vec![0.0; vectors[0].len()];
    let count = vectors.len() as f32;

    for v in vectors {
        for (acc, &x) in result.iter_mut().zip(v.iter()) {
            *acc += x;
        }
    }
    for x in &mut result {
        *x /= count;
    }

    let norm: f32 = result.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-9 {
        for x in &mut result {
            *x /= norm;
        }
    }

    result
}
