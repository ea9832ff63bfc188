//! Vector helpers for the embedding index.
//!
//! - [`normalize`]: scale a vector to unit length (zero vectors stay zero)
//! - [`cosine_similarity`]: similarity of two raw, possibly unnormalized vectors
//! - [`dot`]: similarity of two vectors already passed through [`normalize`]
//! - [`encode_vector`] / [`decode_vector`]: little-endian f32 bytes as base64,
//!   the on-disk form used by the vector store

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Scale `v` to unit L2 norm in place. Vectors with a norm below
/// `f32::EPSILON` are zeroed so they score `0.0` against everything.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm < f32::EPSILON || !norm.is_finite() {
        v.iter_mut().for_each(|x| *x = 0.0);
        return;
    }
    v.iter_mut().for_each(|x| *x /= norm);
}

/// Owned copy of `v` at unit length.
pub fn normalized(v: &[f32]) -> Vec<f32> {
    let mut out = v.to_vec();
    normalize(&mut out);
    out
}

/// Dot product. Returns `0.0` for empty vectors or vectors of different lengths.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors,
/// vectors of different lengths, and zero vectors.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Encode a vector as base64 of its little-endian f32 bytes.
///
/// ```rust
/// use magic_cli::vector::{decode_vector, encode_vector};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// assert_eq!(decode_vector(&encode_vector(&v)), Some(v));
/// ```
pub fn encode_vector(v: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(v.len() * 4);
    for &x in v {
        bytes.extend_from_slice(&x.to_le_bytes());
    }
    STANDARD.encode(bytes)
}

/// Reverse [`encode_vector`]. `None` if the text is not base64 or its
/// length is not a multiple of four bytes.
pub fn decode_vector(encoded: &str) -> Option<Vec<f32>> {
    let bytes = STANDARD.decode(encoded).ok()?;
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}
