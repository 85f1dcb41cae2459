//! Vector helpers shared by storage, indexing and scoring.

use crate::error::{Error, Result};

/// Number of components in every token vector handled by the system.
pub const EMBEDDING_DIM: usize = 96;

/// Hash of a vector's exact bit pattern, used as the content address of
/// an embedding row.
///
/// Only the first eight bytes of the blake3 digest are kept, so distinct
/// vectors can share a hash; the store disambiguates with
/// [`vectors_identical`].
pub fn content_hash(vector: &[f32]) -> u64 {
    let digest = blake3::hash(bytemuck::cast_slice(vector));
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(prefix)
}

/// Bitwise equality. `0.0` and `-0.0` differ, and a NaN equals itself
/// when the payload matches.
pub fn vectors_identical(a: &[f32], b: &[f32]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
}

/// Serialize a vector into native-endian bytes for storage.
pub fn encode_vector(vector: &[f32]) -> &[u8] {
    bytemuck::cast_slice(vector)
}

/// Inverse of [`encode_vector`]. The input does not need to be aligned.
pub fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % std::mem::size_of::<f32>() != 0 {
        return Err(Error::Consistency(format!(
            "stored vector has {} bytes, not a multiple of 4",
            bytes.len()
        )));
    }
    let mut out = vec![0f32; bytes.len() / std::mem::size_of::<f32>()];
    bytemuck::cast_slice_mut::<f32, u8>(&mut out).copy_from_slice(bytes);
    Ok(out)
}

/// Reject vectors whose length differs from [`EMBEDDING_DIM`].
pub fn check_dimension(vector: &[f32]) -> Result<()> {
    if vector.len() != EMBEDDING_DIM {
        return Err(Error::InvalidInput(format!(
            "expected {EMBEDDING_DIM}-dimensional vector, got {}",
            vector.len()
        )));
    }
    Ok(())
}

/// Cosine similarity `dot / (|a| * |b|)`. Higher is better.
///
/// Returns `None` when the ratio is not a finite number, which happens
/// when either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    let mut dot = 0.0f32;
    let mut a_norm = 0.0f32;
    let mut b_norm = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        a_norm += x * x;
        b_norm += y * y;
    }
    let similarity = dot / (a_norm.sqrt() * b_norm.sqrt());
    similarity.is_finite().then_some(similarity)
}
