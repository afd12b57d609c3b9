//! Vector similarity helpers shared by the stores and the strategies.

use std::cmp::Ordering;

/// Compute cosine similarity between two vectors
///
/// # Returns
///
/// Cosine similarity score (-1.0..=1.0), or 0.0 if either vector has zero
/// magnitude or the dimensions differ
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

/// Similarity of an optional embedding to an optional query; missing on
/// either side scores 0.0.
pub fn similarity_to(query: Option<&[f32]>, embedding: Option<&[f32]>) -> f32 {
    match (query, embedding) {
        (Some(q), Some(e)) => cosine_similarity(q, e),
        _ => 0.0,
    }
}

/// Ordering for "best first" lists: higher score first, then smaller id.
///
/// NaN scores sort after every real score so they never win a tie-break.
pub fn rank_order(a_score: f32, a_id: &str, b_score: f32, b_id: &str) -> Ordering {
    let a_key = if a_score.is_nan() { f32::NEG_INFINITY } else { a_score };
    let b_key = if b_score.is_nan() { f32::NEG_INFINITY } else { b_score };
    b_key
        .partial_cmp(&a_key)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a_id.cmp(b_id))
}

/// Decode a little-endian f32 BLOB
pub fn parse_embedding(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }

    blob.chunks(4)
        .map(|bytes| {
            let arr: [u8; 4] = bytes.try_into().ok()?;
            Some(f32::from_le_bytes(arr))
        })
        .collect()
}

/// Encode an embedding as a little-endian f32 BLOB
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}
