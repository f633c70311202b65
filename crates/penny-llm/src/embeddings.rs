//! Embedding vector storage and similarity search.
//!
//! Vectors are persisted as little-endian f32 BLOBs so the store never needs
//! to understand them; everything that interprets a vector goes through here.

/// Serialize an embedding vector to little-endian f32 bytes.
pub fn serialize_embedding(vec: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Deserialize little-endian f32 bytes back into a vector. Trailing partial
/// floats are dropped.
pub fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Cosine similarity between two vectors. Zero when either is empty or all
/// zeros, or when dimensions disagree.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        na += (*x as f64) * (*x as f64);
        nb += (*y as f64) * (*y as f64);
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

/// Rank `candidates` by cosine similarity to `query` and return the top `k`
/// at or above `threshold`, best first. Candidate ids are caller-defined
/// (row ids, list indices).
pub fn find_similar(
    query: &[f32],
    candidates: &[(i64, Vec<f32>)],
    top_k: usize,
    threshold: f64,
) -> Vec<(i64, f64)> {
    let mut scored: Vec<(i64, f64)> = candidates
        .iter()
        .map(|(id, vec)| (*id, cosine_similarity(query, vec)))
        .filter(|(_, score)| *score >= threshold)
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_k);
    scored
}

/// Compose the text an entity embedding is generated from: name, tagline
/// (if any), then every fact. Keeping the composition in one place means
/// regeneration after new facts always matches backfill.
pub fn build_entity_embed_text(name: &str, facts: &[String], tagline: Option<&str>) -> String {
    let mut text = match tagline {
        Some(t) if !t.is_empty() => format!("{name} ({t})"),
        _ => name.to_string(),
    };
    for fact in facts {
        text.push('\n');
        text.push_str(fact);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_roundtrip() {
        let vec = vec![0.25f32, -1.5, 3.0];
        let bytes = serialize_embedding(&vec);
        assert_eq!(bytes.len(), 12);
        assert_eq!(deserialize_embedding(&bytes), vec);
    }

    #[test]
    fn cosine_identical_is_one() {
        let v = vec![0.3f32, 0.4, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_orthogonal_is_zero() {
        let a = vec![1.0f32, 0.0];
        let b = vec![0.0f32, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-9);
    }

    #[test]
    fn cosine_dimension_mismatch_is_zero() {
        let a = vec![1.0f32, 0.0];
        let b = vec![1.0f32];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn find_similar_ranks_and_caps() {
        let query = vec![1.0f32, 0.0];
        let candidates = vec![
            (1, vec![1.0f32, 0.0]),
            (2, vec![0.9f32, 0.1]),
            (3, vec![0.0f32, 1.0]),
        ];
        let matches = find_similar(&query, &candidates, 1, 0.5);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].0, 1);
    }

    #[test]
    fn embed_text_includes_tagline_and_facts() {
        let text = build_entity_embed_text(
            "genesis",
            &["Formed in 1967".to_string()],
            Some("british prog rock band"),
        );
        assert_eq!(text, "genesis (british prog rock band)\nFormed in 1967");
    }
}
