//! Text normalization and duplicate detection shared by extraction,
//! enrichment, and event dedup.

use std::collections::HashSet;

use unicode_normalization::UnicodeNormalization;

use crate::embeddings::cosine_similarity;

/// Normalize a fact string for dedup comparison.
///
/// Strips leading bullet dashes, collapses whitespace, and lowercases so
/// near-duplicate facts with minor formatting differences compare equal.
pub fn normalize_fact(fact: &str) -> String {
    let text = fact.trim().trim_start_matches('-').trim();
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Normalize a headline for dedup comparison: NFKD, lowercased, punctuation
/// stripped, whitespace collapsed.
pub fn normalize_headline(headline: &str) -> String {
    let decomposed: String = headline.to_lowercase().nfkd().collect();
    let stripped: String = decomposed
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Token containment ratio: shared tokens over the smaller token set.
/// 1.0 when one headline's tokens are a subset of the other's.
pub fn token_containment_ratio(a: &str, b: &str) -> f64 {
    let tokens_a: HashSet<&str> = a.split_whitespace().collect();
    let tokens_b: HashSet<&str> = b.split_whitespace().collect();
    let smaller = tokens_a.len().min(tokens_b.len());
    if smaller == 0 {
        return 0.0;
    }
    let shared = tokens_a.intersection(&tokens_b).count();
    shared as f64 / smaller as f64
}

/// How to decide whether a candidate duplicates an existing item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupStrategy {
    /// Embedding similarity only (entity discovery).
    EmbeddingOnly,
    /// Token containment ratio OR embedding similarity (event headlines).
    TcrOrEmbedding,
}

/// Check a candidate against existing `(text, embedding)` items. Returns the
/// index of the first matching item, or `None` when the candidate is novel.
///
/// `candidate_vec` may be `None` when no embedding model is available; the
/// embedding layer is then skipped.
pub fn find_duplicate(
    candidate_text: &str,
    candidate_vec: Option<&[f32]>,
    existing: &[(String, Option<Vec<f32>>)],
    strategy: DedupStrategy,
    embedding_threshold: f64,
    tcr_threshold: f64,
) -> Option<usize> {
    let normalized = normalize_headline(candidate_text);
    for (idx, (text, vec)) in existing.iter().enumerate() {
        if strategy == DedupStrategy::TcrOrEmbedding {
            let tcr = token_containment_ratio(&normalized, &normalize_headline(text));
            if tcr >= tcr_threshold {
                return Some(idx);
            }
        }
        if let (Some(qv), Some(ev)) = (candidate_vec, vec.as_deref()) {
            if cosine_similarity(qv, ev) >= embedding_threshold {
                return Some(idx);
            }
        }
    }
    None
}

/// Return the similarity score when `candidate` clears `threshold` against
/// `reference`, `None` otherwise.
pub fn check_relevance(candidate: &[f32], reference: &[f32], threshold: f64) -> Option<f64> {
    let score = cosine_similarity(candidate, reference);
    (score >= threshold).then_some(score)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_fact_strips_bullets_and_case() {
        assert_eq!(
            normalize_fact("-  Costs   $1,599 per Pair "),
            "costs $1,599 per pair"
        );
        assert_eq!(normalize_fact("Costs $1,599 per pair"), "costs $1,599 per pair");
    }

    #[test]
    fn normalize_headline_strips_punctuation() {
        assert_eq!(
            normalize_headline("SpaceX Launches Starship!"),
            "spacex launches starship"
        );
    }

    #[test]
    fn normalize_headline_decomposes_accents() {
        assert_eq!(normalize_headline("Café re-opens"), "cafe re opens");
    }

    #[test]
    fn tcr_subset_is_one() {
        assert!(
            (token_containment_ratio("spacex starship", "spacex launches starship today") - 1.0)
                .abs()
                < 1e-9
        );
    }

    #[test]
    fn tcr_disjoint_is_zero() {
        assert_eq!(token_containment_ratio("alpha beta", "gamma delta"), 0.0);
    }

    #[test]
    fn find_duplicate_via_tcr() {
        let existing = vec![("SpaceX launches Starship on Tuesday".to_string(), None)];
        let idx = find_duplicate(
            "SpaceX Launches Starship",
            None,
            &existing,
            DedupStrategy::TcrOrEmbedding,
            0.85,
            0.6,
        );
        assert_eq!(idx, Some(0));
    }

    #[test]
    fn find_duplicate_via_embedding_only_ignores_tcr() {
        let existing = vec![(
            "completely different words".to_string(),
            Some(vec![1.0f32, 0.0]),
        )];
        let idx = find_duplicate(
            "anything",
            Some(&[1.0f32, 0.0]),
            &existing,
            DedupStrategy::EmbeddingOnly,
            0.9,
            0.6,
        );
        assert_eq!(idx, Some(0));

        let novel = find_duplicate(
            "anything",
            Some(&[0.0f32, 1.0]),
            &existing,
            DedupStrategy::EmbeddingOnly,
            0.9,
            0.6,
        );
        assert_eq!(novel, None);
    }

    #[test]
    fn check_relevance_gates_on_threshold() {
        let a = vec![1.0f32, 0.0];
        let b = vec![1.0f32, 0.0];
        assert!(check_relevance(&a, &b, 0.9).is_some());
        let c = vec![0.0f32, 1.0];
        assert!(check_relevance(&a, &c, 0.1).is_none());
    }
}
