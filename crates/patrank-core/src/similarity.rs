//! Cosine similarity and the stable descending ordering of ranked rows.

use crate::row::{RankedResult, ResultRow};

/// `dot(a, b) / (|a| * |b|)`, accumulated in f64.
///
/// Returns 0 when either vector has zero norm, when lengths differ, or when the
/// result is not finite. Clamped to `[-1, 1]` to absorb rounding.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let sim = dot / (norm_a.sqrt() * norm_b.sqrt());
    if !sim.is_finite() {
        return 0.0;
    }
    sim.clamp(-1.0, 1.0) as f32
}

/// Pair rows with scores and sort by descending score.
///
/// The sort is stable: equal scores keep the order the rows arrived in.
/// `rows` and `scores` must be the same length; extra entries on either side
/// are dropped.
pub fn rank_by_score(rows: Vec<ResultRow>, scores: Vec<f32>) -> Vec<RankedResult> {
    let mut ranked: Vec<RankedResult> = rows
        .into_iter()
        .zip(scores)
        .map(|(row, score)| RankedResult::ranked(row, score))
        .collect();
    ranked.sort_by(|a, b| {
        let (a, b) = (a.score().unwrap_or(0.0), b.score().unwrap_or(0.0));
        b.total_cmp(&a)
    });
    ranked
}

/// Wrap rows in executor order without scores.
pub fn unranked(rows: Vec<ResultRow>) -> Vec<RankedResult> {
    rows.into_iter().map(RankedResult::unranked).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str) -> ResultRow {
        ResultRow::new(id)
    }

    fn ids(ranked: &[RankedResult]) -> Vec<&str> {
        ranked.iter().map(|r| r.row().publication_number()).collect()
    }

    #[test]
    fn orthogonal_and_parallel_vectors() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[-2.0, 0.0]), -1.0);
    }

    #[test]
    fn scale_invariant() {
        let sim = cosine_similarity(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]);
        assert!((sim - 1.0).abs() < 1e-6, "got {sim}");
    }

    #[test]
    fn zero_norm_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 1.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn mismatched_or_non_finite_is_zero() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[f32::NAN, 1.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn ranks_by_descending_similarity() {
        let theme = [1.0, 0.0];
        let docs = [[0.0, 1.0], [1.0, 0.0]];
        let scores = docs.iter().map(|d| cosine_similarity(&theme, d)).collect();
        let ranked = rank_by_score(vec![row("B"), row("A")], scores);
        assert_eq!(ids(&ranked), vec!["A", "B"]);
        assert_eq!(ranked[0].score(), Some(1.0));
        assert_eq!(ranked[1].score(), Some(0.0));
    }

    #[test]
    fn ties_keep_arrival_order() {
        let ranked = rank_by_score(
            vec![row("first"), row("low"), row("second"), row("third")],
            vec![0.7, 0.1, 0.7, 0.7],
        );
        assert_eq!(ids(&ranked), vec!["first", "second", "third", "low"]);
    }

    #[test]
    fn unranked_keeps_order_without_scores() {
        let out = unranked(vec![row("x"), row("y")]);
        assert_eq!(ids(&out), vec!["x", "y"]);
        assert!(out.iter().all(|r| r.score().is_none()));
    }
}
