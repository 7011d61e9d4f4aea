//! Scoring and survivor selection.

use crate::schema::{ErrorStatistics, ScoreRecord};

/// Score assigned to a child whose evaluation failed.
///
/// Ranks after every real score, so a failed child is never kept while
/// enough evaluated children remain.
pub const FAILED_SCORE: f64 = f64::INFINITY;

/// Fitness of one child from its checkpoint errors.
///
/// Zero when any training error is exactly zero (unreached checkpoint or a
/// perfectly learned grid). Otherwise a weighted sum of test/train ratios,
/// gated to zero unless early dynamics are harder to learn than late ones.
pub fn score(stats: &ErrorStatistics) -> f64 {
    if stats.train_5 == 0.0 || stats.train_50 == 0.0 || stats.train_300 == 0.0 {
        return 0.0;
    }
    if stats.train_5 / stats.train_300 <= 1.0 {
        return 0.0;
    }
    (1.0 / 3.0) * stats.test_300 / stats.train_300
        + (1.0 / 8.0) * stats.test_50 / stats.train_50
        + (13.0 / 24.0) * stats.test_5 / stats.train_5
}

/// Indices of the `count` lowest-scoring records, lowest first.
///
/// Equal scores keep the lower child index first.
pub fn select(records: &[ScoreRecord], count: usize) -> Vec<usize> {
    let mut ranked = records.to_vec();
    ranked.sort_by(|a, b| a.score.total_cmp(&b.score).then(a.index.cmp(&b.index)));
    ranked.into_iter().take(count).map(|r| r.index).collect()
}
