//! Text similarity measures for convergence detection.

/// Similarity between two reasoning steps, where 1.0 means identical.
///
/// Implementations may return anything; the engine clamps results into
/// `[0, 1]` and treats NaN as 0.
pub trait SimilarityMeasure: Send + Sync {
    fn similarity(&self, a: &str, b: &str) -> f64;
}

/// Longest-common-subsequence ratio over Unicode scalar values.
///
/// `2 * LCS(a, b) / (len(a) + len(b))`. Two empty strings are identical
/// (1.0); an empty and a non-empty string share nothing (0.0).
#[derive(Debug, Clone, Copy, Default)]
pub struct LcsRatio;

impl SimilarityMeasure for LcsRatio {
    fn similarity(&self, a: &str, b: &str) -> f64 {
        let a: Vec<char> = a.chars().collect();
        let b: Vec<char> = b.chars().collect();
        let total = a.len() + b.len();
        if total == 0 {
            return 1.0;
        }
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        2.0 * lcs_len(&a, &b) as f64 / total as f64
    }
}

/// Length of the longest common subsequence, two-row DP.
fn lcs_len(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Clamp a raw similarity into `[0, 1]`; NaN becomes 0.
pub(crate) fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_and_empty() {
        assert_eq!(LcsRatio.similarity("same text", "same text"), 1.0);
        assert_eq!(LcsRatio.similarity("", ""), 1.0);
        assert_eq!(LcsRatio.similarity("", "x"), 0.0);
        assert_eq!(LcsRatio.similarity("x", ""), 0.0);
    }

    #[test]
    fn test_partial_overlap() {
        let score = LcsRatio.similarity("Merge sort is stable.", "Merge sort is stable and O(n log n).");
        // LCS is the 21 characters of the shorter step
        assert!((score - 42.0 / 57.0).abs() < 1e-12);
    }

    #[test]
    fn test_disjoint() {
        assert_eq!(LcsRatio.similarity("abc", "xyz"), 0.0);
    }

    #[test]
    fn test_symmetric() {
        let a = "the quick brown fox";
        let b = "the quack brown box";
        assert_eq!(LcsRatio.similarity(a, b), LcsRatio.similarity(b, a));
    }

    #[test]
    fn test_lcs_len() {
        let a: Vec<char> = "ABCBDAB".chars().collect();
        let b: Vec<char> = "BDCABA".chars().collect();
        assert_eq!(lcs_len(&a, &b), 4);
    }

    #[test]
    fn test_clamp_score() {
        assert_eq!(clamp_score(f64::NAN), 0.0);
        assert_eq!(clamp_score(1.5), 1.0);
        assert_eq!(clamp_score(-0.2), 0.0);
        assert_eq!(clamp_score(0.4), 0.4);
    }
}
