use serde::Serialize;

/// Verdict of a shadow comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Promote,
    Reject,
    ExtendShadow,
}

/// Compare composite scores after a shadow test.
///
/// `promote` when the relative improvement reaches the threshold, `reject`
/// when the candidate is worse, `extend_shadow` for inconclusive middles or
/// when too few paired runs have accumulated.
pub fn compare_composites(
    current: f64,
    candidate: f64,
    paired_runs: usize,
    min_shadow_runs: usize,
    success_threshold: f64,
) -> (Recommendation, f64) {
    if paired_runs < min_shadow_runs {
        return (Recommendation::ExtendShadow, 0.0);
    }

    let improvement_ratio = if current.abs() < f64::EPSILON {
        if candidate > 0.0 { 1.0 } else { 0.0 }
    } else {
        (candidate - current) / current
    };

    let recommendation = if improvement_ratio >= success_threshold {
        Recommendation::Promote
    } else if improvement_ratio < 0.0 {
        Recommendation::Reject
    } else {
        Recommendation::ExtendShadow
    };
    (recommendation, improvement_ratio)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promote_at_clear_improvement() {
        // 0.80 → 0.90 is a 12.5% improvement over a 5% threshold.
        let (rec, ratio) = compare_composites(0.80, 0.90, 10, 10, 0.05);
        assert_eq!(rec, Recommendation::Promote);
        assert!((ratio - 0.125).abs() < 1e-9);
    }

    #[test]
    fn test_reject_on_regression() {
        let (rec, ratio) = compare_composites(0.80, 0.70, 20, 10, 0.05);
        assert_eq!(rec, Recommendation::Reject);
        assert!(ratio < 0.0);
    }

    #[test]
    fn test_extend_on_inconclusive_gain() {
        let (rec, _) = compare_composites(0.80, 0.81, 20, 10, 0.05);
        assert_eq!(rec, Recommendation::ExtendShadow);
    }

    #[test]
    fn test_extend_below_min_runs() {
        let (rec, _) = compare_composites(0.10, 0.90, 9, 10, 0.05);
        assert_eq!(rec, Recommendation::ExtendShadow);
    }

    #[test]
    fn test_zero_baseline_promotes_positive_candidate() {
        let (rec, ratio) = compare_composites(0.0, 0.5, 10, 10, 0.05);
        assert_eq!(rec, Recommendation::Promote);
        assert_eq!(ratio, 1.0);
    }
}
