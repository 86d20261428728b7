//! Score normalisation functions.

/// Citation count at which the citation component saturates at 1.0.
pub const DEFAULT_CITATION_SATURATION: u64 = 10_000;

/// Min-max normalisation within a given range [min_val, max_val].
pub fn minmax_normalise(value: f64, min_val: f64, max_val: f64) -> f64 {
    if (max_val - min_val).abs() < 1e-10 {
        return 0.5; // degenerate case
    }
    ((value - min_val) / (max_val - min_val)).clamp(0.0, 1.0)
}

/// Log-scaled citation component: ln(1 + c) / ln(1 + saturation), in [0, 1].
/// A saturation of 0 counts every cited paper as 1.0.
pub fn citation_norm(citations: u64, saturation: u64) -> f64 {
    let max = (saturation as f64).ln_1p();
    if max <= 0.0 {
        return if citations > 0 { 1.0 } else { 0.0 };
    }
    minmax_normalise((citations as f64).ln_1p(), 0.0, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_citation_norm_bounds() {
        assert_eq!(citation_norm(0, 10_000), 0.0);
        assert!((citation_norm(10_000, 10_000) - 1.0).abs() < 1e-12);
        assert_eq!(citation_norm(1_000_000, 10_000), 1.0);
        let mid = citation_norm(100, 10_000);
        // ln(101)/ln(10001) ≈ 0.501
        assert!((mid - 0.501).abs() < 1e-3, "got {mid}");
    }

    #[test]
    fn test_citation_norm_is_monotonic() {
        let mut prev = -1.0;
        for c in [0, 1, 5, 50, 500, 5_000, 50_000] {
            let n = citation_norm(c, 10_000);
            assert!(n >= prev);
            prev = n;
        }
    }

    #[test]
    fn test_zero_saturation() {
        assert_eq!(citation_norm(0, 0), 0.0);
        assert_eq!(citation_norm(3, 0), 1.0);
    }

    #[test]
    fn test_minmax_degenerate() {
        assert_eq!(minmax_normalise(5.0, 1.0, 1.0), 0.5);
    }
}
