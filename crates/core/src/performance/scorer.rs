/// Maps a horizon's relative return (stock minus benchmark) to a pick score.
///
/// | relative return      | score |
/// |----------------------|-------|
/// | r > 0.10             | 1.0   |
/// | 0.05 < r <= 0.10     | 0.8   |
/// | 0.00 <= r <= 0.05    | 0.6   |
/// | -0.05 <= r < 0.00    | 0.4   |
/// | r < -0.05            | 0.1   |
///
/// NaN falls through to the lowest bucket.
pub fn score(relative_return: f64) -> f64 {
    let r = relative_return;
    if r > 0.10 {
        1.0
    } else if r > 0.05 {
        0.8
    } else if r >= 0.0 {
        0.6
    } else if r >= -0.05 {
        0.4
    } else {
        0.1
    }
}

pub const SCORE_LEVELS: [f64; 5] = [0.1, 0.4, 0.6, 0.8, 1.0];

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn boundaries_are_exact() {
        assert_eq!(score(0.05), 0.6);
        assert_eq!(score(0.050001), 0.8);
        assert_eq!(score(-0.05), 0.4);
        assert_eq!(score(0.10), 0.8);
        assert_eq!(score(0.100001), 1.0);
        assert_eq!(score(0.0), 0.6);
        assert_eq!(score(-0.0), 0.6);
        assert_eq!(score(-0.000001), 0.4);
        assert_eq!(score(-0.050001), 0.1);
    }

    #[test]
    fn buckets_match_table() {
        assert_eq!(score(0.15), 1.0);
        assert_eq!(score(0.07), 0.8);
        assert_eq!(score(0.03), 0.6);
        assert_eq!(score(-0.02), 0.4);
        assert_eq!(score(-0.10), 0.1);
    }

    #[test]
    fn total_over_extremes() {
        assert_eq!(score(f64::INFINITY), 1.0);
        assert_eq!(score(f64::NEG_INFINITY), 0.1);
        assert_eq!(score(f64::NAN), 0.1);
    }

    proptest! {
        #[test]
        fn score_is_a_known_level(r in -10.0..10.0_f64) {
            prop_assert!(SCORE_LEVELS.contains(&score(r)));
        }

        #[test]
        fn score_is_non_decreasing(a in -1.0..1.0_f64, b in -1.0..1.0_f64) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(score(lo) <= score(hi));
        }
    }
}
