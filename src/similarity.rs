//! src/similarity.rs

use crate::fingerprint::Fingerprint;

/// Returned for any comparison that cannot be scored, including length mismatches.
pub const MAX_DISTANCE: f32 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricPolicy {
    /// `1 - clamp(dot, 0, 1)`; anti-correlated fingerprints score as unrelated.
    Cosine,
    /// `min(1, |a - b| / sqrt(2))`.
    Euclidean,
}

impl MetricPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "cosine" => Some(MetricPolicy::Cosine),
            "euclidean" | "l2" => Some(MetricPolicy::Euclidean),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricPolicy::Cosine => "cosine",
            MetricPolicy::Euclidean => "euclidean",
        }
    }
}

/// Distance in [0, 1] between two fingerprints; 0 means identical.
pub fn compare(metric: MetricPolicy, a: &Fingerprint, b: &Fingerprint) -> f32 {
    let (x, y) = (a.values(), b.values());
    if x.len() != y.len() {
        return MAX_DISTANCE;
    }

    let d = match metric {
        MetricPolicy::Cosine => {
            let dot = x
                .iter()
                .zip(y)
                .map(|(p, q)| p * q)
                .sum::<f32>();
            1.0 - dot.clamp(0.0, 1.0)
        }
        MetricPolicy::Euclidean => {
            let sq = x
                .iter()
                .zip(y)
                .map(|(p, q)| (p - q) * (p - q))
                .sum::<f32>();
            (sq.sqrt() / std::f32::consts::SQRT_2).min(1.0)
        }
    };

    if d.is_finite() { d.clamp(0.0, MAX_DISTANCE) } else { MAX_DISTANCE }
}

#[cfg(test)]
mod tests {
    use super::*;

    const METRICS: [MetricPolicy; 2] = [MetricPolicy::Cosine, MetricPolicy::Euclidean];

    fn fp(v: &[f32]) -> Fingerprint {
        Fingerprint::from_values(v.to_vec())
    }

    #[test]
    fn identical_fingerprints_have_zero_distance() {
        let f = fp(&[0.1, 0.7, 0.2, 0.05, 0.9]);
        for m in METRICS {
            assert!(compare(m, &f, &f) < 1e-6, "{:?}", m);
        }
    }

    #[test]
    fn comparison_is_symmetric() {
        let pairs = [
            (fp(&[1.0, 2.0, 3.0]), fp(&[3.0, 2.0, 1.0])),
            (fp(&[0.0, 1.0, 0.0]), fp(&[1.0, 0.0, 0.0])),
            (fp(&[5.0, 0.1, 0.1]), fp(&[4.0, 0.3, 0.0])),
        ];
        for m in METRICS {
            for (a, b) in &pairs {
                assert_eq!(compare(m, a, b), compare(m, b, a));
            }
        }
    }

    #[test]
    fn mismatched_lengths_return_sentinel() {
        let a = fp(&[1.0, 0.0, 0.0]);
        let b = fp(&[1.0, 0.0]);
        for m in METRICS {
            assert_eq!(compare(m, &a, &b), 1.0);
        }
    }

    #[test]
    fn orthogonal_vectors() {
        let a = fp(&[1.0, 0.0]);
        let b = fp(&[0.0, 1.0]);
        assert!((compare(MetricPolicy::Cosine, &a, &b) - 1.0).abs() < 1e-6);
        assert!((compare(MetricPolicy::Euclidean, &a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn negative_correlation_is_clamped() {
        let a = Fingerprint::from_values(vec![1.0, 0.0]);
        let b = Fingerprint::from_values(vec![-1.0, 0.0]);
        assert_eq!(compare(MetricPolicy::Cosine, &a, &b), 1.0);
        // opposite unit vectors are 2 apart; rescaled and capped at 1
        assert_eq!(compare(MetricPolicy::Euclidean, &a, &b), 1.0);
    }

    #[test]
    fn zero_vector_never_looks_like_a_match_under_cosine() {
        let zero = fp(&[0.0, 0.0, 0.0]);
        let f = fp(&[0.2, 0.3, 0.9]);
        assert_eq!(compare(MetricPolicy::Cosine, &zero, &f), 1.0);
        let e = compare(MetricPolicy::Euclidean, &zero, &f);
        assert!((e - 1.0 / std::f32::consts::SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn results_stay_in_unit_range() {
        let a = fp(&[0.3, 0.3, 0.3, 0.3]);
        let b = fp(&[0.31, 0.29, 0.3, 0.3]);
        for m in METRICS {
            let d = compare(m, &a, &b);
            assert!((0.0..=1.0).contains(&d));
            assert!(d < 0.05);
        }
    }
}
