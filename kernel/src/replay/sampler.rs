// Skewed historical version sampling.
//
// Index 0 is the most recent version. Draws follow an exponential
// distribution truncated to the chain length, so recent versions
// dominate and older ones are read occasionally.

use rand::Rng;
use rand_distr::{Distribution, Exp};

#[derive(Debug, Clone)]
pub struct VersionSampler {
    dist: Exp<f64>,
    len: usize,
}

impl VersionSampler {
    /// `rate` must be positive and finite, `len` non-zero.
    pub fn new(rate: f64, len: usize) -> Option<Self> {
        if !(rate.is_finite() && rate > 0.0) || len == 0 {
            return None;
        }
        let dist = Exp::new(rate).ok()?;
        Some(Self { dist, len })
    }

    /// Draw a chain index in `[0, len)`.
    ///
    /// An exponential draw folded modulo `len` is distributed as the
    /// exponential truncated to `[0, len)`, so one draw always suffices.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let folded = self.dist.sample(rng) % self.len as f64;
        (folded as usize).min(self.len - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn rejects_degenerate_parameters() {
        assert!(VersionSampler::new(0.0, 4).is_none());
        assert!(VersionSampler::new(-1.0, 4).is_none());
        assert!(VersionSampler::new(f64::NAN, 4).is_none());
        assert!(VersionSampler::new(1.0, 0).is_none());
    }

    #[test]
    fn samples_stay_in_bounds() {
        let mut rng = StdRng::seed_from_u64(1);
        for (rate, len) in [(10.0, 1), (0.01, 3), (1.0, 50)] {
            let sampler = VersionSampler::new(rate, len).unwrap();
            for _ in 0..5_000 {
                assert!(sampler.sample(&mut rng) < len);
            }
        }
    }

    #[test]
    fn tiny_rate_draws_in_constant_time() {
        let mut rng = StdRng::seed_from_u64(3);
        let single = VersionSampler::new(1e-9, 1).unwrap();
        for _ in 0..10_000 {
            assert_eq!(single.sample(&mut rng), 0);
        }

        let short = VersionSampler::new(1e-9, 4).unwrap();
        let mut seen = [false; 4];
        for _ in 0..10_000 {
            seen[short.sample(&mut rng)] = true;
        }
        assert!(seen.iter().all(|&s| s), "near-uniform over a short chain");
    }

    #[test]
    fn same_seed_same_sequence() {
        let sampler = VersionSampler::new(0.5, 20).unwrap();
        let draw = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..100).map(|_| sampler.sample(&mut rng)).collect::<Vec<_>>()
        };
        assert_eq!(draw(9), draw(9));
    }

    #[test]
    fn empirical_cdf_matches_truncated_exponential() {
        let rate = 0.5;
        let len = 10;
        let n = 200_000;
        let sampler = VersionSampler::new(rate, len).unwrap();
        let mut rng = StdRng::seed_from_u64(42);

        let mut counts = vec![0usize; len];
        for _ in 0..n {
            counts[sampler.sample(&mut rng)] += 1;
        }

        let norm = 1.0 - (-rate * len as f64).exp();
        let mut seen = 0;
        for (k, count) in counts.iter().enumerate() {
            seen += count;
            let empirical = seen as f64 / n as f64;
            let expected = (1.0 - (-rate * (k + 1) as f64).exp()) / norm;
            assert!(
                (empirical - expected).abs() < 0.01,
                "index {k}: empirical {empirical:.4} expected {expected:.4}"
            );
        }
    }
}
