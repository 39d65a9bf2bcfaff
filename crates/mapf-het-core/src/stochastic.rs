//! Lognormal duration model.
//!
//! Task durations are lognormal with the task's nominal mean and standard
//! deviation. A robot's completion time is a sum of lognormals, approximated
//! by a single lognormal (Fenton-Wilkinson); the makespan is the maximum
//! over robots, approximated by shifting the location parameter with the
//! expected maximum of `n` standard normals.

use crate::task::TaskDuration;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogNormal {
    pub mu: f64,
    pub sigma: f64,
}

impl LogNormal {
    /// Matches the first two moments of a distribution with `mean` and `std`.
    /// A zero std gives a degenerate distribution at `mean`.
    pub fn from_mean_std(mean: f64, std: f64) -> Self {
        if mean <= 0.0 {
            return Self {
                mu: f64::NEG_INFINITY,
                sigma: 0.0,
            };
        }
        let variance_ratio = (std * std) / (mean * mean);
        let sigma2 = (1.0 + variance_ratio).ln();
        Self {
            mu: mean.ln() - sigma2 / 2.0,
            sigma: sigma2.sqrt(),
        }
    }

    pub fn from_duration(duration: &TaskDuration) -> Self {
        Self::from_mean_std(duration.mean_sec, duration.std_sec)
    }

    pub fn mean(&self) -> f64 {
        (self.mu + self.sigma * self.sigma / 2.0).exp()
    }

    pub fn variance(&self) -> f64 {
        let s2 = self.sigma * self.sigma;
        (s2.exp() - 1.0) * (2.0 * self.mu + s2).exp()
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn cdf(&self, x: f64) -> f64 {
        if x <= 0.0 {
            return 0.0;
        }
        if self.sigma <= 0.0 {
            return if x >= self.mu.exp() { 1.0 } else { 0.0 };
        }
        normal_cdf((x.ln() - self.mu) / self.sigma)
    }

    pub fn quantile(&self, p: f64) -> f64 {
        (self.mu + self.sigma * normal_quantile(p)).exp()
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        (self.mu + self.sigma * standard_normal(rng)).exp()
    }
}

/// Single lognormal matching the mean and variance of a sum of independent
/// lognormals. Deterministic terms (`sigma == 0`) only shift the mean.
pub fn fenton_wilkinson(terms: &[LogNormal]) -> Option<LogNormal> {
    if terms.is_empty() {
        return None;
    }
    let mean: f64 = terms.iter().map(LogNormal::mean).sum();
    let variance: f64 = terms.iter().map(LogNormal::variance).sum();
    Some(LogNormal::from_mean_std(mean, variance.sqrt()))
}

/// Approximate distribution of the maximum of independent lognormals.
pub fn max_approximation(terms: &[LogNormal]) -> Option<LogNormal> {
    let widest = terms
        .iter()
        .copied()
        .max_by(|a, b| a.mean().total_cmp(&b.mean()))?;
    let n = terms.len() as f64;
    if n <= 1.0 {
        return Some(widest);
    }
    let sigma = terms.iter().map(|t| t.sigma).fold(0.0, f64::max);
    let expected_max_z = normal_quantile((n - 0.375) / (n + 0.25));
    let scale = 1.0 + 0.2 * n.ln();
    Some(LogNormal {
        mu: widest.mu + 0.5 * sigma * expected_max_z,
        sigma: sigma * scale,
    })
}

fn erf(x: f64) -> f64 {
    // Abramowitz and Stegun 7.1.26
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let inner = -1.453_152_027 + t * 1.061_405_429;
    let poly = t * (0.254_829_592 + t * (-0.284_496_736 + t * (1.421_413_741 + t * inner)));
    sign * (1.0 - poly * (-x * x).exp())
}

pub fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

/// Inverse standard normal CDF (Abramowitz and Stegun 26.2.23).
pub fn normal_quantile(p: f64) -> f64 {
    const C: [f64; 3] = [2.515_517, 0.802_853, 0.010_328];
    const D: [f64; 3] = [1.432_788, 0.189_269, 0.001_308];
    let p = p.clamp(1e-12, 1.0 - 1e-12);
    let tail = |q: f64| {
        let t = (-2.0 * q.ln()).sqrt();
        t - (C[0] + C[1] * t + C[2] * t * t) / (1.0 + D[0] * t + D[1] * t * t + D[2] * t * t * t)
    };
    if p < 0.5 {
        -tail(p)
    } else {
        tail(1.0 - p)
    }
}

/// Box-Muller draw.
fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1: f64 = rng.random::<f64>().max(f64::MIN_POSITIVE);
    let u2: f64 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn moments_round_trip() {
        let d = LogNormal::from_mean_std(120.0, 15.0);
        assert!((d.mean() - 120.0).abs() < 1e-9);
        assert!((d.std_dev() - 15.0).abs() < 1e-9);
    }

    #[test]
    fn degenerate_distribution_is_a_step() {
        let d = LogNormal::from_mean_std(30.0, 0.0);
        assert_eq!(d.cdf(29.9), 0.0);
        assert_eq!(d.cdf(30.0 + 1e-9), 1.0);
    }

    #[test]
    fn normal_helpers_are_consistent() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-7);
        assert!((normal_cdf(1.96) - 0.975).abs() < 1e-3);
        assert!((normal_quantile(0.975) - 1.96).abs() < 5e-3);
        assert!((normal_quantile(0.5)).abs() < 1e-3);
    }

    #[test]
    fn sum_and_max_grow_with_terms() {
        let a = LogNormal::from_mean_std(60.0, 10.0);
        let b = LogNormal::from_mean_std(45.0, 8.0);
        let sum = fenton_wilkinson(&[a, b]).unwrap();
        assert!((sum.mean() - 105.0).abs() < 1e-6);
        let max = max_approximation(&[a, b]).unwrap();
        assert!(max.quantile(0.5) >= a.quantile(0.5));
        assert!(fenton_wilkinson(&[]).is_none());
    }

    #[test]
    fn sampling_is_seeded() {
        let d = LogNormal::from_mean_std(20.0, 3.0);
        let mut a = StdRng::seed_from_u64(7);
        let mut b = StdRng::seed_from_u64(7);
        let xs: Vec<f64> = (0..5).map(|_| d.sample(&mut a)).collect();
        let ys: Vec<f64> = (0..5).map(|_| d.sample(&mut b)).collect();
        assert_eq!(xs, ys);
        let mean = (0..4000).map(|_| d.sample(&mut a)).sum::<f64>() / 4000.0;
        assert!((mean - 20.0).abs() < 0.5);
    }
}
