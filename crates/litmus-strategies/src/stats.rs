use std::f64::consts::{PI, SQRT_2};

pub fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Sample standard deviation; 0.0 for fewer than two values.
pub fn std_dev(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let m = mean(xs);
    let var = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;
    var.sqrt()
}

/// Pearson's r over `(x, y)` pairs. Returns 0.0 when either side has zero
/// variance, which includes the single-pair case.
pub fn pearson_correlation(pairs: &[(f64, f64)]) -> f64 {
    if pairs.len() < 2 {
        return 0.0;
    }
    let n = pairs.len() as f64;
    let mx = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let my = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in pairs {
        sxy += (x - mx) * (y - my);
        sxx += (x - mx).powi(2);
        syy += (y - my).powi(2);
    }
    let denom = (sxx * syy).sqrt();
    if denom == 0.0 || !denom.is_finite() {
        return 0.0;
    }
    (sxy / denom).clamp(-1.0, 1.0)
}

/// Weighted harmonic mean of `(value, weight)` pairs. Any non-positive
/// value with positive weight collapses the mean to 0.0.
pub fn weighted_harmonic_mean(items: &[(f64, f64)]) -> f64 {
    let mut wsum = 0.0;
    let mut acc = 0.0;
    for &(v, w) in items {
        if w <= 0.0 {
            continue;
        }
        if v <= 0.0 {
            return 0.0;
        }
        wsum += w;
        acc += w / v;
    }
    if acc == 0.0 {
        return 0.0;
    }
    wsum / acc
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Abramowitz & Stegun 7.1.26, |error| < 1.5e-7.
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let y = 1.0
        - (((((1.061_405_429 * t - 1.453_152_027) * t) + 1.421_413_741) * t - 0.284_496_736) * t
            + 0.254_829_592)
            * t
            * (-x * x).exp();
    sign * y
}

fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / SQRT_2))
}

/// Gaussian kernel density estimate with Silverman's bandwidth.
#[derive(Debug, Clone)]
pub struct GaussianKde {
    samples: Vec<f64>,
    bandwidth: f64,
}

impl GaussianKde {
    pub fn fit(samples: &[f64]) -> Option<Self> {
        let samples: Vec<f64> = samples.iter().copied().filter(|x| x.is_finite()).collect();
        if samples.is_empty() {
            return None;
        }
        let sd = std_dev(&samples);
        let bandwidth = if sd > 0.0 {
            1.06 * sd * (samples.len() as f64).powf(-0.2)
        } else {
            1.0
        };
        Some(Self { samples, bandwidth })
    }

    pub fn bandwidth(&self) -> f64 {
        self.bandwidth
    }

    pub fn density(&self, x: f64) -> f64 {
        let h = self.bandwidth;
        let norm = 1.0 / ((2.0 * PI).sqrt() * h * self.samples.len() as f64);
        norm * self
            .samples
            .iter()
            .map(|xi| (-0.5 * ((x - xi) / h).powi(2)).exp())
            .sum::<f64>()
    }

    /// Estimated P(X <= x).
    pub fn cdf(&self, x: f64) -> f64 {
        let h = self.bandwidth;
        mean(
            &self
                .samples
                .iter()
                .map(|xi| normal_cdf((x - xi) / h))
                .collect::<Vec<_>>(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pearson_guards_zero_variance() {
        assert_eq!(pearson_correlation(&[(100.0, 50.0)]), 0.0);
        assert_eq!(pearson_correlation(&[]), 0.0);
        assert_eq!(pearson_correlation(&[(1.0, 2.0), (1.0, 3.0)]), 0.0);
    }

    #[test]
    fn pearson_perfect_correlation() {
        let up = [(1.0, 2.0), (2.0, 4.0), (3.0, 6.0)];
        assert!((pearson_correlation(&up) - 1.0).abs() < 1e-12);
        let down = [(1.0, 3.0), (2.0, 2.0), (3.0, 1.0)];
        assert!((pearson_correlation(&down) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn harmonic_mean_weights() {
        assert!((weighted_harmonic_mean(&[(0.5, 1.0), (0.5, 1.0)]) - 0.5).abs() < 1e-12);
        let hm = weighted_harmonic_mean(&[(1.0, 1.0), (0.25, 1.0)]);
        assert!((hm - 0.4).abs() < 1e-12);
        assert_eq!(weighted_harmonic_mean(&[(0.0, 1.0), (1.0, 1.0)]), 0.0);
        assert_eq!(weighted_harmonic_mean(&[(0.0, 0.0), (0.8, 1.0)]), 0.8);
    }

    #[test]
    fn kde_cdf_is_monotone() {
        let kde = GaussianKde::fit(&[10.0, 12.0, 11.0, 30.0, 14.0]).unwrap();
        assert!(kde.cdf(0.0) < 0.05);
        assert!(kde.cdf(100.0) > 0.95);
        assert!(kde.cdf(11.0) < kde.cdf(20.0));
        assert!(kde.density(11.0) > kde.density(50.0));
        assert!(GaussianKde::fit(&[]).is_none());
        assert_eq!(GaussianKde::fit(&[5.0]).unwrap().bandwidth(), 1.0);
    }
}
