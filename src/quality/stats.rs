//! Window statistics feeding the quality rules.

/// Inclusive BPM band where unworn straps of this class tend to idle
pub const NOISE_BAND: (f64, f64) = (140.0, 170.0);

/// Inclusive BPM range treated as physiologically plausible
pub const PHYSIOLOGICAL_RANGE: (f64, f64) = (30.0, 220.0);

/// Sample entropy reported when no templates match (maximal disorder)
pub const MAX_SAMPLE_ENTROPY: f64 = 2.0;

/// Template length for sample entropy
pub const ENTROPY_ORDER: usize = 2;

const MIN_ENTROPY_TOLERANCE: f64 = 5.0;
const ENTROPY_TOLERANCE_FACTOR: f64 = 0.2;

/// Summary of the classifier window used by every stage's rules
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub entropy: f64,
    pub noise_band_density: f64,
    pub outside_physiological: f64,
    pub trend: f64,
}

impl WindowStats {
    pub fn compute(values: &[f64]) -> Self {
        Self {
            count: values.len(),
            mean: mean(values),
            std_dev: std_dev(values),
            entropy: sample_entropy(values, ENTROPY_ORDER),
            noise_band_density: noise_band_density(values),
            outside_physiological: outside_physiological_fraction(values),
            trend: trend(values),
        }
    }

    /// Every sample lies inside the physiological range
    pub fn all_physiological(&self) -> bool {
        self.outside_physiological == 0.0
    }

    /// Entropy scaled into [0, 1]
    pub fn normalized_entropy(&self) -> f64 {
        (self.entropy / MAX_SAMPLE_ENTROPY).clamp(0.0, 1.0)
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean(values);
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

pub fn noise_band_density(values: &[f64]) -> f64 {
    fraction(values, |v| (NOISE_BAND.0..=NOISE_BAND.1).contains(&v))
}

pub fn outside_physiological_fraction(values: &[f64]) -> f64 {
    fraction(values, |v| !(PHYSIOLOGICAL_RANGE.0..=PHYSIOLOGICAL_RANGE.1).contains(&v))
}

fn fraction(values: &[f64], predicate: impl Fn(f64) -> bool) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().filter(|&&v| predicate(v)).count() as f64 / values.len() as f64
}

/// Slope of the least-squares line through (index, value)
pub fn trend(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = mean(values);

    let (numerator, denominator) = values.iter().enumerate().fold((0.0, 0.0), |(num, den), (i, y)| {
        let dx = i as f64 - x_mean;
        (num + dx * (y - y_mean), den + dx * dx)
    });

    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Sample entropy of order `m` with tolerance `max(0.2 * stdev, 5)`
///
/// Templates of length `m` are compared pairwise (Chebyshev distance);
/// among matching pairs, those that still match when extended to `m + 1`
/// are counted. The result is `-ln(A / B)`. With no matches at either
/// length the window is treated as maximally disordered.
pub fn sample_entropy(values: &[f64], m: usize) -> f64 {
    let n = values.len();
    if n <= m + 1 {
        return MAX_SAMPLE_ENTROPY;
    }

    let tolerance = (ENTROPY_TOLERANCE_FACTOR * std_dev(values)).max(MIN_ENTROPY_TOLERANCE);
    let templates = n - m;

    let mut matches_m = 0u64;
    let mut matches_m1 = 0u64;

    for i in 0..templates {
        for j in (i + 1)..templates {
            let within = (0..m).all(|k| (values[i + k] - values[j + k]).abs() <= tolerance);
            if !within {
                continue;
            }
            matches_m += 1;
            if (values[i + m] - values[j + m]).abs() <= tolerance {
                matches_m1 += 1;
            }
        }
    }

    if matches_m == 0 || matches_m1 == 0 {
        return MAX_SAMPLE_ENTROPY;
    }

    // -ln(1) is negative zero; adding 0.0 makes it positive
    -(matches_m1 as f64 / matches_m as f64).ln() + 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_mean_and_std_dev() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!(approx(mean(&values), 5.0));
        assert!(approx(std_dev(&values), 2.0));
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(std_dev(&[42.0]), 0.0);
    }

    #[test]
    fn test_noise_band_is_inclusive() {
        let values = [139.0, 140.0, 155.0, 170.0, 171.0];
        assert!(approx(noise_band_density(&values), 0.6));
    }

    #[test]
    fn test_outside_physiological() {
        let values = [29.0, 30.0, 120.0, 220.0, 221.0];
        assert!(approx(outside_physiological_fraction(&values), 0.4));
    }

    #[test]
    fn test_trend() {
        let rising: Vec<f64> = (0..10).map(|i| 60.0 + 2.0 * i as f64).collect();
        assert!(approx(trend(&rising), 2.0));
        assert!(approx(trend(&[150.0; 10]), 0.0));
        assert_eq!(trend(&[80.0]), 0.0);
    }

    #[test]
    fn test_constant_signal_has_zero_entropy() {
        assert!(approx(sample_entropy(&[150.0; 30], 2), 0.0));
        assert!(sample_entropy(&[150.0; 30], 2).is_sign_positive());
        assert_eq!(format!("{:.2}", sample_entropy(&[150.0; 30], 2)), "0.00");
    }

    #[test]
    fn test_disordered_signal_has_high_entropy() {
        let values = [
            57.0, 192.0, 101.0, 150.0, 73.0, 129.0, 81.0, 185.0, 97.0, 164.0, 89.0, 143.0, 61.0,
            178.0, 65.0, 115.0, 93.0, 206.0, 77.0, 171.0, 49.0, 199.0, 45.0, 136.0, 105.0, 122.0,
            69.0, 213.0, 53.0, 157.0,
        ];
        assert!(sample_entropy(&values, 2) > 1.5);
    }

    #[test]
    fn test_short_window_is_maximal_disorder() {
        assert_eq!(sample_entropy(&[70.0, 71.0, 72.0], 2), MAX_SAMPLE_ENTROPY);
    }
}
