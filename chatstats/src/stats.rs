//! Descriptive statistics over grouped aggregation counts.
//!
//! Standard deviation is the population form (divide by n, matching MongoDB's
//! `$stdDevPop`), so a single-element group yields 0 rather than an undefined value.

/// Arithmetic mean. `None` for empty input.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation. `None` for empty input.
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let mean = mean(values)?;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

/// Mean and population standard deviation of a set of grouped counts.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Distribution {
    pub mean: f64,
    pub std_dev: f64,
}

impl Distribution {
    /// `None` for an empty group set.
    pub fn from_counts(counts: &[i64]) -> Option<Self> {
        let values: Vec<f64> = counts.iter().map(|&c| c as f64).collect();
        Some(Self {
            mean: mean(&values)?,
            std_dev: std_dev(&values)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_reference_values() {
        assert_eq!(mean(&[1.0, 2.0, 3.0, 4.0]), Some(2.5));
        assert_eq!(mean(&[7.0]), Some(7.0));
        assert_eq!(mean(&[]), None);
    }

    #[test]
    fn test_population_std_dev_reference_values() {
        // Population variance of [1,2,3,4] is 1.25
        let sd = std_dev(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert!((sd - 1.25_f64.sqrt()).abs() < 1e-12, "got {sd}");

        // Constant series has zero spread
        assert_eq!(std_dev(&[5.0, 5.0, 5.0]), Some(0.0));

        // Single element is well defined under the population form
        assert_eq!(std_dev(&[42.0]), Some(0.0));

        assert_eq!(std_dev(&[]), None);
    }

    #[test]
    fn test_distribution_from_counts() {
        let dist = Distribution::from_counts(&[1, 2, 3, 4]).unwrap();
        assert_eq!(dist.mean, 2.5);
        assert!((dist.std_dev - 1.25_f64.sqrt()).abs() < 1e-12);

        assert_eq!(Distribution::from_counts(&[]), None);
    }
}
