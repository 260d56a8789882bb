use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainError};

/// Parameters of one encrypted gradient evaluation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradientConfig {
    /// Lower end of the interval the sigmoid approximation is fitted on.
    pub cheb_range_start: f64,
    /// Upper end of that interval.
    pub cheb_range_end: f64,
    /// Degree of the Chebyshev approximation.
    pub cheb_poly_degree: usize,
    /// Have the data owner run the instrumented engine, which decrypts
    /// intermediates. Only honored in `debug-instrumentation` builds.
    pub debug: bool,
    /// Slots decrypted and logged per stage in debug runs.
    pub debug_plaintext_length: usize,
}

impl Default for GradientConfig {
    fn default() -> Self {
        Self {
            cheb_range_start: -16.0,
            cheb_range_end: 16.0,
            cheb_poly_degree: 59,
            debug: false,
            debug_plaintext_length: 32,
        }
    }
}

impl GradientConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.cheb_range_start.is_finite() && self.cheb_range_end.is_finite()) {
            return Err(TrainError::InvalidConfig(
                "Chebyshev range bounds must be finite".into(),
            ));
        }
        if self.cheb_range_start >= self.cheb_range_end {
            return Err(TrainError::InvalidConfig(format!(
                "Chebyshev range [{}, {}] is empty",
                self.cheb_range_start, self.cheb_range_end
            )));
        }
        if self.cheb_poly_degree == 0 {
            return Err(TrainError::InvalidConfig(
                "Chebyshev degree must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Parameters of a full training run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub learning_rate: f64,
    /// Initial weight value, see [`crate::matrix::initialize_log_reg`].
    pub scaling_factor: f64,
    /// Decision threshold for predictions.
    pub threshold: f64,
    pub gradient: GradientConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            learning_rate: 1.0,
            scaling_factor: 0.1,
            threshold: 0.5,
            gradient: GradientConfig::default(),
        }
    }
}

impl TrainingConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(TrainError::InvalidConfig(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(TrainError::InvalidConfig(format!(
                "threshold must be in [0, 1], got {}",
                self.threshold
            )));
        }
        self.gradient.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let g = GradientConfig::default();
        assert_eq!(g.cheb_range_start, -16.0);
        assert_eq!(g.cheb_range_end, 16.0);
        assert_eq!(g.cheb_poly_degree, 59);
        assert!(!g.debug);
        assert_eq!(g.debug_plaintext_length, 32);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config =
            TrainingConfig::from_json_str(r#"{"epochs": 3, "gradient": {"cheb_poly_degree": 31}}"#)
                .unwrap();
        assert_eq!(config.epochs, 3);
        assert_eq!(config.gradient.cheb_poly_degree, 31);
        assert_eq!(config.gradient.cheb_range_end, 16.0);
        assert_eq!(config.learning_rate, 1.0);
    }

    #[test]
    fn rejects_empty_range() {
        let err = TrainingConfig::from_json_str(
            r#"{"gradient": {"cheb_range_start": 4.0, "cheb_range_end": -4.0}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, TrainError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_zero_degree_and_bad_rate() {
        let mut g = GradientConfig::default();
        g.cheb_poly_degree = 0;
        assert!(g.validate().is_err());

        let t = TrainingConfig {
            learning_rate: 0.0,
            ..TrainingConfig::default()
        };
        assert!(t.validate().is_err());
    }
}
