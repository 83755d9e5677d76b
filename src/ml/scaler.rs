use serde::{Deserialize, Serialize};

use crate::error::{ArtifactError, InputError};

/// Fitted preprocessing transform exported from the training pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scaler {
    Standard {
        mean: Vec<f64>,
        scale: Vec<f64>,
    },
    MinMax {
        data_min: Vec<f64>,
        data_max: Vec<f64>,
        #[serde(default = "default_feature_range")]
        feature_range: (f64, f64),
    },
}

fn default_feature_range() -> (f64, f64) {
    (0.0, 1.0)
}

impl Scaler {
    pub fn n_features(&self) -> usize {
        match self {
            Scaler::Standard { mean, .. } => mean.len(),
            Scaler::MinMax { data_min, .. } => data_min.len(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Scaler::Standard { .. } => "standard",
            Scaler::MinMax { .. } => "min_max",
        }
    }

    pub fn validate(&self) -> Result<(), ArtifactError> {
        match self {
            Scaler::Standard { mean, scale } => {
                if mean.is_empty() || mean.len() != scale.len() {
                    return Err(ArtifactError::Scaler(format!(
                        "mean has {} entries, scale has {}",
                        mean.len(),
                        scale.len()
                    )));
                }
                if let Some(i) = scale.iter().position(|s| *s == 0.0 || !s.is_finite()) {
                    return Err(ArtifactError::Scaler(format!("scale[{}] is not usable", i)));
                }
            }
            Scaler::MinMax { data_min, data_max, feature_range } => {
                if data_min.is_empty() || data_min.len() != data_max.len() {
                    return Err(ArtifactError::Scaler(format!(
                        "data_min has {} entries, data_max has {}",
                        data_min.len(),
                        data_max.len()
                    )));
                }
                if let Some(i) = data_min
                    .iter()
                    .zip(data_max)
                    .position(|(min, max)| !min.is_finite() || !max.is_finite() || max <= min)
                {
                    return Err(ArtifactError::Scaler(format!(
                        "feature {} has an empty data range",
                        i
                    )));
                }
                if feature_range.0 >= feature_range.1 {
                    return Err(ArtifactError::Scaler("feature_range is empty".to_string()));
                }
            }
        }
        Ok(())
    }

    pub fn transform_row(&self, row: &[f64]) -> Result<Vec<f64>, InputError> {
        if row.len() != self.n_features() {
            return Err(InputError::ColumnCount {
                expected: self.n_features(),
                actual: row.len(),
            });
        }

        let scaled = match self {
            Scaler::Standard { mean, scale } => row
                .iter()
                .zip(mean.iter().zip(scale))
                .map(|(x, (m, s))| (x - m) / s)
                .collect(),
            Scaler::MinMax { data_min, data_max, feature_range } => {
                let (lo, hi) = *feature_range;
                row.iter()
                    .zip(data_min.iter().zip(data_max))
                    .map(|(x, (min, max))| {
                        // a zero range divides by 1, matching sklearn
                        let range = max - min;
                        let std = if range == 0.0 { x - min } else { (x - min) / range };
                        std * (hi - lo) + lo
                    })
                    .collect()
            }
        };

        Ok(scaled)
    }
}
