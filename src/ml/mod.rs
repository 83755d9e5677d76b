pub mod artifacts;
pub mod engine;
pub mod models;
pub mod predictor;
pub mod preprocess;
pub mod scaler;

pub use artifacts::{LoadedModel, ModelMetadata};
pub use engine::{EngineStatus, MLEngine};
pub use models::{BiLstmModel, ModelExport};
pub use predictor::{PredictionResponse, SeriesPrediction};
pub use scaler::Scaler;

#[cfg(test)]
pub(crate) mod fixtures {
    use std::path::Path;

    use super::artifacts::{ArtifactPaths, LoadedModel, ModelMetadata};
    use super::models::{Activation, BidirectionalWeights, BiLstmModel, CellWeights, DenseWeights, ModelExport};
    use super::scaler::Scaler;

    fn cell(input_dim: usize, units: usize, weight: f64) -> CellWeights {
        CellWeights {
            kernel: vec![vec![weight; 4 * units]; input_dim],
            recurrent_kernel: vec![vec![weight; 4 * units]; units],
            bias: vec![0.0; 4 * units],
        }
    }

    /// All-zero BiLSTM(2) whose output is `sigmoid(bias)` for every input.
    pub fn constant_export(bias: f64) -> ModelExport {
        ModelExport {
            model_type: None,
            version: None,
            input_features: 1,
            recurrent_layers: vec![BidirectionalWeights {
                units: 2,
                return_sequences: false,
                forward: cell(1, 2, 0.0),
                backward: cell(1, 2, 0.0),
            }],
            dense_layers: vec![DenseWeights {
                kernel: vec![vec![0.0]; 4],
                bias: vec![bias],
                activation: Activation::Sigmoid,
            }],
        }
    }

    /// Two stacked bidirectional layers and a hidden dense layer.
    pub fn stacked_export() -> ModelExport {
        ModelExport {
            model_type: Some("BiLSTM Hybrid".to_string()),
            version: Some("2.0".to_string()),
            input_features: 1,
            recurrent_layers: vec![
                BidirectionalWeights {
                    units: 3,
                    return_sequences: true,
                    forward: cell(1, 3, 0.2),
                    backward: cell(1, 3, -0.1),
                },
                BidirectionalWeights {
                    units: 2,
                    return_sequences: false,
                    forward: cell(6, 2, 0.05),
                    backward: cell(6, 2, 0.15),
                },
            ],
            dense_layers: vec![
                DenseWeights {
                    kernel: vec![vec![0.3, -0.2, 0.1]; 4],
                    bias: vec![0.0, 0.1, -0.1],
                    activation: Activation::Relu,
                },
                DenseWeights {
                    kernel: vec![vec![0.5]; 3],
                    bias: vec![-0.2],
                    activation: Activation::Sigmoid,
                },
            ],
        }
    }

    pub fn identity_scaler(n: usize) -> Scaler {
        Scaler::Standard {
            mean: vec![0.0; n],
            scale: vec![1.0; n],
        }
    }

    pub fn loaded(bias: f64, columns: usize) -> LoadedModel {
        LoadedModel::from_parts(
            BiLstmModel::from_export(constant_export(bias)).unwrap(),
            identity_scaler(columns),
            ModelMetadata::default(),
            ArtifactPaths {
                model: "exoplanet_bilstm.json".into(),
                scaler: "scaler.json".into(),
                metadata: None,
            },
        )
        .unwrap()
    }

    pub fn write_artifacts(dir: &Path, export: &ModelExport, columns: usize, with_metadata: bool) {
        std::fs::write(
            dir.join("exoplanet_bilstm.json"),
            serde_json::to_string(export).unwrap(),
        )
        .unwrap();
        std::fs::write(
            dir.join("scaler.json"),
            serde_json::to_string(&identity_scaler(columns)).unwrap(),
        )
        .unwrap();
        if with_metadata {
            std::fs::write(
                dir.join("metadata.json"),
                format!(
                    r#"{{"test_accuracy": 0.9912, "model_type": "BiLSTM Hybrid", "sequence_length": {}}}"#,
                    columns
                ),
            )
            .unwrap();
        }
    }
}
