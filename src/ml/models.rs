use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{ArtifactError, InferenceError};

/// One light curve, as a sequence of per-timestep feature vectors.
pub type Sequence = Vec<DVector<f64>>;

pub const DEFAULT_MODEL_TYPE: &str = "BiLSTM Neural Network";

// Serialized form, Keras weight layout

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellWeights {
    pub kernel: Vec<Vec<f64>>,
    pub recurrent_kernel: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidirectionalWeights {
    pub units: usize,
    #[serde(default)]
    pub return_sequences: bool,
    pub forward: CellWeights,
    pub backward: CellWeights,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Linear,
    Relu,
    Sigmoid,
    Tanh,
    Softmax,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseWeights {
    pub kernel: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
    #[serde(default)]
    pub activation: Activation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelExport {
    #[serde(default)]
    pub model_type: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default = "default_input_features")]
    pub input_features: usize,
    pub recurrent_layers: Vec<BidirectionalWeights>,
    pub dense_layers: Vec<DenseWeights>,
}

fn default_input_features() -> usize {
    1
}

// Evaluated form

#[derive(Debug, Clone)]
struct LstmCell {
    units: usize,
    input_weights: DMatrix<f64>,
    hidden_weights: DMatrix<f64>,
    biases: DVector<f64>,
}

#[derive(Debug, Clone)]
struct BidirectionalLayer {
    forward: LstmCell,
    backward: LstmCell,
    return_sequences: bool,
}

#[derive(Debug, Clone)]
struct DenseLayer {
    weights: DMatrix<f64>,
    biases: DVector<f64>,
    activation: Activation,
}

#[derive(Debug, Clone)]
pub struct BiLstmModel {
    pub model_type: String,
    pub model_version: String,
    pub input_features: usize,
    recurrent: Vec<BidirectionalLayer>,
    dense: Vec<DenseLayer>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSummary {
    pub model_type: String,
    pub version: String,
    pub input_features: usize,
    pub layers: Vec<String>,
    pub parameters: usize,
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Keras stores kernels as `[input][output]`; we keep `output x input` so
/// that a layer is `W * x`.
fn transposed(
    name: &str,
    rows: &[Vec<f64>],
    input_dim: usize,
    output_dim: usize,
) -> Result<DMatrix<f64>, ArtifactError> {
    if rows.len() != input_dim || rows.iter().any(|row| row.len() != output_dim) {
        let found_cols = rows.first().map(|row| row.len()).unwrap_or(0);
        return Err(ArtifactError::Shape(format!(
            "{} should be {}x{}, found {}x{}",
            name,
            input_dim,
            output_dim,
            rows.len(),
            found_cols
        )));
    }
    Ok(DMatrix::from_fn(output_dim, input_dim, |r, c| rows[c][r]))
}

impl LstmCell {
    fn from_weights(
        name: &str,
        weights: &CellWeights,
        input_dim: usize,
        units: usize,
    ) -> Result<Self, ArtifactError> {
        let gates = 4 * units;
        let input_weights = transposed(&format!("{}.kernel", name), &weights.kernel, input_dim, gates)?;
        let hidden_weights = transposed(
            &format!("{}.recurrent_kernel", name),
            &weights.recurrent_kernel,
            units,
            gates,
        )?;
        if weights.bias.len() != gates {
            return Err(ArtifactError::Shape(format!(
                "{}.bias should have {} entries, found {}",
                name,
                gates,
                weights.bias.len()
            )));
        }

        Ok(Self {
            units,
            input_weights,
            hidden_weights,
            biases: DVector::from_column_slice(&weights.bias),
        })
    }

    /// Runs the cell over `inputs`; outputs stay aligned with input positions
    /// even when the cell reads them back to front.
    fn run(&self, inputs: &[DVector<f64>], reverse: bool) -> Vec<DVector<f64>> {
        let h = self.units;
        let mut hidden: DVector<f64> = DVector::zeros(h);
        let mut cell: DVector<f64> = DVector::zeros(h);
        let mut outputs: Sequence = vec![DVector::zeros(h); inputs.len()];

        let order: Box<dyn Iterator<Item = usize>> = if reverse {
            Box::new((0..inputs.len()).rev())
        } else {
            Box::new(0..inputs.len())
        };

        for t in order {
            let z = &self.input_weights * &inputs[t] + &self.hidden_weights * &hidden + &self.biases;

            // gate order i, f, c, o
            let input_gate = z.rows(0, h).map(sigmoid);
            let forget_gate = z.rows(h, h).map(sigmoid);
            let candidate = z.rows(2 * h, h).map(f64::tanh);
            let output_gate = z.rows(3 * h, h).map(sigmoid);

            cell = forget_gate.component_mul(&cell) + input_gate.component_mul(&candidate);
            hidden = output_gate.component_mul(&cell.map(f64::tanh));
            outputs[t] = hidden.clone();
        }

        outputs
    }

    fn parameters(&self) -> usize {
        self.input_weights.len() + self.hidden_weights.len() + self.biases.len()
    }
}

impl BidirectionalLayer {
    fn run(&self, inputs: &[DVector<f64>]) -> Sequence {
        let forward = self.forward.run(inputs, false);
        let backward = self.backward.run(inputs, true);

        if self.return_sequences {
            forward
                .iter()
                .zip(backward.iter())
                .map(|(f, b)| concat(f, b))
                .collect()
        } else {
            // final forward state, and the backward state after reading t = 0
            let last = inputs.len() - 1;
            vec![concat(&forward[last], &backward[0])]
        }
    }

    fn output_dim(&self) -> usize {
        self.forward.units + self.backward.units
    }
}

fn concat(a: &DVector<f64>, b: &DVector<f64>) -> DVector<f64> {
    DVector::from_iterator(a.len() + b.len(), a.iter().chain(b.iter()).copied())
}

impl DenseLayer {
    fn forward(&self, input: &DVector<f64>) -> DVector<f64> {
        let z = &self.weights * input + &self.biases;
        match self.activation {
            Activation::Linear => z,
            Activation::Relu => z.map(|v| v.max(0.0)),
            Activation::Sigmoid => z.map(sigmoid),
            Activation::Tanh => z.map(f64::tanh),
            Activation::Softmax => {
                let max = z.max();
                let exp = z.map(|v| (v - max).exp());
                let sum = exp.sum();
                exp / sum
            }
        }
    }
}

impl BiLstmModel {
    pub fn load_from_file(path: &Path) -> Result<Self, ArtifactError> {
        info!("Loading BiLSTM model from {}", path.display());

        let content = std::fs::read_to_string(path).map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let export: ModelExport =
            serde_json::from_str(&content).map_err(|source| ArtifactError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        Self::from_export(export)
    }

    pub fn from_export(export: ModelExport) -> Result<Self, ArtifactError> {
        if export.input_features == 0 {
            return Err(ArtifactError::Shape("input_features must be positive".to_string()));
        }
        if export.recurrent_layers.is_empty() {
            return Err(ArtifactError::Shape("model has no recurrent layers".to_string()));
        }
        if export.dense_layers.is_empty() {
            return Err(ArtifactError::Shape("model has no dense layers".to_string()));
        }

        let mut recurrent = Vec::with_capacity(export.recurrent_layers.len());
        let mut width = export.input_features;
        let last_recurrent = export.recurrent_layers.len() - 1;

        for (i, layer) in export.recurrent_layers.iter().enumerate() {
            if layer.units == 0 {
                return Err(ArtifactError::Shape(format!("recurrent layer {} has no units", i)));
            }
            if layer.return_sequences != (i != last_recurrent) {
                return Err(ArtifactError::Shape(format!(
                    "recurrent layer {} must {}return sequences",
                    i,
                    if i == last_recurrent { "not " } else { "" }
                )));
            }

            let bilayer = BidirectionalLayer {
                forward: LstmCell::from_weights(
                    &format!("recurrent[{}].forward", i),
                    &layer.forward,
                    width,
                    layer.units,
                )?,
                backward: LstmCell::from_weights(
                    &format!("recurrent[{}].backward", i),
                    &layer.backward,
                    width,
                    layer.units,
                )?,
                return_sequences: layer.return_sequences,
            };
            width = bilayer.output_dim();
            recurrent.push(bilayer);
        }

        let mut dense = Vec::with_capacity(export.dense_layers.len());
        for (i, layer) in export.dense_layers.iter().enumerate() {
            let units = layer.bias.len();
            let weights = transposed(&format!("dense[{}].kernel", i), &layer.kernel, width, units)?;
            dense.push(DenseLayer {
                weights,
                biases: DVector::from_column_slice(&layer.bias),
                activation: layer.activation,
            });
            width = units;
        }

        if let Some(output) = dense.last() {
            let valid = matches!(
                (width, output.activation),
                (1, Activation::Sigmoid) | (2, Activation::Softmax)
            );
            if !valid {
                return Err(ArtifactError::Shape(format!(
                    "output layer must be 1 sigmoid unit or 2 softmax units, found {} {:?}",
                    width, output.activation
                )));
            }
        }

        let model = Self {
            model_type: export
                .model_type
                .unwrap_or_else(|| DEFAULT_MODEL_TYPE.to_string()),
            model_version: export.version.unwrap_or_else(|| "v1.0.0".to_string()),
            input_features: export.input_features,
            recurrent,
            dense,
        };

        debug!("BiLSTM model ready with {} parameters", model.parameters());
        Ok(model)
    }

    /// Positive-class probability for one sequence.
    pub fn predict_proba(&self, input: &[DVector<f64>]) -> Result<f64, InferenceError> {
        if input.is_empty() {
            return Err(InferenceError::Failed("empty input sequence".to_string()));
        }
        if let Some(step) = input.iter().position(|x| x.len() != self.input_features) {
            return Err(InferenceError::Failed(format!(
                "timestep {} has {} features, model expects {}",
                step,
                input[step].len(),
                self.input_features
            )));
        }

        let mut sequence: Sequence = input.to_vec();
        for layer in &self.recurrent {
            sequence = layer.run(&sequence);
        }

        let mut activations = sequence
            .pop()
            .ok_or_else(|| InferenceError::Failed("recurrent stack produced no output".to_string()))?;
        for layer in &self.dense {
            activations = layer.forward(&activations);
        }

        let probability = match activations.len() {
            1 => activations[0],
            _ => activations[1],
        };

        if !probability.is_finite() {
            return Err(InferenceError::Failed("model produced a non-finite output".to_string()));
        }
        Ok(probability)
    }

    pub fn parameters(&self) -> usize {
        let recurrent: usize = self
            .recurrent
            .iter()
            .map(|l| l.forward.parameters() + l.backward.parameters())
            .sum();
        let dense: usize = self
            .dense
            .iter()
            .map(|l| l.weights.len() + l.biases.len())
            .sum();
        recurrent + dense
    }

    pub fn summary(&self) -> ModelSummary {
        let mut layers: Vec<String> = self
            .recurrent
            .iter()
            .map(|l| {
                format!(
                    "Bidirectional(LSTM({}), return_sequences={})",
                    l.forward.units, l.return_sequences
                )
            })
            .collect();
        layers.extend(
            self.dense
                .iter()
                .map(|l| format!("Dense({}, {:?})", l.biases.len(), l.activation)),
        );

        ModelSummary {
            model_type: self.model_type.clone(),
            version: self.model_version.clone(),
            input_features: self.input_features,
            layers,
            parameters: self.parameters(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::fixtures;

    fn sequence(values: &[f64]) -> Sequence {
        values.iter().map(|v| DVector::from_element(1, *v)).collect()
    }

    #[test]
    fn zero_network_returns_sigmoid_of_output_bias() {
        let model = BiLstmModel::from_export(fixtures::constant_export(2.0)).unwrap();
        let p = model.predict_proba(&sequence(&[0.3, -1.2, 4.0])).unwrap();
        assert!((p - sigmoid(2.0)).abs() < 1e-12);
    }

    #[test]
    fn single_step_matches_hand_computed_lstm() {
        let (a_i, a_f, a_c, a_o) = (0.5, -0.3, 0.8, 1.1);
        let cell = LstmCell::from_weights(
            "cell",
            &CellWeights {
                kernel: vec![vec![a_i, a_f, a_c, a_o]],
                recurrent_kernel: vec![vec![0.0; 4]],
                bias: vec![0.0; 4],
            },
            1,
            1,
        )
        .unwrap();

        let x = 2.0;
        let out = cell.run(&sequence(&[x]), false);
        let c = sigmoid(a_i * x) * (a_c * x).tanh();
        let expected = sigmoid(a_o * x) * c.tanh();
        assert!((out[0][0] - expected).abs() < 1e-12);

        let reversed = cell.run(&sequence(&[x]), true);
        assert_eq!(out, reversed);
    }

    #[test]
    fn backward_outputs_stay_aligned_with_inputs() {
        let cell = LstmCell::from_weights(
            "cell",
            &CellWeights {
                kernel: vec![vec![1.0, 1.0, 1.0, 1.0]],
                recurrent_kernel: vec![vec![0.5, 0.5, 0.5, 0.5]],
                bias: vec![0.0; 4],
            },
            1,
            1,
        )
        .unwrap();

        let forward = cell.run(&sequence(&[1.0, 0.0, -1.0]), false);
        let backward = cell.run(&sequence(&[-1.0, 0.0, 1.0]), true);
        // reading [-1, 0, 1] back to front sees the same stream as [1, 0, -1] forwards
        assert!((forward[0][0] - backward[2][0]).abs() < 1e-12);
        assert!((forward[2][0] - backward[0][0]).abs() < 1e-12);
    }

    #[test]
    fn stacked_model_is_deterministic_and_bounded() {
        let model = BiLstmModel::from_export(fixtures::stacked_export()).unwrap();
        let input = sequence(&[0.1, 0.9, -0.4, 0.2]);
        let a = model.predict_proba(&input).unwrap();
        let b = model.predict_proba(&input).unwrap();
        assert_eq!(a, b);
        assert!((0.0..=1.0).contains(&a));
    }

    #[test]
    fn softmax_head_reports_positive_class() {
        let mut export = fixtures::constant_export(0.0);
        export.dense_layers = vec![DenseWeights {
            kernel: vec![vec![0.0, 0.0]; 4],
            bias: vec![0.0, 1.0],
            activation: Activation::Softmax,
        }];
        let model = BiLstmModel::from_export(export).unwrap();
        let p = model.predict_proba(&sequence(&[1.0])).unwrap();
        let expected = 1.0f64.exp() / (1.0 + 1.0f64.exp());
        assert!((p - expected).abs() < 1e-12);
    }

    #[test]
    fn rejects_mismatched_kernel_shape() {
        let mut export = fixtures::constant_export(0.0);
        export.recurrent_layers[0].forward.bias.pop();
        assert!(matches!(
            BiLstmModel::from_export(export),
            Err(ArtifactError::Shape(_))
        ));
    }

    #[test]
    fn rejects_non_probability_head() {
        let mut export = fixtures::constant_export(0.0);
        export.dense_layers[0].activation = Activation::Relu;
        assert!(BiLstmModel::from_export(export).is_err());
    }

    #[test]
    fn rejects_wrong_timestep_width() {
        let model = BiLstmModel::from_export(fixtures::constant_export(0.0)).unwrap();
        let bad = vec![DVector::from_element(2, 1.0)];
        assert!(model.predict_proba(&bad).is_err());
        assert!(model.predict_proba(&[]).is_err());
    }

    #[test]
    fn summary_counts_parameters() {
        let model = BiLstmModel::from_export(fixtures::constant_export(0.0)).unwrap();
        let summary = model.summary();
        // two cells of (1*8 + 2*8 + 8) plus a 4->1 dense
        assert_eq!(summary.parameters, 2 * (8 + 16 + 8) + 5);
        assert_eq!(summary.layers.len(), 2);
        assert_eq!(summary.model_type, DEFAULT_MODEL_TYPE);
    }
}
