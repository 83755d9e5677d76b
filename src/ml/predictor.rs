use serde::{Deserialize, Serialize};

use super::preprocess::FeatureFrame;

const DEFAULT_TRANSIT_DEPTH: f64 = 0.001;
const DEFAULT_ORBITAL_PERIOD: f64 = 5.3;

/// Two decimals, ties to even.
fn round2(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}

/// Response for the CSV prediction endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResponse {
    pub is_exoplanet: bool,
    pub confidence: f64,
    pub probability: f64,
    pub prediction: u8,
    pub orbital_period: f64,
    pub temperature: f64,
    pub transit_depth: f64,
    pub planet_type: String,
    pub model_type: String,
    pub num_samples: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanetProperties {
    pub orbital_period: f64,
    pub temperature: f64,
    pub transit_depth: f64,
    pub planet_type: &'static str,
}

pub fn classify_planet(temperature: f64, orbital_period: f64) -> &'static str {
    if temperature > 1500.0 {
        "Hot Jupiter"
    } else if temperature > 800.0 {
        "Super Earth"
    } else if orbital_period < 10.0 {
        "Close-in Planet"
    } else {
        "Neptune-like"
    }
}

/// Descriptive estimates taken from named columns when the upload has them,
/// otherwise from fixed heuristics. `confidence` is a percentage.
pub fn estimate_properties(frame: &FeatureFrame, confidence: f64) -> PlanetProperties {
    let orbital_period = frame
        .first("orbital_period")
        .or_else(|| frame.first_cell().map(|v| v.abs() * 10.0))
        .unwrap_or(DEFAULT_ORBITAL_PERIOD);
    let temperature = frame
        .first("temperature")
        .unwrap_or(1200.0 + confidence * 10.0);
    let transit_depth = frame.first("transit_depth").unwrap_or(DEFAULT_TRANSIT_DEPTH);

    PlanetProperties {
        orbital_period,
        temperature,
        transit_depth,
        planet_type: classify_planet(temperature, orbital_period),
    }
}

/// Mean probability over all rows, thresholded (strictly) for the class.
pub fn summarize(
    probabilities: &[f64],
    frame: &FeatureFrame,
    threshold: f64,
    model_type: &str,
) -> PredictionResponse {
    let probability = if probabilities.is_empty() {
        0.0
    } else {
        probabilities.iter().sum::<f64>() / probabilities.len() as f64
    };
    let confidence = probability * 100.0;
    let is_exoplanet = probability > threshold;
    let properties = estimate_properties(frame, confidence);

    PredictionResponse {
        is_exoplanet,
        confidence: round2(confidence),
        probability,
        prediction: u8::from(is_exoplanet),
        orbital_period: round2(properties.orbital_period),
        temperature: round2(properties.temperature),
        transit_depth: properties.transit_depth,
        planet_type: properties.planet_type.to_string(),
        model_type: model_type.to_string(),
        num_samples: probabilities.len(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassProbabilities {
    pub no_planet: f64,
    pub planet: f64,
}

/// Response for the flux-array endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPrediction {
    pub prediction: u8,
    pub label: String,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probabilities: Option<ClassProbabilities>,
}

pub fn label_for(prediction: u8) -> &'static str {
    if prediction == 1 {
        "Exoplanet Detected"
    } else {
        "No Exoplanet"
    }
}

/// `confidence` is the probability of whichever class was predicted.
pub fn series_prediction(probability: f64, threshold: f64, with_probabilities: bool) -> SeriesPrediction {
    let prediction = u8::from(probability > threshold);
    let confidence = if prediction == 1 {
        probability
    } else {
        1.0 - probability
    };

    SeriesPrediction {
        prediction,
        label: label_for(prediction).to_string(),
        confidence,
        probabilities: with_probabilities.then(|| ClassProbabilities {
            no_planet: 1.0 - probability,
            planet: probability,
        }),
    }
}
