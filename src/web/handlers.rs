use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use super::auth::RequireApiKey;
use super::error::ApiError;
use super::server::AppState;
use crate::error::AuthError;
use crate::ml::{PredictionResponse, SeriesPrediction};

#[derive(Debug, Deserialize)]
pub struct PredictionRequest {
    #[serde(default)]
    pub data: Option<String>,
}

/// A flux array, either flat or as a `(timesteps, features)` matrix.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum FluxData {
    Flat(Vec<f64>),
    Matrix(Vec<Vec<f64>>),
}

impl FluxData {
    /// Timestep-major values; a single-row matrix is just that row.
    pub fn into_values(self) -> Result<Vec<f64>, ApiError> {
        match self {
            FluxData::Flat(values) => Ok(values),
            FluxData::Matrix(rows) => {
                let width = rows.first().map(Vec::len).unwrap_or(0);
                if rows.iter().any(|row| row.len() != width) {
                    return Err(ApiError::bad_request("All rows of data must have the same length"));
                }
                Ok(rows.into_iter().flatten().collect())
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SeriesRequest {
    #[serde(default)]
    pub data: Option<FluxData>,
    #[serde(default)]
    pub return_probabilities: bool,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    #[serde(default)]
    pub data: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    pub return_probabilities: bool,
}

#[derive(Debug, Serialize)]
pub struct SeriesResponse {
    #[serde(flatten)]
    pub prediction: SeriesPrediction,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct BatchItem {
    pub index: usize,
    #[serde(flatten)]
    pub prediction: Option<SeriesPrediction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub total: usize,
    pub results: Vec<BatchItem>,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_loaded: bool,
    pub scaler_loaded: bool,
    pub model_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Deserialize)]
pub struct GenerateKeyRequest {
    #[serde(default)]
    pub master_key: Option<String>,
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub async fn predict_csv(
    State(state): State<AppState>,
    body: Result<Json<PredictionRequest>, JsonRejection>,
) -> Result<Json<PredictionResponse>, ApiError> {
    let Json(request) = body?;
    let csv = match request.data {
        Some(data) if !data.trim().is_empty() => data,
        _ => return Err(ApiError::bad_request("No data provided")),
    };

    let response = state.engine.predict_csv(csv).await?;
    info!(
        "Prediction made: isExoplanet={} confidence={} samples={}",
        response.is_exoplanet, response.confidence, response.num_samples
    );
    Ok(Json(response))
}

pub async fn predict_series(
    State(state): State<AppState>,
    _key: RequireApiKey,
    body: Result<Json<SeriesRequest>, JsonRejection>,
) -> Result<Json<SeriesResponse>, ApiError> {
    let Json(request) = body?;
    let data = request
        .data
        .ok_or_else(|| ApiError::bad_request("Missing required field: data"))?
        .into_values()?;
    if data.is_empty() {
        return Err(ApiError::bad_request("Data cannot be empty"));
    }

    let prediction = state
        .engine
        .predict_series(data, request.return_probabilities)
        .await?;
    Ok(Json(SeriesResponse {
        prediction,
        timestamp: now(),
    }))
}

pub async fn predict_batch(
    State(state): State<AppState>,
    _key: RequireApiKey,
    body: Result<Json<BatchRequest>, JsonRejection>,
) -> Result<Json<BatchResponse>, ApiError> {
    let Json(request) = body?;
    let samples = request
        .data
        .ok_or_else(|| ApiError::bad_request("Missing required field: data"))?;

    let total = samples.len();
    let outcomes = state
        .engine
        .predict_batch(samples, request.return_probabilities)
        .await?;

    let results = outcomes
        .into_iter()
        .enumerate()
        .map(|(index, outcome)| match outcome {
            Ok(prediction) => BatchItem {
                index,
                prediction: Some(prediction),
                error: None,
            },
            Err(e) => BatchItem {
                index,
                prediction: None,
                error: Some(e.to_string()),
            },
        })
        .collect();

    Ok(Json(BatchResponse {
        total,
        results,
        timestamp: now(),
    }))
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    if state.engine.config().lazy_load {
        // hosted cold start: the health probe is allowed to trigger the load
        if let Err(e) = state.engine.ensure_loaded().await {
            warn!("Health check could not load model: {}", e);
        }
    }

    let status = state.engine.status();
    let code = if status.model_loaded {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = HealthResponse {
        status: if status.model_loaded { "healthy" } else { "unhealthy" },
        model_loaded: status.model_loaded,
        scaler_loaded: status.scaler_loaded,
        model_type: status.model_type,
        error: status.last_error,
        timestamp: now(),
    };
    (code, Json(body))
}

pub async fn service_info(State(state): State<AppState>) -> impl IntoResponse {
    let loaded = state.engine.current();
    let accuracy = loaded
        .as_ref()
        .and_then(|l| l.metadata.test_accuracy)
        .map(|a| format!("{:.2}%", a * 100.0))
        .unwrap_or_else(|| "unknown".to_string());
    let model = loaded
        .as_ref()
        .map(|l| l.model_type().to_string())
        .unwrap_or_else(|| state.engine.status().model_type);
    let version = loaded
        .as_ref()
        .map(|l| l.model.model_version.clone());
    let authentication = if state.auth_enabled {
        "Required for flux-array endpoints (X-API-Key header)"
    } else {
        "Disabled"
    };

    Json(json!({
        "service": "Exoplanet Detection API",
        "model": model,
        "modelVersion": version,
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.client_config.environment,
        "authentication": authentication,
        "accuracy": accuracy,
        "expectedColumns": loaded.as_ref().map(|l| l.expected_columns()),
        "endpoints": {
            "GET /": "API information",
            "POST /": "Predict from CSV text (also POST /api/predict)",
            "GET /health": "Health check (also GET /api/health)",
            "GET /api/config": "Frontend environment configuration",
            "POST /predict": "Predict from a flux array (API key)",
            "POST /predict_batch": "Batch flux-array predictions (API key)",
            "POST /generate_key": "Generate a new API key (master key)",
            "POST /admin/reload": "Reload model artifacts (API key)",
        },
    }))
}

pub async fn client_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.client_config.as_ref().clone())
}

pub async fn generate_key(
    State(state): State<AppState>,
    body: Result<Json<GenerateKeyRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let master = body.ok().and_then(|Json(request)| request.master_key);
    match master {
        Some(key) if state.keys.contains(key.trim()) => {}
        _ => return Err(AuthError::InvalidMaster.into()),
    }

    let api_key = state.keys.generate()?;
    info!("Generated a new API key ({} active)", state.keys.len());

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "New API key generated",
            "api_key": api_key,
            "created_at": now(),
        })),
    ))
}

pub async fn reload_model(
    State(state): State<AppState>,
    _key: RequireApiKey,
) -> Result<impl IntoResponse, ApiError> {
    let loaded = state.engine.reload().await?;

    Ok(Json(json!({
        "status": "reloaded",
        "modelType": loaded.model_type(),
        "parameters": loaded.model.parameters(),
        "expectedColumns": loaded.expected_columns(),
        "loadedAt": loaded.loaded_at.to_rfc3339(),
    })))
}

pub async fn render_metrics(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let handle = state
        .metrics
        .as_ref()
        .ok_or_else(|| ApiError::not_found("Metrics exporter is disabled"))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    ))
}

pub async fn not_found() -> ApiError {
    ApiError::not_found("Endpoint not found")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> FluxData {
        serde_json::from_str::<SeriesRequest>(body).unwrap().data.unwrap()
    }

    #[test]
    fn flat_and_single_row_payloads_agree() {
        let flat = parse(r#"{"data": [1.0, 2.0, 3.0]}"#).into_values().unwrap();
        let row = parse(r#"{"data": [[1.0, 2.0, 3.0]]}"#).into_values().unwrap();
        assert_eq!(flat, row);
    }

    #[test]
    fn matrix_payload_flattens_by_timestep() {
        let values = parse(r#"{"data": [[1.0, 2.0], [3.0, 4.0]]}"#).into_values().unwrap();
        assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn ragged_matrix_is_rejected() {
        let err = parse(r#"{"data": [[1.0, 2.0], [3.0]]}"#).into_values().unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }
}
