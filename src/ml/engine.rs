use arc_swap::ArcSwapOption;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use super::artifacts::{self, LoadedModel};
use super::models::DEFAULT_MODEL_TYPE;
use super::predictor::{self, PredictionResponse, SeriesPrediction};
use super::preprocess;
use crate::config::ModelConfig;
use crate::error::{ArtifactError, InferenceError};

#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub model_loaded: bool,
    pub scaler_loaded: bool,
    pub model_type: String,
    pub last_error: Option<String>,
    pub loaded_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Holds the loaded artifacts. Requests take a snapshot `Arc`, so a reload
/// never disturbs a prediction that is already running.
pub struct MLEngine {
    config: ModelConfig,
    search_dirs: Vec<PathBuf>,
    loaded: ArcSwapOption<LoadedModel>,
    last_error: ArcSwapOption<String>,
    load_lock: Mutex<()>,
}

impl MLEngine {
    pub fn new(config: &ModelConfig) -> Self {
        Self::with_search_dirs(config, artifacts::search_dirs(config))
    }

    pub fn with_search_dirs(config: &ModelConfig, search_dirs: Vec<PathBuf>) -> Self {
        Self {
            config: config.clone(),
            search_dirs,
            loaded: ArcSwapOption::empty(),
            last_error: ArcSwapOption::empty(),
            load_lock: Mutex::new(()),
        }
    }

    pub fn from_loaded(config: &ModelConfig, loaded: LoadedModel) -> Self {
        let engine = Self::with_search_dirs(config, Vec::new());
        engine.loaded.store(Some(Arc::new(loaded)));
        engine
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Startup hook: loads eagerly unless lazy loading is configured.
    /// A failure is remembered for the health endpoint.
    pub async fn initialize(&self) -> Result<(), ArtifactError> {
        if self.config.lazy_load {
            info!("Lazy loading enabled, artifacts load on first request");
            return Ok(());
        }
        self.reload().await.map(|_| ())
    }

    pub fn current(&self) -> Option<Arc<LoadedModel>> {
        self.loaded.load_full()
    }

    /// Reads artifacts from disk and swaps them in atomically.
    pub async fn reload(&self) -> Result<Arc<LoadedModel>, ArtifactError> {
        let _guard = self.load_lock.lock().await;
        self.load_locked().await
    }

    async fn load_locked(&self) -> Result<Arc<LoadedModel>, ArtifactError> {
        let config = self.config.clone();
        let dirs = self.search_dirs.clone();
        let started = Instant::now();

        let result = tokio::task::spawn_blocking(move || artifacts::load_from_dirs(&config, &dirs))
            .await
            .map_err(ArtifactError::from)
            .and_then(|loaded| loaded);

        match result {
            Ok(loaded) => {
                let loaded = Arc::new(loaded);
                self.loaded.store(Some(loaded.clone()));
                self.last_error.store(None);
                info!(
                    "Model {} ready in {:?}",
                    loaded.model_type(),
                    started.elapsed()
                );
                Ok(loaded)
            }
            Err(e) => {
                error!("Failed to load model artifacts: {}", e);
                self.last_error.store(Some(Arc::new(e.to_string())));
                Err(e)
            }
        }
    }

    /// Current model, loading it first in lazy mode (cold start).
    pub async fn ensure_loaded(&self) -> Result<Arc<LoadedModel>, InferenceError> {
        if let Some(loaded) = self.current() {
            return Ok(loaded);
        }
        if !self.config.lazy_load {
            return Err(InferenceError::ModelUnavailable);
        }

        let _guard = self.load_lock.lock().await;
        // another request may have finished the cold start while we waited
        if let Some(loaded) = self.current() {
            return Ok(loaded);
        }
        debug!("Cold start: loading artifacts");
        self.load_locked().await.map_err(|e| {
            debug!("Cold start failed: {}", e);
            InferenceError::ModelUnavailable
        })
    }

    pub fn status(&self) -> EngineStatus {
        let loaded = self.current();
        EngineStatus {
            model_loaded: loaded.is_some(),
            scaler_loaded: loaded.is_some(),
            model_type: loaded
                .as_ref()
                .map(|l| l.model_type().to_string())
                .unwrap_or_else(|| DEFAULT_MODEL_TYPE.to_string()),
            last_error: self.last_error.load_full().map(|e| e.as_ref().clone()),
            loaded_at: loaded.map(|l| l.loaded_at),
        }
    }

    async fn run_blocking<T, F>(&self, endpoint: &'static str, job: F) -> Result<T, InferenceError>
    where
        T: Send + 'static,
        F: FnOnce(Arc<LoadedModel>) -> Result<T, InferenceError> + Send + 'static,
    {
        let loaded = self.ensure_loaded().await?;
        let started = Instant::now();

        let result = tokio::task::spawn_blocking(move || job(loaded))
            .await
            .map_err(|e| InferenceError::Failed(format!("inference task failed: {}", e)))?;

        metrics::histogram!("exoml_inference_seconds", "endpoint" => endpoint)
            .record(started.elapsed().as_secs_f64());
        match &result {
            Ok(_) => metrics::counter!("exoml_predictions_total", "endpoint" => endpoint).increment(1),
            Err(_) => {
                metrics::counter!("exoml_prediction_errors_total", "endpoint" => endpoint).increment(1)
            }
        }
        result
    }

    pub async fn predict_csv(&self, csv: String) -> Result<PredictionResponse, InferenceError> {
        let threshold = self.config.threshold;
        self.run_blocking("csv", move |loaded| {
            let batch = preprocess::prepare_csv(&csv, &loaded.scaler, loaded.model.input_features)?;
            let probabilities = batch
                .sequences
                .iter()
                .map(|sequence| loaded.model.predict_proba(sequence))
                .collect::<Result<Vec<_>, _>>()?;

            let response =
                predictor::summarize(&probabilities, &batch.raw, threshold, loaded.model_type());
            debug!(
                "CSV prediction over {} samples: p={:.4}",
                response.num_samples, response.probability
            );
            Ok(response)
        })
        .await
    }

    pub async fn predict_series(
        &self,
        values: Vec<f64>,
        with_probabilities: bool,
    ) -> Result<SeriesPrediction, InferenceError> {
        let threshold = self.config.threshold;
        self.run_blocking("series", move |loaded| {
            let sequence =
                preprocess::prepare_series(&values, &loaded.scaler, loaded.model.input_features)?;
            let probability = loaded.model.predict_proba(&sequence)?;
            Ok(predictor::series_prediction(probability, threshold, with_probabilities))
        })
        .await
    }

    /// Per-sample results; one bad sample does not fail the batch.
    pub async fn predict_batch(
        &self,
        samples: Vec<Vec<f64>>,
        with_probabilities: bool,
    ) -> Result<Vec<Result<SeriesPrediction, InferenceError>>, InferenceError> {
        let threshold = self.config.threshold;
        self.run_blocking("batch", move |loaded| {
            let results = samples
                .iter()
                .map(|values| -> Result<SeriesPrediction, InferenceError> {
                    let sequence = preprocess::prepare_series(
                        values,
                        &loaded.scaler,
                        loaded.model.input_features,
                    )?;
                    let probability = loaded.model.predict_proba(&sequence)?;
                    Ok(predictor::series_prediction(probability, threshold, with_probabilities))
                })
                .collect();
            Ok(results)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InputError;
    use crate::ml::fixtures;

    fn engine_with(bias: f64) -> MLEngine {
        MLEngine::from_loaded(&ModelConfig::default(), fixtures::loaded(bias, 3))
    }

    #[tokio::test]
    async fn csv_prediction_uses_mean_probability() {
        let engine = engine_with(2.0);
        let response = engine
            .predict_csv("FLUX.1,FLUX.2,FLUX.3\n1,2,3\n4,5,6\n".to_string())
            .await
            .unwrap();
        assert!(response.is_exoplanet);
        assert_eq!(response.num_samples, 2);
        assert_eq!(response.confidence, ((response.probability * 100.0) * 100.0).round_ties_even() / 100.0);
    }

    #[tokio::test]
    async fn csv_input_errors_surface_as_input_errors() {
        let engine = engine_with(0.0);
        let err = engine.predict_csv("a,b\n1,2\n".to_string()).await.unwrap_err();
        assert!(matches!(
            err,
            InferenceError::Input(InputError::ColumnCount { expected: 3, actual: 2 })
        ));
    }

    #[tokio::test]
    async fn batch_keeps_per_sample_errors() {
        let engine = engine_with(-2.0);
        let results = engine
            .predict_batch(vec![vec![0.1, 0.2, 0.3], vec![1.0]], true)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        let first = results[0].as_ref().unwrap();
        assert_eq!(first.prediction, 0);
        assert!(first.probabilities.is_some());
        assert!(results[1].is_err());
    }

    #[tokio::test]
    async fn eager_engine_without_artifacts_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MLEngine::with_search_dirs(&ModelConfig::default(), vec![dir.path().to_path_buf()]);
        assert!(engine.initialize().await.is_err());

        let status = engine.status();
        assert!(!status.model_loaded);
        assert!(status.last_error.is_some());
        assert!(matches!(
            engine.predict_series(vec![1.0], false).await,
            Err(InferenceError::ModelUnavailable)
        ));
    }

    #[tokio::test]
    async fn lazy_engine_loads_on_first_request() {
        let dir = tempfile::tempdir().unwrap();
        fixtures::write_artifacts(dir.path(), &fixtures::constant_export(1.0), 2, false);

        let config = ModelConfig {
            lazy_load: true,
            ..ModelConfig::default()
        };
        let engine = MLEngine::with_search_dirs(&config, vec![dir.path().to_path_buf()]);
        engine.initialize().await.unwrap();
        assert!(!engine.status().model_loaded);

        let prediction = engine.predict_series(vec![0.5, 0.5], false).await.unwrap();
        assert_eq!(prediction.prediction, 1);
        assert!(engine.status().model_loaded);
    }

    #[tokio::test]
    async fn reload_swaps_in_new_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        fixtures::write_artifacts(dir.path(), &fixtures::constant_export(-3.0), 2, false);
        let engine = MLEngine::with_search_dirs(&ModelConfig::default(), vec![dir.path().to_path_buf()]);
        engine.initialize().await.unwrap();
        let before = engine.predict_series(vec![0.0, 0.0], false).await.unwrap();
        assert_eq!(before.prediction, 0);

        fixtures::write_artifacts(dir.path(), &fixtures::constant_export(3.0), 2, false);
        engine.reload().await.unwrap();
        let after = engine.predict_series(vec![0.0, 0.0], false).await.unwrap();
        assert_eq!(after.prediction, 1);
    }
}
