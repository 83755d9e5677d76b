use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::models::BiLstmModel;
use super::scaler::Scaler;
use crate::config::ModelConfig;
use crate::error::ArtifactError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelMetadata {
    #[serde(default)]
    pub test_accuracy: Option<f64>,
    #[serde(default)]
    pub sequence_length: Option<usize>,
    #[serde(default)]
    pub model_type: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactPaths {
    pub model: PathBuf,
    pub scaler: PathBuf,
    pub metadata: Option<PathBuf>,
}

/// Everything one prediction needs, loaded together so a reload swaps all
/// three at once.
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub model: BiLstmModel,
    pub scaler: Scaler,
    pub metadata: ModelMetadata,
    pub paths: ArtifactPaths,
    pub loaded_at: chrono::DateTime<chrono::Utc>,
}

impl LoadedModel {
    pub fn model_type(&self) -> &str {
        self.metadata
            .model_type
            .as_deref()
            .unwrap_or(&self.model.model_type)
    }

    /// Columns per CSV row.
    pub fn expected_columns(&self) -> usize {
        self.scaler.n_features()
    }

    pub fn timesteps(&self) -> usize {
        self.scaler.n_features() / self.model.input_features
    }

    pub fn from_parts(
        model: BiLstmModel,
        scaler: Scaler,
        metadata: ModelMetadata,
        paths: ArtifactPaths,
    ) -> Result<Self, ArtifactError> {
        scaler.validate()?;

        if scaler.n_features() % model.input_features != 0 {
            return Err(ArtifactError::Shape(format!(
                "scaler has {} features, not a multiple of {} features per timestep",
                scaler.n_features(),
                model.input_features
            )));
        }

        let loaded = Self {
            model,
            scaler,
            metadata,
            paths,
            loaded_at: chrono::Utc::now(),
        };

        if let Some(expected) = loaded.metadata.sequence_length {
            if expected != loaded.timesteps() {
                return Err(ArtifactError::Shape(format!(
                    "metadata sequence_length {} does not match scaler ({} timesteps)",
                    expected,
                    loaded.timesteps()
                )));
            }
        }

        Ok(loaded)
    }
}

/// Ordered directories searched for artifact files.
pub fn search_dirs(config: &ModelConfig) -> Vec<PathBuf> {
    let mut dirs = vec![PathBuf::from(&config.artifacts_dir)];

    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            dirs.push(parent.join("..").join("model_files"));
        }
    }
    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd.join("model_files"));
    }
    dirs.push(PathBuf::from("model_files"));
    dirs.push(PathBuf::from("."));
    dirs
}

/// First existing `dirs[i]/filename`; otherwise the path under the first
/// directory, so the error names where the file was expected.
pub fn locate(dirs: &[PathBuf], filename: &str) -> PathBuf {
    dirs.iter()
        .map(|dir| dir.join(filename))
        .find(|path| path.is_file())
        .unwrap_or_else(|| {
            dirs.first()
                .map(|dir| dir.join(filename))
                .unwrap_or_else(|| PathBuf::from(filename))
        })
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ArtifactError> {
    if !path.is_file() {
        return Err(ArtifactError::NotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ArtifactError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load(config: &ModelConfig) -> Result<LoadedModel, ArtifactError> {
    load_from_dirs(config, &search_dirs(config))
}

pub fn load_from_dirs(config: &ModelConfig, dirs: &[PathBuf]) -> Result<LoadedModel, ArtifactError> {
    let model_path = locate(dirs, &config.model_file);
    let scaler_path = locate(dirs, &config.scaler_file);
    let metadata_path = locate(dirs, &config.metadata_file);

    if !model_path.is_file() {
        return Err(ArtifactError::NotFound(model_path));
    }
    let model = BiLstmModel::load_from_file(&model_path)?;

    info!("Loading scaler from {}", scaler_path.display());
    let scaler: Scaler = read_json(&scaler_path)?;

    let (metadata, metadata_file) = match read_json::<ModelMetadata>(&metadata_path) {
        Ok(metadata) => (metadata, Some(metadata_path)),
        Err(ArtifactError::NotFound(path)) => {
            warn!("No metadata at {}, continuing without it", path.display());
            (ModelMetadata::default(), None)
        }
        Err(e) => return Err(e),
    };

    let loaded = LoadedModel::from_parts(
        model,
        scaler,
        metadata,
        ArtifactPaths {
            model: model_path,
            scaler: scaler_path,
            metadata: metadata_file,
        },
    )?;

    info!(
        "Artifacts loaded: {} ({} parameters), {} scaler over {} columns",
        loaded.model_type(),
        loaded.model.parameters(),
        loaded.scaler.kind(),
        loaded.expected_columns()
    );
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::fixtures;

    #[test]
    fn locate_prefers_earlier_directories() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(second.path().join("scaler.json"), "{}").unwrap();

        let dirs = vec![first.path().to_path_buf(), second.path().to_path_buf()];
        assert_eq!(locate(&dirs, "scaler.json"), second.path().join("scaler.json"));

        std::fs::write(first.path().join("scaler.json"), "{}").unwrap();
        assert_eq!(locate(&dirs, "scaler.json"), first.path().join("scaler.json"));
    }

    #[test]
    fn missing_file_reports_first_directory() {
        let dir = tempfile::tempdir().unwrap();
        let dirs = vec![dir.path().to_path_buf()];
        assert_eq!(locate(&dirs, "nope.json"), dir.path().join("nope.json"));
    }

    #[test]
    fn loads_written_artifacts_without_metadata() {
        let dir = tempfile::tempdir().unwrap();
        fixtures::write_artifacts(dir.path(), &fixtures::constant_export(1.0), 4, false);

        let config = ModelConfig::default();
        let loaded = load_from_dirs(&config, &[dir.path().to_path_buf()]).unwrap();
        assert_eq!(loaded.expected_columns(), 4);
        assert_eq!(loaded.timesteps(), 4);
        assert!(loaded.paths.metadata.is_none());
        assert_eq!(loaded.model_type(), "BiLSTM Neural Network");
    }

    #[test]
    fn metadata_overrides_model_type_and_checks_length() {
        let dir = tempfile::tempdir().unwrap();
        fixtures::write_artifacts(dir.path(), &fixtures::constant_export(1.0), 4, true);

        let loaded = load_from_dirs(&ModelConfig::default(), &[dir.path().to_path_buf()]).unwrap();
        assert_eq!(loaded.model_type(), "BiLSTM Hybrid");
        assert_eq!(loaded.metadata.test_accuracy, Some(0.9912));

        std::fs::write(
            dir.path().join("metadata.json"),
            r#"{"sequence_length": 9}"#,
        )
        .unwrap();
        assert!(matches!(
            load_from_dirs(&ModelConfig::default(), &[dir.path().to_path_buf()]),
            Err(ArtifactError::Shape(_))
        ));
    }

    #[test]
    fn missing_model_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_from_dirs(&ModelConfig::default(), &[dir.path().to_path_buf()]).unwrap_err();
        assert!(matches!(err, ArtifactError::NotFound(_)));
    }
}
