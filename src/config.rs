use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub auth: AuthConfig,
    pub deployment: DeploymentConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_seconds: u64,
    pub max_body_bytes: usize,
    pub static_dir: Option<String>,
    pub enable_metrics: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ModelConfig {
    pub artifacts_dir: String,
    pub model_file: String,
    pub scaler_file: String,
    pub metadata_file: String,
    pub threshold: f64,
    pub lazy_load: bool,
    pub require_on_startup: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,
    pub api_keys_file: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    #[default]
    Auto,
    Local,
    Hosted,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeploymentConfig {
    pub mode: DeploymentMode,
    pub hosted_base_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5001,
            request_timeout_seconds: 30,
            max_body_bytes: 10 * 1024 * 1024,
            static_dir: None,
            enable_metrics: true,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: "model_files".to_string(),
            model_file: "exoplanet_bilstm.json".to_string(),
            scaler_file: "scaler.json".to_string(),
            metadata_file: "metadata.json".to_string(),
            threshold: 0.5,
            lazy_load: false,
            require_on_startup: false,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_keys_file: Some("api_keys.txt".to_string()),
        }
    }
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            mode: DeploymentMode::Auto,
            hosted_base_path: "/api".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Layers the optional TOML file, `EXOML__SECTION__KEY` variables and the
    /// platform-provided `PORT` over the built-in defaults.
    pub fn load(path: &str) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::from(Path::new(path)).required(false))
            .add_source(
                config::Environment::with_prefix("EXOML")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        let mut config: Config = builder.build()?.try_deserialize()?;

        if let Ok(port) = std::env::var("PORT") {
            config.server.port = port.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.model.threshold) {
            anyhow::bail!(
                "model.threshold must be within [0, 1], got {}",
                self.model.threshold
            );
        }
        if self.server.max_body_bytes == 0 {
            anyhow::bail!("server.max_body_bytes must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    // Config::load reads the process environment
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct EnvVars(Vec<(&'static str, Option<String>)>);

    impl EnvVars {
        fn set(vars: &[(&'static str, &str)]) -> Self {
            let saved = vars
                .iter()
                .map(|(name, value)| {
                    let previous = std::env::var(name).ok();
                    std::env::set_var(name, value);
                    (*name, previous)
                })
                .collect();
            EnvVars(saved)
        }
    }

    impl Drop for EnvVars {
        fn drop(&mut self) {
            for (name, previous) in &self.0 {
                match previous {
                    Some(value) => std::env::set_var(name, value),
                    None => std::env::remove_var(name),
                }
            }
        }
    }

    #[test]
    fn defaults_match_local_server() {
        let config = Config::default();
        assert_eq!(config.server.port, 5001);
        assert_eq!(config.model.threshold, 0.5);
        assert_eq!(config.deployment.mode, DeploymentMode::Auto);
        assert!(config.auth.enabled);
    }

    #[test]
    fn loads_partial_toml_over_defaults() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[model]\nthreshold = 0.7\nlazy_load = true\n\n[deployment]\nmode = \"hosted\"\n\n[logging]\nformat = \"compact\""
        )
        .unwrap();

        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.model.threshold, 0.7);
        assert!(config.model.lazy_load);
        assert_eq!(config.model.model_file, "exoplanet_bilstm.json");
        assert_eq!(config.deployment.mode, DeploymentMode::Hosted);
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[test]
    fn environment_overrides_file_and_port() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[server]\nport = 6000\n\n[model]\nthreshold = 0.7").unwrap();

        let _env = EnvVars::set(&[
            ("EXOML__MODEL__THRESHOLD", "0.65"),
            ("EXOML__LOGGING__LEVEL", "debug"),
            ("PORT", "8123"),
        ]);

        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.model.threshold, 0.65);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.server.port, 8123);
    }

    #[test]
    fn invalid_port_variable_is_an_error() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _env = EnvVars::set(&[("PORT", "not-a-port")]);
        assert!(Config::load("does-not-exist.toml").is_err());
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let mut config = Config::default();
        config.model.threshold = 1.5;
        assert!(config.validate().is_err());
    }
}
