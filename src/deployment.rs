use serde::Serialize;

use crate::config::{DeploymentConfig, DeploymentMode, ServerConfig};

/// Where the service believes it is running. Decides which base URL is
/// advertised to the frontend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Local,
    Hosted,
}

const HOSTED_MARKERS: &[&str] = &["VERCEL", "EXOML_HOSTED"];

impl Environment {
    pub fn detect(mode: DeploymentMode) -> Self {
        Self::detect_with(mode, |name| std::env::var_os(name).is_some())
    }

    pub fn detect_with(mode: DeploymentMode, is_set: impl Fn(&str) -> bool) -> Self {
        match mode {
            DeploymentMode::Local => Environment::Local,
            DeploymentMode::Hosted => Environment::Hosted,
            DeploymentMode::Auto => {
                if HOSTED_MARKERS.iter().any(|name| is_set(name)) {
                    Environment::Hosted
                } else {
                    Environment::Local
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    pub environment: Environment,
    pub api_base_url: String,
    pub predict_url: String,
    pub health_url: String,
}

impl ClientConfig {
    pub fn new(environment: Environment, server: &ServerConfig, deployment: &DeploymentConfig) -> Self {
        match environment {
            Environment::Local => {
                let host = match server.host.as_str() {
                    "0.0.0.0" | "::" => "127.0.0.1",
                    other => other,
                };
                let base = format!("http://{}:{}", host, server.port);
                Self {
                    environment,
                    predict_url: format!("{}/", base),
                    health_url: format!("{}/health", base),
                    api_base_url: base,
                }
            }
            Environment::Hosted => {
                let base = deployment.hosted_base_path.trim_end_matches('/').to_string();
                Self {
                    environment,
                    predict_url: format!("{}/predict", base),
                    health_url: format!("{}/health", base),
                    api_base_url: base,
                }
            }
        }
    }
}
