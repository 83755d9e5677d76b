use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use dashmap::DashSet;
use rand::RngCore;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::error::ApiError;
use super::server::AppState;
use crate::error::AuthError;

pub const API_KEY_HEADER: &str = "x-api-key";
const KEY_BYTES: usize = 32;

/// 32 random bytes, URL-safe base64 without padding.
pub fn generate_key() -> String {
    let mut bytes = [0u8; KEY_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Valid API keys, optionally persisted one per line.
pub struct ApiKeyStore {
    keys: DashSet<String>,
    file: Option<PathBuf>,
}

impl ApiKeyStore {
    pub fn in_memory() -> Self {
        Self {
            keys: DashSet::new(),
            file: None,
        }
    }

    pub fn open(path: &Path) -> Result<Self, AuthError> {
        let keys = DashSet::new();
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| AuthError::Store(format!("{}: {}", path.display(), e)))?;
            for key in content.lines().map(str::trim).filter(|k| !k.is_empty()) {
                keys.insert(key.to_string());
            }
        }
        debug!("Loaded {} API keys from {}", keys.len(), path.display());

        Ok(Self {
            keys,
            file: Some(path.to_path_buf()),
        })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn insert(&self, key: impl Into<String>) {
        self.keys.insert(key.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn check(&self, presented: Option<&str>) -> Result<(), AuthError> {
        match presented.map(str::trim) {
            None | Some("") => Err(AuthError::Missing),
            Some(key) if self.contains(key) => Ok(()),
            Some(_) => Err(AuthError::Invalid),
        }
    }

    /// Creates a key, persists it when file-backed, and makes it valid.
    pub fn generate(&self) -> Result<String, AuthError> {
        let key = generate_key();
        if let Some(path) = &self.file {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| AuthError::Store(format!("{}: {}", path.display(), e)))?;
            writeln!(file, "{}", key)
                .map_err(|e| AuthError::Store(format!("{}: {}", path.display(), e)))?;
        }
        self.keys.insert(key.clone());
        Ok(key)
    }

    /// Makes sure at least one key exists; returns the new key if one was minted.
    pub fn bootstrap(&self) -> Result<Option<String>, AuthError> {
        if !self.is_empty() {
            return Ok(None);
        }
        let key = self.generate()?;
        warn!("No API keys found, generated an initial key");
        info!("Initial API key: {}", key);
        info!("Send it in the X-API-Key header; it is also accepted as master_key");
        Ok(Some(key))
    }
}

/// Extractor guarding the flux-array and admin routes.
pub struct RequireApiKey;

#[async_trait]
impl FromRequestParts<AppState> for RequireApiKey {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if !state.auth_enabled {
            return Ok(RequireApiKey);
        }

        let presented = match parts.headers.get(API_KEY_HEADER) {
            Some(value) => Some(
                value
                    .to_str()
                    .map_err(|_| ApiError::bad_request("Invalid X-API-Key header encoding"))?,
            ),
            None => None,
        };

        state.keys.check(presented)?;
        Ok(RequireApiKey)
    }
}
