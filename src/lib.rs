//! Exoplanet transit detection service: a BiLSTM classifier over
//! light-curve flux data, served over HTTP.

pub mod config;
pub mod deployment;
pub mod error;
pub mod logging;
pub mod ml;
pub mod web;

pub use config::Config;
pub use error::{ArtifactError, AuthError, InferenceError, InputError};
