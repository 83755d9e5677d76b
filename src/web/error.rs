use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, warn};

use crate::error::{ArtifactError, AuthError, InferenceError};

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
}

/// HTTP-facing error: a status code and a JSON `{"error": ...}` body.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub kind: Option<&'static str>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            kind: None,
        }
    }

    pub fn with_kind(mut self, kind: &'static str) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            kind: self.kind,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<InferenceError> for ApiError {
    fn from(err: InferenceError) -> Self {
        match err {
            InferenceError::Input(e) => {
                warn!("Rejected input: {}", e);
                ApiError::bad_request(e.to_string()).with_kind("InputError")
            }
            InferenceError::ModelUnavailable => {
                ApiError::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
                    .with_kind("ModelUnavailable")
            }
            InferenceError::Artifact(e) => e.into(),
            InferenceError::Failed(msg) => {
                error!("Inference error: {}", msg);
                ApiError::internal(format!("Inference failed: {}", msg)).with_kind("InferenceError")
            }
        }
    }
}

impl From<ArtifactError> for ApiError {
    fn from(err: ArtifactError) -> Self {
        error!("Artifact error: {}", err);
        ApiError::internal(err.to_string()).with_kind("ArtifactError")
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let status = match err {
            AuthError::Missing => StatusCode::UNAUTHORIZED,
            AuthError::Invalid | AuthError::InvalidMaster => StatusCode::FORBIDDEN,
            AuthError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::bad_request(format!("Invalid JSON body: {}", rejection.body_text()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InputError;

    #[test]
    fn input_errors_are_client_errors() {
        let err: ApiError = InferenceError::Input(InputError::Empty).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "No data provided");
    }

    #[test]
    fn missing_model_is_service_unavailable() {
        let err: ApiError = InferenceError::ModelUnavailable.into();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn auth_errors_map_to_401_and_403() {
        assert_eq!(ApiError::from(AuthError::Missing).status, StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::from(AuthError::Invalid).status, StatusCode::FORBIDDEN);
        assert_eq!(ApiError::from(AuthError::InvalidMaster).status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn body_omits_empty_type() {
        let body = ErrorBody {
            error: "boom".to_string(),
            kind: None,
        };
        assert_eq!(serde_json::to_string(&body).unwrap(), r#"{"error":"boom"}"#);
    }
}
