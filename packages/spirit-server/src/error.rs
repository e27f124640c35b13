//! Server errors and the HTTP error boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use spirit_core::{ConfigError, FactoryError, RequestError};
use tracing::error;

/// Bootstrap failures: fatal, reported before the listener is bound.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("route '{method} {path}' is bound twice")]
    RouteConflict { method: String, path: String },
    #[error("unsupported HTTP verb '{0}'")]
    UnsupportedVerb(String),
    #[error("connector failure: {0}")]
    Connector(#[source] anyhow::Error),
}

/// A request failure rendered as a JSON error response.
#[derive(Debug)]
pub struct ApiError(pub RequestError);

impl From<RequestError> for ApiError {
    fn from(err: RequestError) -> Self {
        Self(err)
    }
}

impl From<FactoryError> for ApiError {
    fn from(err: FactoryError) -> Self {
        Self(err.into())
    }
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            RequestError::NotFound(_) => StatusCode::NOT_FOUND,
            RequestError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RequestError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            RequestError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body: Value = match &self.0 {
            RequestError::NotFound(msg) => json!({ "error": "not_found", "message": msg }),
            RequestError::BadRequest(msg) => json!({ "error": "bad_request", "message": msg }),
            RequestError::Validation(err) => json!({
                "error": "validation_failed",
                "message": err.to_string(),
                "diagnoses": err.diagnoses,
            }),
            RequestError::Internal(err) => {
                error!(error = %format!("{err:#}"), "request failed");
                json!({ "error": "internal_error", "message": err.to_string() })
            }
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use spirit_core::{Diagnosis, ValidationError};

    use super::*;

    #[test]
    fn request_errors_map_to_status_codes() {
        let cases = [
            (RequestError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (RequestError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (
                RequestError::Validation(ValidationError {
                    diagnoses: vec![Diagnosis::error("title", "'title' is required")],
                }),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                RequestError::Internal(anyhow::anyhow!("boom")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).into_response().status(), status);
        }
    }

    #[tokio::test]
    async fn validation_response_lists_diagnoses() {
        let response = ApiError(RequestError::Validation(ValidationError {
            diagnoses: vec![Diagnosis::error("title", "'title' is required")],
        }))
        .into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "validation_failed");
        assert_eq!(body["diagnoses"][0]["field"], "title");
        assert_eq!(body["diagnoses"][0]["severity"], "error");
    }

    #[test]
    fn factory_errors_convert() {
        let err: ApiError = FactoryError::FactoryNotFound {
            name: "Ghost".into(),
        }
        .into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
