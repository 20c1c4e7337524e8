use axum::{
    Json,
    extract::multipart::{MultipartError, MultipartRejection},
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Failures raised while running a model.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("invalid image file: {0}")]
    InvalidImage(#[from] image::ImageError),

    #[error("model error: {0}")]
    Model(#[from] candle_core::Error),

    #[error("inference task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("class {0} is missing from the label encoder")]
    UnknownLabel(u32),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors surfaced to HTTP clients as `{"detail": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{message}")]
    Rejected { status: StatusCode, message: String },

    #[error(transparent)]
    Inference(#[from] InferenceError),
}

impl ApiError {
    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::Rejected {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: message.into(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        Self::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        let status = err.status();
        // The body limit surfaces as a stream error while reading the field.
        let message = if status == StatusCode::PAYLOAD_TOO_LARGE {
            "Upload exceeds the size limit".to_string()
        } else {
            err.body_text()
        };
        Self::Rejected { status, message }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::Rejected { status, message } => (status, message),
            ApiError::Inference(InferenceError::InvalidImage(err)) => {
                (StatusCode::BAD_REQUEST, format!("Invalid image file: {err}"))
            }
            ApiError::Inference(err) => {
                tracing::error!(error = %err, "Inference failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
        };

        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn rejections_keep_their_status() {
        let response = ApiError::unprocessable("Field required: file").into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            body_json(response).await,
            json!({"detail": "Field required: file"})
        );
    }

    #[tokio::test]
    async fn undecodable_images_are_bad_requests() {
        let err = image::load_from_memory(b"fake image data").unwrap_err();
        let response = ApiError::from(InferenceError::from(err)).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["detail"].as_str().unwrap().starts_with("Invalid image file"));
    }

    #[tokio::test]
    async fn model_failures_hide_their_cause() {
        let err = InferenceError::UnknownLabel(42);
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            json!({"detail": "Internal Server Error"})
        );
    }
}
