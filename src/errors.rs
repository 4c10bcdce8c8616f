// src/errors.rs
use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum FacemapError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),

    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("no camera is open")]
    CameraClosed,

    #[error("API configuration missing; set GEMINI_API_KEY")]
    MissingCredential,

    #[error("analysis service error: {0}")]
    Network(String),

    #[error("malformed analysis response: {0}")]
    MalformedResponse(String),

    /// Enrichment-only, non-fatal: the generation call produced no image.
    #[error("no inspiration image produced")]
    NoImageProduced,

    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("invalid session state: {0}")]
    InvalidState(String),
}

impl FacemapError {
    fn kind(&self) -> &'static str {
        match self {
            FacemapError::PermissionDenied(_) => "permission_denied",
            FacemapError::DeviceUnavailable(_) => "device_unavailable",
            FacemapError::CameraClosed => "camera_closed",
            FacemapError::MissingCredential => "missing_credential",
            FacemapError::Network(_) => "network_or_server_error",
            FacemapError::MalformedResponse(_) => "malformed_response",
            FacemapError::NoImageProduced => "no_image_produced",
            FacemapError::InvalidImage(_) => "invalid_image",
            FacemapError::SessionNotFound(_) => "session_not_found",
            FacemapError::InvalidState(_) => "invalid_state",
        }
    }
}

impl ResponseError for FacemapError {
    fn status_code(&self) -> StatusCode {
        match self {
            FacemapError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            FacemapError::DeviceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            FacemapError::CameraClosed => StatusCode::CONFLICT,
            FacemapError::MissingCredential => StatusCode::SERVICE_UNAVAILABLE,
            FacemapError::Network(_) => StatusCode::BAD_GATEWAY,
            FacemapError::MalformedResponse(_) => StatusCode::BAD_GATEWAY,
            FacemapError::NoImageProduced => StatusCode::SERVICE_UNAVAILABLE,
            FacemapError::InvalidImage(_) => StatusCode::BAD_REQUEST,
            FacemapError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            FacemapError::InvalidState(_) => StatusCode::CONFLICT,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": self.kind(),
            "message": self.to_string()
        }))
    }
}
