use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use narwhal_common::NarwhalError;
use serde::Serialize;
use tracing::{error, warn};

/// API error response
#[derive(Debug)]
pub struct ApiError(pub NarwhalError);

#[derive(Serialize)]
struct ErrorBody<'a> {
    message: String,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    container_id: Option<&'a str>,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            NarwhalError::NotFound(_) => StatusCode::NOT_FOUND,
            NarwhalError::Cancelled(_) => StatusCode::GATEWAY_TIMEOUT,
            NarwhalError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<NarwhalError> for ApiError {
    fn from(err: NarwhalError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(NarwhalError::Validation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(kind = self.0.kind(), "{}", self.0);
        } else {
            warn!(kind = self.0.kind(), "{}", self.0);
        }

        let body = ErrorBody {
            message: self.0.to_string(),
            kind: self.0.kind(),
            container_id: self.0.container_id(),
        };
        (status, Json(body)).into_response()
    }
}
