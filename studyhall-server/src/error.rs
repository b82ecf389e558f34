use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use studyhall_core::GroupError;

/// A [`GroupError`] on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub GroupError);

impl From<GroupError> for ApiError {
    fn from(e: GroupError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            GroupError::NotFound(_) => StatusCode::NOT_FOUND,
            GroupError::Forbidden => StatusCode::FORBIDDEN,
            GroupError::Unauthorized => StatusCode::UNAUTHORIZED,
            GroupError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GroupError::CourseConflict
            | GroupError::GroupFull
            | GroupError::RequestNotPending
            | GroupError::LastAdminCannotLeave
            | GroupError::InvalidMessage(_)
            | GroupError::Validation(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self.0 {
            GroupError::Storage(detail) => {
                log::error!("Storage error: {detail}");
                "internal storage error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": self.0.code(),
            "message": message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
