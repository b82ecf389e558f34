//! Request extractors.

use axum::{extract::FromRequestParts, http::header, http::request::Parts};
use std::ops::Deref;

use studyhall_core::{GroupError, Viewer};

use crate::error::ApiError;
use crate::AppState;

/// The authenticated caller, resolved from `Authorization: Bearer <token>`.
///
/// Missing or unknown tokens reject the request with 401.
#[derive(Debug, Clone)]
pub struct Caller(pub Viewer);

impl Deref for Caller {
    type Target = Viewer;

    fn deref(&self) -> &Viewer {
        &self.0
    }
}

pub(crate) fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(ApiError(GroupError::Unauthorized))?;
        state
            .groups()
            .directory()
            .authenticate(token)
            .await
            .map(Caller)
            .ok_or(ApiError(GroupError::Unauthorized))
    }
}
