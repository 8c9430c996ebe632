//! Caller identity. The gateway in front of this service authenticates the session and
//! forwards the user id in `X-User-Id`. Admins are the ids listed in `RAFFLE_ADMIN_IDS`.
use std::sync::Arc;

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::{error::AppError, state::State};

pub const USER_HEADER: &str = "x-user-id";

pub struct CurrentUser(pub String);

pub struct AdminUser(pub String);

fn user_id(parts: &Parts) -> Result<String, AppError> {
    parts
        .headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or(AppError::Unauthenticated)
}

impl FromRequestParts<Arc<State>> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &Arc<State>,
    ) -> Result<Self, Self::Rejection> {
        user_id(parts).map(CurrentUser)
    }
}

impl FromRequestParts<Arc<State>> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<State>,
    ) -> Result<Self, Self::Rejection> {
        let id = user_id(parts)?;

        if !state.config.is_admin(&id) {
            return Err(AppError::Forbidden);
        }

        Ok(AdminUser(id))
    }
}
