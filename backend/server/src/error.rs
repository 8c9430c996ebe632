use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ledger::{RaffleError, StoreError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Missing caller identity")]
    Unauthenticated,

    #[error("Admin role required")]
    Forbidden,

    #[error("Misconfigured: {0}")]
    Config(String),

    #[error(transparent)]
    Raffle(#[from] RaffleError),

    #[error("Internal error: {0}")]
    InternalError(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::Raffle(e.into())
    }
}

fn raffle_status(e: &RaffleError) -> StatusCode {
    match e {
        RaffleError::Invalid(_) | RaffleError::InvalidTaskType(_) => StatusCode::BAD_REQUEST,
        RaffleError::RaffleNotFound | RaffleError::TaskNotFound => StatusCode::NOT_FOUND,
        RaffleError::AlreadyJoined
        | RaffleError::TaskAlreadyCompleted
        | RaffleError::Store(StoreError::Contention) => StatusCode::CONFLICT,
        RaffleError::NotParticipating
        | RaffleError::RaffleInactive
        | RaffleError::NoParticipants
        | RaffleError::TaskNotSubmitted => StatusCode::UNPROCESSABLE_ENTITY,
        RaffleError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Raffle(e) => raffle_status(e),
            AppError::Config(_) | AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!("{self}");
        }

        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_errors_are_client_errors() {
        for e in [
            RaffleError::AlreadyJoined,
            RaffleError::NotParticipating,
            RaffleError::RaffleInactive,
            RaffleError::NoParticipants,
        ] {
            let response = AppError::from(e).into_response();
            assert!(response.status().is_client_error());
        }
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::Forbidden.into_response().status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::from(RaffleError::AlreadyJoined)
                .into_response()
                .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::from(StoreError::Poisoned).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
