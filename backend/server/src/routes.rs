use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State as AxumState},
    http::StatusCode,
    response::IntoResponse,
};
use ledger::{
    RaffleError,
    audit::AuditSummary,
    models::{NewRaffle, Raffle, RaffleTask},
    raffles::{EntryStatus, RemovedParticipant},
    repair::{ExpectedCount, RepairResult},
    tasks::VerifyReport,
    winner::WinnerDraw,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::{AdminUser, CurrentUser},
    error::AppError,
    state::State,
};

type AppState = AxumState<Arc<State>>;

#[derive(Deserialize)]
pub struct UsernamePayload {
    username: String,
}

#[derive(Deserialize)]
pub struct VerifyPayload {
    task_ids: Vec<Uuid>,
    #[serde(default)]
    skip_email: bool,
}

#[derive(Deserialize)]
pub struct RepairPayload {
    users: Vec<ExpectedCount>,
    reason: Option<String>,
}

pub async fn create_raffle_handler(
    AxumState(state): AppState,
    AdminUser(admin_id): AdminUser,
    Json(payload): Json<NewRaffle>,
) -> Result<impl IntoResponse, AppError> {
    let raffle = state.ledger.create_raffle(payload).await?;
    info!("Admin {admin_id} created raffle {}", raffle.id);

    Ok((StatusCode::CREATED, Json(raffle)))
}

pub async fn raffles_handler(
    AxumState(state): AppState,
    CurrentUser(_): CurrentUser,
) -> Result<Json<Vec<Raffle>>, AppError> {
    Ok(Json(state.ledger.raffles().await?))
}

pub async fn raffle_handler(
    AxumState(state): AppState,
    CurrentUser(_): CurrentUser,
    Path(raffle_id): Path<Uuid>,
) -> Result<Json<Raffle>, AppError> {
    Ok(Json(state.ledger.raffle(raffle_id).await?))
}

pub async fn end_raffle_handler(
    AxumState(state): AppState,
    AdminUser(admin_id): AdminUser,
    Path(raffle_id): Path<Uuid>,
) -> Result<Json<Raffle>, AppError> {
    let raffle = state.ledger.end_raffle(raffle_id).await?;
    info!("Admin {admin_id} ended raffle {raffle_id}");

    Ok(Json(raffle))
}

/// Answers with the caller's entry either way. A repeated join is a no-op: 200 instead of 201.
pub async fn join_handler(
    AxumState(state): AppState,
    CurrentUser(user_id): CurrentUser,
    Path(raffle_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let status = match state.ledger.join_raffle(&user_id, raffle_id).await {
        Ok(_) => StatusCode::CREATED,
        Err(RaffleError::AlreadyJoined) => StatusCode::OK,
        Err(e) => return Err(e.into()),
    };

    let entry = state.ledger.entry_status(&user_id, raffle_id).await?;

    Ok((status, Json(entry)))
}

pub async fn entry_handler(
    AxumState(state): AppState,
    CurrentUser(user_id): CurrentUser,
    Path(raffle_id): Path<Uuid>,
) -> Result<Json<EntryStatus>, AppError> {
    Ok(Json(state.ledger.entry_status(&user_id, raffle_id).await?))
}

pub async fn submit_task_handler(
    AxumState(state): AppState,
    CurrentUser(user_id): CurrentUser,
    Path((raffle_id, task_type)): Path<(Uuid, String)>,
    Json(payload): Json<UsernamePayload>,
) -> Result<Json<RaffleTask>, AppError> {
    let task = state
        .ledger
        .submit_task_username(&user_id, raffle_id, &task_type, &payload.username)
        .await?;

    Ok(Json(task))
}

pub async fn complete_task_handler(
    AxumState(state): AppState,
    CurrentUser(user_id): CurrentUser,
    Path((raffle_id, task_type)): Path<(Uuid, String)>,
) -> Result<impl IntoResponse, AppError> {
    let ticket = state
        .ledger
        .complete_task(&user_id, raffle_id, &task_type)
        .await?;

    Ok((StatusCode::CREATED, Json(ticket)))
}

pub async fn verify_tasks_handler(
    AxumState(state): AppState,
    AdminUser(admin_id): AdminUser,
    Json(payload): Json<VerifyPayload>,
) -> Result<Json<VerifyReport>, AppError> {
    let report = state
        .ledger
        .admin_verify_tasks(&payload.task_ids, payload.skip_email)
        .await?;

    info!(
        "Admin {admin_id} verified {} tasks, {} failed",
        report.succeeded.len(),
        report.failed.len()
    );

    Ok(Json(report))
}

pub async fn pending_tasks_handler(
    AxumState(state): AppState,
    AdminUser(_): AdminUser,
    Path(raffle_id): Path<Uuid>,
) -> Result<Json<Vec<RaffleTask>>, AppError> {
    Ok(Json(state.ledger.pending_tasks(raffle_id).await?))
}

pub async fn audit_handler(
    AxumState(state): AppState,
    AdminUser(admin_id): AdminUser,
    Path(raffle_id): Path<Uuid>,
) -> Result<Json<AuditSummary>, AppError> {
    info!("Admin {admin_id} auditing raffle {raffle_id}");

    Ok(Json(state.ledger.audit_raffle(raffle_id).await?))
}

pub async fn repair_handler(
    AxumState(state): AppState,
    AdminUser(admin_id): AdminUser,
    Path(raffle_id): Path<Uuid>,
    Json(payload): Json<RepairPayload>,
) -> Result<Json<Vec<RepairResult>>, AppError> {
    let results = state
        .ledger
        .fix_specific_mismatches(
            raffle_id,
            &admin_id,
            payload.reason.as_deref(),
            &payload.users,
        )
        .await?;

    Ok(Json(results))
}

pub async fn winner_handler(
    AxumState(state): AppState,
    AdminUser(admin_id): AdminUser,
    Path(raffle_id): Path<Uuid>,
) -> Result<Json<WinnerDraw>, AppError> {
    let drawn = state.ledger.select_winner(raffle_id).await?;
    info!("Admin {admin_id} drew raffle {raffle_id}");

    Ok(Json(drawn))
}

pub async fn remove_self_handler(
    AxumState(state): AppState,
    AdminUser(admin_id): AdminUser,
    Path(raffle_id): Path<Uuid>,
) -> Result<Json<RemovedParticipant>, AppError> {
    Ok(Json(
        state
            .ledger
            .remove_self_from_raffle(&admin_id, raffle_id)
            .await?,
    ))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::{Duration, Utc};
    use ledger::{Ledger, MemoryStore, TicketStore};

    use super::*;
    use crate::{config::Config, database::Backend};

    fn state() -> Arc<State> {
        let config = Config {
            port: 1111,
            redis_url: "memory".to_string(),
            admin_ids: HashSet::from(["admin".to_string()]),
            notify_webhook_url: None,
            notify_webhook_token: None,
        };
        let (ledger, _receiver) = Ledger::with_receiver(Backend::Memory(MemoryStore::new()));

        Arc::new(State { config, ledger })
    }

    async fn new_raffle(state: &Arc<State>) -> Raffle {
        state
            .ledger
            .create_raffle(NewRaffle {
                title: "Launch Week".to_string(),
                prize_description: "Hardware wallet".to_string(),
                prize_amount: 250,
                starts_at: Utc::now() - Duration::hours(1),
                ends_at: Utc::now() + Duration::days(3),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_second_join_is_a_no_op() {
        let state = state();
        let raffle = new_raffle(&state).await;

        let first = join_handler(
            AxumState(state.clone()),
            CurrentUser("user-1".to_string()),
            Path(raffle.id),
        )
        .await
        .unwrap()
        .into_response();
        assert_eq!(first.status(), StatusCode::CREATED);

        let second = join_handler(
            AxumState(state.clone()),
            CurrentUser("user-1".to_string()),
            Path(raffle.id),
        )
        .await
        .unwrap()
        .into_response();
        assert_eq!(second.status(), StatusCode::OK);

        let tickets = state.ledger.store().user_tickets(raffle.id, "user-1").await.unwrap();
        assert_eq!(tickets.len(), 1);
    }

    #[tokio::test]
    async fn test_join_ended_raffle_is_rejected() {
        let state = state();
        let raffle = new_raffle(&state).await;
        state.ledger.end_raffle(raffle.id).await.unwrap();

        let result = join_handler(
            AxumState(state.clone()),
            CurrentUser("user-1".to_string()),
            Path(raffle.id),
        )
        .await;

        let status = match result {
            Ok(_) => panic!("joined an ended raffle"),
            Err(e) => e.into_response().status(),
        };
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_submit_verify_and_entry() {
        let state = state();
        let raffle = new_raffle(&state).await;

        join_handler(
            AxumState(state.clone()),
            CurrentUser("user-1".to_string()),
            Path(raffle.id),
        )
        .await
        .unwrap();

        let Json(task) = submit_task_handler(
            AxumState(state.clone()),
            CurrentUser("user-1".to_string()),
            Path((raffle.id, "instagram".to_string())),
            Json(UsernamePayload {
                username: "@Yield.Hunter".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(task.username.as_deref(), Some("yield.hunter"));

        let Json(pending) = pending_tasks_handler(
            AxumState(state.clone()),
            AdminUser("admin".to_string()),
            Path(raffle.id),
        )
        .await
        .unwrap();
        assert_eq!(pending.len(), 1);

        let Json(report) = verify_tasks_handler(
            AxumState(state.clone()),
            AdminUser("admin".to_string()),
            Json(VerifyPayload {
                task_ids: vec![task.id],
                skip_email: true,
            }),
        )
        .await
        .unwrap();
        assert_eq!(report.succeeded.len(), 1);
        assert!(report.failed.is_empty());

        let Json(entry) = entry_handler(
            AxumState(state.clone()),
            CurrentUser("user-1".to_string()),
            Path(raffle.id),
        )
        .await
        .unwrap();
        assert_eq!(entry.entry_count, Some(3));
        assert_eq!(entry.ticket_count, 3);
    }

    #[tokio::test]
    async fn test_unknown_raffle_is_not_found() {
        let state = state();

        let result = raffle_handler(
            AxumState(state),
            CurrentUser("user-1".to_string()),
            Path(Uuid::new_v4()),
        )
        .await;

        let status = match result {
            Ok(_) => panic!("unknown raffle found"),
            Err(e) => e.into_response().status(),
        };
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
