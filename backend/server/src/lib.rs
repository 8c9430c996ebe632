//! Documentation of the raffle ticket service.
//!
//!
//!
//! # General Infrastructure
//! - Gateway authenticates the session and forwards the caller in `X-User-Id`
//! - Admin routes live under `/admin` and check the caller against `RAFFLE_ADMIN_IDS`
//! - Ledger state lives in Redis, or in process when `REDIS_URL=memory`
//! - Emails go out through a webhook, never on the request path
//!
//!
//!
//! # Tickets and Entries
//!
//! Every chance to win is one ticket row. The entry row per (raffle, user) only caches the
//! ticket total so the raffle page does not have to count lists. Each ticket insert rewrites
//! the cache from the user's ticket total inside the same Lua script, so the two cannot drift
//! on the normal path and an old drifted count is corrected by the next insert.
//!
//! Rows written before that rule held can still be off. `POST /admin/raffles/{id}/audit`
//! rewrites every cached count from the tickets, and `POST /admin/raffles/{id}/repair` tops up
//! users who are known to be missing tickets.
//!
//!
//!
//! # Routes
//!
//! | Route | Caller |
//! |---|---|
//! | `GET /raffles`, `GET /raffles/{id}` | user |
//! | `POST /raffles/{id}/join` | user |
//! | `GET /raffles/{id}/entry` | user |
//! | `POST /raffles/{id}/tasks/{task_type}` | user |
//! | `POST /raffles/{id}/tasks/{task_type}/complete` | user |
//! | `POST /raffles`, `POST /raffles/{id}/end` | admin |
//! | `POST /admin/tasks/verify` | admin |
//! | `GET /admin/raffles/{id}/tasks` | admin |
//! | `POST /admin/raffles/{id}/audit` | admin |
//! | `POST /admin/raffles/{id}/repair` | admin |
//! | `POST /admin/raffles/{id}/winner` | admin |
//! | `DELETE /admin/raffles/{id}/self` | admin |
//!
//!
//!
//! # Setup
//!
//! View current docs.
//! ```sh
//! cargo doc --open
//! ```
//!
//! Run locally without Redis.
//! ```sh
//! REDIS_URL=memory RAFFLE_ADMIN_IDS=admin-1 RUST_LOG=info cargo run --bin raffle
//! ```
//!
//! Audit every raffle once.
//! ```sh
//! REDIS_URL=redis://localhost:6379 cargo run --bin process -- audit-all
//! ```
use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    http::{
        HeaderName, Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::{delete, get, post},
};

use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod notify;
pub mod routes;
pub mod state;

use auth::USER_HEADER;
use error::AppError;
use routes::{
    audit_handler, complete_task_handler, create_raffle_handler, end_raffle_handler,
    entry_handler, join_handler, pending_tasks_handler, raffle_handler, raffles_handler,
    remove_self_handler, repair_handler, submit_task_handler, verify_tasks_handler,
    winner_handler,
};
use state::State;

pub fn router(state: Arc<State>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static(USER_HEADER),
        ])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/raffles", get(raffles_handler).post(create_raffle_handler))
        .route("/raffles/{id}", get(raffle_handler))
        .route("/raffles/{id}/end", post(end_raffle_handler))
        .route("/raffles/{id}/join", post(join_handler))
        .route("/raffles/{id}/entry", get(entry_handler))
        .route("/raffles/{id}/tasks/{task_type}", post(submit_task_handler))
        .route(
            "/raffles/{id}/tasks/{task_type}/complete",
            post(complete_task_handler),
        )
        .route("/admin/tasks/verify", post(verify_tasks_handler))
        .route("/admin/raffles/{id}/tasks", get(pending_tasks_handler))
        .route("/admin/raffles/{id}/audit", post(audit_handler))
        .route("/admin/raffles/{id}/repair", post(repair_handler))
        .route("/admin/raffles/{id}/winner", post(winner_handler))
        .route("/admin/raffles/{id}/self", delete(remove_self_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn start_server() -> Result<(), AppError> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Initializing state...");
    let state = State::new().await?;

    info!("Starting server...");

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let app = router(state);

    let listener = TcpListener::bind(&address)
        .await
        .map_err(|e| AppError::Config(format!("Failed to bind {address}: {e}")))?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AppError::InternalError(Box::new(e)))?;

    info!("Server shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        ctrl_c().await.expect("Failed to install Ctrl+C handler");

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal(SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
