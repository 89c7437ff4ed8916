use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::bot::{Bot, Command};
use crate::bus::InteractionBus;
use crate::channels::Interaction;

#[derive(Clone)]
pub struct AppState {
    pub bot: Arc<Bot>,
    pub bus: Arc<InteractionBus>,
    pub api_key: Option<String>,
}

#[derive(Deserialize)]
pub struct CommandRequest {
    pub command: Command,
    pub channel_id: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/commands", post(handle_command))
        .route("/interactions", post(handle_interaction))
        .layer(middleware::from_fn_with_state(state.clone(), auth_layer))
        .route("/health", get(handle_health))
        .with_state(state)
}

async fn auth_layer(State(state): State<AppState>, req: Request, next: Next) -> impl IntoResponse {
    if let Some(ref expected) = state.api_key {
        let auth_ok = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|t| t == expected);
        if !auth_ok {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "Unauthorized"})),
            )
                .into_response();
        }
    }
    next.run(req).await.into_response()
}

/// Commands can open menus that wait on later interactions, so they run
/// detached and the gateway gets an immediate 202.
async fn handle_command(
    State(state): State<AppState>,
    Json(req): Json<CommandRequest>,
) -> impl IntoResponse {
    let bot = state.bot.clone();
    tokio::spawn(async move {
        if let Err(e) = bot.handle_command(req.command, &req.channel_id).await {
            tracing::error!("Command {:?} failed: {e:#}", req.command);
        }
    });
    (StatusCode::ACCEPTED, Json(json!({"status": "accepted"})))
}

async fn handle_interaction(
    State(state): State<AppState>,
    Json(interaction): Json<Interaction>,
) -> impl IntoResponse {
    let interaction = match state.bus.deliver(interaction) {
        Ok(()) => return (StatusCode::OK, Json(json!({"status": "delivered"}))),
        Err(interaction) => interaction,
    };
    match state.bot.handle_unsolicited(&interaction).await {
        Ok(true) => (StatusCode::OK, Json(json!({"status": "handled"}))),
        Ok(false) => {
            tracing::debug!(
                "No open menu on {} for {}",
                interaction.handle.key(),
                interaction.custom_id
            );
            (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "No open menu for this message"})),
            )
        }
        Err(e) => {
            tracing::error!("Interaction {} failed: {e:#}", interaction.custom_id);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
        }
    }
}

async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "open_menus": state.bus.pending(),
    }))
}
