use std::path::Path;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path as UrlPath, Query, State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use gamerlink_api::auth::{self, AppState, AppStateInner};
use gamerlink_api::middleware::require_auth;
use gamerlink_api::{chat, matches, users};
use gamerlink_db::Database;
use gamerlink_gateway::auth::JwtKeys;
use gamerlink_gateway::registry::ConnectionRegistry;
use gamerlink_gateway::session::{self, ChatGateway};

pub mod config;

#[derive(Debug, Deserialize)]
struct WsParams {
    token: Option<String>,
}

/// Build the full application router. HTTP handlers and chat sessions
/// share one store and one connection registry.
pub fn app(db: Arc<Database>, tokens: JwtKeys, static_dir: Option<&Path>) -> Router {
    let registry = ConnectionRegistry::new();

    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        tokens: tokens.clone(),
        registry: registry.clone(),
    });

    let gateway = ChatGateway {
        db,
        registry,
        verifier: Arc::new(tokens),
    };

    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/health", get(health))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/users/me", get(users::me).patch(users::update_me))
        .route("/users/recommendations", get(users::recommendations))
        .route("/matches", get(matches::list_matches))
        .route("/matches/like/{target_id}", post(matches::like))
        .route("/matches/likes-sent", get(matches::likes_sent))
        .route("/matches/likes-received", get(matches::likes_received))
        .route("/chat/rooms", get(chat::list_rooms))
        .route("/chat/messages/{match_id}", get(chat::get_messages).post(chat::send_message))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/chat/ws/{match_id}", get(ws_upgrade))
        .with_state(gateway);

    let mut app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route);

    if let Some(dir) = static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// `GET /chat/ws/{match_id}?token=<jwt>`
async fn ws_upgrade(
    State(gateway): State<ChatGateway>,
    UrlPath(match_id): UrlPath<i64>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session::handle_chat_socket(socket, gateway, match_id, params.token))
}
