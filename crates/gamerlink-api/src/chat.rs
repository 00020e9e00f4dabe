use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{debug, error};

use gamerlink_gateway::session::{broadcast_event, message_event};
use gamerlink_types::api::{ChatRoom, SendMessageRequest, normalize_content};
use gamerlink_types::models::ChatMessage;

use crate::auth::AppState;
use crate::error::{ApiError, run_blocking};
use crate::middleware::CurrentUser;

const ROOM_NOT_FOUND: &str = "Chat not found or access denied";

/// GET /chat/rooms
pub async fn list_rooms(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.id;
    let rows = run_blocking(&state.db, move |db| db.get_chat_rooms(user_id)).await?;

    let rooms: Vec<ChatRoom> = rows
        .into_iter()
        .map(|r| ChatRoom {
            match_id: r.match_id,
            other_user: r.other_user.summary(),
            last_message: r.last_message.as_ref().map(|m| m.to_model()),
            unread_count: r.unread_count,
        })
        .collect();

    Ok(Json(rooms))
}

/// GET /chat/messages/{match_id}: full history, oldest first. Marks the room read.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(match_id): Path<i64>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.id;
    let rows = run_blocking(&state.db, move |db| {
        let rows = db.get_chat_messages(match_id, user_id)?;
        if rows.is_some() {
            db.mark_room_read(match_id, user_id)?;
        }
        Ok(rows)
    })
    .await?
    .ok_or(ApiError::NotFound(ROOM_NOT_FOUND))?;

    let messages: Vec<ChatMessage> = rows.iter().map(|r| r.to_model()).collect();
    Ok(Json(messages))
}

/// POST /chat/messages/{match_id}: persist, then push to everyone connected to the room.
pub async fn send_message(
    State(state): State<AppState>,
    Path(match_id): Path<i64>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = normalize_content(&req.content)
        .ok_or(ApiError::BadRequest("Message must be 1-2000 characters"))?
        .to_string();

    let sender_id = user.id;
    let row = run_blocking(&state.db, move |db| db.insert_chat_message(match_id, sender_id, &content))
        .await?
        .ok_or(ApiError::NotFound(ROOM_NOT_FOUND))?;

    match broadcast_event(&state.registry, match_id, &message_event(&row)) {
        Ok(delivered) => debug!("Message {} pushed to {} live connections", row.id, delivered),
        Err(e) => error!("Failed to encode message {}: {}", row.id, e),
    }

    Ok((StatusCode::CREATED, Json(row.to_model())))
}
