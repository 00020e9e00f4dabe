use axum::{Extension, Json, extract::State, response::IntoResponse};
use tracing::info;

use gamerlink_db::queries::{ProfileUpdate, UserUpdate};
use gamerlink_types::api::UpdateUserRequest;
use gamerlink_types::models::UserSummary;

use crate::auth::{AppState, normalize_email, normalize_game};
use crate::error::{ApiError, run_blocking};
use crate::middleware::CurrentUser;

pub async fn me(Extension(CurrentUser(user)): Extension<CurrentUser>) -> Json<UserSummary> {
    Json(user.summary())
}

pub async fn update_me(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let update = UserUpdate {
        email: req.email.as_deref().map(normalize_email).transpose()?,
        game: req.game.as_deref().map(|g| normalize_game(Some(g))),
        is_active: req.is_active,
    };

    let user_id = user.id;
    let outcome = run_blocking(&state.db, move |db| db.update_user(user_id, &update)).await?;

    match outcome {
        ProfileUpdate::Updated(row) => {
            info!("User {} updated their profile", row.id);
            Ok(Json(row.summary()))
        }
        ProfileUpdate::EmailTaken => Err(ApiError::Conflict("Email already registered")),
        ProfileUpdate::NotFound => Err(ApiError::NotFound("User not found")),
    }
}

/// Active players of the caller's game. Empty when the caller has no game set.
pub async fn recommendations(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(game) = user.game.clone() else {
        return Ok(Json(Vec::<UserSummary>::new()));
    };

    let user_id = user.id;
    let rows = run_blocking(&state.db, move |db| db.users_with_same_game(user_id, &game)).await?;
    Ok(Json(rows.iter().map(|r| r.summary()).collect()))
}
