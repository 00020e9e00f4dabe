use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use tracing::info;

use gamerlink_db::models::{LikeRow, parse_timestamp};
use gamerlink_db::reciprocity::LikeOutcome;
use gamerlink_types::api::{LikeResponse, LikeStatus, PendingLike};
use gamerlink_types::models::Match;

use crate::auth::AppState;
use crate::error::{ApiError, run_blocking};
use crate::middleware::CurrentUser;

/// POST /matches/like/{target_id}
pub async fn like(
    State(state): State<AppState>,
    Path(target_id): Path<i64>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<impl IntoResponse, ApiError> {
    let liker_id = user.id;
    let outcome = run_blocking(&state.db, move |db| db.like(liker_id, target_id)).await?;

    let response = match outcome {
        LikeOutcome::Liked { like_id } => LikeResponse {
            status: LikeStatus::Liked,
            message: "Like sent! Waiting for response.".into(),
            match_id: None,
            like_id: Some(like_id),
        },
        LikeOutcome::Matched { like_id, match_id } => {
            info!("User {} matched with {} (match {})", liker_id, target_id, match_id);
            LikeResponse {
                status: LikeStatus::Matched,
                message: "It's a match!".into(),
                match_id: Some(match_id),
                like_id: Some(like_id),
            }
        }
        LikeOutcome::AlreadyLiked => LikeResponse {
            status: LikeStatus::AlreadyLiked,
            message: "You already liked this user".into(),
            match_id: None,
            like_id: None,
        },
        LikeOutcome::SelfLike => LikeResponse {
            status: LikeStatus::Error,
            message: "Cannot like yourself".into(),
            match_id: None,
            like_id: None,
        },
        LikeOutcome::TargetNotFound => return Err(ApiError::NotFound("User not found")),
    };

    Ok(Json(response))
}

/// GET /matches
pub async fn list_matches(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.id;
    let rows = run_blocking(&state.db, move |db| db.get_user_matches(user_id)).await?;
    let matches: Vec<Match> = rows.into_iter().map(|r| r.into_model()).collect();
    Ok(Json(matches))
}

/// GET /matches/likes-sent
pub async fn likes_sent(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.id;
    let likes = run_blocking(&state.db, move |db| db.get_pending_likes_sent(user_id)).await?;
    Ok(Json(pending(&likes, |l| l.liked_id)))
}

/// GET /matches/likes-received
pub async fn likes_received(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.id;
    let likes = run_blocking(&state.db, move |db| db.get_pending_likes_received(user_id)).await?;
    Ok(Json(pending(&likes, |l| l.liker_id)))
}

fn pending(likes: &[LikeRow], other: impl Fn(&LikeRow) -> i64) -> Vec<PendingLike> {
    likes
        .iter()
        .map(|l| PendingLike {
            user_id: other(l),
            created_at: parse_timestamp(&l.created_at),
        })
        .collect()
}
