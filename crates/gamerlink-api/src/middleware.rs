use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use gamerlink_db::models::UserRow;
use gamerlink_gateway::auth::TokenVerifier;

use crate::auth::AppState;
use crate::error::{ApiError, run_blocking};

/// The authenticated caller, inserted into request extensions by `require_auth`.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserRow);

/// Extract and validate the JWT from the Authorization header, then load
/// the user it names. Unknown or deactivated users are unauthorized.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .and_then(|token| state.tokens.verify(token))
        .ok_or(ApiError::Unauthorized)?;

    let user = run_blocking(&state.db, move |db| db.get_user_by_id(claims.sub))
        .await?
        .filter(|u| u.is_active)
        .ok_or(ApiError::Unauthorized)?;

    req.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(req).await)
}
