use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use tracing::warn;

use crate::auth::jwt::JwtKeys;
use crate::auth::repo::User;
use crate::auth::sessions::Session;
use crate::error::AppError;
use crate::state::AppState;

/// Pull the bearer token out of the Authorization header, if any.
pub fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")))
}

/// The authenticated caller, re-verified on every request.
///
/// Two-phase check: the token signature must verify AND the session registry
/// must still hold an unexpired row for it, so logout and password reset take
/// effect immediately. The user row is read fresh so role changes do too.
/// Every failure collapses into the same generic 401.
pub struct CurrentUser {
    pub user: User,
    pub token: String,
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or(AppError::InvalidSession)?
            .to_string();

        let keys = JwtKeys::from_ref(state);
        let claims = keys.verify(&token).map_err(|_| {
            warn!("token failed signature or expiry check");
            AppError::InvalidSession
        })?;

        let session = Session::find_active(&state.db, &token, claims.sub)
            .await
            .map_err(AppError::Internal)?;
        if session.is_none() {
            warn!(user_id = %claims.sub, "no active session for token");
            return Err(AppError::InvalidSession);
        }

        let user = User::find_by_id(&state.db, claims.sub)
            .await
            .map_err(AppError::Internal)?
            .ok_or_else(|| {
                warn!(user_id = %claims.sub, "session holder no longer exists");
                AppError::InvalidSession
            })?;

        Ok(CurrentUser { user, token })
    }
}
