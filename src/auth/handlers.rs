use axum::{
    extract::{FromRef, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        dto::{
            is_valid_username, LoginRequest, LoginResponse, MessageResponse, PublicUser,
            SignupRequest, SignupResponse, VerifyResponse, MIN_PASSWORD_LEN,
        },
        extractors::CurrentUser,
        jwt::JwtKeys,
        password::{hash_password, verify_password, DUMMY_DIGEST},
        repo::{profile_email, Profile, Role, User},
        sessions::Session,
    },
    error::AppError,
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/verify", get(verify))
        .route("/auth/logout", post(logout))
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> Result<(StatusCode, Json<SignupResponse>), AppError> {
    if !is_valid_username(&payload.username) {
        warn!(username = %payload.username, "invalid username format");
        return Err(AppError::Validation(
            "Username must be 3-20 characters (letters, numbers, underscore only)".into(),
        ));
    }

    if payload.password.len() < MIN_PASSWORD_LEN {
        warn!("password too short");
        return Err(AppError::Validation(
            "Password must be at least 6 characters".into(),
        ));
    }

    if payload.full_name.trim().is_empty() {
        return Err(AppError::Validation("Full name is required".into()));
    }

    let role = payload.role.unwrap_or(Role::Student);

    match User::find_by_username(&state.db, &payload.username).await {
        Ok(Some(_)) => {
            warn!(username = %payload.username, "username already exists");
            return Err(AppError::Conflict("Username already exists".into()));
        }
        Ok(None) => {}
        Err(e) => {
            error!(error = %e, "find_by_username failed");
            return Err(AppError::Internal(e));
        }
    }

    let hash = hash_password(&payload.password).map_err(AppError::Internal)?;

    let user = match User::create(&state.db, &payload.username, &hash, &payload.full_name, role)
        .await
    {
        Ok(u) => u,
        // Two signups racing on the same username: the unique index wins
        // where the pre-check cannot.
        Err(e)
            if e.downcast_ref::<sqlx::Error>()
                .and_then(|se| se.as_database_error())
                .map(|de| de.is_unique_violation())
                .unwrap_or(false) =>
        {
            warn!(username = %payload.username, "username taken concurrently");
            return Err(AppError::Conflict("Username already exists".into()));
        }
        Err(e) => {
            error!(error = %e, "create user failed");
            return Err(AppError::Internal(e));
        }
    };

    // Best-effort denormalized profile row; signup still succeeds if it fails.
    if let Err(e) = Profile::create(
        &state.db,
        user.id,
        &profile_email(&user.username),
        &user.full_name,
        user.role,
    )
    .await
    {
        warn!(error = %e, user_id = %user.id, "profile creation failed; user was created");
    }

    info!(user_id = %user.id, username = %user.username, "user created");
    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            message: "User created successfully".into(),
            user: PublicUser::from(&user),
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    if payload.username.is_empty() || payload.password.is_empty() {
        return Err(AppError::Validation(
            "Username and password are required".into(),
        ));
    }

    // Unknown user and wrong password must be indistinguishable to the caller.
    let user = match User::find_by_username(&state.db, &payload.username).await {
        Ok(Some(u)) => u,
        Ok(None) => {
            // Burn the same hashing cost as a wrong-password attempt; the
            // response timing must not betray whether the username exists.
            let _ = verify_password(&payload.password, DUMMY_DIGEST);
            warn!(username = %payload.username, "login for unknown username");
            return Err(AppError::InvalidCredentials);
        }
        Err(e) => {
            error!(error = %e, "find_by_username failed");
            return Err(AppError::Internal(e));
        }
    };

    let ok = verify_password(&payload.password, &user.password_hash).map_err(AppError::Internal)?;
    if !ok {
        warn!(user_id = %user.id, "login with wrong password");
        return Err(AppError::InvalidCredentials);
    }

    let keys = JwtKeys::from_ref(&state);
    let (token, expires_at) = keys
        .sign(user.id, &user.username, user.role)
        .map_err(AppError::Internal)?;

    // Opportunistic cleanup of long-expired rows; login works even if it fails.
    if let Err(e) = Session::sweep_expired(&state.db).await {
        warn!(error = %e, "expired-session sweep failed");
    }

    Session::create(&state.db, user.id, &token, expires_at)
        .await
        .map_err(AppError::Internal)?;

    info!(user_id = %user.id, "user logged in");
    Ok(Json(LoginResponse {
        message: "Login successful".into(),
        token,
        user: PublicUser::from(&user),
    }))
}

/// GET /auth/verify. The extractor already does the work: signature check,
/// session-registry lookup, fresh user read. Here we only shape the response.
#[instrument(skip(user))]
pub async fn verify(
    user: Result<CurrentUser, AppError>,
) -> (StatusCode, Json<VerifyResponse>) {
    match user {
        Ok(current) => (
            StatusCode::OK,
            Json(VerifyResponse {
                valid: true,
                user: Some(PublicUser::from(&current.user)),
                error: None,
            }),
        ),
        Err(e) => (
            StatusCode::UNAUTHORIZED,
            Json(VerifyResponse {
                valid: false,
                user: None,
                error: Some(e.to_string()),
            }),
        ),
    }
}

/// POST /auth/logout. Always 200: revoking an unknown or already-revoked
/// token is a no-op, and the client must be able to drop its state either way.
#[instrument(skip(state, headers))]
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Json<MessageResponse> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")));

    if let Some(token) = token {
        // Best-effort claim extraction, for the log line only.
        let keys = JwtKeys::from_ref(&state);
        if let Ok(claims) = keys.verify(token) {
            info!(user_id = %claims.sub, "user logged out");
        }

        if let Err(e) = Session::revoke(&state.db, token).await {
            error!(error = %e, "session revoke failed during logout");
        }
    }

    Json(MessageResponse {
        message: "Logout successful".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signup_rejects_bad_username_before_touching_the_store() {
        // Pure validation path; no pool interaction happens before the check.
        assert!(!is_valid_username("no spaces allowed"));
        assert!(!is_valid_username("ab"));
    }

    #[test]
    fn login_response_serializes_token_and_user() {
        let body = LoginResponse {
            message: "Login successful".into(),
            token: "abc.def.ghi".into(),
            user: PublicUser {
                id: uuid::Uuid::new_v4(),
                username: "alice".into(),
                full_name: "Alice A".into(),
                role: Role::Student,
            },
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"token\":\"abc.def.ghi\""));
        assert!(json.contains("\"username\":\"alice\""));
    }
}
