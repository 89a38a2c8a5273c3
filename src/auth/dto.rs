use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::repo::{Role, User};

pub const MIN_PASSWORD_LEN: usize = 6;

/// 3-20 characters, letters, digits and underscore only.
pub fn is_valid_username(username: &str) -> bool {
    lazy_static! {
        static ref USERNAME_RE: Regex = Regex::new(r"^[a-zA-Z0-9_]{3,20}$").unwrap();
    }
    USERNAME_RE.is_match(username)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub username: String,
    pub password: String,
    pub full_name: String,
    #[serde(default)]
    pub role: Option<Role>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// User projection returned to clients. Never carries the password hash.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
    pub full_name: String,
    pub role: Role,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            full_name: user.full_name.clone(),
            role: user.role,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub message: String,
    pub user: PublicUser,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub message: String,
    pub token: String,
    pub user: PublicUser,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<PublicUser>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    #[test]
    fn username_format_rule() {
        assert!(is_valid_username("alice"));
        assert!(is_valid_username("bob_42"));
        assert!(is_valid_username("abc"));
        assert!(is_valid_username("a".repeat(20).as_str()));

        assert!(!is_valid_username("ab"));
        assert!(!is_valid_username("a".repeat(21).as_str()));
        assert!(!is_valid_username("has space"));
        assert!(!is_valid_username("dash-ed"));
        assert!(!is_valid_username("dot.ted"));
        assert!(!is_valid_username(""));
    }

    #[test]
    fn public_user_uses_camel_case() {
        let user = User {
            id: Uuid::new_v4(),
            username: "alice".into(),
            password_hash: "digest".into(),
            full_name: "Alice A".into(),
            role: Role::Student,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        };
        let json = serde_json::to_string(&PublicUser::from(&user)).unwrap();
        assert!(json.contains("\"fullName\":\"Alice A\""));
        assert!(json.contains("\"role\":\"student\""));
        assert!(!json.contains("digest"));
    }

    #[test]
    fn signup_role_defaults_to_none_when_omitted() {
        let req: SignupRequest = serde_json::from_str(
            r#"{"username":"alice","password":"secret1","fullName":"Alice A"}"#,
        )
        .unwrap();
        assert!(req.role.is_none());
        assert_eq!(req.full_name, "Alice A");
    }

    #[test]
    fn verify_failure_body_shape() {
        let body = VerifyResponse {
            valid: false,
            user: None,
            error: Some("Invalid or expired session".into()),
        };
        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(
            json,
            r#"{"valid":false,"error":"Invalid or expired session"}"#
        );
    }
}
