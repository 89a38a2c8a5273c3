use std::time::Duration;

use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::auth::repo::Role;
use crate::config::JwtConfig;
use crate::state::AppState;

/// Signed session-token payload. The role claim is informational only:
/// protected routes re-read the user row, so a stale role in a token never
/// grants anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub role: Role,
    /// Per-token nonce. `iat`/`exp` have second granularity, so without it
    /// two logins in the same second would mint identical tokens and collide
    /// on the registry's unique token column.
    pub jti: Uuid,
    pub iat: usize,
    pub exp: usize,
    pub iss: String,
    pub aud: String,
}

#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub ttl: Duration,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        let JwtConfig {
            secret,
            issuer,
            audience,
            ttl_hours,
        } = state.config.jwt.clone();
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer,
            audience,
            ttl: Duration::from_secs((ttl_hours as u64) * 3600),
        }
    }
}

impl JwtKeys {
    /// Issue a session token. Returns the token and its expiry instant; the
    /// expiry also goes into the session registry row.
    pub fn sign(
        &self,
        user_id: Uuid,
        username: &str,
        role: Role,
    ) -> anyhow::Result<(String, OffsetDateTime)> {
        let now = OffsetDateTime::now_utc();
        let exp = now + TimeDuration::seconds(self.ttl.as_secs() as i64);
        let claims = Claims {
            sub: user_id,
            username: username.to_string(),
            role,
            jti: Uuid::new_v4(),
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id = %user_id, "jwt signed");
        Ok((token, exp))
    }

    /// Signature, expiry, issuer and audience check. Callers must not leak
    /// which of these failed to the client.
    pub fn verify(&self, token: &str) -> anyhow::Result<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        debug!(user_id = %data.claims.sub, "jwt verified");
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_keys() -> JwtKeys {
        JwtKeys::from_ref(&AppState::fake())
    }

    // `make_keys` touches the fake state's lazy pool, which needs a Tokio
    // runtime even though nothing connects.
    #[tokio::test]
    async fn sign_and_verify_roundtrip() {
        let keys = make_keys();
        let user_id = Uuid::new_v4();
        let (token, exp) = keys.sign(user_id, "alice", Role::Student).expect("sign");
        let claims = keys.verify(&token).expect("verify");
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.role, Role::Student);
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
        assert!(exp > OffsetDateTime::now_utc());
    }

    #[tokio::test]
    async fn ttl_is_twenty_four_hours() {
        let keys = make_keys();
        let (_, exp) = keys.sign(Uuid::new_v4(), "bob", Role::Staff).expect("sign");
        let delta = exp - OffsetDateTime::now_utc();
        assert!(delta > TimeDuration::hours(23));
        assert!(delta <= TimeDuration::hours(24));
    }

    #[tokio::test]
    async fn repeated_signs_for_one_user_produce_distinct_tokens() {
        let keys = make_keys();
        let user_id = Uuid::new_v4();
        let (first, _) = keys.sign(user_id, "alice", Role::Student).expect("sign");
        let (second, _) = keys.sign(user_id, "alice", Role::Student).expect("sign");
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn verify_rejects_tampered_token() {
        let keys = make_keys();
        let (token, _) = keys.sign(Uuid::new_v4(), "eve", Role::Student).expect("sign");
        let mut tampered = token.clone();
        tampered.pop();
        tampered.push(if token.ends_with('A') { 'B' } else { 'A' });
        assert!(keys.verify(&tampered).is_err());
    }

    #[tokio::test]
    async fn verify_rejects_token_from_other_secret() {
        let keys = make_keys();
        let other = JwtKeys {
            encoding: EncodingKey::from_secret(b"different-secret"),
            decoding: DecodingKey::from_secret(b"different-secret"),
            issuer: keys.issuer.clone(),
            audience: keys.audience.clone(),
            ttl: keys.ttl,
        };
        let (token, _) = other
            .sign(Uuid::new_v4(), "mallory", Role::Supervisor)
            .expect("sign");
        assert!(keys.verify(&token).is_err());
    }

    #[tokio::test]
    async fn verify_rejects_garbage() {
        let keys = make_keys();
        assert!(keys.verify("not.a.jwt").is_err());
        assert!(keys.verify("").is_err());
    }
}
