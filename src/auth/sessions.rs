use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

/// Session-registry row. A token is live only while a matching, unexpired row
/// exists here; signature verification alone never authenticates a request.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(skip_serializing)]
    pub token: String,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

impl Session {
    pub async fn create(
        db: &PgPool,
        user_id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<Session> {
        let session = sqlx::query_as::<_, Session>(
            r#"
            INSERT INTO user_sessions (user_id, token, expires_at)
            VALUES ($1, $2, $3)
            RETURNING id, user_id, token, expires_at, created_at
            "#,
        )
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .fetch_one(db)
        .await?;
        Ok(session)
    }

    /// The registry half of two-phase verification: the row must exist for
    /// this token AND user AND still be unexpired.
    pub async fn find_active(
        db: &PgPool,
        token: &str,
        user_id: Uuid,
    ) -> anyhow::Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(
            r#"
            SELECT id, user_id, token, expires_at, created_at
            FROM user_sessions
            WHERE token = $1 AND user_id = $2 AND expires_at > now()
            "#,
        )
        .bind(token)
        .bind(user_id)
        .fetch_optional(db)
        .await?;
        Ok(session)
    }

    /// Logout. Deleting an already-absent token is a no-op, which is what
    /// makes logout idempotent.
    pub async fn revoke(db: &PgPool, token: &str) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM user_sessions WHERE token = $1")
            .bind(token)
            .execute(db)
            .await?;
        Ok(result.rows_affected())
    }

    /// Kill every session the user holds (password reset, account deletion).
    pub async fn revoke_all(db: &PgPool, user_id: Uuid) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM user_sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(db)
            .await?;
        Ok(result.rows_affected())
    }

    /// Drop rows whose expiry has passed. `find_active` already ignores them;
    /// this keeps the table from growing without bound. Run on login.
    pub async fn sweep_expired(db: &PgPool) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM user_sessions WHERE expires_at < now()")
            .execute(db)
            .await?;
        Ok(result.rows_affected())
    }

    /// Same, inside a caller-owned transaction (account deletion pairs this
    /// with the user delete so neither can land without the other).
    pub async fn revoke_all_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        user_id: Uuid,
    ) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM user_sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_never_serialized() {
        let session = Session {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            token: "signed.bearer.token".into(),
            expires_at: OffsetDateTime::now_utc(),
            created_at: OffsetDateTime::now_utc(),
        };
        let json = serde_json::to_string(&session).unwrap();
        assert!(!json.contains("signed.bearer.token"));
    }
}
