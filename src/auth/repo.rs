use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Staff,
    Supervisor,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Student => write!(f, "student"),
            Role::Staff => write!(f, "staff"),
            Role::Supervisor => write!(f, "supervisor"),
        }
    }
}

/// Credential-store record.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub full_name: String,
    pub role: Role,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl User {
    pub async fn find_by_username(db: &PgPool, username: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, password_hash, full_name, role, created_at, updated_at
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, password_hash, full_name, role, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn create(
        db: &PgPool,
        username: &str,
        password_hash: &str,
        full_name: &str,
        role: Role,
    ) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, password_hash, full_name, role)
            VALUES ($1, $2, $3, $4)
            RETURNING id, username, password_hash, full_name, role, created_at, updated_at
            "#,
        )
        .bind(username)
        .bind(password_hash)
        .bind(full_name)
        .bind(role)
        .fetch_one(db)
        .await?;
        Ok(user)
    }

    /// All student accounts, newest first.
    pub async fn list_students(db: &PgPool) -> anyhow::Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, password_hash, full_name, role, created_at, updated_at
            FROM users
            WHERE role = 'student'
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(db)
        .await?;
        Ok(users)
    }

    /// A student account by id; misses for non-students on purpose so
    /// administration can never touch staff or supervisor accounts.
    pub async fn find_student(db: &PgPool, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, password_hash, full_name, role, created_at, updated_at
            FROM users
            WHERE id = $1 AND role = 'student'
            "#,
        )
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// True if `username` belongs to a user other than `id`.
    pub async fn username_taken_by_other(
        db: &PgPool,
        username: &str,
        id: Uuid,
    ) -> anyhow::Result<bool> {
        let row: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM users WHERE username = $1 AND id <> $2")
                .bind(username)
                .bind(id)
                .fetch_optional(db)
                .await?;
        Ok(row.is_some())
    }

    /// Partial update: only the provided fields are written.
    pub async fn update_student(
        db: &PgPool,
        id: Uuid,
        username: Option<&str>,
        full_name: Option<&str>,
        password_hash: Option<&str>,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users SET
                username = COALESCE($2, username),
                full_name = COALESCE($3, full_name),
                password_hash = COALESCE($4, password_hash),
                updated_at = now()
            WHERE id = $1 AND role = 'student'
            RETURNING id, username, password_hash, full_name, role, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(username)
        .bind(full_name)
        .bind(password_hash)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Delete a student account inside a caller-owned transaction.
    pub async fn delete_student_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        id: Uuid,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1 AND role = 'student'")
            .bind(id)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_password_hash(
        db: &PgPool,
        id: Uuid,
        password_hash: &str,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users SET password_hash = $2, updated_at = now()
            WHERE id = $1 AND role = 'student'
            "#,
        )
        .bind(id)
        .bind(password_hash)
        .execute(db)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Denormalized profile row, written best-effort on signup.
pub struct Profile;

impl Profile {
    pub async fn create(
        db: &PgPool,
        user_id: Uuid,
        email: &str,
        full_name: &str,
        role: Role,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO profiles (id, email, full_name, role)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(user_id)
        .bind(email)
        .bind(full_name)
        .bind(role)
        .execute(db)
        .await?;
        Ok(())
    }

    pub async fn sync(
        db: &PgPool,
        user_id: Uuid,
        email: Option<&str>,
        full_name: Option<&str>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE profiles SET
                email = COALESCE($2, email),
                full_name = COALESCE($3, full_name)
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(email)
        .bind(full_name)
        .execute(db)
        .await?;
        Ok(())
    }
}

/// Placeholder email tying a user account to its patron record.
pub fn profile_email(username: &str) -> String {
    format!("{username}@library.local")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_is_never_serialized() {
        let user = User {
            id: Uuid::new_v4(),
            username: "alice".into(),
            password_hash: "argon2-digest".into(),
            full_name: "Alice A".into(),
            role: Role::Student,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("argon2-digest"));
        assert!(!json.contains("password_hash"));
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Student).unwrap(), "\"student\"");
        assert_eq!(
            serde_json::to_string(&Role::Supervisor).unwrap(),
            "\"supervisor\""
        );
    }

    #[test]
    fn profile_email_follows_convention() {
        assert_eq!(profile_email("alice"), "alice@library.local");
    }
}
