use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub fullname: String,
    pub avatar: String,
    pub cover_image: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub watch_history: Vec<Uuid>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Fields required to insert a new user.
#[derive(Debug)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub fullname: String,
    pub avatar: String,
    pub cover_image: Option<String>,
    pub password_hash: String,
}

impl User {
    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, fullname, avatar, cover_image,
                   password_hash, refresh_token, watch_history, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Find a user matching either identity field. A `None` binding never
    /// matches, so callers can pass just one of the two.
    pub async fn find_by_username_or_email(
        db: &PgPool,
        username: Option<&str>,
        email: Option<&str>,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, fullname, avatar, cover_image,
                   password_hash, refresh_token, watch_history, created_at, updated_at
            FROM users
            WHERE username = $1 OR email = $2
            "#,
        )
        .bind(username)
        .bind(email)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn create(db: &PgPool, new: &NewUser) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, email, fullname, avatar, cover_image, password_hash)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, username, email, fullname, avatar, cover_image,
                      password_hash, refresh_token, watch_history, created_at, updated_at
            "#,
        )
        .bind(&new.username)
        .bind(&new.email)
        .bind(&new.fullname)
        .bind(&new.avatar)
        .bind(&new.cover_image)
        .bind(&new.password_hash)
        .fetch_one(db)
        .await?;
        Ok(user)
    }

    /// Single-column update of the refresh-token slot. `None` clears it.
    pub async fn set_refresh_token(
        db: &PgPool,
        id: Uuid,
        token: Option<&str>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET refresh_token = $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(token)
        .execute(db)
        .await?;
        Ok(())
    }

    /// Single-column update of the stored password hash.
    pub async fn set_password_hash(db: &PgPool, id: Uuid, hash: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(hash)
        .execute(db)
        .await?;
        Ok(())
    }
}
