use sqlx::SqlitePool;

use crate::db::format_timestamp;
use crate::db::models::UserRow;

/// Insert a user record.
pub async fn create_user(
    pool: &SqlitePool,
    id: &str,
    name: &str,
    role: &str,
    avatar_url: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO users (id, name, role, avatar_url, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(name)
    .bind(role)
    .bind(avatar_url)
    .bind(format_timestamp(chrono::Utc::now()))
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_user(pool: &SqlitePool, id: &str) -> Result<Option<UserRow>, sqlx::Error> {
    sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}
