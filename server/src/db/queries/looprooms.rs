use sqlx::SqlitePool;

use crate::db::format_timestamp;
use crate::db::models::LooproomRow;

pub struct CreateLooproomParams<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub category: Option<&'a str>,
    pub creator_id: &'a str,
    pub max_participants: i64,
}

pub async fn create_looproom(
    pool: &SqlitePool,
    params: &CreateLooproomParams<'_>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO looprooms (id, name, description, category, creator_id, max_participants, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(params.id)
    .bind(params.name)
    .bind(params.description)
    .bind(params.category)
    .bind(params.creator_id)
    .bind(params.max_participants)
    .bind(format_timestamp(chrono::Utc::now()))
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_looproom(
    pool: &SqlitePool,
    id: &str,
) -> Result<Option<LooproomRow>, sqlx::Error> {
    sqlx::query_as::<_, LooproomRow>("SELECT * FROM looprooms WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Set or clear the stream URL. Returns false if the room does not exist.
pub async fn set_stream_url(
    pool: &SqlitePool,
    id: &str,
    stream_url: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE looprooms SET stream_url = ? WHERE id = ?")
        .bind(stream_url)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Partial settings update. `None` fields keep their current value.
pub async fn update_settings(
    pool: &SqlitePool,
    id: &str,
    chat_enabled: Option<bool>,
    slow_mode_seconds: Option<i64>,
    max_participants: Option<i64>,
) -> Result<Option<LooproomRow>, sqlx::Error> {
    sqlx::query_as::<_, LooproomRow>(
        "UPDATE looprooms SET \
            chat_enabled = COALESCE(?, chat_enabled), \
            slow_mode_seconds = COALESCE(?, slow_mode_seconds), \
            max_participants = COALESCE(?, max_participants) \
         WHERE id = ? RETURNING *",
    )
    .bind(chat_enabled)
    .bind(slow_mode_seconds)
    .bind(max_participants)
    .bind(id)
    .fetch_optional(pool)
    .await
}
