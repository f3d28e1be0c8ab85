use std::collections::BTreeMap;

use sqlx::{Connection, SqlitePool};

/// Reactions on one message: emoji -> sorted user ids.
pub type ReactionMap = BTreeMap<String, Vec<String>>;

/// Toggle a user's reaction. Returns true if the reaction was added, false
/// if an existing one was removed.
pub async fn toggle_reaction(
    pool: &SqlitePool,
    message_id: &str,
    user_id: &str,
    emoji: &str,
    now: &str,
) -> Result<bool, sqlx::Error> {
    let mut conn = pool.acquire().await?;
    let mut tx = conn.begin().await?;

    let removed = sqlx::query(
        "DELETE FROM message_reactions WHERE message_id = ? AND user_id = ? AND emoji = ?",
    )
    .bind(message_id)
    .bind(user_id)
    .bind(emoji)
    .execute(&mut *tx)
    .await?;

    let added = removed.rows_affected() == 0;
    if added {
        sqlx::query(
            "INSERT INTO message_reactions (message_id, user_id, emoji, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(emoji)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(added)
}

pub async fn reaction_map(pool: &SqlitePool, message_id: &str) -> Result<ReactionMap, sqlx::Error> {
    let rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT emoji, user_id FROM message_reactions WHERE message_id = ? ORDER BY emoji, user_id",
    )
    .bind(message_id)
    .fetch_all(pool)
    .await?;

    let mut map = ReactionMap::new();
    for (emoji, user_id) in rows {
        map.entry(emoji).or_default().push(user_id);
    }
    Ok(map)
}

/// Reaction maps for a page of messages. Messages without reactions are
/// absent from the result.
pub async fn reactions_for_messages(
    pool: &SqlitePool,
    message_ids: &[String],
) -> Result<BTreeMap<String, ReactionMap>, sqlx::Error> {
    let mut result: BTreeMap<String, ReactionMap> = BTreeMap::new();
    if message_ids.is_empty() {
        return Ok(result);
    }

    let placeholders = vec!["?"; message_ids.len()].join(", ");
    let sql = format!(
        "SELECT message_id, emoji, user_id FROM message_reactions \
         WHERE message_id IN ({placeholders}) ORDER BY message_id, emoji, user_id"
    );
    let mut query = sqlx::query_as::<_, (String, String, String)>(&sql);
    for id in message_ids {
        query = query.bind(id);
    }

    for (message_id, emoji, user_id) in query.fetch_all(pool).await? {
        result
            .entry(message_id)
            .or_default()
            .entry(emoji)
            .or_default()
            .push(user_id);
    }
    Ok(result)
}
