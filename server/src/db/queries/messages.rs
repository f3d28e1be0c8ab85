use sqlx::{Connection, SqlitePool};

use crate::db::models::{InsertMessageParams, MessageRow};

/// Columns of `MessageRow`, with author display data joined from `users`.
const MESSAGE_COLUMNS: &str = "m.id, m.looproom_id, m.session_id, m.user_id, \
    u.name AS user_name, u.role AS user_role, m.content, m.message_type, m.is_pinned, \
    m.is_deleted, m.deleted_by, m.deleted_at, m.created_at";

/// Insert a new Looproom message.
pub async fn insert_message(
    pool: &SqlitePool,
    params: &InsertMessageParams<'_>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO messages (id, looproom_id, session_id, user_id, content, message_type, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(params.id)
    .bind(params.looproom_id)
    .bind(params.session_id)
    .bind(params.user_id)
    .bind(params.content)
    .bind(params.message_type.as_str())
    .bind(params.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_message(pool: &SqlitePool, id: &str) -> Result<Option<MessageRow>, sqlx::Error> {
    sqlx::query_as::<_, MessageRow>(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages m JOIN users u ON u.id = m.user_id WHERE m.id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Timestamp of the user's most recent chat message in a room (slow mode).
pub async fn last_message_at(
    pool: &SqlitePool,
    looproom_id: &str,
    user_id: &str,
) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT MAX(created_at) FROM messages \
         WHERE looproom_id = ? AND user_id = ? AND message_type = 'message'",
    )
    .bind(looproom_id)
    .bind(user_id)
    .fetch_one(pool)
    .await
}

/// Fetch room history, newest first. `before_id` names the oldest message
/// already seen; paging compares `(created_at, rowid)` so messages sharing a
/// timestamp are neither skipped nor repeated. Soft-deleted messages are only
/// included when `include_deleted` is set.
pub async fn fetch_history(
    pool: &SqlitePool,
    looproom_id: &str,
    before_id: Option<&str>,
    limit: i64,
    include_deleted: bool,
) -> Result<Vec<MessageRow>, sqlx::Error> {
    sqlx::query_as::<_, MessageRow>(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages m JOIN users u ON u.id = m.user_id \
         WHERE m.looproom_id = ? \
           AND (? IS NULL OR (m.created_at, m.rowid) < \
                (SELECT a.created_at, a.rowid FROM messages a WHERE a.id = ?)) \
           AND (? OR m.is_deleted = 0) \
         ORDER BY m.created_at DESC, m.rowid DESC \
         LIMIT ?"
    ))
    .bind(looproom_id)
    .bind(before_id)
    .bind(before_id)
    .bind(include_deleted)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Soft-delete a message. Returns false if it was already deleted or missing.
pub async fn soft_delete(
    pool: &SqlitePool,
    id: &str,
    deleted_by: &str,
    deleted_at: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE messages SET is_deleted = 1, is_pinned = 0, deleted_by = ?, deleted_at = ? \
         WHERE id = ? AND is_deleted = 0",
    )
    .bind(deleted_by)
    .bind(deleted_at)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Pin a message, unpinning any other pinned message in the room first.
/// Returns false (and changes nothing) if the message is missing, deleted
/// or belongs to another room.
pub async fn pin_message(
    pool: &SqlitePool,
    looproom_id: &str,
    message_id: &str,
) -> Result<bool, sqlx::Error> {
    let mut conn = pool.acquire().await?;
    let mut tx = conn.begin().await?;

    sqlx::query("UPDATE messages SET is_pinned = 0 WHERE looproom_id = ? AND is_pinned = 1 AND id != ?")
        .bind(looproom_id)
        .bind(message_id)
        .execute(&mut *tx)
        .await?;

    let pinned = sqlx::query(
        "UPDATE messages SET is_pinned = 1 WHERE id = ? AND looproom_id = ? AND is_deleted = 0",
    )
    .bind(message_id)
    .bind(looproom_id)
    .execute(&mut *tx)
    .await?;

    if pinned.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    tx.commit().await?;
    Ok(true)
}

pub async fn unpin_message(
    pool: &SqlitePool,
    looproom_id: &str,
    message_id: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE messages SET is_pinned = 0 WHERE id = ? AND looproom_id = ? AND is_pinned = 1",
    )
    .bind(message_id)
    .bind(looproom_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn get_pinned(
    pool: &SqlitePool,
    looproom_id: &str,
) -> Result<Option<MessageRow>, sqlx::Error> {
    sqlx::query_as::<_, MessageRow>(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages m JOIN users u ON u.id = m.user_id \
         WHERE m.looproom_id = ? AND m.is_pinned = 1"
    ))
    .bind(looproom_id)
    .fetch_optional(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fixtures::{seed_room, seed_user, setup_db};
    use crate::db::models::MessageType;

    async fn setup() -> SqlitePool {
        let pool = setup_db().await;
        seed_room(&pool, "r1", "creator").await;
        seed_room(&pool, "r2", "creator").await;
        seed_user(&pool, "u1", "Alice").await;
        pool
    }

    async fn create_msg(pool: &SqlitePool, id: &str, room: &str, at: &str) {
        insert_message(
            pool,
            &InsertMessageParams {
                id,
                looproom_id: room,
                session_id: None,
                user_id: "u1",
                content: "Test message",
                message_type: MessageType::Message,
                created_at: at,
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_insert_and_get_joins_author() {
        let pool = setup().await;
        create_msg(&pool, "m1", "r1", "2026-03-01T12:00:00.000Z").await;

        let msg = get_message(&pool, "m1").await.unwrap().unwrap();
        assert_eq!(msg.user_name, "Alice");
        assert_eq!(msg.user_role, "user");
        assert_eq!(msg.message_type, "message");
        assert!(!msg.is_pinned);
        assert!(!msg.is_deleted);
    }

    #[tokio::test]
    async fn test_pin_moves_single_pin() {
        let pool = setup().await;
        create_msg(&pool, "a", "r1", "2026-03-01T12:00:00.000Z").await;
        create_msg(&pool, "b", "r1", "2026-03-01T12:00:01.000Z").await;

        assert!(pin_message(&pool, "r1", "a").await.unwrap());
        assert!(pin_message(&pool, "r1", "b").await.unwrap());

        let pinned = get_pinned(&pool, "r1").await.unwrap().unwrap();
        assert_eq!(pinned.id, "b");
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE looproom_id = 'r1' AND is_pinned = 1")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_pin_repinning_same_message_is_fine() {
        let pool = setup().await;
        create_msg(&pool, "a", "r1", "2026-03-01T12:00:00.000Z").await;
        assert!(pin_message(&pool, "r1", "a").await.unwrap());
        assert!(pin_message(&pool, "r1", "a").await.unwrap());
        assert_eq!(get_pinned(&pool, "r1").await.unwrap().unwrap().id, "a");
    }

    #[tokio::test]
    async fn test_pin_rejects_foreign_room_and_keeps_existing_pin() {
        let pool = setup().await;
        create_msg(&pool, "a", "r1", "2026-03-01T12:00:00.000Z").await;
        create_msg(&pool, "other", "r2", "2026-03-01T12:00:00.000Z").await;
        pin_message(&pool, "r1", "a").await.unwrap();

        assert!(!pin_message(&pool, "r1", "other").await.unwrap());
        assert_eq!(get_pinned(&pool, "r1").await.unwrap().unwrap().id, "a");
    }

    #[tokio::test]
    async fn test_soft_delete_hides_from_non_creator_history() {
        let pool = setup().await;
        create_msg(&pool, "m1", "r1", "2026-03-01T12:00:00.000Z").await;
        create_msg(&pool, "m2", "r1", "2026-03-01T12:00:01.000Z").await;
        pin_message(&pool, "r1", "m1").await.unwrap();

        assert!(soft_delete(&pool, "m1", "creator", "2026-03-01T12:01:00.000Z").await.unwrap());
        assert!(!soft_delete(&pool, "m1", "creator", "2026-03-01T12:01:00.000Z").await.unwrap());

        let visible = fetch_history(&pool, "r1", None, 50, false).await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, "m2");

        let audit = fetch_history(&pool, "r1", None, 50, true).await.unwrap();
        assert_eq!(audit.len(), 2);
        let deleted = audit.iter().find(|m| m.id == "m1").unwrap();
        assert!(deleted.is_deleted);
        assert_eq!(deleted.deleted_by.as_deref(), Some("creator"));
        // Deleting a pinned message releases the pin.
        assert!(get_pinned(&pool, "r1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_history_pagination() {
        let pool = setup().await;
        for i in 0..5 {
            create_msg(&pool, &format!("m{i}"), "r1", &format!("2026-03-01T12:00:0{i}.000Z")).await;
        }

        let page = fetch_history(&pool, "r1", None, 2, false).await.unwrap();
        let ids: Vec<&str> = page.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m4", "m3"]);

        let page = fetch_history(&pool, "r1", Some(&page[1].id), 10, false)
            .await
            .unwrap();
        let ids: Vec<&str> = page.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m1", "m0"]);
    }

    #[tokio::test]
    async fn test_history_pages_through_shared_timestamps() {
        let pool = setup().await;
        for id in ["a", "b", "c"] {
            create_msg(&pool, id, "r1", "2026-03-01T12:00:00.000Z").await;
        }

        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = fetch_history(&pool, "r1", cursor.as_deref(), 1, false)
                .await
                .unwrap();
            let Some(last) = page.last() else { break };
            cursor = Some(last.id.clone());
            seen.extend(page.iter().map(|m| m.id.clone()));
        }
        assert_eq!(seen, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_last_message_at() {
        let pool = setup().await;
        assert!(last_message_at(&pool, "r1", "u1").await.unwrap().is_none());

        create_msg(&pool, "m1", "r1", "2026-03-01T12:00:00.000Z").await;
        create_msg(&pool, "m2", "r1", "2026-03-01T12:00:09.000Z").await;
        create_msg(&pool, "m3", "r2", "2026-03-01T12:30:00.000Z").await;

        assert_eq!(
            last_message_at(&pool, "r1", "u1").await.unwrap().as_deref(),
            Some("2026-03-01T12:00:09.000Z")
        );
    }
}
