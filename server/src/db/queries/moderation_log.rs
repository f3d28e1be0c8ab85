use sqlx::SqlitePool;

use crate::db::format_timestamp;
use crate::db::models::{CreateModerationLogParams, ModerationLogRow};

/// Append a moderation log entry. The log is insert-only.
pub async fn create_entry(
    pool: &SqlitePool,
    params: &CreateModerationLogParams<'_>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO moderation_logs (id, looproom_id, moderator_id, target_user_id, action, reason, metadata, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(params.id)
    .bind(params.looproom_id)
    .bind(params.moderator_id)
    .bind(params.target_user_id)
    .bind(params.action)
    .bind(params.reason)
    .bind(params.metadata.to_string())
    .bind(format_timestamp(chrono::Utc::now()))
    .execute(pool)
    .await?;
    Ok(())
}

/// Log entries for a room, newest first. `before_id` names the oldest entry
/// already seen.
pub async fn list_entries(
    pool: &SqlitePool,
    looproom_id: &str,
    limit: i64,
    before_id: Option<&str>,
) -> Result<Vec<ModerationLogRow>, sqlx::Error> {
    sqlx::query_as::<_, ModerationLogRow>(
        "SELECT * FROM moderation_logs l WHERE l.looproom_id = ? \
           AND (? IS NULL OR (l.created_at, l.rowid) < \
                (SELECT a.created_at, a.rowid FROM moderation_logs a WHERE a.id = ?)) \
         ORDER BY l.created_at DESC, l.rowid DESC LIMIT ?",
    )
    .bind(looproom_id)
    .bind(before_id)
    .bind(before_id)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Whether `id` is a log entry of this room.
pub async fn entry_in_room(
    pool: &SqlitePool,
    looproom_id: &str,
    id: &str,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) > 0 FROM moderation_logs WHERE id = ? AND looproom_id = ?")
        .bind(id)
        .bind(looproom_id)
        .fetch_one(pool)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fixtures::{seed_room, setup_db};

    #[tokio::test]
    async fn test_create_and_list_entries() {
        let pool = setup_db().await;
        seed_room(&pool, "r1", "creator").await;

        let metadata = serde_json::json!({ "durationMinutes": 10 });
        create_entry(
            &pool,
            &CreateModerationLogParams {
                id: "log1",
                looproom_id: "r1",
                moderator_id: "creator",
                target_user_id: Some("u1"),
                action: "mute",
                reason: Some("spam"),
                metadata: &metadata,
            },
        )
        .await
        .unwrap();
        create_entry(
            &pool,
            &CreateModerationLogParams {
                id: "log2",
                looproom_id: "r1",
                moderator_id: "creator",
                target_user_id: None,
                action: "delete_message",
                reason: None,
                metadata: &serde_json::json!({}),
            },
        )
        .await
        .unwrap();

        let entries = list_entries(&pool, "r1", 10, None).await.unwrap();
        assert_eq!(entries.len(), 2);
        let mute = entries.iter().find(|e| e.id == "log1").unwrap();
        assert_eq!(mute.action, "mute");
        assert_eq!(mute.reason.as_deref(), Some("spam"));
        let parsed: serde_json::Value = serde_json::from_str(&mute.metadata).unwrap();
        assert_eq!(parsed["durationMinutes"], 10);

        assert!(list_entries(&pool, "other", 10, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_entries_page_by_id_within_one_timestamp() {
        let pool = setup_db().await;
        seed_room(&pool, "r1", "creator").await;
        let metadata = serde_json::json!({});
        for id in ["l1", "l2", "l3"] {
            create_entry(
                &pool,
                &CreateModerationLogParams {
                    id,
                    looproom_id: "r1",
                    moderator_id: "creator",
                    target_user_id: None,
                    action: "warn",
                    reason: None,
                    metadata: &metadata,
                },
            )
            .await
            .unwrap();
        }
        sqlx::query("UPDATE moderation_logs SET created_at = '2026-03-01T12:00:00.000Z'")
            .execute(&pool)
            .await
            .unwrap();

        let first = list_entries(&pool, "r1", 1, None).await.unwrap();
        assert_eq!(first[0].id, "l3");
        let rest = list_entries(&pool, "r1", 10, Some("l3")).await.unwrap();
        let ids: Vec<&str> = rest.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["l2", "l1"]);

        assert!(entry_in_room(&pool, "r1", "l2").await.unwrap());
        assert!(!entry_in_room(&pool, "other", "l2").await.unwrap());
    }
}
