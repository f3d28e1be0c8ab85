use sqlx::SqlitePool;

use crate::db::models::ParticipantRow;

pub async fn get_participant(
    pool: &SqlitePool,
    looproom_id: &str,
    user_id: &str,
) -> Result<Option<ParticipantRow>, sqlx::Error> {
    sqlx::query_as::<_, ParticipantRow>(
        "SELECT * FROM participants WHERE looproom_id = ? AND user_id = ?",
    )
    .bind(looproom_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

/// Mark a user active in a room, creating the membership record on first
/// join. Moderation state (ban, mute, moderator, warnings) is preserved.
pub async fn upsert_active(
    pool: &SqlitePool,
    looproom_id: &str,
    user_id: &str,
    mood: Option<&str>,
    joined_at: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO participants (looproom_id, user_id, mood, is_active, joined_at) \
         VALUES (?, ?, ?, 1, ?) \
         ON CONFLICT (looproom_id, user_id) DO UPDATE SET \
            is_active = 1, mood = excluded.mood, joined_at = excluded.joined_at, left_at = NULL",
    )
    .bind(looproom_id)
    .bind(user_id)
    .bind(mood)
    .bind(joined_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Ensure a membership record exists without activating it. Used when a
/// moderator acts on someone who has never joined.
pub async fn ensure_participant(
    pool: &SqlitePool,
    looproom_id: &str,
    user_id: &str,
    now: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT OR IGNORE INTO participants (looproom_id, user_id, is_active, joined_at) \
         VALUES (?, ?, 0, ?)",
    )
    .bind(looproom_id)
    .bind(user_id)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_inactive(
    pool: &SqlitePool,
    looproom_id: &str,
    user_id: &str,
    left_at: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE participants SET is_active = 0, left_at = ? \
         WHERE looproom_id = ? AND user_id = ? AND is_active = 1",
    )
    .bind(left_at)
    .bind(looproom_id)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Deactivate every participant of a room (session end).
pub async fn mark_all_inactive(
    pool: &SqlitePool,
    looproom_id: &str,
    left_at: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE participants SET is_active = 0, left_at = ? WHERE looproom_id = ? AND is_active = 1",
    )
    .bind(left_at)
    .bind(looproom_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Set or clear the mute restriction. `until = None` with `muted = true` is
/// a permanent mute.
pub async fn set_muted(
    pool: &SqlitePool,
    looproom_id: &str,
    user_id: &str,
    muted: bool,
    until: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE participants SET is_muted = ?, muted_until = ? WHERE looproom_id = ? AND user_id = ?",
    )
    .bind(muted)
    .bind(until)
    .bind(looproom_id)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Set or clear the ban restriction. A ban also deactivates the record.
pub async fn set_banned(
    pool: &SqlitePool,
    looproom_id: &str,
    user_id: &str,
    banned: bool,
    until: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE participants SET is_banned = ?, banned_until = ?, \
            is_active = CASE WHEN ? THEN 0 ELSE is_active END \
         WHERE looproom_id = ? AND user_id = ?",
    )
    .bind(banned)
    .bind(until)
    .bind(banned)
    .bind(looproom_id)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_moderator(
    pool: &SqlitePool,
    looproom_id: &str,
    user_id: &str,
    is_moderator: bool,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE participants SET is_moderator = ? WHERE looproom_id = ? AND user_id = ?",
    )
    .bind(is_moderator)
    .bind(looproom_id)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Record a warning. Returns the new warning count.
pub async fn add_warning(
    pool: &SqlitePool,
    looproom_id: &str,
    user_id: &str,
) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar(
        "UPDATE participants SET warning_count = warning_count + 1 \
         WHERE looproom_id = ? AND user_id = ? RETURNING warning_count",
    )
    .bind(looproom_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fixtures::{seed_room, seed_user, setup_db};

    const T0: &str = "2026-03-01T12:00:00.000Z";
    const T1: &str = "2026-03-01T12:05:00.000Z";

    async fn setup() -> SqlitePool {
        let pool = setup_db().await;
        seed_room(&pool, "r1", "creator").await;
        seed_user(&pool, "u1", "Alice").await;
        pool
    }

    #[tokio::test]
    async fn test_upsert_active_creates_then_reactivates() {
        let pool = setup().await;

        upsert_active(&pool, "r1", "u1", Some("calm"), T0).await.unwrap();
        let p = get_participant(&pool, "r1", "u1").await.unwrap().unwrap();
        assert!(p.is_active);
        assert_eq!(p.mood.as_deref(), Some("calm"));

        assert!(mark_inactive(&pool, "r1", "u1", T1).await.unwrap());
        let p = get_participant(&pool, "r1", "u1").await.unwrap().unwrap();
        assert!(!p.is_active);
        assert_eq!(p.left_at.as_deref(), Some(T1));

        upsert_active(&pool, "r1", "u1", Some("happy"), T1).await.unwrap();
        let p = get_participant(&pool, "r1", "u1").await.unwrap().unwrap();
        assert!(p.is_active);
        assert_eq!(p.mood.as_deref(), Some("happy"));
        assert!(p.left_at.is_none());
    }

    #[tokio::test]
    async fn test_rejoin_preserves_moderation_state() {
        let pool = setup().await;
        upsert_active(&pool, "r1", "u1", None, T0).await.unwrap();
        set_moderator(&pool, "r1", "u1", true).await.unwrap();
        set_banned(&pool, "r1", "u1", true, Some(T1)).await.unwrap();

        upsert_active(&pool, "r1", "u1", None, T0).await.unwrap();
        let p = get_participant(&pool, "r1", "u1").await.unwrap().unwrap();
        assert!(p.is_moderator);
        assert!(p.is_banned);
        assert_eq!(p.banned_until.as_deref(), Some(T1));
    }

    #[tokio::test]
    async fn test_ban_deactivates_and_unban_keeps_inactive() {
        let pool = setup().await;
        upsert_active(&pool, "r1", "u1", None, T0).await.unwrap();

        set_banned(&pool, "r1", "u1", true, None).await.unwrap();
        let p = get_participant(&pool, "r1", "u1").await.unwrap().unwrap();
        assert!(p.is_banned);
        assert!(!p.is_active);
        assert!(p.banned_until.is_none());

        set_banned(&pool, "r1", "u1", false, None).await.unwrap();
        let p = get_participant(&pool, "r1", "u1").await.unwrap().unwrap();
        assert!(!p.is_banned);
        assert!(!p.is_active);
    }

    #[tokio::test]
    async fn test_ensure_participant_does_not_clobber() {
        let pool = setup().await;
        upsert_active(&pool, "r1", "u1", Some("calm"), T0).await.unwrap();
        ensure_participant(&pool, "r1", "u1", T1).await.unwrap();

        let p = get_participant(&pool, "r1", "u1").await.unwrap().unwrap();
        assert!(p.is_active);
        assert_eq!(p.joined_at, T0);
    }

    #[tokio::test]
    async fn test_mute_and_warnings() {
        let pool = setup().await;
        ensure_participant(&pool, "r1", "u1", T0).await.unwrap();

        set_muted(&pool, "r1", "u1", true, Some(T1)).await.unwrap();
        let p = get_participant(&pool, "r1", "u1").await.unwrap().unwrap();
        assert!(p.is_muted);
        assert!(p.muted_until().is_some());

        assert_eq!(add_warning(&pool, "r1", "u1").await.unwrap(), Some(1));
        assert_eq!(add_warning(&pool, "r1", "u1").await.unwrap(), Some(2));
        assert_eq!(add_warning(&pool, "r1", "nobody").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_mark_all_inactive() {
        let pool = setup().await;
        seed_user(&pool, "u2", "Bob").await;
        upsert_active(&pool, "r1", "u1", None, T0).await.unwrap();
        upsert_active(&pool, "r1", "u2", None, T0).await.unwrap();

        assert_eq!(mark_all_inactive(&pool, "r1", T1).await.unwrap(), 2);
        assert_eq!(mark_all_inactive(&pool, "r1", T1).await.unwrap(), 0);
    }
}
