use sqlx::{Connection, SqlitePool};

use crate::db::models::{SessionRow, SessionStatus};

/// Create a session and flip its room live in one transaction.
///
/// Returns `Ok(false)` without writing anything if the room is already live.
pub async fn start_session(
    pool: &SqlitePool,
    session_id: &str,
    looproom_id: &str,
    started_at: &str,
    peak_participants: i64,
    stream_url: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let mut conn = pool.acquire().await?;
    let mut tx = conn.begin().await?;

    sqlx::query(
        "INSERT INTO looproom_sessions (id, looproom_id, started_at, status, peak_participants) \
         VALUES (?, ?, ?, 'active', ?)",
    )
    .bind(session_id)
    .bind(looproom_id)
    .bind(started_at)
    .bind(peak_participants)
    .execute(&mut *tx)
    .await?;

    let flipped = sqlx::query(
        "UPDATE looprooms SET is_live = 1, current_session_id = ?, \
            stream_url = COALESCE(?, stream_url) \
         WHERE id = ? AND is_live = 0",
    )
    .bind(session_id)
    .bind(stream_url)
    .bind(looproom_id)
    .execute(&mut *tx)
    .await?;

    if flipped.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    tx.commit().await?;
    Ok(true)
}

/// Final figures written when a session ends.
pub struct EndSessionParams<'a> {
    pub session_id: &'a str,
    pub looproom_id: &'a str,
    pub ended_at: &'a str,
    pub duration_seconds: i64,
    pub peak_participants: i64,
}

/// Mark the session ended and take its room offline in one transaction.
///
/// Returns `Ok(None)` if the session was already ended or is no longer the
/// room's current session; otherwise the final session row.
pub async fn end_session(
    pool: &SqlitePool,
    params: &EndSessionParams<'_>,
) -> Result<Option<SessionRow>, sqlx::Error> {
    let mut conn = pool.acquire().await?;
    let mut tx = conn.begin().await?;

    let ended = sqlx::query_as::<_, SessionRow>(
        "UPDATE looproom_sessions SET status = 'ended', ended_at = ?, duration_seconds = ?, \
            peak_participants = MAX(peak_participants, ?) \
         WHERE id = ? AND status != 'ended' RETURNING *",
    )
    .bind(params.ended_at)
    .bind(params.duration_seconds)
    .bind(params.peak_participants)
    .bind(params.session_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(ended) = ended else {
        tx.rollback().await?;
        return Ok(None);
    };

    let offline = sqlx::query(
        "UPDATE looprooms SET is_live = 0, current_session_id = NULL \
         WHERE id = ? AND current_session_id = ?",
    )
    .bind(params.looproom_id)
    .bind(params.session_id)
    .execute(&mut *tx)
    .await?;

    if offline.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(None);
    }

    tx.commit().await?;
    Ok(Some(ended))
}

/// Move a session from one non-terminal status to another.
/// Returns false if the session was not in `from`.
pub async fn transition_status(
    pool: &SqlitePool,
    session_id: &str,
    from: SessionStatus,
    to: SessionStatus,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE looproom_sessions SET status = ? WHERE id = ? AND status = ?")
        .bind(to.as_str())
        .bind(session_id)
        .bind(from.as_str())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn get_session(pool: &SqlitePool, id: &str) -> Result<Option<SessionRow>, sqlx::Error> {
    sqlx::query_as::<_, SessionRow>("SELECT * FROM looproom_sessions WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn increment_total_messages(
    pool: &SqlitePool,
    session_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE looproom_sessions SET total_messages = total_messages + 1 \
         WHERE id = ? AND status != 'ended'",
    )
    .bind(session_id)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fixtures::{seed_room, setup_db};
    use crate::db::queries::looprooms::get_looproom;

    const T0: &str = "2026-03-01T12:00:00.000Z";
    const T1: &str = "2026-03-01T12:02:00.000Z";

    #[tokio::test]
    async fn test_start_session_flips_room_live() {
        let pool = setup_db().await;
        seed_room(&pool, "r1", "creator").await;

        assert!(start_session(&pool, "s1", "r1", T0, 3, Some("rtmp://x")).await.unwrap());

        let room = get_looproom(&pool, "r1").await.unwrap().unwrap();
        assert!(room.is_live);
        assert_eq!(room.current_session_id.as_deref(), Some("s1"));
        assert_eq!(room.stream_url.as_deref(), Some("rtmp://x"));

        let session = get_session(&pool, "s1").await.unwrap().unwrap();
        assert_eq!(session.status(), Some(SessionStatus::Active));
        assert_eq!(session.peak_participants, 3);
        assert!(session.ended_at.is_none());
        assert!(session.duration_seconds.is_none());
    }

    #[tokio::test]
    async fn test_second_start_is_rejected_and_leaves_no_session() {
        let pool = setup_db().await;
        seed_room(&pool, "r1", "creator").await;

        assert!(start_session(&pool, "s1", "r1", T0, 0, None).await.unwrap());
        assert!(!start_session(&pool, "s2", "r1", T0, 0, None).await.unwrap());

        assert!(get_session(&pool, "s2").await.unwrap().is_none());
        let room = get_looproom(&pool, "r1").await.unwrap().unwrap();
        assert_eq!(room.current_session_id.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn test_end_session_sets_final_figures_once() {
        let pool = setup_db().await;
        seed_room(&pool, "r1", "creator").await;
        start_session(&pool, "s1", "r1", T0, 2, None).await.unwrap();
        increment_total_messages(&pool, "s1").await.unwrap();

        let params = EndSessionParams {
            session_id: "s1",
            looproom_id: "r1",
            ended_at: T1,
            duration_seconds: 120,
            peak_participants: 7,
        };
        let ended = end_session(&pool, &params).await.unwrap().unwrap();
        assert_eq!(ended.status(), Some(SessionStatus::Ended));
        assert_eq!(ended.duration_seconds, Some(120));
        assert_eq!(ended.peak_participants, 7);
        assert_eq!(ended.total_messages, 1);
        assert_eq!(ended.ended_at.as_deref(), Some(T1));

        let room = get_looproom(&pool, "r1").await.unwrap().unwrap();
        assert!(!room.is_live);
        assert!(room.current_session_id.is_none());

        // Ended is terminal.
        assert!(end_session(&pool, &params).await.unwrap().is_none());
        increment_total_messages(&pool, "s1").await.unwrap();
        let session = get_session(&pool, "s1").await.unwrap().unwrap();
        assert_eq!(session.total_messages, 1);
    }

    #[tokio::test]
    async fn test_end_keeps_higher_persisted_peak() {
        let pool = setup_db().await;
        seed_room(&pool, "r1", "creator").await;
        start_session(&pool, "s1", "r1", T0, 9, None).await.unwrap();

        let ended = end_session(
            &pool,
            &EndSessionParams {
                session_id: "s1",
                looproom_id: "r1",
                ended_at: T1,
                duration_seconds: 120,
                peak_participants: 4,
            },
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(ended.peak_participants, 9);
    }

    #[tokio::test]
    async fn test_status_transitions() {
        let pool = setup_db().await;
        seed_room(&pool, "r1", "creator").await;
        start_session(&pool, "s1", "r1", T0, 0, None).await.unwrap();

        assert!(transition_status(&pool, "s1", SessionStatus::Active, SessionStatus::Paused).await.unwrap());
        // Already paused.
        assert!(!transition_status(&pool, "s1", SessionStatus::Active, SessionStatus::Paused).await.unwrap());
        assert!(transition_status(&pool, "s1", SessionStatus::Paused, SessionStatus::Active).await.unwrap());

        let session = get_session(&pool, "s1").await.unwrap().unwrap();
        assert_eq!(session.status(), Some(SessionStatus::Active));
    }

    #[tokio::test]
    async fn test_room_starts_again_after_end() {
        let pool = setup_db().await;
        seed_room(&pool, "r1", "creator").await;
        start_session(&pool, "s1", "r1", T0, 0, None).await.unwrap();
        end_session(
            &pool,
            &EndSessionParams {
                session_id: "s1",
                looproom_id: "r1",
                ended_at: T1,
                duration_seconds: 120,
                peak_participants: 0,
            },
        )
        .await
        .unwrap();
        start_session(&pool, "s2", "r1", T1, 0, None).await.unwrap();

        let ended = get_session(&pool, "s1").await.unwrap().unwrap();
        assert_eq!(ended.status(), Some(SessionStatus::Ended));
        assert_eq!(ended.duration_seconds, Some(120));
        let room = get_looproom(&pool, "r1").await.unwrap().unwrap();
        assert_eq!(room.current_session_id.as_deref(), Some("s2"));
    }
}
