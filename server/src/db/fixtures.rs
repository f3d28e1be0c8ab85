//! Shared database fixtures for tests.

use sqlx::SqlitePool;

use crate::db::pool::{create_pool, run_migrations};
use crate::db::queries::{looprooms, users};

/// Fresh in-memory database with all migrations applied.
pub async fn setup_db() -> SqlitePool {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}

pub async fn seed_user(pool: &SqlitePool, id: &str, name: &str) {
    users::create_user(pool, id, name, "user", None)
        .await
        .unwrap();
}

/// Seed a room owned by `creator_id`. The creator user is created too.
pub async fn seed_room(pool: &SqlitePool, room_id: &str, creator_id: &str) {
    if users::get_user(pool, creator_id).await.unwrap().is_none() {
        users::create_user(pool, creator_id, "Creator", "creator", None)
            .await
            .unwrap();
    }
    looprooms::create_looproom(
        pool,
        &looprooms::CreateLooproomParams {
            id: room_id,
            name: "Calm Corner",
            description: None,
            category: Some("wellness"),
            creator_id,
            max_participants: 100,
        },
    )
    .await
    .unwrap();
}
