use std::sync::Arc;

use sqlx::SqlitePool;

use crate::auth::config::AuthConfig;
use crate::config::{LimitsSection, RealtimeSection, ServerConfig};
use crate::engine::hub::ConnectionHub;
use crate::engine::looproom::LooproomService;
use crate::engine::rate_limiter::ActionLimiters;
use crate::engine::room_manager::RoomManager;

use super::rate_limit::ApiRateLimiters;

/// Shared state behind every HTTP and WebSocket handler.
pub struct AppState {
    pub db: SqlitePool,
    pub rooms: Arc<RoomManager>,
    pub hub: Arc<ConnectionHub>,
    pub service: Arc<LooproomService>,
    pub limiters: Arc<ActionLimiters>,
    pub http_limiters: Arc<ApiRateLimiters>,
    pub auth_config: AuthConfig,
    pub public_url: String,
    pub limits: LimitsSection,
    pub realtime: RealtimeSection,
}

impl AppState {
    pub fn new(db: SqlitePool, config: &ServerConfig) -> Self {
        let rooms = Arc::new(RoomManager::new());
        let hub = Arc::new(ConnectionHub::new(config.realtime.outbound_queue));
        let limiters = Arc::new(ActionLimiters::from_config(&config.limits));
        let service = Arc::new(LooproomService::new(
            db.clone(),
            rooms.clone(),
            hub.clone(),
            limiters.clone(),
            config.limits.max_message_length,
        ));

        Self {
            db,
            rooms,
            hub,
            service,
            limiters,
            http_limiters: Arc::new(ApiRateLimiters::from_config(&config.limits)),
            auth_config: config.to_auth_config(),
            public_url: config.server.public_url.clone(),
            limits: config.limits.clone(),
            realtime: config.realtime.clone(),
        }
    }
}
