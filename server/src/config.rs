use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tracing::info;

use crate::auth::config::{AuthConfig, DEV_JWT_SECRET};

/// Top-level server configuration, loaded from vybe.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSection,
    pub database: DatabaseSection,
    pub auth: AuthSection,
    pub limits: LimitsSection,
    pub realtime: RealtimeSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub web_address: String,
    /// Public origin of the frontend, allowed by CORS.
    pub public_url: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            web_address: "0.0.0.0:8080".into(),
            public_url: "http://localhost:3000".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: "sqlite:vybe.db?mode=rwc".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub jwt_secret: String,
    pub session_expiry_hours: i64,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            jwt_secret: DEV_JWT_SECRET.into(),
            session_expiry_hours: 720,
        }
    }
}

/// Per-actor action caps. All windows are 60 seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    pub messages_per_minute: u32,
    pub moderation_actions_per_minute: u32,
    pub session_actions_per_minute: u32,
    pub max_message_length: usize,
    /// Per-IP REST request cap.
    pub api_requests_per_minute: u32,
    /// Per-IP WebSocket upgrade cap.
    pub ws_connections_per_minute: u32,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            messages_per_minute: 30,
            moderation_actions_per_minute: 20,
            session_actions_per_minute: 10,
            max_message_length: 2000,
            api_requests_per_minute: 120,
            ws_connections_per_minute: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RealtimeSection {
    pub ping_interval_secs: u64,
    pub ping_timeout_secs: u64,
    /// Bound of each connection's outbound event queue.
    pub outbound_queue: usize,
}

impl Default for RealtimeSection {
    fn default() -> Self {
        Self {
            ping_interval_secs: 25,
            ping_timeout_secs: 60,
            outbound_queue: 1024,
        }
    }
}

impl RealtimeSection {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs.max(1))
    }
}

impl ServerConfig {
    /// Load config from a TOML file. Falls back to defaults if the file doesn't exist.
    /// Environment variables override TOML values.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let mut config = if Path::new(path).exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {path}"))?;
            Self::parse(&contents).with_context(|| format!("failed to parse config file {path}"))?
        } else {
            info!("No config file found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("WEB_ADDRESS") {
            self.server.web_address = v;
        }
        if let Ok(v) = std::env::var("PUBLIC_URL") {
            self.server.public_url = v;
        }
        if let Ok(v) = std::env::var("DATABASE_URL") {
            self.database.url = v;
        }
        if let Ok(v) = std::env::var("JWT_SECRET") {
            self.auth.jwt_secret = v;
        }
        if let Ok(v) = std::env::var("SESSION_EXPIRY_HOURS")
            && let Ok(hours) = v.parse()
        {
            self.auth.session_expiry_hours = hours;
        }
        if let Ok(v) = std::env::var("MESSAGES_PER_MINUTE")
            && let Ok(n) = v.parse()
        {
            self.limits.messages_per_minute = n;
        }
        if let Ok(v) = std::env::var("MAX_MESSAGE_LENGTH")
            && let Ok(len) = v.parse()
        {
            self.limits.max_message_length = len;
        }
    }

    /// Convert into an AuthConfig for the auth layer.
    pub fn to_auth_config(&self) -> AuthConfig {
        AuthConfig {
            jwt_secret: self.auth.jwt_secret.clone(),
            session_expiry_hours: self.auth.session_expiry_hours,
        }
    }
}
