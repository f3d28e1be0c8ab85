/// Secret used when none is configured. Only suitable for local development.
pub const DEV_JWT_SECRET: &str = "vybe-dev-secret-change-me";

/// Authentication configuration handed to the web layer.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub session_expiry_hours: i64,
}

impl AuthConfig {
    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}
