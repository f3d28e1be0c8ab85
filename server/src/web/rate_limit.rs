use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::config::LimitsSection;
use crate::engine::rate_limiter::RateLimiter;
use crate::error::RoomError;

/// Per-IP rate limiters for the HTTP surface.
pub struct ApiRateLimiters {
    /// REST endpoints.
    pub api: RateLimiter,
    /// WebSocket upgrades: prevents connection storms.
    pub ws: RateLimiter,
}

impl ApiRateLimiters {
    pub fn from_config(limits: &LimitsSection) -> Self {
        Self {
            api: RateLimiter::per_minute(limits.api_requests_per_minute),
            ws: RateLimiter::per_minute(limits.ws_connections_per_minute),
        }
    }

    pub fn cleanup(&self, older_than: Duration) {
        self.api.cleanup(older_than);
        self.ws.cleanup(older_than);
    }
}

/// Extract client IP from request, only trusting proxy headers from loopback.
///
/// Behind a local reverse proxy the peer is loopback and X-Forwarded-For /
/// X-Real-IP name the real client. Any other peer is taken at face value so
/// spoofed headers cannot dodge the limits.
fn client_ip(req: &Request<Body>) -> String {
    let peer_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|c| c.0.ip());
    let from_loopback = peer_ip.is_some_and(|ip| ip.is_loopback());

    if from_loopback {
        if let Some(forwarded) = req.headers().get("x-forwarded-for")
            && let Ok(val) = forwarded.to_str()
            && let Some(first) = val.split(',').next()
        {
            return first.trim().to_string();
        }

        if let Some(real_ip) = req.headers().get("x-real-ip")
            && let Ok(val) = real_ip.to_str()
        {
            return val.trim().to_string();
        }
    }

    peer_ip
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn limited(
    req: Request<Body>,
    next: Next,
    pick: fn(&ApiRateLimiters) -> &RateLimiter,
) -> Response {
    if let Some(limiters) = req.extensions().get::<Arc<ApiRateLimiters>>() {
        let ip = client_ip(&req);
        if let Err(retry_after) = pick(limiters).check(&ip) {
            debug!(%ip, path = %req.uri().path(), "request rate limited");
            return RoomError::RateLimited { retry_after }.into_response();
        }
    }
    next.run(req).await
}

/// Middleware for REST rate limiting.
pub async fn api_rate_limit(req: Request<Body>, next: Next) -> Response {
    limited(req, next, |l| &l.api).await
}

/// Middleware for WebSocket upgrade rate limiting.
pub async fn ws_rate_limit(req: Request<Body>, next: Next) -> Response {
    limited(req, next, |l| &l.ws).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(peer: &str, headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder().uri("/api/looprooms/r1");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let mut req = builder.body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(peer.parse::<SocketAddr>().unwrap()));
        req
    }

    #[test]
    fn test_proxy_headers_trusted_from_loopback() {
        let req = request("127.0.0.1:4000", &[("x-forwarded-for", "203.0.113.7, 10.0.0.1")]);
        assert_eq!(client_ip(&req), "203.0.113.7");

        let req = request("[::1]:4000", &[("x-real-ip", "198.51.100.2")]);
        assert_eq!(client_ip(&req), "198.51.100.2");
    }

    #[test]
    fn test_proxy_headers_ignored_from_remote_peer() {
        let req = request("192.0.2.10:5000", &[("x-forwarded-for", "203.0.113.7")]);
        assert_eq!(client_ip(&req), "192.0.2.10");
    }

    #[test]
    fn test_missing_connect_info() {
        let req = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(client_ip(&req), "unknown");
    }
}
