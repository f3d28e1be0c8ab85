pub mod audit;
pub mod events;
pub mod hub;
pub mod looproom;
pub mod moderation;
pub mod permissions;
pub mod rate_limiter;
pub mod room_manager;
pub mod session_lifecycle;
pub mod validation;
