pub mod looprooms;
pub mod messages;
pub mod moderation_log;
pub mod participants;
pub mod reactions;
pub mod sessions;
pub mod users;
