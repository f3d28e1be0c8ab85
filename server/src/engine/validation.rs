/// Maximum stream URL length.
pub const MAX_STREAM_URL_LENGTH: usize = 2048;

/// Maximum mood tag length.
pub const MAX_MOOD_LENGTH: usize = 32;

/// Maximum reaction length (an emoji, possibly with modifiers).
pub const MAX_EMOJI_LENGTH: usize = 16;

/// Maximum room name length.
pub const MAX_ROOM_NAME_LENGTH: usize = 80;

/// Longest allowed slow-mode interval (one hour).
pub const MAX_SLOW_MODE_SECONDS: i64 = 3600;

pub const MAX_REASON_LENGTH: usize = 500;

/// Upper bound for a room's participant cap. Zero means uncapped.
pub const MAX_PARTICIPANTS_CAP: i64 = 10_000;

const STREAM_SCHEMES: &[&str] = &["https://", "http://", "rtmps://", "rtmp://"];

/// Clean user-supplied message content: strip control characters other
/// than newline and tab, then trim. Empty results are rejected.
pub fn sanitize_content(content: &str, max_len: usize) -> Result<String, String> {
    let cleaned: String = content
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() {
        return Err("invalid content".into());
    }
    if cleaned.chars().count() > max_len {
        return Err(format!("message too long (max {max_len} characters)"));
    }
    Ok(cleaned.to_string())
}

/// Validate a stream URL. Must use an http(s) or rtmp(s) scheme.
pub fn validate_stream_url(url: &str) -> Result<(), String> {
    if url.len() > MAX_STREAM_URL_LENGTH {
        return Err(format!(
            "stream URL too long (max {} characters)",
            MAX_STREAM_URL_LENGTH
        ));
    }
    if url.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err("stream URL cannot contain whitespace".into());
    }
    let Some(rest) = STREAM_SCHEMES.iter().find_map(|s| url.strip_prefix(s)) else {
        return Err("stream URL must use http, https, rtmp or rtmps".into());
    };
    if rest.is_empty() || rest.starts_with('/') {
        return Err("stream URL is missing a host".into());
    }
    Ok(())
}

/// Normalize an optional mood tag. Blank moods become `None`.
pub fn normalize_mood(mood: Option<&str>) -> Result<Option<String>, String> {
    let Some(mood) = mood.map(str::trim).filter(|m| !m.is_empty()) else {
        return Ok(None);
    };
    if mood.chars().count() > MAX_MOOD_LENGTH {
        return Err(format!("mood too long (max {} characters)", MAX_MOOD_LENGTH));
    }
    if !mood
        .chars()
        .all(|c| c.is_alphanumeric() || c == ' ' || c == '-' || c == '_')
    {
        return Err("mood can only contain letters, numbers, spaces, hyphens and underscores".into());
    }
    Ok(Some(mood.to_lowercase()))
}

pub fn validate_emoji(emoji: &str) -> Result<(), String> {
    if emoji.is_empty() {
        return Err("emoji cannot be empty".into());
    }
    if emoji.chars().count() > MAX_EMOJI_LENGTH {
        return Err("emoji too long".into());
    }
    if emoji.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err("emoji cannot contain whitespace".into());
    }
    Ok(())
}

pub fn validate_room_name(name: &str) -> Result<(), String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("room name cannot be empty".into());
    }
    if name.chars().count() > MAX_ROOM_NAME_LENGTH {
        return Err(format!(
            "room name too long (max {} characters)",
            MAX_ROOM_NAME_LENGTH
        ));
    }
    Ok(())
}

pub fn validate_slow_mode(seconds: i64) -> Result<(), String> {
    if !(0..=MAX_SLOW_MODE_SECONDS).contains(&seconds) {
        return Err(format!(
            "slow mode must be between 0 and {} seconds",
            MAX_SLOW_MODE_SECONDS
        ));
    }
    Ok(())
}

pub fn validate_max_participants(max: i64) -> Result<(), String> {
    if !(0..=MAX_PARTICIPANTS_CAP).contains(&max) {
        return Err(format!(
            "max participants must be between 0 and {}",
            MAX_PARTICIPANTS_CAP
        ));
    }
    Ok(())
}

/// Normalize an optional moderation reason. Blank reasons become `None`.
pub fn normalize_reason(reason: Option<&str>) -> Result<Option<String>, String> {
    let Some(reason) = reason.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(None);
    };
    if reason.chars().count() > MAX_REASON_LENGTH {
        return Err(format!("reason too long (max {} characters)", MAX_REASON_LENGTH));
    }
    Ok(Some(reason.to_string()))
}
