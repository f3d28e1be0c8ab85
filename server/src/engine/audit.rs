use std::future::Future;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::error::{RoomError, RoomResult};

/// Actions too frequent to log on success at `info`.
const CHATTY_ACTIONS: &[&str] = &["typing"];

/// Run a room action and log its outcome once the result is known.
///
/// Successes log at `info`, caller rejections at `debug` (or `warn` for
/// permission and rate-limit failures), internal failures at `error` with
/// the operator-only detail.
pub async fn audited<T, F>(
    action: &'static str,
    actor: &str,
    looproom_id: Option<&str>,
    fut: F,
) -> RoomResult<T>
where
    F: Future<Output = RoomResult<T>>,
{
    let started = Instant::now();
    let result = fut.await;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    let room = looproom_id.unwrap_or("-");

    match &result {
        Ok(_) if CHATTY_ACTIONS.contains(&action) => {
            debug!(action, actor, room, elapsed_ms, "action ok");
        }
        Ok(_) => info!(action, actor, room, elapsed_ms, "action ok"),
        Err(RoomError::Internal(detail)) => {
            error!(action, actor, room, elapsed_ms, %detail, "action failed");
        }
        Err(e @ (RoomError::Forbidden(_) | RoomError::RateLimited { .. })) => {
            warn!(action, actor, room, code = e.code(), error = %e, "action rejected");
        }
        Err(e) => debug!(action, actor, room, code = e.code(), error = %e, "action rejected"),
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_passes_result_through() {
        let ok = audited("send-message", "u1", Some("r1"), async { Ok::<_, RoomError>(5) }).await;
        assert_eq!(ok.unwrap(), 5);

        let err = audited("end-session", "u1", None, async {
            Err::<(), _>(RoomError::Conflict("not live".into()))
        })
        .await;
        assert!(matches!(err, Err(RoomError::Conflict(_))));
    }
}
