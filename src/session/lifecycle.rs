//! Lifecycle reaper
//!
//! One timer task per session. When the deadline passes, an idle session is detached
//! from its pool and destroyed; a session in use gets its deadline pushed out instead.

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::pool::SessionPool;
use super::Session;

/// Arm the reaper for `session`.
///
/// The task ends when the session is reaped or destroyed by someone else.
pub fn arm_reaper(
    session: Arc<Session>,
    pool: Weak<SessionPool>,
    extension: Duration,
) -> JoinHandle<()> {
    let cancel = session.cancellation();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(session.time_to_expiry()) => {}
            }

            // The deadline may have moved while we slept
            if session.time_to_expiry() > Duration::ZERO {
                continue;
            }

            let idle = match pool.upgrade() {
                Some(pool) => pool.detach_if_idle(&session),
                None => !session.in_use() && session.retire(),
            };

            if idle {
                if let Err(e) = session.remove_dir().await {
                    warn!(session = %session.id(), "Failed to remove expired session: {}", e);
                }
                info!(session = %session.id(), runtime = %session.runtime(), "Expired session reaped");
                break;
            }

            let expires_at = session.extend_expiry(extension);
            debug!(session = %session.id(), %expires_at, "Session in use, expiry extended");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeKind;
    use tempfile::tempdir;

    fn expiring_session(root: &std::path::Path, ttl: Duration) -> Arc<Session> {
        let dir = root.join(crate::session::generate_session_id());
        std::fs::create_dir_all(&dir).unwrap();
        let session = Arc::new(Session::new("reap-me", RuntimeKind::Py, dir, ttl));
        session.mark_ready();
        session
    }

    #[tokio::test]
    async fn test_idle_session_is_reaped() {
        let root = tempdir().unwrap();
        let session = expiring_session(root.path(), Duration::from_millis(30));

        let handle = arm_reaper(session.clone(), Weak::new(), Duration::from_millis(30));
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(session.is_destroyed());
        assert!(!session.dir().exists());
    }

    #[tokio::test]
    async fn test_session_in_use_survives_expiry() {
        let root = tempdir().unwrap();
        let session = expiring_session(root.path(), Duration::from_millis(30));
        session.set_in_use(true);
        let first_deadline = session.expires_at();

        let handle = arm_reaper(session.clone(), Weak::new(), Duration::from_millis(40));
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(!session.is_destroyed());
        assert!(session.dir().exists());
        assert!(session.expires_at() > first_deadline);

        // Released: the next expiry reclaims it
        session.set_in_use(false);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(!session.dir().exists());
    }

    #[tokio::test]
    async fn test_destroyed_session_stops_reaper() {
        let root = tempdir().unwrap();
        let session = expiring_session(root.path(), Duration::from_secs(600));

        let handle = arm_reaper(session.clone(), Weak::new(), Duration::from_secs(10));
        session.destroy().await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
