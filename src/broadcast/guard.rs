//! Pluggable session authorization
//!
//! Embedders hook publish admission by installing a [`SessionGuard`] on the
//! broadcaster. `check` runs when a session asks to publish; returning
//! false terminates that session cleanly. `end` runs when a publisher
//! session tears down.

use async_trait::async_trait;

use crate::session::SessionInfo;

/// Policy hook consulted at publish start and publisher teardown.
#[async_trait]
pub trait SessionGuard: Send + Sync {
    /// Decide whether the session may publish. The session's stream key
    /// and publishing type are populated by the time this runs.
    async fn check(&self, session: &SessionInfo) -> bool;

    /// Observe the end of a publisher session.
    async fn end(&self, session: &SessionInfo);
}

/// Guard that admits every publisher.
pub struct AllowAll;

#[async_trait]
impl SessionGuard for AllowAll {
    async fn check(&self, _session: &SessionInfo) -> bool {
        true
    }

    async fn end(&self, _session: &SessionInfo) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allow_all() {
        let guard = AllowAll;
        let info = SessionInfo {
            id: "s1".into(),
            app: "app".into(),
            tc_url: None,
            stream_key: Some("key".into()),
            publishing_type: None,
        };
        assert!(guard.check(&info).await);
        guard.end(&info).await;
    }
}
