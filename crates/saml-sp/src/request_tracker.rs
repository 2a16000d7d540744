use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

/// How long an emitted AuthnRequest ID stays correlatable. IdP logins with
/// user interaction can take a while.
const REQUEST_TTL: Duration = Duration::from_secs(15 * 60);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// In-process store of outstanding AuthnRequest IDs, consulted by the
/// InResponseTo checks. Entries expire after [`REQUEST_TTL`] and are consumed
/// on acceptance, so a tracked ID correlates at most one response. The store
/// does not survive a restart.
#[derive(Clone)]
pub struct RequestTracker {
    inner: Arc<DashMap<String, DateTime<Utc>>>,
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestTracker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }

    pub fn remember(&self, request_id: String) {
        self.inner.insert(request_id, Utc::now());
    }

    /// All request IDs still inside their TTL.
    pub fn outstanding(&self) -> Vec<String> {
        let now = Utc::now();
        self.inner
            .iter()
            .filter(|entry| !expired(*entry.value(), now))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Removes the ID, returning whether it was present and fresh.
    pub fn consume(&self, request_id: &str) -> bool {
        match self.inner.remove(request_id) {
            Some((_, issued_at)) => !expired(issued_at, Utc::now()),
            None => false,
        }
    }

    fn cleanup_expired(&self) {
        let now = Utc::now();
        self.inner.retain(|_, issued_at| !expired(*issued_at, now));
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

fn expired(issued_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    let elapsed = now
        .signed_duration_since(issued_at)
        .to_std()
        .unwrap_or(Duration::ZERO);
    elapsed > REQUEST_TTL
}

pub async fn request_cleanup_task(tracker: RequestTracker) {
    let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
    loop {
        interval.tick().await;
        let before = tracker.len();
        tracker.cleanup_expired();
        let removed = before - tracker.len();
        if removed > 0 {
            tracing::info!(removed, "cleaned up expired request IDs");
        }
    }
}
