//! Realtime change-feed handling.
//!
//! The backend publishes typed row-change events out of band. Subscribers
//! apply them against local state through [`RequestCache`]; the transport
//! callback never re-enters application logic synchronously. Events go
//! through a channel and are applied by the consuming task.

use std::collections::HashMap;

use caregate_types::UserId;
use tokio::sync::broadcast;

use crate::verification::VerificationRequest;

/// Row-level change on the verification request table.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    RequestInserted(VerificationRequest),
    RequestUpdated(VerificationRequest),
}

impl ChangeEvent {
    pub fn request(&self) -> &VerificationRequest {
        match self {
            ChangeEvent::RequestInserted(request) | ChangeEvent::RequestUpdated(request) => request,
        }
    }
}

/// Local view of each subject's authoritative (latest) verification request.
///
/// Merging is last-write-wins keyed on `updated_at`: transitions are
/// server-confirmed before being treated as committed, so a stale event can
/// never clobber a newer confirmed row, and a concurrent local optimistic
/// update is only replaced by an event that is at least as new.
#[derive(Debug, Default)]
pub struct RequestCache {
    latest: HashMap<UserId, VerificationRequest>,
}

impl RequestCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges one change event. Returns `true` if the cache changed.
    pub fn apply(&mut self, event: &ChangeEvent) -> bool {
        let incoming = event.request();
        match self.latest.get(&incoming.subject) {
            Some(current)
                if current.created_at > incoming.created_at
                    || (current.id == incoming.id && current.updated_at > incoming.updated_at) =>
            {
                false
            }
            _ => {
                self.latest.insert(incoming.subject, incoming.clone());
                true
            }
        }
    }

    pub fn latest_for(&self, subject: UserId) -> Option<&VerificationRequest> {
        self.latest.get(&subject)
    }
}

/// Drains a broadcast subscription into a shared cache until the feed
/// closes. Lagged receivers skip ahead; a lag only means missed
/// intermediate states, and last-write-wins merging absorbs that.
pub fn follow(
    mut feed: broadcast::Receiver<ChangeEvent>,
    cache: std::sync::Arc<tokio::sync::Mutex<RequestCache>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match feed.recv().await {
                Ok(event) => {
                    cache.lock().await.apply(&event);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "realtime feed lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
