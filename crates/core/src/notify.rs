//! In-process notification log with read/unread tracking.
//!
//! The bus models local display state only. It is not a delivery transport:
//! cross-user delivery happens through
//! [`crate::backend::NotificationSender`], whose implementations feed a bus
//! per recipient. Contents are session-scoped and not persisted.

use caregate_types::{NotificationCategory, NotificationId};
use chrono::{DateTime, Utc};

/// One user-facing event on the bus.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub title: String,
    pub message: String,
    pub category: NotificationCategory,
    pub created_at: DateTime<Utc>,
    pub read: bool,
    /// Deep link the display surface navigates to on activation.
    pub link: Option<String>,
    pub action_label: Option<String>,
}

impl Notification {
    pub fn new(
        title: impl Into<String>,
        message: impl Into<String>,
        category: NotificationCategory,
    ) -> Self {
        Self {
            id: NotificationId::new(),
            title: title.into(),
            message: message.into(),
            category,
            created_at: Utc::now(),
            read: false,
            link: None,
            action_label: None,
        }
    }

    pub fn with_link(mut self, link: impl Into<String>, action_label: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self.action_label = Some(action_label.into());
        self
    }
}

/// Ordered notification log, most recent first.
#[derive(Debug, Clone, Default)]
pub struct NotificationBus {
    items: Vec<Notification>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepends a notification and returns its id. Incoming items are always
    /// stored unread, whatever the caller set.
    pub fn add(&mut self, mut notification: Notification) -> NotificationId {
        notification.read = false;
        let id = notification.id;
        self.items.insert(0, notification);
        id
    }

    /// Marks one notification read. Idempotent: returns `false` if the id is
    /// unknown or already read, and the unread count is unaffected either
    /// way.
    pub fn mark_read(&mut self, id: NotificationId) -> bool {
        match self.items.iter_mut().find(|n| n.id == id) {
            Some(n) if !n.read => {
                n.read = true;
                true
            }
            _ => false,
        }
    }

    pub fn mark_all_read(&mut self) {
        for n in &mut self.items {
            n.read = true;
        }
    }

    /// Removes one notification, returning `true` if it was present.
    pub fn remove(&mut self, id: NotificationId) -> bool {
        let before = self.items.len();
        self.items.retain(|n| n.id != id);
        self.items.len() != before
    }

    pub fn clear_all(&mut self) {
        self.items.clear();
    }

    /// Count of unread items; derived, so it can never go negative.
    pub fn unread_count(&self) -> usize {
        self.items.iter().filter(|n| !n.read).count()
    }

    pub fn items(&self) -> &[Notification] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
