//! In-memory reference backend.
//!
//! These implementations stand in for the managed backend during local runs
//! and tests. They keep the same observable contract the real collaborators
//! have: atomic single-row status writes, a realtime change feed on the
//! verification table, and per-recipient notification delivery.

use std::collections::HashMap;

use caregate_types::{DocumentRef, NotificationId, RequestId, UserId, VerificationStatus};
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex, RwLock};

use crate::backend::{
    DocumentStore, Identity, IdentityProvider, NewAccount, NotificationSender, VerificationStore,
};
use crate::claims::ClaimMap;
use crate::error::{PortalError, PortalResult};
use crate::notify::{Notification, NotificationBus};
use crate::realtime::ChangeEvent;
use crate::verification::{StatusCounts, VerificationRequest};

#[derive(Debug, Clone)]
struct StoredAccount {
    identity: Identity,
    password: String,
}

/// Identity provider over a process-local account table.
#[derive(Default)]
pub struct MemoryIdentityProvider {
    accounts: RwLock<HashMap<UserId, StoredAccount>>,
    session: RwLock<Option<Identity>>,
    /// Identity the simulated external provider hands back on OAuth sign-in.
    provider_identity: RwLock<Option<Identity>>,
}

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages the identity returned by the next external-provider sign-in.
    pub async fn link_external_identity(&self, identity: Identity) {
        *self.provider_identity.write().await = Some(identity);
    }

    async fn open_session(&self, identity: Identity) -> Identity {
        *self.session.write().await = Some(identity.clone());
        identity
    }
}

impl IdentityProvider for MemoryIdentityProvider {
    async fn sign_up(&self, account: NewAccount) -> PortalResult<Identity> {
        let mut accounts = self.accounts.write().await;
        if accounts
            .values()
            .any(|stored| stored.identity.email == account.email)
        {
            return Err(PortalError::DuplicateRegistration(account.email));
        }

        let identity = Identity {
            id: UserId::new(),
            email: account.email,
            display_name: account.display_name,
            claims: account.claims,
        };
        accounts.insert(
            identity.id,
            StoredAccount {
                identity: identity.clone(),
                password: account.password,
            },
        );
        drop(accounts);

        Ok(self.open_session(identity).await)
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> PortalResult<Identity> {
        let accounts = self.accounts.read().await;
        let stored = accounts
            .values()
            .find(|stored| stored.identity.email == email)
            .ok_or(PortalError::InvalidCredentials)?;
        if stored.password != password {
            return Err(PortalError::InvalidCredentials);
        }
        let identity = stored.identity.clone();
        drop(accounts);

        Ok(self.open_session(identity).await)
    }

    async fn sign_in_with_provider(&self) -> PortalResult<Identity> {
        let staged = self
            .provider_identity
            .read()
            .await
            .clone()
            .ok_or_else(|| PortalError::Provider("no external account linked".into()))?;

        let mut accounts = self.accounts.write().await;
        accounts
            .entry(staged.id)
            .or_insert_with(|| StoredAccount {
                identity: staged.clone(),
                password: String::new(),
            });
        drop(accounts);

        Ok(self.open_session(staged).await)
    }

    async fn sign_out(&self) -> PortalResult<()> {
        *self.session.write().await = None;
        Ok(())
    }

    async fn reset_password(&self, email: &str) -> PortalResult<()> {
        // Mirrors provider behaviour: no account enumeration, unknown
        // addresses get the same acknowledgement.
        tracing::info!(email, "password reset requested");
        Ok(())
    }

    async fn update_claims(&self, user: UserId, claims: ClaimMap) -> PortalResult<Identity> {
        let mut accounts = self.accounts.write().await;
        let stored = accounts
            .get_mut(&user)
            .ok_or_else(|| PortalError::Provider(format!("unknown user {user}")))?;
        stored.identity.claims = claims;
        let updated = stored.identity.clone();
        drop(accounts);

        let mut session = self.session.write().await;
        if session.as_ref().map(|identity| identity.id) == Some(user) {
            *session = Some(updated.clone());
        }
        Ok(updated)
    }

    async fn identity(&self, user: UserId) -> PortalResult<Identity> {
        self.accounts
            .read()
            .await
            .get(&user)
            .map(|stored| stored.identity.clone())
            .ok_or_else(|| PortalError::Provider(format!("unknown user {user}")))
    }

    async fn current_session(&self) -> Option<Identity> {
        self.session.read().await.clone()
    }
}

/// Verification request table with a broadcast change feed.
pub struct MemoryVerificationStore {
    rows: RwLock<Vec<VerificationRequest>>,
    events: broadcast::Sender<ChangeEvent>,
}

impl MemoryVerificationStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            rows: RwLock::new(Vec::new()),
            events,
        }
    }

    /// Subscribes to row-change events, the in-memory realtime feed.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: ChangeEvent) {
        // No receivers is fine; the feed is best effort.
        let _ = self.events.send(event);
    }
}

impl Default for MemoryVerificationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VerificationStore for MemoryVerificationStore {
    async fn insert(&self, request: VerificationRequest) -> PortalResult<()> {
        self.rows.write().await.push(request.clone());
        self.publish(ChangeEvent::RequestInserted(request));
        Ok(())
    }

    async fn transition(
        &self,
        id: RequestId,
        from: VerificationStatus,
        to: VerificationStatus,
        reviewer: Option<UserId>,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) -> PortalResult<VerificationRequest> {
        let mut rows = self.rows.write().await;
        let row = rows
            .iter_mut()
            .find(|row| row.id == id)
            .ok_or(PortalError::RequestNotFound(id))?;
        if row.status != from {
            return Err(PortalError::AlreadyDecided {
                id,
                status: row.status,
            });
        }

        row.status = to;
        row.reviewer = reviewer;
        row.reviewer_notes = notes;
        row.updated_at = at;
        let updated = row.clone();
        drop(rows);

        self.publish(ChangeEvent::RequestUpdated(updated.clone()));
        Ok(updated)
    }

    async fn latest_for_subject(
        &self,
        subject: UserId,
    ) -> PortalResult<Option<VerificationRequest>> {
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .filter(|row| row.subject == subject)
            .max_by_key(|row| row.created_at)
            .cloned())
    }

    async fn list_all(&self) -> PortalResult<Vec<VerificationRequest>> {
        let mut rows = self.rows.read().await.clone();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn count_by_status(&self) -> PortalResult<StatusCounts> {
        let rows = self.rows.read().await;
        let mut counts = StatusCounts::default();
        for row in rows.iter() {
            match row.status {
                VerificationStatus::Pending => counts.pending += 1,
                VerificationStatus::Approved => counts.approved += 1,
                VerificationStatus::Rejected => counts.rejected += 1,
            }
        }
        Ok(counts)
    }
}

/// Object store over a path-keyed map, optionally quota-limited.
pub struct MemoryDocumentStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
    max_object_bytes: Option<usize>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            max_object_bytes: None,
        }
    }

    /// A store that refuses objects larger than `max_object_bytes`, for
    /// exercising upload-failure paths.
    pub fn with_quota(max_object_bytes: usize) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            max_object_bytes: Some(max_object_bytes),
        }
    }

    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MemoryDocumentStore {
    async fn upload(&self, path: &str, bytes: Vec<u8>) -> PortalResult<DocumentRef> {
        if let Some(limit) = self.max_object_bytes {
            if bytes.len() > limit {
                return Err(PortalError::DocumentUpload(format!(
                    "object of {} bytes exceeds the {} byte limit",
                    bytes.len(),
                    limit
                )));
            }
        }
        self.objects.write().await.insert(path.to_owned(), bytes);
        Ok(DocumentRef::new(path))
    }

    fn public_url(&self, document: &DocumentRef) -> String {
        format!("memory://objects/{}", document.as_str())
    }
}

/// Delivers notifications into a per-recipient [`NotificationBus`].
#[derive(Default)]
pub struct MemoryNotificationSender {
    inboxes: Mutex<HashMap<UserId, NotificationBus>>,
}

impl MemoryNotificationSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn notifications_for(&self, recipient: UserId) -> Vec<Notification> {
        self.inboxes
            .lock()
            .await
            .get(&recipient)
            .map(|bus| bus.items().to_vec())
            .unwrap_or_default()
    }

    pub async fn unread_count(&self, recipient: UserId) -> usize {
        self.inboxes
            .lock()
            .await
            .get(&recipient)
            .map(NotificationBus::unread_count)
            .unwrap_or(0)
    }

    pub async fn mark_read(&self, recipient: UserId, id: NotificationId) -> bool {
        self.inboxes
            .lock()
            .await
            .get_mut(&recipient)
            .map(|bus| bus.mark_read(id))
            .unwrap_or(false)
    }

    pub async fn mark_all_read(&self, recipient: UserId) {
        if let Some(bus) = self.inboxes.lock().await.get_mut(&recipient) {
            bus.mark_all_read();
        }
    }

    pub async fn remove(&self, recipient: UserId, id: NotificationId) -> bool {
        self.inboxes
            .lock()
            .await
            .get_mut(&recipient)
            .map(|bus| bus.remove(id))
            .unwrap_or(false)
    }

    pub async fn clear_all(&self, recipient: UserId) {
        if let Some(bus) = self.inboxes.lock().await.get_mut(&recipient) {
            bus.clear_all();
        }
    }
}

impl NotificationSender for MemoryNotificationSender {
    async fn deliver(&self, recipient: UserId, notification: Notification) -> PortalResult<()> {
        self.inboxes
            .lock()
            .await
            .entry(recipient)
            .or_default()
            .add(notification);
        Ok(())
    }
}
