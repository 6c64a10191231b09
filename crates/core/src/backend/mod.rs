//! Collaborator contracts for the managed backend.
//!
//! The portal core is a decision layer over an external identity provider,
//! relational store and object store. These traits are the logical
//! operations it consumes; no wire format is implied. All operations are
//! awaited by the caller before proceeding, never fire-and-forget.
//!
//! [`memory`] holds the in-memory reference implementations used by the
//! workspace binary and the test suites.

pub mod memory;

use caregate_types::{DocumentRef, RequestId, UserId, VerificationStatus};
use chrono::{DateTime, Utc};

use crate::claims::{self, ClaimMap};
use crate::error::PortalResult;
use crate::notify::Notification;
use crate::verification::{StatusCounts, VerificationRequest};
use caregate_types::RoleSet;

/// A signed-in (or looked-up) identity as the provider reports it.
///
/// Owned by the provider; the core only reads it. Roles are derived from the
/// claim map on every read, never stored separately.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Identity {
    pub id: UserId,
    pub email: String,
    pub display_name: String,
    pub claims: ClaimMap,
}

impl Identity {
    /// Resolves this identity's canonical role set from its claims.
    pub fn roles(&self) -> RoleSet {
        claims::resolve(&self.claims)
    }
}

/// Registration payload passed to [`IdentityProvider::sign_up`].
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub password: String,
    pub display_name: String,
    pub claims: ClaimMap,
}

/// The external identity provider (sessions, credentials, claims).
#[allow(async_fn_in_trait)]
pub trait IdentityProvider: Send + Sync {
    /// Registers a new account and opens a session for it.
    async fn sign_up(&self, account: NewAccount) -> PortalResult<Identity>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> PortalResult<Identity>;

    /// Completes an external-provider (OAuth-style) sign-in.
    async fn sign_in_with_provider(&self) -> PortalResult<Identity>;

    async fn sign_out(&self) -> PortalResult<()>;

    async fn reset_password(&self, email: &str) -> PortalResult<()>;

    /// Replaces the claim map of `user` and returns the updated identity.
    async fn update_claims(&self, user: UserId, claims: ClaimMap) -> PortalResult<Identity>;

    /// Looks up an identity by id (backed by the provider's profile table).
    async fn identity(&self, user: UserId) -> PortalResult<Identity>;

    async fn current_session(&self) -> Option<Identity>;
}

/// Relational storage for verification requests.
#[allow(async_fn_in_trait)]
pub trait VerificationStore: Send + Sync {
    async fn insert(&self, request: VerificationRequest) -> PortalResult<()>;

    /// Compare-and-set on the status column, as one atomic single-row write.
    ///
    /// Fails with a state error if the request is missing or its current
    /// status is not `from`, leaving the row untouched. On success the
    /// reviewer, notes and `updated_at` fields are replaced along with the
    /// status, and the updated row is returned.
    async fn transition(
        &self,
        id: RequestId,
        from: VerificationStatus,
        to: VerificationStatus,
        reviewer: Option<UserId>,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) -> PortalResult<VerificationRequest>;

    /// The most-recently-created request for `subject`, which is the only
    /// one authoritative for gating.
    async fn latest_for_subject(&self, subject: UserId) -> PortalResult<Option<VerificationRequest>>;

    /// All requests, newest first.
    async fn list_all(&self) -> PortalResult<Vec<VerificationRequest>>;

    async fn count_by_status(&self) -> PortalResult<StatusCounts>;
}

/// Object storage for uploaded credential documents.
#[allow(async_fn_in_trait)]
pub trait DocumentStore: Send + Sync {
    async fn upload(&self, path: &str, bytes: Vec<u8>) -> PortalResult<DocumentRef>;

    fn public_url(&self, document: &DocumentRef) -> String;
}

/// Cross-user notification delivery.
///
/// The in-process [`crate::notify::NotificationBus`] only models local
/// display state; getting a notification to another user's session goes
/// through whatever transport the backend provides, behind this trait.
#[allow(async_fn_in_trait)]
pub trait NotificationSender: Send + Sync {
    async fn deliver(&self, recipient: UserId, notification: Notification) -> PortalResult<()>;
}
