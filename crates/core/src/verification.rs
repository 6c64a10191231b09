//! Credential-verification workflow engine.
//!
//! A professional submits a licence plus supporting document; an admin
//! approves or rejects it. `pending` is the only non-terminal state. The
//! engine never overwrites prior requests: each submission is a new record
//! and gating keys off the most-recently-created one. Approval promotes the
//! subject to `healthstaff` at the identity layer in the same logical
//! transaction as the status write, with a compensating revert if the
//! promotion fails, so authorization and verification can never disagree.

use std::sync::Arc;

use caregate_types::{
    DocumentRef, NonEmptyText, NotificationCategory, RequestId, Role, UserId, VerificationStatus,
};
use chrono::{DateTime, Utc};

use crate::backend::{
    DocumentStore, IdentityProvider, NotificationSender, VerificationStore,
};
use crate::claims::{self, ROLES_CLAIM};
use crate::error::{PortalError, PortalResult};
use crate::guard::Route;
use crate::notify::Notification;

/// One credential submission and its adjudication state.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VerificationRequest {
    pub id: RequestId,
    pub subject: UserId,
    /// Display name of the submitting professional, denormalised for the
    /// admin list view.
    pub subject_name: String,
    pub license_number: NonEmptyText,
    pub specialization: NonEmptyText,
    pub document: DocumentRef,
    pub status: VerificationStatus,
    pub reviewer: Option<UserId>,
    pub reviewer_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Dashboard aggregates over all requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
}

/// Payload for [`VerificationService::submit`].
#[derive(Debug, Clone)]
pub struct Submission {
    pub subject: UserId,
    pub subject_name: String,
    pub license_number: String,
    pub specialization: String,
    pub document_name: String,
    pub document: Vec<u8>,
}

/// The workflow engine, wired to its backend collaborators.
pub struct VerificationService<S, D, P, N> {
    store: Arc<S>,
    documents: Arc<D>,
    identities: Arc<P>,
    notifier: Arc<N>,
}

impl<S, D, P, N> VerificationService<S, D, P, N>
where
    S: VerificationStore,
    D: DocumentStore,
    P: IdentityProvider,
    N: NotificationSender,
{
    pub fn new(store: Arc<S>, documents: Arc<D>, identities: Arc<P>, notifier: Arc<N>) -> Self {
        Self {
            store,
            documents,
            identities,
            notifier,
        }
    }

    /// Creates a new `pending` request for the subject.
    ///
    /// Input is validated before any backend call; an upload failure aborts
    /// the submission with no partial request. Resubmission policy: a
    /// `rejected` latest request is superseded by the new record, while a
    /// `pending` or `approved` latest request blocks submission.
    pub async fn submit(&self, submission: Submission) -> PortalResult<VerificationRequest> {
        let license_number = NonEmptyText::new(&submission.license_number)
            .map_err(|_| PortalError::InvalidInput("licence number is required".into()))?;
        let specialization = NonEmptyText::new(&submission.specialization)
            .map_err(|_| PortalError::InvalidInput("specialization is required".into()))?;
        let document_name = NonEmptyText::new(&submission.document_name)
            .map_err(|_| PortalError::InvalidInput("document file name is required".into()))?;
        if submission.document.is_empty() {
            return Err(PortalError::InvalidInput(
                "credential document is required".into(),
            ));
        }

        if let Some(latest) = self.store.latest_for_subject(submission.subject).await? {
            match latest.status {
                VerificationStatus::Pending => return Err(PortalError::SubmissionAlreadyPending),
                VerificationStatus::Approved => {
                    return Err(PortalError::InvalidInput(
                        "credentials are already verified".into(),
                    ))
                }
                VerificationStatus::Rejected => {
                    // Superseded: the new record becomes the latest and the
                    // rejected one stops being authoritative.
                }
            }
        }

        let path = format!("verification/{}/{}", submission.subject, document_name);
        let document = self.documents.upload(&path, submission.document).await?;

        let now = Utc::now();
        let request = VerificationRequest {
            id: RequestId::new(),
            subject: submission.subject,
            subject_name: submission.subject_name,
            license_number,
            specialization,
            document,
            status: VerificationStatus::Pending,
            reviewer: None,
            reviewer_notes: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert(request.clone()).await?;

        tracing::info!(
            request = %request.id,
            subject = %request.subject,
            "verification request submitted"
        );
        Ok(request)
    }

    /// Approves a `pending` request and promotes the subject to
    /// `healthstaff`.
    ///
    /// The status write is a compare-and-set: a request already decided
    /// fails with a state error and stays untouched, so a double-submitted
    /// admin action applies exactly once. The subject is notified only
    /// after the status change is durable and the promotion has happened.
    pub async fn approve(
        &self,
        id: RequestId,
        reviewer: UserId,
        notes: Option<String>,
    ) -> PortalResult<VerificationRequest> {
        let approved = self
            .store
            .transition(
                id,
                VerificationStatus::Pending,
                VerificationStatus::Approved,
                Some(reviewer),
                notes,
                Utc::now(),
            )
            .await?;

        if let Err(promote_error) = self.promote_to_healthstaff(approved.subject).await {
            tracing::error!(
                request = %id,
                subject = %approved.subject,
                error = %promote_error,
                "role promotion failed, reverting approval"
            );
            return match self
                .store
                .transition(
                    id,
                    VerificationStatus::Approved,
                    VerificationStatus::Pending,
                    None,
                    None,
                    Utc::now(),
                )
                .await
            {
                Ok(_) => Err(promote_error),
                Err(revert_error) => Err(PortalError::CompensationFailed {
                    promote_error: Box::new(promote_error),
                    revert_error: Box::new(revert_error),
                }),
            };
        }

        self.notifier
            .deliver(
                approved.subject,
                Notification::new(
                    "Credentials verified",
                    format!(
                        "Your {} credentials were approved. Clinical review is now available.",
                        approved.specialization
                    ),
                    NotificationCategory::Success,
                )
                .with_link(Route::StaffDashboard.path(), "Open staff dashboard"),
            )
            .await?;

        tracing::info!(request = %id, reviewer = %reviewer, "verification request approved");
        Ok(approved)
    }

    /// Rejects a `pending` request. Notes are mandatory: a rejection
    /// without an explanation is refused before any backend call.
    pub async fn reject(
        &self,
        id: RequestId,
        reviewer: UserId,
        notes: &str,
    ) -> PortalResult<VerificationRequest> {
        let notes =
            NonEmptyText::new(notes).map_err(|_| PortalError::MissingRejectionNotes)?;

        let rejected = self
            .store
            .transition(
                id,
                VerificationStatus::Pending,
                VerificationStatus::Rejected,
                Some(reviewer),
                Some(notes.as_str().to_owned()),
                Utc::now(),
            )
            .await?;

        self.notifier
            .deliver(
                rejected.subject,
                Notification::new(
                    "Verification rejected",
                    format!("Your credential submission was rejected: {notes}"),
                    NotificationCategory::Warning,
                )
                .with_link(Route::VerificationStatus.path(), "Review status"),
            )
            .await?;

        tracing::info!(request = %id, reviewer = %reviewer, "verification request rejected");
        Ok(rejected)
    }

    /// All requests, newest first, for the admin surface.
    pub async fn list_all(&self) -> PortalResult<Vec<VerificationRequest>> {
        self.store.list_all().await
    }

    pub async fn count_by_status(&self) -> PortalResult<StatusCounts> {
        self.store.count_by_status().await
    }

    pub async fn latest_for_subject(
        &self,
        subject: UserId,
    ) -> PortalResult<Option<VerificationRequest>> {
        self.store.latest_for_subject(subject).await
    }

    async fn promote_to_healthstaff(&self, subject: UserId) -> PortalResult<()> {
        let identity = self.identities.identity(subject).await?;
        let mut roles = identity.roles();
        roles.insert(Role::HealthStaff);

        let mut updated = identity.claims.clone();
        updated.insert(ROLES_CLAIM.to_owned(), claims::roles_claim(&roles));
        self.identities.update_claims(subject, updated).await?;
        Ok(())
    }
}

/// Client-side free-text filter over the admin list: matches subject name,
/// licence number or specialization, case-insensitively. A blank query
/// matches everything.
pub fn filter_requests<'a>(
    requests: &'a [VerificationRequest],
    query: &str,
) -> Vec<&'a VerificationRequest> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return requests.iter().collect();
    }
    requests
        .iter()
        .filter(|request| {
            request.subject_name.to_lowercase().contains(&needle)
                || request
                    .license_number
                    .as_str()
                    .to_lowercase()
                    .contains(&needle)
                || request
                    .specialization
                    .as_str()
                    .to_lowercase()
                    .contains(&needle)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{
        MemoryDocumentStore, MemoryIdentityProvider, MemoryNotificationSender,
        MemoryVerificationStore,
    };
    use crate::backend::{Identity, NewAccount};
    use crate::claims::ClaimMap;
    use crate::error::ErrorKind;

    type MemoryService = VerificationService<
        MemoryVerificationStore,
        MemoryDocumentStore,
        MemoryIdentityProvider,
        MemoryNotificationSender,
    >;

    struct Fixture {
        service: MemoryService,
        identities: Arc<MemoryIdentityProvider>,
        notifier: Arc<MemoryNotificationSender>,
        subject: UserId,
    }

    async fn fixture() -> Fixture {
        fixture_with_documents(Arc::new(MemoryDocumentStore::new())).await
    }

    async fn fixture_with_documents(documents: Arc<MemoryDocumentStore>) -> Fixture {
        let store = Arc::new(MemoryVerificationStore::new());
        let identities = Arc::new(MemoryIdentityProvider::new());
        let notifier = Arc::new(MemoryNotificationSender::new());

        let subject = identities
            .sign_up(NewAccount {
                email: "dana@example.org".into(),
                password: "hunter2".into(),
                display_name: "Dana Osei".into(),
                claims: ClaimMap::new(),
            })
            .await
            .unwrap()
            .id;

        Fixture {
            service: VerificationService::new(
                store,
                documents,
                identities.clone(),
                notifier.clone(),
            ),
            identities,
            notifier,
            subject,
        }
    }

    fn submission(subject: UserId) -> Submission {
        Submission {
            subject,
            subject_name: "Dana Osei".into(),
            license_number: "MD-1234".into(),
            specialization: "radiologist".into(),
            document_name: "license.pdf".into(),
            document: b"%PDF-1.4 fake".to_vec(),
        }
    }

    #[tokio::test]
    async fn submit_creates_a_pending_request_visible_to_admins() {
        let fx = fixture().await;
        let before = fx.service.count_by_status().await.unwrap();

        let request = fx.service.submit(submission(fx.subject)).await.unwrap();
        assert_eq!(request.status, VerificationStatus::Pending);

        let all = fx.service.list_all().await.unwrap();
        assert!(all.iter().any(|r| r.id == request.id));

        let after = fx.service.count_by_status().await.unwrap();
        assert_eq!(after.pending, before.pending + 1);
    }

    #[tokio::test]
    async fn submit_rejects_missing_fields_before_any_backend_call() {
        let fx = fixture().await;

        let mut blank_license = submission(fx.subject);
        blank_license.license_number = "  ".into();
        let err = fx.service.submit(blank_license).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let mut no_document = submission(fx.subject);
        no_document.document.clear();
        let err = fx.service.submit(no_document).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        // Nothing reached the store.
        assert!(fx.service.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upload_failure_aborts_without_a_partial_request() {
        let fx = fixture_with_documents(Arc::new(MemoryDocumentStore::with_quota(4))).await;

        let err = fx.service.submit(submission(fx.subject)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(fx.service.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn approve_promotes_the_subject_and_notifies_once() {
        let fx = fixture().await;
        let request = fx.service.submit(submission(fx.subject)).await.unwrap();

        let reviewer = UserId::new();
        let approved = fx.service.approve(request.id, reviewer, None).await.unwrap();
        assert_eq!(approved.status, VerificationStatus::Approved);
        assert_eq!(approved.reviewer, Some(reviewer));

        let roles = fx.identities.identity(fx.subject).await.unwrap().roles();
        assert!(roles.contains(Role::HealthStaff));

        let inbox = fx.notifier.notifications_for(fx.subject).await;
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].category, NotificationCategory::Success);
        assert_eq!(inbox[0].link, Some(Route::StaffDashboard.path()));
    }

    #[tokio::test]
    async fn decided_requests_refuse_further_transitions() {
        let fx = fixture().await;
        let request = fx.service.submit(submission(fx.subject)).await.unwrap();
        fx.service
            .reject(request.id, UserId::new(), "document unreadable")
            .await
            .unwrap();

        let err = fx
            .service
            .approve(request.id, UserId::new(), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);

        let latest = fx
            .service
            .latest_for_subject(fx.subject)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.status, VerificationStatus::Rejected);
    }

    #[tokio::test]
    async fn reject_requires_notes_and_leaves_status_pending() {
        let fx = fixture().await;
        let request = fx.service.submit(submission(fx.subject)).await.unwrap();

        let err = fx
            .service
            .reject(request.id, UserId::new(), "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::MissingRejectionNotes));

        let latest = fx
            .service
            .latest_for_subject(fx.subject)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.status, VerificationStatus::Pending);
        assert!(fx.notifier.notifications_for(fx.subject).await.is_empty());
    }

    #[tokio::test]
    async fn concurrent_approvals_apply_exactly_once() {
        let fx = fixture().await;
        let request = fx.service.submit(submission(fx.subject)).await.unwrap();

        let (first, second) = tokio::join!(
            fx.service.approve(request.id, UserId::new(), None),
            fx.service.approve(request.id, UserId::new(), None),
        );

        let successes = [&first, &second].iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        let failure = if first.is_err() { first } else { second };
        assert_eq!(failure.unwrap_err().kind(), ErrorKind::State);
    }

    #[tokio::test]
    async fn pending_request_blocks_resubmission() {
        let fx = fixture().await;
        fx.service.submit(submission(fx.subject)).await.unwrap();

        let err = fx.service.submit(submission(fx.subject)).await.unwrap_err();
        assert!(matches!(err, PortalError::SubmissionAlreadyPending));
    }

    #[tokio::test]
    async fn rejected_request_is_superseded_by_resubmission() {
        let fx = fixture().await;
        let first = fx.service.submit(submission(fx.subject)).await.unwrap();
        fx.service
            .reject(first.id, UserId::new(), "licence number does not match")
            .await
            .unwrap();

        let second = fx.service.submit(submission(fx.subject)).await.unwrap();
        let latest = fx
            .service
            .latest_for_subject(fx.subject)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, second.id);
        assert_eq!(latest.status, VerificationStatus::Pending);

        // Both records still exist; nothing was overwritten.
        assert_eq!(fx.service.list_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_promotion_reverts_the_approval() {
        struct PromotionlessProvider {
            inner: MemoryIdentityProvider,
        }

        impl IdentityProvider for PromotionlessProvider {
            async fn sign_up(&self, account: NewAccount) -> PortalResult<Identity> {
                self.inner.sign_up(account).await
            }
            async fn sign_in_with_password(
                &self,
                email: &str,
                password: &str,
            ) -> PortalResult<Identity> {
                self.inner.sign_in_with_password(email, password).await
            }
            async fn sign_in_with_provider(&self) -> PortalResult<Identity> {
                self.inner.sign_in_with_provider().await
            }
            async fn sign_out(&self) -> PortalResult<()> {
                self.inner.sign_out().await
            }
            async fn reset_password(&self, email: &str) -> PortalResult<()> {
                self.inner.reset_password(email).await
            }
            async fn update_claims(
                &self,
                _user: UserId,
                _claims: ClaimMap,
            ) -> PortalResult<Identity> {
                Err(PortalError::Provider("claims endpoint unavailable".into()))
            }
            async fn identity(&self, user: UserId) -> PortalResult<Identity> {
                self.inner.identity(user).await
            }
            async fn current_session(&self) -> Option<Identity> {
                self.inner.current_session().await
            }
        }

        let identities = Arc::new(PromotionlessProvider {
            inner: MemoryIdentityProvider::new(),
        });
        let subject = identities
            .sign_up(NewAccount {
                email: "dana@example.org".into(),
                password: "hunter2".into(),
                display_name: "Dana Osei".into(),
                claims: ClaimMap::new(),
            })
            .await
            .unwrap()
            .id;

        let notifier = Arc::new(MemoryNotificationSender::new());
        let service = VerificationService::new(
            Arc::new(MemoryVerificationStore::new()),
            Arc::new(MemoryDocumentStore::new()),
            identities,
            notifier.clone(),
        );

        let request = service.submit(submission(subject)).await.unwrap();
        let err = service.approve(request.id, UserId::new(), None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);

        // Approval rolled back; no notification for a transition that did
        // not durably happen.
        let latest = service.latest_for_subject(subject).await.unwrap().unwrap();
        assert_eq!(latest.status, VerificationStatus::Pending);
        assert!(notifier.notifications_for(subject).await.is_empty());
    }

    #[tokio::test]
    async fn filter_matches_name_licence_and_specialization() {
        let fx = fixture().await;
        fx.service.submit(submission(fx.subject)).await.unwrap();
        let all = fx.service.list_all().await.unwrap();

        assert_eq!(filter_requests(&all, "dana").len(), 1);
        assert_eq!(filter_requests(&all, "md-1234").len(), 1);
        assert_eq!(filter_requests(&all, "RADIO").len(), 1);
        assert_eq!(filter_requests(&all, "cardio").len(), 0);
        assert_eq!(filter_requests(&all, "  ").len(), 1);
    }
}
