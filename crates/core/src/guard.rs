//! Route guard: the decision function gating protected views.
//!
//! Denial is an expected outcome, so the guard returns a redirect decision
//! instead of an error. An unauthenticated visitor goes to sign-in with the
//! requested location preserved for post-login replay; a signed-in identity
//! with an insufficient role goes to the neutral profile page; an unverified
//! professional asking for the staff view goes to the verification-status
//! page.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use caregate_types::{Role, RoleSet, VerificationStatus};

use crate::backend::{Identity, VerificationStore};
use crate::error::PortalResult;

/// Permission a protected view requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Patient,
    #[serde(rename = "healthstaff")]
    HealthStaff,
    Admin,
}

impl Permission {
    /// The role that satisfies this permission (superuser satisfies all).
    pub fn matching_role(&self) -> Role {
        match self {
            Permission::Patient => Role::Patient,
            Permission::HealthStaff => Role::HealthStaff,
            Permission::Admin => Role::Admin,
        }
    }
}

impl FromStr for Permission {
    type Err = caregate_types::RoleError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim() {
            "patient" => Ok(Permission::Patient),
            "healthstaff" => Ok(Permission::HealthStaff),
            "admin" => Ok(Permission::Admin),
            other => Err(caregate_types::RoleError::Unknown(other.to_owned())),
        }
    }
}

/// Navigable destinations the guard and session holder decide between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    SignIn { from: Option<String> },
    Profile,
    PatientDashboard,
    StaffDashboard,
    AdminDashboard,
    VerificationStatus,
}

impl Route {
    pub fn path(&self) -> String {
        match self {
            Route::SignIn { from: Some(from) } => format!("/signin?from={from}"),
            Route::SignIn { from: None } => "/signin".into(),
            Route::Profile => "/profile".into(),
            Route::PatientDashboard => "/dashboard".into(),
            Route::StaffDashboard => "/staff".into(),
            Route::AdminDashboard => "/admin".into(),
            Route::VerificationStatus => "/verification/status".into(),
        }
    }
}

/// Outcome of one authorization check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny { redirect: Route },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    fn deny(redirect: Route) -> Self {
        Decision::Deny { redirect }
    }
}

/// Guard over protected views, consulting the verification store for the
/// staff gate.
pub struct RouteGuard<S> {
    store: Arc<S>,
}

impl<S: VerificationStore> RouteGuard<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Decides whether `requested` may render for `identity` under
    /// `required`.
    ///
    /// `superuser` bypasses every check, including the verification gate.
    /// The `healthstaff` permission additionally requires the subject's
    /// latest verification request to be approved: an unverified
    /// professional never reaches clinical-review functionality.
    pub async fn authorize(
        &self,
        identity: Option<&Identity>,
        required: Option<Permission>,
        requested: &str,
    ) -> PortalResult<Decision> {
        let Some(identity) = identity else {
            return Ok(Decision::deny(Route::SignIn {
                from: Some(requested.to_owned()),
            }));
        };

        let Some(required) = required else {
            return Ok(Decision::Allow);
        };

        let roles = identity.roles();
        if roles.contains(Role::Superuser) {
            return Ok(Decision::Allow);
        }
        if !roles.contains(required.matching_role()) {
            // The identity is valid, only the permission is insufficient;
            // send it to a neutral authenticated page, not back to sign-in.
            return Ok(Decision::deny(Route::Profile));
        }

        if required == Permission::HealthStaff {
            let latest = self.store.latest_for_subject(identity.id).await?;
            let approved = matches!(
                latest,
                Some(request) if request.status == VerificationStatus::Approved
            );
            if !approved {
                return Ok(Decision::deny(Route::VerificationStatus));
            }
        }

        Ok(Decision::Allow)
    }
}

/// Dashboard destination priority on successful sign-in.
pub fn dashboard_for(roles: &RoleSet) -> Route {
    if roles.contains(Role::Superuser) || roles.contains(Role::Admin) {
        Route::AdminDashboard
    } else if roles.contains(Role::HealthStaff) {
        Route::StaffDashboard
    } else {
        Route::PatientDashboard
    }
}

/// Tracks the live navigation intent so a permission check that resolves
/// after the user has already navigated elsewhere is discarded instead of
/// applied.
///
/// This is the caller's half of the cancellation contract: the presentation
/// layer holds one `NavigationState` per session, calls [`begin`] when the
/// user requests a view, and runs the guard's decision through [`commit`]
/// before rendering it.
///
/// [`begin`]: NavigationState::begin
/// [`commit`]: NavigationState::commit
#[derive(Debug, Default)]
pub struct NavigationState {
    epoch: AtomicU64,
}

/// Token tying a decision to the navigation intent it was computed for.
#[derive(Debug, Clone, Copy)]
pub struct NavToken(u64);

impl NavigationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new navigation intent, superseding any in-flight check.
    pub fn begin(&self) -> NavToken {
        NavToken(self.epoch.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Applies a resolved decision only if its intent is still current.
    pub fn commit(&self, token: NavToken, decision: Decision) -> Option<Decision> {
        if self.epoch.load(Ordering::SeqCst) == token.0 {
            Some(decision)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryIdentityProvider, MemoryVerificationStore};
    use crate::backend::{IdentityProvider, NewAccount};
    use crate::claims::ClaimMap;
    use caregate_types::{NonEmptyText, RequestId, UserId};
    use chrono::Utc;
    use serde_json::json;

    fn identity_with_roles(roles: &[&str]) -> Identity {
        let mut claims = ClaimMap::new();
        claims.insert("roles".into(), json!(roles));
        Identity {
            id: UserId::new(),
            email: "someone@example.org".into(),
            display_name: "Someone".into(),
            claims,
        }
    }

    fn guard() -> RouteGuard<MemoryVerificationStore> {
        RouteGuard::new(Arc::new(MemoryVerificationStore::new()))
    }

    async fn approved_request_for(store: &MemoryVerificationStore, subject: UserId) {
        let now = Utc::now();
        store
            .insert(crate::verification::VerificationRequest {
                id: RequestId::new(),
                subject,
                subject_name: "Someone".into(),
                license_number: NonEmptyText::new("MD-1234").unwrap(),
                specialization: NonEmptyText::new("radiologist").unwrap(),
                document: caregate_types::DocumentRef::new("verification/doc.pdf"),
                status: VerificationStatus::Approved,
                reviewer: Some(UserId::new()),
                reviewer_notes: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn no_identity_redirects_to_sign_in_with_replay_location() {
        let decision = guard()
            .authorize(None, Some(Permission::Admin), "/admin")
            .await
            .unwrap();
        assert_eq!(
            decision,
            Decision::Deny {
                redirect: Route::SignIn {
                    from: Some("/admin".into())
                }
            }
        );
    }

    #[tokio::test]
    async fn any_signed_in_identity_may_view_unrestricted_routes() {
        let identity = identity_with_roles(&[]);
        let decision = guard()
            .authorize(Some(&identity), None, "/profile")
            .await
            .unwrap();
        assert!(decision.is_allowed());
    }

    #[tokio::test]
    async fn superuser_is_allowed_everywhere() {
        let store = Arc::new(MemoryVerificationStore::new());
        let guard = RouteGuard::new(store);
        let identity = identity_with_roles(&["superuser"]);

        for required in [Permission::Patient, Permission::HealthStaff, Permission::Admin] {
            let decision = guard
                .authorize(Some(&identity), Some(required), "/anywhere")
                .await
                .unwrap();
            assert!(decision.is_allowed(), "superuser denied {required:?}");
        }
    }

    #[tokio::test]
    async fn insufficient_role_redirects_to_profile_not_sign_in() {
        let identity = identity_with_roles(&["patient"]);
        let decision = guard()
            .authorize(Some(&identity), Some(Permission::Admin), "/admin")
            .await
            .unwrap();
        assert_eq!(
            decision,
            Decision::Deny {
                redirect: Route::Profile
            }
        );
    }

    #[tokio::test]
    async fn unverified_staff_is_redirected_to_verification_status() {
        let identity = identity_with_roles(&["healthstaff"]);
        let decision = guard()
            .authorize(Some(&identity), Some(Permission::HealthStaff), "/staff")
            .await
            .unwrap();
        assert_eq!(
            decision,
            Decision::Deny {
                redirect: Route::VerificationStatus
            }
        );
    }

    #[tokio::test]
    async fn verified_staff_reaches_the_staff_view() {
        let store = Arc::new(MemoryVerificationStore::new());
        let identity = identity_with_roles(&["healthstaff"]);
        approved_request_for(&store, identity.id).await;

        let guard = RouteGuard::new(store);
        let decision = guard
            .authorize(Some(&identity), Some(Permission::HealthStaff), "/staff")
            .await
            .unwrap();
        assert!(decision.is_allowed());
    }

    #[tokio::test]
    async fn rejected_latest_request_still_blocks_the_staff_view() {
        let provider = MemoryIdentityProvider::new();
        // Keep the provider exercised so the fixture mirrors a real session.
        let identity = provider
            .sign_up(NewAccount {
                email: "staff@example.org".into(),
                password: "hunter2".into(),
                display_name: "Staff".into(),
                claims: {
                    let mut claims = ClaimMap::new();
                    claims.insert("roles".into(), json!(["healthstaff"]));
                    claims
                },
            })
            .await
            .unwrap();

        let store = Arc::new(MemoryVerificationStore::new());
        let now = Utc::now();
        store
            .insert(crate::verification::VerificationRequest {
                id: RequestId::new(),
                subject: identity.id,
                subject_name: identity.display_name.clone(),
                license_number: NonEmptyText::new("MD-1").unwrap(),
                specialization: NonEmptyText::new("surgery").unwrap(),
                document: caregate_types::DocumentRef::new("verification/doc.pdf"),
                status: VerificationStatus::Rejected,
                reviewer: Some(UserId::new()),
                reviewer_notes: Some("expired licence".into()),
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        let guard = RouteGuard::new(store);
        let decision = guard
            .authorize(Some(&identity), Some(Permission::HealthStaff), "/staff")
            .await
            .unwrap();
        assert_eq!(
            decision,
            Decision::Deny {
                redirect: Route::VerificationStatus
            }
        );
    }

    #[test]
    fn dashboard_priority_follows_the_role_order() {
        let admin: RoleSet = [Role::Admin, Role::HealthStaff, Role::Patient]
            .into_iter()
            .collect();
        assert_eq!(dashboard_for(&admin), Route::AdminDashboard);

        let staff: RoleSet = [Role::HealthStaff, Role::Patient].into_iter().collect();
        assert_eq!(dashboard_for(&staff), Route::StaffDashboard);

        assert_eq!(
            dashboard_for(&RoleSet::patient_only()),
            Route::PatientDashboard
        );
        assert_eq!(dashboard_for(&RoleSet::new()), Route::PatientDashboard);
        assert_eq!(
            dashboard_for(&RoleSet::singleton(Role::Superuser)),
            Route::AdminDashboard
        );
    }

    #[test]
    fn stale_navigation_decisions_are_discarded() {
        let nav = NavigationState::new();
        let token = nav.begin();

        // The user navigates away before the check resolves.
        let _superseding = nav.begin();

        assert_eq!(nav.commit(token, Decision::Allow), None);
    }

    #[test]
    fn current_navigation_decision_is_applied() {
        let nav = NavigationState::new();
        let token = nav.begin();
        assert_eq!(nav.commit(token, Decision::Allow), Some(Decision::Allow));
    }
}
