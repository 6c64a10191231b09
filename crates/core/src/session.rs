//! Identity session holder.
//!
//! An explicitly constructed service owning the current signed-in identity:
//! created at process start, injected into consumers, disposed at shutdown.
//! There is no ambient global; dependents observe session changes through a
//! watch channel. All mutating operations delegate to the identity provider
//! and propagate its failures verbatim, with no local retry.

use std::sync::Arc;

use caregate_types::{Role, RoleSet};
use tokio::sync::watch;

use crate::backend::{Identity, IdentityProvider, NewAccount};
use crate::claims::{self, ClaimMap, ROLES_CLAIM};
use crate::error::{PortalError, PortalResult};
use crate::guard::{dashboard_for, Route};

/// Owns the signed-in identity and its lifecycle.
pub struct SessionHolder<P> {
    provider: Arc<P>,
    current: watch::Sender<Option<Identity>>,
    /// Role chosen before authentication completed (e.g. during an
    /// external-provider sign-up flow). Applied exactly once on the next
    /// successful sign-in, then cleared.
    deferred_role: std::sync::Mutex<Option<Role>>,
}

impl<P: IdentityProvider> SessionHolder<P> {
    pub fn new(provider: Arc<P>) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            provider,
            current,
            deferred_role: std::sync::Mutex::new(None),
        }
    }

    /// Subscribes to session changes. The receiver sees the new identity on
    /// sign-in and `None` on sign-out, before the caller gets control back.
    pub fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.current.subscribe()
    }

    pub fn current(&self) -> Option<Identity> {
        self.current.borrow().clone()
    }

    /// Captures a role preference to apply on the next successful sign-in.
    pub fn defer_role(&self, role: Role) {
        *self.lock_deferred() = Some(role);
    }

    /// Registers a new account. The requested role string is validated
    /// against the fixed domain before any provider call.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
        requested_role: &str,
    ) -> PortalResult<(Identity, Route)> {
        let role: Role = requested_role.parse()?;

        let mut account_claims = ClaimMap::new();
        account_claims.insert(
            ROLES_CLAIM.to_owned(),
            claims::roles_claim(&RoleSet::singleton(role)),
        );
        let identity = self
            .provider
            .sign_up(NewAccount {
                email: email.to_owned(),
                password: password.to_owned(),
                display_name: display_name.to_owned(),
                claims: account_claims,
            })
            .await?;

        self.complete_sign_in(identity).await
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> PortalResult<(Identity, Route)> {
        let identity = self.provider.sign_in_with_password(email, password).await?;
        self.complete_sign_in(identity).await
    }

    pub async fn sign_in_with_provider(&self) -> PortalResult<(Identity, Route)> {
        let identity = self.provider.sign_in_with_provider().await?;
        self.complete_sign_in(identity).await
    }

    /// Signs out. Dependents observe the identity becoming absent before
    /// this returns, so any redirect happens after the fact.
    pub async fn sign_out(&self) -> PortalResult<()> {
        self.provider.sign_out().await?;
        self.current.send_replace(None);
        Ok(())
    }

    pub async fn reset_password(&self, email: &str) -> PortalResult<()> {
        self.provider.reset_password(email).await
    }

    /// Replaces the signed-in identity's role set at the provider.
    pub async fn update_roles(&self, roles: &RoleSet) -> PortalResult<Identity> {
        let identity = self.current().ok_or(PortalError::NoSession)?;

        let mut updated = identity.claims.clone();
        updated.insert(ROLES_CLAIM.to_owned(), claims::roles_claim(roles));
        let refreshed = self.provider.update_claims(identity.id, updated).await?;
        self.current.send_replace(Some(refreshed.clone()));
        Ok(refreshed)
    }

    /// Post-authentication steps shared by every sign-in path: apply the
    /// deferred role preference (once), publish the identity, and compute
    /// the dashboard destination.
    async fn complete_sign_in(&self, identity: Identity) -> PortalResult<(Identity, Route)> {
        let deferred = self.lock_deferred().take();
        let identity = match deferred {
            Some(role) => {
                let mut roles = identity.roles();
                roles.insert(role);
                let mut updated = identity.claims.clone();
                updated.insert(ROLES_CLAIM.to_owned(), claims::roles_claim(&roles));
                self.provider.update_claims(identity.id, updated).await?
            }
            None => identity,
        };

        self.current.send_replace(Some(identity.clone()));
        let destination = dashboard_for(&identity.roles());
        tracing::info!(user = %identity.id, destination = %destination.path(), "signed in");
        Ok((identity, destination))
    }

    fn lock_deferred(&self) -> std::sync::MutexGuard<'_, Option<Role>> {
        // The lock is only held across take/replace, never across an await;
        // poisoning would mean a panic mid-assignment, which cannot happen.
        match self.deferred_role.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
