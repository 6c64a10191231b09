//! # CareGate Core
//!
//! Authorization and credential-verification core for the CareGate portal.
//!
//! This crate is pure decision logic over role and status data supplied by
//! an external managed backend:
//! - Role resolution from identity claims ([`claims`])
//! - Session lifecycle and change notifications ([`session`])
//! - Route gating with verification-aware staff access ([`guard`])
//! - The credential approve/reject workflow ([`verification`])
//! - The in-process notification log ([`notify`])
//! - Realtime change-feed merging ([`realtime`])
//!
//! **No API concerns**: HTTP servers and serialised request/response shapes
//! belong in `api-rest`; this crate exposes services and the collaborator
//! contracts they consume ([`backend`]).

pub mod backend;
pub mod claims;
pub mod error;
pub mod guard;
pub mod notify;
pub mod realtime;
pub mod session;
pub mod verification;

pub use backend::{Identity, NewAccount};
pub use error::{ErrorKind, PortalError, PortalResult};
pub use guard::{dashboard_for, Decision, NavToken, NavigationState, Permission, Route, RouteGuard};
pub use notify::{Notification, NotificationBus};
pub use realtime::{ChangeEvent, RequestCache};
pub use session::SessionHolder;
pub use verification::{
    filter_requests, StatusCounts, Submission, VerificationRequest, VerificationService,
};
