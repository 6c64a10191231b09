//! Shared domain types for the CareGate portal.
//!
//! This crate holds the closed vocabulary the rest of the workspace builds on:
//! the fixed role domain and role sets, verification and notification
//! enumerations, identifier newtypes, and validated text. Everything here is
//! pure data with construction-time validation; no I/O, no backend concerns.

mod id;
mod role;
mod status;
mod text;

pub use id::{DocumentRef, NotificationId, RequestId, UserId};
pub use role::{Role, RoleError, RoleSet};
pub use status::{NotificationCategory, VerificationStatus};
pub use text::{NonEmptyText, TextError};
