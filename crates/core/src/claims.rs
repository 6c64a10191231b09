//! Role resolution from identity claims.
//!
//! The resolver is a pure, total function: whatever shape the claim map is
//! in, it produces a usable [`RoleSet`]. A broken permission read must never
//! crash the caller, so malformed claims degrade to the default grant
//! instead of erroring.

use caregate_types::{Role, RoleSet};
use serde_json::Value;

/// Claim key holding the full role set, serialised as an array of role
/// strings.
pub const ROLES_CLAIM: &str = "roles";

/// Legacy claim key holding a single role string. Read when [`ROLES_CLAIM`]
/// is absent; never written by this workspace.
pub const LEGACY_ROLE_CLAIM: &str = "role";

/// The claim map attached to an identity at the provider.
pub type ClaimMap = serde_json::Map<String, Value>;

/// Maps an identity's stored claims into its canonical role set.
///
/// - A `roles` array claim is used verbatim; entries outside the fixed
///   domain are skipped.
/// - Otherwise a legacy single `role` string claim is wrapped as a
///   singleton, if it parses.
/// - Otherwise, and whenever the result would be empty, the default grant
///   `{patient}` applies: a freshly created identity always resolves to a
///   non-empty set.
pub fn resolve(claims: &ClaimMap) -> RoleSet {
    let mut roles = RoleSet::new();

    match claims.get(ROLES_CLAIM) {
        Some(Value::Array(entries)) => {
            for entry in entries {
                if let Some(role) = entry.as_str().and_then(|s| s.parse::<Role>().ok()) {
                    roles.insert(role);
                }
            }
        }
        Some(_) | None => {
            if let Some(role) = claims
                .get(LEGACY_ROLE_CLAIM)
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<Role>().ok())
            {
                roles.insert(role);
            }
        }
    }

    if roles.is_empty() {
        return RoleSet::patient_only();
    }
    roles
}

/// Builds the claim value for a role set, for writing back to the provider.
pub fn roles_claim(roles: &RoleSet) -> Value {
    Value::Array(
        roles
            .iter()
            .map(|role| Value::String(role.as_str().to_owned()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(value: Value) -> ClaimMap {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn no_role_claim_defaults_to_patient() {
        let set = resolve(&claims(json!({ "theme": "dark" })));
        assert_eq!(set, RoleSet::patient_only());
    }

    #[test]
    fn roles_array_is_used_verbatim() {
        let set = resolve(&claims(json!({ "roles": ["admin", "healthstaff"] })));
        assert!(set.contains(Role::Admin));
        assert!(set.contains(Role::HealthStaff));
        assert!(!set.contains(Role::Patient));
    }

    #[test]
    fn unknown_entries_are_skipped() {
        let set = resolve(&claims(json!({ "roles": ["admin", "doctor", 42] })));
        assert_eq!(set, RoleSet::singleton(Role::Admin));
    }

    #[test]
    fn all_unknown_entries_degrade_to_patient() {
        let set = resolve(&claims(json!({ "roles": ["doctor", "nurse"] })));
        assert_eq!(set, RoleSet::patient_only());
    }

    #[test]
    fn legacy_single_role_string_is_wrapped() {
        let set = resolve(&claims(json!({ "role": "healthstaff" })));
        assert_eq!(set, RoleSet::singleton(Role::HealthStaff));
    }

    #[test]
    fn malformed_claims_never_error() {
        let set = resolve(&claims(json!({ "roles": "admin", "role": { "x": 1 } })));
        assert_eq!(set, RoleSet::patient_only());
    }

    #[test]
    fn roles_claim_round_trips_through_resolve() {
        let roles: RoleSet = [Role::Patient, Role::Superuser].into_iter().collect();
        let mut map = ClaimMap::new();
        map.insert(ROLES_CLAIM.into(), roles_claim(&roles));
        assert_eq!(resolve(&map), roles);
    }
}
