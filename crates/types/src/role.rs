use std::fmt;
use std::str::FromStr;

/// Errors raised when constructing role values from untyped input.
#[derive(Debug, thiserror::Error)]
pub enum RoleError {
    /// The input string is not one of the fixed role domain values.
    #[error("unknown role: {0}")]
    Unknown(String),
}

/// One capability grant from the fixed role domain.
///
/// The domain is closed: a role string outside it is a construction-time
/// error, never a runtime string comparison. `Superuser` implies every
/// permission check succeeds regardless of the other members of a
/// [`RoleSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Patient,
    #[serde(rename = "healthstaff")]
    HealthStaff,
    Admin,
    Superuser,
}

impl Role {
    /// The canonical claim string for this role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::HealthStaff => "healthstaff",
            Role::Admin => "admin",
            Role::Superuser => "superuser",
        }
    }

    /// All members of the fixed domain, in canonical order.
    pub fn all() -> [Role; 4] {
        [Role::Patient, Role::HealthStaff, Role::Admin, Role::Superuser]
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = RoleError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim() {
            "patient" => Ok(Role::Patient),
            "healthstaff" => Ok(Role::HealthStaff),
            "admin" => Ok(Role::Admin),
            "superuser" => Ok(Role::Superuser),
            other => Err(RoleError::Unknown(other.to_owned())),
        }
    }
}

/// The set of roles held by one identity.
///
/// Small and ordered; serialises as an array of role strings. A `RoleSet` can
/// be empty as a value, but the role resolver guarantees it never hands an
/// empty set to callers (it defaults to `{patient}`).
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct RoleSet(std::collections::BTreeSet<Role>);

impl RoleSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// A set containing exactly one role.
    pub fn singleton(role: Role) -> Self {
        let mut set = Self::new();
        set.insert(role);
        set
    }

    /// The default grant for an identity with no role claim.
    pub fn patient_only() -> Self {
        Self::singleton(Role::Patient)
    }

    pub fn insert(&mut self, role: Role) -> bool {
        self.0.insert(role)
    }

    pub fn contains(&self, role: Role) -> bool {
        self.0.contains(&role)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Role> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Role> for RoleSet {
    fn from_iter<I: IntoIterator<Item = Role>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for RoleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for role in self.iter() {
            if !first {
                f.write_str(",")?;
            }
            f.write_str(role.as_str())?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_domain_value() {
        for role in Role::all() {
            let parsed: Role = role.as_str().parse().unwrap();
            assert_eq!(parsed, role);
        }
    }

    #[test]
    fn rejects_roles_outside_the_domain() {
        assert!(matches!("doctor".parse::<Role>(), Err(RoleError::Unknown(_))));
        assert!(matches!("".parse::<Role>(), Err(RoleError::Unknown(_))));
    }

    #[test]
    fn trims_before_parsing() {
        assert_eq!(" admin ".parse::<Role>().unwrap(), Role::Admin);
    }

    #[test]
    fn role_set_membership() {
        let mut set = RoleSet::patient_only();
        assert!(set.contains(Role::Patient));
        assert!(!set.contains(Role::Admin));

        assert!(set.insert(Role::Admin));
        assert!(!set.insert(Role::Admin));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn role_set_serialises_as_string_array() {
        let set: RoleSet = [Role::Admin, Role::Patient].into_iter().collect();
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"["patient","admin"]"#);

        let back: RoleSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }
}
