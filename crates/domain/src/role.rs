use std::str::FromStr;

use atis_core::AppError;
use serde::{Deserialize, Serialize};

/// Fixed role set a principal can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Unrestricted system administrator.
    SuperAdmin,
    /// Administrator of a regional office and everything beneath it.
    RegionAdmin,
    /// Department-level operator inside a regional office.
    RegionOperator,
    /// Administrator of a sector office and its schools.
    SektorAdmin,
    /// Administrator of a single school.
    SchoolAdmin,
    /// Teacher attached to a single school.
    Teacher,
}

/// Breadth of data a role is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeLevel {
    /// Whole system.
    System,
    /// One region and its subtree.
    Regional,
    /// One department inside a region.
    Department,
    /// One sector and its schools.
    Sector,
    /// One school.
    School,
    /// A teacher's own records.
    Teacher,
}

impl Role {
    /// Returns a stable storage value for this role.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SuperAdmin => "superadmin",
            Self::RegionAdmin => "regionadmin",
            Self::RegionOperator => "regionoperator",
            Self::SektorAdmin => "sektoradmin",
            Self::SchoolAdmin => "schooladmin",
            Self::Teacher => "teacher",
        }
    }

    /// Returns all known roles.
    #[must_use]
    pub fn all() -> &'static [Self] {
        const ALL: &[Role] = &[
            Role::SuperAdmin,
            Role::RegionAdmin,
            Role::RegionOperator,
            Role::SektorAdmin,
            Role::SchoolAdmin,
            Role::Teacher,
        ];

        ALL
    }

    /// Returns the breadth of data this role is scoped to.
    #[must_use]
    pub fn scope_level(&self) -> ScopeLevel {
        match self {
            Self::SuperAdmin => ScopeLevel::System,
            Self::RegionAdmin => ScopeLevel::Regional,
            Self::RegionOperator => ScopeLevel::Department,
            Self::SektorAdmin => ScopeLevel::Sector,
            Self::SchoolAdmin => ScopeLevel::School,
            Self::Teacher => ScopeLevel::Teacher,
        }
    }

    /// Returns the roles whose permission sets this role may edit.
    #[must_use]
    pub fn delegable_roles(&self) -> &'static [Self] {
        match self {
            Self::SuperAdmin => &[
                Self::RegionAdmin,
                Self::RegionOperator,
                Self::SektorAdmin,
                Self::SchoolAdmin,
                Self::Teacher,
            ],
            Self::RegionAdmin => &[
                Self::RegionOperator,
                Self::SektorAdmin,
                Self::SchoolAdmin,
                Self::Teacher,
            ],
            Self::SektorAdmin => &[Self::SchoolAdmin, Self::Teacher],
            Self::SchoolAdmin => &[Self::Teacher],
            Self::RegionOperator | Self::Teacher => &[],
        }
    }

    /// Returns whether this role may edit permissions of `target`.
    #[must_use]
    pub fn can_delegate_to(&self, target: Self) -> bool {
        self.delegable_roles().contains(&target)
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "superadmin" => Ok(Self::SuperAdmin),
            "regionadmin" => Ok(Self::RegionAdmin),
            "regionoperator" => Ok(Self::RegionOperator),
            "sektoradmin" => Ok(Self::SektorAdmin),
            "schooladmin" | "məktəbadmin" => Ok(Self::SchoolAdmin),
            "teacher" | "müəllim" => Ok(Self::Teacher),
            _ => Err(AppError::Validation(format!("unknown role '{value}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::{Role, ScopeLevel};

    #[test]
    fn role_roundtrip_storage_value() {
        for role in Role::all() {
            assert_eq!(Role::from_str(role.as_str()).ok(), Some(*role));
        }
    }

    #[test]
    fn role_parses_localized_aliases() {
        assert_eq!(Role::from_str("məktəbadmin").ok(), Some(Role::SchoolAdmin));
        assert_eq!(Role::from_str("müəllim").ok(), Some(Role::Teacher));
        assert!(Role::from_str("janitor").is_err());
    }

    #[test]
    fn delegation_only_flows_downward() {
        assert!(Role::RegionAdmin.can_delegate_to(Role::SektorAdmin));
        assert!(!Role::SektorAdmin.can_delegate_to(Role::RegionAdmin));
        assert!(!Role::RegionOperator.can_delegate_to(Role::Teacher));
        for role in Role::all() {
            assert!(!role.can_delegate_to(*role));
            assert!(!role.can_delegate_to(Role::SuperAdmin));
        }
    }

    #[test]
    fn operators_are_department_scoped() {
        assert_eq!(Role::RegionOperator.scope_level(), ScopeLevel::Department);
        assert_eq!(Role::SuperAdmin.scope_level(), ScopeLevel::System);
    }
}
