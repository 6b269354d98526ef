use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{DepartmentId, InstitutionId, Permission, Role};

/// Unique identifier for a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(i64);

impl PrincipalId {
    /// Creates a principal identifier from its stored value.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the stored value.
    #[must_use]
    pub const fn as_i64(&self) -> i64 {
        self.0
    }
}

impl Display for PrincipalId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Authenticated actor resolved by the session layer.
///
/// Scope is never stored on the principal; it is derived from the home
/// institution and role against the current hierarchy snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    id: PrincipalId,
    role: Role,
    home_institution_id: Option<InstitutionId>,
    home_department_id: Option<DepartmentId>,
    granted_permissions: BTreeSet<Permission>,
    is_active: bool,
}

impl Principal {
    /// Creates an active principal without home or permissions.
    #[must_use]
    pub fn new(id: PrincipalId, role: Role) -> Self {
        Self {
            id,
            role,
            home_institution_id: None,
            home_department_id: None,
            granted_permissions: BTreeSet::new(),
            is_active: true,
        }
    }

    /// Sets the home institution.
    #[must_use]
    pub fn with_home_institution(mut self, institution_id: InstitutionId) -> Self {
        self.home_institution_id = Some(institution_id);
        self
    }

    /// Sets the home department.
    #[must_use]
    pub fn with_home_department(mut self, department_id: DepartmentId) -> Self {
        self.home_department_id = Some(department_id);
        self
    }

    /// Replaces the granted permission set.
    #[must_use]
    pub fn with_permissions(mut self, permissions: impl IntoIterator<Item = Permission>) -> Self {
        self.granted_permissions = permissions.into_iter().collect();
        self
    }

    /// Sets the active flag.
    #[must_use]
    pub fn with_active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    /// Returns the principal identifier.
    #[must_use]
    pub fn id(&self) -> PrincipalId {
        self.id
    }

    /// Returns the principal role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns the home institution, if any.
    #[must_use]
    pub fn home_institution_id(&self) -> Option<InstitutionId> {
        self.home_institution_id
    }

    /// Returns the home department, if any.
    #[must_use]
    pub fn home_department_id(&self) -> Option<DepartmentId> {
        self.home_department_id
    }

    /// Returns the effective granted permissions.
    #[must_use]
    pub fn granted_permissions(&self) -> &BTreeSet<Permission> {
        &self.granted_permissions
    }

    /// Returns whether the principal is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Returns whether the principal holds `permission`.
    #[must_use]
    pub fn holds(&self, permission: &Permission) -> bool {
        self.granted_permissions.contains(permission)
    }
}
