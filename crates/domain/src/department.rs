use std::fmt::{Display, Formatter};

use atis_core::{AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};

use crate::InstitutionId;

/// Unique identifier for a department.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DepartmentId(i64);

impl DepartmentId {
    /// Creates a department identifier from its stored value.
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

impl Display for DepartmentId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Organizational unit owned by exactly one institution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    id: DepartmentId,
    institution_id: InstitutionId,
    name: NonEmptyString,
    is_active: bool,
}

impl Department {
    /// Creates a validated department.
    pub fn new(
        id: DepartmentId,
        institution_id: InstitutionId,
        name: impl Into<String>,
        is_active: bool,
    ) -> AppResult<Self> {
        Ok(Self {
            id,
            institution_id,
            name: NonEmptyString::new(name)?,
            is_active,
        })
    }

    /// Returns the department identifier.
    #[must_use]
    pub fn id(&self) -> DepartmentId {
        self.id
    }

    /// Returns the owning institution.
    #[must_use]
    pub fn institution_id(&self) -> InstitutionId {
        self.institution_id
    }

    /// Returns the display name.
    #[must_use]
    pub fn name(&self) -> &NonEmptyString {
        &self.name
    }

    /// Returns whether the department is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.is_active
    }
}
