use std::fmt::{Display, Formatter};
use std::str::FromStr;

use atis_core::AppError;
use serde::{Deserialize, Serialize};

const PERMISSION_MAX_LENGTH: usize = 128;

/// Permission tag such as `users.read`.
///
/// Tags are dotted lowercase segments. Ordering is lexical on the tag, which
/// keeps every set of permissions reproducible when serialized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Permission(String);

impl Permission {
    /// Creates a validated permission tag.
    pub fn new(value: impl Into<String>) -> Result<Self, AppError> {
        let value = value.into();
        let trimmed = value.trim();

        if trimmed.is_empty() {
            return Err(AppError::Validation(
                "permission must not be empty".to_owned(),
            ));
        }

        if trimmed.len() > PERMISSION_MAX_LENGTH {
            return Err(AppError::Validation(format!(
                "permission must not exceed {PERMISSION_MAX_LENGTH} characters"
            )));
        }

        if !trimmed.contains('.') {
            return Err(AppError::Validation(format!(
                "permission '{trimmed}' must have the form '<module>.<action>'"
            )));
        }

        let valid_segments = trimmed.split('.').all(|segment| {
            !segment.is_empty()
                && segment.chars().all(|character| {
                    character.is_ascii_lowercase()
                        || character.is_ascii_digit()
                        || character == '_'
                        || character == '-'
                })
        });
        if !valid_segments {
            return Err(AppError::Validation(format!(
                "permission '{trimmed}' contains an invalid segment"
            )));
        }

        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the tag.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Returns the module prefix, for example `users` in `users.read`.
    #[must_use]
    pub fn module(&self) -> &str {
        self.0.split('.').next().unwrap_or_default()
    }
}

impl FromStr for Permission {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::new(value)
    }
}

impl TryFrom<String> for Permission {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Permission> for String {
    fn from(value: Permission) -> Self {
        value.0
    }
}

impl Display for Permission {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}

/// Stable audit actions emitted by application use-cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Emitted when an institution is created.
    InstitutionCreated,
    /// Emitted when an institution is moved under a new parent.
    InstitutionMoved,
    /// Emitted when an institution is deactivated.
    InstitutionDeactivated,
    /// Emitted when an institution is reactivated.
    InstitutionActivated,
    /// Emitted when an admin replaces a subordinate's permission set.
    SecurityPermissionsDelegated,
}

impl AuditAction {
    /// Returns a stable storage value for this action.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InstitutionCreated => "institution.created",
            Self::InstitutionMoved => "institution.moved",
            Self::InstitutionDeactivated => "institution.deactivated",
            Self::InstitutionActivated => "institution.activated",
            Self::SecurityPermissionsDelegated => "security.permissions.delegated",
        }
    }
}
