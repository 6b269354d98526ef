//! Static role policy configuration.
//!
//! A [`RolePolicyTable`] is loaded once per process and treated as
//! immutable; validators borrow it for the duration of one call.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use atis_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

use crate::{Permission, Role};

static EMPTY_POLICY: RolePolicy = RolePolicy {
    requires: BTreeSet::new(),
    forbids: BTreeSet::new(),
    defaults: BTreeSet::new(),
    dependencies: BTreeMap::new(),
};

/// Permission rules for one role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePolicy {
    /// Permissions the role must always hold.
    #[serde(default)]
    requires: BTreeSet<Permission>,
    /// Permissions the role may never hold.
    #[serde(default)]
    forbids: BTreeSet<Permission>,
    /// Permissions pre-selected when the role is first assigned.
    #[serde(default)]
    defaults: BTreeSet<Permission>,
    /// Permission to the permissions it needs to be meaningful.
    #[serde(default)]
    dependencies: BTreeMap<Permission, BTreeSet<Permission>>,
}

impl RolePolicy {
    /// Adds required permissions.
    #[must_use]
    pub fn requiring(mut self, permissions: impl IntoIterator<Item = Permission>) -> Self {
        self.requires.extend(permissions);
        self
    }

    /// Adds forbidden permissions.
    #[must_use]
    pub fn forbidding(mut self, permissions: impl IntoIterator<Item = Permission>) -> Self {
        self.forbids.extend(permissions);
        self
    }

    /// Adds default permissions.
    #[must_use]
    pub fn with_defaults(mut self, permissions: impl IntoIterator<Item = Permission>) -> Self {
        self.defaults.extend(permissions);
        self
    }

    /// Declares that `permission` needs `required` to be meaningful.
    #[must_use]
    pub fn with_dependency(
        mut self,
        permission: Permission,
        required: impl IntoIterator<Item = Permission>,
    ) -> Self {
        self.dependencies
            .entry(permission)
            .or_default()
            .extend(required);
        self
    }

    /// Returns the required permissions.
    #[must_use]
    pub fn requires(&self) -> &BTreeSet<Permission> {
        &self.requires
    }

    /// Returns the forbidden permissions.
    #[must_use]
    pub fn forbids(&self) -> &BTreeSet<Permission> {
        &self.forbids
    }

    /// Returns the default permissions.
    #[must_use]
    pub fn defaults(&self) -> &BTreeSet<Permission> {
        &self.defaults
    }

    /// Returns the whole dependency map.
    #[must_use]
    pub fn dependencies(&self) -> &BTreeMap<Permission, BTreeSet<Permission>> {
        &self.dependencies
    }

    /// Returns what `permission` depends on, if anything.
    #[must_use]
    pub fn dependencies_of(&self, permission: &Permission) -> Option<&BTreeSet<Permission>> {
        self.dependencies.get(permission)
    }
}

/// Configuration problem found by [`RolePolicyTable::lint`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyIssue {
    /// A permission is both required and forbidden.
    RequiredAndForbidden {
        /// Role carrying the rule.
        role: Role,
        /// Conflicting permission.
        permission: Permission,
    },
    /// A permission depends on something the role may never hold.
    DependsOnForbidden {
        /// Role carrying the rule.
        role: Role,
        /// Permission with the dependency.
        permission: Permission,
        /// Forbidden dependency.
        dependency: Permission,
    },
    /// A default permission is forbidden.
    DefaultForbidden {
        /// Role carrying the rule.
        role: Role,
        /// Forbidden default.
        permission: Permission,
    },
}

impl Display for PolicyIssue {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RequiredAndForbidden { role, permission } => write!(
                formatter,
                "role '{}' both requires and forbids '{permission}'",
                role.as_str()
            ),
            Self::DependsOnForbidden {
                role,
                permission,
                dependency,
            } => write!(
                formatter,
                "role '{}' permission '{permission}' depends on forbidden '{dependency}'",
                role.as_str()
            ),
            Self::DefaultForbidden { role, permission } => write!(
                formatter,
                "role '{}' defaults to forbidden '{permission}'",
                role.as_str()
            ),
        }
    }
}

/// Per-role projection used by administrative views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RolePermissionSummary {
    /// Required permissions.
    pub requires: BTreeSet<Permission>,
    /// Default permissions.
    pub defaults: BTreeSet<Permission>,
    /// Forbidden permissions.
    pub forbids: BTreeSet<Permission>,
}

/// Versioned table mapping each role to its [`RolePolicy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolePolicyTable {
    version: String,
    policies: BTreeMap<Role, RolePolicy>,
}

#[derive(Debug, Deserialize)]
struct RolePolicyDocument {
    version: String,
    #[serde(default)]
    roles: BTreeMap<String, RolePolicy>,
}

impl RolePolicyTable {
    /// Creates a table from explicit policies.
    #[must_use]
    pub fn new(
        version: impl Into<String>,
        policies: impl IntoIterator<Item = (Role, RolePolicy)>,
    ) -> Self {
        Self {
            version: version.into(),
            policies: policies.into_iter().collect(),
        }
    }

    /// Parses a JSON policy document.
    ///
    /// Role keys accept the same aliases as [`Role`]'s parser. Two keys that
    /// resolve to the same role are rejected.
    pub fn from_json(raw: &str) -> AppResult<Self> {
        let document: RolePolicyDocument = serde_json::from_str(raw)
            .map_err(|error| AppError::Validation(format!("invalid role policy document: {error}")))?;

        if document.version.trim().is_empty() {
            return Err(AppError::Validation(
                "role policy document version must not be empty".to_owned(),
            ));
        }

        let mut policies = BTreeMap::new();
        for (raw_role, policy) in document.roles {
            let role = Role::from_str(raw_role.as_str())?;
            if policies.insert(role, policy).is_some() {
                return Err(AppError::Validation(format!(
                    "role '{}' is configured more than once",
                    role.as_str()
                )));
            }
        }

        Ok(Self {
            version: document.version,
            policies,
        })
    }

    /// Returns the configuration version.
    #[must_use]
    pub fn version(&self) -> &str {
        self.version.as_str()
    }

    /// Returns the policy for `role`; unconfigured roles get an empty policy.
    #[must_use]
    pub fn policy_for(&self, role: Role) -> &RolePolicy {
        self.policies.get(&role).unwrap_or(&EMPTY_POLICY)
    }

    /// Returns required/default/forbidden permissions for every known role.
    #[must_use]
    pub fn permission_matrix(&self) -> BTreeMap<Role, RolePermissionSummary> {
        Role::all()
            .iter()
            .map(|role| {
                let policy = self.policy_for(*role);
                (
                    *role,
                    RolePermissionSummary {
                        requires: policy.requires.clone(),
                        defaults: policy.defaults.clone(),
                        forbids: policy.forbids.clone(),
                    },
                )
            })
            .collect()
    }

    /// Reports contradictions inside the configured policies.
    #[must_use]
    pub fn lint(&self) -> Vec<PolicyIssue> {
        let mut issues = Vec::new();

        for (role, policy) in &self.policies {
            for permission in policy.requires.intersection(&policy.forbids) {
                issues.push(PolicyIssue::RequiredAndForbidden {
                    role: *role,
                    permission: permission.clone(),
                });
            }

            for (permission, dependencies) in &policy.dependencies {
                for dependency in dependencies.intersection(&policy.forbids) {
                    issues.push(PolicyIssue::DependsOnForbidden {
                        role: *role,
                        permission: permission.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }

            for permission in policy.defaults.intersection(&policy.forbids) {
                issues.push(PolicyIssue::DefaultForbidden {
                    role: *role,
                    permission: permission.clone(),
                });
            }
        }

        issues
    }

    /// Returns the stock assignable-permission configuration.
    #[must_use]
    pub fn standard() -> Self {
        let administrative = tags(&[
            "system.config",
            "roles.create",
            "roles.update",
            "roles.delete",
        ]);

        let region_admin = with_standard_dependencies(
            RolePolicy::default()
                .requiring(tags(&["institutions.read", "users.read"]))
                .forbidding(administrative.clone())
                .with_defaults(tags(&[
                    "institutions.read",
                    "institutions.hierarchy",
                    "users.read",
                    "surveys.read",
                    "tasks.read",
                    "documents.read",
                    "reports.read",
                ])),
        );

        let region_operator = with_standard_dependencies(
            RolePolicy::default()
                .requiring(tags(&["institutions.read"]))
                .forbidding(administrative.clone())
                .forbidding(tags(&["institutions.delete", "users.delete"]))
                .with_defaults(tags(&[
                    "institutions.read",
                    "departments.read",
                    "surveys.read",
                    "tasks.read",
                    "documents.read",
                    "reports.read",
                ])),
        );

        let sektor_admin = with_standard_dependencies(
            RolePolicy::default()
                .requiring(tags(&["institutions.read", "users.read"]))
                .forbidding(administrative.clone())
                .forbidding(tags(&["institutions.create", "institutions.delete"]))
                .with_defaults(tags(&[
                    "institutions.read",
                    "users.read",
                    "surveys.read",
                    "tasks.read",
                    "documents.read",
                    "reports.read",
                ])),
        );

        let school_admin = with_standard_dependencies(
            RolePolicy::default()
                .requiring(tags(&["institutions.read"]))
                .forbidding(administrative.clone())
                .forbidding(tags(&[
                    "institutions.create",
                    "institutions.delete",
                    "users.delete",
                ]))
                .with_defaults(tags(&[
                    "institutions.read",
                    "users.read",
                    "surveys.read",
                    "surveys.respond",
                    "attendance.read",
                    "documents.read",
                ])),
        );

        let teacher = with_standard_dependencies(
            RolePolicy::default()
                .forbidding(administrative)
                .forbidding(tags(&[
                    "institutions.create",
                    "institutions.update",
                    "institutions.delete",
                    "users.create",
                    "users.delete",
                ]))
                .with_defaults(tags(&["surveys.read", "surveys.respond", "tasks.read"])),
        );

        Self::new(
            "standard-1",
            [
                (Role::SuperAdmin, RolePolicy::default()),
                (Role::RegionAdmin, region_admin),
                (Role::RegionOperator, region_operator),
                (Role::SektorAdmin, sektor_admin),
                (Role::SchoolAdmin, school_admin),
                (Role::Teacher, teacher),
            ],
        )
    }
}

const READ_GATED_MODULES: &[&str] = &[
    "users",
    "institutions",
    "departments",
    "surveys",
    "documents",
    "tasks",
    "students",
    "teachers",
    "reports",
    "attendance",
];

fn with_standard_dependencies(mut policy: RolePolicy) -> RolePolicy {
    for module in READ_GATED_MODULES {
        let Ok(read) = Permission::new(format!("{module}.read")) else {
            continue;
        };
        for action in ["create", "update", "delete", "export"] {
            if let Ok(permission) = Permission::new(format!("{module}.{action}")) {
                policy = policy.with_dependency(permission, [read.clone()]);
            }
        }
    }

    for (permission, required) in [
        ("surveys.publish", "surveys.read"),
        ("surveys.approve", "surveys.read"),
        ("survey_responses.approve", "survey_responses.read"),
        ("approvals.approve", "approvals.read"),
        ("institutions.hierarchy", "institutions.read"),
    ] {
        if let (Ok(permission), Ok(required)) = (Permission::new(permission), Permission::new(required)) {
            policy = policy.with_dependency(permission, [required]);
        }
    }

    policy
}

fn tags(values: &[&str]) -> BTreeSet<Permission> {
    values
        .iter()
        .filter_map(|value| Permission::new(*value).ok())
        .collect()
}
