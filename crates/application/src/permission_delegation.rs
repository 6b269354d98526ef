use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use atis_domain::{Permission, Principal, Role, RolePermissionSummary, RolePolicyTable};

/// Outcome of validating one proposed permission set.
///
/// Every field is a lexically ordered set; an empty set means no issue of
/// that kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    /// Proposed but not currently granted.
    pub added: BTreeSet<Permission>,
    /// Currently granted but not proposed.
    pub removed: BTreeSet<Permission>,
    /// Dependencies of proposed permissions that are not proposed themselves.
    pub missing_dependencies: BTreeSet<Permission>,
    /// Required by the target role but not proposed.
    pub missing_required: BTreeSet<Permission>,
    /// Proposed but forbidden for the target role.
    pub not_allowed: BTreeSet<Permission>,
    /// Added permissions the requesting principal does not hold.
    pub admin_missing_permissions: BTreeSet<Permission>,
}

impl ValidationReport {
    /// Returns whether the proposal may be applied as is.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.missing_dependencies.is_empty()
            && self.missing_required.is_empty()
            && self.not_allowed.is_empty()
            && self.admin_missing_permissions.is_empty()
    }

    /// Returns whether the proposal differs from the current set.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

/// Pure validator for permission delegation against a role policy table.
#[derive(Debug, Clone, Copy)]
pub struct PermissionDelegationValidator<'a> {
    policies: &'a RolePolicyTable,
}

impl<'a> PermissionDelegationValidator<'a> {
    /// Creates a validator over one immutable policy table.
    #[must_use]
    pub fn new(policies: &'a RolePolicyTable) -> Self {
        Self { policies }
    }

    /// Compares `proposed` with `current` for a principal of `target_role`.
    ///
    /// Nothing is mutated and identical inputs always give identical reports.
    #[must_use]
    pub fn dry_run_validate(
        &self,
        current: &BTreeSet<Permission>,
        proposed: &BTreeSet<Permission>,
        target_role: Role,
        requested_by: &Principal,
    ) -> ValidationReport {
        let policy = self.policies.policy_for(target_role);

        let added: BTreeSet<Permission> = proposed.difference(current).cloned().collect();
        let removed = current.difference(proposed).cloned().collect();

        let missing_dependencies = proposed
            .iter()
            .filter_map(|permission| policy.dependencies_of(permission))
            .flatten()
            .filter(|dependency| !proposed.contains(*dependency))
            .cloned()
            .collect();

        let missing_required = policy.requires().difference(proposed).cloned().collect();
        let not_allowed = proposed.intersection(policy.forbids()).cloned().collect();
        let admin_missing_permissions = added
            .difference(requested_by.granted_permissions())
            .cloned()
            .collect();

        ValidationReport {
            added,
            removed,
            missing_dependencies,
            missing_required,
            not_allowed,
            admin_missing_permissions,
        }
    }

    /// Completes `proposed` with the role's required permissions and the
    /// transitive closure of dependencies.
    ///
    /// Forbidden permissions are never added; forbidden ones already present
    /// stay so validation can report them.
    #[must_use]
    pub fn enrich_for_role(
        &self,
        proposed: &BTreeSet<Permission>,
        target_role: Role,
    ) -> BTreeSet<Permission> {
        let policy = self.policies.policy_for(target_role);
        let allowed = |permission: &Permission| !policy.forbids().contains(permission);

        let mut enriched = proposed.clone();
        enriched.extend(
            policy
                .requires()
                .iter()
                .filter(|permission| allowed(*permission))
                .cloned(),
        );

        let mut pending: Vec<Permission> = enriched.iter().cloned().collect();
        while let Some(permission) = pending.pop() {
            let Some(dependencies) = policy.dependencies_of(&permission) else {
                continue;
            };
            for dependency in dependencies {
                if allowed(dependency) && enriched.insert(dependency.clone()) {
                    pending.push(dependency.clone());
                }
            }
        }

        enriched
    }

    /// Returns the permissions a fresh principal of `role` starts with.
    #[must_use]
    pub fn default_permissions_for_role(&self, role: Role) -> BTreeSet<Permission> {
        let policy = self.policies.policy_for(role);
        let seeded: BTreeSet<Permission> = policy
            .requires()
            .union(policy.defaults())
            .filter(|permission| !policy.forbids().contains(*permission))
            .cloned()
            .collect();
        self.enrich_for_role(&seeded, role)
    }

    /// Returns required/default/forbidden permissions for every role.
    #[must_use]
    pub fn role_permission_matrix(&self) -> BTreeMap<Role, RolePermissionSummary> {
        self.policies.permission_matrix()
    }
}
