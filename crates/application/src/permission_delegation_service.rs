use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use atis_core::{AppError, AppResult};
use atis_domain::{
    AuditAction, Permission, Principal, PrincipalId, Role, RolePermissionSummary, RolePolicyTable,
};

use crate::hierarchy_ports::{
    AuditEvent, AuditRepository, InstitutionRepository, PrincipalRepository,
};
use crate::hierarchy_service::MAX_MUTATION_ATTEMPTS;
use crate::permission_delegation::{PermissionDelegationValidator, ValidationReport};
use crate::scope_resolver::ScopeResolver;

/// Application service for previewing and applying permission delegation.
#[derive(Clone)]
pub struct PermissionDelegationService {
    policies: Arc<RolePolicyTable>,
    institution_repository: Arc<dyn InstitutionRepository>,
    principal_repository: Arc<dyn PrincipalRepository>,
    audit_repository: Arc<dyn AuditRepository>,
}

impl PermissionDelegationService {
    /// Creates a new service from required dependencies.
    #[must_use]
    pub fn new(
        policies: Arc<RolePolicyTable>,
        institution_repository: Arc<dyn InstitutionRepository>,
        principal_repository: Arc<dyn PrincipalRepository>,
        audit_repository: Arc<dyn AuditRepository>,
    ) -> Self {
        Self {
            policies,
            institution_repository,
            principal_repository,
            audit_repository,
        }
    }

    /// Validates a proposal for a role without touching any principal.
    #[must_use]
    pub fn dry_run_for_role(
        &self,
        actor: &Principal,
        target_role: Role,
        current: &BTreeSet<Permission>,
        proposed: &BTreeSet<Permission>,
    ) -> ValidationReport {
        self.validator()
            .dry_run_validate(current, proposed, target_role, actor)
    }

    /// Validates a proposal for an existing principal the actor may manage.
    pub async fn dry_run(
        &self,
        actor: &Principal,
        target_id: PrincipalId,
        proposed: &BTreeSet<Permission>,
    ) -> AppResult<ValidationReport> {
        let target = self.authorized_target(actor, target_id).await?;
        Ok(self.validator().dry_run_validate(
            target.granted_permissions(),
            proposed,
            target.role(),
            actor,
        ))
    }

    /// Replaces a managed principal's permissions after a clean validation.
    ///
    /// Fails with `Forbidden` when the actor may not manage the target and
    /// with `Validation` when the report carries any issue. An unchanged
    /// proposal is accepted without writing. The write only lands if the
    /// target's permissions still match the set the report was built from;
    /// otherwise the proposal is validated again against the fresh set.
    pub async fn apply_delegation(
        &self,
        actor: &Principal,
        target_id: PrincipalId,
        proposed: &BTreeSet<Permission>,
    ) -> AppResult<ValidationReport> {
        let mut attempt = 1;
        let report = loop {
            let target = self.authorized_target(actor, target_id).await?;
            let report = self.validator().dry_run_validate(
                target.granted_permissions(),
                proposed,
                target.role(),
                actor,
            );

            if !report.is_clean() {
                return Err(AppError::Validation(format!(
                    "permission delegation for principal '{target_id}' rejected: {}",
                    describe_issues(&report)
                )));
            }
            if !report.has_changes() {
                return Ok(report);
            }

            match self
                .principal_repository
                .replace_granted_permissions(target_id, target.granted_permissions(), proposed)
                .await
            {
                Ok(()) => break report,
                Err(AppError::Conflict(message)) if attempt < MAX_MUTATION_ATTEMPTS => {
                    tracing::warn!(
                        target_id = %target_id,
                        attempt,
                        %message,
                        "revalidating delegation after concurrent permission change"
                    );
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        };

        tracing::info!(
            actor_id = %actor.id(),
            target_id = %target_id,
            added = report.added.len(),
            removed = report.removed.len(),
            "permissions delegated"
        );
        self.audit_repository
            .append_event(AuditEvent {
                actor_id: actor.id(),
                action: AuditAction::SecurityPermissionsDelegated,
                resource_type: "principal_permissions".to_owned(),
                resource_id: target_id.to_string(),
                detail: Some(format!(
                    "added [{}]; removed [{}]",
                    join_tags(&report.added),
                    join_tags(&report.removed)
                )),
            })
            .await?;

        Ok(report)
    }

    /// Returns required permissions plus dependency closure for `proposed`.
    #[must_use]
    pub fn enrich_for_role(
        &self,
        proposed: &BTreeSet<Permission>,
        target_role: Role,
    ) -> BTreeSet<Permission> {
        self.validator().enrich_for_role(proposed, target_role)
    }

    /// Returns the permissions a fresh principal of `role` starts with.
    #[must_use]
    pub fn default_permissions_for_role(&self, role: Role) -> BTreeSet<Permission> {
        self.validator().default_permissions_for_role(role)
    }

    /// Returns required/default/forbidden permissions for every role.
    #[must_use]
    pub fn role_permission_matrix(&self) -> BTreeMap<Role, RolePermissionSummary> {
        self.validator().role_permission_matrix()
    }

    fn validator(&self) -> PermissionDelegationValidator<'_> {
        PermissionDelegationValidator::new(self.policies.as_ref())
    }

    async fn authorized_target(
        &self,
        actor: &Principal,
        target_id: PrincipalId,
    ) -> AppResult<Principal> {
        if !actor.is_active() {
            return Err(AppError::Forbidden(format!(
                "principal '{}' is inactive",
                actor.id()
            )));
        }

        let target = self
            .principal_repository
            .find_principal(target_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("principal '{target_id}' was not found")))?;

        if !actor.role().can_delegate_to(target.role()) {
            return Err(AppError::Forbidden(format!(
                "role '{}' cannot manage permissions of role '{}'",
                actor.role().as_str(),
                target.role().as_str()
            )));
        }

        if actor.role() == Role::SuperAdmin {
            return Ok(target);
        }

        let tree = self.institution_repository.load_tree().await?;
        let in_scope = target.home_institution_id().is_some_and(|home| {
            ScopeResolver::new(&tree, &[]).can_access_institution(actor, home)
        });
        if !in_scope {
            return Err(AppError::Forbidden(format!(
                "principal '{target_id}' is outside the scope of principal '{}'",
                actor.id()
            )));
        }

        Ok(target)
    }
}

fn join_tags(permissions: &BTreeSet<Permission>) -> String {
    permissions
        .iter()
        .map(Permission::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn describe_issues(report: &ValidationReport) -> String {
    [
        ("missing dependencies", &report.missing_dependencies),
        ("missing required", &report.missing_required),
        ("not allowed", &report.not_allowed),
        ("not held by requester", &report.admin_missing_permissions),
    ]
    .into_iter()
    .filter(|(_, permissions)| !permissions.is_empty())
    .map(|(label, permissions)| format!("{label} [{}]", join_tags(permissions)))
    .collect::<Vec<_>>()
    .join("; ")
}

#[cfg(test)]
mod tests;
