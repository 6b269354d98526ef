use std::collections::BTreeSet;
use std::sync::Arc;

use atis_core::{AppError, AppResult, NonEmptyString};
use atis_domain::{
    AuditAction, HierarchyIntegrityReport, InstitutionId, InstitutionNode, Principal,
    ReparentPlan,
};

use crate::hierarchy_ports::{
    AuditEvent, AuditRepository, CreateInstitutionInput, InstitutionRepository, NewInstitution,
};

/// Attempts made for one mutation before a version conflict is surfaced.
pub const MAX_MUTATION_ATTEMPTS: usize = 3;

/// Application service for reading and reshaping the institution hierarchy.
///
/// Reads run against one snapshot per call. Mutations are validated against
/// a snapshot and handed to the repository with that snapshot's version; a
/// concurrent writer makes the repository answer `Conflict`, after which the
/// mutation is re-validated against a fresh snapshot.
#[derive(Clone)]
pub struct HierarchyService {
    repository: Arc<dyn InstitutionRepository>,
    audit_repository: Arc<dyn AuditRepository>,
}

impl HierarchyService {
    /// Creates a new service from required dependencies.
    #[must_use]
    pub fn new(
        repository: Arc<dyn InstitutionRepository>,
        audit_repository: Arc<dyn AuditRepository>,
    ) -> Self {
        Self {
            repository,
            audit_repository,
        }
    }

    /// Returns one institution or `NotFound`.
    pub async fn get(&self, id: InstitutionId) -> AppResult<InstitutionNode> {
        self.repository
            .find_institution(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("institution '{id}' was not found")))
    }

    /// Returns direct children sorted by name.
    pub async fn children(&self, id: InstitutionId) -> AppResult<Vec<InstitutionNode>> {
        let tree = self.repository.load_tree().await?;
        Ok(tree.children(id)?.into_iter().cloned().collect())
    }

    /// Returns every descendant id, inactive ones included.
    pub async fn descendant_ids(&self, id: InstitutionId) -> AppResult<BTreeSet<InstitutionId>> {
        let tree = self.repository.load_tree().await?;
        tree.descendant_ids(id)
    }

    /// Returns the breadcrumb from the root down to `id`.
    pub async fn path(&self, id: InstitutionId) -> AppResult<Vec<InstitutionNode>> {
        let tree = self.repository.load_tree().await?;
        Ok(tree.path(id)?.into_iter().cloned().collect())
    }

    /// Returns institutions at one level sorted by name.
    pub async fn nodes_at_level(&self, level: u16) -> AppResult<Vec<InstitutionNode>> {
        let tree = self.repository.load_tree().await?;
        Ok(tree.nodes_at_level(level).into_iter().cloned().collect())
    }

    /// Inspects the current snapshot for structural problems.
    pub async fn integrity_report(&self) -> AppResult<HierarchyIntegrityReport> {
        let tree = self.repository.load_tree().await?;
        Ok(tree.integrity_report())
    }

    /// Creates a root or child institution with its level derived from the parent.
    ///
    /// The name is trimmed before it reaches the repository; a blank name is a
    /// `Validation` error.
    pub async fn create(
        &self,
        actor: &Principal,
        input: CreateInstitutionInput,
    ) -> AppResult<InstitutionNode> {
        let name = NonEmptyString::new(input.name.trim())?;
        let mut attempt = 1;
        let node = loop {
            let tree = self.repository.load_tree().await?;
            let level = tree.level_for_child(input.parent_id)?;

            let result = self
                .repository
                .insert_institution(NewInstitution {
                    parent_id: input.parent_id,
                    name: name.as_str().to_owned(),
                    institution_type: input.institution_type,
                    level,
                    base_version: tree.version(),
                })
                .await;

            match result {
                Err(AppError::Conflict(message)) if attempt < MAX_MUTATION_ATTEMPTS => {
                    tracing::warn!(
                        attempt,
                        %message,
                        "retrying institution create after version conflict"
                    );
                    attempt += 1;
                }
                other => break other?,
            }
        };

        tracing::info!(
            institution_id = %node.id(),
            level = node.level(),
            "institution created"
        );
        self.audit_repository
            .append_event(AuditEvent {
                actor_id: actor.id(),
                action: AuditAction::InstitutionCreated,
                resource_type: "institution".to_owned(),
                resource_id: node.id().to_string(),
                detail: Some(format!(
                    "created '{}' at level {}",
                    node.name().as_str(),
                    node.level()
                )),
            })
            .await?;

        Ok(node)
    }

    /// Moves `id` under `new_parent_id` and rewrites the subtree's levels.
    ///
    /// Returns the applied plan. `CycleDetected`, `InvalidParent` and
    /// `DepthLimitExceeded` abort with the hierarchy unchanged.
    pub async fn reparent(
        &self,
        actor: &Principal,
        id: InstitutionId,
        new_parent_id: Option<InstitutionId>,
    ) -> AppResult<ReparentPlan> {
        let mut attempt = 1;
        let plan = loop {
            let tree = self.repository.load_tree().await?;
            let plan = tree.plan_reparent(id, new_parent_id)?;

            match self.repository.apply_reparent(&plan).await {
                Ok(()) => break plan,
                Err(AppError::Conflict(message)) if attempt < MAX_MUTATION_ATTEMPTS => {
                    tracing::warn!(
                        institution_id = %id,
                        attempt,
                        %message,
                        "retrying institution move after version conflict"
                    );
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        };

        tracing::info!(
            institution_id = %id,
            rewritten_levels = plan.changed_levels().count(),
            "institution moved"
        );
        self.audit_repository
            .append_event(AuditEvent {
                actor_id: actor.id(),
                action: AuditAction::InstitutionMoved,
                resource_type: "institution".to_owned(),
                resource_id: id.to_string(),
                detail: Some(format!(
                    "moved from {} to {}",
                    describe_parent(plan.previous_parent_id),
                    describe_parent(plan.new_parent_id)
                )),
            })
            .await?;

        Ok(plan)
    }

    /// Deactivates one institution.
    ///
    /// Fails with `HasActiveChildren` when any descendant is still active and
    /// with `HasActivePrincipals` when active principals are homed here; the
    /// repository checks principals in the same transaction as the write.
    /// Deactivating an inactive institution is a no-op.
    pub async fn deactivate(&self, actor: &Principal, id: InstitutionId) -> AppResult<()> {
        let mut attempt = 1;
        loop {
            let tree = self.repository.load_tree().await?;
            if !tree.get(id)?.is_active() {
                return Ok(());
            }

            let active_descendants = tree
                .descendant_ids(id)?
                .into_iter()
                .filter(|descendant| tree.find(*descendant).is_some_and(InstitutionNode::is_active))
                .count();
            if active_descendants > 0 {
                return Err(AppError::HasActiveChildren(format!(
                    "institution '{id}' still has {active_descendants} active descendant(s)"
                )));
            }

            match self
                .repository
                .set_institution_active(id, false, tree.version())
                .await
            {
                Ok(()) => break,
                Err(AppError::Conflict(message)) if attempt < MAX_MUTATION_ATTEMPTS => {
                    tracing::warn!(
                        institution_id = %id,
                        attempt,
                        %message,
                        "retrying deactivation after version conflict"
                    );
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }

        tracing::info!(institution_id = %id, "institution deactivated");
        self.audit_repository
            .append_event(AuditEvent {
                actor_id: actor.id(),
                action: AuditAction::InstitutionDeactivated,
                resource_type: "institution".to_owned(),
                resource_id: id.to_string(),
                detail: None,
            })
            .await
    }

    /// Reactivates one institution.
    ///
    /// The parent must be active, so an inactive ancestor chain is restored
    /// top-down. Activating an active institution is a no-op.
    pub async fn activate(&self, actor: &Principal, id: InstitutionId) -> AppResult<()> {
        let mut attempt = 1;
        loop {
            let tree = self.repository.load_tree().await?;
            let node = tree.get(id)?;
            if node.is_active() {
                return Ok(());
            }
            if let Some(parent_id) = node.parent_id() {
                let parent = tree.find(parent_id).ok_or_else(|| {
                    AppError::InvalidParent(format!(
                        "parent institution '{parent_id}' does not exist"
                    ))
                })?;
                if !parent.is_active() {
                    return Err(AppError::InvalidParent(format!(
                        "parent institution '{parent_id}' is inactive"
                    )));
                }
            }

            match self
                .repository
                .set_institution_active(id, true, tree.version())
                .await
            {
                Ok(()) => break,
                Err(AppError::Conflict(message)) if attempt < MAX_MUTATION_ATTEMPTS => {
                    tracing::warn!(
                        institution_id = %id,
                        attempt,
                        %message,
                        "retrying activation after version conflict"
                    );
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }

        tracing::info!(institution_id = %id, "institution activated");
        self.audit_repository
            .append_event(AuditEvent {
                actor_id: actor.id(),
                action: AuditAction::InstitutionActivated,
                resource_type: "institution".to_owned(),
                resource_id: id.to_string(),
                detail: None,
            })
            .await
    }
}

fn describe_parent(parent_id: Option<InstitutionId>) -> String {
    parent_id.map_or_else(|| "root".to_owned(), |id| format!("institution '{id}'"))
}

#[cfg(test)]
mod tests;
