use std::collections::BTreeSet;
use std::sync::Arc;

use atis_core::AppResult;
use atis_domain::{DepartmentId, InstitutionId, Principal};

use crate::hierarchy_ports::{DepartmentRepository, InstitutionRepository};
use crate::scope_resolver::{ResourceKind, ResourceScope, ScopeResolver};

/// Application service answering scope questions against fresh snapshots.
///
/// Each call loads the hierarchy and departments anew, so a move committed
/// by another writer is visible on the next call.
#[derive(Clone)]
pub struct AccessScopeService {
    institution_repository: Arc<dyn InstitutionRepository>,
    department_repository: Arc<dyn DepartmentRepository>,
}

impl AccessScopeService {
    /// Creates a new service from required dependencies.
    #[must_use]
    pub fn new(
        institution_repository: Arc<dyn InstitutionRepository>,
        department_repository: Arc<dyn DepartmentRepository>,
    ) -> Self {
        Self {
            institution_repository,
            department_repository,
        }
    }

    /// Returns the active institutions `principal` may see.
    pub async fn visible_institution_ids(
        &self,
        principal: &Principal,
    ) -> AppResult<BTreeSet<InstitutionId>> {
        let tree = self.institution_repository.load_tree().await?;
        Ok(ScopeResolver::new(&tree, &[]).visible_institution_ids(principal))
    }

    /// Returns the active departments `principal` may see.
    pub async fn visible_department_ids(
        &self,
        principal: &Principal,
    ) -> AppResult<BTreeSet<DepartmentId>> {
        let tree = self.institution_repository.load_tree().await?;
        let departments = self.department_repository.list_departments().await?;
        Ok(ScopeResolver::new(&tree, &departments).visible_department_ids(principal))
    }

    /// Returns whether `principal` may see institution `id`.
    pub async fn can_access_institution(
        &self,
        principal: &Principal,
        id: InstitutionId,
    ) -> AppResult<bool> {
        Ok(self.visible_institution_ids(principal).await?.contains(&id))
    }

    /// Returns whether `principal` may see department `id`.
    pub async fn can_access_department(
        &self,
        principal: &Principal,
        id: DepartmentId,
    ) -> AppResult<bool> {
        Ok(self.visible_department_ids(principal).await?.contains(&id))
    }

    /// Returns the row filter for one resource family.
    pub async fn resource_scope(
        &self,
        principal: &Principal,
        kind: ResourceKind,
    ) -> AppResult<ResourceScope> {
        let tree = self.institution_repository.load_tree().await?;
        let departments = self.department_repository.list_departments().await?;
        Ok(ScopeResolver::new(&tree, &departments).resource_scope(principal, kind))
    }
}
