use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use atis_core::{AppError, AppResult};
use atis_domain::{
    AuditAction, InstitutionId, InstitutionNode, InstitutionNodeInput, InstitutionTree,
    InstitutionType, Permission, Principal, PrincipalId, ReparentPlan, Role, RolePolicyTable,
};

use crate::hierarchy_ports::{
    AuditEvent, AuditRepository, InstitutionRepository, NewInstitution, PrincipalRepository,
};

use super::PermissionDelegationService;

struct FixedInstitutionRepository {
    tree: InstitutionTree,
}

#[async_trait]
impl InstitutionRepository for FixedInstitutionRepository {
    async fn load_tree(&self) -> AppResult<InstitutionTree> {
        Ok(self.tree.clone())
    }

    async fn find_institution(&self, id: InstitutionId) -> AppResult<Option<InstitutionNode>> {
        Ok(self.tree.find(id).cloned())
    }

    async fn insert_institution(&self, _input: NewInstitution) -> AppResult<InstitutionNode> {
        Err(AppError::Internal("fixture hierarchy is read-only".to_owned()))
    }

    async fn apply_reparent(&self, _plan: &ReparentPlan) -> AppResult<()> {
        Err(AppError::Internal("fixture hierarchy is read-only".to_owned()))
    }

    async fn set_institution_active(
        &self,
        _id: InstitutionId,
        _is_active: bool,
        _base_version: u64,
    ) -> AppResult<()> {
        Err(AppError::Internal("fixture hierarchy is read-only".to_owned()))
    }
}

#[derive(Default)]
struct FakePrincipalRepository {
    principals: Mutex<HashMap<PrincipalId, Principal>>,
    /// Served once by `find_principal` before the stored principal.
    stale_reads: Mutex<HashMap<PrincipalId, Principal>>,
}

#[async_trait]
impl PrincipalRepository for FakePrincipalRepository {
    async fn find_principal(&self, id: PrincipalId) -> AppResult<Option<Principal>> {
        if let Some(stale) = self.stale_reads.lock().await.remove(&id) {
            return Ok(Some(stale));
        }
        Ok(self.principals.lock().await.get(&id).cloned())
    }

    async fn replace_granted_permissions(
        &self,
        id: PrincipalId,
        expected: &BTreeSet<Permission>,
        permissions: &BTreeSet<Permission>,
    ) -> AppResult<()> {
        let mut principals = self.principals.lock().await;
        let principal = principals
            .remove(&id)
            .ok_or_else(|| AppError::NotFound(format!("principal '{id}' was not found")))?;
        if principal.granted_permissions() != expected {
            principals.insert(id, principal);
            return Err(AppError::Conflict("permissions changed".to_owned()));
        }
        principals.insert(id, principal.with_permissions(permissions.iter().cloned()));
        Ok(())
    }
}

#[derive(Default)]
struct FakeAuditRepository {
    events: Mutex<Vec<AuditEvent>>,
}

#[async_trait]
impl AuditRepository for FakeAuditRepository {
    async fn append_event(&self, event: AuditEvent) -> AppResult<()> {
        self.events.lock().await.push(event);
        Ok(())
    }
}

fn tags(values: &[&str]) -> BTreeSet<Permission> {
    values
        .iter()
        .map(|value| Permission::new(*value).unwrap_or_else(|_| unreachable!()))
        .collect()
}

fn node(
    value: i64,
    parent: Option<i64>,
    institution_type: InstitutionType,
    level: u16,
) -> InstitutionNode {
    InstitutionNode::new(InstitutionNodeInput {
        id: InstitutionId::new(value),
        parent_id: parent.map(InstitutionId::new),
        name: format!("{} {value}", institution_type.as_str()),
        institution_type,
        level,
        is_active: true,
    })
    .unwrap_or_else(|_| unreachable!())
}

/// Ministry(1) -> {Region(2) -> Sector(3) -> School(4), Region(7) -> Sector(8)}.
fn fixture_tree() -> InstitutionTree {
    InstitutionTree::new(
        1,
        vec![
            node(1, None, InstitutionType::Ministry, 1),
            node(2, Some(1), InstitutionType::Region, 2),
            node(3, Some(2), InstitutionType::Sector, 3),
            node(4, Some(3), InstitutionType::School, 4),
            node(7, Some(1), InstitutionType::Region, 2),
            node(8, Some(7), InstitutionType::Sector, 3),
        ],
    )
    .unwrap_or_else(|_| unreachable!())
}

const REGION_ADMIN: PrincipalId = PrincipalId::new(1);
const SECTOR_ADMIN: PrincipalId = PrincipalId::new(2);
const FOREIGN_SECTOR_ADMIN: PrincipalId = PrincipalId::new(3);

fn region_admin() -> Principal {
    Principal::new(REGION_ADMIN, Role::RegionAdmin)
        .with_home_institution(InstitutionId::new(2))
        .with_permissions(tags(&[
            "institutions.read",
            "users.read",
            "users.update",
            "surveys.read",
        ]))
}

struct Harness {
    service: PermissionDelegationService,
    principal_repository: Arc<FakePrincipalRepository>,
    audit_repository: Arc<FakeAuditRepository>,
}

fn harness() -> Harness {
    let sector_admin = Principal::new(SECTOR_ADMIN, Role::SektorAdmin)
        .with_home_institution(InstitutionId::new(3))
        .with_permissions(tags(&["institutions.read", "users.read"]));
    let foreign_sector_admin = Principal::new(FOREIGN_SECTOR_ADMIN, Role::SektorAdmin)
        .with_home_institution(InstitutionId::new(8))
        .with_permissions(tags(&["institutions.read", "users.read"]));

    let principal_repository = Arc::new(FakePrincipalRepository {
        principals: Mutex::new(HashMap::from([
            (REGION_ADMIN, region_admin()),
            (SECTOR_ADMIN, sector_admin),
            (FOREIGN_SECTOR_ADMIN, foreign_sector_admin),
        ])),
        stale_reads: Mutex::new(HashMap::new()),
    });
    let audit_repository = Arc::new(FakeAuditRepository::default());
    let service = PermissionDelegationService::new(
        Arc::new(RolePolicyTable::standard()),
        Arc::new(FixedInstitutionRepository {
            tree: fixture_tree(),
        }),
        principal_repository.clone(),
        audit_repository.clone(),
    );

    Harness {
        service,
        principal_repository,
        audit_repository,
    }
}

#[tokio::test]
async fn apply_delegation_persists_and_audits() {
    let harness = harness();
    let proposed = tags(&["institutions.read", "users.read", "users.update"]);

    let report = harness
        .service
        .apply_delegation(&region_admin(), SECTOR_ADMIN, &proposed)
        .await;

    let report = report.unwrap_or_default();
    assert_eq!(report.added, tags(&["users.update"]));

    let stored = harness
        .principal_repository
        .find_principal(SECTOR_ADMIN)
        .await
        .unwrap_or_default();
    assert!(matches!(stored, Some(principal) if principal.granted_permissions() == &proposed));

    let events = harness.audit_repository.events.lock().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, AuditAction::SecurityPermissionsDelegated);
    assert_eq!(events[0].resource_id, "2");
    assert_eq!(
        events[0].detail.as_deref(),
        Some("added [users.update]; removed []")
    );
}

#[tokio::test]
async fn apply_delegation_rejects_escalation_without_writing() {
    let harness = harness();
    let proposed = tags(&["institutions.read", "users.read", "users.delete"]);

    let result = harness
        .service
        .apply_delegation(&region_admin(), SECTOR_ADMIN, &proposed)
        .await;

    assert!(matches!(result, Err(AppError::Validation(_))));
    let stored = harness
        .principal_repository
        .find_principal(SECTOR_ADMIN)
        .await
        .unwrap_or_default();
    assert!(matches!(
        stored,
        Some(principal) if principal.granted_permissions() == &tags(&["institutions.read", "users.read"])
    ));
    assert!(harness.audit_repository.events.lock().await.is_empty());
}

#[tokio::test]
async fn concurrent_revocation_is_revalidated_before_writing() {
    let harness = harness();
    // Another writer revoked reports.read after this read was served.
    harness.principal_repository.stale_reads.lock().await.insert(
        SECTOR_ADMIN,
        Principal::new(SECTOR_ADMIN, Role::SektorAdmin)
            .with_home_institution(InstitutionId::new(3))
            .with_permissions(tags(&["institutions.read", "users.read", "reports.read"])),
    );
    let proposed = tags(&[
        "institutions.read",
        "users.read",
        "reports.read",
        "surveys.read",
    ]);

    let result = harness
        .service
        .apply_delegation(&region_admin(), SECTOR_ADMIN, &proposed)
        .await;

    assert!(matches!(
        result,
        Err(AppError::Validation(message)) if message.contains("reports.read")
    ));
    let stored = harness
        .principal_repository
        .find_principal(SECTOR_ADMIN)
        .await
        .unwrap_or_default();
    assert!(matches!(
        stored,
        Some(principal) if principal.granted_permissions() == &tags(&["institutions.read", "users.read"])
    ));
    assert!(harness.audit_repository.events.lock().await.is_empty());
}

#[tokio::test]
async fn dry_run_reports_without_writing() {
    let harness = harness();
    let proposed = tags(&["users.read", "users.delete"]);

    let report = harness
        .service
        .dry_run(&region_admin(), SECTOR_ADMIN, &proposed)
        .await
        .unwrap_or_default();

    assert_eq!(report.added, tags(&["users.delete"]));
    assert_eq!(report.removed, tags(&["institutions.read"]));
    assert_eq!(report.admin_missing_permissions, tags(&["users.delete"]));
    assert_eq!(report.missing_required, tags(&["institutions.read"]));
    assert!(harness.audit_repository.events.lock().await.is_empty());
}

#[tokio::test]
async fn target_outside_scope_is_forbidden() {
    let harness = harness();

    let result = harness
        .service
        .dry_run(
            &region_admin(),
            FOREIGN_SECTOR_ADMIN,
            &tags(&["institutions.read", "users.read"]),
        )
        .await;

    assert!(matches!(result, Err(AppError::Forbidden(_))));
}

#[tokio::test]
async fn peer_role_is_forbidden() {
    let harness = harness();
    let sector_admin = Principal::new(SECTOR_ADMIN, Role::SektorAdmin)
        .with_home_institution(InstitutionId::new(3));

    let result = harness
        .service
        .apply_delegation(&sector_admin, REGION_ADMIN, &BTreeSet::new())
        .await;

    assert!(matches!(result, Err(AppError::Forbidden(_))));
}

#[tokio::test]
async fn unknown_target_is_not_found() {
    let harness = harness();

    let result = harness
        .service
        .dry_run(&region_admin(), PrincipalId::new(404), &BTreeSet::new())
        .await;

    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn unchanged_proposal_is_not_written() {
    let harness = harness();

    let result = harness
        .service
        .apply_delegation(
            &region_admin(),
            SECTOR_ADMIN,
            &tags(&["institutions.read", "users.read"]),
        )
        .await;

    assert!(matches!(result, Ok(report) if !report.has_changes()));
    assert!(harness.audit_repository.events.lock().await.is_empty());
}

#[test]
fn role_level_dry_run_matches_validator() {
    let harness = harness();

    let report = harness.service.dry_run_for_role(
        &region_admin(),
        Role::SektorAdmin,
        &tags(&["users.read"]),
        &tags(&["users.read", "users.delete"]),
    );

    assert_eq!(report.added, tags(&["users.delete"]));
    assert_eq!(report.admin_missing_permissions, tags(&["users.delete"]));
    assert!(
        harness
            .service
            .default_permissions_for_role(Role::SektorAdmin)
            .is_superset(&tags(&["institutions.read", "users.read"]))
    );
    assert_eq!(
        harness.service.role_permission_matrix().len(),
        Role::all().len()
    );
}
