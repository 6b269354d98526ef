use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use atis_core::{AppError, AppResult};
use atis_domain::{
    AuditAction, InstitutionId, InstitutionNode, InstitutionNodeInput, InstitutionTree,
    InstitutionType, Principal, PrincipalId, ReparentPlan, Role,
};

use crate::hierarchy_ports::{
    AuditEvent, AuditRepository, CreateInstitutionInput, InstitutionRepository, NewInstitution,
};

use super::{HierarchyService, MAX_MUTATION_ATTEMPTS};

struct FakeInstitutionRepository {
    tree: Mutex<InstitutionTree>,
    pending_conflicts: Mutex<usize>,
    active_homes: HashMap<InstitutionId, u64>,
}

impl FakeInstitutionRepository {
    fn new(tree: InstitutionTree, active_homes: HashMap<InstitutionId, u64>) -> Self {
        Self {
            tree: Mutex::new(tree),
            pending_conflicts: Mutex::new(0),
            active_homes,
        }
    }

    async fn take_conflict(&self) -> AppResult<()> {
        let mut pending = self.pending_conflicts.lock().await;
        if *pending > 0 {
            *pending -= 1;
            return Err(AppError::Conflict("concurrent writer".to_owned()));
        }
        Ok(())
    }
}

#[async_trait]
impl InstitutionRepository for FakeInstitutionRepository {
    async fn load_tree(&self) -> AppResult<InstitutionTree> {
        Ok(self.tree.lock().await.clone())
    }

    async fn find_institution(&self, id: InstitutionId) -> AppResult<Option<InstitutionNode>> {
        Ok(self.tree.lock().await.find(id).cloned())
    }

    async fn insert_institution(&self, input: NewInstitution) -> AppResult<InstitutionNode> {
        self.take_conflict().await?;
        let mut tree = self.tree.lock().await;
        if tree.version() != input.base_version {
            return Err(AppError::Conflict("stale version".to_owned()));
        }

        let next_id = tree
            .nodes()
            .map(|node| node.id().as_i64())
            .max()
            .unwrap_or_default()
            + 1;
        let node = InstitutionNode::new(InstitutionNodeInput {
            id: InstitutionId::new(next_id),
            parent_id: input.parent_id,
            name: input.name,
            institution_type: input.institution_type,
            level: input.level,
            is_active: true,
        })?;
        tree.insert(node.clone())?;
        Ok(node)
    }

    async fn apply_reparent(&self, plan: &ReparentPlan) -> AppResult<()> {
        self.take_conflict().await?;
        self.tree.lock().await.apply_reparent(plan)
    }

    async fn set_institution_active(
        &self,
        id: InstitutionId,
        is_active: bool,
        base_version: u64,
    ) -> AppResult<()> {
        self.take_conflict().await?;
        let mut tree = self.tree.lock().await;
        if tree.version() != base_version {
            return Err(AppError::Conflict("stale version".to_owned()));
        }
        if !is_active && self.active_homes.get(&id).is_some_and(|count| *count > 0) {
            return Err(AppError::HasActivePrincipals(format!(
                "institution '{id}' has active principals"
            )));
        }
        tree.set_active(id, is_active)
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

fn id(value: i64) -> InstitutionId {
    InstitutionId::new(value)
}

fn node(
    value: i64,
    parent: Option<i64>,
    institution_type: InstitutionType,
    level: u16,
) -> InstitutionNode {
    InstitutionNode::new(InstitutionNodeInput {
        id: id(value),
        parent_id: parent.map(id),
        name: format!("{} {value}", institution_type.as_str()),
        institution_type,
        level,
        is_active: true,
    })
    .unwrap_or_else(|_| unreachable!())
}

/// Ministry(1) -> Region(2) -> Sector(3) -> School(4), plus Ministry(5).
fn seeded_tree() -> InstitutionTree {
    InstitutionTree::new(
        1,
        vec![
            node(1, None, InstitutionType::Ministry, 1),
            node(2, Some(1), InstitutionType::Region, 2),
            node(3, Some(2), InstitutionType::Sector, 3),
            node(4, Some(3), InstitutionType::School, 4),
            node(5, None, InstitutionType::Ministry, 1),
        ],
    )
    .unwrap_or_else(|_| unreachable!())
}

fn actor() -> Principal {
    Principal::new(PrincipalId::new(100), Role::SuperAdmin)
}

struct Harness {
    service: HierarchyService,
    repository: Arc<FakeInstitutionRepository>,
    audit_repository: Arc<FakeAuditRepository>,
}

fn harness(active_homes: HashMap<InstitutionId, u64>) -> Harness {
    let repository = Arc::new(FakeInstitutionRepository::new(seeded_tree(), active_homes));
    let audit_repository = Arc::new(FakeAuditRepository::default());
    let service = HierarchyService::new(repository.clone(), audit_repository.clone());

    Harness {
        service,
        repository,
        audit_repository,
    }
}

#[tokio::test]
async fn get_unknown_institution_is_not_found() {
    let harness = harness(HashMap::new());

    let result = harness.service.get(id(99)).await;

    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn create_child_derives_level_from_parent() {
    let harness = harness(HashMap::new());

    let created = harness
        .service
        .create(
            &actor(),
            CreateInstitutionInput {
                parent_id: Some(id(3)),
                name: "Lyceum 7".to_owned(),
                institution_type: InstitutionType::School,
            },
        )
        .await;

    let created = created.unwrap_or_else(|_| unreachable!());
    assert_eq!(created.level(), 4);
    assert_eq!(created.parent_id(), Some(id(3)));

    let events = harness.audit_repository.events.lock().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, AuditAction::InstitutionCreated);
    assert_eq!(events[0].actor_id, PrincipalId::new(100));
}

#[tokio::test]
async fn create_trims_name_and_rejects_blank_names() {
    let harness = harness(HashMap::new());

    let created = harness
        .service
        .create(
            &actor(),
            CreateInstitutionInput {
                parent_id: Some(id(3)),
                name: "  Lyceum 8 \t".to_owned(),
                institution_type: InstitutionType::School,
            },
        )
        .await;
    assert!(matches!(created, Ok(node) if node.name().as_str() == "Lyceum 8"));

    let blank = harness
        .service
        .create(
            &actor(),
            CreateInstitutionInput {
                parent_id: Some(id(3)),
                name: "   ".to_owned(),
                institution_type: InstitutionType::School,
            },
        )
        .await;
    assert!(matches!(blank, Err(AppError::Validation(_))));
    assert_eq!(harness.audit_repository.events.lock().await.len(), 1);
}

#[tokio::test]
async fn create_under_inactive_parent_is_invalid_parent() {
    let harness = harness(HashMap::new());
    assert!(
        harness
            .service
            .deactivate(&actor(), id(5))
            .await
            .is_ok()
    );

    let result = harness
        .service
        .create(
            &actor(),
            CreateInstitutionInput {
                parent_id: Some(id(5)),
                name: "Region 9".to_owned(),
                institution_type: InstitutionType::Region,
            },
        )
        .await;

    assert!(matches!(result, Err(AppError::InvalidParent(_))));
}

#[tokio::test]
async fn create_retries_after_version_conflict() {
    let harness = harness(HashMap::new());
    *harness.repository.pending_conflicts.lock().await = MAX_MUTATION_ATTEMPTS - 1;

    let result = harness
        .service
        .create(
            &actor(),
            CreateInstitutionInput {
                parent_id: None,
                name: "Ministry B".to_owned(),
                institution_type: InstitutionType::Ministry,
            },
        )
        .await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn reparent_moves_subtree_and_keeps_relative_depth() {
    let harness = harness(HashMap::new());

    let plan = harness.service.reparent(&actor(), id(2), Some(id(5))).await;
    assert!(plan.is_ok());

    let descendants = harness
        .service
        .descendant_ids(id(5))
        .await
        .unwrap_or_default();
    assert_eq!(descendants, [2, 3, 4].into_iter().map(id).collect());

    let path = harness.service.path(id(4)).await.unwrap_or_default();
    let levels: Vec<(i64, u16)> = path
        .iter()
        .map(|node| (node.id().as_i64(), node.level()))
        .collect();
    assert_eq!(levels, vec![(5, 1), (2, 2), (3, 3), (4, 4)]);

    let events = harness.audit_repository.events.lock().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, AuditAction::InstitutionMoved);
}

#[tokio::test]
async fn reparent_into_own_subtree_leaves_tree_unchanged() {
    let harness = harness(HashMap::new());

    let result = harness.service.reparent(&actor(), id(2), Some(id(4))).await;

    assert!(matches!(result, Err(AppError::CycleDetected(_))));
    assert_eq!(*harness.repository.tree.lock().await, seeded_tree());
    assert!(harness.audit_repository.events.lock().await.is_empty());
}

#[tokio::test]
async fn reparent_gives_up_after_repeated_conflicts() {
    let harness = harness(HashMap::new());
    *harness.repository.pending_conflicts.lock().await = MAX_MUTATION_ATTEMPTS;

    let result = harness.service.reparent(&actor(), id(2), Some(id(5))).await;

    assert!(matches!(result, Err(AppError::Conflict(_))));
    assert_eq!(*harness.repository.tree.lock().await, seeded_tree());
}

#[tokio::test]
async fn deactivate_with_active_descendants_is_rejected() {
    let harness = harness(HashMap::new());

    let result = harness.service.deactivate(&actor(), id(2)).await;

    assert!(matches!(result, Err(AppError::HasActiveChildren(_))));
}

#[tokio::test]
async fn deactivate_with_active_principals_is_rejected() {
    let harness = harness(HashMap::from([(id(4), 2)]));

    let result = harness.service.deactivate(&actor(), id(4)).await;

    assert!(matches!(result, Err(AppError::HasActivePrincipals(_))));
    assert_eq!(*harness.repository.tree.lock().await, seeded_tree());
    assert!(harness.audit_repository.events.lock().await.is_empty());
}

#[tokio::test]
async fn deactivate_then_activate_round_trip() {
    let harness = harness(HashMap::new());

    assert!(harness.service.deactivate(&actor(), id(4)).await.is_ok());
    assert!(harness.service.deactivate(&actor(), id(4)).await.is_ok());
    let deactivated = harness.service.get(id(4)).await;
    assert!(matches!(deactivated, Ok(node) if !node.is_active()));

    assert!(harness.service.activate(&actor(), id(4)).await.is_ok());
    let activated = harness.service.get(id(4)).await;
    assert!(matches!(activated, Ok(node) if node.is_active()));

    let actions: Vec<AuditAction> = harness
        .audit_repository
        .events
        .lock()
        .await
        .iter()
        .map(|event| event.action)
        .collect();
    assert_eq!(
        actions,
        vec![
            AuditAction::InstitutionDeactivated,
            AuditAction::InstitutionActivated
        ]
    );
}

#[tokio::test]
async fn activate_below_inactive_parent_is_invalid_parent() {
    let harness = harness(HashMap::new());
    assert!(harness.service.deactivate(&actor(), id(4)).await.is_ok());
    assert!(harness.service.deactivate(&actor(), id(3)).await.is_ok());

    let result = harness.service.activate(&actor(), id(4)).await;

    assert!(matches!(result, Err(AppError::InvalidParent(_))));
}

#[tokio::test]
async fn children_and_levels_are_read_from_snapshot() {
    let harness = harness(HashMap::new());

    let children = harness.service.children(id(1)).await.unwrap_or_default();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].id(), id(2));

    let roots = harness.service.nodes_at_level(1).await.unwrap_or_default();
    assert_eq!(roots.len(), 2);

    let report = harness.service.integrity_report().await;
    assert!(matches!(report, Ok(report) if report.is_consistent()));
}
