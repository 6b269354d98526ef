use std::str::FromStr;

use async_trait::async_trait;
use sqlx::{FromRow, PgPool, Postgres, Transaction};

use atis_application::{DepartmentRepository, InstitutionRepository, NewInstitution};
use atis_core::{AppError, AppResult};
use atis_domain::{
    Department, DepartmentId, InstitutionId, InstitutionNode, InstitutionNodeInput,
    InstitutionTree, InstitutionType, ReparentPlan,
};

/// PostgreSQL-backed institution and department repository.
///
/// A single-row `institution_tree_version` table carries the hierarchy
/// version. Mutations lock that row, compare it with the version they were
/// validated against and bump it in the same transaction as the row writes.
#[derive(Clone)]
pub struct PostgresInstitutionRepository {
    pool: PgPool,
}

impl PostgresInstitutionRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn begin(&self) -> AppResult<Transaction<'_, Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|error| AppError::Internal(format!("failed to begin transaction: {error}")))
    }
}

#[derive(Debug, FromRow)]
struct InstitutionRow {
    id: i64,
    parent_id: Option<i64>,
    name: String,
    institution_type: String,
    level: i16,
    is_active: bool,
}

#[derive(Debug, FromRow)]
struct DepartmentRow {
    id: i64,
    institution_id: i64,
    name: String,
    is_active: bool,
}

#[async_trait]
impl InstitutionRepository for PostgresInstitutionRepository {
    async fn load_tree(&self) -> AppResult<InstitutionTree> {
        let mut transaction = self.begin().await?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *transaction)
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to open hierarchy snapshot: {error}"))
            })?;

        let version = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT version
            FROM institution_tree_version
            WHERE id
            "#,
        )
        .fetch_one(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to read hierarchy version: {error}"))
        })?;

        let rows = sqlx::query_as::<_, InstitutionRow>(
            r#"
            SELECT id, parent_id, name, institution_type, level, is_active
            FROM institutions
            ORDER BY id
            "#,
        )
        .fetch_all(&mut *transaction)
        .await
        .map_err(|error| AppError::Internal(format!("failed to list institutions: {error}")))?;

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!("failed to commit transaction: {error}"))
        })?;

        let nodes = rows
            .into_iter()
            .map(institution_from_row)
            .collect::<AppResult<Vec<_>>>()?;
        InstitutionTree::new(version_from_db(version)?, nodes)
    }

    async fn find_institution(&self, id: InstitutionId) -> AppResult<Option<InstitutionNode>> {
        let row = sqlx::query_as::<_, InstitutionRow>(
            r#"
            SELECT id, parent_id, name, institution_type, level, is_active
            FROM institutions
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to find institution: {error}")))?;

        row.map(institution_from_row).transpose()
    }

    async fn insert_institution(&self, input: NewInstitution) -> AppResult<InstitutionNode> {
        let mut transaction = self.begin().await?;
        lock_version(&mut transaction, input.base_version).await?;

        let row = sqlx::query_as::<_, InstitutionRow>(
            r#"
            INSERT INTO institutions (parent_id, name, institution_type, level, is_active)
            VALUES ($1, $2, $3, $4, true)
            RETURNING id, parent_id, name, institution_type, level, is_active
            "#,
        )
        .bind(input.parent_id.map(|parent_id| parent_id.as_i64()))
        .bind(input.name.as_str())
        .bind(input.institution_type.as_str())
        .bind(level_to_db(input.level)?)
        .fetch_one(&mut *transaction)
        .await
        .map_err(|error| AppError::Internal(format!("failed to insert institution: {error}")))?;

        bump_version(&mut transaction).await?;
        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!("failed to commit transaction: {error}"))
        })?;

        institution_from_row(row)
    }

    async fn apply_reparent(&self, plan: &ReparentPlan) -> AppResult<()> {
        let mut transaction = self.begin().await?;
        lock_version(&mut transaction, plan.base_version).await?;

        let moved = sqlx::query(
            r#"
            UPDATE institutions
            SET parent_id = $2, updated_at = now()
            WHERE id = $1 AND parent_id IS NOT DISTINCT FROM $3
            "#,
        )
        .bind(plan.institution_id.as_i64())
        .bind(plan.new_parent_id.map(|parent_id| parent_id.as_i64()))
        .bind(plan.previous_parent_id.map(|parent_id| parent_id.as_i64()))
        .execute(&mut *transaction)
        .await
        .map_err(|error| AppError::Internal(format!("failed to move institution: {error}")))?;

        if moved.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "institution '{}' changed since the move was planned",
                plan.institution_id
            )));
        }

        for change in plan.changed_levels() {
            sqlx::query(
                r#"
                UPDATE institutions
                SET level = $2, updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(change.institution_id.as_i64())
            .bind(level_to_db(change.level)?)
            .execute(&mut *transaction)
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to rewrite institution level: {error}"))
            })?;
        }

        bump_version(&mut transaction).await?;
        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!("failed to commit transaction: {error}"))
        })?;

        Ok(())
    }

    async fn set_institution_active(
        &self,
        id: InstitutionId,
        is_active: bool,
        base_version: u64,
    ) -> AppResult<()> {
        let mut transaction = self.begin().await?;
        lock_version(&mut transaction, base_version).await?;
        if !is_active {
            ensure_no_active_principals(&mut transaction, id).await?;
        }

        let updated = sqlx::query(
            r#"
            UPDATE institutions
            SET is_active = $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .bind(is_active)
        .execute(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to update institution state: {error}"))
        })?;

        if updated.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("institution '{id}' was not found")));
        }

        bump_version(&mut transaction).await?;
        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!("failed to commit transaction: {error}"))
        })?;

        Ok(())
    }
}

#[async_trait]
impl DepartmentRepository for PostgresInstitutionRepository {
    async fn list_departments(&self) -> AppResult<Vec<Department>> {
        let rows = sqlx::query_as::<_, DepartmentRow>(
            r#"
            SELECT id, institution_id, name, is_active
            FROM departments
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to list departments: {error}")))?;

        rows.into_iter()
            .map(|row| {
                Department::new(
                    DepartmentId::new(row.id),
                    InstitutionId::new(row.institution_id),
                    row.name,
                    row.is_active,
                )
            })
            .collect()
    }
}

async fn lock_version(
    transaction: &mut Transaction<'_, Postgres>,
    base_version: u64,
) -> AppResult<()> {
    let stored = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT version
        FROM institution_tree_version
        WHERE id
        FOR UPDATE
        "#,
    )
    .fetch_one(&mut **transaction)
    .await
    .map_err(|error| AppError::Internal(format!("failed to lock hierarchy version: {error}")))?;

    let stored = version_from_db(stored)?;
    if stored != base_version {
        return Err(AppError::Conflict(format!(
            "hierarchy version is {stored}, mutation was validated against {base_version}"
        )));
    }

    Ok(())
}

/// Locks the institution row and counts principals homed there.
///
/// `FOR UPDATE` conflicts with the `FOR KEY SHARE` lock a principal insert or
/// home change takes through its foreign key, so no principal can be homed
/// here until the surrounding transaction ends.
async fn ensure_no_active_principals(
    transaction: &mut Transaction<'_, Postgres>,
    id: InstitutionId,
) -> AppResult<()> {
    let locked = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT id
        FROM institutions
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(id.as_i64())
    .fetch_optional(&mut **transaction)
    .await
    .map_err(|error| AppError::Internal(format!("failed to lock institution: {error}")))?;

    if locked.is_none() {
        return Err(AppError::NotFound(format!("institution '{id}' was not found")));
    }

    let active_principals = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*)
        FROM principals
        WHERE home_institution_id = $1 AND is_active
        "#,
    )
    .bind(id.as_i64())
    .fetch_one(&mut **transaction)
    .await
    .map_err(|error| AppError::Internal(format!("failed to count principals: {error}")))?;

    if active_principals > 0 {
        return Err(AppError::HasActivePrincipals(format!(
            "institution '{id}' is home to {active_principals} active principal(s)"
        )));
    }

    Ok(())
}

async fn bump_version(transaction: &mut Transaction<'_, Postgres>) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE institution_tree_version
        SET version = version + 1
        WHERE id
        "#,
    )
    .execute(&mut **transaction)
    .await
    .map_err(|error| AppError::Internal(format!("failed to bump hierarchy version: {error}")))?;

    Ok(())
}

fn institution_from_row(row: InstitutionRow) -> AppResult<InstitutionNode> {
    let level = u16::try_from(row.level).map_err(|error| {
        AppError::Internal(format!(
            "institution '{}' has invalid stored level {}: {error}",
            row.id, row.level
        ))
    })?;

    InstitutionNode::new(InstitutionNodeInput {
        id: InstitutionId::new(row.id),
        parent_id: row.parent_id.map(InstitutionId::new),
        name: row.name,
        institution_type: InstitutionType::from_str(row.institution_type.as_str())?,
        level,
        is_active: row.is_active,
    })
}

fn level_to_db(level: u16) -> AppResult<i16> {
    i16::try_from(level)
        .map_err(|error| AppError::Internal(format!("level {level} does not fit storage: {error}")))
}

fn version_from_db(version: i64) -> AppResult<u64> {
    u64::try_from(version).map_err(|error| {
        AppError::Internal(format!("invalid stored hierarchy version {version}: {error}"))
    })
}
