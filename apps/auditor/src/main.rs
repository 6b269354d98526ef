//! ATİS hierarchy auditor.
//!
//! Checks the role policy configuration once at startup, then periodically
//! inspects the institution hierarchy for orphans, level drift and parent
//! cycles.

#![forbid(unsafe_code)]

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use atis_application::{HierarchyService, PermissionDelegationValidator};
use atis_core::{AppError, AppResult};
use atis_domain::{HierarchyIntegrityReport, Role, RolePolicyTable};
use atis_infrastructure::{
    PostgresAuditRepository, PostgresInstitutionRepository, load_role_policy_file,
};

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct AuditorConfig {
    database_url: String,
    role_policy_path: Option<PathBuf>,
    audit_interval_secs: u64,
    run_once: bool,
    max_connections: u32,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = AuditorConfig::load()?;
    let policies = load_policies(&config).await?;
    report_policy(&policies);

    let pool = connect_pool(config.database_url.as_str(), config.max_connections).await?;
    sqlx::migrate!("../../crates/infrastructure/migrations")
        .run(&pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to run migrations: {error}")))?;

    let hierarchy_service = build_hierarchy_service(pool);

    info!(
        audit_interval_secs = config.audit_interval_secs,
        run_once = config.run_once,
        policy_version = policies.version(),
        "atis-hierarchy-auditor started"
    );

    loop {
        match hierarchy_service.integrity_report().await {
            Ok(report) => log_report(&report),
            Err(error) => warn!(error = %error, "hierarchy audit failed"),
        }

        if config.run_once {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_secs(config.audit_interval_secs)).await;
    }
}

async fn load_policies(config: &AuditorConfig) -> AppResult<RolePolicyTable> {
    match &config.role_policy_path {
        Some(path) => load_role_policy_file(path).await,
        None => Ok(RolePolicyTable::standard()),
    }
}

fn report_policy(policies: &RolePolicyTable) {
    let issues = policies.lint();
    for issue in &issues {
        warn!(policy_version = policies.version(), %issue, "role policy issue");
    }

    let validator = PermissionDelegationValidator::new(policies);
    let matrix = validator.role_permission_matrix();
    for role in Role::all() {
        let summary = matrix.get(role);
        info!(
            role = role.as_str(),
            required = summary.map_or(0, |summary| summary.requires.len()),
            forbidden = summary.map_or(0, |summary| summary.forbids.len()),
            defaults = validator.default_permissions_for_role(*role).len(),
            "role policy loaded"
        );
    }

    if issues.is_empty() {
        info!(policy_version = policies.version(), "role policy is consistent");
    }
}

fn log_report(report: &HierarchyIntegrityReport) {
    let statistics = &report.statistics;
    info!(
        version = report.version,
        total = statistics.total,
        active = statistics.active,
        inactive = statistics.inactive,
        max_depth = statistics.max_depth,
        "hierarchy audited"
    );

    for institution_id in &report.orphaned {
        warn!(institution_id = %institution_id, "institution parent does not exist");
    }
    for inconsistency in &report.level_inconsistencies {
        warn!(
            institution_id = %inconsistency.institution_id,
            level = inconsistency.level,
            expected_level = inconsistency.expected_level,
            "institution level does not match its parent"
        );
    }
    for cycle in &report.cycles {
        let chain = cycle
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" -> ");
        warn!(cycle = %chain, "institution parent chain loops");
    }
}

async fn connect_pool(database_url: &str, max_connections: u32) -> AppResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))
}

fn build_hierarchy_service(pool: PgPool) -> HierarchyService {
    HierarchyService::new(
        Arc::new(PostgresInstitutionRepository::new(pool.clone())),
        Arc::new(PostgresAuditRepository::new(pool)),
    )
}

impl AuditorConfig {
    fn load() -> AppResult<Self> {
        let database_url = required_env("DATABASE_URL")?;
        let role_policy_path = env::var("ROLE_POLICY_PATH")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);
        let audit_interval_secs = parse_env_u64("AUDIT_INTERVAL_SECS", 300)?;
        let run_once = parse_env_bool("AUDIT_RUN_ONCE", false)?;
        let max_connections = parse_env_u32("DATABASE_MAX_CONNECTIONS", 5)?;

        if audit_interval_secs == 0 {
            return Err(AppError::Validation(
                "AUDIT_INTERVAL_SECS must be greater than zero".to_owned(),
            ));
        }

        if max_connections == 0 {
            return Err(AppError::Validation(
                "DATABASE_MAX_CONNECTIONS must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            database_url,
            role_policy_path,
            audit_interval_secs,
            run_once,
            max_connections,
        })
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn required_env(name: &str) -> AppResult<String> {
    env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))
}

fn parse_env_u32(name: &str, default: u32) -> AppResult<u32> {
    match env::var(name) {
        Ok(value) => value.parse::<u32>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_u64(name: &str, default: u64) -> AppResult<u64> {
    match env::var(name) {
        Ok(value) => value.parse::<u64>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_bool(name: &str, default: bool) -> AppResult<bool> {
    match env::var(name) {
        Ok(value) => parse_bool(name, value.as_str()),
        Err(_) => Ok(default),
    }
}

fn parse_bool(name: &str, value: &str) -> AppResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AppError::Validation(format!(
            "invalid {name} value '{value}': expected a boolean"
        ))),
    }
}
