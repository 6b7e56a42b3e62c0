use crate::calculators::{self, SnapshotBundle};
use crate::config;
use crate::db::Database;
use crate::errors::EngineResult;
use crate::models::{
    BudgetSnapshot, ChangeRequestSnapshot, ComputationStrategy, ComputeOutcome, ConfigWithDefinition,
    EarnedValueSnapshot, IterationSnapshot, SkippedIndicator, TaskSnapshot,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use sha2::Digest as _;
use std::collections::BTreeSet;

pub const SKIP_REASON_GOVERNANCE: &str = "GOVERNANCE_FLAG_DISABLED";

/// Upstream data domains a calculator can read. Used to fetch only what the
/// enabled strategies actually need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DataDomain {
    Tasks,
    Iterations,
    Budget,
    EarnedValue,
    ChangeRequests,
    Risks,
}

impl DataDomain {
    pub fn for_strategy(strategy: ComputationStrategy) -> Option<Self> {
        match strategy {
            ComputationStrategy::Wip
            | ComputationStrategy::Throughput
            | ComputationStrategy::CycleTime => Some(Self::Tasks),
            ComputationStrategy::Velocity => Some(Self::Iterations),
            ComputationStrategy::BudgetBurn | ComputationStrategy::ForecastAtCompletion => {
                Some(Self::Budget)
            }
            ComputationStrategy::ScheduleVariance | ComputationStrategy::Spi => Some(Self::EarnedValue),
            ComputationStrategy::ChangeRequestCycleTime
            | ComputationStrategy::ChangeRequestApprovalRate => Some(Self::ChangeRequests),
            ComputationStrategy::OpenRiskCount => Some(Self::Risks),
            ComputationStrategy::EscapedDefects => None,
        }
    }
}

/// Read contracts the engine consumes from its environment. Each method
/// returns an already-materialized snapshot; the engine decides which to
/// call, the provider never pre-filters.
pub trait SnapshotProvider {
    fn tasks(&self, project_id: &str) -> EngineResult<Vec<TaskSnapshot>>;
    fn iterations(&self, project_id: &str) -> EngineResult<Vec<IterationSnapshot>>;
    fn budget(&self, project_id: &str) -> EngineResult<BudgetSnapshot>;
    fn earned_value(&self, project_id: &str) -> EngineResult<EarnedValueSnapshot>;
    fn change_requests(&self, project_id: &str) -> EngineResult<Vec<ChangeRequestSnapshot>>;
    fn open_risk_count(&self, project_id: &str) -> EngineResult<Option<u32>>;
}

/// One synchronous compute pass over a project's enabled indicators. No
/// state survives between invocations; concurrent passes converge through
/// the (project, indicator, date) upsert key.
pub fn run_compute(
    db: &Database,
    provider: &dyn SnapshotProvider,
    project_id: &str,
    now: DateTime<Utc>,
) -> EngineResult<ComputeOutcome> {
    let enabled = config::get_enabled_configs(db, project_id)?;
    if enabled.is_empty() {
        return Ok(ComputeOutcome::default());
    }

    let flags = db.governance_flags(project_id)?;

    // Second enforcement point: a flag toggled off after an indicator was
    // enabled must gate computation too.
    let mut governed: Vec<ConfigWithDefinition> = Vec::new();
    let mut skipped: Vec<SkippedIndicator> = Vec::new();
    for entry in enabled {
        match entry.definition.required_governance_flag {
            Some(flag) if !flags.get(flag) => skipped.push(SkippedIndicator {
                indicator_code: entry.definition.code.clone(),
                indicator_name: entry.definition.name.clone(),
                reason: SKIP_REASON_GOVERNANCE.to_string(),
                governance_flag: Some(flag),
            }),
            _ => governed.push(entry),
        }
    }

    let strategies: Vec<ComputationStrategy> = governed
        .iter()
        .map(|entry| resolve_strategy(&entry.definition.strategy, &entry.definition.code))
        .collect();

    let domains: BTreeSet<DataDomain> = strategies
        .iter()
        .filter_map(|strategy| DataDomain::for_strategy(*strategy))
        .collect();
    let bundle = fetch_bundle(provider, project_id, &domains)?;

    let as_of_date = now.date_naive();
    let mut computed = Vec::with_capacity(governed.len());
    for (entry, strategy) in governed.iter().zip(strategies.iter()) {
        let mut result = calculators::dispatch(*strategy, &bundle, now);
        let input_hash = input_hash(*strategy, &bundle);
        if let Some(map) = result.value_json.as_object_mut() {
            map.insert("inputHash".to_string(), json!(input_hash));
        }

        // Writes are isolated per indicator; one failed persist must not
        // abort the batch.
        match db.upsert_computed_value(project_id, &entry.definition, as_of_date, &result, now) {
            Ok(value) => computed.push(value),
            Err(error) => {
                tracing::error!(code = %entry.definition.code, error = %error, "failed to persist computed value");
            }
        }
    }

    computed.sort_by(|a, b| a.indicator_code.cmp(&b.indicator_code));
    skipped.sort_by(|a, b| a.indicator_code.cmp(&b.indicator_code));
    Ok(ComputeOutcome { computed, skipped })
}

fn resolve_strategy(raw: &str, code: &str) -> ComputationStrategy {
    match ComputationStrategy::parse(raw) {
        Some(strategy) => strategy,
        None => {
            tracing::warn!(code = %code, strategy = %raw, "unknown computation strategy, degrading to placeholder");
            ComputationStrategy::EscapedDefects
        }
    }
}

fn fetch_bundle(
    provider: &dyn SnapshotProvider,
    project_id: &str,
    domains: &BTreeSet<DataDomain>,
) -> EngineResult<SnapshotBundle> {
    let mut bundle = SnapshotBundle::default();
    for domain in domains {
        match domain {
            DataDomain::Tasks => bundle.tasks = provider.tasks(project_id)?,
            DataDomain::Iterations => bundle.iterations = provider.iterations(project_id)?,
            DataDomain::Budget => bundle.budget = provider.budget(project_id)?,
            DataDomain::EarnedValue => bundle.earned_value = provider.earned_value(project_id)?,
            DataDomain::ChangeRequests => {
                bundle.change_requests = provider.change_requests(project_id)?
            }
            DataDomain::Risks => bundle.open_risk_count = provider.open_risk_count(project_id)?,
        }
    }
    Ok(bundle)
}

/// Deterministic digest of the normalized inputs that fed one calculator:
/// only the fields its strategy reads, in fetch order. 16 hex chars of
/// SHA-256 over the canonical JSON.
pub fn input_hash(strategy: ComputationStrategy, bundle: &SnapshotBundle) -> String {
    let normalized = match DataDomain::for_strategy(strategy) {
        Some(DataDomain::Tasks) => json!(bundle
            .tasks
            .iter()
            .map(|task| {
                json!({
                    "status": task.status.as_str(),
                    "start": task.started_at.map(|at| at.to_rfc3339()),
                    "completion": task.completed_at.map(|at| at.to_rfc3339()),
                })
            })
            .collect::<Vec<_>>()),
        Some(DataDomain::Iterations) => json!(bundle
            .iterations
            .iter()
            .map(|iteration| {
                json!({
                    "status": iteration.status,
                    "completedPoints": iteration.completed_points,
                })
            })
            .collect::<Vec<_>>()),
        Some(DataDomain::Budget) => json!({
            "baseline": bundle.budget.baseline_budget,
            "revised": bundle.budget.revised_budget,
            "actual": bundle.budget.actual_cost,
            "forecast": bundle.budget.forecast_at_completion,
        }),
        Some(DataDomain::EarnedValue) => json!({
            "ev": bundle.earned_value.earned_value,
            "pv": bundle.earned_value.planned_value,
        }),
        Some(DataDomain::ChangeRequests) => json!(bundle
            .change_requests
            .iter()
            .map(|request| {
                json!({
                    "status": request.status,
                    "createdAt": request.created_at.to_rfc3339(),
                    "approvedAt": request.approved_at.map(|at| at.to_rfc3339()),
                })
            })
            .collect::<Vec<_>>()),
        Some(DataDomain::Risks) => json!({ "openRiskCount": bundle.open_risk_count }),
        None => json!(null),
    };

    let payload = format!("{}:{}", strategy.as_str(), normalized);
    let digest = sha2::Sha256::digest(payload.as_bytes());
    let mut hex = digest.iter().fold(String::with_capacity(64), |mut acc, byte| {
        acc.push_str(&format!("{:02x}", byte));
        acc
    });
    hex.truncate(16);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::upsert_configs;
    use crate::db::Database;
    use crate::models::{GovernanceFlags, TaskStatus, UpsertConfigItem};
    use chrono::TimeZone;
    use std::sync::Mutex;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap()
    }

    fn open_db(dir: &tempfile::TempDir) -> Database {
        Database::new(&dir.path().join("test.db")).expect("db")
    }

    fn enable(db: &Database, project_id: &str, code: &str) {
        upsert_configs(
            db,
            project_id,
            &[UpsertConfigItem {
                indicator_code: code.to_string(),
                enabled: true,
                target: None,
                threshold_warning: None,
                threshold_critical: None,
            }],
        )
        .expect("enable indicator");
    }

    /// In-memory provider that records which domains were fetched.
    #[derive(Default)]
    struct FakeProvider {
        tasks: Vec<TaskSnapshot>,
        iterations: Vec<IterationSnapshot>,
        budget: BudgetSnapshot,
        earned_value: EarnedValueSnapshot,
        change_requests: Vec<ChangeRequestSnapshot>,
        open_risks: Option<u32>,
        fetched: Mutex<Vec<&'static str>>,
    }

    impl FakeProvider {
        fn record(&self, domain: &'static str) {
            self.fetched.lock().unwrap().push(domain);
        }

        fn fetched(&self) -> Vec<&'static str> {
            self.fetched.lock().unwrap().clone()
        }
    }

    impl SnapshotProvider for FakeProvider {
        fn tasks(&self, _project_id: &str) -> EngineResult<Vec<TaskSnapshot>> {
            self.record("tasks");
            Ok(self.tasks.clone())
        }

        fn iterations(&self, _project_id: &str) -> EngineResult<Vec<IterationSnapshot>> {
            self.record("iterations");
            Ok(self.iterations.clone())
        }

        fn budget(&self, _project_id: &str) -> EngineResult<BudgetSnapshot> {
            self.record("budget");
            Ok(self.budget.clone())
        }

        fn earned_value(&self, _project_id: &str) -> EngineResult<EarnedValueSnapshot> {
            self.record("earned_value");
            Ok(self.earned_value.clone())
        }

        fn change_requests(&self, _project_id: &str) -> EngineResult<Vec<ChangeRequestSnapshot>> {
            self.record("change_requests");
            Ok(self.change_requests.clone())
        }

        fn open_risk_count(&self, _project_id: &str) -> EngineResult<Option<u32>> {
            self.record("risks");
            Ok(self.open_risks)
        }
    }

    fn in_progress_task() -> TaskSnapshot {
        TaskSnapshot {
            status: TaskStatus::InProgress,
            started_at: Some(now() - chrono::Duration::days(3)),
            completed_at: None,
        }
    }

    #[test]
    fn no_enabled_configs_returns_an_empty_outcome_without_fetching() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = open_db(&dir);
        let project = db
            .create_project("Apollo", None, &GovernanceFlags::default())
            .expect("project");
        let provider = FakeProvider::default();

        let outcome = run_compute(&db, &provider, &project.id, now()).expect("compute");
        assert!(outcome.computed.is_empty());
        assert!(outcome.skipped.is_empty());
        assert!(provider.fetched().is_empty());
    }

    #[test]
    fn only_needed_domains_are_fetched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = open_db(&dir);
        let project = db
            .create_project("Apollo", None, &GovernanceFlags::default())
            .expect("project");
        enable(&db, &project.id, "wip");

        let provider = FakeProvider {
            tasks: vec![in_progress_task()],
            ..Default::default()
        };
        run_compute(&db, &provider, &project.id, now()).expect("compute");
        assert_eq!(provider.fetched(), vec!["tasks"]);
    }

    #[test]
    fn governance_flag_toggled_off_after_enable_skips_and_writes_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = open_db(&dir);
        let flags = GovernanceFlags {
            iterations_enabled: true,
            ..Default::default()
        };
        let project = db.create_project("Apollo", None, &flags).expect("project");
        enable(&db, &project.id, "velocity");
        db.set_governance_flags(&project.id, &GovernanceFlags::default())
            .expect("toggle off");

        let provider = FakeProvider::default();
        let outcome = run_compute(&db, &provider, &project.id, now()).expect("compute");

        assert!(outcome.computed.is_empty());
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].indicator_code, "velocity");
        assert_eq!(outcome.skipped[0].reason, SKIP_REASON_GOVERNANCE);
        assert_eq!(
            outcome.skipped[0].governance_flag,
            Some(crate::models::GovernanceFlag::IterationsEnabled)
        );
        // Nothing reached the value sink, and iterations were never fetched.
        assert!(provider.fetched().is_empty());
        let velocity = db
            .find_definition_by_code("velocity", None)
            .expect("lookup")
            .expect("definition");
        assert!(db
            .find_computed_value(&project.id, &velocity.id, now().date_naive())
            .expect("read")
            .is_none());
    }

    #[test]
    fn governed_indicator_is_computed_and_persisted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = open_db(&dir);
        let flags = GovernanceFlags {
            iterations_enabled: true,
            ..Default::default()
        };
        let project = db.create_project("Apollo", None, &flags).expect("project");
        enable(&db, &project.id, "velocity");

        let provider = FakeProvider {
            iterations: vec![IterationSnapshot {
                status: crate::models::IterationStatus::Completed,
                completed_points: Some(20.0),
            }],
            ..Default::default()
        };
        let outcome = run_compute(&db, &provider, &project.id, now()).expect("compute");
        assert_eq!(outcome.computed.len(), 1);
        assert_eq!(outcome.computed[0].value_numeric, Some(20.0));
        assert!(outcome.skipped.is_empty());

        let velocity = db
            .find_definition_by_code("velocity", None)
            .expect("lookup")
            .expect("definition");
        let persisted = db
            .find_computed_value(&project.id, &velocity.id, now().date_naive())
            .expect("read")
            .expect("row");
        assert_eq!(persisted.value_numeric, Some(20.0));
    }

    #[test]
    fn input_hash_is_stable_across_repeated_runs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = open_db(&dir);
        let project = db
            .create_project("Apollo", None, &GovernanceFlags::default())
            .expect("project");
        enable(&db, &project.id, "wip");

        let provider = FakeProvider {
            tasks: vec![in_progress_task()],
            ..Default::default()
        };
        let first = run_compute(&db, &provider, &project.id, now()).expect("first");
        let second = run_compute(&db, &provider, &project.id, now()).expect("second");

        let first_hash = first.computed[0].value_json["inputHash"]
            .as_str()
            .expect("hash")
            .to_string();
        let second_hash = second.computed[0].value_json["inputHash"]
            .as_str()
            .expect("hash")
            .to_string();
        assert_eq!(first_hash, second_hash);
        assert_eq!(first_hash.len(), 16);
        assert!(first_hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn input_hash_changes_when_inputs_change() {
        let bundle_one = SnapshotBundle {
            tasks: vec![in_progress_task()],
            ..Default::default()
        };
        let bundle_two = SnapshotBundle::default();
        assert_ne!(
            input_hash(ComputationStrategy::Wip, &bundle_one),
            input_hash(ComputationStrategy::Wip, &bundle_two)
        );
    }

    #[test]
    fn unknown_strategy_degrades_to_placeholder_instead_of_failing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = open_db(&dir);
        let project = db
            .create_project("Apollo", Some("org-a"), &GovernanceFlags::default())
            .expect("project");
        db.insert_custom_definition(
            "org-a",
            "experimental_kpi",
            "Experimental KPI",
            crate::models::IndicatorCategory::Quality,
            "points",
            crate::models::Direction::HigherIsBetter,
            "not_a_real_strategy",
            None,
            false,
            &[],
        )
        .expect("custom definition");
        enable(&db, &project.id, "experimental_kpi");

        let provider = FakeProvider::default();
        let outcome = run_compute(&db, &provider, &project.id, now()).expect("compute");
        assert_eq!(outcome.computed.len(), 1);
        assert_eq!(outcome.computed[0].value_numeric, None);
        assert_eq!(outcome.computed[0].value_json["status"], "not_supported_mvp");
    }

    #[test]
    fn failed_value_write_is_isolated_and_never_aborts_the_pass() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("test.db");
        let db = Database::new(&db_path).expect("db");
        let project = db
            .create_project("Apollo", None, &GovernanceFlags::default())
            .expect("project");
        enable(&db, &project.id, "wip");
        enable(&db, &project.id, "open_risk_count");

        // A writer transaction on a second connection makes every value
        // upsert fail with SQLITE_BUSY while reads keep working.
        let blocker = rusqlite::Connection::open(&db_path).expect("second connection");
        blocker.execute_batch("BEGIN IMMEDIATE").expect("hold write lock");

        let provider = FakeProvider {
            tasks: vec![in_progress_task()],
            open_risks: Some(1),
            ..Default::default()
        };
        let outcome = run_compute(&db, &provider, &project.id, now()).expect("pass still succeeds");
        assert!(outcome.computed.is_empty());
        assert!(outcome.skipped.is_empty());

        blocker.execute_batch("COMMIT").expect("release lock");
        let outcome = run_compute(&db, &provider, &project.id, now()).expect("recompute");
        assert_eq!(outcome.computed.len(), 2);
    }

    #[test]
    fn outcome_is_sorted_by_indicator_code() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = open_db(&dir);
        let project = db
            .create_project("Apollo", None, &GovernanceFlags::default())
            .expect("project");
        for code in ["wip", "open_risk_count", "throughput", "cycle_time"] {
            enable(&db, &project.id, code);
        }

        let provider = FakeProvider {
            tasks: vec![in_progress_task()],
            open_risks: Some(2),
            ..Default::default()
        };
        let outcome = run_compute(&db, &provider, &project.id, now()).expect("compute");
        let codes: Vec<&str> = outcome
            .computed
            .iter()
            .map(|value| value.indicator_code.as_str())
            .collect();
        assert_eq!(codes, vec!["cycle_time", "open_risk_count", "throughput", "wip"]);
    }

    #[test]
    fn missing_project_computes_ungated_indicators_with_all_flags_false() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = open_db(&dir);
        // Configs written against a project id with no project row.
        let orphan_project = "orphan-project";
        enable(&db, orphan_project, "wip");

        let provider = FakeProvider {
            tasks: vec![in_progress_task()],
            ..Default::default()
        };
        let outcome = run_compute(&db, &provider, orphan_project, now()).expect("compute");
        assert_eq!(outcome.computed.len(), 1);
        assert_eq!(outcome.computed[0].indicator_code, "wip");
    }
}
