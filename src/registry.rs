use crate::db::Database;
use crate::errors::{EngineError, EngineResult};
use crate::models::{
    ComputationStrategy, Direction, GovernanceFlag, IndicatorCategory, IndicatorDefinition,
};

/// One row of the fixed system catalog.
pub struct DefinitionSeed {
    pub code: &'static str,
    pub name: &'static str,
    pub category: IndicatorCategory,
    pub unit: &'static str,
    pub direction: Direction,
    pub strategy: ComputationStrategy,
    pub required_governance_flag: Option<GovernanceFlag>,
    pub default_enabled: bool,
    pub data_sources: &'static [&'static str],
}

/// The canonical system catalog. Codes are stable identifiers; rows are
/// upserted by code, never hard-deleted.
pub fn default_catalog() -> Vec<DefinitionSeed> {
    use ComputationStrategy as S;
    use Direction::{HigherIsBetter, LowerIsBetter};
    use GovernanceFlag as F;
    use IndicatorCategory as C;

    vec![
        DefinitionSeed {
            code: "wip",
            name: "Work in Progress",
            category: C::Delivery,
            unit: "tasks",
            direction: LowerIsBetter,
            strategy: S::Wip,
            required_governance_flag: None,
            default_enabled: true,
            data_sources: &["tasks"],
        },
        DefinitionSeed {
            code: "throughput",
            name: "Throughput",
            category: C::Delivery,
            unit: "tasks/week",
            direction: HigherIsBetter,
            strategy: S::Throughput,
            required_governance_flag: None,
            default_enabled: true,
            data_sources: &["tasks"],
        },
        DefinitionSeed {
            code: "cycle_time",
            name: "Cycle Time",
            category: C::Delivery,
            unit: "days",
            direction: LowerIsBetter,
            strategy: S::CycleTime,
            required_governance_flag: None,
            default_enabled: true,
            data_sources: &["tasks"],
        },
        DefinitionSeed {
            code: "velocity",
            name: "Velocity",
            category: C::Delivery,
            unit: "points",
            direction: HigherIsBetter,
            strategy: S::Velocity,
            required_governance_flag: Some(F::IterationsEnabled),
            default_enabled: false,
            data_sources: &["iterations"],
        },
        DefinitionSeed {
            code: "budget_burn",
            name: "Budget Burn",
            category: C::Financial,
            unit: "%",
            direction: LowerIsBetter,
            strategy: S::BudgetBurn,
            required_governance_flag: Some(F::CostTrackingEnabled),
            default_enabled: false,
            data_sources: &["budgets"],
        },
        DefinitionSeed {
            code: "forecast_at_completion",
            name: "Forecast at Completion",
            category: C::Financial,
            unit: "currency",
            direction: LowerIsBetter,
            strategy: S::ForecastAtCompletion,
            required_governance_flag: Some(F::CostTrackingEnabled),
            default_enabled: false,
            data_sources: &["budgets"],
        },
        DefinitionSeed {
            code: "schedule_variance",
            name: "Schedule Variance",
            category: C::Schedule,
            unit: "currency",
            direction: HigherIsBetter,
            strategy: S::ScheduleVariance,
            required_governance_flag: Some(F::BaselinesEnabled),
            default_enabled: false,
            data_sources: &["earned_value"],
        },
        DefinitionSeed {
            code: "spi",
            name: "Schedule Performance Index",
            category: C::Schedule,
            unit: "ratio",
            direction: HigherIsBetter,
            strategy: S::Spi,
            required_governance_flag: Some(F::BaselinesEnabled),
            default_enabled: false,
            data_sources: &["earned_value"],
        },
        DefinitionSeed {
            code: "change_request_cycle_time",
            name: "Change Request Cycle Time",
            category: C::Change,
            unit: "days",
            direction: LowerIsBetter,
            strategy: S::ChangeRequestCycleTime,
            required_governance_flag: Some(F::ChangeManagementEnabled),
            default_enabled: false,
            data_sources: &["change_requests"],
        },
        DefinitionSeed {
            code: "change_request_approval_rate",
            name: "Change Request Approval Rate",
            category: C::Change,
            unit: "%",
            direction: HigherIsBetter,
            strategy: S::ChangeRequestApprovalRate,
            required_governance_flag: Some(F::ChangeManagementEnabled),
            default_enabled: false,
            data_sources: &["change_requests"],
        },
        DefinitionSeed {
            code: "open_risk_count",
            name: "Open Risk Count",
            category: C::Risk,
            unit: "risks",
            direction: LowerIsBetter,
            strategy: S::OpenRiskCount,
            required_governance_flag: None,
            default_enabled: true,
            data_sources: &["risks"],
        },
        DefinitionSeed {
            code: "escaped_defects",
            name: "Escaped Defects",
            category: C::Quality,
            unit: "defects",
            direction: LowerIsBetter,
            strategy: S::EscapedDefects,
            required_governance_flag: None,
            default_enabled: false,
            data_sources: &["quality"],
        },
    ]
}

/// Idempotent upsert-by-code of the system catalog. Safe on every read path;
/// returns the number of rows visited so idempotence is observable.
pub fn ensure_defaults(db: &Database) -> EngineResult<usize> {
    let catalog = default_catalog();
    for seed in &catalog {
        db.upsert_system_definition(
            seed.code,
            seed.name,
            seed.category,
            seed.unit,
            seed.direction,
            seed.strategy.as_str(),
            seed.required_governance_flag,
            seed.default_enabled,
            seed.data_sources,
        )?;
    }
    Ok(catalog.len())
}

/// Active definitions visible to the caller, ordered by (category, code).
/// With `include_governance_gated = false`, rows requiring a governance flag
/// are dropped ("only what works without extra setup").
pub fn list_definitions(
    db: &Database,
    org_id: Option<&str>,
    include_governance_gated: bool,
) -> EngineResult<Vec<IndicatorDefinition>> {
    db.list_definitions(org_id, include_governance_gated)
}

pub fn find_by_code(
    db: &Database,
    code: &str,
    org_id: Option<&str>,
) -> EngineResult<IndicatorDefinition> {
    db.find_definition_by_code(code, org_id)?
        .ok_or_else(|| EngineError::NotFound(format!("indicator '{}'", code)))
}

pub fn find_by_codes(
    db: &Database,
    codes: &[&str],
    org_id: Option<&str>,
) -> EngineResult<Vec<IndicatorDefinition>> {
    if codes.is_empty() {
        return Ok(Vec::new());
    }
    db.find_definitions_by_codes(codes, org_id)
}
