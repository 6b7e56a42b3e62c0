use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndicatorCategory {
    Delivery,
    Financial,
    Schedule,
    Change,
    Risk,
    Quality,
}

impl IndicatorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delivery => "delivery",
            Self::Financial => "financial",
            Self::Schedule => "schedule",
            Self::Change => "change",
            Self::Risk => "risk",
            Self::Quality => "quality",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    HigherIsBetter,
    LowerIsBetter,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HigherIsBetter => "higher-is-better",
            Self::LowerIsBetter => "lower-is-better",
        }
    }
}

/// Closed set of calculator dispatch keys. Definitions persist the key as
/// text, so parsing happens at compute time; an unrecognized key degrades to
/// the `EscapedDefects` placeholder rather than failing the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputationStrategy {
    Wip,
    Throughput,
    CycleTime,
    Velocity,
    BudgetBurn,
    ForecastAtCompletion,
    ScheduleVariance,
    Spi,
    ChangeRequestCycleTime,
    ChangeRequestApprovalRate,
    OpenRiskCount,
    EscapedDefects,
}

impl ComputationStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wip => "wip",
            Self::Throughput => "throughput",
            Self::CycleTime => "cycle_time",
            Self::Velocity => "velocity",
            Self::BudgetBurn => "budget_burn",
            Self::ForecastAtCompletion => "forecast_at_completion",
            Self::ScheduleVariance => "schedule_variance",
            Self::Spi => "spi",
            Self::ChangeRequestCycleTime => "change_request_cycle_time",
            Self::ChangeRequestApprovalRate => "change_request_approval_rate",
            Self::OpenRiskCount => "open_risk_count",
            Self::EscapedDefects => "escaped_defects",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "wip" => Some(Self::Wip),
            "throughput" => Some(Self::Throughput),
            "cycle_time" => Some(Self::CycleTime),
            "velocity" => Some(Self::Velocity),
            "budget_burn" => Some(Self::BudgetBurn),
            "forecast_at_completion" => Some(Self::ForecastAtCompletion),
            "schedule_variance" => Some(Self::ScheduleVariance),
            "spi" => Some(Self::Spi),
            "change_request_cycle_time" => Some(Self::ChangeRequestCycleTime),
            "change_request_approval_rate" => Some(Self::ChangeRequestApprovalRate),
            "open_risk_count" => Some(Self::OpenRiskCount),
            "escaped_defects" => Some(Self::EscapedDefects),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GovernanceFlag {
    IterationsEnabled,
    CostTrackingEnabled,
    BaselinesEnabled,
    EarnedValueEnabled,
    CapacityEnabled,
    ChangeManagementEnabled,
}

impl GovernanceFlag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IterationsEnabled => "iterationsEnabled",
            Self::CostTrackingEnabled => "costTrackingEnabled",
            Self::BaselinesEnabled => "baselinesEnabled",
            Self::EarnedValueEnabled => "earnedValueEnabled",
            Self::CapacityEnabled => "capacityEnabled",
            Self::ChangeManagementEnabled => "changeManagementEnabled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "iterationsEnabled" => Some(Self::IterationsEnabled),
            "costTrackingEnabled" => Some(Self::CostTrackingEnabled),
            "baselinesEnabled" => Some(Self::BaselinesEnabled),
            "earnedValueEnabled" => Some(Self::EarnedValueEnabled),
            "capacityEnabled" => Some(Self::CapacityEnabled),
            "changeManagementEnabled" => Some(Self::ChangeManagementEnabled),
            _ => None,
        }
    }
}

/// Per-project capability gates. The flag set is closed, so this is a fixed
/// struct rather than a string-keyed map. A missing project reads as all
/// flags false.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceFlags {
    pub iterations_enabled: bool,
    pub cost_tracking_enabled: bool,
    pub baselines_enabled: bool,
    pub earned_value_enabled: bool,
    pub capacity_enabled: bool,
    pub change_management_enabled: bool,
}

impl GovernanceFlags {
    pub fn get(&self, flag: GovernanceFlag) -> bool {
        match flag {
            GovernanceFlag::IterationsEnabled => self.iterations_enabled,
            GovernanceFlag::CostTrackingEnabled => self.cost_tracking_enabled,
            GovernanceFlag::BaselinesEnabled => self.baselines_enabled,
            GovernanceFlag::EarnedValueEnabled => self.earned_value_enabled,
            GovernanceFlag::CapacityEnabled => self.capacity_enabled,
            GovernanceFlag::ChangeManagementEnabled => self.change_management_enabled,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorDefinition {
    pub id: String,
    pub code: String,
    pub name: String,
    pub category: IndicatorCategory,
    pub unit: String,
    pub direction: Direction,
    pub strategy: String,
    pub required_governance_flag: Option<GovernanceFlag>,
    pub default_enabled: bool,
    pub data_sources: Vec<String>,
    pub is_active: bool,
    pub org_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectIndicatorConfig {
    pub id: String,
    pub project_id: String,
    pub indicator_id: String,
    pub enabled: bool,
    pub target: Option<serde_json::Value>,
    pub threshold_warning: Option<serde_json::Value>,
    pub threshold_critical: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputedValue {
    pub id: String,
    pub project_id: String,
    pub indicator_id: String,
    pub indicator_code: String,
    pub as_of_date: NaiveDate,
    pub value_numeric: Option<f64>,
    pub value_text: Option<String>,
    pub value_json: serde_json::Value,
    pub sample_size: u32,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateIndicatorBinding {
    pub id: String,
    pub template_id: String,
    pub indicator_id: String,
    pub indicator_code: String,
    pub is_required: bool,
    pub default_target: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackBinding {
    pub indicator_code: &'static str,
    pub is_required: bool,
    pub default_target: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pack {
    pub code: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub bindings: Vec<PackBinding>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackSummary {
    pub code: String,
    pub name: String,
    pub description: String,
    pub binding_count: usize,
}

/// Shipped template descriptor. Templates themselves live outside the
/// engine; the descriptor carries what activation and the static
/// consistency checks need.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectTemplate {
    pub code: &'static str,
    pub name: &'static str,
    pub pack_code: &'static str,
    pub default_flags: GovernanceFlags,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    pub id: String,
    pub name: String,
    pub org_id: Option<String>,
    pub flags: GovernanceFlags,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertConfigItem {
    pub indicator_code: String,
    pub enabled: bool,
    pub target: Option<serde_json::Value>,
    pub threshold_warning: Option<serde_json::Value>,
    pub threshold_critical: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigWithDefinition {
    pub config: ProjectIndicatorConfig,
    pub definition: IndicatorDefinition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedIndicator {
    pub indicator_code: String,
    pub indicator_name: String,
    pub reason: String,
    pub governance_flag: Option<GovernanceFlag>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeOutcome {
    pub computed: Vec<ComputedValue>,
    pub skipped: Vec<SkippedIndicator>,
}

// ─── Snapshots ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Todo,
    InProgress,
    InReview,
    Done,
    Canceled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "TODO",
            Self::InProgress => "IN_PROGRESS",
            Self::InReview => "IN_REVIEW",
            Self::Done => "DONE",
            Self::Canceled => "CANCELED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IterationStatus {
    Planned,
    Active,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeRequestStatus {
    Draft,
    Submitted,
    Approved,
    Rejected,
    Withdrawn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub status: TaskStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationSnapshot {
    pub status: IterationStatus,
    pub completed_points: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetSnapshot {
    pub baseline_budget: Option<f64>,
    pub revised_budget: Option<f64>,
    pub actual_cost: Option<f64>,
    pub forecast_at_completion: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EarnedValueSnapshot {
    pub earned_value: Option<f64>,
    pub planned_value: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRequestSnapshot {
    pub status: ChangeRequestStatus,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalcResult {
    pub value_numeric: Option<f64>,
    pub value_text: Option<String>,
    pub value_json: serde_json::Value,
    pub sample_size: u32,
}
