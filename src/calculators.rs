use crate::models::{
    BudgetSnapshot, CalcResult, ChangeRequestSnapshot, ChangeRequestStatus, ComputationStrategy,
    EarnedValueSnapshot, IterationSnapshot, IterationStatus, TaskSnapshot, TaskStatus,
};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;

/// Tag written into every result's `valueJson` so values computed by
/// different engine revisions stay distinguishable in the history.
pub const ENGINE_VERSION: &str = concat!("kpi-engine/", env!("CARGO_PKG_VERSION"));

pub const THROUGHPUT_WINDOW_DAYS: i64 = 7;
pub const CYCLE_TIME_WINDOW_DAYS: i64 = 30;
pub const CHANGE_REQUEST_WINDOW_DAYS: i64 = 90;

/// Snapshot inputs for one compute pass. Collections stay empty and the
/// optional snapshots stay `None` for domains the orchestrator did not
/// fetch; calculators only look at the fields their strategy needs.
#[derive(Debug, Clone, Default)]
pub struct SnapshotBundle {
    pub tasks: Vec<TaskSnapshot>,
    pub iterations: Vec<IterationSnapshot>,
    pub budget: BudgetSnapshot,
    pub earned_value: EarnedValueSnapshot,
    pub change_requests: Vec<ChangeRequestSnapshot>,
    pub open_risk_count: Option<u32>,
}

pub fn dispatch(strategy: ComputationStrategy, bundle: &SnapshotBundle, now: DateTime<Utc>) -> CalcResult {
    match strategy {
        ComputationStrategy::Wip => wip(&bundle.tasks),
        ComputationStrategy::Throughput => throughput(&bundle.tasks, now),
        ComputationStrategy::CycleTime => cycle_time(&bundle.tasks, now),
        ComputationStrategy::Velocity => velocity(&bundle.iterations),
        ComputationStrategy::BudgetBurn => budget_burn(&bundle.budget),
        ComputationStrategy::ForecastAtCompletion => forecast_at_completion(&bundle.budget),
        ComputationStrategy::ScheduleVariance => schedule_variance(&bundle.earned_value),
        ComputationStrategy::Spi => spi(&bundle.earned_value),
        ComputationStrategy::ChangeRequestCycleTime => change_request_cycle_time(&bundle.change_requests, now),
        ComputationStrategy::ChangeRequestApprovalRate => {
            change_request_approval_rate(&bundle.change_requests, now)
        }
        ComputationStrategy::OpenRiskCount => open_risk_count(bundle.open_risk_count),
        ComputationStrategy::EscapedDefects => escaped_defects(),
    }
}

pub fn wip(tasks: &[TaskSnapshot]) -> CalcResult {
    let in_progress = tasks
        .iter()
        .filter(|task| task.status == TaskStatus::InProgress)
        .count();
    CalcResult {
        value_numeric: Some(in_progress as f64),
        value_text: None,
        value_json: json!({
            "engineVersion": ENGINE_VERSION,
            "inProgress": in_progress,
            "totalTasks": tasks.len(),
        }),
        sample_size: tasks.len() as u32,
    }
}

pub fn throughput(tasks: &[TaskSnapshot], now: DateTime<Utc>) -> CalcResult {
    let cutoff = now - Duration::days(THROUGHPUT_WINDOW_DAYS);
    let completed = tasks
        .iter()
        .filter(|task| {
            task.completed_at
                .map(|done| done >= cutoff && done <= now)
                .unwrap_or(false)
        })
        .count();
    CalcResult {
        value_numeric: Some(completed as f64),
        value_text: None,
        value_json: json!({
            "engineVersion": ENGINE_VERSION,
            "windowDays": THROUGHPUT_WINDOW_DAYS,
        }),
        sample_size: completed as u32,
    }
}

pub fn cycle_time(tasks: &[TaskSnapshot], now: DateTime<Utc>) -> CalcResult {
    let cutoff = now - Duration::days(CYCLE_TIME_WINDOW_DAYS);
    let durations: Vec<f64> = tasks
        .iter()
        .filter_map(|task| match (task.started_at, task.completed_at) {
            (Some(start), Some(done)) if done >= cutoff && done <= now => {
                Some(days_between(start, done))
            }
            _ => None,
        })
        .collect();

    if durations.is_empty() {
        return CalcResult {
            value_numeric: None,
            value_text: None,
            value_json: json!({
                "engineVersion": ENGINE_VERSION,
                "reason": "no_eligible_tasks",
                "windowDays": CYCLE_TIME_WINDOW_DAYS,
            }),
            sample_size: 0,
        };
    }

    let avg = durations.iter().sum::<f64>() / durations.len() as f64;
    CalcResult {
        value_numeric: Some(round2(avg)),
        value_text: None,
        value_json: json!({
            "engineVersion": ENGINE_VERSION,
            "windowDays": CYCLE_TIME_WINDOW_DAYS,
            "eligibleTasks": durations.len(),
        }),
        sample_size: durations.len() as u32,
    }
}

pub fn velocity(iterations: &[IterationSnapshot]) -> CalcResult {
    let series: Vec<f64> = iterations
        .iter()
        .filter(|iteration| iteration.status == IterationStatus::Completed)
        .map(|iteration| iteration.completed_points.unwrap_or(0.0))
        .collect();

    if series.is_empty() {
        return CalcResult {
            value_numeric: None,
            value_text: None,
            value_json: json!({
                "engineVersion": ENGINE_VERSION,
                "reason": "no_completed_iterations",
            }),
            sample_size: 0,
        };
    }

    let avg = series.iter().sum::<f64>() / series.len() as f64;
    CalcResult {
        value_numeric: Some(round2(avg)),
        value_text: None,
        value_json: json!({
            "engineVersion": ENGINE_VERSION,
            "completedPointsSeries": series,
        }),
        sample_size: series.len() as u32,
    }
}

pub fn budget_burn(budget: &BudgetSnapshot) -> CalcResult {
    let baseline = budget.baseline_budget.unwrap_or(0.0);
    if baseline <= 0.0 {
        return CalcResult {
            value_numeric: None,
            value_text: None,
            value_json: json!({
                "engineVersion": ENGINE_VERSION,
                "reason": "baseline_budget_zero",
            }),
            sample_size: 0,
        };
    }

    let actual = budget.actual_cost.unwrap_or(0.0);
    CalcResult {
        value_numeric: Some(round2(actual / baseline * 100.0)),
        value_text: None,
        value_json: json!({
            "engineVersion": ENGINE_VERSION,
            "baselineBudget": baseline,
            "actualCost": actual,
        }),
        sample_size: 1,
    }
}

pub fn forecast_at_completion(budget: &BudgetSnapshot) -> CalcResult {
    // Negative forecasts are treated as "not positive" and fall through.
    let (value, source) = match budget.forecast_at_completion {
        Some(forecast) if forecast > 0.0 => (Some(forecast), "forecastAtCompletion"),
        _ => match budget.revised_budget {
            Some(revised) if revised > 0.0 => (Some(revised), "revisedBudget_fallback"),
            _ => (None, "none_available"),
        },
    };

    CalcResult {
        value_numeric: value,
        value_text: None,
        value_json: json!({
            "engineVersion": ENGINE_VERSION,
            "source": source,
        }),
        sample_size: if value.is_some() { 1 } else { 0 },
    }
}

pub fn schedule_variance(earned_value: &EarnedValueSnapshot) -> CalcResult {
    match (earned_value.earned_value, earned_value.planned_value) {
        (Some(ev), Some(pv)) => CalcResult {
            value_numeric: Some(round2(ev - pv)),
            value_text: None,
            value_json: json!({
                "engineVersion": ENGINE_VERSION,
                "earnedValue": ev,
                "plannedValue": pv,
            }),
            sample_size: 1,
        },
        _ => CalcResult {
            value_numeric: None,
            value_text: None,
            value_json: json!({
                "engineVersion": ENGINE_VERSION,
                "reason": "missing_ev_data",
            }),
            sample_size: 0,
        },
    }
}

pub fn spi(earned_value: &EarnedValueSnapshot) -> CalcResult {
    match (earned_value.earned_value, earned_value.planned_value) {
        (Some(_), Some(pv)) if pv == 0.0 => CalcResult {
            value_numeric: None,
            value_text: None,
            value_json: json!({
                "engineVersion": ENGINE_VERSION,
                "reason": "pv_is_zero",
            }),
            sample_size: 0,
        },
        (Some(ev), Some(pv)) => CalcResult {
            value_numeric: Some(round4(ev / pv)),
            value_text: None,
            value_json: json!({
                "engineVersion": ENGINE_VERSION,
                "earnedValue": ev,
                "plannedValue": pv,
            }),
            sample_size: 1,
        },
        _ => CalcResult {
            value_numeric: None,
            value_text: None,
            value_json: json!({
                "engineVersion": ENGINE_VERSION,
                "reason": "missing_ev_data",
            }),
            sample_size: 0,
        },
    }
}

pub fn change_request_cycle_time(requests: &[ChangeRequestSnapshot], now: DateTime<Utc>) -> CalcResult {
    let cutoff = now - Duration::days(CHANGE_REQUEST_WINDOW_DAYS);
    let durations: Vec<f64> = requests
        .iter()
        .filter_map(|request| match (request.status, request.approved_at) {
            (ChangeRequestStatus::Approved, Some(approved)) if approved >= cutoff && approved <= now => {
                Some(days_between(request.created_at, approved))
            }
            _ => None,
        })
        .collect();

    if durations.is_empty() {
        return CalcResult {
            value_numeric: None,
            value_text: None,
            value_json: json!({
                "engineVersion": ENGINE_VERSION,
                "reason": "no_approved_crs",
                "windowDays": CHANGE_REQUEST_WINDOW_DAYS,
            }),
            sample_size: 0,
        };
    }

    let avg = durations.iter().sum::<f64>() / durations.len() as f64;
    CalcResult {
        value_numeric: Some(round2(avg)),
        value_text: None,
        value_json: json!({
            "engineVersion": ENGINE_VERSION,
            "windowDays": CHANGE_REQUEST_WINDOW_DAYS,
        }),
        sample_size: durations.len() as u32,
    }
}

pub fn change_request_approval_rate(requests: &[ChangeRequestSnapshot], now: DateTime<Utc>) -> CalcResult {
    let cutoff = now - Duration::days(CHANGE_REQUEST_WINDOW_DAYS);
    let mut approved = 0u32;
    let mut rejected = 0u32;
    for request in requests {
        if request.created_at < cutoff || request.created_at > now {
            continue;
        }
        match request.status {
            ChangeRequestStatus::Approved => approved += 1,
            ChangeRequestStatus::Rejected => rejected += 1,
            _ => {}
        }
    }

    let terminal = approved + rejected;
    if terminal == 0 {
        return CalcResult {
            value_numeric: None,
            value_text: None,
            value_json: json!({
                "engineVersion": ENGINE_VERSION,
                "reason": "no_terminal_crs",
                "windowDays": CHANGE_REQUEST_WINDOW_DAYS,
            }),
            sample_size: 0,
        };
    }

    CalcResult {
        value_numeric: Some(round2(f64::from(approved) / f64::from(terminal) * 100.0)),
        value_text: None,
        value_json: json!({
            "engineVersion": ENGINE_VERSION,
            "approved": approved,
            "rejected": rejected,
            "windowDays": CHANGE_REQUEST_WINDOW_DAYS,
        }),
        sample_size: terminal,
    }
}

pub fn open_risk_count(count: Option<u32>) -> CalcResult {
    CalcResult {
        value_numeric: Some(f64::from(count.unwrap_or(0))),
        value_text: None,
        value_json: json!({
            "engineVersion": ENGINE_VERSION,
        }),
        sample_size: if count.is_some() { 1 } else { 0 },
    }
}

/// Placeholder so the dispatch table stays total; defect tracking has no
/// upstream data source yet.
pub fn escaped_defects() -> CalcResult {
    CalcResult {
        value_numeric: None,
        value_text: None,
        value_json: json!({
            "engineVersion": ENGINE_VERSION,
            "status": "not_supported_mvp",
        }),
        sample_size: 0,
    }
}

fn days_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_seconds() as f64 / 86_400.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
