use crate::db::Database;
use crate::errors::{EngineError, EngineResult};
use crate::models::{
    GovernanceFlags, Pack, PackBinding, PackSummary, ProjectIndicatorConfig, ProjectTemplate,
    TemplateIndicatorBinding,
};
use once_cell::sync::Lazy;

/// Curated indicator bundles aligned to delivery methodologies. Packs
/// reference registry codes only and are resolved at bind time, so they stay
/// storage-agnostic.
static PACKS: Lazy<Vec<Pack>> = Lazy::new(|| {
    vec![
        Pack {
            code: "agile-delivery",
            name: "Agile Delivery",
            description: "Flow and iteration health for agile teams",
            bindings: vec![
                PackBinding { indicator_code: "wip", is_required: true, default_target: None },
                PackBinding { indicator_code: "throughput", is_required: true, default_target: None },
                PackBinding { indicator_code: "cycle_time", is_required: false, default_target: Some("7") },
                PackBinding { indicator_code: "velocity", is_required: true, default_target: None },
                PackBinding { indicator_code: "open_risk_count", is_required: false, default_target: None },
            ],
        },
        Pack {
            code: "predictive-evm",
            name: "Predictive (Earned Value)",
            description: "Baseline-driven schedule and cost performance",
            bindings: vec![
                PackBinding { indicator_code: "schedule_variance", is_required: true, default_target: Some("0") },
                PackBinding { indicator_code: "spi", is_required: true, default_target: Some("1.0") },
                PackBinding { indicator_code: "budget_burn", is_required: true, default_target: Some("100") },
                PackBinding { indicator_code: "forecast_at_completion", is_required: false, default_target: None },
                PackBinding { indicator_code: "open_risk_count", is_required: false, default_target: None },
            ],
        },
        Pack {
            code: "cost-control",
            name: "Cost Control",
            description: "Budget consumption and completion forecasting",
            bindings: vec![
                PackBinding { indicator_code: "budget_burn", is_required: true, default_target: Some("100") },
                PackBinding { indicator_code: "forecast_at_completion", is_required: true, default_target: None },
            ],
        },
        Pack {
            code: "change-governance",
            name: "Change Governance",
            description: "Change-request flow and decision quality",
            bindings: vec![
                PackBinding { indicator_code: "change_request_cycle_time", is_required: true, default_target: Some("10") },
                PackBinding { indicator_code: "change_request_approval_rate", is_required: false, default_target: Some("80") },
                PackBinding { indicator_code: "open_risk_count", is_required: false, default_target: None },
            ],
        },
    ]
});

/// Shipped templates. Each one's default governance flags must cover every
/// flag required by an indicator reachable through its pack; the test suite
/// holds that invariant.
static TEMPLATES: Lazy<Vec<ProjectTemplate>> = Lazy::new(|| {
    vec![
        ProjectTemplate {
            code: "agile-standard",
            name: "Agile Standard",
            pack_code: "agile-delivery",
            default_flags: GovernanceFlags {
                iterations_enabled: true,
                ..Default::default()
            },
        },
        ProjectTemplate {
            code: "predictive-standard",
            name: "Predictive Standard",
            pack_code: "predictive-evm",
            default_flags: GovernanceFlags {
                baselines_enabled: true,
                cost_tracking_enabled: true,
                earned_value_enabled: true,
                ..Default::default()
            },
        },
        ProjectTemplate {
            code: "cost-governed",
            name: "Cost Governed",
            pack_code: "cost-control",
            default_flags: GovernanceFlags {
                cost_tracking_enabled: true,
                ..Default::default()
            },
        },
        ProjectTemplate {
            code: "change-managed",
            name: "Change Managed",
            pack_code: "change-governance",
            default_flags: GovernanceFlags {
                change_management_enabled: true,
                ..Default::default()
            },
        },
    ]
});

pub fn list_packs() -> Vec<PackSummary> {
    PACKS
        .iter()
        .map(|pack| PackSummary {
            code: pack.code.to_string(),
            name: pack.name.to_string(),
            description: pack.description.to_string(),
            binding_count: pack.bindings.len(),
        })
        .collect()
}

pub fn find_pack(code: &str) -> Option<&'static Pack> {
    PACKS.iter().find(|pack| pack.code == code)
}

pub fn shipped_templates() -> &'static [ProjectTemplate] {
    &TEMPLATES
}

pub fn find_template(code: &str) -> Option<&'static ProjectTemplate> {
    TEMPLATES.iter().find(|template| template.code == code)
}

/// Binds every resolvable pack indicator to the template. A stale code is
/// logged and skipped rather than blocking the rest of the pack;
/// already-bound codes are left untouched, so re-application is idempotent.
/// Returns only the bindings created by this call.
pub fn apply_pack(
    db: &Database,
    template_id: &str,
    pack_code: &str,
) -> EngineResult<Vec<TemplateIndicatorBinding>> {
    let pack = find_pack(pack_code)
        .ok_or_else(|| EngineError::NotFound(format!("pack '{}'", pack_code)))?;

    let mut created = Vec::new();
    for binding in &pack.bindings {
        let definition = match db.find_definition_by_code(binding.indicator_code, None)? {
            Some(definition) => definition,
            None => {
                tracing::warn!(
                    pack = %pack.code,
                    code = %binding.indicator_code,
                    "pack references unresolvable indicator code, skipping"
                );
                continue;
            }
        };
        if db.find_binding(template_id, &definition.id)?.is_some() {
            continue;
        }
        created.push(db.insert_binding(
            template_id,
            &definition,
            binding.is_required,
            binding.default_target,
        )?);
    }
    Ok(created)
}

/// Binds a single indicator to a template. Unlike pack application, a
/// duplicate here surfaces to the caller.
pub fn bind_indicator(
    db: &Database,
    template_id: &str,
    indicator_code: &str,
    is_required: bool,
    default_target: Option<&str>,
) -> EngineResult<TemplateIndicatorBinding> {
    let definition = db
        .find_definition_by_code(indicator_code, None)?
        .ok_or_else(|| EngineError::NotFound(format!("indicator '{}'", indicator_code)))?;
    if db.find_binding(template_id, &definition.id)?.is_some() {
        return Err(EngineError::DuplicateBinding(format!(
            "indicator '{}' is already bound to template '{}'",
            indicator_code, template_id
        )));
    }
    db.insert_binding(template_id, &definition, is_required, default_target)
}

/// Instantiates project configs from a template's bindings. Existing configs
/// are reused unchanged, so running activation twice never duplicates or
/// resets a row. Never creates or mutates indicator definitions.
pub fn auto_activate_for_project(
    db: &Database,
    template_id: &str,
    project_id: &str,
) -> EngineResult<Vec<ProjectIndicatorConfig>> {
    let bindings = db.list_bindings(template_id)?;
    let mut result = Vec::with_capacity(bindings.len());
    for binding in &bindings {
        if let Some(existing) = db.find_config(project_id, &binding.indicator_id)? {
            result.push(existing);
            continue;
        }
        let target = binding
            .default_target
            .as_deref()
            .and_then(|raw| raw.parse::<f64>().ok())
            .map(|value| serde_json::json!({ "value": value }));
        result.push(db.insert_config(
            project_id,
            &binding.indicator_id,
            true,
            target.as_ref(),
            None,
            None,
        )?);
    }
    Ok(result)
}

/// Duplicates bindings onto another template for cloning workflows,
/// skipping ones the target already has.
pub fn copy_bindings(
    db: &Database,
    source_template_id: &str,
    target_template_id: &str,
) -> EngineResult<Vec<TemplateIndicatorBinding>> {
    let source = db.list_bindings(source_template_id)?;
    let mut created = Vec::new();
    for binding in &source {
        if db
            .find_binding(target_template_id, &binding.indicator_id)?
            .is_some()
        {
            continue;
        }
        let definition = db
            .find_definition_by_code(&binding.indicator_code, None)?
            .ok_or_else(|| {
                EngineError::NotFound(format!("indicator '{}'", binding.indicator_code))
            })?;
        created.push(db.insert_binding(
            target_template_id,
            &definition,
            binding.is_required,
            binding.default_target.as_deref(),
        )?);
    }
    Ok(created)
}
