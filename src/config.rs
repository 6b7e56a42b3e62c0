use crate::db::Database;
use crate::errors::{EngineError, EngineResult};
use crate::models::{ConfigWithDefinition, ProjectIndicatorConfig, UpsertConfigItem};

/// Returns the project's configuration rows, first creating (in one pass) a
/// row for every default-enabled definition that lacks one. Subsequent calls
/// create nothing.
pub fn get_configs(db: &Database, project_id: &str) -> EngineResult<Vec<ProjectIndicatorConfig>> {
    let org_id = db.find_project(project_id)?.and_then(|project| project.org_id);
    let flags = db.governance_flags(project_id)?;

    let definitions = db.list_definitions(org_id.as_deref(), true)?;
    for definition in definitions.iter().filter(|def| def.default_enabled) {
        if db.find_config(project_id, &definition.id)?.is_some() {
            continue;
        }
        // A default-enabled indicator still honors its governance gate: the
        // auto-created row starts disabled when the project lacks the flag.
        let enabled = definition
            .required_governance_flag
            .map(|flag| flags.get(flag))
            .unwrap_or(true);
        db.insert_config(project_id, &definition.id, enabled, None, None, None)?;
    }

    db.list_configs(project_id)
}

/// Create-or-update configuration rows. Enabling an indicator whose required
/// governance flag is off on the project is rejected; disabling never checks
/// governance.
pub fn upsert_configs(
    db: &Database,
    project_id: &str,
    items: &[UpsertConfigItem],
) -> EngineResult<Vec<ProjectIndicatorConfig>> {
    let org_id = db.find_project(project_id)?.and_then(|project| project.org_id);
    let flags = db.governance_flags(project_id)?;

    let mut result = Vec::with_capacity(items.len());
    for item in items {
        if item.indicator_code.trim().is_empty() {
            return Err(EngineError::Validation(
                "indicator code must not be empty".to_string(),
            ));
        }
        let definition = db
            .find_definition_by_code(&item.indicator_code, org_id.as_deref())?
            .ok_or_else(|| EngineError::NotFound(format!("indicator '{}'", item.indicator_code)))?;

        if item.enabled {
            if let Some(flag) = definition.required_governance_flag {
                if !flags.get(flag) {
                    return Err(EngineError::GovernanceDisabled {
                        indicator: definition.code.clone(),
                        flag: flag.as_str().to_string(),
                    });
                }
            }
        }

        let config = match db.find_config(project_id, &definition.id)? {
            Some(existing) => db.update_config(
                &existing.id,
                item.enabled,
                item.target.as_ref(),
                item.threshold_warning.as_ref(),
                item.threshold_critical.as_ref(),
            )?,
            None => db.insert_config(
                project_id,
                &definition.id,
                item.enabled,
                item.target.as_ref(),
                item.threshold_warning.as_ref(),
                item.threshold_critical.as_ref(),
            )?,
        };
        result.push(config);
    }
    Ok(result)
}

/// Enabled rows joined with their definitions; the orchestrator needs each
/// row's strategy and gating flag.
pub fn get_enabled_configs(db: &Database, project_id: &str) -> EngineResult<Vec<ConfigWithDefinition>> {
    db.list_enabled_configs_with_definitions(project_id)
}
