use crate::errors::{EngineError, EngineResult};
use crate::models::{
    CalcResult, ComputedValue, ConfigWithDefinition, Direction, GovernanceFlag, GovernanceFlags,
    IndicatorCategory, IndicatorDefinition, ProjectIndicatorConfig, ProjectRecord,
    TemplateIndicatorBinding,
};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("schema.sql");

const DEFINITION_COLUMNS: &str = "id, code, name, category, unit, direction, strategy, \
     required_governance_flag, default_enabled, data_sources_json, is_active, org_id, \
     created_at, updated_at";

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(path: &Path) -> EngineResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(EngineError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(EngineError::from)?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        // The catalog self-heals on every open; the upsert is idempotent so
        // no "seeded once" flag is needed.
        crate::registry::ensure_defaults(&db)?;
        Ok(db)
    }

    fn lock(&self) -> EngineResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| EngineError::Internal("database mutex poisoned".to_string()))
    }

    // ─── Projects ───────────────────────────────────────────────────────────

    pub fn create_project(
        &self,
        name: &str,
        org_id: Option<&str>,
        flags: &GovernanceFlags,
    ) -> EngineResult<ProjectRecord> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO projects (
               id, name, org_id, iterations_enabled, cost_tracking_enabled, baselines_enabled,
               earned_value_enabled, capacity_enabled, change_management_enabled, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                id,
                name,
                org_id,
                flags.iterations_enabled,
                flags.cost_tracking_enabled,
                flags.baselines_enabled,
                flags.earned_value_enabled,
                flags.capacity_enabled,
                flags.change_management_enabled,
                now.to_rfc3339(),
            ],
        )?;

        Ok(ProjectRecord {
            id,
            name: name.to_string(),
            org_id: org_id.map(ToString::to_string),
            flags: *flags,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn find_project(&self, project_id: &str) -> EngineResult<Option<ProjectRecord>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                "SELECT id, name, org_id, iterations_enabled, cost_tracking_enabled, baselines_enabled,
                        earned_value_enabled, capacity_enabled, change_management_enabled,
                        created_at, updated_at
                 FROM projects WHERE id = ?1",
                [project_id],
                parse_project_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Governance-flag provider: a missing project reads as all flags false
    /// rather than a hard failure.
    pub fn governance_flags(&self, project_id: &str) -> EngineResult<GovernanceFlags> {
        Ok(self
            .find_project(project_id)?
            .map(|project| project.flags)
            .unwrap_or_default())
    }

    pub fn set_governance_flags(&self, project_id: &str, flags: &GovernanceFlags) -> EngineResult<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE projects SET iterations_enabled = ?1, cost_tracking_enabled = ?2,
                    baselines_enabled = ?3, earned_value_enabled = ?4, capacity_enabled = ?5,
                    change_management_enabled = ?6, updated_at = ?7
             WHERE id = ?8",
            params![
                flags.iterations_enabled,
                flags.cost_tracking_enabled,
                flags.baselines_enabled,
                flags.earned_value_enabled,
                flags.capacity_enabled,
                flags.change_management_enabled,
                Utc::now().to_rfc3339(),
                project_id,
            ],
        )?;
        if changed == 0 {
            return Err(EngineError::NotFound(format!("project '{}'", project_id)));
        }
        Ok(())
    }

    // ─── Indicator definitions ──────────────────────────────────────────────

    /// Upsert-by-code for the system catalog (org_id NULL). Identity and
    /// `created_at` are preserved on conflict so repeated seeding leaves the
    /// catalog byte-identical apart from `updated_at`.
    #[allow(clippy::too_many_arguments)]
    pub fn upsert_system_definition(
        &self,
        code: &str,
        name: &str,
        category: IndicatorCategory,
        unit: &str,
        direction: Direction,
        strategy: &str,
        required_governance_flag: Option<GovernanceFlag>,
        default_enabled: bool,
        data_sources: &[&str],
    ) -> EngineResult<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO indicator_definitions (
               id, code, name, category, unit, direction, strategy, required_governance_flag,
               default_enabled, data_sources_json, is_active, org_id, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1, NULL, ?11, ?11)
             ON CONFLICT (code) DO UPDATE SET
               name = excluded.name,
               category = excluded.category,
               unit = excluded.unit,
               direction = excluded.direction,
               strategy = excluded.strategy,
               required_governance_flag = excluded.required_governance_flag,
               default_enabled = excluded.default_enabled,
               data_sources_json = excluded.data_sources_json,
               updated_at = excluded.updated_at",
            params![
                Uuid::new_v4().to_string(),
                code,
                name,
                category.as_str(),
                unit,
                direction.as_str(),
                strategy,
                required_governance_flag.map(GovernanceFlag::as_str),
                default_enabled,
                serde_json::to_string(data_sources)?,
                now,
            ],
        )?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn insert_custom_definition(
        &self,
        org_id: &str,
        code: &str,
        name: &str,
        category: IndicatorCategory,
        unit: &str,
        direction: Direction,
        strategy: &str,
        required_governance_flag: Option<GovernanceFlag>,
        default_enabled: bool,
        data_sources: &[&str],
    ) -> EngineResult<IndicatorDefinition> {
        let now = Utc::now().to_rfc3339();
        let id = Uuid::new_v4().to_string();
        {
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO indicator_definitions (
                   id, code, name, category, unit, direction, strategy, required_governance_flag,
                   default_enabled, data_sources_json, is_active, org_id, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1, ?11, ?12, ?12)",
                params![
                    id,
                    code,
                    name,
                    category.as_str(),
                    unit,
                    direction.as_str(),
                    strategy,
                    required_governance_flag.map(GovernanceFlag::as_str),
                    default_enabled,
                    serde_json::to_string(data_sources)?,
                    org_id,
                    now,
                ],
            )?;
        }
        self.find_definition_by_code(code, Some(org_id))?
            .ok_or_else(|| EngineError::Internal(format!("definition '{}' vanished after insert", code)))
    }

    /// Active definitions visible to the caller: system rows plus the
    /// caller's own org rows. Ordered by (category, code) for stable
    /// rendering.
    pub fn list_definitions(
        &self,
        org_id: Option<&str>,
        include_governance_gated: bool,
    ) -> EngineResult<Vec<IndicatorDefinition>> {
        let conn = self.lock()?;
        let mut query = format!(
            "SELECT {DEFINITION_COLUMNS} FROM indicator_definitions WHERE is_active = 1"
        );
        let mut query_params: Vec<String> = Vec::new();

        match org_id {
            Some(org) => {
                query.push_str(" AND (org_id IS NULL OR org_id = ?)");
                query_params.push(org.to_string());
            }
            None => query.push_str(" AND org_id IS NULL"),
        }
        if !include_governance_gated {
            query.push_str(" AND required_governance_flag IS NULL");
        }
        query.push_str(" ORDER BY category ASC, code ASC");

        let mut statement = conn.prepare(&query)?;
        let dyn_params: Vec<&dyn rusqlite::ToSql> = query_params
            .iter()
            .map(|param| param as &dyn rusqlite::ToSql)
            .collect();
        let rows = statement.query_map(dyn_params.as_slice(), parse_definition_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn find_definition_by_code(
        &self,
        code: &str,
        org_id: Option<&str>,
    ) -> EngineResult<Option<IndicatorDefinition>> {
        let conn = self.lock()?;
        let query = format!(
            "SELECT {DEFINITION_COLUMNS} FROM indicator_definitions
             WHERE code = ?1 AND is_active = 1 AND (org_id IS NULL OR org_id = ?2)"
        );
        let definition = conn
            .query_row(&query, params![code, org_id], parse_definition_row)
            .optional()?;
        Ok(definition)
    }

    /// Exact multi-code lookup; empty input yields empty output without
    /// touching the table.
    pub fn find_definitions_by_codes(
        &self,
        codes: &[&str],
        org_id: Option<&str>,
    ) -> EngineResult<Vec<IndicatorDefinition>> {
        let mut result = Vec::new();
        for code in codes {
            if let Some(definition) = self.find_definition_by_code(code, org_id)? {
                result.push(definition);
            }
        }
        Ok(result)
    }

    pub fn set_definition_active(&self, code: &str, is_active: bool) -> EngineResult<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE indicator_definitions SET is_active = ?1, updated_at = ?2 WHERE code = ?3",
            params![is_active, Utc::now().to_rfc3339(), code],
        )?;
        if changed == 0 {
            return Err(EngineError::NotFound(format!("indicator '{}'", code)));
        }
        Ok(())
    }

    pub fn count_definitions(&self) -> EngineResult<i64> {
        let conn = self.lock()?;
        let count = conn.query_row("SELECT COUNT(1) FROM indicator_definitions", [], |row| {
            row.get(0)
        })?;
        Ok(count)
    }

    // ─── Project indicator configs ──────────────────────────────────────────

    pub fn find_config(
        &self,
        project_id: &str,
        indicator_id: &str,
    ) -> EngineResult<Option<ProjectIndicatorConfig>> {
        let conn = self.lock()?;
        let config = conn
            .query_row(
                "SELECT id, project_id, indicator_id, enabled, target_json,
                        threshold_warning_json, threshold_critical_json, created_at, updated_at
                 FROM project_indicator_configs
                 WHERE project_id = ?1 AND indicator_id = ?2",
                params![project_id, indicator_id],
                parse_config_row,
            )
            .optional()?;
        Ok(config)
    }

    pub fn list_configs(&self, project_id: &str) -> EngineResult<Vec<ProjectIndicatorConfig>> {
        let conn = self.lock()?;
        let mut statement = conn.prepare(
            "SELECT c.id, c.project_id, c.indicator_id, c.enabled, c.target_json,
                    c.threshold_warning_json, c.threshold_critical_json, c.created_at, c.updated_at
             FROM project_indicator_configs c
             JOIN indicator_definitions d ON d.id = c.indicator_id
             WHERE c.project_id = ?1
             ORDER BY d.code ASC",
        )?;
        let rows = statement.query_map([project_id], parse_config_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn insert_config(
        &self,
        project_id: &str,
        indicator_id: &str,
        enabled: bool,
        target: Option<&serde_json::Value>,
        threshold_warning: Option<&serde_json::Value>,
        threshold_critical: Option<&serde_json::Value>,
    ) -> EngineResult<ProjectIndicatorConfig> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO project_indicator_configs (
               id, project_id, indicator_id, enabled, target_json,
               threshold_warning_json, threshold_critical_json, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                id,
                project_id,
                indicator_id,
                enabled,
                target.map(serde_json::Value::to_string),
                threshold_warning.map(serde_json::Value::to_string),
                threshold_critical.map(serde_json::Value::to_string),
                now.to_rfc3339(),
            ],
        )?;

        Ok(ProjectIndicatorConfig {
            id,
            project_id: project_id.to_string(),
            indicator_id: indicator_id.to_string(),
            enabled,
            target: target.cloned(),
            threshold_warning: threshold_warning.cloned(),
            threshold_critical: threshold_critical.cloned(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn update_config(
        &self,
        config_id: &str,
        enabled: bool,
        target: Option<&serde_json::Value>,
        threshold_warning: Option<&serde_json::Value>,
        threshold_critical: Option<&serde_json::Value>,
    ) -> EngineResult<ProjectIndicatorConfig> {
        {
            let conn = self.lock()?;
            let changed = conn.execute(
                "UPDATE project_indicator_configs
                 SET enabled = ?1, target_json = ?2, threshold_warning_json = ?3,
                     threshold_critical_json = ?4, updated_at = ?5
                 WHERE id = ?6",
                params![
                    enabled,
                    target.map(serde_json::Value::to_string),
                    threshold_warning.map(serde_json::Value::to_string),
                    threshold_critical.map(serde_json::Value::to_string),
                    Utc::now().to_rfc3339(),
                    config_id,
                ],
            )?;
            if changed == 0 {
                return Err(EngineError::NotFound(format!("config '{}'", config_id)));
            }
        }
        self.find_config_by_id(config_id)?
            .ok_or_else(|| EngineError::Internal(format!("config '{}' vanished after update", config_id)))
    }

    fn find_config_by_id(&self, config_id: &str) -> EngineResult<Option<ProjectIndicatorConfig>> {
        let conn = self.lock()?;
        let config = conn
            .query_row(
                "SELECT id, project_id, indicator_id, enabled, target_json,
                        threshold_warning_json, threshold_critical_json, created_at, updated_at
                 FROM project_indicator_configs WHERE id = ?1",
                [config_id],
                parse_config_row,
            )
            .optional()?;
        Ok(config)
    }

    pub fn list_enabled_configs_with_definitions(
        &self,
        project_id: &str,
    ) -> EngineResult<Vec<ConfigWithDefinition>> {
        let conn = self.lock()?;
        let mut statement = conn.prepare(
            "SELECT c.id, c.project_id, c.indicator_id, c.enabled, c.target_json,
                    c.threshold_warning_json, c.threshold_critical_json, c.created_at, c.updated_at,
                    d.id, d.code, d.name, d.category, d.unit, d.direction, d.strategy,
                    d.required_governance_flag, d.default_enabled, d.data_sources_json,
                    d.is_active, d.org_id, d.created_at, d.updated_at
             FROM project_indicator_configs c
             JOIN indicator_definitions d ON d.id = c.indicator_id
             WHERE c.project_id = ?1 AND c.enabled = 1 AND d.is_active = 1
             ORDER BY d.code ASC",
        )?;
        let rows = statement.query_map([project_id], |row| {
            let config = parse_config_row(row)?;
            let definition = parse_definition_row_offset(row, 9)?;
            Ok(ConfigWithDefinition { config, definition })
        })?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    // ─── Computed values ────────────────────────────────────────────────────

    /// Value sink: one row per (project, indicator, date); re-computation
    /// overwrites in place. The history is a daily snapshot series, not an
    /// event log.
    pub fn upsert_computed_value(
        &self,
        project_id: &str,
        definition: &IndicatorDefinition,
        as_of_date: NaiveDate,
        result: &CalcResult,
        computed_at: DateTime<Utc>,
    ) -> EngineResult<ComputedValue> {
        {
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO computed_values (
                   id, project_id, indicator_id, as_of_date, value_numeric, value_text,
                   value_json, sample_size, computed_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT (project_id, indicator_id, as_of_date) DO UPDATE SET
                   value_numeric = excluded.value_numeric,
                   value_text = excluded.value_text,
                   value_json = excluded.value_json,
                   sample_size = excluded.sample_size,
                   computed_at = excluded.computed_at",
                params![
                    Uuid::new_v4().to_string(),
                    project_id,
                    definition.id,
                    as_of_date.to_string(),
                    result.value_numeric,
                    result.value_text,
                    result.value_json.to_string(),
                    result.sample_size,
                    computed_at.to_rfc3339(),
                ],
            )?;
        }
        self.find_computed_value(project_id, &definition.id, as_of_date)?
            .ok_or_else(|| {
                EngineError::Internal(format!(
                    "computed value for '{}' vanished after upsert",
                    definition.code
                ))
            })
    }

    pub fn find_computed_value(
        &self,
        project_id: &str,
        indicator_id: &str,
        as_of_date: NaiveDate,
    ) -> EngineResult<Option<ComputedValue>> {
        let conn = self.lock()?;
        let value = conn
            .query_row(
                "SELECT v.id, v.project_id, v.indicator_id, d.code, v.as_of_date, v.value_numeric,
                        v.value_text, v.value_json, v.sample_size, v.computed_at
                 FROM computed_values v
                 JOIN indicator_definitions d ON d.id = v.indicator_id
                 WHERE v.project_id = ?1 AND v.indicator_id = ?2 AND v.as_of_date = ?3",
                params![project_id, indicator_id, as_of_date.to_string()],
                parse_value_row,
            )
            .optional()?;
        Ok(value)
    }

    pub fn list_computed_values(
        &self,
        project_id: &str,
        as_of_date: NaiveDate,
    ) -> EngineResult<Vec<ComputedValue>> {
        let conn = self.lock()?;
        let mut statement = conn.prepare(
            "SELECT v.id, v.project_id, v.indicator_id, d.code, v.as_of_date, v.value_numeric,
                    v.value_text, v.value_json, v.sample_size, v.computed_at
             FROM computed_values v
             JOIN indicator_definitions d ON d.id = v.indicator_id
             WHERE v.project_id = ?1 AND v.as_of_date = ?2
             ORDER BY d.code ASC",
        )?;
        let rows = statement.query_map(params![project_id, as_of_date.to_string()], parse_value_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    // ─── Template indicator bindings ────────────────────────────────────────

    pub fn find_binding(
        &self,
        template_id: &str,
        indicator_id: &str,
    ) -> EngineResult<Option<TemplateIndicatorBinding>> {
        let conn = self.lock()?;
        let binding = conn
            .query_row(
                "SELECT b.id, b.template_id, b.indicator_id, d.code, b.is_required,
                        b.default_target, b.created_at
                 FROM template_indicator_bindings b
                 JOIN indicator_definitions d ON d.id = b.indicator_id
                 WHERE b.template_id = ?1 AND b.indicator_id = ?2",
                params![template_id, indicator_id],
                parse_binding_row,
            )
            .optional()?;
        Ok(binding)
    }

    pub fn list_bindings(&self, template_id: &str) -> EngineResult<Vec<TemplateIndicatorBinding>> {
        let conn = self.lock()?;
        let mut statement = conn.prepare(
            "SELECT b.id, b.template_id, b.indicator_id, d.code, b.is_required,
                    b.default_target, b.created_at
             FROM template_indicator_bindings b
             JOIN indicator_definitions d ON d.id = b.indicator_id
             WHERE b.template_id = ?1
             ORDER BY d.code ASC",
        )?;
        let rows = statement.query_map([template_id], parse_binding_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn insert_binding(
        &self,
        template_id: &str,
        definition: &IndicatorDefinition,
        is_required: bool,
        default_target: Option<&str>,
    ) -> EngineResult<TemplateIndicatorBinding> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO template_indicator_bindings (
               id, template_id, indicator_id, is_required, default_target, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                template_id,
                definition.id,
                is_required,
                default_target,
                now.to_rfc3339(),
            ],
        )?;

        Ok(TemplateIndicatorBinding {
            id,
            template_id: template_id.to_string(),
            indicator_id: definition.id.clone(),
            indicator_code: definition.code.clone(),
            is_required,
            default_target: default_target.map(ToString::to_string),
            created_at: now,
        })
    }
}

// ─── Row parsers ────────────────────────────────────────────────────────────

fn parse_project_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProjectRecord> {
    Ok(ProjectRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        org_id: row.get(2)?,
        flags: GovernanceFlags {
            iterations_enabled: row.get::<_, i32>(3)? != 0,
            cost_tracking_enabled: row.get::<_, i32>(4)? != 0,
            baselines_enabled: row.get::<_, i32>(5)? != 0,
            earned_value_enabled: row.get::<_, i32>(6)? != 0,
            capacity_enabled: row.get::<_, i32>(7)? != 0,
            change_management_enabled: row.get::<_, i32>(8)? != 0,
        },
        created_at: parse_time(&row.get::<_, String>(9)?)?,
        updated_at: parse_time(&row.get::<_, String>(10)?)?,
    })
}

fn parse_definition_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<IndicatorDefinition> {
    parse_definition_row_offset(row, 0)
}

fn parse_definition_row_offset(
    row: &rusqlite::Row<'_>,
    offset: usize,
) -> rusqlite::Result<IndicatorDefinition> {
    let data_sources_raw: String = row.get(offset + 9)?;
    Ok(IndicatorDefinition {
        id: row.get(offset)?,
        code: row.get(offset + 1)?,
        name: row.get(offset + 2)?,
        category: parse_category(&row.get::<_, String>(offset + 3)?)?,
        unit: row.get(offset + 4)?,
        direction: parse_direction(&row.get::<_, String>(offset + 5)?)?,
        strategy: row.get(offset + 6)?,
        required_governance_flag: row
            .get::<_, Option<String>>(offset + 7)?
            .as_deref()
            .and_then(GovernanceFlag::parse),
        default_enabled: row.get::<_, i32>(offset + 8)? != 0,
        data_sources: serde_json::from_str(&data_sources_raw)
            .map_err(|error| conversion_error(error.to_string()))?,
        is_active: row.get::<_, i32>(offset + 10)? != 0,
        org_id: row.get(offset + 11)?,
        created_at: parse_time(&row.get::<_, String>(offset + 12)?)?,
        updated_at: parse_time(&row.get::<_, String>(offset + 13)?)?,
    })
}

fn parse_config_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProjectIndicatorConfig> {
    Ok(ProjectIndicatorConfig {
        id: row.get(0)?,
        project_id: row.get(1)?,
        indicator_id: row.get(2)?,
        enabled: row.get::<_, i32>(3)? != 0,
        target: parse_optional_json(row.get::<_, Option<String>>(4)?)?,
        threshold_warning: parse_optional_json(row.get::<_, Option<String>>(5)?)?,
        threshold_critical: parse_optional_json(row.get::<_, Option<String>>(6)?)?,
        created_at: parse_time(&row.get::<_, String>(7)?)?,
        updated_at: parse_time(&row.get::<_, String>(8)?)?,
    })
}

fn parse_value_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ComputedValue> {
    let value_json_raw: String = row.get(7)?;
    Ok(ComputedValue {
        id: row.get(0)?,
        project_id: row.get(1)?,
        indicator_id: row.get(2)?,
        indicator_code: row.get(3)?,
        as_of_date: parse_date(&row.get::<_, String>(4)?)?,
        value_numeric: row.get(5)?,
        value_text: row.get(6)?,
        value_json: serde_json::from_str(&value_json_raw)
            .map_err(|error| conversion_error(error.to_string()))?,
        sample_size: row.get(8)?,
        computed_at: parse_time(&row.get::<_, String>(9)?)?,
    })
}

fn parse_binding_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TemplateIndicatorBinding> {
    Ok(TemplateIndicatorBinding {
        id: row.get(0)?,
        template_id: row.get(1)?,
        indicator_id: row.get(2)?,
        indicator_code: row.get(3)?,
        is_required: row.get::<_, i32>(4)? != 0,
        default_target: row.get(5)?,
        created_at: parse_time(&row.get::<_, String>(6)?)?,
    })
}

fn parse_optional_json(raw: Option<String>) -> rusqlite::Result<Option<serde_json::Value>> {
    raw.map(|text| {
        serde_json::from_str(&text).map_err(|error| conversion_error(error.to_string()))
    })
    .transpose()
}

fn parse_category(raw: &str) -> rusqlite::Result<IndicatorCategory> {
    match raw {
        "delivery" => Ok(IndicatorCategory::Delivery),
        "financial" => Ok(IndicatorCategory::Financial),
        "schedule" => Ok(IndicatorCategory::Schedule),
        "change" => Ok(IndicatorCategory::Change),
        "risk" => Ok(IndicatorCategory::Risk),
        "quality" => Ok(IndicatorCategory::Quality),
        other => Err(conversion_error(format!("unknown category '{}'", other))),
    }
}

fn parse_direction(raw: &str) -> rusqlite::Result<Direction> {
    match raw {
        "higher-is-better" => Ok(Direction::HigherIsBetter),
        "lower-is-better" => Ok(Direction::LowerIsBetter),
        other => Err(conversion_error(format!("unknown direction '{}'", other))),
    }
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| conversion_error(error.to_string()))
}

fn parse_date(raw: &str) -> rusqlite::Result<NaiveDate> {
    raw.parse::<NaiveDate>()
        .map_err(|error| conversion_error(error.to_string()))
}

fn conversion_error(detail: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, detail)),
    )
}

#[cfg(test)]
mod tests {
    use super::Database;
    use crate::models::{CalcResult, GovernanceFlags};
    use chrono::{NaiveDate, Utc};

    fn open_db(dir: &tempfile::TempDir) -> Database {
        Database::new(&dir.path().join("test.db")).expect("db")
    }

    #[test]
    fn opening_a_database_seeds_the_default_catalog() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = open_db(&dir);
        let definitions = db.list_definitions(None, true).expect("list");
        assert_eq!(definitions.len() as i64, db.count_definitions().expect("count"));
        assert!(definitions.iter().any(|def| def.code == "wip"));
    }

    #[test]
    fn missing_project_reads_as_all_governance_flags_false() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = open_db(&dir);
        let flags = db.governance_flags("no-such-project").expect("flags");
        assert_eq!(flags, GovernanceFlags::default());
    }

    #[test]
    fn computed_value_upsert_overwrites_same_day_row() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = open_db(&dir);
        let project = db
            .create_project("Apollo", None, &GovernanceFlags::default())
            .expect("project");
        let definition = db
            .find_definition_by_code("wip", None)
            .expect("lookup")
            .expect("wip definition");
        let date = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();

        let first = CalcResult {
            value_numeric: Some(2.0),
            value_text: None,
            value_json: serde_json::json!({"engineVersion": "test"}),
            sample_size: 4,
        };
        db.upsert_computed_value(&project.id, &definition, date, &first, Utc::now())
            .expect("first write");

        let second = CalcResult {
            value_numeric: Some(3.0),
            value_text: None,
            value_json: serde_json::json!({"engineVersion": "test"}),
            sample_size: 5,
        };
        db.upsert_computed_value(&project.id, &definition, date, &second, Utc::now())
            .expect("second write");

        let values = db.list_computed_values(&project.id, date).expect("list");
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].value_numeric, Some(3.0));
        assert_eq!(values[0].sample_size, 5);
    }

    #[test]
    fn corrupt_stored_json_surfaces_instead_of_reading_as_unset() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("test.db");
        let db = Database::new(&db_path).expect("db");
        let project = db
            .create_project("Apollo", None, &GovernanceFlags::default())
            .expect("project");
        let definition = db
            .find_definition_by_code("wip", None)
            .expect("lookup")
            .expect("wip definition");
        db.insert_config(
            &project.id,
            &definition.id,
            true,
            Some(&serde_json::json!({"value": 5})),
            None,
            None,
        )
        .expect("config");

        let raw = rusqlite::Connection::open(&db_path).expect("second connection");
        raw.execute("UPDATE project_indicator_configs SET target_json = 'not-json'", [])
            .expect("corrupt row");

        let error = db.find_config(&project.id, &definition.id).unwrap_err();
        assert!(error.to_string().contains("INTERNAL"));
    }

    #[test]
    fn custom_definitions_are_invisible_to_other_orgs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = open_db(&dir);
        db.insert_custom_definition(
            "org-a",
            "custom_score",
            "Custom Score",
            crate::models::IndicatorCategory::Quality,
            "points",
            crate::models::Direction::HigherIsBetter,
            "wip",
            None,
            false,
            &["tasks"],
        )
        .expect("custom definition");

        assert!(db
            .find_definition_by_code("custom_score", Some("org-a"))
            .expect("lookup")
            .is_some());
        assert!(db
            .find_definition_by_code("custom_score", Some("org-b"))
            .expect("lookup")
            .is_none());
        assert!(db
            .find_definition_by_code("custom_score", None)
            .expect("lookup")
            .is_none());
    }
}
