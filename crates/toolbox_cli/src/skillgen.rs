//! Claude skill stubs (`SKILL.md`) generated from contracts.
//!
//! One skill per capability, named after the action part of the capability
//! name in kebab case. Existing skills are left alone unless forced, including
//! hand-written skills that already describe the capability under a
//! different name.

use crate::error::{CliError, CliResult};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use toolbox_core::{CapabilityName, Contract};
use toolbox_registry::Registry;

/// Default output root, relative to the working directory
pub const DEFAULT_SKILLS_DIR: &str = ".claude/skills";

/// File name inside each skill directory
pub const SKILL_FILE: &str = "SKILL.md";

/// Placeholder for a parameter without a default
const NO_DEFAULT: &str = "-";

/// `infra.fleet_health` becomes `fleet-health`
#[must_use]
pub fn skill_slug(name: &CapabilityName) -> String {
    name.action().replace('_', "-")
}

fn title_case(slug: &str) -> String {
    slug.split('-')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn type_label(spec: &Value) -> String {
    match spec.get("type") {
        Some(Value::String(t)) => t.clone(),
        Some(Value::Array(types)) => {
            let names: Vec<&str> = types.iter().filter_map(Value::as_str).collect();
            let mut label = names
                .iter()
                .copied()
                .filter(|t| *t != "null")
                .collect::<Vec<_>>()
                .join(" | ");
            if names.contains(&"null") {
                label.push('?');
            }
            label
        }
        _ => "any".to_string(),
    }
}

fn primary_type(spec: &Value) -> &str {
    match spec.get("type") {
        Some(Value::String(t)) => t,
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .find(|t| *t != "null")
            .unwrap_or("string"),
        _ => "string",
    }
}

fn enum_literal(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(format!("`{s}`")),
        other => Some(format!("`{other}`")),
    }
}

fn required(schema: &Value) -> Vec<&str> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

/// Markdown table of the input schema's properties
#[must_use]
pub fn param_table(schema: &Value) -> String {
    let Some(props) = schema
        .get("properties")
        .and_then(Value::as_object)
        .filter(|p| !p.is_empty())
    else {
        return "_No parameters._".to_string();
    };
    let required = required(schema);

    let mut rows = vec![
        "| Parameter | Type | Required | Default | Description |".to_string(),
        "|-----------|------|----------|---------|-------------|".to_string(),
    ];
    for (name, spec) in props {
        let default = match spec.get("default") {
            None | Some(Value::Null) => NO_DEFAULT.to_string(),
            Some(value) => format!("`{value}`"),
        };
        let mut description = spec
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if let Some(values) = spec.get("enum").and_then(Value::as_array) {
            let values = values.iter().filter_map(enum_literal).collect::<Vec<_>>().join(", ");
            description = if description.is_empty() {
                format!("One of: {values}.")
            } else {
                format!("{description} Values: {values}.")
            };
        }
        rows.push(format!(
            "| `{name}` | {} | {} | {default} | {description} |",
            type_label(spec),
            if required.contains(&name.as_str()) { "yes" } else { "no" },
        ));
    }
    rows.join("\n")
}

fn error_table(contract: &Contract) -> String {
    let mut rows = vec![
        "| Code | Description |".to_string(),
        "|------|-------------|".to_string(),
    ];
    rows.extend(
        contract
            .errors
            .iter()
            .map(|e| format!("| `{}` | {} |", e.code, e.description)),
    );
    rows.join("\n")
}

/// Example call listing the required parameters
#[must_use]
pub fn example_call(name: &CapabilityName, schema: &Value) -> String {
    let required = required(schema);
    let args: Vec<String> = schema
        .get("properties")
        .and_then(Value::as_object)
        .into_iter()
        .flatten()
        .filter(|(prop, _)| required.contains(&prop.as_str()))
        .map(|(prop, spec)| match primary_type(spec) {
            "string" => format!("{prop}=\"...\""),
            "boolean" => format!("{prop}=true"),
            "integer" | "number" => format!("{prop}=0"),
            "array" => format!("{prop}=[\"...\"]"),
            _ => format!("{prop}=..."),
        })
        .collect();
    format!("{name}({})", args.join(", "))
}

/// `SKILL.md` content for one contract
#[must_use]
pub fn render_skill(contract: &Contract) -> String {
    let slug = skill_slug(&contract.name);
    let description = contract.description.as_str();

    let mut lines: Vec<String> = vec![
        "---".into(),
        format!("name: {slug}"),
        format!("description: {description}"),
        "---".into(),
        String::new(),
        format!("# {}", title_case(&slug)),
        String::new(),
        description.to_string(),
        String::new(),
        "## Invocation".into(),
        String::new(),
        format!("Call the `{}` capability via MCP:", contract.name),
        String::new(),
        "```".into(),
        example_call(&contract.name, &contract.input_schema),
        "```".into(),
        String::new(),
        "## Parameters".into(),
        String::new(),
        param_table(&contract.input_schema),
        String::new(),
    ];
    if !contract.errors.is_empty() {
        lines.extend(["## Error Codes".into(), String::new(), error_table(contract), String::new()]);
    }
    if !contract.side_effects.is_empty() {
        lines.extend([
            "## Side Effects".into(),
            String::new(),
            contract.side_effects.clone(),
            String::new(),
        ]);
    }
    lines.join("\n")
}

/// Phrases that mark a skill as written for one specific capability
fn coverage_markers(name: &CapabilityName) -> [String; 3] {
    [
        format!("`{name}` capability"),
        format!("Call the `{name}`"),
        format!("`{name}` via MCP"),
    ]
}

/// Slug of an existing skill under `skills_dir` that documents `name`
///
/// # Errors
///
/// Returns error if the directory or a skill file cannot be read
pub fn covered_by(name: &CapabilityName, skills_dir: &Path) -> CliResult<Option<String>> {
    if !skills_dir.is_dir() {
        return Ok(None);
    }
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(skills_dir)
        .map_err(|e| CliError::io(skills_dir, e))?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .collect();
    dirs.sort();

    let markers = coverage_markers(name);
    for dir in dirs {
        let file = dir.join(SKILL_FILE);
        if !file.is_file() {
            continue;
        }
        let content = std::fs::read_to_string(&file).map_err(|e| CliError::io(&file, e))?;
        if markers.iter().any(|m| content.contains(m.as_str())) {
            return Ok(dir.file_name().map(|n| n.to_string_lossy().into_owned()));
        }
    }
    Ok(None)
}

/// Generation settings
#[derive(Debug, Clone)]
pub struct SkillOptions {
    /// Root holding one directory per skill
    pub out_dir: PathBuf,
    /// Overwrite existing and covered skills
    pub force: bool,
    /// Render without writing
    pub dry_run: bool,
    /// Only this capability
    pub capability: Option<String>,
}

impl SkillOptions {
    /// Defaults for `out_dir`
    #[must_use]
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            force: false,
            dry_run: false,
            capability: None,
        }
    }
}

/// What happened to one skill
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkillAction {
    /// New file written
    Created,
    /// Existing file replaced
    Overwritten,
    /// Rendered only
    DryRun(String),
    /// `SKILL.md` already exists
    Exists,
    /// Another skill documents the capability
    Covered(String),
}

/// Outcome for one capability
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillOutcome {
    /// Skill slug
    pub slug: String,
    /// Target `SKILL.md`
    pub path: PathBuf,
    /// Action taken
    pub action: SkillAction,
}

impl SkillOutcome {
    /// Whether the skill was generated, written or not
    #[must_use]
    pub fn generated(&self) -> bool {
        matches!(
            self.action,
            SkillAction::Created | SkillAction::Overwritten | SkillAction::DryRun(_)
        )
    }
}

impl fmt::Display for SkillOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.action {
            SkillAction::Created => write!(f, "  create  {}", self.path.display()),
            SkillAction::Overwritten => write!(f, "  overwrite  {}", self.path.display()),
            SkillAction::DryRun(content) => {
                write!(f, "  would write  {}\n  --- {} ---\n{content}", self.path.display(), self.slug)
            }
            SkillAction::Exists => {
                write!(f, "  skip  {:<30}  (exists, use --force to overwrite)", self.slug)
            }
            SkillAction::Covered(other) => write!(f, "  skip  {:<30}  (covered by {other})", self.slug),
        }
    }
}

/// Generate skills for every registered capability, in name order
///
/// # Errors
///
/// Returns error if a skill cannot be read or written
pub fn write_skills(registry: &Registry, options: &SkillOptions) -> CliResult<Vec<SkillOutcome>> {
    if let Some(only) = &options.capability {
        if !registry.contains(only) {
            return Err(CliError::UnknownCapability(only.clone()));
        }
    }

    let mut outcomes = Vec::new();
    for contract in registry.contracts() {
        if options
            .capability
            .as_deref()
            .is_some_and(|only| only != contract.name.as_str())
        {
            continue;
        }
        let slug = skill_slug(&contract.name);
        let path = options.out_dir.join(&slug).join(SKILL_FILE);
        let existed = path.exists();

        let action = if existed && !options.force {
            SkillAction::Exists
        } else if let Some(other) = (!options.force)
            .then(|| covered_by(&contract.name, &options.out_dir))
            .transpose()?
            .flatten()
        {
            SkillAction::Covered(other)
        } else if options.dry_run {
            SkillAction::DryRun(render_skill(contract))
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| CliError::io(parent, e))?;
            }
            std::fs::write(&path, render_skill(contract)).map_err(|e| CliError::io(&path, e))?;
            tracing::debug!(path = %path.display(), "wrote skill");
            if existed {
                SkillAction::Overwritten
            } else {
                SkillAction::Created
            }
        };
        outcomes.push(SkillOutcome { slug, path, action });
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolgen::tests::{plugin_tree, registry};
    use serde_json::json;
    use toolbox_core::CONTRACT_FILE;

    fn name(raw: &str) -> CapabilityName {
        CapabilityName::parse(raw).unwrap()
    }

    #[test]
    fn test_skill_slug_and_title() {
        assert_eq!(skill_slug(&name("infra.fleet_health")), "fleet-health");
        assert_eq!(skill_slug(&name("text.upper")), "upper");
        assert_eq!(title_case("fleet-health"), "Fleet Health");
    }

    #[test]
    fn test_param_table() {
        let schema = json!({
            "type": "object",
            "required": ["scope"],
            "properties": {
                "scope": {"type": "string", "enum": ["local", "full"], "default": "full"},
                "services": {"type": ["array", "null"], "description": "Names to check"},
                "verbose": {"type": "boolean", "description": "More output", "enum": [true, false, null]}
            }
        });
        let table = param_table(&schema);
        let rows: Vec<&str> = table.lines().collect();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[2], "| `scope` | string | yes | `\"full\"` | One of: `local`, `full`. |");
        assert_eq!(rows[3], "| `services` | array? | no | - | Names to check |");
        assert_eq!(rows[4], "| `verbose` | boolean | no | - | More output Values: `true`, `false`. |");
        assert_eq!(param_table(&json!({"type": "object"})), "_No parameters._");
    }

    #[test]
    fn test_example_call_lists_required_only() {
        let schema = json!({
            "required": ["host", "services", "port", "force"],
            "properties": {
                "host": {"type": "string"},
                "optional": {"type": "string"},
                "services": {"type": "array"},
                "port": {"type": "integer"},
                "force": {"type": ["boolean", "null"]}
            }
        });
        assert_eq!(
            example_call(&name("infra.stack_status"), &schema),
            "infra.stack_status(host=\"...\", services=[\"...\"], port=0, force=true)"
        );
    }

    #[test]
    fn test_render_skill() {
        let contract = Contract::from_json_str(
            &json!({
                "name": "infra.stack_status",
                "description": "Report compose service status.",
                "input_schema": {"type": "object", "required": ["host"], "properties": {"host": {"type": "string"}}},
                "output_schema": {"type": "object"},
                "errors": [{"code": "dependency_error", "description": "ssh missing"}],
                "side_effects": "None"
            })
            .to_string(),
        )
        .unwrap();
        let text = render_skill(&contract);
        assert!(text.starts_with("---\nname: stack-status\ndescription: Report compose service status.\n---\n"));
        assert!(text.contains("# Stack Status\n"));
        assert!(text.contains("Call the `infra.stack_status` capability via MCP:"));
        assert!(text.contains("infra.stack_status(host=\"...\")"));
        assert!(text.contains("| `dependency_error` | ssh missing |"));
        assert!(text.ends_with("## Side Effects\n\nNone\n"));
    }

    #[test]
    fn test_write_skills_skips_existing_and_covered() {
        let root = plugin_tree();
        let registry = registry(root.path());
        let out = tempfile::tempdir().unwrap();

        let first = write_skills(&registry, &SkillOptions::new(out.path())).unwrap();
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|o| o.action == SkillAction::Created));
        let upper = out.path().join("upper").join(SKILL_FILE);
        assert!(std::fs::read_to_string(&upper).unwrap().contains("# Upper"));

        let second = write_skills(&registry, &SkillOptions::new(out.path())).unwrap();
        assert!(second.iter().all(|o| o.action == SkillAction::Exists && !o.generated()));

        std::fs::remove_dir_all(out.path().join("restart")).unwrap();
        let custom = out.path().join("ops-handbook");
        std::fs::create_dir_all(&custom).unwrap();
        std::fs::write(custom.join(SKILL_FILE), "Use the `ops.restart` capability.\n").unwrap();
        let third = write_skills(&registry, &SkillOptions::new(out.path())).unwrap();
        assert_eq!(third[0].action, SkillAction::Covered("ops-handbook".to_string()));

        let forced = SkillOptions {
            force: true,
            ..SkillOptions::new(out.path())
        };
        let fourth = write_skills(&registry, &forced).unwrap();
        assert_eq!(fourth[0].action, SkillAction::Created);
        assert_eq!(fourth[1].action, SkillAction::Overwritten);
    }

    #[test]
    fn test_dry_run_and_filter() {
        let root = plugin_tree();
        let registry = registry(root.path());
        let out = tempfile::tempdir().unwrap();
        let options = SkillOptions {
            dry_run: true,
            capability: Some("text.upper".to_string()),
            ..SkillOptions::new(out.path().join("skills"))
        };
        let outcomes = write_skills(&registry, &options).unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(&outcomes[0].action, SkillAction::DryRun(text) if text.contains("name: upper")));
        assert!(!out.path().join("skills").exists());
        assert!(outcomes[0].to_string().starts_with("  would write  "));

        let missing = SkillOptions {
            capability: Some("text.lower".to_string()),
            ..options
        };
        assert!(matches!(
            write_skills(&registry, &missing),
            Err(CliError::UnknownCapability(_))
        ));
    }

    #[test]
    fn test_covered_by_ignores_passing_mentions() {
        let out = tempfile::tempdir().unwrap();
        let dir = out.path().join("secrets");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(SKILL_FILE), "Used by: text.upper\n").unwrap();
        std::fs::write(out.path().join(CONTRACT_FILE), "not a skill dir").unwrap();
        assert_eq!(covered_by(&name("text.upper"), out.path()).unwrap(), None);
    }
}
