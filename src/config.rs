//! Synthesis configuration.
//!
//! Every constant the pipeline depends on (strategy ladder, classifier rules,
//! fatal markers, cleaner markers, limits) lives in one immutable
//! `SynthConfig` so tests and operators can substitute catalogues without
//! touching the orchestrator.
use crate::classify::{ClassifierRule, ErrorCategory};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Current schema version for synthesis config files.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;
/// Per-project config file name looked up at the project root.
pub const PROJECT_CONFIG_FILE: &str = ".cdk-synth.json";
/// Environment variable overriding the synth tool command.
pub const TOOL_ENV_VAR: &str = "CDK_SYNTH_TOOL";

pub const DEFAULT_TOOL_COMMAND: &str = "cdk synth";
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_EXCERPT_MAX_CHARS: usize = 300;
pub const DEFAULT_OUTPUT_DIR: &str = "cdk.out";
pub const DEFAULT_TEMPLATE_SUFFIX: &str = ".template.json";

/// One rung of the fallback ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyDescriptor {
    pub name: String,
    #[serde(default)]
    pub invocation_flags: Vec<String>,
}

impl StrategyDescriptor {
    pub fn new(name: &str, flags: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            invocation_flags: flags.iter().map(|flag| flag.to_string()).collect(),
        }
    }
}

/// Identifiers the synth tool injects into generated templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanerMarkers {
    pub metadata_resource_type: String,
    pub bootstrap_parameter: String,
    pub metadata_condition: String,
    pub bootstrap_rule: String,
    pub path_metadata_key: String,
    pub skip_marker: String,
}

impl Default for CleanerMarkers {
    fn default() -> Self {
        Self {
            metadata_resource_type: "AWS::CDK::Metadata".to_string(),
            bootstrap_parameter: "BootstrapVersion".to_string(),
            metadata_condition: "CDKMetadataAvailable".to_string(),
            bootstrap_rule: "CheckBootstrapVersion".to_string(),
            path_metadata_key: "aws:cdk:path".to_string(),
            skip_marker: "[cdk:skip]".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SynthConfig {
    pub schema_version: u32,
    /// Base command; strategy flags are appended to it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_command: Option<String>,
    #[serde(default = "default_strategies")]
    pub strategies: Vec<StrategyDescriptor>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_excerpt_max_chars")]
    pub excerpt_max_chars: usize,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default = "default_template_suffix")]
    pub template_suffix: String,
    #[serde(default = "default_classifier_rules")]
    pub classifier_rules: Vec<ClassifierRule>,
    #[serde(default = "default_fatal_markers")]
    pub fatal_markers: Vec<String>,
    #[serde(default)]
    pub cleaner: CleanerMarkers,
}

impl Default for SynthConfig {
    fn default() -> Self {
        default_config()
    }
}

/// Ladder ordered from strictest semantics to most permissive.
pub fn default_strategies() -> Vec<StrategyDescriptor> {
    vec![
        StrategyDescriptor::new("standard", &["--quiet"]),
        StrategyDescriptor::new("no-lookups", &["--no-lookups", "--quiet"]),
        StrategyDescriptor::new("no-version-reporting", &["--no-version-reporting", "--quiet"]),
        StrategyDescriptor::new("verbose", &[]),
    ]
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_excerpt_max_chars() -> usize {
    DEFAULT_EXCERPT_MAX_CHARS
}

fn default_output_dir() -> String {
    DEFAULT_OUTPUT_DIR.to_string()
}

fn default_template_suffix() -> String {
    DEFAULT_TEMPLATE_SUFFIX.to_string()
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

/// Markers for which no alternate invocation can succeed.
pub fn default_fatal_markers() -> Vec<String> {
    strings(&[
        "SyntaxError",
        "ModuleNotFoundError",
        "Cannot find module",
        "ENOENT",
        "No such file or directory",
        "cdk.json not found",
    ])
}

/// First-match-wins classification table.
///
/// `{install_command}` and `{dependency_file}` in recommendations are filled
/// in from the detected language.
pub fn default_classifier_rules() -> Vec<ClassifierRule> {
    vec![
        ClassifierRule {
            category: ErrorCategory::RuntimeIncompatibility,
            markers: strings(&["nodejs22.x", "E3030"]),
            case_insensitive: false,
            message: "Lambda runtime not supported by AWS".to_string(),
            recommendations: strings(&[
                "Add to cdk.json context: \"@aws-cdk/customresources:defaultRuntime\": \"nodejs20.x\"",
                "Or pin aws-cdk-lib to version 2.100.0 or earlier",
            ]),
            user_fixable: true,
        },
        ClassifierRule {
            category: ErrorCategory::MissingDependencies,
            markers: strings(&["ModuleNotFoundError", "Cannot find module"]),
            case_insensitive: false,
            message: "Required dependencies not installed".to_string(),
            recommendations: strings(&[
                "Run: {install_command}",
                "Ensure all dependencies are listed in {dependency_file}",
                "Check that dependency versions are compatible",
            ]),
            user_fixable: true,
        },
        ClassifierRule {
            category: ErrorCategory::CredentialUnavailable,
            markers: strings(&["not authorized", "AccessDenied"]),
            case_insensitive: false,
            message: "AWS API calls failed (expected in CI/CD without credentials)".to_string(),
            recommendations: strings(&[
                "This is normal in CI/CD environments without AWS credentials",
                "Commit cdk.context.json so cached context values replace live AWS lookups",
            ]),
            user_fixable: false,
        },
        ClassifierRule {
            category: ErrorCategory::Timeout,
            markers: strings(&["timeout", "timed out"]),
            case_insensitive: true,
            message: "CDK synthesis took longer than the allowed time".to_string(),
            recommendations: strings(&[
                "Reduce synthesis complexity in the CDK app",
                "Split the app into smaller stacks",
                "Check for unbounded loops or slow lookups during synthesis",
            ]),
            user_fixable: true,
        },
    ]
}

/// Build the default config used when no config file is present.
pub fn default_config() -> SynthConfig {
    SynthConfig {
        schema_version: CONFIG_SCHEMA_VERSION,
        tool_command: None,
        strategies: default_strategies(),
        timeout_secs: DEFAULT_TIMEOUT_SECS,
        excerpt_max_chars: DEFAULT_EXCERPT_MAX_CHARS,
        output_dir: DEFAULT_OUTPUT_DIR.to_string(),
        template_suffix: DEFAULT_TEMPLATE_SUFFIX.to_string(),
        classifier_rules: default_classifier_rules(),
        fatal_markers: default_fatal_markers(),
        cleaner: CleanerMarkers::default(),
    }
}

/// Render a pretty JSON config stub users can edit.
pub fn config_stub() -> Result<String> {
    serde_json::to_string_pretty(&default_config()).context("serialize config stub")
}

pub fn load_config(path: &Path) -> Result<SynthConfig> {
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    let config: SynthConfig = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse synth config JSON {}", path.display()))?;
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &SynthConfig) -> Result<()> {
    if config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported synth config schema_version {}",
            config.schema_version
        ));
    }
    if config.strategies.is_empty() {
        return Err(anyhow!("strategies must contain at least one entry"));
    }
    for (idx, strategy) in config.strategies.iter().enumerate() {
        if strategy.name.trim().is_empty() {
            return Err(anyhow!("strategies[{idx}].name must be non-empty"));
        }
        if strategy.invocation_flags.iter().any(|flag| flag.trim().is_empty()) {
            return Err(anyhow!(
                "strategies[{idx}] ({}) has empty invocation flags",
                strategy.name
            ));
        }
    }
    if config.timeout_secs == 0 {
        return Err(anyhow!("timeout_secs must be > 0"));
    }
    if config.excerpt_max_chars == 0 {
        return Err(anyhow!("excerpt_max_chars must be > 0"));
    }
    if config.template_suffix.trim().is_empty() {
        return Err(anyhow!("template_suffix must be non-empty"));
    }
    let output_dir = Path::new(&config.output_dir);
    if config.output_dir.trim().is_empty()
        || output_dir.is_absolute()
        || output_dir
            .components()
            .any(|component| matches!(component, std::path::Component::ParentDir))
    {
        return Err(anyhow!(
            "output_dir must be a relative path without '..' (got {:?})",
            config.output_dir
        ));
    }
    for (idx, rule) in config.classifier_rules.iter().enumerate() {
        if rule.markers.is_empty() || rule.markers.iter().any(|marker| marker.is_empty()) {
            return Err(anyhow!("classifier_rules[{idx}] needs non-empty markers"));
        }
        if rule.recommendations.is_empty() {
            return Err(anyhow!(
                "classifier_rules[{idx}] needs at least one recommendation"
            ));
        }
    }
    if config.fatal_markers.iter().any(|marker| marker.is_empty()) {
        return Err(anyhow!("fatal_markers entries must be non-empty"));
    }
    Ok(())
}

/// Pick the config file to use: explicit path, project-local file, then the
/// user config directory. `None` means built-in defaults.
pub fn resolve_config_path(
    explicit: Option<&Path>,
    project_root: Option<&Path>,
) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(root) = project_root {
        let candidate = root.join(PROJECT_CONFIG_FILE);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    dirs::config_dir()
        .map(|dir| dir.join("cdk-synth").join("config.json"))
        .filter(|candidate| candidate.is_file())
}

pub fn load_effective_config(
    explicit: Option<&Path>,
    project_root: Option<&Path>,
) -> Result<SynthConfig> {
    match resolve_config_path(explicit, project_root) {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading synth config");
            load_config(&path)
        }
        None => Ok(default_config()),
    }
}

/// Resolve the synth tool argv: explicit flag > config > env var > default.
pub fn resolve_tool_command(explicit: Option<&str>, config: &SynthConfig) -> Result<Vec<String>> {
    let command = explicit
        .map(str::to_string)
        .or_else(|| config.tool_command.clone())
        .or_else(|| std::env::var(TOOL_ENV_VAR).ok())
        .unwrap_or_else(|| DEFAULT_TOOL_COMMAND.to_string());
    let argv = shell_words::split(&command)
        .with_context(|| format!("parse synth tool command: {command}"))?;
    if argv.is_empty() {
        return Err(anyhow!("synth tool command is empty"));
    }
    Ok(argv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        validate_config(&default_config()).expect("defaults are valid");
    }

    #[test]
    fn default_ladder_is_ordered_strict_to_permissive() {
        let names: Vec<_> = default_strategies().into_iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            ["standard", "no-lookups", "no-version-reporting", "verbose"]
        );
        let strategies = default_strategies();
        assert!(strategies[0].invocation_flags.contains(&"--quiet".to_string()));
        assert!(strategies[3].invocation_flags.is_empty());
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: SynthConfig =
            serde_json::from_str(r#"{"schema_version": 1, "timeout_secs": 30}"#)
                .expect("parse partial config");
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.strategies, default_strategies());
        assert_eq!(config.fatal_markers, default_fatal_markers());
        validate_config(&config).expect("valid");
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = default_config();
        config.strategies.clear();
        assert!(validate_config(&config).is_err());

        let mut config = default_config();
        config.schema_version = 99;
        assert!(validate_config(&config).is_err());

        let mut config = default_config();
        config.output_dir = "../elsewhere".to_string();
        assert!(validate_config(&config).is_err());

        let mut config = default_config();
        config.timeout_secs = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let parsed: Result<SynthConfig, _> =
            serde_json::from_str(r#"{"schema_version": 1, "retries": 3}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn load_config_reads_project_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(PROJECT_CONFIG_FILE);
        fs::write(&path, r#"{"schema_version": 1, "tool_command": "npx cdk synth"}"#)
            .expect("write config");

        let resolved = resolve_config_path(None, Some(dir.path())).expect("project config");
        assert_eq!(resolved, path);
        let config = load_config(&resolved).expect("load");
        assert_eq!(config.tool_command.as_deref(), Some("npx cdk synth"));
    }

    #[test]
    fn explicit_tool_command_wins() {
        let mut config = default_config();
        config.tool_command = Some("npx cdk synth".to_string());
        let argv = resolve_tool_command(Some("'/opt/my tools/cdk' synth"), &config).expect("argv");
        assert_eq!(argv, ["/opt/my tools/cdk", "synth"]);
        let argv = resolve_tool_command(None, &config).expect("argv");
        assert_eq!(argv, ["npx", "cdk", "synth"]);
    }

    #[test]
    fn empty_tool_command_is_an_error() {
        assert!(resolve_tool_command(Some("   "), &default_config()).is_err());
    }
}
