//! Configuration schema, YAML parsing, and pre-build validation.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::{BTreeMap, HashSet};

use crate::types::Parallelism;

// ── Helper defaults for serde ──

fn is_false(v: &bool) -> bool {
    !v
}

// ── Target and notification references ──

/// A `targets` entry: either a bare name or a map with overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TargetRef {
    Name(String),
    Spec(TargetSpec),
}

impl TargetRef {
    pub fn name(&self) -> &str {
        match self {
            TargetRef::Name(n) => n,
            TargetRef::Spec(s) => &s.name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifies: Option<Vec<NotifyRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_on_success: Option<Vec<NotifyRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_on_failure: Option<Vec<NotifyRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_execution_of: Option<Vec<String>>,
    /// Explicit instance discriminator: forces a distinct node even where
    /// name and args collide.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

/// A `notifies*` entry: a bare name or `{name, args?, args_from?}`.
/// `args_from` accepts only `"self"`; the parser drops anything else.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NotifyRef {
    Name(String),
    Spec(NotifySpec),
}

impl NotifyRef {
    pub fn name(&self) -> &str {
        match self {
            NotifyRef::Name(n) => n,
            NotifyRef::Spec(s) => &s.name,
        }
    }

    pub fn args(&self) -> Option<&Value> {
        match self {
            NotifyRef::Name(_) => None,
            NotifyRef::Spec(s) => s.args.as_ref(),
        }
    }

    /// True when the notification should carry the source's resolved args.
    pub fn args_from_self(&self) -> bool {
        matches!(self, NotifyRef::Spec(s) if s.args_from.as_deref() == Some("self"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifySpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args_from: Option<String>,
}

// ── Parallelism (bool-or-integer in YAML) ──

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParallelSpec {
    Enabled(bool),
    Capacity(u32),
}

impl ParallelSpec {
    pub fn to_parallelism(self) -> Parallelism {
        match self {
            ParallelSpec::Enabled(false) => Parallelism::Sequential,
            ParallelSpec::Enabled(true) => Parallelism::Parallel,
            ParallelSpec::Capacity(n) => Parallelism::Limit(n),
        }
    }
}

// ── Declared targets ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub args_optional: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub always_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<TargetRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifies: Option<Vec<NotifyRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifies_on_success: Option<Vec<NotifyRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifies_on_failure: Option<Vec<NotifyRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_execution_of: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifact_patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<TargetRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifies: Option<Vec<NotifyRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifies_on_success: Option<Vec<NotifyRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifies_on_failure: Option<Vec<NotifyRef>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    pub targets: Vec<TargetRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_on_error: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel: Option<ParallelSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<TargetRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifies: Option<Vec<NotifyRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifies_on_success: Option<Vec<NotifyRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifies_on_failure: Option<Vec<NotifyRef>>,
}

// ── Globals ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalVar {
    pub name: String,
    pub value: Value,
}

// ── Artifact policy ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    #[serde(default, skip_serializing_if = "is_false")]
    pub archive_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_name_template: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub cleanup_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention: Option<RetentionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(rename = "type")]
    pub policy: RetentionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simple: Option<SimpleRetention>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hierarchical: Option<HierarchicalRetention>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucketed: Option<BucketedRetention>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionType {
    Simple,
    Hierarchical,
    Bucketed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimpleRetention {
    pub days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HierarchicalRetention {
    pub intervals: Vec<RetentionInterval>,
}

/// Archives older than `older_than_days` are thinned to one per
/// `keep_one_per_days` window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionInterval {
    pub older_than_days: u32,
    pub keep_one_per_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketedRetention {
    pub buckets: Vec<RetentionBucket>,
}

/// Keep the `keep` newest archives no older than `max_age_days`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionBucket {
    pub max_age_days: u32,
    pub keep: usize,
}

// ── Top-level config ──

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub platforms: Vec<PlatformConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<TaskConfig>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub build_groups: BTreeMap<String, GroupConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_target: Option<String>,
    /// Project-wide default for groups that don't set their own.
    #[serde(default, skip_serializing_if = "is_false")]
    pub continue_on_error: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub validate_on_build: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub global_vars: Vec<GlobalVar>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_from_globals: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub configurations: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<ArtifactsConfig>,
}

impl BuildConfig {
    pub fn task(&self, name: &str) -> Option<&TaskConfig> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn platform(&self, name: &str) -> Option<&PlatformConfig> {
        self.platforms.iter().find(|p| p.name == name)
    }

    pub fn group(&self, name: &str) -> Option<&GroupConfig> {
        self.build_groups.get(name)
    }

    pub fn has_target(&self, name: &str) -> bool {
        self.task(name).is_some() || self.platform(name).is_some() || self.group(name).is_some()
    }

    /// Scalar lookup into `configurations`, falling back to `default`.
    pub fn get_config_value(&self, key: &str, default: &str) -> String {
        match self.configurations.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Bool(b)) => b.to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => default.to_string(),
        }
    }

    /// The globals pool: explicit `global_vars` entries plus the
    /// `configurations` mapping, minus `exclude_from_globals` keys.
    pub fn globals_pool(&self) -> BTreeMap<String, Value> {
        let excluded: HashSet<&str> = self.exclude_from_globals.iter().map(|s| s.as_str()).collect();
        let mut pool = BTreeMap::new();
        for (k, v) in &self.configurations {
            if !excluded.contains(k.as_str()) {
                pool.insert(k.clone(), v.clone());
            }
        }
        for var in &self.global_vars {
            if !excluded.contains(var.name.as_str()) {
                pool.insert(var.name.clone(), var.value.clone());
            }
        }
        pool
    }

    /// Validate the configuration. Returns all errors found; an empty list
    /// means the config is usable.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // C1: names must be unique across tasks, platforms, and groups.
        let mut seen: HashSet<&str> = HashSet::new();
        let all_names = self
            .tasks
            .iter()
            .map(|t| t.name.as_str())
            .chain(self.platforms.iter().map(|p| p.name.as_str()))
            .chain(self.build_groups.keys().map(|k| k.as_str()));
        for name in all_names {
            if !seen.insert(name) {
                errors.push(ValidationError::new(
                    "C1",
                    format!("duplicate target name: {name}"),
                ));
            }
        }

        // C2: names must be non-empty.
        for name in self
            .tasks
            .iter()
            .map(|t| t.name.as_str())
            .chain(self.platforms.iter().map(|p| p.name.as_str()))
            .chain(self.build_groups.keys().map(|k| k.as_str()))
        {
            if name.is_empty() {
                errors.push(ValidationError::new("C2", "empty target name".to_string()));
            }
        }

        // C3: declared-but-empty arrays.
        for task in &self.tasks {
            self.check_arrays(&task.name, &task.dependencies, &task.notifies, &task.notifies_on_success, &task.notifies_on_failure, &mut errors);
        }
        for platform in &self.platforms {
            self.check_arrays(&platform.name, &platform.dependencies, &platform.notifies, &platform.notifies_on_success, &platform.notifies_on_failure, &mut errors);
        }
        for (name, group) in &self.build_groups {
            self.check_arrays(name, &group.dependencies, &group.notifies, &group.notifies_on_success, &group.notifies_on_failure, &mut errors);
            if group.targets.is_empty() {
                errors.push(ValidationError::new(
                    "C3",
                    format!("build group '{name}' has an empty targets list"),
                ));
            }
        }

        // C4: every reference must resolve to a declared target.
        let check_ref = |owner: &str, kind: &str, target: &str, errors: &mut Vec<ValidationError>| {
            if !self.has_target(target) {
                errors.push(ValidationError::new(
                    "C4",
                    format!("'{owner}' references unknown {kind} target: {target}"),
                ));
            }
        };
        for task in &self.tasks {
            for r in refs(&task.dependencies) {
                check_ref(&task.name, "dependency", r, &mut errors);
            }
            for r in notify_names(&task.notifies)
                .chain(notify_names(&task.notifies_on_success))
                .chain(notify_names(&task.notifies_on_failure))
            {
                check_ref(&task.name, "notification", r, &mut errors);
            }
            for r in task.requires_execution_of.iter().flatten() {
                check_ref(&task.name, "required-execution", r, &mut errors);
            }
        }
        for platform in &self.platforms {
            for r in refs(&platform.dependencies) {
                check_ref(&platform.name, "dependency", r, &mut errors);
            }
            for r in notify_names(&platform.notifies)
                .chain(notify_names(&platform.notifies_on_success))
                .chain(notify_names(&platform.notifies_on_failure))
            {
                check_ref(&platform.name, "notification", r, &mut errors);
            }
        }
        for (name, group) in &self.build_groups {
            for target in &group.targets {
                check_ref(name, "child", target.name(), &mut errors);
                if let TargetRef::Spec(spec) = target {
                    for r in notify_names(&spec.notifies)
                        .chain(notify_names(&spec.notify_on_success))
                        .chain(notify_names(&spec.notify_on_failure))
                    {
                        check_ref(name, "notification", r, &mut errors);
                    }
                    for r in spec.requires_execution_of.iter().flatten() {
                        check_ref(name, "required-execution", r, &mut errors);
                    }
                }
            }
            for r in refs(&group.dependencies) {
                check_ref(name, "dependency", r, &mut errors);
            }
            for r in notify_names(&group.notifies)
                .chain(notify_names(&group.notifies_on_success))
                .chain(notify_names(&group.notifies_on_failure))
            {
                check_ref(name, "notification", r, &mut errors);
            }
        }

        // C5: default_target must exist.
        if let Some(default) = &self.default_target {
            if !self.has_target(default) {
                errors.push(ValidationError::new(
                    "C5",
                    format!("default_target '{default}' is not declared"),
                ));
            }
        }

        // C6: tasks need a command, platforms a build_command.
        for task in &self.tasks {
            if task.command.as_deref().map_or(true, |c| c.trim().is_empty()) {
                errors.push(ValidationError::new(
                    "C6",
                    format!("task '{}' has no command", task.name),
                ));
            }
        }
        for platform in &self.platforms {
            if platform
                .build_command
                .as_deref()
                .map_or(true, |c| c.trim().is_empty())
            {
                errors.push(ValidationError::new(
                    "C6",
                    format!("platform '{}' has no build_command", platform.name),
                ));
            }
        }

        // C7: retention policy type must match the sub-map provided.
        if let Some(retention) = self.artifacts.as_ref().and_then(|a| a.retention.as_ref()) {
            let ok = match retention.policy {
                RetentionType::Simple => retention.simple.is_some(),
                RetentionType::Hierarchical => retention.hierarchical.is_some(),
                RetentionType::Bucketed => retention.bucketed.is_some(),
            };
            if !ok {
                errors.push(ValidationError::new(
                    "C7",
                    "retention type names a policy with no matching settings block".to_string(),
                ));
            }
        }

        errors
    }

    #[allow(clippy::too_many_arguments)]
    fn check_arrays(
        &self,
        owner: &str,
        dependencies: &Option<Vec<TargetRef>>,
        notifies: &Option<Vec<NotifyRef>>,
        on_success: &Option<Vec<NotifyRef>>,
        on_failure: &Option<Vec<NotifyRef>>,
        errors: &mut Vec<ValidationError>,
    ) {
        let empty_dep = dependencies.as_ref().is_some_and(|v| v.is_empty());
        if empty_dep {
            errors.push(ValidationError::new(
                "C3",
                format!("'{owner}' declares an empty dependencies array"),
            ));
        }
        for (field, list) in [
            ("notifies", notifies),
            ("notifies_on_success", on_success),
            ("notifies_on_failure", on_failure),
        ] {
            if list.as_ref().is_some_and(|v| v.is_empty()) {
                errors.push(ValidationError::new(
                    "C3",
                    format!("'{owner}' declares an empty {field} array"),
                ));
            }
        }
    }
}

fn refs(list: &Option<Vec<TargetRef>>) -> impl Iterator<Item = &str> {
    list.iter().flatten().map(|r| r.name())
}

fn notify_names(list: &Option<Vec<NotifyRef>>) -> impl Iterator<Item = &str> {
    list.iter().flatten().map(|r| r.name())
}

// ── Validation errors ──

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub rule: String,
    pub message: String,
}

impl ValidationError {
    fn new(rule: &str, message: impl Into<String>) -> Self {
        Self {
            rule: rule.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.rule, self.message)
    }
}

// ── Parsing ──

/// Parse a YAML string into a BuildConfig. Validation is separate — call
/// `BuildConfig::validate()` before building the graph.
pub fn parse_config_yaml(yaml_str: &str) -> Result<BuildConfig> {
    let config: BuildConfig =
        serde_yaml::from_str(yaml_str).context("failed to parse build configuration")?;
    Ok(config)
}

/// A small but complete starting configuration for `--generate-sample-config`.
pub fn sample_config() -> String {
    r#"# buildflow sample configuration
default_target: all

tasks:
  - name: fetch_sources
    command: "git pull --ff-only"
    always_run: true
  - name: unit_tests
    command: "make test JOBS=${jobs}"
    dependencies: [fetch_sources]
  - name: notify_failure
    command: "./scripts/report-breakage.sh ${build_root}"

platforms:
  - name: linux_x64
    build_command: "make all ARCH=x86_64 JOBS=${jobs}"
    artifact_dir: out/linux_x64
    artifact_patterns:
      - "*.tar.gz"
    scheme: release
    dependencies: [unit_tests]
    notifies_on_failure: [notify_failure]

build_groups:
  all:
    targets:
      - linux_x64
    parallel: 2

global_vars:
  - name: jobs
    value: 8
  - name: build_root
    value: /var/lib/buildflow

configurations:
  log_retention_days: 14

artifacts:
  archive_enabled: true
  archive_format: tar.gz
  archive_name_template: "${target}_${timestamp}"
  cleanup_enabled: true
  retention:
    type: simple
    simple:
      days: 30
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sample_config() {
        let config = parse_config_yaml(&sample_config()).unwrap();
        assert_eq!(config.tasks.len(), 3);
        assert_eq!(config.platforms.len(), 1);
        assert!(config.build_groups.contains_key("all"));
        assert_eq!(config.default_target.as_deref(), Some("all"));
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_target_ref_string_or_map() {
        let yaml = r#"
tasks:
  - name: a
    command: "true"
  - name: b
    command: "true"
build_groups:
  g:
    targets:
      - a
      - name: b
        instance: second
        args:
          mode: fast
"#;
        let config = parse_config_yaml(yaml).unwrap();
        let group = config.group("g").unwrap();
        assert_eq!(group.targets[0].name(), "a");
        match &group.targets[1] {
            TargetRef::Spec(spec) => {
                assert_eq!(spec.name, "b");
                assert_eq!(spec.instance.as_deref(), Some("second"));
                assert!(spec.args.is_some());
            }
            other => panic!("expected spec form, got {other:?}"),
        }
    }

    #[test]
    fn test_parallel_bool_or_int() {
        let yaml = r#"
tasks:
  - name: a
    command: "true"
build_groups:
  g1:
    targets: [a]
    parallel: true
  g2:
    targets: [a]
    parallel: 3
  g3:
    targets: [a]
"#;
        let config = parse_config_yaml(yaml).unwrap();
        assert!(matches!(
            config.group("g1").unwrap().parallel.unwrap().to_parallelism(),
            Parallelism::Parallel
        ));
        assert!(matches!(
            config.group("g2").unwrap().parallel.unwrap().to_parallelism(),
            Parallelism::Limit(3)
        ));
        assert!(config.group("g3").unwrap().parallel.is_none());
    }

    #[test]
    fn test_validate_duplicate_names() {
        let yaml = r#"
tasks:
  - name: x
    command: "true"
platforms:
  - name: x
    build_command: "make"
"#;
        let config = parse_config_yaml(yaml).unwrap();
        let errors = config.validate();
        assert!(errors.iter().any(|e| e.rule == "C1"), "{errors:?}");
    }

    #[test]
    fn test_validate_empty_notify_array() {
        let yaml = r#"
tasks:
  - name: x
    command: "true"
    notifies: []
"#;
        let config = parse_config_yaml(yaml).unwrap();
        let errors = config.validate();
        assert!(errors.iter().any(|e| e.rule == "C3"), "{errors:?}");
    }

    #[test]
    fn test_validate_unknown_reference() {
        let yaml = r#"
tasks:
  - name: x
    command: "true"
    dependencies: [ghost]
"#;
        let config = parse_config_yaml(yaml).unwrap();
        let errors = config.validate();
        assert!(errors.iter().any(|e| e.rule == "C4"), "{errors:?}");
    }

    #[test]
    fn test_validate_task_without_command() {
        let yaml = r#"
tasks:
  - name: x
"#;
        let config = parse_config_yaml(yaml).unwrap();
        let errors = config.validate();
        assert!(errors.iter().any(|e| e.rule == "C6"), "{errors:?}");
    }

    #[test]
    fn test_validate_retention_mismatch() {
        let yaml = r#"
artifacts:
  archive_enabled: true
  retention:
    type: bucketed
    simple:
      days: 7
"#;
        let config = parse_config_yaml(yaml).unwrap();
        let errors = config.validate();
        assert!(errors.iter().any(|e| e.rule == "C7"), "{errors:?}");
    }

    #[test]
    fn test_globals_pool_respects_exclusions() {
        let yaml = r#"
global_vars:
  - name: jobs
    value: 8
  - name: secret
    value: hide-me
exclude_from_globals: [secret, log_level]
configurations:
  log_level: debug
  region: us-east-1
"#;
        let config = parse_config_yaml(yaml).unwrap();
        let pool = config.globals_pool();
        assert!(pool.contains_key("jobs"));
        assert!(pool.contains_key("region"));
        assert!(!pool.contains_key("secret"));
        assert!(!pool.contains_key("log_level"));
    }

    #[test]
    fn test_get_config_value_with_default() {
        let yaml = r#"
configurations:
  retries: 3
"#;
        let config = parse_config_yaml(yaml).unwrap();
        assert_eq!(config.get_config_value("retries", "0"), "3");
        assert_eq!(config.get_config_value("missing", "fallback"), "fallback");
    }

    #[test]
    fn test_args_from_self_recognized() {
        let yaml = r#"
tasks:
  - name: a
    command: "true"
    notifies_on_success:
      - name: b
        args_from: self
  - name: b
    command: "true"
"#;
        let config = parse_config_yaml(yaml).unwrap();
        let task = config.task("a").unwrap();
        let entry = &task.notifies_on_success.as_ref().unwrap()[0];
        assert!(entry.args_from_self());
    }
}
