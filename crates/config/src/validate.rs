//! Configuration validation engine.
//!
//! Validates TOML, YAML and JSON configuration files against the known
//! schema, detects
//! unknown/misspelled fields, and flags values that would break windowing,
//! pruning or snapshot caps.

use std::{collections::HashMap, path::Path};

use crate::schema::MeshtraceConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "range", "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. "snapshots.max_snapshot"
    pub path: String,
    pub message: String,
}

/// Result of validating a configuration file.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<std::path::PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

// ── Schema tree for unknown-field detection ─────────────────────────────────

enum KnownKeys {
    Struct(HashMap<&'static str, KnownKeys>),
    Leaf,
}

/// Build the schema map mirroring every field in `schema.rs`.
fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Leaf, Struct};

    let leaves = |names: &[&'static str]| Struct(names.iter().map(|n| (*n, Leaf)).collect());

    Struct(HashMap::from([
        ("correlation", leaves(&["window_secs"])),
        ("identity", leaves(&["rebuild_throttle_secs", "home_key"])),
        ("registry", leaves(&["path"])),
        ("storage", leaves(&["data_dir"])),
        (
            "persistence",
            leaves(&[
                "ttl_days",
                "save_interval_secs",
                "last_messages_every",
                "sender_records_every",
                "hop_usage_every",
                "direct_links_every",
            ]),
        ),
        (
            "hops",
            leaves(&[
                "disambiguation_degrees",
                "path_debounce_secs",
                "path_retention_secs",
            ]),
        ),
        (
            "snapshots",
            leaves(&["max_snapshots", "interval_secs", "min_gap_secs", "ttl_hours"]),
        ),
        (
            "export",
            leaves(&[
                "dir",
                "interval_secs",
                "heatmap_threshold_hours",
                "nodemap_threshold_hours",
                "entity_threshold_hours",
            ]),
        ),
        ("metrics", leaves(&["enabled", "prometheus_export"])),
    ]))
}

// ── Levenshtein distance ────────────────────────────────────────────────────

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}

/// Closest candidate within `max_distance` edits, if any.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    let mut best: Option<(&'a str, usize)> = None;
    for &candidate in candidates {
        let d = levenshtein(needle, candidate);
        if d > 0 && d <= max_distance && best.as_ref().is_none_or(|(_, bd)| d < *bd) {
            best = Some((candidate, d));
        }
    }
    best.map(|(s, _)| s)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate a config file at the given path, or discover the default config
/// file location if `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => crate::loader::find_config_file(),
    };

    let Some(ref actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Info,
                category: "file-ref",
                path: String::new(),
                message: "no config file found; using defaults".into(),
            }],
            config_path: None,
        };
    };

    match std::fs::read_to_string(actual_path) {
        Ok(content) => {
            let content = crate::env_subst::substitute_env(&content);
            let ext = actual_path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("toml");
            let mut result = validate_str(&content, ext);
            result.config_path = Some(actual_path.clone());
            result
        },
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("failed to read config file: {e}"),
            }],
            config_path: Some(actual_path.clone()),
        },
    }
}

/// Validate a TOML string without touching the file system.
#[must_use]
pub fn validate_toml_str(toml_str: &str) -> ValidationResult {
    validate_str(toml_str, "toml")
}

/// Validate config text in the format named by `ext`: `toml`, `yaml`, `yml`
/// or `json`.
#[must_use]
pub fn validate_str(content: &str, ext: &str) -> ValidationResult {
    let parsed = match ext {
        "toml" => toml::from_str::<toml::Value>(content)
            .map_err(|e| format!("TOML syntax error: {e}")),
        "yaml" | "yml" => serde_yaml::from_str::<serde_json::Value>(content)
            .map_err(|e| format!("YAML syntax error: {e}"))
            .and_then(table_from_json),
        "json" => serde_json::from_str::<serde_json::Value>(content)
            .map_err(|e| format!("JSON syntax error: {e}"))
            .and_then(table_from_json),
        other => Err(format!("unsupported config format: .{other}")),
    };
    let value = match parsed {
        Ok(value) => value,
        Err(message) => {
            return ValidationResult {
                diagnostics: vec![Diagnostic {
                    severity: Severity::Error,
                    category: "syntax",
                    path: String::new(),
                    message,
                }],
                config_path: None,
            };
        },
    };

    let mut diagnostics = Vec::new();
    let schema = build_schema_map();
    check_unknown_fields(&value, &schema, "", &mut diagnostics);

    match value.try_into::<MeshtraceConfig>() {
        Ok(config) => check_ranges(&config, &mut diagnostics),
        Err(e) => diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "type-error",
            path: String::new(),
            message: format!("type error: {e}"),
        }),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

/// YAML and JSON documents are checked as the same tree TOML produces. An
/// empty document is an empty table.
fn table_from_json(value: serde_json::Value) -> Result<toml::Value, String> {
    if value.is_null() {
        return Ok(toml::Value::Table(toml::Table::new()));
    }
    toml::Value::try_from(value).map_err(|e| format!("config is not a table of settings: {e}"))
}

fn check_unknown_fields(
    value: &toml::Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let (toml::Value::Table(table), KnownKeys::Struct(fields)) = (value, schema) else {
        return;
    };
    let known_keys: Vec<&str> = fields.keys().copied().collect();
    for (key, child_value) in table {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        if let Some(child_schema) = fields.get(key.as_str()) {
            check_unknown_fields(child_value, child_schema, &path, diagnostics);
            continue;
        }
        let level = if prefix.is_empty() {
            " at top level"
        } else {
            ""
        };
        let message = match suggest(key, &known_keys, 3) {
            Some(s) => format!("unknown field{level} (did you mean \"{s}\"?)"),
            None => format!("unknown field{level}"),
        };
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "unknown-field",
            path,
            message,
        });
    }
}

fn check_ranges(config: &MeshtraceConfig, diagnostics: &mut Vec<Diagnostic>) {
    let mut push = |severity, path: &str, message: &str| {
        diagnostics.push(Diagnostic {
            severity,
            category: "range",
            path: path.into(),
            message: message.into(),
        });
    };

    if config.correlation.window_secs == 0 {
        push(
            Severity::Error,
            "correlation.window_secs",
            "window must be at least one second",
        );
    }
    if config.persistence.ttl_days == 0 {
        push(
            Severity::Error,
            "persistence.ttl_days",
            "a zero TTL prunes every record on save",
        );
    }
    for (path, every) in [
        (
            "persistence.last_messages_every",
            config.persistence.last_messages_every,
        ),
        (
            "persistence.sender_records_every",
            config.persistence.sender_records_every,
        ),
        (
            "persistence.hop_usage_every",
            config.persistence.hop_usage_every,
        ),
        (
            "persistence.direct_links_every",
            config.persistence.direct_links_every,
        ),
    ] {
        if every == 0 {
            push(
                Severity::Warning,
                path,
                "zero disables mutation-triggered saves; only periodic saves run",
            );
        }
    }
    if config.snapshots.max_snapshots == 0 {
        push(
            Severity::Error,
            "snapshots.max_snapshots",
            "history cap must be at least one",
        );
    }
    let tolerance = config.hops.disambiguation_degrees;
    if tolerance.is_nan() || tolerance <= 0.0 {
        push(
            Severity::Error,
            "hops.disambiguation_degrees",
            "tolerance must be a positive number of degrees",
        );
    }
    for (path, secs) in [
        (
            "persistence.save_interval_secs",
            config.persistence.save_interval_secs,
        ),
        ("snapshots.interval_secs", config.snapshots.interval_secs),
        ("export.interval_secs", config.export.interval_secs),
    ] {
        if secs == 0 {
            push(Severity::Error, path, "interval must be at least one second");
        }
    }
    if config.identity.home_key.as_deref().is_some_and(str::is_empty) {
        push(
            Severity::Warning,
            "identity.home_key",
            "empty home key matches every prefix",
        );
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[test]
    fn levenshtein_edits() {
        assert_eq!(levenshtein("hops", "hops"), 0);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("snapshot", "snapshots"), 1);
        assert_eq!(levenshtein("exprot", "export"), 2);
    }

    #[test]
    fn unknown_top_level_key_with_suggestion() {
        let result = validate_toml_str("snapshot = 1\n");
        let d = result
            .diagnostics
            .iter()
            .find(|d| d.category == "unknown-field" && d.path == "snapshot")
            .expect("unknown-field diagnostic");
        assert_eq!(d.severity, Severity::Error);
        assert!(d.message.contains("snapshots"), "{}", d.message);
    }

    #[test]
    fn unknown_nested_key_with_suggestion() {
        let result = validate_toml_str("[persistence]\nttl_day = 3\n");
        let d = result
            .diagnostics
            .iter()
            .find(|d| d.path == "persistence.ttl_day")
            .expect("unknown-field diagnostic");
        assert!(d.message.contains("ttl_days"));
    }

    #[test]
    fn empty_config_is_valid() {
        let result = validate_toml_str("");
        assert!(!result.has_errors(), "{:?}", result.diagnostics);
    }

    #[test]
    fn full_valid_config_no_diagnostics() {
        let toml = r#"
[correlation]
window_secs = 10

[identity]
rebuild_throttle_secs = 60
home_key = "a1b2c3"

[registry]
path = "/var/lib/meshtrace/contacts.json"

[storage]
data_dir = "/var/lib/meshtrace"

[persistence]
ttl_days = 7
save_interval_secs = 300
last_messages_every = 5
sender_records_every = 5
hop_usage_every = 10
direct_links_every = 20

[hops]
disambiguation_degrees = 0.001
path_debounce_secs = 60
path_retention_secs = 3600

[snapshots]
max_snapshots = 288
interval_secs = 300
min_gap_secs = 30
ttl_hours = 24

[export]
dir = "/var/lib/meshtrace/export"
interval_secs = 300
heatmap_threshold_hours = 168
nodemap_threshold_hours = 12
entity_threshold_hours = 12

[metrics]
enabled = true
prometheus_export = true
"#;
        let result = validate_toml_str(toml);
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    }

    #[test]
    fn syntax_error_detected() {
        let result = validate_toml_str("[[[ nope");
        assert!(result.has_errors());
        assert!(result.diagnostics.iter().any(|d| d.category == "syntax"));
    }

    #[test]
    fn type_error_detected() {
        let result = validate_toml_str("[snapshots]\nmax_snapshots = \"lots\"\n");
        assert!(result.diagnostics.iter().any(|d| d.category == "type-error"));
    }

    #[test]
    fn out_of_range_values_reported() {
        let toml = r#"
[correlation]
window_secs = 0

[persistence]
hop_usage_every = 0

[hops]
disambiguation_degrees = -1.0
"#;
        let result = validate_toml_str(toml);
        assert!(result.has_errors());
        assert_eq!(result.count(Severity::Error), 2);
        assert_eq!(result.count(Severity::Warning), 1);
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.path == "persistence.hop_usage_every")
        );
    }

    #[test]
    fn yaml_is_checked_as_yaml() {
        let yaml = "snapshots:\n  max_snapshots: 12\nhops:\n  path_debounce_secs: 5\n";
        let result = validate_str(yaml, "yaml");
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);

        let result = validate_str("persistence:\n  ttl_day: 3\n", "yml");
        assert!(result.diagnostics.iter().any(|d| d.path == "persistence.ttl_day"));
    }

    #[test]
    fn json_is_checked_as_json() {
        let result = validate_str(r#"{"export": {"interval_secs": 60}}"#, "json");
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);

        let result = validate_str(r#"{"exprot": {}}"#, "json");
        let d = result
            .diagnostics
            .iter()
            .find(|d| d.category == "unknown-field")
            .expect("unknown-field diagnostic");
        assert!(d.message.contains("export"), "{}", d.message);

        let result = validate_str("{ nope", "json");
        assert!(result.diagnostics.iter().any(|d| d.category == "syntax"));
    }

    #[test]
    fn unsupported_extension_is_an_error() {
        let result = validate_str("x = 1", "ini");
        assert!(result.has_errors());
        assert!(result.diagnostics[0].message.contains(".ini"));
    }

    #[rstest]
    #[case("meshtrace.yaml", "correlation:\n  window_secs: 0\n")]
    #[case("meshtrace.json", r#"{"correlation": {"window_secs": 0}}"#)]
    fn validate_reads_file_by_extension(#[case] name: &str, #[case] content: &str) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        let result = validate(Some(&path));
        assert!(
            result.diagnostics.iter().all(|d| d.category != "syntax"),
            "{:?}",
            result.diagnostics
        );
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.path == "correlation.window_secs")
        );
    }

    #[test]
    fn validate_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meshtrace.toml");
        std::fs::write(&path, "[export]\nintervl_secs = 5\n").unwrap();
        let result = validate(Some(&path));
        assert_eq!(result.config_path.as_deref(), Some(path.as_path()));
        assert!(result.has_errors());
    }
}
