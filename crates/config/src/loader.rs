use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::MeshtraceConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "meshtrace.toml",
    "meshtrace.yaml",
    "meshtrace.yml",
    "meshtrace.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<MeshtraceConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./meshtrace.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/meshtrace/meshtrace.{toml,yaml,yml,json}` (user-global)
///
/// Returns `MeshtraceConfig::default()` if no config file is found.
pub fn discover_and_load() -> MeshtraceConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    MeshtraceConfig::default()
}

/// Find the first config file in standard locations.
pub(crate) fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    if let Some(dir) = config_dir() {
        for name in CONFIG_FILENAMES {
            let p = dir.join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }

    None
}

/// Returns the user-global config directory (`~/.config/meshtrace/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "meshtrace").map(|d| d.config_dir().to_path_buf())
}

/// Returns the platform data directory (`~/.local/share/meshtrace/`).
pub fn default_data_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "meshtrace").map(|d| d.data_dir().to_path_buf())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<MeshtraceConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_each_format() {
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("meshtrace.toml");
        std::fs::write(&toml_path, "[hops]\npath_debounce_secs = 5\n").unwrap();
        assert_eq!(load_config(&toml_path).unwrap().hops.path_debounce_secs, 5);

        let yaml_path = dir.path().join("meshtrace.yaml");
        std::fs::write(&yaml_path, "snapshots:\n  max_snapshots: 12\n").unwrap();
        assert_eq!(load_config(&yaml_path).unwrap().snapshots.max_snapshots, 12);

        let json_path = dir.path().join("meshtrace.json");
        std::fs::write(&json_path, r#"{"correlation": {"window_secs": 4}}"#).unwrap();
        assert_eq!(load_config(&json_path).unwrap().correlation.window_secs, 4);
    }

    #[test]
    fn rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meshtrace.ini");
        std::fs::write(&path, "").unwrap();
        assert!(load_config(&path).is_err());
    }
}
