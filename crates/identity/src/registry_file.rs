//! JSON file-backed registry with atomic writes.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use {
    meshtrace_common::NodeIdentity,
    serde_json::{Map, Value},
    tracing::{debug, info},
};

use crate::{
    Result,
    error::Context,
    registry::{NodeRegistry, apply_attributes, normalize_key},
};

/// Registry persisted as a JSON array of nodes.
///
/// The file is read once at open and on [`NodeRegistry::reload`]. Every
/// upsert rewrites it, so batches go through [`NodeRegistry::upsert_many`].
pub struct FileRegistry {
    path: PathBuf,
    nodes: Mutex<BTreeMap<String, NodeIdentity>>,
}

impl FileRegistry {
    /// Open the registry at `path`. A missing file is an empty registry.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let nodes = read_nodes(&path)?;
        info!(path = %path.display(), nodes = nodes.len(), "opened node registry");
        Ok(Self {
            path,
            nodes: Mutex::new(nodes),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomic write: write to temp, keep `.bak`, rename over target.
    fn atomic_write(&self, nodes: &BTreeMap<String, NodeIdentity>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let list: Vec<&NodeIdentity> = nodes.values().collect();
        let json = serde_json::to_string_pretty(&list)?;
        let tmp = self.path.with_extension("json.tmp");

        fs::write(&tmp, json.as_bytes())?;

        if self.path.exists() {
            let bak = self.path.with_extension("json.bak");
            let _ = fs::rename(&self.path, &bak);
        }

        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn read_nodes(path: &Path) -> Result<BTreeMap<String, NodeIdentity>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let data = fs::read_to_string(path)?;
    let list: Vec<NodeIdentity> = serde_json::from_str(&data)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(list
        .into_iter()
        .map(|mut node| {
            node.key = node.key.to_lowercase();
            (node.key.clone(), node)
        })
        .collect())
}

impl NodeRegistry for FileRegistry {
    fn get(&self, key: &str) -> Option<NodeIdentity> {
        let nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        nodes.get(&key.to_lowercase()).cloned()
    }

    fn list(&self) -> Vec<NodeIdentity> {
        let nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        nodes.values().cloned().collect()
    }

    fn upsert(&self, key: &str, attrs: Map<String, Value>) -> Result<NodeIdentity> {
        let key = normalize_key(key)?;
        let mut nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        let node = nodes
            .entry(key.clone())
            .or_insert_with(|| NodeIdentity::new(key.clone(), key));
        apply_attributes(node, attrs);
        let updated = node.clone();
        self.atomic_write(&nodes)?;
        debug!(key = %updated.key, name = %updated.name, "registry node upserted");
        Ok(updated)
    }

    fn upsert_many(&self, updates: Vec<(String, Map<String, Value>)>) -> Result<usize> {
        if updates.is_empty() {
            return Ok(0);
        }
        let updates = updates
            .into_iter()
            .map(|(key, attrs)| Ok((normalize_key(&key)?, attrs)))
            .collect::<Result<Vec<_>>>()?;
        let mut nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        for (key, attrs) in &updates {
            let node = nodes
                .entry(key.clone())
                .or_insert_with(|| NodeIdentity::new(key.clone(), key.clone()));
            apply_attributes(node, attrs.clone());
        }
        self.atomic_write(&nodes)?;
        debug!(nodes = updates.len(), "registry nodes upserted");
        Ok(updates.len())
    }

    fn reload(&self) -> Result<usize> {
        let fresh = read_nodes(&self.path)?;
        let count = fresh.len();
        *self.nodes.lock().unwrap_or_else(|e| e.into_inner()) = fresh;
        Ok(count)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json, tempfile::TempDir};

    fn attrs(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let registry = FileRegistry::open(tmp.path().join("contacts.json")).unwrap();
        assert!(registry.list().is_empty());
    }

    #[test]
    fn upsert_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("contacts.json");
        let registry = FileRegistry::open(&path).unwrap();
        registry
            .upsert("a1b2c3", attrs(json!({"name": "Hilltop", "lat": 51.5, "lon": -0.1})))
            .unwrap();

        let reopened = FileRegistry::open(&path).unwrap();
        let node = reopened.get("A1B2C3").unwrap();
        assert_eq!(node.name, "Hilltop");
        assert!(node.coordinate.is_some());
    }

    #[test]
    fn backup_created_on_second_write() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("contacts.json");
        let registry = FileRegistry::open(&path).unwrap();
        registry.upsert("a1", attrs(json!({"name": "One"}))).unwrap();
        registry.upsert("b2", attrs(json!({"name": "Two"}))).unwrap();
        assert!(tmp.path().join("contacts.json.bak").exists());
    }

    #[test]
    fn batched_upserts_write_once() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("contacts.json");
        let registry = FileRegistry::open(&path).unwrap();
        let updated = registry
            .upsert_many(vec![
                ("A1".into(), attrs(json!({"name": "One"}))),
                ("b2".into(), attrs(json!({"name": "Two", "last_message": 7}))),
            ])
            .unwrap();
        assert_eq!(updated, 2);
        // A single write leaves no previous file behind.
        assert!(!tmp.path().join("contacts.json.bak").exists());

        let reopened = FileRegistry::open(&path).unwrap();
        assert_eq!(reopened.get("a1").unwrap().name, "One");
        assert_eq!(reopened.get("b2").unwrap().attributes["last_message"], 7);
    }

    #[test]
    fn batch_with_a_bad_key_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("contacts.json");
        let registry = FileRegistry::open(&path).unwrap();
        assert!(
            registry
                .upsert_many(vec![
                    ("a1".into(), attrs(json!({"name": "One"}))),
                    ("relay".into(), attrs(json!({}))),
                ])
                .is_err()
        );
        assert!(!path.exists());
        assert!(registry.get("a1").is_none());
        assert_eq!(registry.upsert_many(Vec::new()).unwrap(), 0);
    }

    #[test]
    fn reload_picks_up_external_edits() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("contacts.json");
        let registry = FileRegistry::open(&path).unwrap();
        fs::write(&path, r#"[{"key": "C3D4", "name": "Valley"}]"#).unwrap();

        assert_eq!(registry.reload().unwrap(), 1);
        assert_eq!(registry.get("c3d4").unwrap().name, "Valley");
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("contacts.json");
        fs::write(&path, "not json").unwrap();
        let err = FileRegistry::open(&path).err().unwrap();
        assert!(err.to_string().contains("failed to parse"));
    }
}
