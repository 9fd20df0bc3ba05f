//! JSON file-backed document store with atomic writes.

use std::{
    fs,
    path::{Path, PathBuf},
};

use {serde_json::Value, tracing::debug};

use crate::{Result, error::Context, store::DocumentStore};

/// One `<name>.json` file per document under a base directory.
pub struct FileDocumentStore {
    dir: PathBuf,
}

impl FileDocumentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    /// Atomic write: write to temp, keep `.bak`, rename over target.
    fn atomic_write(&self, path: &Path, json: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let tmp = path.with_extension("json.tmp");

        fs::write(&tmp, json.as_bytes())?;

        if path.exists() {
            let bak = path.with_extension("json.bak");
            let _ = fs::rename(path, &bak);
        }

        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl DocumentStore for FileDocumentStore {
    fn load(&self, name: &str) -> Result<Option<Value>> {
        let path = self.path(name);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&path)?;
        let value = serde_json::from_str(&data)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(Some(value))
    }

    fn save(&self, name: &str, document: &Value) -> Result<()> {
        let path = self.path(name);
        let json = serde_json::to_string_pretty(document)?;
        self.atomic_write(&path, &json)?;
        debug!(path = %path.display(), bytes = json.len(), "document written");
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json, tempfile::TempDir};

    #[test]
    fn missing_document_is_none() {
        let tmp = TempDir::new().unwrap();
        let store = FileDocumentStore::new(tmp.path());
        assert!(store.load("hop_nodes").unwrap().is_none());
    }

    #[test]
    fn save_creates_dir_and_backup() {
        let tmp = TempDir::new().unwrap();
        let store = FileDocumentStore::new(tmp.path().join("state"));

        store.save("hop_nodes", &json!({"count": 1})).unwrap();
        store.save("hop_nodes", &json!({"count": 2})).unwrap();

        assert_eq!(store.load("hop_nodes").unwrap(), Some(json!({"count": 2})));
        let bak = tmp.path().join("state").join("hop_nodes.json.bak");
        let previous: Value = serde_json::from_str(&fs::read_to_string(bak).unwrap()).unwrap();
        assert_eq!(previous, json!({"count": 1}));
    }

    #[test]
    fn corrupt_document_is_an_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("direct_links.json"), "{oops").unwrap();
        let store = FileDocumentStore::new(tmp.path());
        let err = store.load("direct_links").unwrap_err();
        assert!(err.to_string().contains("failed to parse"));
    }
}
