//! Where export documents go.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use {serde_json::Value, tracing::debug};

use crate::{Error, Result, error::Context};

/// Destination for periodic summaries. Writes are best-effort: the engine
/// logs a failed write and moves on to the next export.
pub trait ExportSink: Send + Sync {
    /// Write `document` as the export called `name`.
    fn write_json(&self, name: &str, document: &Value) -> Result<()>;

    /// Write a plain-text artifact, such as rendered metrics.
    fn write_text(&self, file_name: &str, text: &str) -> Result<()>;
}

/// Writes `<dir>/<name>.json`, replacing the previous file atomically.
pub struct FileExportSink {
    dir: PathBuf,
}

impl FileExportSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_atomic(&self, file_name: &str, bytes: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let path = self.dir.join(file_name);
        let tmp = self.dir.join(format!(".{file_name}.tmp"));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        debug!(path = %path.display(), bytes = bytes.len(), "export written");
        Ok(())
    }
}

impl ExportSink for FileExportSink {
    fn write_json(&self, name: &str, document: &Value) -> Result<()> {
        let json = serde_json::to_string_pretty(document)?;
        self.write_atomic(&format!("{name}.json"), json.as_bytes())
    }

    fn write_text(&self, file_name: &str, text: &str) -> Result<()> {
        self.write_atomic(file_name, text.as_bytes())
    }
}

/// Keeps exports in memory.
#[derive(Default)]
pub struct InMemoryExportSink {
    documents: Mutex<BTreeMap<String, Value>>,
    texts: Mutex<BTreeMap<String, String>>,
    fail: AtomicBool,
}

impl InMemoryExportSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following write fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn document(&self, name: &str) -> Option<Value> {
        let documents = self.documents.lock().unwrap_or_else(|e| e.into_inner());
        documents.get(name).cloned()
    }

    pub fn text(&self, file_name: &str) -> Option<String> {
        let texts = self.texts.lock().unwrap_or_else(|e| e.into_inner());
        texts.get(file_name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let documents = self.documents.lock().unwrap_or_else(|e| e.into_inner());
        documents.keys().cloned().collect()
    }

    fn check(&self, name: &str) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::export(name, "sink refused the write"));
        }
        Ok(())
    }
}

impl ExportSink for InMemoryExportSink {
    fn write_json(&self, name: &str, document: &Value) -> Result<()> {
        self.check(name)?;
        let mut documents = self.documents.lock().unwrap_or_else(|e| e.into_inner());
        documents.insert(name.to_string(), document.clone());
        Ok(())
    }

    fn write_text(&self, file_name: &str, text: &str) -> Result<()> {
        self.check(file_name)?;
        let mut texts = self.texts.lock().unwrap_or_else(|e| e.into_inner());
        texts.insert(file_name.to_string(), text.to_string());
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json, tempfile::TempDir};

    #[test]
    fn file_sink_replaces_previous_export() {
        let tmp = TempDir::new().unwrap();
        let sink = FileExportSink::new(tmp.path().join("export"));
        sink.write_json("heatmap", &json!({"node_count": 1})).unwrap();
        sink.write_json("heatmap", &json!({"node_count": 2})).unwrap();

        let written = fs::read_to_string(sink.dir().join("heatmap.json")).unwrap();
        let value: Value = serde_json::from_str(&written).unwrap();
        assert_eq!(value["node_count"], 2);
        assert!(!sink.dir().join(".heatmap.json.tmp").exists());
    }

    #[test]
    fn memory_sink_can_refuse_writes() {
        let sink = InMemoryExportSink::new();
        sink.fail_writes(true);
        assert!(matches!(
            sink.write_json("nodemap", &json!({})),
            Err(Error::Export { .. })
        ));
        sink.fail_writes(false);
        sink.write_text("metrics.prom", "# empty\n").unwrap();
        assert_eq!(sink.text("metrics.prom").as_deref(), Some("# empty\n"));
    }
}
