//! In-memory document store for tests.

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use serde_json::Value;

use crate::{Error, Result, store::DocumentStore};

/// Store backed by a `HashMap`. Saves can be made to fail to exercise
/// error paths.
pub struct InMemoryDocumentStore {
    documents: Mutex<HashMap<String, Value>>,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            documents: Mutex::new(HashMap::new()),
            fail_saves: AtomicBool::new(false),
            saves: AtomicUsize::new(0),
        }
    }

    /// Make subsequent saves fail (or succeed again).
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Seed or overwrite a document directly.
    pub fn insert(&self, name: &str, document: Value) {
        let mut documents = self.documents.lock().unwrap_or_else(|e| e.into_inner());
        documents.insert(name.to_string(), document);
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        let documents = self.documents.lock().unwrap_or_else(|e| e.into_inner());
        documents.get(name).cloned()
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn load(&self, name: &str) -> Result<Option<Value>> {
        Ok(self.get(name))
    }

    fn save(&self, name: &str, document: &Value) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(Error::message(format!("save of {name} refused")));
        }
        self.insert(name, document.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
