//! Persistence trait for named JSON documents.

use serde_json::Value;

use crate::Result;

/// Backend for named JSON documents.
///
/// `load` returns `Ok(None)` when the document has never been written.
pub trait DocumentStore: Send + Sync {
    fn load(&self, name: &str) -> Result<Option<Value>>;
    fn save(&self, name: &str, document: &Value) -> Result<()>;
}
