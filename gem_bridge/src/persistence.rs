//! Equipment document persistence.
//!
//! `DocumentStore` owns the raw JSON tree of the equipment document. Updates
//! patch the tree in memory and mark it dirty; the persistence worker writes
//! the whole document back (temp file + rename) at most once per debounce
//! interval. A zero debounce writes synchronously on every update.

use crate::error::{BridgeError, BridgeResult};
use crate::supervisor::WorkerContext;
use gem_common::equipment::VariableKind;
use gem_common::value::Value;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct StoreState {
    raw: JsonValue,
    dirty: bool,
}

#[derive(Debug)]
pub struct DocumentStore {
    path: PathBuf,
    debounce: Duration,
    state: Mutex<StoreState>,
    /// Serializes writers of the file itself.
    write_lock: Mutex<()>,
}

impl DocumentStore {
    pub fn new(path: impl AsRef<Path>, raw: JsonValue, debounce: Duration) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            debounce,
            state: Mutex::new(StoreState { raw, dirty: false }),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    pub fn is_dirty(&self) -> bool {
        self.state.lock().dirty
    }

    /// Copy of the current tree.
    pub fn document(&self) -> JsonValue {
        self.state.lock().raw.clone()
    }

    /// Patch `section.name.value` for a variable.
    pub fn set_variable_value(&self, kind: VariableKind, name: &str, value: &Value) -> BridgeResult<()> {
        let json = serde_json::to_value(value).map_err(|e| BridgeError::Persistence(e.to_string()))?;
        {
            let mut state = self.state.lock();
            let entry = state
                .raw
                .get_mut(kind.section())
                .and_then(|section| section.get_mut(name))
                .and_then(JsonValue::as_object_mut)
                .ok_or_else(|| BridgeError::not_found(kind, name))?;
            entry.insert("value".to_string(), json);
            state.dirty = true;
        }
        self.schedule()
    }

    pub fn set_status_value(&self, name: &str, value: &Value) -> BridgeResult<()> {
        self.set_variable_value(VariableKind::Status, name, value)
    }

    /// Replace the `recipes` section.
    pub fn set_recipes(&self, recipes: Map<String, JsonValue>) -> BridgeResult<()> {
        {
            let mut state = self.state.lock();
            let root = state
                .raw
                .as_object_mut()
                .ok_or_else(|| BridgeError::Persistence("document root is not an object".to_string()))?;
            root.insert("recipes".to_string(), JsonValue::Object(recipes));
            state.dirty = true;
        }
        self.schedule()
    }

    fn schedule(&self) -> BridgeResult<()> {
        if self.debounce.is_zero() {
            self.flush()
        } else {
            Ok(())
        }
    }

    /// Write the document now if it has pending changes.
    pub fn flush(&self) -> BridgeResult<()> {
        let _writer = self.write_lock.lock();
        let raw = {
            let mut state = self.state.lock();
            if !state.dirty {
                return Ok(());
            }
            state.dirty = false;
            state.raw.clone()
        };
        if let Err(e) = write_document(&self.path, &raw) {
            self.state.lock().dirty = true;
            return Err(e);
        }
        debug!(path = %self.path.display(), "Equipment document written");
        Ok(())
    }

    /// Persistence worker body: flush once per debounce interval until stopped.
    pub fn run(&self, ctx: &WorkerContext) {
        let interval = if self.debounce.is_zero() {
            Duration::from_millis(500)
        } else {
            self.debounce
        };
        info!(path = %self.path.display(), debounce_ms = self.debounce.as_millis() as u64, "Persistence worker running");
        while ctx.token.sleep(interval).is_ok() {
            ctx.stats.record_poll();
            if let Err(e) = self.flush() {
                let count = ctx.stats.record_fault(&e);
                if crate::stats::should_log_fault(count) {
                    warn!(path = %self.path.display(), "Failed to persist equipment document: {e}");
                }
            }
        }
        if let Err(e) = self.flush() {
            warn!(path = %self.path.display(), "Final document flush failed: {e}");
        }
    }
}

/// Full-document rewrite through a sibling temp file.
fn write_document(path: &Path, raw: &JsonValue) -> BridgeResult<()> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    raw.serialize(&mut ser)
        .map_err(|e| BridgeError::Persistence(format!("Failed to serialize document: {e}")))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, &buf)
        .map_err(|e| BridgeError::Persistence(format!("Failed to write {}: {e}", tmp.display())))?;
    fs::rename(&tmp, path).map_err(|e| {
        BridgeError::Persistence(format!("Failed to replace {}: {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::WorkerPool;
    use serde_json::json;
    use std::sync::Arc;

    fn raw() -> JsonValue {
        json!({
            "status_variable": {"current_recipe_name": {"svid": 5, "value_type": "ASCII", "value": ""}},
            "recipes": {},
            "vendor_extra": {"kept": [1, 2, 3]}
        })
    }

    fn read(path: &Path) -> JsonValue {
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn test_synchronous_write_with_zero_debounce() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("equipment.json");
        let store = DocumentStore::new(&path, raw(), Duration::ZERO);

        store.set_status_value("current_recipe_name", &Value::from("R1")).unwrap();
        let on_disk = read(&path);
        assert_eq!(on_disk["status_variable"]["current_recipe_name"]["value"], "R1");
        assert_eq!(on_disk["vendor_extra"]["kept"], json!([1, 2, 3]));
        assert!(!store.is_dirty());
        assert!(!dir.path().join("equipment.json.tmp").exists());
    }

    #[test]
    fn test_debounced_write_waits_for_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("equipment.json");
        let store = DocumentStore::new(&path, raw(), Duration::from_secs(60));

        let mut recipes = Map::new();
        recipes.insert("7_gamma".to_string(), json!({}));
        store.set_recipes(recipes).unwrap();
        assert!(store.is_dirty());
        assert!(!path.exists());

        store.flush().unwrap();
        assert!(read(&path)["recipes"].get("7_gamma").is_some());
    }

    #[test]
    fn test_unknown_variable_rejected() {
        let store = DocumentStore::new("/unused.json", raw(), Duration::from_secs(1));
        assert!(matches!(
            store.set_status_value("missing", &Value::Int(1)),
            Err(BridgeError::VariableNotFound { .. })
        ));
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_worker_flushes_on_stop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("equipment.json");
        let store = Arc::new(DocumentStore::new(&path, raw(), Duration::from_secs(30)));
        let pool = WorkerPool::new();
        let worker_store = Arc::clone(&store);
        pool.spawn("persistence", move |ctx| worker_store.run(&ctx)).unwrap();

        store.set_status_value("current_recipe_name", &Value::from("R9")).unwrap();
        pool.stop("persistence");
        assert_eq!(read(&path)["status_variable"]["current_recipe_name"]["value"], "R9");
    }
}
