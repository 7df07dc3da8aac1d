//! Recipe registry.
//!
//! Recipes are stored under the composite key `"{id}_{name}"` with an
//! arbitrary metadata object. The registry is the in-memory owner; the
//! document store receives a copy after every change.

use parking_lot::RwLock;
use serde_json::{Map, Value as JsonValue};
use tracing::info;

#[derive(Debug, Default)]
pub struct RecipeRegistry {
    recipes: RwLock<Map<String, JsonValue>>,
}

/// Build the composite key for a recipe.
pub fn recipe_key(id: &str, name: &str) -> String {
    format!("{id}_{name}")
}

impl RecipeRegistry {
    pub fn new(recipes: Map<String, JsonValue>) -> Self {
        Self {
            recipes: RwLock::new(recipes),
        }
    }

    /// Insert a recipe under its composite key.
    ///
    /// Other recipes, including ones sharing the id, are kept. Returns the
    /// composite key.
    pub fn insert(&self, id: &str, name: &str) -> String {
        self.save(id, name, |_| ()).0
    }

    /// Insert a recipe and hand the resulting table to `persist` while the
    /// write lock is still held, so concurrent saves persist in the order
    /// they were applied.
    pub fn save<R>(&self, id: &str, name: &str, persist: impl FnOnce(&Map<String, JsonValue>) -> R) -> (String, R) {
        let key = recipe_key(id, name);
        let mut recipes = self.recipes.write();
        let existed = recipes
            .insert(key.clone(), JsonValue::Object(Map::new()))
            .is_some();
        info!(recipe = %key, existed, total = recipes.len(), "Recipe saved");
        let result = persist(&recipes);
        (key, result)
    }

    /// First key containing `name`; empty names never match.
    pub fn find_by_name(&self, name: &str) -> Option<String> {
        if name.is_empty() {
            return None;
        }
        self.recipes
            .read()
            .keys()
            .find(|key| key.contains(name))
            .cloned()
    }

    /// Recipe names: the part of each key after the first `_`.
    ///
    /// Names may contain `_` themselves (`2_thin_film` lists as `thin_film`).
    pub fn names(&self) -> Vec<String> {
        self.recipes
            .read()
            .keys()
            .map(|key| key.split_once('_').map_or(key.as_str(), |(_, name)| name).to_string())
            .collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.recipes.read().contains_key(key)
    }

    pub fn snapshot(&self) -> Map<String, JsonValue> {
        self.recipes.read().clone()
    }

    pub fn len(&self) -> usize {
        self.recipes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.read().is_empty()
    }
}
