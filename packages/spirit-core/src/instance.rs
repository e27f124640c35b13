//! Model instances.
//!
//! A [`ModelInstance`] is a shared handle to a JSON object tagged with the
//! collection name of the model that created it. Cloning the handle does not
//! copy the data, so identity survives being passed around (see
//! [`ModelInstance::ptr_eq`]).

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::schema::ID_FIELD;
use crate::validation::{Diagnosis, Severity};

struct InstanceState {
    model: String,
    values: Map<String, Value>,
    diagnoses: Vec<Diagnosis>,
}

/// Shared handle to one model instance.
#[derive(Clone)]
pub struct ModelInstance {
    inner: Arc<RwLock<InstanceState>>,
}

impl ModelInstance {
    /// Creates an empty instance of the given model.
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self::with_values(model, Map::new())
    }

    /// Creates an instance holding `values` as-is.
    #[must_use]
    pub fn with_values(model: impl Into<String>, values: Map<String, Value>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(InstanceState {
                model: model.into(),
                values,
                diagnoses: Vec::new(),
            })),
        }
    }

    /// Collection name of the model this instance belongs to.
    #[must_use]
    pub fn model(&self) -> String {
        self.inner.read().model.clone()
    }

    /// Returns `true` if this instance was created for `model`.
    #[must_use]
    pub fn is_instance_of(&self, model: &str) -> bool {
        self.inner.read().model == model
    }

    /// Returns `true` if both handles point at the same instance.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The `_id` value, when set to a string.
    #[must_use]
    pub fn id(&self) -> Option<String> {
        self.inner
            .read()
            .values
            .get(ID_FIELD)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.read().values.get(key).cloned()
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.inner.read().values.contains_key(key)
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.inner.write().values.insert(key.into(), value);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.write().values.remove(key)
    }

    /// Replaces all values at once.
    pub fn replace_values(&self, values: Map<String, Value>) {
        self.inner.write().values = values;
    }

    /// Snapshot of the current values.
    #[must_use]
    pub fn values(&self) -> Map<String, Value> {
        self.inner.read().values.clone()
    }

    /// Snapshot of the current values as a JSON object.
    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Object(self.values())
    }

    pub fn add_diagnosis(&self, diagnosis: Diagnosis) {
        self.inner.write().diagnoses.push(diagnosis);
    }

    #[must_use]
    pub fn diagnoses(&self) -> Vec<Diagnosis> {
        self.inner.read().diagnoses.clone()
    }

    /// Returns `true` if any accumulated diagnosis has error severity.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.inner
            .read()
            .diagnoses
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    pub fn clear_diagnoses(&self) {
        self.inner.write().diagnoses.clear();
    }
}

impl fmt::Debug for ModelInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.read();
        f.debug_struct("ModelInstance")
            .field("model", &state.model)
            .field("values", &state.values)
            .field("diagnoses", &state.diagnoses.len())
            .finish()
    }
}
