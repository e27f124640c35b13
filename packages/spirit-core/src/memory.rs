//! In-memory connector.
//!
//! Serves the default `memory` datasource. Records are JSON objects keyed by
//! `_id` inside per-collection maps; nothing survives the process. Used by
//! tests and as the out-of-the-box datasource of the server binary.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context as _};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use dashmap::DashMap;
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::connector::{Connector, ModelActions};
use crate::field::FieldDescriptor;
use crate::instance::ModelInstance;
use crate::params::Parameters;
use crate::schema::{CREATED_AT_FIELD, ID_FIELD, UPDATED_AT_FIELD};
use crate::validation::{Diagnosis, Validator};

/// Datasource key served by [`MemoryConnector::new`].
pub const DEFAULT_DATASOURCE: &str = "memory";

fn now() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
}

struct StoredRecord {
    seq: u64,
    value: Map<String, Value>,
}

/// Collections of one in-memory datasource.
#[derive(Default)]
pub struct MemoryDatabase {
    collections: DashMap<String, BTreeMap<String, StoredRecord>>,
    seq: AtomicU64,
}

impl MemoryDatabase {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records stored in `collection`.
    #[must_use]
    pub fn collection_len(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, |c| c.len())
    }

    /// Drops every record of every collection.
    pub fn reset(&self) {
        self.collections.clear();
    }

    fn snapshot(&self, collection: &str) -> Vec<Map<String, Value>> {
        let Some(records) = self.collections.get(collection) else {
            return Vec::new();
        };
        let mut rows: Vec<_> = records.values().map(|r| (r.seq, r.value.clone())).collect();
        rows.sort_by_key(|(seq, _)| *seq);
        rows.into_iter().map(|(_, value)| value).collect()
    }
}

/// Connector storing records in process memory.
pub struct MemoryConnector {
    datasource: String,
    database: Arc<MemoryDatabase>,
    connected: AtomicBool,
}

impl MemoryConnector {
    /// A connector for the `memory` datasource.
    #[must_use]
    pub fn new() -> Self {
        Self::with_datasource(DEFAULT_DATASOURCE)
    }

    #[must_use]
    pub fn with_datasource(datasource: impl Into<String>) -> Self {
        Self {
            datasource: datasource.into(),
            database: Arc::new(MemoryDatabase::new()),
            connected: AtomicBool::new(false),
        }
    }

    /// Marks the datasource as connected.
    pub fn connect_sync(&self) {
        self.connected.store(true, Ordering::Release);
        debug!(datasource = %self.datasource, "memory datasource connected");
    }

    /// The database behind `datasource`, once connected.
    #[must_use]
    pub fn database(&self, datasource: &str) -> Option<Arc<MemoryDatabase>> {
        (datasource == self.datasource && self.connected.load(Ordering::Acquire))
            .then(|| Arc::clone(&self.database))
    }

    /// Clears all stored records.
    pub fn reset(&self) {
        self.database.reset();
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    fn datasource(&self) -> &str {
        &self.datasource
    }

    async fn connect(&self, datasource: &str) -> anyhow::Result<()> {
        if datasource != self.datasource {
            bail!(
                "memory connector serves '{}', not '{datasource}'",
                self.datasource
            );
        }
        self.connect_sync();
        Ok(())
    }

    fn get_connection(&self, datasource: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.database(datasource)
            .map(|db| db as Arc<dyn Any + Send + Sync>)
    }

    fn model_actions(
        &self,
        collection: &str,
        datasource: &str,
    ) -> anyhow::Result<Arc<dyn ModelActions>> {
        let database = self
            .database(datasource)
            .with_context(|| format!("datasource '{datasource}' is not connected"))?;
        Ok(Arc::new(MemoryActions {
            database,
            collection: collection.to_string(),
        }))
    }

    fn get_validator(&self, name: &str) -> Option<Arc<dyn Validator>> {
        (name == "unique").then(|| {
            Arc::new(UniqueValidator {
                database: Arc::clone(&self.database),
            }) as Arc<dyn Validator>
        })
    }
}

/// CRUD over one collection of a [`MemoryDatabase`].
pub struct MemoryActions {
    database: Arc<MemoryDatabase>,
    collection: String,
}

#[async_trait]
impl ModelActions for MemoryActions {
    async fn query(
        &self,
        filter: &Map<String, Value>,
        _params: &Parameters,
    ) -> anyhow::Result<Vec<Value>> {
        Ok(self
            .database
            .snapshot(&self.collection)
            .into_iter()
            .filter(|record| filter.iter().all(|(k, v)| record.get(k) == Some(v)))
            .map(Value::Object)
            .collect())
    }

    async fn read(&self, id: &str, _params: &Parameters) -> anyhow::Result<Option<Value>> {
        Ok(self
            .database
            .collections
            .get(&self.collection)
            .and_then(|records| records.get(id).map(|r| Value::Object(r.value.clone()))))
    }

    async fn create(&self, item: Value, _params: &Parameters) -> anyhow::Result<Value> {
        let Value::Object(mut value) = item else {
            bail!("record for '{}' must be a JSON object", self.collection);
        };
        let id = match value.get(ID_FIELD) {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            _ => Uuid::new_v4().to_string(),
        };
        let stamp = now();
        value.insert(ID_FIELD.to_string(), Value::String(id.clone()));
        value.insert(CREATED_AT_FIELD.to_string(), stamp.clone());
        value.insert(UPDATED_AT_FIELD.to_string(), stamp);

        let mut records = self
            .database
            .collections
            .entry(self.collection.clone())
            .or_default();
        if records.contains_key(&id) {
            bail!("duplicate _id '{id}' in '{}'", self.collection);
        }
        let seq = self.database.seq.fetch_add(1, Ordering::Relaxed);
        records.insert(
            id.clone(),
            StoredRecord {
                seq,
                value: value.clone(),
            },
        );
        debug!(collection = %self.collection, id = %id, "record created");
        Ok(Value::Object(value))
    }

    async fn update(
        &self,
        id: &str,
        item: Value,
        params: &Parameters,
    ) -> anyhow::Result<Option<Value>> {
        let Value::Object(incoming) = item else {
            bail!("record for '{}' must be a JSON object", self.collection);
        };
        let Some(mut records) = self.database.collections.get_mut(&self.collection) else {
            return Ok(None);
        };
        let Some(record) = records.get_mut(id) else {
            return Ok(None);
        };

        let created_at = record.value.get(CREATED_AT_FIELD).cloned();
        let mut value = if params.delete_missing {
            incoming
        } else {
            let mut merged = record.value.clone();
            merged.extend(incoming);
            merged
        };
        value.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        if let Some(created_at) = created_at {
            value.insert(CREATED_AT_FIELD.to_string(), created_at);
        }
        value.insert(UPDATED_AT_FIELD.to_string(), now());
        record.value = value.clone();
        debug!(collection = %self.collection, id, "record updated");
        Ok(Some(Value::Object(value)))
    }

    async fn delete(&self, id: &str) -> anyhow::Result<bool> {
        let removed = self
            .database
            .collections
            .get_mut(&self.collection)
            .is_some_and(|mut records| records.remove(id).is_some());
        debug!(collection = %self.collection, id, removed, "record deleted");
        Ok(removed)
    }
}

/// Rejects a value already stored on another record of the same collection.
pub struct UniqueValidator {
    database: Arc<MemoryDatabase>,
}

impl Validator for UniqueValidator {
    fn name(&self) -> &str {
        "unique"
    }

    fn validate(&self, instance: &ModelInstance, field: &FieldDescriptor) -> bool {
        let Some(value) = instance.get(&field.name).filter(|v| !v.is_null()) else {
            return true;
        };
        let own_id = instance.id();
        let taken = self
            .database
            .collections
            .get(&instance.model())
            .is_some_and(|records| {
                records.iter().any(|(id, record)| {
                    own_id.as_deref() != Some(id.as_str())
                        && record.value.get(&field.name) == Some(&value)
                })
            });
        if taken {
            instance.add_diagnosis(Diagnosis::error(
                &field.name,
                format!("'{}' must be unique, {value} is already used", field.name),
            ));
        }
        true
    }
}
