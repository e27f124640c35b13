//! Persistence connector seam.
//!
//! A [`Connector`] serves one datasource key. It hands out per-model
//! [`ModelActions`] (the CRUD surface the factory delegates to) and may
//! contribute validators for metadata tags it understands, such as `unique`.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};

use crate::controller::ModelController;
use crate::helper::ModelHelper;
use crate::params::Parameters;
use crate::validation::Validator;

/// Per-model datastore operations.
#[async_trait]
pub trait ModelActions: Send + Sync {
    /// Returns every record matching the equality `filter`.
    async fn query(&self, filter: &Map<String, Value>, params: &Parameters)
        -> anyhow::Result<Vec<Value>>;

    /// Reads one record by `_id`.
    async fn read(&self, id: &str, params: &Parameters) -> anyhow::Result<Option<Value>>;

    /// Inserts a record, assigning `_id` and timestamps. Returns the stored record.
    async fn create(&self, item: Value, params: &Parameters) -> anyhow::Result<Value>;

    /// Updates a record. Returns `None` when no record has this `_id`.
    async fn update(&self, id: &str, item: Value, params: &Parameters)
        -> anyhow::Result<Option<Value>>;

    /// Deletes a record. Returns `false` when no record has this `_id`.
    async fn delete(&self, id: &str) -> anyhow::Result<bool>;
}

/// A datastore backend registered under a datasource key.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Datasource key models refer to in their `datasource` option.
    fn datasource(&self) -> &str;

    /// Opens the connection for `datasource`.
    async fn connect(&self, datasource: &str) -> anyhow::Result<()>;

    /// The connection handle for `datasource`, if connected.
    fn get_connection(&self, datasource: &str) -> Option<Arc<dyn Any + Send + Sync>>;

    /// Builds the actions serving `collection`.
    ///
    /// # Errors
    ///
    /// Fails when the connector cannot serve the collection (e.g. not connected).
    fn model_actions(&self, collection: &str, datasource: &str)
        -> anyhow::Result<Arc<dyn ModelActions>>;

    /// Validator the connector provides for the metadata tag `name`.
    fn get_validator(&self, name: &str) -> Option<Arc<dyn Validator>>;
}

/// Actions, helper and controller handed to a persistent factory.
#[derive(Clone)]
pub struct ModelBinding {
    pub actions: Arc<dyn ModelActions>,
    pub helper: Arc<dyn ModelHelper>,
    pub controller: Arc<dyn ModelController>,
}

impl ModelBinding {
    /// Binds `actions` with the default helper and controller.
    #[must_use]
    pub fn with_defaults(actions: Arc<dyn ModelActions>) -> Self {
        Self {
            actions,
            helper: Arc::new(crate::helper::DefaultModelHelper),
            controller: Arc::new(crate::controller::DefaultModelController),
        }
    }
}

impl fmt::Debug for ModelBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelBinding").finish_non_exhaustive()
    }
}

/// Connectors keyed by datasource.
#[derive(Default)]
pub struct ConnectorRegistry {
    connectors: DashMap<String, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `connector` under its datasource key, replacing any previous one.
    pub fn register(&self, connector: Arc<dyn Connector>) {
        self.connectors
            .insert(connector.datasource().to_string(), connector);
    }

    #[must_use]
    pub fn get(&self, datasource: &str) -> Option<Arc<dyn Connector>> {
        self.connectors.get(datasource).map(|e| e.value().clone())
    }

    /// Registered datasource keys, sorted.
    #[must_use]
    pub fn datasources(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.connectors.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Connects every registered connector.
    ///
    /// # Errors
    ///
    /// Returns the first connection failure.
    pub async fn connect_all(&self) -> anyhow::Result<()> {
        let connectors: Vec<_> = self.connectors.iter().map(|e| e.value().clone()).collect();
        for connector in connectors {
            connector.connect(connector.datasource()).await?;
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("datasources", &self.datasources())
            .finish()
    }
}
