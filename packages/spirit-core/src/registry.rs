//! Model registry, one per running server.
//!
//! Factories are registered during bootstrap and only read afterwards, so
//! request handlers share the registry without further coordination.

use std::fmt;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::ConfigError;
use crate::factory::ModelFactory;
use crate::validation::{EnumValidator, RequiredValidator, Validator};

/// Registry of model factories and global validators.
pub struct ModelRegistry {
    /// Collection name -> factory.
    factories: DashMap<String, Arc<ModelFactory>>,
    /// Registration order, for deterministic iteration.
    order: RwLock<Vec<String>>,
    /// Metadata tag -> validator.
    validators: DashMap<String, Arc<dyn Validator>>,
}

impl ModelRegistry {
    /// Creates an empty registry without validators.
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: DashMap::new(),
            order: RwLock::new(Vec::new()),
            validators: DashMap::new(),
        }
    }

    /// Creates an empty registry holding the `required` and `enum` validators.
    #[must_use]
    pub fn with_builtin_validators() -> Self {
        let registry = Self::new();
        registry.register_validator(Arc::new(RequiredValidator));
        registry.register_validator(Arc::new(EnumValidator));
        registry
    }

    /// Registers a factory under its collection name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicateModel`] if the name is taken.
    pub fn register(&self, factory: Arc<ModelFactory>) -> Result<(), ConfigError> {
        let name = factory.collection_name().to_string();
        match self.factories.entry(name.clone()) {
            Entry::Occupied(_) => Err(ConfigError::DuplicateModel { name }),
            Entry::Vacant(slot) => {
                slot.insert(factory);
                self.order.write().push(name.clone());
                debug!(model = %name, "registered model factory");
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn get_factory(&self, name: &str) -> Option<Arc<ModelFactory>> {
        self.factories.get(name).map(|e| Arc::clone(e.value()))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// All factories in registration order.
    #[must_use]
    pub fn factories(&self) -> Vec<Arc<ModelFactory>> {
        self.order
            .read()
            .iter()
            .filter_map(|name| self.get_factory(name))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Registers a global validator under its tag, replacing any previous one.
    pub fn register_validator(&self, validator: Arc<dyn Validator>) {
        self.validators
            .insert(validator.name().to_string(), validator);
    }

    #[must_use]
    pub fn get_validator(&self, name: &str) -> Option<Arc<dyn Validator>> {
        self.validators.get(name).map(|e| Arc::clone(e.value()))
    }

    /// Drops every registered factory. Validators are kept.
    pub fn reset(&self) {
        let mut order = self.order.write();
        self.factories.clear();
        order.clear();
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("factories", &*self.order.read())
            .field("validators", &self.validators.len())
            .finish()
    }
}
